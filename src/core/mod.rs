//! Core compositing modules

pub mod band_transform;
pub mod builder;
pub mod reducer;
pub mod windower;

// Re-export main types
pub use band_transform::{BandTransform, DerivedBandNames, DerivedScene, SingularValue};
pub use builder::{CompositeBuilder, CompositeSeries, DroppedScene, SkippedWindow, TransformedSeries};
pub use reducer::{median, median_stack, Composite, CompositeReducer};
pub use windower::{Granularity, PeriodWindower, Season, TimeWindow, SUMMER_MONTHS};
