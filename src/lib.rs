//! sarcomp: Multi-year Sentinel-1 dual-polarization composites
//!
//! Turns a time series of dual-polarization backscatter scenes into derived
//! bands (dB, cross ratios, normalized difference), reduces them into per-pixel
//! median composites over annual, monthly and summer windows, and hands each
//! composite to an export sink.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

// Re-export main types and functions for easier access
pub use config::{ExportSettings, FetchSettings, PipelineConfig, PolarizationPair};
pub use types::{
    AcquisitionMode, BandStack, BoundingBox, GeoTransform, Polarization, Region, SarError,
    SarRealImage, SarResult, Scene, NO_DATA,
};

pub use crate::core::{
    BandTransform, Composite, CompositeBuilder, CompositeReducer, CompositeSeries, DerivedScene,
    Granularity, PeriodWindower, TimeWindow, TransformedSeries,
};
pub use io::{
    ExportDispatcher, ExportReport, ExportRequest, ExportSink, MemoryCatalog, MemorySink,
    SceneCatalog,
};
pub use pipeline::{RunSummary, SarCompositePipeline};
