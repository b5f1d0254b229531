//! Catalog acquisition and composite export

pub mod catalog;
pub mod export;

pub use catalog::{
    fetch_scenes, query_for_config, CatalogQuery, FailedQuery, FetchLimits, FetchOutcome,
    MemoryCatalog, SceneCatalog,
};
#[cfg(feature = "geotiff")]
pub use export::GeoTiffSink;
pub use export::{
    ExportDispatcher, ExportReceipt, ExportReport, ExportRequest, ExportSink, FailedExport,
    MemorySink, PendingExports,
};
