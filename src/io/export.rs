//! Composite export dispatch
//!
//! Each composite becomes one [`ExportRequest`] submitted to an external
//! [`ExportSink`] as its own tokio task. Dispatch returns immediately with
//! [`PendingExports`]; the caller joins them at the end of the run.

use crate::config::{parse_epsg, ExportSettings, PipelineConfig};
use crate::core::builder::CompositeSeries;
use crate::core::reducer::Composite;
use crate::core::windower::{Granularity, TimeWindow};
use crate::types::{GeoTransform, Region, SarError, SarResult};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Folder a granularity exports into
pub fn folder_name(prefix: &str, granularity: Granularity) -> String {
    match granularity {
        Granularity::Annual => format!("{}_SAR", prefix),
        Granularity::Monthly => format!("{}_SAR_Monthly", prefix),
        Granularity::Summer => format!("{}_Summer_SAR", prefix),
    }
}

/// Deterministic file name for one window; also the export identifier
pub fn file_name(prefix: &str, granularity: Granularity, window: &TimeWindow) -> String {
    match (granularity, window.month) {
        (Granularity::Annual, _) | (_, None) => format!("{}_SAR_{}", prefix, window.year),
        (Granularity::Monthly, Some(month)) => {
            format!("{}_SAR_{}_{}", prefix, window.year, month)
        }
        (Granularity::Summer, Some(month)) => {
            format!("{}_Summer_SAR_{}_{}", prefix, window.year, month)
        }
    }
}

/// One composite ready for the sink
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub description: String,
    pub folder: String,
    pub file_name_prefix: String,
    pub composite: Arc<Composite>,
    pub region: Region,
    /// Output pixel scale in meters
    pub scale: f64,
    pub crs: String,
    pub max_pixels: f64,
}

impl ExportRequest {
    pub fn identifier(&self) -> &str {
        &self.file_name_prefix
    }

    /// Width * height * bands
    pub fn pixel_count(&self) -> u64 {
        let (rows, cols) = self.composite.dim().unwrap_or((0, 0));
        rows as u64 * cols as u64 * self.composite.bands.len() as u64
    }

    pub fn check_pixel_budget(&self) -> SarResult<()> {
        let pixels = self.pixel_count();
        if pixels as f64 > self.max_pixels {
            return Err(SarError::ExportSubmission {
                identifier: self.file_name_prefix.clone(),
                reason: format!("{} pixels exceeds budget of {}", pixels, self.max_pixels),
            });
        }
        Ok(())
    }

    pub fn epsg_code(&self) -> Option<u32> {
        parse_epsg(&self.crs)
    }

    /// North-up transform of the composite grid over the region bounds
    pub fn geo_transform(&self) -> Option<GeoTransform> {
        self.composite
            .dim()
            .map(|dim| GeoTransform::from_bounds(&self.region.bounding_box(), dim))
    }
}

/// Sink acknowledgement for one export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReceipt {
    pub identifier: String,
    pub location: String,
}

/// External raster persistence service
pub trait ExportSink: Send + Sync + 'static {
    /// Persist one composite, reporting completion or rejection
    fn submit(&self, request: ExportRequest) -> impl Future<Output = SarResult<ExportReceipt>> + Send;
}

/// Export that the sink rejected or that never completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedExport {
    pub identifier: String,
    pub reason: String,
}

/// Outcome of every export of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub completed: Vec<ExportReceipt>,
    pub failed: Vec<FailedExport>,
    /// Identifiers of windows that had no composite to export
    pub skipped: Vec<String>,
}

impl ExportReport {
    /// Requests handed to the sink, whatever their outcome
    pub fn submitted(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

/// Exports in flight; join once at the end of the run
///
/// Dropping this detaches the tasks; submitted exports are not retracted.
#[derive(Debug, Default)]
pub struct PendingExports {
    handles: Vec<(String, JoinHandle<SarResult<ExportReceipt>>)>,
    skipped: Vec<String>,
}

impl PendingExports {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn extend(&mut self, other: PendingExports) {
        self.handles.extend(other.handles);
        self.skipped.extend(other.skipped);
    }

    /// Wait for every export and aggregate the results
    pub async fn join(self) -> ExportReport {
        let mut report = ExportReport {
            skipped: self.skipped,
            ..ExportReport::default()
        };

        for (identifier, handle) in self.handles {
            match handle.await {
                Ok(Ok(receipt)) => report.completed.push(receipt),
                Ok(Err(e)) => {
                    log::warn!("Export {} failed: {}", identifier, e);
                    report.failed.push(FailedExport {
                        identifier,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    log::warn!("Export task {} did not complete: {}", identifier, e);
                    report.failed.push(FailedExport {
                        identifier,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.completed.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        report.failed.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        log::info!(
            "Exports finished: {} completed, {} failed, {} skipped",
            report.completed.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }
}

/// Submits every composite of a series to the sink without waiting on it
pub struct ExportDispatcher<S> {
    sink: Arc<S>,
    settings: ExportSettings,
    region: Region,
}

impl<S: ExportSink> ExportDispatcher<S> {
    pub fn new(sink: Arc<S>, config: &PipelineConfig) -> Self {
        Self {
            sink,
            settings: config.export.clone(),
            region: config.region.clone(),
        }
    }

    pub fn request_for(&self, granularity: Granularity, composite: Arc<Composite>) -> ExportRequest {
        let prefix = &self.settings.output_prefix;
        let name = file_name(prefix, granularity, &composite.window);
        ExportRequest {
            description: name.clone(),
            folder: folder_name(prefix, granularity),
            file_name_prefix: name,
            composite,
            region: self.region.clone(),
            scale: self.settings.scale,
            crs: self.settings.crs.clone(),
            max_pixels: self.settings.max_pixels,
        }
    }

    /// Spawn one submission task per composite, consuming the series
    ///
    /// # Errors
    /// `Processing` when called outside a tokio runtime.
    pub fn dispatch(&self, series: CompositeSeries) -> SarResult<PendingExports> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SarError::Processing(format!("export dispatch needs a tokio runtime: {}", e)))?;

        let granularity = series.granularity;
        let prefix = &self.settings.output_prefix;
        let mut pending = PendingExports {
            handles: Vec::with_capacity(series.composites.len()),
            skipped: series
                .skipped
                .iter()
                .map(|s| file_name(prefix, granularity, &s.window))
                .collect(),
        };

        for composite in series.composites {
            let request = self.request_for(granularity, Arc::new(composite));
            let identifier = request.identifier().to_string();
            log::debug!("Submitting export {} to {}", identifier, request.folder);

            let sink = Arc::clone(&self.sink);
            let handle = runtime.spawn(async move { sink.submit(request).await });
            pending.handles.push((identifier, handle));
        }

        log::info!(
            "Dispatched {} {} export(s), {} skipped",
            pending.len(),
            granularity,
            pending.skipped.len()
        );
        Ok(pending)
    }
}

/// Sink that keeps accepted requests in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    accepted: Mutex<Vec<ExportRequest>>,
    reject: HashSet<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects the listed identifiers
    pub fn rejecting<I, T>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            accepted: Mutex::new(Vec::new()),
            reject: identifiers.into_iter().map(Into::into).collect(),
        }
    }

    /// Snapshot of accepted requests, sorted by identifier
    pub fn accepted(&self) -> Vec<ExportRequest> {
        let mut requests = match self.accepted.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        requests.sort_by(|a, b| a.file_name_prefix.cmp(&b.file_name_prefix));
        requests
    }
}

impl ExportSink for MemorySink {
    fn submit(&self, request: ExportRequest) -> impl Future<Output = SarResult<ExportReceipt>> + Send {
        async move {
            request.check_pixel_budget()?;

            let identifier = request.identifier().to_string();
            if self.reject.contains(&identifier) {
                return Err(SarError::ExportSubmission {
                    identifier,
                    reason: "rejected by sink".to_string(),
                });
            }

            let location = format!("memory://{}/{}", request.folder, identifier);
            match self.accepted.lock() {
                Ok(mut guard) => guard.push(request),
                Err(poisoned) => poisoned.into_inner().push(request),
            }
            Ok(ExportReceipt { identifier, location })
        }
    }
}

#[cfg(feature = "geotiff")]
pub use geotiff::GeoTiffSink;

#[cfg(feature = "geotiff")]
mod geotiff {
    use super::{ExportReceipt, ExportRequest, ExportSink};
    use crate::types::{SarError, SarResult};
    use gdal::raster::Buffer;
    use gdal::spatial_ref::SpatialRef;
    use gdal::{DriverManager, Metadata};
    use std::future::Future;
    use std::path::{Path, PathBuf};

    /// Writes each composite as a multi-band GeoTIFF under `root/folder/`
    #[derive(Debug, Clone)]
    pub struct GeoTiffSink {
        root: PathBuf,
    }

    impl GeoTiffSink {
        pub fn new<P: AsRef<Path>>(root: P) -> Self {
            Self {
                root: root.as_ref().to_path_buf(),
            }
        }
    }

    impl ExportSink for GeoTiffSink {
        fn submit(&self, request: ExportRequest) -> impl Future<Output = SarResult<ExportReceipt>> + Send {
            let root = self.root.clone();
            async move {
                request.check_pixel_budget()?;
                let identifier = request.identifier().to_string();
                tokio::task::spawn_blocking(move || write_geotiff(&root, &request))
                    .await
                    .map_err(|e| SarError::ExportSubmission {
                        identifier,
                        reason: e.to_string(),
                    })?
            }
        }
    }

    fn write_geotiff(root: &Path, request: &ExportRequest) -> SarResult<ExportReceipt> {
        let composite = &request.composite;
        let (height, width) = composite.dim().ok_or_else(|| SarError::ExportSubmission {
            identifier: request.identifier().to_string(),
            reason: "composite has no bands".to_string(),
        })?;

        let dir = root.join(&request.folder);
        std::fs::create_dir_all(&dir)?;
        let output_path = dir.join(format!("{}.tif", request.file_name_prefix));
        log::info!("Saving composite as GeoTIFF: {}", output_path.display());

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<f32, _>(
            &output_path,
            width as isize,
            height as isize,
            composite.bands.len() as isize,
        )?;

        if let Some(transform) = request.geo_transform() {
            dataset.set_geo_transform(&transform.to_gdal())?;
        }

        if let Some(epsg) = request.epsg_code() {
            dataset.set_spatial_ref(&SpatialRef::from_epsg(epsg)?)?;
        }

        for (key, value) in composite.properties() {
            dataset.set_metadata_item(&key, &value, "")?;
        }

        for (index, band) in composite.bands.iter().enumerate() {
            let mut rasterband = dataset.rasterband(index as isize + 1)?;
            let flat_data: Vec<f32> = band.data.iter().cloned().collect();
            let buffer = Buffer::new((width, height), flat_data);
            rasterband.write((0, 0), (width, height), &buffer)?;
            rasterband.set_no_data_value(Some(f64::NAN))?;
            rasterband.set_description(&band.name)?;
        }

        Ok(ExportReceipt {
            identifier: request.identifier().to_string(),
            location: output_path.display().to_string(),
        })
    }
}
