//! End-to-end compositing run
//!
//! acquisition -> band transform -> windowed median -> export

use crate::config::PipelineConfig;
use crate::core::builder::{CompositeBuilder, CompositeSeries, DroppedScene};
use crate::core::windower::Granularity;
use crate::io::catalog::{fetch_scenes, query_for_config, FailedQuery, FetchLimits, SceneCatalog};
use crate::io::export::{file_name, ExportDispatcher, ExportReport, ExportSink, PendingExports};
use crate::types::{SarError, SarResult};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Composites produced for one granularity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesSummary {
    pub granularity: Granularity,
    /// Export identifiers of the composites, in window order
    pub composites: Vec<String>,
    /// Export identifiers of windows without data
    pub skipped: Vec<String>,
}

impl SeriesSummary {
    fn from_series(prefix: &str, series: &CompositeSeries) -> Self {
        Self {
            granularity: series.granularity,
            composites: series
                .composites
                .iter()
                .map(|c| file_name(prefix, series.granularity, &c.window))
                .collect(),
            skipped: series
                .skipped
                .iter()
                .map(|s| file_name(prefix, series.granularity, &s.window))
                .collect(),
        }
    }
}

/// Outcome of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub scenes_fetched: usize,
    pub scenes_processed: usize,
    pub dropped_scenes: Vec<DroppedScene>,
    /// Pixels set to no-data by the band transform, all scenes and bands
    pub singular_pixels: usize,
    pub failed_queries: Vec<FailedQuery>,
    pub series: Vec<SeriesSummary>,
    pub exports: ExportReport,
}

impl RunSummary {
    pub fn series(&self, granularity: Granularity) -> Option<&SeriesSummary> {
        self.series.iter().find(|s| s.granularity == granularity)
    }

    pub fn to_json(&self) -> SarResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> SarResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Runs the full compositing chain for one configuration
pub struct SarCompositePipeline {
    config: PipelineConfig,
    builder: Arc<CompositeBuilder>,
}

impl SarCompositePipeline {
    /// # Errors
    /// `Config` if the configuration is invalid.
    pub fn new(config: PipelineConfig) -> SarResult<Self> {
        let builder = CompositeBuilder::new(config.clone())?;
        Ok(Self {
            config,
            builder: Arc::new(builder),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fetch, composite and export every configured granularity
    ///
    /// Dropped scenes, empty windows, failed catalog sub-queries and rejected
    /// exports are reported in the summary; none of them aborts the run.
    pub async fn run<C, S>(&self, catalog: Arc<C>, sink: Arc<S>) -> SarResult<RunSummary>
    where
        C: SceneCatalog,
        S: ExportSink,
    {
        log::info!(
            "Starting SAR composite run {}-{} ({} granularities)",
            self.config.start_year,
            self.config.end_year,
            self.config.granularities.len()
        );

        let query = query_for_config(&self.config)?;
        let fetched = fetch_scenes(catalog, &query, FetchLimits::from_config(&self.config)).await;
        let scenes_fetched = fetched.scenes.len();
        let raw_scenes = fetched.scenes;

        let builder = Arc::clone(&self.builder);
        let (transformed, all_series) = tokio::task::spawn_blocking(move || {
            let transformed = builder.transform_series(&raw_scenes);
            let all_series = builder.build_all(&transformed)?;
            Ok::<_, SarError>((transformed, all_series))
        })
        .await
        .map_err(|e| SarError::Processing(format!("compositing task failed: {}", e)))??;

        let prefix = &self.config.export.output_prefix;
        let series: Vec<SeriesSummary> = all_series
            .iter()
            .map(|s| SeriesSummary::from_series(prefix, s))
            .collect();

        let dispatcher = ExportDispatcher::new(sink, &self.config);
        let mut pending = PendingExports::default();
        for composite_series in all_series {
            pending.extend(dispatcher.dispatch(composite_series)?);
        }
        let exports = pending.join().await;

        let summary = RunSummary {
            scenes_fetched,
            scenes_processed: transformed.len(),
            singular_pixels: transformed.singular_pixels(),
            dropped_scenes: transformed.dropped,
            failed_queries: fetched.failed,
            series,
            exports,
        };

        log::info!(
            "Run complete: {} scene(s) processed, {} dropped, {} export(s) submitted, {} failed",
            summary.scenes_processed,
            summary.dropped_scenes.len(),
            summary.exports.submitted(),
            summary.exports.failed.len()
        );
        Ok(summary)
    }
}
