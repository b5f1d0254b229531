//! Scene acquisition from an imagery catalog
//!
//! The catalog itself is an external collaborator behind [`SceneCatalog`].
//! [`fetch_scenes`] splits the configured date range into one query per
//! calendar year and runs them on the tokio runtime with a bounded number of
//! requests in flight. Dropping the returned future aborts outstanding queries.

use crate::config::PipelineConfig;
use crate::types::{AcquisitionMode, Polarization, Region, SarError, SarResult, Scene};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One catalog query: region, half-open date range and mode filters
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogQuery {
    pub region: Region,
    pub start: NaiveDate,
    /// Exclusive end date
    pub end: NaiveDate,
    /// Every listed polarization must be present on a scene
    pub required_polarizations: Vec<Polarization>,
    pub instrument_mode: Option<AcquisitionMode>,
}

impl CatalogQuery {
    /// True if a scene satisfies the bounds, date and mode filters
    pub fn matches(&self, scene: &Scene) -> bool {
        let day = scene.acquired.date_naive();
        day >= self.start
            && day < self.end
            && scene.footprint.intersects(&self.region.bounding_box())
            && self
                .required_polarizations
                .iter()
                .all(|p| scene.polarizations.contains(p))
            && self
                .instrument_mode
                .map_or(true, |mode| scene.instrument_mode == mode)
    }

    /// Split into one query per calendar year, preserving the overall bounds
    pub fn split_by_year(&self) -> Vec<CatalogQuery> {
        let mut chunks = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let next_year = NaiveDate::from_ymd_opt(cursor.year() + 1, 1, 1)
                .unwrap_or(self.end);
            let chunk_end = next_year.min(self.end);
            chunks.push(CatalogQuery {
                start: cursor,
                end: chunk_end,
                ..self.clone()
            });
            cursor = chunk_end;
        }
        chunks
    }
}

/// External imagery catalog
pub trait SceneCatalog: Send + Sync + 'static {
    /// Return the scenes matching `query`, in any order
    fn query(&self, query: CatalogQuery) -> impl Future<Output = SarResult<Vec<Scene>>> + Send;
}

/// Catalog sub-query that did not return scenes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub reason: String,
}

/// Scenes gathered from all sub-queries
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Sorted by acquisition time then id, unique by id
    pub scenes: Vec<Scene>,
    pub failed: Vec<FailedQuery>,
}

/// Acquisition limits for [`fetch_scenes`]
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub max_in_flight: usize,
    pub timeout: Option<std::time::Duration>,
}

impl FetchLimits {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_in_flight: config.fetch.max_in_flight.max(1),
            timeout: config.fetch.timeout_secs.map(std::time::Duration::from_secs),
        }
    }
}

/// Build the full-range query for a configuration
pub fn query_for_config(config: &PipelineConfig) -> SarResult<CatalogQuery> {
    let last_day = config.effective_end_date()?;
    let end = last_day
        .succ_opt()
        .ok_or_else(|| SarError::Config(format!("no date follows {}", last_day)))?;
    Ok(CatalogQuery {
        region: config.region.clone(),
        start: config.start_date()?,
        end,
        required_polarizations: vec![config.polarizations.co, config.polarizations.cross],
        instrument_mode: config.instrument_mode,
    })
}

/// Fetch all scenes for `query`, one sub-query per year, bounded concurrency
///
/// A failing or timed-out sub-query is recorded in [`FetchOutcome::failed`];
/// the scenes of the other sub-queries are still returned.
pub async fn fetch_scenes<C: SceneCatalog>(
    catalog: Arc<C>,
    query: &CatalogQuery,
    limits: FetchLimits,
) -> FetchOutcome {
    let chunks = query.split_by_year();
    log::info!(
        "Querying catalog: {} sub-queries over [{}, {}), {} in flight",
        chunks.len(),
        query.start,
        query.end,
        limits.max_in_flight
    );

    let permits = Arc::new(Semaphore::new(limits.max_in_flight.max(1)));
    let mut tasks = JoinSet::new();

    for chunk in chunks {
        let catalog = Arc::clone(&catalog);
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let (start, end) = (chunk.start, chunk.end);
            let result = match permits.acquire_owned().await {
                Ok(_permit) => match limits.timeout {
                    Some(limit) => match tokio::time::timeout(limit, catalog.query(chunk)).await {
                        Ok(result) => result,
                        Err(_) => Err(SarError::Catalog(format!(
                            "query timed out after {:?}",
                            limit
                        ))),
                    },
                    None => catalog.query(chunk).await,
                },
                Err(e) => Err(SarError::Catalog(e.to_string())),
            };
            (start, end, result)
        });
    }

    let mut outcome = FetchOutcome::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, _, Ok(mut scenes))) => outcome.scenes.append(&mut scenes),
            Ok((start, end, Err(e))) => {
                log::warn!("Catalog query [{}, {}) failed: {}", start, end, e);
                outcome.failed.push(FailedQuery {
                    start,
                    end,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                log::warn!("Catalog task aborted: {}", e);
                outcome.failed.push(FailedQuery {
                    start: query.start,
                    end: query.end,
                    reason: e.to_string(),
                });
            }
        }
    }

    outcome.scenes.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));
    let before = outcome.scenes.len();
    let mut seen = std::collections::HashSet::new();
    outcome.scenes.retain(|scene| seen.insert(scene.id.clone()));
    if outcome.scenes.len() != before {
        log::debug!("Removed {} duplicate scene(s)", before - outcome.scenes.len());
    }
    outcome.failed.sort_by_key(|f| f.start);

    log::info!("Total Sentinel-1 images found: {}", outcome.scenes.len());
    outcome
}

/// Catalog over an in-memory scene list
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    scenes: Vec<Scene>,
}

impl MemoryCatalog {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl SceneCatalog for MemoryCatalog {
    fn query(&self, query: CatalogQuery) -> impl Future<Output = SarResult<Vec<Scene>>> + Send {
        let matched: Vec<Scene> = self
            .scenes
            .iter()
            .filter(|scene| query.matches(scene))
            .cloned()
            .collect();
        async move { Ok(matched) }
    }
}
