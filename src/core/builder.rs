use crate::config::PipelineConfig;
use crate::core::band_transform::{BandTransform, DerivedScene};
use crate::core::reducer::{Composite, CompositeReducer};
use crate::core::windower::{Granularity, PeriodWindower, TimeWindow};
use crate::types::{SarError, SarResult, Scene};
use serde::Serialize;
use std::collections::HashMap;

/// Scene removed from the series before compositing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedScene {
    pub id: String,
    pub reason: String,
}

/// Window that produced no composite
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedWindow {
    pub window: TimeWindow,
    pub reason: String,
}

/// Band-transformed scenes shared by every granularity of a run
#[derive(Debug, Clone, Default)]
pub struct TransformedSeries {
    /// Sorted by acquisition time, then id
    pub scenes: Vec<DerivedScene>,
    pub dropped: Vec<DroppedScene>,
}

impl TransformedSeries {
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Total no-data pixels introduced by singular values
    pub fn singular_pixels(&self) -> usize {
        self.scenes.iter().map(|s| s.singular_pixels()).sum()
    }
}

/// Ordered composites of one granularity
#[derive(Debug, Clone)]
pub struct CompositeSeries {
    pub granularity: Granularity,
    /// Ascending by window start
    pub composites: Vec<Composite>,
    pub skipped: Vec<SkippedWindow>,
}

impl CompositeSeries {
    pub fn len(&self) -> usize {
        self.composites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.composites.is_empty()
    }

    /// Composite for a given year and optional month
    pub fn find(&self, year: i32, month: Option<u32>) -> Option<&Composite> {
        self.composites
            .iter()
            .find(|c| c.year() == year && c.month() == month)
    }
}

/// Builds annual, monthly and summer composite series from one raw time series
pub struct CompositeBuilder {
    config: PipelineConfig,
    transform: BandTransform,
    windower: PeriodWindower,
    reducer: CompositeReducer,
}

impl CompositeBuilder {
    /// Create a builder from a configuration, validating it first
    pub fn new(config: PipelineConfig) -> SarResult<Self> {
        config.validate()?;
        Ok(Self {
            transform: BandTransform::new(config.polarizations),
            windower: PeriodWindower::from_config(&config)?,
            reducer: CompositeReducer::new(),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn transform(&self) -> &BandTransform {
        &self.transform
    }

    /// Apply the band transform once to every raw scene
    ///
    /// Scenes missing a channel, or off the run grid (the most common scene
    /// grid), are dropped with a warning. Extra raw bands not carried by every
    /// kept scene are removed.
    pub fn transform_series(&self, raw: &[Scene]) -> TransformedSeries {
        let mut ordered: Vec<&Scene> = raw.iter().collect();
        ordered.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));

        log::info!("Transforming {} scene(s)", ordered.len());

        #[cfg(feature = "parallel")]
        let results: Vec<SarResult<DerivedScene>> = {
            use rayon::prelude::*;
            ordered
                .par_iter()
                .map(|scene| self.transform.apply(scene))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<SarResult<DerivedScene>> = ordered
            .iter()
            .map(|scene| self.transform.apply(scene))
            .collect();

        let mut series = TransformedSeries::default();
        let mut accepted = Vec::with_capacity(results.len());

        for (scene, result) in ordered.iter().zip(results) {
            match result {
                Ok(derived) => accepted.push(derived),
                Err(e) => {
                    log::warn!("Dropping scene {}: {}", scene.id, e);
                    series.dropped.push(DroppedScene {
                        id: scene.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(grid) = run_grid(&accepted) {
            log::debug!("Run grid {:?}", grid);
            for mut derived in accepted {
                let dim = derived.dim().unwrap_or((0, 0));
                if dim != grid {
                    let reason = format!("grid {:?} differs from run grid {:?}", dim, grid);
                    log::warn!("Dropping scene {}: {}", derived.id, reason);
                    series.dropped.push(DroppedScene {
                        id: derived.id,
                        reason,
                    });
                    continue;
                }
                derived.bands.retain(|band| band.data.dim() == grid);
                series.scenes.push(derived);
            }
        }

        keep_shared_bands(&mut series.scenes);

        log::info!(
            "Band transform complete: {} scene(s) kept, {} dropped, {} no-data pixel(s)",
            series.scenes.len(),
            series.dropped.len(),
            series.singular_pixels()
        );

        series
    }

    /// Composite one granularity from the shared transformed series
    pub fn build_series(
        &self,
        transformed: &TransformedSeries,
        granularity: Granularity,
    ) -> SarResult<CompositeSeries> {
        let windows = self.windower.windows(granularity)?;

        log::info!(
            "Building {} series: {} window(s) over {} scene(s)",
            granularity,
            windows.len(),
            transformed.len()
        );

        #[cfg(feature = "parallel")]
        let results: Vec<SarResult<Composite>> = {
            use rayon::prelude::*;
            windows
                .par_iter()
                .map(|window| self.reducer.reduce(&transformed.scenes, window))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<SarResult<Composite>> = windows
            .iter()
            .map(|window| self.reducer.reduce(&transformed.scenes, window))
            .collect();

        let mut series = CompositeSeries {
            granularity,
            composites: Vec::with_capacity(windows.len()),
            skipped: Vec::new(),
        };

        for (window, result) in windows.iter().zip(results) {
            match result {
                Ok(composite) => series.composites.push(composite),
                Err(SarError::EmptyWindow { .. }) => {
                    log::warn!("Skipping {} window {}: no scenes", granularity, window);
                    series.skipped.push(SkippedWindow {
                        window: *window,
                        reason: "no data for window".to_string(),
                    });
                }
                Err(e) => {
                    log::warn!("Skipping {} window {}: {}", granularity, window, e);
                    series.skipped.push(SkippedWindow {
                        window: *window,
                        reason: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "{} composites created: {} ({} window(s) skipped)",
            granularity,
            series.composites.len(),
            series.skipped.len()
        );

        Ok(series)
    }

    /// Build every configured granularity, in configuration order
    pub fn build_all(&self, transformed: &TransformedSeries) -> SarResult<Vec<CompositeSeries>> {
        self.config
            .granularities
            .iter()
            .map(|&granularity| self.build_series(transformed, granularity))
            .collect()
    }
}

/// Most common scene grid; ties go to the larger grid, then the larger dims
fn run_grid(scenes: &[DerivedScene]) -> Option<(usize, usize)> {
    let mut counts: HashMap<(usize, usize), usize> = HashMap::new();
    for dim in scenes.iter().filter_map(|s| s.dim()) {
        *counts.entry(dim).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&((rows, cols), count)| (count, rows * cols, (rows, cols)))
        .map(|(dim, _)| dim)
}

/// Reduce every scene to the bands all of them carry
///
/// The channels and derived bands are always shared; extra raw bands survive
/// only if every scene has them.
fn keep_shared_bands(scenes: &mut [DerivedScene]) {
    let shared: Vec<String> = match scenes.first() {
        Some(first) => first
            .bands
            .names()
            .filter(|name| scenes.iter().all(|s| s.bands.contains(name)))
            .map(str::to_string)
            .collect(),
        None => return,
    };

    for scene in scenes.iter_mut() {
        if scene.bands.len() != shared.len() {
            log::debug!(
                "Scene {}: keeping {} of {} band(s) shared by the run",
                scene.id,
                shared.len(),
                scene.bands.len()
            );
            scene.bands.retain(|band| shared.contains(&band.name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AcquisitionMode, BandStack, BoundingBox, Polarization, Region};
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;

    fn raw(id: &str, y: i32, m: u32, d: u32, vv: f32, vh: f32) -> Scene {
        let mut bands = BandStack::new();
        bands.insert("VV", Array2::from_elem((3, 3), vv));
        bands.insert("VH", Array2::from_elem((3, 3), vh));
        Scene {
            id: id.to_string(),
            acquired: Utc.with_ymd_and_hms(y, m, d, 22, 50, 0).unwrap(),
            instrument_mode: AcquisitionMode::IW,
            polarizations: vec![Polarization::VV, Polarization::VH],
            footprint: BoundingBox {
                min_lon: -77.0,
                max_lon: -76.0,
                min_lat: 37.0,
                max_lat: 38.0,
            },
            bands,
        }
    }

    fn builder(start: i32, end: i32, granularities: Vec<Granularity>) -> CompositeBuilder {
        let mut config = PipelineConfig::new(Region::rectangle(-77.5, 36.5, -75.0, 39.8), start, end);
        config.granularities = granularities;
        CompositeBuilder::new(config).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PipelineConfig::new(Region::rectangle(-77.5, 36.5, -75.0, 39.8), 2021, 2020);
        assert!(CompositeBuilder::new(config).is_err());
    }

    #[test]
    fn test_transform_drops_bad_scenes_and_sorts() {
        let builder = builder(2020, 2020, vec![Granularity::Annual]);
        let mut missing = raw("missing", 2020, 3, 1, 0.1, 0.01);
        missing.bands = std::iter::once(("VV".to_string(), Array2::from_elem((3, 3), 0.1))).collect();
        let mut wrong_grid = raw("wrong_grid", 2020, 4, 1, 0.1, 0.01);
        wrong_grid.bands.insert("VV", Array2::from_elem((2, 2), 0.1));
        wrong_grid.bands.insert("VH", Array2::from_elem((2, 2), 0.1));

        let scenes = vec![
            raw("b", 2020, 5, 1, 0.1, 0.01),
            missing,
            raw("a", 2020, 2, 1, 0.1, 0.01),
            wrong_grid,
        ];
        let series = builder.transform_series(&scenes);

        let ids: Vec<&str> = series.scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(series.dropped.len(), 2);
        assert!(series.dropped.iter().any(|d| d.id == "missing" && d.reason.contains("VH")));
        assert!(series.dropped.iter().any(|d| d.id == "wrong_grid"));
    }

    #[test]
    fn test_extra_raw_band_does_not_drop_other_scenes() {
        let builder = builder(2020, 2020, vec![Granularity::Annual]);
        let mut with_angle = raw("first", 2020, 1, 5, 0.1, 0.01);
        with_angle.bands.insert("angle", Array2::from_elem((3, 3), 38.5));
        let scenes = vec![
            with_angle,
            raw("s2", 2020, 2, 5, 0.2, 0.01),
            raw("s3", 2020, 3, 5, 0.4, 0.01),
            raw("s4", 2020, 4, 5, 0.8, 0.01),
        ];

        let transformed = builder.transform_series(&scenes);
        assert!(transformed.dropped.is_empty());
        let ids: Vec<&str> = transformed.scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "s2", "s3", "s4"]);
        assert!(transformed.scenes.iter().all(|s| !s.bands.contains("angle")));

        let annual = builder.build_series(&transformed, Granularity::Annual).unwrap();
        let composite = annual.find(2020, None).unwrap();
        assert_eq!(composite.scene_count(), 4);
        // median of {0.1, 0.2, 0.4, 0.8}
        approx::assert_relative_eq!(composite.bands.get("VV").unwrap()[[0, 0]], 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_shared_extra_band_is_kept() {
        let builder = builder(2020, 2020, vec![Granularity::Annual]);
        let scenes: Vec<Scene> = (1..=3)
            .map(|m| {
                let mut scene = raw(&format!("s{}", m), 2020, m, 1, 0.1, 0.01);
                scene.bands.insert("angle", Array2::from_elem((3, 3), 40.0));
                scene
            })
            .collect();

        let transformed = builder.transform_series(&scenes);
        assert!(transformed.scenes.iter().all(|s| s.bands.contains("angle")));
    }

    #[test]
    fn test_run_grid_does_not_depend_on_first_scene() {
        let builder = builder(2020, 2020, vec![Granularity::Annual]);
        let mut odd = raw("odd", 2020, 1, 2, 0.1, 0.01);
        odd.bands.insert("VV", Array2::from_elem((1, 1), 0.1));
        odd.bands.insert("VH", Array2::from_elem((1, 1), 0.01));
        let scenes = vec![odd, raw("b", 2020, 3, 1, 0.1, 0.01), raw("c", 2020, 4, 1, 0.1, 0.01)];

        let forward = builder.transform_series(&scenes);
        let ids: Vec<&str> = forward.scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(forward.dropped.len(), 1);
        assert_eq!(forward.dropped[0].id, "odd");

        let mut reversed = scenes.clone();
        reversed.reverse();
        let backward = builder.transform_series(&reversed);
        assert_eq!(backward.dropped, forward.dropped);
    }

    #[test]
    fn test_run_grid_tie_prefers_larger_grid() {
        let builder = builder(2020, 2020, vec![Granularity::Annual]);
        let mut small = raw("small", 2020, 1, 2, 0.1, 0.01);
        small.bands.insert("VV", Array2::from_elem((2, 2), 0.1));
        small.bands.insert("VH", Array2::from_elem((2, 2), 0.01));
        let scenes = vec![small, raw("large", 2020, 3, 1, 0.1, 0.01)];

        let transformed = builder.transform_series(&scenes);
        assert_eq!(transformed.scenes[0].id, "large");
        assert_eq!(transformed.dropped[0].id, "small");
    }

    #[test]
    fn test_empty_windows_are_skipped_not_fatal() {
        let builder = builder(2020, 2021, vec![Granularity::Annual, Granularity::Summer]);
        let scenes = vec![raw("a", 2020, 7, 4, 0.1, 0.01), raw("b", 2020, 7, 20, 0.2, 0.02)];
        let transformed = builder.transform_series(&scenes);
        let all = builder.build_all(&transformed).unwrap();

        assert_eq!(all.len(), 2);
        let annual = &all[0];
        assert_eq!(annual.granularity, Granularity::Annual);
        assert_eq!(annual.len(), 1);
        assert_eq!(annual.composites[0].year(), 2020);
        assert_eq!(annual.skipped.len(), 1);
        assert_eq!(annual.skipped[0].window.year, 2021);

        let summer = &all[1];
        assert_eq!(summer.len(), 1);
        assert_eq!(summer.composites[0].month(), Some(7));
        assert_eq!(summer.skipped.len(), 5);
        assert!(summer.find(2020, Some(7)).is_some());
    }

    #[test]
    fn test_series_share_transformed_values() {
        let builder = builder(2020, 2020, vec![Granularity::Annual, Granularity::Monthly]);
        let scenes = vec![raw("only", 2020, 3, 15, 0.05, 0.004)];
        let transformed = builder.transform_series(&scenes);
        let all = builder.build_all(&transformed).unwrap();

        let annual = all[0].find(2020, None).unwrap();
        let march = all[1].find(2020, Some(3)).unwrap();
        for name in builder.transform().band_names().all() {
            let a = annual.bands.get(name).unwrap();
            let m = march.bands.get(name).unwrap();
            assert!(a.iter().zip(m.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
        }
        assert_eq!(all[1].len(), 1);
        assert_eq!(all[1].skipped.len(), 11);
    }
}
