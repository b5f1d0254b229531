use crate::core::band_transform::DerivedScene;
use crate::core::windower::{Season, TimeWindow};
use crate::types::{is_valid, BandStack, SarError, SarRealImage, SarResult, NO_DATA};
use ndarray::Array2;
use num_traits::Float;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Per-pixel median of the derived scenes inside one time window
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub window: TimeWindow,
    pub bands: BandStack,
    /// Contributing scene ids, sorted
    pub scene_ids: Vec<String>,
}

impl Composite {
    pub fn year(&self) -> i32 {
        self.window.year
    }

    pub fn month(&self) -> Option<u32> {
        self.window.month
    }

    pub fn season(&self) -> Option<Season> {
        self.window.season
    }

    pub fn scene_count(&self) -> usize {
        self.scene_ids.len()
    }

    pub fn dim(&self) -> Option<(usize, usize)> {
        self.bands.dim()
    }

    /// Provenance tags attached to the exported product
    pub fn properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        props.insert("year".to_string(), self.window.year.to_string());
        if let Some(month) = self.window.month {
            props.insert("month".to_string(), month.to_string());
        }
        if let Some(season) = self.window.season {
            props.insert("season".to_string(), season.to_string());
        }
        props.insert(
            "system:time_start".to_string(),
            self.window.time_start_millis().to_string(),
        );
        props.insert("scene_count".to_string(), self.scene_count().to_string());
        props
    }
}

/// Median reducer over a window of derived scenes
#[derive(Debug, Clone, Default)]
pub struct CompositeReducer;

impl CompositeReducer {
    pub fn new() -> Self {
        Self
    }

    /// Reduce the scenes whose timestamp lies in `window`
    ///
    /// No-data samples are ignored per pixel; a pixel with no valid sample
    /// stays no-data.
    ///
    /// # Errors
    /// `EmptyWindow` if no scene falls inside the window, `Processing` if the
    /// selected scenes disagree on band set or grid.
    pub fn reduce(&self, scenes: &[DerivedScene], window: &TimeWindow) -> SarResult<Composite> {
        let selected: Vec<&DerivedScene> = scenes
            .iter()
            .filter(|scene| window.contains(scene.acquired))
            .collect();

        let first = match selected.first() {
            Some(first) => *first,
            None => {
                return Err(SarError::EmptyWindow {
                    window: window.to_string(),
                })
            }
        };

        let dim = first.dim().ok_or_else(|| {
            SarError::Processing(format!("Scene {} carries no bands", first.id))
        })?;

        for scene in &selected {
            if scene.bands.len() != first.bands.len() {
                return Err(SarError::Processing(format!(
                    "Scene {} has {} bands, expected {}",
                    scene.id,
                    scene.bands.len(),
                    first.bands.len()
                )));
            }
        }

        log::debug!("Reducing {} scene(s) for window {}", selected.len(), window);

        let mut bands = BandStack::new();
        for band in first.bands.iter() {
            let stack = selected
                .iter()
                .map(|scene| {
                    let data = scene.bands.get(&band.name).ok_or_else(|| SarError::MissingBand {
                        scene_id: scene.id.clone(),
                        band: band.name.clone(),
                    })?;
                    if data.dim() != dim {
                        return Err(SarError::Processing(format!(
                            "Scene {} band {} grid {:?} does not match {:?}",
                            scene.id,
                            band.name,
                            data.dim(),
                            dim
                        )));
                    }
                    Ok(data)
                })
                .collect::<SarResult<Vec<&SarRealImage>>>()?;

            bands.insert(band.name.clone(), median_stack(&stack, dim));
        }

        let mut scene_ids: Vec<String> = selected.iter().map(|s| s.id.clone()).collect();
        scene_ids.sort();

        Ok(Composite {
            window: *window,
            bands,
            scene_ids,
        })
    }
}

/// Pixel-wise median across co-registered rasters
pub fn median_stack(stack: &[&SarRealImage], dim: (usize, usize)) -> SarRealImage {
    let mut samples = Vec::with_capacity(stack.len());
    Array2::from_shape_fn(dim, |(row, col)| {
        samples.clear();
        samples.extend(
            stack
                .iter()
                .map(|image| image[[row, col]])
                .filter(|value| is_valid(*value)),
        );
        median(&mut samples).unwrap_or(NO_DATA)
    })
}

/// Median of finite values; the mean of the two middle values for even counts
///
/// Sorts in place. Negative zero orders before positive zero so the result
/// does not depend on input order.
pub fn median<T: Float>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }

    values.sort_unstable_by(|a, b| {
        a.partial_cmp(b)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.is_sign_negative().cmp(&a.is_sign_negative()))
    });

    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        let two = T::one() + T::one();
        Some((values[mid - 1] + values[mid]) / two)
    }
}
