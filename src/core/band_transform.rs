use crate::config::PolarizationPair;
use crate::types::{is_valid, BandStack, SarError, SarReal, SarRealImage, SarResult, Scene, NO_DATA};
use chrono::{DateTime, Utc};
use ndarray::Zip;

/// Names of the five bands appended to every transformed scene
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedBandNames {
    pub co_db: String,
    pub cross_db: String,
    pub ratio: String,
    pub inverse_ratio: String,
    pub normalized_difference: String,
}

impl DerivedBandNames {
    pub fn for_pair(pair: &PolarizationPair) -> Self {
        let (a, b) = (pair.co, pair.cross);
        Self {
            co_db: format!("{}_db", a),
            cross_db: format!("{}_db", b),
            ratio: format!("{}_{}_ratio", a, b),
            inverse_ratio: format!("{}_{}_ratio", b, a),
            normalized_difference: "ND".to_string(),
        }
    }

    /// Derived band names in output order
    pub fn all(&self) -> [&str; 5] {
        [
            self.co_db.as_str(),
            self.cross_db.as_str(),
            self.ratio.as_str(),
            self.inverse_ratio.as_str(),
            self.normalized_difference.as_str(),
        ]
    }
}

/// Count of pixels set to no-data in one derived band
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingularValue {
    pub band: String,
    pub pixels: usize,
}

/// Scene with raw channels plus derived dB, ratio and normalized-difference bands
#[derive(Debug, Clone)]
pub struct DerivedScene {
    pub id: String,
    pub acquired: DateTime<Utc>,
    pub bands: BandStack,
    /// Derived bands that contain no-data pixels
    pub singular: Vec<SingularValue>,
}

impl DerivedScene {
    pub fn singular_pixels(&self) -> usize {
        self.singular.iter().map(|s| s.pixels).sum()
    }

    pub fn dim(&self) -> Option<(usize, usize)> {
        self.bands.dim()
    }
}

/// Dual-polarization band transform
///
/// Converts the two linear backscatter channels to decibels and derives the
/// ratio, inverse ratio and normalized difference from the decibel values.
/// Singular pixels become [`NO_DATA`] instead of failing the scene.
#[derive(Debug, Clone)]
pub struct BandTransform {
    pair: PolarizationPair,
    names: DerivedBandNames,
}

impl BandTransform {
    pub fn new(pair: PolarizationPair) -> Self {
        Self {
            names: DerivedBandNames::for_pair(&pair),
            pair,
        }
    }

    pub fn band_names(&self) -> &DerivedBandNames {
        &self.names
    }

    /// Transform one raw scene
    ///
    /// # Errors
    /// `MissingBand` if either channel is absent, `Processing` if the two
    /// channels are not on the same grid.
    pub fn apply(&self, scene: &Scene) -> SarResult<DerivedScene> {
        let co_name = self.pair.co.to_string();
        let cross_name = self.pair.cross.to_string();

        let co = scene.bands.get(&co_name).ok_or_else(|| SarError::MissingBand {
            scene_id: scene.id.clone(),
            band: co_name.clone(),
        })?;
        let cross = scene.bands.get(&cross_name).ok_or_else(|| SarError::MissingBand {
            scene_id: scene.id.clone(),
            band: cross_name.clone(),
        })?;

        if co.dim() != cross.dim() {
            return Err(SarError::Processing(format!(
                "Scene {}: {} grid {:?} does not match {} grid {:?}",
                scene.id,
                co_name,
                co.dim(),
                cross_name,
                cross.dim()
            )));
        }

        let co_db = Self::to_db(co);
        let cross_db = Self::to_db(cross);
        let ratio = Zip::from(&co_db).and(&cross_db).map_collect(|&a, &b| safe_divide(a, b));
        let inverse_ratio = Zip::from(&cross_db).and(&co_db).map_collect(|&b, &a| safe_divide(b, a));
        let normalized_difference = Zip::from(&co_db)
            .and(&cross_db)
            .map_collect(|&a, &b| normalized_difference(a, b));

        let mut bands = BandStack::new();
        bands.insert(co_name.clone(), co.clone());
        bands.insert(cross_name.clone(), cross.clone());
        for band in scene.bands.iter() {
            if band.name != co_name && band.name != cross_name {
                bands.insert(band.name.clone(), band.data.clone());
            }
        }

        let mut singular = Vec::new();
        for (name, data) in [
            (&self.names.co_db, co_db),
            (&self.names.cross_db, cross_db),
            (&self.names.ratio, ratio),
            (&self.names.inverse_ratio, inverse_ratio),
            (&self.names.normalized_difference, normalized_difference),
        ] {
            let pixels = data.iter().filter(|v| !is_valid(**v)).count();
            if pixels > 0 {
                singular.push(SingularValue {
                    band: name.clone(),
                    pixels,
                });
            }
            bands.insert(name.clone(), data);
        }

        if !singular.is_empty() {
            log::debug!(
                "Scene {}: {} no-data pixel(s) across derived bands",
                scene.id,
                singular.iter().map(|s| s.pixels).sum::<usize>()
            );
        }

        Ok(DerivedScene {
            id: scene.id.clone(),
            acquired: scene.acquired,
            bands,
            singular,
        })
    }

    /// Convert linear intensity to dB (10 * log10), non-positive input becomes no-data
    pub fn to_db(linear: &SarRealImage) -> SarRealImage {
        linear.mapv(linear_to_db)
    }
}

#[inline]
fn linear_to_db(value: SarReal) -> SarReal {
    if is_valid(value) && value > 0.0 {
        10.0 * value.log10()
    } else {
        NO_DATA
    }
}

#[inline]
fn safe_divide(numerator: SarReal, denominator: SarReal) -> SarReal {
    if !is_valid(numerator) || !is_valid(denominator) || denominator == 0.0 {
        return NO_DATA;
    }
    let quotient = numerator / denominator;
    if is_valid(quotient) {
        quotient
    } else {
        NO_DATA
    }
}

#[inline]
fn normalized_difference(a: SarReal, b: SarReal) -> SarReal {
    safe_divide(a - b, a + b)
}
