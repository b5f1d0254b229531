use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued backscatter or derived index sample
pub type SarReal = f32;

/// 2D real raster band (rows x cols), co-registered to the region grid
pub type SarRealImage = Array2<SarReal>;

/// Per-pixel no-data sentinel
pub const NO_DATA: SarReal = SarReal::NAN;

/// Returns true if the sample carries a usable value
#[inline]
pub fn is_valid(value: SarReal) -> bool {
    value.is_finite()
}

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl std::str::FromStr for Polarization {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(SarError::Config(format!("Invalid polarization: {}", s))),
        }
    }
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// True if the two boxes share any area or edge
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }
}

/// Region of interest as a polygon of (lon, lat) vertices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub vertices: Vec<(f64, f64)>,
}

impl Region {
    pub fn new(vertices: Vec<(f64, f64)>) -> Self {
        Self { vertices }
    }

    /// Axis-aligned rectangle, vertices listed counter-clockwise from the south-west corner
    pub fn rectangle(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self::new(vec![
            (min_lon, min_lat),
            (max_lon, min_lat),
            (max_lon, max_lat),
            (min_lon, max_lat),
        ])
    }

    /// Check the polygon is usable as a query/export boundary
    pub fn validate(&self) -> SarResult<()> {
        if self.vertices.len() < 3 {
            return Err(SarError::Config(format!(
                "Region needs at least 3 vertices, got {}",
                self.vertices.len()
            )));
        }

        for &(lon, lat) in &self.vertices {
            if !lon.is_finite() || !lat.is_finite() {
                return Err(SarError::Config("Region vertex is not finite".to_string()));
            }
            if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
                return Err(SarError::Config(format!(
                    "Region vertex ({}, {}) is outside lon/lat range",
                    lon, lat
                )));
            }
        }

        let bbox = self.bounding_box();
        if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            return Err(SarError::Config("Region has zero area".to_string()));
        }

        Ok(())
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for &(lon, lat) in &self.vertices {
            bbox.min_lon = bbox.min_lon.min(lon);
            bbox.max_lon = bbox.max_lon.max(lon);
            bbox.min_lat = bbox.min_lat.min(lat);
            bbox.max_lat = bbox.max_lat.max(lat);
        }
        bbox
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform stretching a (rows, cols) grid over a bounding box
    pub fn from_bounds(bbox: &BoundingBox, dims: (usize, usize)) -> Self {
        let (rows, cols) = dims;
        Self {
            top_left_x: bbox.min_lon,
            pixel_width: bbox.width() / cols.max(1) as f64,
            rotation_x: 0.0,
            top_left_y: bbox.max_lat,
            rotation_y: 0.0,
            pixel_height: -bbox.height() / rows.max(1) as f64,
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Named raster band
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub name: String,
    pub data: SarRealImage,
}

/// Ordered set of co-registered bands; insertion order is export order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandStack {
    bands: Vec<Band>,
}

impl BandStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a band, replacing any existing band of the same name in place
    pub fn insert(&mut self, name: impl Into<String>, data: SarRealImage) {
        let name = name.into();
        match self.bands.iter_mut().find(|b| b.name == name) {
            Some(existing) => existing.data = data,
            None => self.bands.push(Band { name, data }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SarRealImage> {
        self.bands.iter().find(|b| b.name == name).map(|b| &b.data)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Keep only the bands that pass `keep`, preserving order
    pub fn retain<F: FnMut(&Band) -> bool>(&mut self, keep: F) {
        self.bands.retain(keep);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bands.iter().map(|b| b.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Band> {
        self.bands.iter()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Grid dimensions (rows, cols) of the first band
    pub fn dim(&self) -> Option<(usize, usize)> {
        self.bands.first().map(|b| b.data.dim())
    }
}

impl FromIterator<(String, SarRealImage)> for BandStack {
    fn from_iter<I: IntoIterator<Item = (String, SarRealImage)>>(iter: I) -> Self {
        let mut stack = BandStack::new();
        for (name, data) in iter {
            stack.insert(name, data);
        }
        stack
    }
}

/// One raw acquisition over the region as returned by the catalog
#[derive(Debug, Clone)]
pub struct Scene {
    pub id: String,
    pub acquired: DateTime<Utc>,
    pub instrument_mode: AcquisitionMode,
    /// Polarizations advertised by the catalog metadata
    pub polarizations: Vec<Polarization>,
    pub footprint: BoundingBox,
    pub bands: BandStack,
}

/// Error types for SAR compositing
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scene {scene_id} is missing required band {band}")]
    MissingBand { scene_id: String, band: String },

    #[error("No scenes fall inside window {window}")]
    EmptyWindow { window: String },

    #[error("Export {identifier} rejected: {reason}")]
    ExportSubmission { identifier: String, reason: String },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "geotiff")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for SAR compositing operations
pub type SarResult<T> = Result<T, SarError>;
