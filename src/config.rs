//! Immutable run configuration for the compositing pipeline

use crate::core::windower::Granularity;
use crate::types::{AcquisitionMode, Polarization, Region, SarError, SarResult};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dual-polarization channel pair feeding the band transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolarizationPair {
    /// First channel (A), co-polarized for Sentinel-1 dual-pol products
    pub co: Polarization,
    /// Second channel (B), cross-polarized
    pub cross: Polarization,
}

impl Default for PolarizationPair {
    fn default() -> Self {
        Self {
            co: Polarization::VV,
            cross: Polarization::VH,
        }
    }
}

/// Export product parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Output pixel scale in meters
    pub scale: f64,
    /// Output coordinate reference system
    pub crs: String,
    /// Upper bound on width * height * bands per export
    pub max_pixels: f64,
    /// Prefix for folder and file names
    pub output_prefix: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            scale: 10.0,
            crs: "EPSG:4326".to_string(),
            max_pixels: 1e13,
            output_prefix: "Region".to_string(),
        }
    }
}

impl ExportSettings {
    /// EPSG code parsed from `crs`, if it has the `EPSG:<code>` form
    pub fn epsg_code(&self) -> Option<u32> {
        parse_epsg(&self.crs)
    }
}

/// Parse an `EPSG:<code>` projection string
pub fn parse_epsg(crs: &str) -> Option<u32> {
    crs.strip_prefix("EPSG:")
        .and_then(|code| code.trim().parse().ok())
}

/// Catalog acquisition limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Maximum concurrent catalog sub-queries
    pub max_in_flight: usize,
    /// Per sub-query timeout
    pub timeout_secs: Option<u64>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            timeout_secs: None,
        }
    }
}

/// Complete pipeline configuration, validated once and passed by reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub region: Region,
    pub start_year: i32,
    pub end_year: i32,
    /// Inclusive clip date; defaults to Dec 31 of `end_year`
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_granularities")]
    pub granularities: Vec<Granularity>,
    #[serde(default)]
    pub polarizations: PolarizationPair,
    #[serde(default = "default_instrument_mode")]
    pub instrument_mode: Option<AcquisitionMode>,
    #[serde(default)]
    pub export: ExportSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
}

fn default_granularities() -> Vec<Granularity> {
    vec![Granularity::Annual, Granularity::Monthly, Granularity::Summer]
}

fn default_instrument_mode() -> Option<AcquisitionMode> {
    Some(AcquisitionMode::IW)
}

impl PipelineConfig {
    /// Configuration with default granularities, polarizations and export settings
    pub fn new(region: Region, start_year: i32, end_year: i32) -> Self {
        Self {
            region,
            start_year,
            end_year,
            end_date: None,
            granularities: default_granularities(),
            polarizations: PolarizationPair::default(),
            instrument_mode: default_instrument_mode(),
            export: ExportSettings::default(),
            fetch: FetchSettings::default(),
        }
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        log::info!("Loading pipeline configuration: {}", path.as_ref().display());
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> SarResult<Self> {
        let mut config: PipelineConfig = serde_json::from_str(contents)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Collapse duplicate granularities, keeping first occurrence order
    pub fn normalize(&mut self) {
        let mut seen = Vec::with_capacity(self.granularities.len());
        self.granularities.retain(|g| {
            if seen.contains(g) {
                false
            } else {
                seen.push(*g);
                true
            }
        });
    }

    pub fn validate(&self) -> SarResult<()> {
        self.region.validate()?;

        if self.start_year > self.end_year {
            return Err(SarError::Config(format!(
                "start year {} is after end year {}",
                self.start_year, self.end_year
            )));
        }

        self.start_date()?;
        let last_day = year_end(self.end_year)?;
        if last_day.succ_opt().is_none() {
            return Err(SarError::Config(format!(
                "end year {} is past the last representable date",
                self.end_year
            )));
        }
        if let Some(end_date) = self.end_date {
            if end_date.year() != self.end_year {
                return Err(SarError::Config(format!(
                    "end date {} must fall in end year {}",
                    end_date, self.end_year
                )));
            }
        }

        if self.granularities.is_empty() {
            return Err(SarError::Config("no granularities requested".to_string()));
        }

        if self.polarizations.co == self.polarizations.cross {
            return Err(SarError::Config(format!(
                "polarization channels must differ, both are {}",
                self.polarizations.co
            )));
        }

        if !(self.export.scale.is_finite() && self.export.scale > 0.0) {
            return Err(SarError::Config(format!(
                "output scale must be positive, got {}",
                self.export.scale
            )));
        }
        if self.export.crs.trim().is_empty() {
            return Err(SarError::Config("output projection is empty".to_string()));
        }
        if self.export.max_pixels.is_nan() || self.export.max_pixels <= 0.0 {
            return Err(SarError::Config("max_pixels must be positive".to_string()));
        }
        if self.export.output_prefix.trim().is_empty() {
            return Err(SarError::Config("output prefix is empty".to_string()));
        }
        if self.fetch.max_in_flight == 0 {
            return Err(SarError::Config("max_in_flight must be at least 1".to_string()));
        }

        Ok(())
    }

    pub fn start_date(&self) -> SarResult<NaiveDate> {
        NaiveDate::from_ymd_opt(self.start_year, 1, 1)
            .ok_or_else(|| SarError::Config(format!("invalid start year {}", self.start_year)))
    }

    /// Last day (inclusive) covered by the run
    pub fn effective_end_date(&self) -> SarResult<NaiveDate> {
        match self.end_date {
            Some(date) => Ok(date),
            None => year_end(self.end_year),
        }
    }

    /// True if the clip date truncates the final year
    pub fn is_clipped(&self) -> bool {
        self.end_date
            .map(|d| d.month() != 12 || d.day() != 31)
            .unwrap_or(false)
    }
}

fn year_end(year: i32) -> SarResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 12, 31)
        .ok_or_else(|| SarError::Config(format!("invalid end year {}", year)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region::rectangle(-77.5, 36.5, -75.0, 39.8)
    }

    #[test]
    fn test_defaults_follow_sentinel1_products() {
        let config = PipelineConfig::new(region(), 2014, 2024);
        assert!(config.validate().is_ok());
        assert_eq!(config.export.scale, 10.0);
        assert_eq!(config.export.crs, "EPSG:4326");
        assert_eq!(config.export.epsg_code(), Some(4326));
        assert_eq!(config.polarizations.co, Polarization::VV);
        assert_eq!(config.instrument_mode, Some(AcquisitionMode::IW));
        assert_eq!(config.granularities.len(), 3);
        assert_eq!(
            config.effective_end_date().unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
        );
    }

    #[test]
    fn test_startup_errors_are_fatal() {
        let mut config = PipelineConfig::new(region(), 2022, 2020);
        assert!(matches!(config.validate(), Err(SarError::Config(_))));

        config = PipelineConfig::new(region(), 2020, 2022);
        config.granularities.clear();
        assert!(config.validate().is_err());

        config = PipelineConfig::new(Region::new(vec![(0.0, 0.0)]), 2020, 2022);
        assert!(config.validate().is_err());

        config = PipelineConfig::new(region(), 2020, 2022);
        config.end_date = NaiveDate::from_ymd_opt(2023, 3, 1);
        assert!(config.validate().is_err());

        config = PipelineConfig::new(region(), 2020, 2022);
        config.polarizations.cross = Polarization::VV;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_end_date_must_fall_in_end_year() {
        let mut config = PipelineConfig::new(region(), 2020, 2022);
        config.end_date = NaiveDate::from_ymd_opt(2020, 6, 15);
        match config.validate() {
            Err(SarError::Config(msg)) => assert!(msg.contains("end year 2022")),
            other => panic!("expected Config error, got {:?}", other),
        }

        config.end_date = NaiveDate::from_ymd_opt(2022, 1, 1);
        assert!(config.validate().is_ok());
        config.end_date = NaiveDate::from_ymd_opt(2022, 12, 31);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_last_representable_year_is_rejected() {
        let config = PipelineConfig::new(region(), 262142, 262142);
        assert!(matches!(config.validate(), Err(SarError::Config(_))));
    }

    #[test]
    fn test_json_parsing_with_defaults() {
        let json = r#"{
            "region": { "vertices": [[-77.5, 36.5], [-75.0, 36.5], [-75.0, 39.8], [-77.5, 39.8]] },
            "start_year": 2020,
            "end_year": 2021,
            "end_date": "2021-06-15",
            "granularities": ["monthly", "annual", "monthly"],
            "export": { "output_prefix": "Chesapeake_Bay" }
        }"#;

        let config = PipelineConfig::from_json_str(json).unwrap();
        assert_eq!(config.granularities, vec![Granularity::Monthly, Granularity::Annual]);
        assert_eq!(config.export.output_prefix, "Chesapeake_Bay");
        assert_eq!(config.export.scale, 10.0);
        assert_eq!(config.fetch.max_in_flight, 4);
        assert!(config.is_clipped());
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let config = PipelineConfig::new(region(), 2019, 2020);
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
