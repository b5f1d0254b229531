#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use ndarray::Array2;
use sarcomp::types::{AcquisitionMode, BandStack, BoundingBox, Polarization, Region, Scene};
use sarcomp::PipelineConfig;

pub const GRID: (usize, usize) = (2, 3);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn chesapeake_bay() -> Region {
    Region::rectangle(-77.5, 36.5, -75.0, 39.8)
}

pub fn config(start_year: i32, end_year: i32) -> PipelineConfig {
    let mut config = PipelineConfig::new(chesapeake_bay(), start_year, end_year);
    config.export.output_prefix = "Chesapeake_Bay".to_string();
    config
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

/// Dual-pol IW scene with constant linear backscatter
pub fn scene(id: &str, acquired: DateTime<Utc>, vv: f32, vh: f32) -> Scene {
    let mut bands = BandStack::new();
    bands.insert("VV", Array2::from_elem(GRID, vv));
    bands.insert("VH", Array2::from_elem(GRID, vh));
    Scene {
        id: id.to_string(),
        acquired,
        instrument_mode: AcquisitionMode::IW,
        polarizations: vec![Polarization::VV, Polarization::VH],
        footprint: BoundingBox {
            min_lon: -77.2,
            max_lon: -75.4,
            min_lat: 36.9,
            max_lat: 39.5,
        },
        bands,
    }
}

pub fn db(linear: f32) -> f32 {
    10.0 * linear.log10()
}
