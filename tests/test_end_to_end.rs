mod common;

use approx::assert_relative_eq;
use common::{at, config, db, init_logging, scene};
use sarcomp::core::Granularity;
use sarcomp::io::{MemoryCatalog, MemorySink};
use sarcomp::SarCompositePipeline;
use std::sync::Arc;

fn annual_scenes() -> Vec<sarcomp::Scene> {
    vec![
        // 2020: VV varies, VH constant at -20 dB
        scene("S1A_2020_01", at(2020, 1, 9, 22, 51, 3), 0.1, 0.01),
        scene("S1A_2020_04", at(2020, 4, 14, 22, 51, 6), 0.01, 0.01),
        scene("S1B_2020_08", at(2020, 8, 20, 22, 50, 40), 1.0, 0.01),
        scene("S1A_2020_11", at(2020, 11, 2, 22, 51, 9), 0.001, 0.01),
        // 2021: identical acquisitions
        scene("S1A_2021_02", at(2021, 2, 3, 22, 51, 2), 0.2, 0.05),
        scene("S1A_2021_05", at(2021, 5, 10, 22, 51, 4), 0.2, 0.05),
        scene("S1B_2021_09", at(2021, 9, 15, 22, 50, 38), 0.2, 0.05),
        scene("S1A_2021_12", at(2021, 12, 31, 22, 51, 7), 0.2, 0.05),
    ]
}

#[tokio::test]
async fn test_annual_composites_match_hand_computation() {
    init_logging();

    let mut config = config(2020, 2021);
    config.granularities = vec![Granularity::Annual];
    let catalog = Arc::new(MemoryCatalog::new(annual_scenes()));
    let sink = Arc::new(MemorySink::new());

    let summary = SarCompositePipeline::new(config)
        .expect("Failed to create pipeline")
        .run(catalog, Arc::clone(&sink))
        .await
        .expect("Pipeline run failed");

    assert_eq!(summary.scenes_fetched, 8);
    assert_eq!(summary.scenes_processed, 8);
    assert!(summary.dropped_scenes.is_empty());
    // VV = 1.0 is 0 dB, so VH_db / VV_db is singular on that scene
    assert_eq!(summary.singular_pixels, 6);
    assert_eq!(summary.exports.submitted(), 2);
    assert!(summary.exports.failed.is_empty());

    let accepted = sink.accepted();
    assert_eq!(accepted.len(), 2);
    assert_eq!(accepted[0].folder, "Chesapeake_Bay_SAR");
    assert_eq!(accepted[0].file_name_prefix, "Chesapeake_Bay_SAR_2020");
    assert_eq!(accepted[1].file_name_prefix, "Chesapeake_Bay_SAR_2021");

    // 2020: dB values VV {-10, -20, 0, -30}, VH -20
    let c2020 = &accepted[0].composite;
    assert_eq!(c2020.scene_count(), 4);
    let names: Vec<&str> = c2020.bands.names().collect();
    assert_eq!(names, vec!["VV", "VH", "VV_db", "VH_db", "VV_VH_ratio", "VH_VV_ratio", "ND"]);

    let band = |name: &str| c2020.bands.get(name).expect("band present")[[1, 2]];
    assert_relative_eq!(band("VV"), 0.055, epsilon = 1e-6);
    assert_relative_eq!(band("VV_db"), -15.0, epsilon = 1e-4);
    assert_relative_eq!(band("VH_db"), -20.0, epsilon = 1e-4);
    // ratios {0.5, 1.0, 0.0, 1.5}
    assert_relative_eq!(band("VV_VH_ratio"), 0.75, epsilon = 1e-5);
    // {2.0, 1.0, no-data, 0.667}
    assert_relative_eq!(band("VH_VV_ratio"), 1.0, epsilon = 1e-5);
    // {-1/3, 0, -1, 0.2}
    assert_relative_eq!(band("ND"), -1.0 / 6.0, epsilon = 1e-5);

    // 2021: median of identical scenes is the scene value
    let c2021 = &accepted[1].composite;
    assert_eq!(c2021.scene_count(), 4);
    let vv_db = db(0.2);
    let vh_db = db(0.05);
    let value = |name: &str| c2021.bands.get(name).expect("band present")[[0, 0]];
    assert_relative_eq!(value("VV_db"), vv_db, epsilon = 1e-5);
    assert_relative_eq!(value("VH_db"), vh_db, epsilon = 1e-5);
    assert_relative_eq!(value("VV_VH_ratio"), vv_db / vh_db, epsilon = 1e-5);
    assert_relative_eq!(value("VH_VV_ratio"), vh_db / vv_db, epsilon = 1e-5);
    assert_relative_eq!(value("ND"), (vv_db - vh_db) / (vv_db + vh_db), epsilon = 1e-5);

    let props = c2021.properties();
    assert_eq!(props["year"], "2021");
    assert!(!props.contains_key("month"));
    assert_eq!(props["system:time_start"], "1609459200000");
}

#[tokio::test]
async fn test_rerun_is_bit_identical() {
    init_logging();

    let run = || async {
        let sink = Arc::new(MemorySink::new());
        SarCompositePipeline::new(config(2020, 2021))
            .expect("Failed to create pipeline")
            .run(Arc::new(MemoryCatalog::new(annual_scenes())), Arc::clone(&sink))
            .await
            .expect("Pipeline run failed");
        sink.accepted()
    };

    let first = run().await;
    let second = run().await;
    assert_eq!(first.len(), second.len());

    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.file_name_prefix, b.file_name_prefix);
        for (band_a, band_b) in a.composite.bands.iter().zip(b.composite.bands.iter()) {
            assert_eq!(band_a.name, band_b.name);
            assert!(band_a
                .data
                .iter()
                .zip(band_b.data.iter())
                .all(|(x, y)| x.to_bits() == y.to_bits()));
        }
    }
}

#[tokio::test]
async fn test_config_file_drives_run() {
    init_logging();

    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let path = dir.path().join("run.json");
    std::fs::write(
        &path,
        r#"{
            "region": { "vertices": [[-77.5, 36.5], [-75.0, 36.5], [-75.0, 39.8], [-77.5, 39.8]] },
            "start_year": 2021,
            "end_year": 2021,
            "end_date": "2021-06-30",
            "granularities": ["summer", "summer"],
            "export": { "output_prefix": "Chesapeake_Bay" }
        }"#,
    )
    .expect("Failed to write config");

    let config = sarcomp::PipelineConfig::from_json_file(&path).expect("Failed to load config");
    assert_eq!(config.granularities, vec![Granularity::Summer]);

    let sink = Arc::new(MemorySink::new());
    let summary = SarCompositePipeline::new(config)
        .expect("Failed to create pipeline")
        .run(Arc::new(MemoryCatalog::new(annual_scenes())), Arc::clone(&sink))
        .await
        .expect("Pipeline run failed");

    // clipped at June 30: only the June window exists and it is empty
    assert_eq!(summary.scenes_fetched, 2);
    assert_eq!(summary.exports.submitted(), 0);
    assert_eq!(summary.exports.skipped, vec!["Chesapeake_Bay_Summer_SAR_2021_6".to_string()]);

    let report_path = dir.path().join("summary.json");
    summary.write_json(&report_path).expect("Failed to write summary");
    assert!(report_path.exists());
}
