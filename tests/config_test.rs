// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Configuration invariants: validation, stream mutations, public view,
//! TOML loading, and validity under random command sequences.

use proptest::prelude::*;

use nvr_processor::config::ProcessorConfig;

mod common;

fn base_config() -> ProcessorConfig {
    common::test_config(
        "proc-test",
        &["rtsp://host:8554/0", "rtsp://host:8554/1"],
        &[0, 1],
    )
}

#[test]
fn rejects_empty_stream_list() {
    assert!(ProcessorConfig::new(vec![]).is_err());
}

#[test]
fn rejects_malformed_uri() {
    assert!(ProcessorConfig::new(vec!["not-a-uri".into()]).is_err());
    assert!(ProcessorConfig::new(vec!["://missing-scheme".into()]).is_err());
    // Absolute paths are accepted (file sources).
    assert!(ProcessorConfig::new(vec!["/var/media/cam0.ts".into()]).is_ok());
}

#[test]
fn rejects_mapping_length_mismatch() {
    let mut config = base_config();
    config.source_id_mapping = vec![0];
    assert!(config.validate().is_err());
}

#[test]
fn rejects_duplicate_source_ids() {
    let mut config = base_config();
    config.source_id_mapping = vec![4, 4];
    assert!(config.validate().is_err());
}

#[test]
fn rejects_out_of_range_fields() {
    let mut config = base_config();
    config.mqtt.port = 0;
    assert!(config.validate().is_err());

    let mut config = base_config();
    config.max_fps = Some(0.0);
    assert!(config.validate().is_err());

    let mut config = base_config();
    config.confidence_threshold = 1.5;
    assert!(config.validate().is_err());
}

#[test]
fn add_stream_synthesises_uri_and_rejects_duplicates() {
    let mut config = base_config();
    config.stream_server = "rtsp://server:8554".into();
    config.add_stream(7).expect("add new stream");
    assert_eq!(config.stream_uris.last().unwrap(), "rtsp://server:8554/7");
    assert_eq!(config.source_id_mapping, vec![0, 1, 7]);

    // Already monitored.
    assert!(config.add_stream(7).is_err());
    assert_eq!(config.source_id_mapping, vec![0, 1, 7]);
}

#[test]
fn remove_stream_rejects_unknown_and_last() {
    let mut config = base_config();
    assert!(config.remove_stream(9).is_err());

    config.remove_stream(0).expect("remove first stream");
    assert_eq!(config.stream_uris, vec!["rtsp://host:8554/1".to_string()]);
    assert_eq!(config.source_id_mapping, vec![1]);

    // Refuses to leave zero streams; both lists unchanged.
    assert!(config.remove_stream(1).is_err());
    assert_eq!(config.stream_uris, vec!["rtsp://host:8554/1".to_string()]);
    assert_eq!(config.source_id_mapping, vec![1]);
}

#[test]
fn add_then_remove_is_identity() {
    let mut config = base_config();
    let uris_before = config.stream_uris.clone();
    let mapping_before = config.source_id_mapping.clone();

    config.add_stream(5).unwrap();
    config.remove_stream(5).unwrap();

    assert_eq!(config.stream_uris, uris_before);
    assert_eq!(config.source_id_mapping, mapping_before);
}

#[test]
fn public_view_strips_credentials() {
    let mut config = base_config();
    config.mqtt.username = Some("svc".into());
    config.mqtt.password = Some("hunter2".into());

    let view = config.public_view();
    let rendered = serde_json::to_string(&view).unwrap();
    assert!(!rendered.contains("svc"));
    assert!(!rendered.contains("hunter2"));
    assert_eq!(view["instance_id"], "proc-test");
    assert_eq!(view["mqtt"]["host"], "localhost");
    assert_eq!(view["mqtt"]["port"], 1883);
}

#[test]
fn loads_from_toml_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("processor.toml");
    std::fs::write(
        &path,
        r#"
stream_uris = ["rtsp://cam:8554/0", "rtsp://cam:8554/1", "rtsp://cam:8554/2"]

[mqtt]
host = "broker.local"
qos = 1

[control]
command_topic = "site/commands"
"#,
    )
    .unwrap();

    let config = ProcessorConfig::from_file(&path).expect("load config");
    // Identity mapping filled in when absent.
    assert_eq!(config.source_id_mapping, vec![0, 1, 2]);
    assert_eq!(config.mqtt.host, "broker.local");
    assert_eq!(u8::from(config.mqtt.qos), 1);
    assert_eq!(config.control.command_topic, "site/commands");
    assert_eq!(config.model_id, "yolov8x-640");
    assert_eq!(config.mqtt.metrics_interval_s, 30);
    assert!(config.instance_id.starts_with("proc-"));
}

#[test]
fn rejects_invalid_toml_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(
        &path,
        r#"
stream_uris = ["rtsp://cam:8554/0"]
max_fps = -2.0
"#,
    )
    .unwrap();
    assert!(ProcessorConfig::from_file(&path).is_err());
}

proptest! {
    /// No sequence of stream mutations can leave the config invalid, and
    /// a failed mutation leaves it untouched.
    #[test]
    fn stays_valid_under_random_stream_ops(
        ops in proptest::collection::vec((any::<bool>(), 0u32..12), 1..50)
    ) {
        let mut config = base_config();
        for (add, source_id) in ops {
            let uris_before = config.stream_uris.clone();
            let mapping_before = config.source_id_mapping.clone();
            let result = if add {
                config.add_stream(source_id)
            } else {
                config.remove_stream(source_id)
            };
            prop_assert!(config.validate().is_ok());
            if result.is_err() {
                prop_assert_eq!(&config.stream_uris, &uris_before);
                prop_assert_eq!(&config.source_id_mapping, &mapping_before);
            }
        }
    }
}
