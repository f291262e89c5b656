// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Processor core end-to-end with the synthetic engine: start order,
//! pause atomicity against a live frame stream, the restart-aware join
//! loop, metrics, and shutdown cleanup.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use nvr_processor::bus::{MessageBus, QosLevel};
use nvr_processor::events::schema::{AckStatus, LifecycleStatus};

mod common;
use common::{acks_on, send_command, start_synthetic_core, statuses_on, wait_until};

const WAIT: Duration = Duration::from_secs(3);

fn live_config(instance: &str, fps: f64) -> nvr_processor::config::ProcessorConfig {
    let mut config = common::test_config(instance, &["rtsp://h/0"], &[0]);
    config.model_id = "m1".into();
    config.max_fps = Some(fps);
    config
}

#[tokio::test]
async fn startup_announces_connected_then_starting() {
    let t = start_synthetic_core(live_config("P", 10.0)).await;

    let statuses = statuses_on(&t.control, "P");
    assert!(statuses.len() >= 2);
    assert_eq!(statuses[0].status, LifecycleStatus::Connected);
    assert_eq!(statuses[1].status, LifecycleStatus::Starting);
    // The announcement carries the public config view for discovery.
    assert_eq!(statuses[1].extra["config"]["instance_id"], "P");
    assert_eq!(statuses[1].extra["uptime_seconds"], 0);

    // Detections flow once the engine runs.
    assert!(
        wait_until(WAIT, || !t.data.published_on("nvr/detections/0").is_empty()).await
    );
    t.core.terminate();
}

#[tokio::test]
async fn pause_silences_the_wire_atomically() {
    let t = start_synthetic_core(live_config("P", 100.0)).await;
    let manager = t.core.manager().unwrap();

    // Let the synthetic engine publish for a while.
    assert!(
        wait_until(WAIT, || t.data.published_on("nvr/detections/0").len() >= 5).await
    );

    manager.pause().expect("pause");
    let paused_at = Instant::now();

    // Allow in-flight callbacks to land, then observe silence.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_settle = t.data.published_on("nvr/detections/0");
    let last_publish = after_settle.last().expect("had publishes").at;
    assert!(
        last_publish <= paused_at + Duration::from_millis(20),
        "no publish may follow the pause return"
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        t.data.published_on("nvr/detections/0").len(),
        after_settle.len(),
        "silence holds while paused"
    );

    manager.resume().expect("resume");
    let count_at_resume = t.data.published_on("nvr/detections/0").len();
    assert!(
        wait_until(WAIT, || {
            t.data.published_on("nvr/detections/0").len() > count_at_resume
        })
        .await,
        "publishes reappear after resume"
    );
    t.core.terminate();
}

#[tokio::test]
async fn restart_keeps_the_join_loop_alive() {
    let t = start_synthetic_core(live_config("P", 20.0)).await;
    let manager = t.core.manager().unwrap();
    let engine_before = manager.current_engine().unwrap();

    let join_core = t.core.clone();
    let join_task = tokio::spawn(async move { join_core.join().await });

    send_command(&t.control, json!({"command": "restart", "target_instances": ["P"]}));
    assert!(
        wait_until(WAIT, || {
            acks_on(&t.control, "P")
                .iter()
                .any(|a| a.ack_status == AckStatus::Completed)
        })
        .await
    );

    // The loop survived the restart: no shutdown cleanup happened.
    assert!(!join_task.is_finished(), "join loop still waiting on the new engine");
    assert!(!statuses_on(&t.control, "P")
        .iter()
        .any(|s| s.status == LifecycleStatus::Disconnected));

    // And it now waits on a different engine.
    let engine_after = manager.current_engine().unwrap();
    assert!(!Arc::ptr_eq(&engine_before, &engine_after));
    assert!(manager.is_running());

    // A stop command ends the loop for real.
    send_command(&t.control, json!({"command": "stop", "target_instances": ["P"]}));
    assert!(
        wait_until(WAIT, || join_task.is_finished()).await,
        "join loop exits on stop"
    );
    assert!(statuses_on(&t.control, "P")
        .iter()
        .any(|s| s.status == LifecycleStatus::Stopped));
    assert!(
        statuses_on(&t.control, "P")
            .last()
            .map(|s| s.status == LifecycleStatus::Disconnected)
            .unwrap_or(false),
        "cleanup publishes a final disconnected status"
    );
    assert!(!t.data.is_connected(), "data bus disconnected during cleanup");
}

#[tokio::test]
async fn terminate_unwinds_the_join_loop() {
    let t = start_synthetic_core(live_config("P", 10.0)).await;

    let join_core = t.core.clone();
    let join_task = tokio::spawn(async move { join_core.join().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!join_task.is_finished());

    t.core.terminate();
    assert!(wait_until(WAIT, || join_task.is_finished()).await);
}

#[tokio::test]
async fn periodic_metrics_are_retained_when_throughput_is_nonzero() {
    let mut config = live_config("P", 50.0);
    config.mqtt.metrics_interval_s = 1;
    let t = start_synthetic_core(config).await;

    assert!(
        wait_until(Duration::from_secs(4), || {
            !t.data.published_on("nvr/metrics/P").is_empty()
        })
        .await,
        "lightweight metrics published within the interval"
    );

    let reports = t.data.published_on("nvr/metrics/P");
    let report = reports.last().unwrap();
    assert!(report.retain);
    assert_eq!(report.qos, QosLevel::AtMostOnce);
    let payload = report.json();
    assert_eq!(payload["instance_id"], "P");
    assert!(payload["inference_throughput"].as_f64().unwrap() > 0.0);
    assert_eq!(payload["sources"].as_array().unwrap().len(), 1);
    t.core.terminate();
}

#[tokio::test]
async fn metrics_command_publishes_full_report() {
    let t = start_synthetic_core(live_config("P", 50.0)).await;

    // Give the probe a few frames first.
    assert!(
        wait_until(WAIT, || !t.data.published_on("nvr/detections/0").is_empty()).await
    );

    send_command(&t.control, json!({"command": "metrics", "target_instances": ["P"]}));
    assert!(
        wait_until(WAIT, || {
            !t.control.published_on("nvr/status/metrics/P").is_empty()
        })
        .await
    );

    let reports = t.control.published_on("nvr/status/metrics/P");
    let report = reports.last().unwrap();
    assert!(!report.retain);
    assert_eq!(report.qos, QosLevel::AtMostOnce);
    let payload = report.json();
    assert_eq!(payload["instance_id"], "P");
    assert!(payload["latency_reports"].as_array().unwrap().len() == 1);
    assert!(payload["sources_metadata"][0]["resolution"].is_string());
    t.core.terminate();
}
