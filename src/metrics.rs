// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Periodic and on-demand metrics reporting.
//!
//! The worker wakes every `metrics_interval_s` seconds, samples the
//! current engine's probe through the manager (so restarts transparently
//! swap the probe), and publishes a lightweight report when there is
//! throughput to report. `full_report` serves the complete probe output
//! for the `metrics` command.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{MessageBus, QosLevel};
use crate::config::SharedConfig;
use crate::engine::ProbeReport;
use crate::events::protocol::metrics_topic;
use crate::manager::EngineManager;

/// Grace period for the worker to observe the stop signal.
const STOP_GRACE: Duration = Duration::from_secs(5);

pub struct MetricsReporter {
    manager: Arc<EngineManager>,
    bus: Arc<dyn MessageBus>,
    config: SharedConfig,
    stop_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsReporter {
    pub fn new(
        manager: Arc<EngineManager>,
        bus: Arc<dyn MessageBus>,
        config: SharedConfig,
    ) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(MetricsReporter {
            manager,
            bus,
            config,
            stop_tx,
            worker: Mutex::new(None),
        })
    }

    /// Start the periodic worker. A zero interval disables reporting.
    pub fn start(self: &Arc<Self>) {
        let interval_s = self.config.read().mqtt.metrics_interval_s;
        if interval_s == 0 {
            info!("Metrics reporting disabled (interval = 0)");
            return;
        }
        let reporter = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        let interval = Duration::from_secs(interval_s);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => reporter.tick(),
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Metrics worker exited");
        });
        *self.worker.lock() = Some(handle);
        info!(interval_s, "Metrics reporting started");
    }

    /// Signal the worker and wait for it, bounded by a small grace.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
                warn!("Metrics worker did not stop within grace period");
            } else {
                info!("Metrics reporting stopped");
            }
        }
    }

    fn tick(&self) {
        let Some(probe) = self.manager.metrics_probe() else {
            return;
        };
        let report = probe.report();
        // Nothing worth retaining until the probe has collected samples.
        if report.inference_throughput <= 0.0 {
            return;
        }
        let (topic, qos) = {
            let config = self.config.read();
            (
                metrics_topic(&config.mqtt.metrics_topic, &config.instance_id),
                QosLevel::AtMostOnce,
            )
        };
        let payload = self.lightweight(&report);
        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                if let Err(e) = self.bus.publish(&topic, &bytes, qos, true) {
                    warn!(topic, error = %e, "Failed to publish metrics");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialise metrics"),
        }
    }

    /// Throughput and averaged latencies only, for frequent polling.
    fn lightweight(&self, report: &ProbeReport) -> serde_json::Value {
        let latencies: Vec<f64> = report
            .latency_reports
            .iter()
            .filter_map(|r| r.e2e_latency)
            .collect();
        let avg_latency_ms = if latencies.is_empty() {
            None
        } else {
            Some(round_ms(latencies.iter().sum::<f64>() / latencies.len() as f64))
        };
        json!({
            "timestamp": Utc::now(),
            "instance_id": self.config.read().instance_id,
            "inference_throughput": round2(report.inference_throughput),
            "avg_latency_ms": avg_latency_ms,
            "sources": report.latency_reports.iter().map(|r| json!({
                "source_id": r.source_id,
                "latency_ms": r.e2e_latency.map(round_ms),
            })).collect::<Vec<_>>(),
        })
    }

    /// Complete probe output for the `metrics` command. Empty object when
    /// the engine carries no probe.
    pub fn full_report(&self) -> serde_json::Value {
        let Some(probe) = self.manager.metrics_probe() else {
            return json!({});
        };
        let report = probe.report();
        json!({
            "timestamp": Utc::now(),
            "instance_id": self.config.read().instance_id,
            "inference_throughput": report.inference_throughput,
            "latency_reports": report.latency_reports.iter().map(|r| json!({
                "source_id": r.source_id,
                "frame_decoding_latency_ms": r.frame_decoding_latency.map(round_ms),
                "inference_latency_ms": r.inference_latency.map(round_ms),
                "e2e_latency_ms": r.e2e_latency.map(round_ms),
            })).collect::<Vec<_>>(),
            "sources_metadata": report.sources_metadata.iter().map(|m| json!({
                "source_id": m.source_id,
                "fps": m.fps,
                "resolution": match (m.width, m.height) {
                    (Some(w), Some(h)) => Some(format!("{w}x{h}")),
                    _ => None,
                },
            })).collect::<Vec<_>>(),
            "status_updates": report.status_updates.iter().map(|u| json!({
                "source_id": u.source_id,
                "severity": u.severity.as_str(),
                "message": u.message,
            })).collect::<Vec<_>>(),
        })
    }
}

/// Seconds → milliseconds, rounded to two decimals.
fn round_ms(seconds: f64) -> f64 {
    round2(seconds * 1000.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
