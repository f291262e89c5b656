// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Processor core: wires bus, sink, engine, control plane and metrics in
//! a fixed start order and runs the restart-aware join loop.
//!
//! The control plane must be up before the engine starts: starting blocks
//! while streams connect, and the orchestrator has to be able to reach
//! the instance during that window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{BusConnector, BusOptions, MessageBus};
use crate::config::{ProcessorConfig, SharedConfig};
use crate::control::ControlPlane;
use crate::engine::EngineFactory;
use crate::error::Result;
use crate::events::schema::LifecycleStatus;
use crate::handlers::CommandHandlers;
use crate::manager::EngineManager;
use crate::metrics::MetricsReporter;
use crate::sink::DetectionSink;

/// Narrow capability handed to the command handlers and the engine
/// manager: the restart flag the join loop watches, the running flag, and
/// the start instant uptime is computed from.
pub struct Coordinator {
    restarting: AtomicBool,
    running: AtomicBool,
    started_at: Mutex<Option<Instant>>,
}

impl Coordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Coordinator {
            restarting: AtomicBool::new(false),
            running: AtomicBool::new(false),
            started_at: Mutex::new(None),
        })
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::SeqCst)
    }

    pub fn set_restarting(&self, restarting: bool) {
        self.restarting.store(restarting, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    fn mark_started(&self) {
        *self.started_at.lock() = Some(Instant::now());
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at
            .lock()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

struct CoreParts {
    bus: Arc<dyn MessageBus>,
    sink: Arc<DetectionSink>,
    manager: Arc<EngineManager>,
    control: Option<Arc<ControlPlane>>,
    control_task: Option<JoinHandle<()>>,
    metrics: Arc<MetricsReporter>,
}

pub struct ProcessorCore {
    config: SharedConfig,
    connector: Arc<dyn BusConnector>,
    factory: Arc<dyn EngineFactory>,
    coordinator: Arc<Coordinator>,
    parts: RwLock<Option<CoreParts>>,
}

impl ProcessorCore {
    pub fn new(
        config: ProcessorConfig,
        connector: Arc<dyn BusConnector>,
        factory: Arc<dyn EngineFactory>,
    ) -> Arc<Self> {
        Arc::new(ProcessorCore {
            config: Arc::new(RwLock::new(config)),
            connector,
            factory,
            coordinator: Coordinator::new(),
            parts: RwLock::new(None),
        })
    }

    /// Bring every component up in the required order and start the
    /// engine. Returns once stream connections are established.
    pub async fn start(&self) -> Result<()> {
        self.coordinator.mark_started();
        let snapshot = self.config.read().clone();
        info!(
            instance = snapshot.instance_id,
            streams = snapshot.stream_uris.len(),
            model = snapshot.model_id,
            "Starting stream processor"
        );

        // 1. Data bus.
        let bus = self
            .connector
            .connect(
                bus_options(&snapshot, "data"),
                Duration::from_secs(snapshot.mqtt.connect_timeout_s),
            )
            .await?;

        // 2. Detection sink, gate open.
        let sink = DetectionSink::new(bus.clone(), self.config.clone());

        // 3. Engine created but not started.
        let manager = EngineManager::new(self.factory.clone(), sink.clone(), self.config.clone());
        manager.create()?;

        let metrics = MetricsReporter::new(manager.clone(), bus.clone(), self.config.clone());

        // 4. Control plane, before the blocking engine start.
        let mut control = None;
        let mut control_task = None;
        if snapshot.control.enable_control_plane {
            let connected = self
                .connector
                .connect(
                    bus_options(&snapshot, "control"),
                    Duration::from_secs(snapshot.control.connect_timeout_s),
                )
                .await;
            match connected {
                Ok(control_bus) => {
                    let plane = ControlPlane::new(
                        control_bus,
                        snapshot.instance_id.clone(),
                        snapshot.control.command_topic.clone(),
                        snapshot.control.status_topic_prefix.clone(),
                    );
                    let handlers = CommandHandlers::new(
                        self.config.clone(),
                        manager.clone(),
                        plane.clone(),
                        metrics.clone(),
                        bus.clone(),
                        self.coordinator.clone(),
                    );
                    let task = plane.spawn(handlers)?;
                    // Auto-announce so the orchestrator discovers us.
                    plane.publish_status(
                        LifecycleStatus::Starting,
                        json!({
                            "uptime_seconds": 0,
                            "config": self.config.read().public_view(),
                        }),
                    );
                    info!(
                        command_topic = snapshot.control.command_topic,
                        "Control plane ready"
                    );
                    control = Some(plane);
                    control_task = Some(task);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Control plane connection failed, continuing without remote control"
                    );
                }
            }
        }

        // 5. Metrics reporter (no-op when the interval is 0).
        metrics.start();

        *self.parts.write() = Some(CoreParts {
            bus,
            sink,
            manager: manager.clone(),
            control,
            control_task,
            metrics,
        });

        // 6. Start the engine; blocks until streams connect or are
        //    permanently refused.
        manager.start().await?;
        self.coordinator.set_running(true);
        info!("Stream processor running");
        Ok(())
    }

    /// Wait for the engine to finish, surviving restarts.
    ///
    /// A `terminated()` signal can mean a genuine shutdown or a
    /// command-initiated restart. Either the coordinator flag or a changed
    /// engine identity marks a restart; then this loop waits for the flag
    /// to clear and re-joins the new engine. A failed restart leaves no
    /// engine behind and the loop exits into cleanup.
    pub async fn join(&self) {
        loop {
            let Some(manager) = self.manager() else { break };
            let Some(engine) = manager.current_engine() else { break };

            debug!("Waiting for engine to finish");
            let mut terminated = engine.terminated();
            if !*terminated.borrow_and_update() {
                while terminated.changed().await.is_ok() {
                    if *terminated.borrow_and_update() {
                        break;
                    }
                }
            }

            let is_restart = self.coordinator.is_restarting()
                || manager
                    .current_engine()
                    .is_some_and(|current| !Arc::ptr_eq(&current, &engine));
            if is_restart {
                info!("Restart detected, waiting for completion");
                while self.coordinator.is_restarting() {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                continue;
            }

            info!("Engine terminated (not a restart), exiting join loop");
            break;
        }
        self.cleanup().await;
    }

    /// Request shutdown: flips the running flag and terminates the
    /// engine so the join loop unwinds. Safe to call from a signal task.
    pub fn terminate(&self) {
        info!("Termination requested");
        self.coordinator.set_running(false);
        if let Some(manager) = self.manager() {
            manager.terminate();
        }
    }

    /// Idempotent shutdown cleanup.
    async fn cleanup(&self) {
        let parts = self.parts.write().take();
        let Some(parts) = parts else { return };
        info!("Performing shutdown cleanup");
        parts.bus.disconnect();
        if let Some(control) = &parts.control {
            control.disconnect();
        }
        parts.metrics.stop().await;
        if let Some(task) = parts.control_task {
            task.abort();
        }
        self.coordinator.set_running(false);
        info!("Stream processor stopped");
    }

    // ──────────────── accessors ───────────────────────────────────────────

    pub fn config(&self) -> SharedConfig {
        self.config.clone()
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    pub fn manager(&self) -> Option<Arc<EngineManager>> {
        self.parts.read().as_ref().map(|p| p.manager.clone())
    }

    pub fn control_plane(&self) -> Option<Arc<ControlPlane>> {
        self.parts.read().as_ref().and_then(|p| p.control.clone())
    }

    pub fn sink(&self) -> Option<Arc<DetectionSink>> {
        self.parts.read().as_ref().map(|p| p.sink.clone())
    }

    pub fn metrics(&self) -> Option<Arc<MetricsReporter>> {
        self.parts.read().as_ref().map(|p| p.metrics.clone())
    }
}

fn bus_options(config: &ProcessorConfig, role: &str) -> BusOptions {
    BusOptions {
        client_id: format!("{}_{}", config.instance_id, role),
        host: config.mqtt.host.clone(),
        port: config.mqtt.port,
        username: config.mqtt.username.clone(),
        password: config.mqtt.password.clone(),
    }
}
