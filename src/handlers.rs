// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Command handlers for the control plane.
//!
//! Reconfiguration commands share one template: validate → snapshot →
//! publish `reconfiguring` → mutate → restart; on failure restore the
//! snapshot, publish `error`, and return the error to the router (which
//! acks `error`). The config is therefore equal to its pre-command
//! snapshot after any failed reconfiguration.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::bus::MessageBus;
use crate::config::SharedConfig;
use crate::control::ControlPlane;
use crate::error::{ProcessorError, Result};
use crate::events::schema::LifecycleStatus;
use crate::manager::EngineManager;
use crate::metrics::MetricsReporter;
use crate::processor::Coordinator;
use crate::validators;

/// Command catalogue, sorted, as reported to clients on unknown commands.
const AVAILABLE: &[&str] = &[
    "add_stream",
    "change_model",
    "metrics",
    "pause",
    "ping",
    "remove_stream",
    "rename_instance",
    "restart",
    "resume",
    "set_fps",
    "status",
    "stop",
];

pub struct CommandHandlers {
    config: SharedConfig,
    manager: Arc<EngineManager>,
    control: Arc<ControlPlane>,
    metrics: Arc<MetricsReporter>,
    data_bus: Arc<dyn MessageBus>,
    coordinator: Arc<Coordinator>,
}

impl CommandHandlers {
    pub fn new(
        config: SharedConfig,
        manager: Arc<EngineManager>,
        control: Arc<ControlPlane>,
        metrics: Arc<MetricsReporter>,
        data_bus: Arc<dyn MessageBus>,
        coordinator: Arc<Coordinator>,
    ) -> Arc<Self> {
        Arc::new(CommandHandlers {
            config,
            manager,
            control,
            metrics,
            data_bus,
            coordinator,
        })
    }

    pub fn available() -> &'static [&'static str] {
        AVAILABLE
    }

    pub fn knows(command: &str) -> bool {
        AVAILABLE.contains(&command)
    }

    /// Execute one command. Runs on the control-plane task; at most one
    /// command is in flight at a time.
    pub async fn dispatch(&self, command: &str, params: &Map<String, Value>) -> Result<()> {
        match command {
            "pause" => self.handle_pause(),
            "resume" => self.handle_resume(),
            "stop" => self.handle_stop(),
            "restart" => self.handle_restart().await,
            "change_model" => self.handle_change_model(params).await,
            "set_fps" => self.handle_set_fps(params).await,
            "add_stream" => self.handle_add_stream(params).await,
            "remove_stream" => self.handle_remove_stream(params).await,
            "status" => self.handle_status(),
            "metrics" => self.handle_metrics(),
            "ping" => self.handle_ping(),
            "rename_instance" => self.handle_rename_instance(params),
            other => Err(ProcessorError::UnknownCommand {
                command: other.to_string(),
                available: AVAILABLE.join(", "),
            }),
        }
    }

    /// Processor status as derived from the coordinator and engine state.
    pub fn current_status(&self) -> LifecycleStatus {
        if !self.coordinator.is_running() {
            return LifecycleStatus::Stopped;
        }
        if self.manager.is_paused() {
            return LifecycleStatus::Paused;
        }
        if self.coordinator.is_restarting() {
            return LifecycleStatus::Restarting;
        }
        LifecycleStatus::Running
    }

    // ──────────────── basic lifecycle ─────────────────────────────────────

    fn handle_pause(&self) -> Result<()> {
        self.manager.pause()?;
        self.control
            .publish_status(LifecycleStatus::Paused, Value::Null);
        Ok(())
    }

    fn handle_resume(&self) -> Result<()> {
        self.manager.resume()?;
        self.control
            .publish_status(LifecycleStatus::Running, Value::Null);
        Ok(())
    }

    fn handle_stop(&self) -> Result<()> {
        self.manager.terminate();
        self.coordinator.set_running(false);
        self.control
            .publish_status(LifecycleStatus::Stopped, Value::Null);
        Ok(())
    }

    async fn handle_restart(&self) -> Result<()> {
        self.control
            .publish_status(LifecycleStatus::Restarting, Value::Null);
        match self.manager.restart(&self.coordinator).await {
            Ok(()) => {
                self.control
                    .publish_status(LifecycleStatus::Running, Value::Null);
                Ok(())
            }
            Err(e) => {
                self.control.publish_status(
                    LifecycleStatus::Error,
                    json!({ "message": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    // ──────────────── dynamic reconfiguration ─────────────────────────────

    async fn handle_change_model(&self, params: &Map<String, Value>) -> Result<()> {
        let model_id = validators::model_id(params)?;
        let previous = self.config.read().model_id.clone();
        info!(from = previous, to = model_id, "Changing model");
        self.control
            .publish_status(LifecycleStatus::Reconfiguring, Value::Null);
        self.config.write().model_id = model_id;
        match self.manager.restart(&self.coordinator).await {
            Ok(()) => {
                self.control
                    .publish_status(LifecycleStatus::Running, Value::Null);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Model change failed, rolling back");
                self.config.write().model_id = previous;
                self.control.publish_status(
                    LifecycleStatus::Error,
                    json!({ "message": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    async fn handle_set_fps(&self, params: &Map<String, Value>) -> Result<()> {
        let max_fps = validators::max_fps(params)?;
        let previous = self.config.read().max_fps;
        info!(from = ?previous, to = max_fps, "Changing max FPS");
        self.control
            .publish_status(LifecycleStatus::Reconfiguring, Value::Null);
        self.config.write().max_fps = Some(max_fps);
        match self.manager.restart(&self.coordinator).await {
            Ok(()) => {
                self.control
                    .publish_status(LifecycleStatus::Running, Value::Null);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "FPS change failed, rolling back");
                self.config.write().max_fps = previous;
                self.control.publish_status(
                    LifecycleStatus::Error,
                    json!({ "message": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    async fn handle_add_stream(&self, params: &Map<String, Value>) -> Result<()> {
        let source_id = validators::source_id(params)?;
        self.reconfigure_streams(source_id, true).await
    }

    async fn handle_remove_stream(&self, params: &Map<String, Value>) -> Result<()> {
        let source_id = validators::source_id(params)?;
        self.reconfigure_streams(source_id, false).await
    }

    /// Shared template for add/remove: snapshot both stream lists, apply
    /// the config mutation, restart; restore both on any failure.
    async fn reconfigure_streams(&self, source_id: u32, add: bool) -> Result<()> {
        let (uris_backup, mapping_backup) = {
            let config = self.config.read();
            (config.stream_uris.clone(), config.source_id_mapping.clone())
        };

        let mutation = {
            let mut config = self.config.write();
            if add {
                config.add_stream(source_id)
            } else {
                config.remove_stream(source_id)
            }
        };
        if let Err(e) = mutation {
            self.control.publish_status(
                LifecycleStatus::Error,
                json!({ "message": e.to_string() }),
            );
            return Err(e);
        }

        info!(source_id, add, "Stream set changed, restarting engine");
        self.control
            .publish_status(LifecycleStatus::Reconfiguring, Value::Null);
        match self.manager.restart(&self.coordinator).await {
            Ok(()) => {
                self.control
                    .publish_status(LifecycleStatus::Running, Value::Null);
                Ok(())
            }
            Err(e) => {
                warn!(source_id, error = %e, "Stream change failed, rolling back");
                {
                    let mut config = self.config.write();
                    config.stream_uris = uris_backup;
                    config.source_id_mapping = mapping_backup;
                }
                self.control.publish_status(
                    LifecycleStatus::Error,
                    json!({ "message": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    // ──────────────── observability ───────────────────────────────────────

    fn handle_status(&self) -> Result<()> {
        self.control.publish_status(self.current_status(), Value::Null);
        Ok(())
    }

    fn handle_metrics(&self) -> Result<()> {
        let report = self.metrics.full_report();
        self.control.publish_metrics_report(&report);
        Ok(())
    }

    fn handle_ping(&self) -> Result<()> {
        let uptime_seconds = self.coordinator.uptime_seconds();
        let config_view = self.config.read().public_view();
        let health = json!({
            "paused": self.manager.is_paused(),
            "engine_running": self.manager.is_running(),
            "bus_connected": self.data_bus.is_connected(),
            "control_plane_connected": self.control.is_connected(),
        });
        self.control.publish_status(
            self.current_status(),
            json!({
                "pong": true,
                "uptime_seconds": uptime_seconds,
                "config": config_view,
                "health": health,
            }),
        );
        Ok(())
    }

    // ──────────────── orchestration ───────────────────────────────────────

    /// Rename the instance without restarting: config and the control
    /// plane's remembered id change together, then a `running` status with
    /// the old id is retained on the new topic.
    fn handle_rename_instance(&self, params: &Map<String, Value>) -> Result<()> {
        let new_id = validators::new_instance_id(params)?;
        let old_id = {
            let mut config = self.config.write();
            let old = config.instance_id.clone();
            config.instance_id = new_id.clone();
            self.control.set_instance_id(new_id.clone());
            old
        };
        info!(from = old_id, to = new_id, "Instance renamed");
        self.control.publish_status(
            LifecycleStatus::Running,
            json!({ "renamed_from": old_id }),
        );
        Ok(())
    }
}
