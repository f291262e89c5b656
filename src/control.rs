// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! MQTT control plane.
//!
//! Subscribes to the shared command topic and runs every matched command
//! through the acknowledgement lifecycle: `received` → `executing` →
//! `completed` | `error`. Commands execute one at a time on the single
//! command-loop task; a long-running handler (restart) intentionally
//! holds back the queue and serialises the reconfiguration schedule.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{BusMessage, MessageBus, QosLevel};
use crate::error::Result;
use crate::events::protocol::{ack_topic, full_metrics_topic, status_topic};
use crate::events::schema::{
    AckStatus, Acknowledgement, CommandEnvelope, LifecycleStatus, StatusEvent,
};
use crate::handlers::CommandHandlers;

pub struct ControlPlane {
    bus: Arc<dyn MessageBus>,
    /// Remembered identity; updated in place by `rename_instance`.
    instance_id: RwLock<String>,
    command_topic: String,
    status_topic_prefix: String,
}

impl ControlPlane {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        instance_id: String,
        command_topic: String,
        status_topic_prefix: String,
    ) -> Arc<Self> {
        Arc::new(ControlPlane {
            bus,
            instance_id: RwLock::new(instance_id),
            command_topic,
            status_topic_prefix,
        })
    }

    pub fn instance_id(&self) -> String {
        self.instance_id.read().clone()
    }

    pub fn set_instance_id(&self, instance_id: String) {
        *self.instance_id.write() = instance_id;
    }

    pub fn is_connected(&self) -> bool {
        self.bus.is_connected()
    }

    /// Subscribe to the command topic, announce `connected`, and spawn the
    /// command loop.
    pub fn spawn(self: &Arc<Self>, handlers: Arc<CommandHandlers>) -> Result<JoinHandle<()>> {
        let mut inbound = self
            .bus
            .subscribe(&self.command_topic, QosLevel::AtLeastOnce)?;
        info!(topic = self.command_topic, "Subscribed to command topic");
        self.publish_status(LifecycleStatus::Connected, Value::Null);

        let plane = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                plane.dispatch(&handlers, message).await;
            }
            debug!("Control plane command loop exited");
        }))
    }

    async fn dispatch(&self, handlers: &CommandHandlers, message: BusMessage) {
        let envelope: CommandEnvelope = match serde_json::from_slice(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(topic = message.topic, error = %e, "Discarding undecodable command");
                return;
            }
        };
        let command = envelope.command.to_lowercase();
        // Captured once: every ack for this command goes to the identity
        // it was addressed on, even if the handler renames the instance.
        let me = self.instance_id();
        if !envelope.targets(&me) {
            debug!(command, instance = me, "Command targeted elsewhere, ignoring");
            return;
        }
        info!(command, "Command received");
        self.publish_ack(&me, &command, AckStatus::Received, None);

        if !CommandHandlers::knows(&command) {
            self.publish_ack(
                &me,
                &command,
                AckStatus::Error,
                Some(format!(
                    "Command '{}' not available. Available: {}",
                    command,
                    CommandHandlers::available().join(", ")
                )),
            );
            return;
        }

        self.publish_ack(&me, &command, AckStatus::Executing, None);
        match handlers.dispatch(&command, &envelope.params).await {
            Ok(()) => {
                info!(command, "Command completed");
                self.publish_ack(&me, &command, AckStatus::Completed, None);
            }
            Err(e) => {
                warn!(command, error = %e, "Command failed");
                self.publish_ack(&me, &command, AckStatus::Error, Some(e.to_string()));
            }
        }
    }

    /// Publish the retained per-instance status. `extra` is an optional
    /// JSON object of extension fields flattened into the payload.
    pub fn publish_status(&self, status: LifecycleStatus, extra: Value) {
        let instance_id = self.instance_id();
        let event = StatusEvent {
            instance_id: instance_id.clone(),
            status,
            timestamp: Utc::now(),
            extra: match extra {
                Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
        };
        let topic = status_topic(&self.status_topic_prefix, &instance_id);
        match serde_json::to_vec(&event) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(&topic, &payload, QosLevel::AtLeastOnce, true) {
                    warn!(topic, error = %e, "Failed to publish status");
                } else {
                    debug!(topic, status = status.as_str(), "Status published");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialise status"),
        }
    }

    /// Publish a non-retained acknowledgement on the ack topic of the
    /// given instance identity.
    pub fn publish_ack(
        &self,
        instance_id: &str,
        command: &str,
        ack_status: AckStatus,
        message: Option<String>,
    ) {
        let ack = Acknowledgement {
            instance_id: instance_id.to_string(),
            command: command.to_string(),
            ack_status,
            timestamp: Utc::now(),
            message,
        };
        let topic = ack_topic(&self.status_topic_prefix, instance_id);
        match serde_json::to_vec(&ack) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(&topic, &payload, QosLevel::AtLeastOnce, false) {
                    warn!(topic, error = %e, "Failed to publish ack");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialise ack"),
        }
    }

    /// Publish the on-demand full metrics report (QoS 0, non-retained).
    pub fn publish_metrics_report(&self, report: &Value) {
        let topic = full_metrics_topic(&self.status_topic_prefix, &self.instance_id());
        match serde_json::to_vec(report) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(&topic, &payload, QosLevel::AtMostOnce, false) {
                    warn!(topic, error = %e, "Failed to publish metrics report");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialise metrics report"),
        }
    }

    /// Publish a final `disconnected` status and drop the bus session.
    pub fn disconnect(&self) {
        info!("Disconnecting control plane");
        self.publish_status(LifecycleStatus::Disconnected, Value::Null);
        self.bus.disconnect();
    }
}
