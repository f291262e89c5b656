// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Serde models for every message the processor puts on (or takes off)
//! the bus: detection events, command envelopes, acknowledgements, and
//! retained status events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounding box in pixel space (centre + size, matching the source frame).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Single object detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub tracker_id: Option<i64>,
}

/// Detection event published per inferred frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub instance_id: String,
    /// Stream source id after remapping (externally meaningful).
    pub source_id: u32,
    pub frame_id: u64,
    /// Frame capture timestamp (UTC).
    pub timestamp: DateTime<Utc>,
    /// Model in use at publish time (read dynamically from config).
    pub model_id: String,
    pub inference_time_ms: f64,
    pub detections: Vec<Detection>,
    pub fps: Option<f64>,
    pub latency_ms: Option<f64>,
}

/// Inbound control command. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Absent or `["*"]` means broadcast.
    #[serde(default)]
    pub target_instances: Vec<String>,
}

impl CommandEnvelope {
    /// Whether this envelope addresses the given instance.
    pub fn targets(&self, instance_id: &str) -> bool {
        self.target_instances.is_empty()
            || self
                .target_instances
                .iter()
                .any(|t| t == "*" || t == instance_id)
    }
}

/// Command lifecycle acknowledgement stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Received,
    Executing,
    Completed,
    Error,
}

/// Acknowledgement published (non-retained) on the instance's ack topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub instance_id: String,
    pub command: String,
    pub ack_status: AckStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Processor lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Starting,
    Connected,
    Running,
    Paused,
    Reconfiguring,
    Restarting,
    Stopped,
    Error,
    Disconnected,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Starting => "starting",
            LifecycleStatus::Connected => "connected",
            LifecycleStatus::Running => "running",
            LifecycleStatus::Paused => "paused",
            LifecycleStatus::Reconfiguring => "reconfiguring",
            LifecycleStatus::Restarting => "restarting",
            LifecycleStatus::Stopped => "stopped",
            LifecycleStatus::Error => "error",
            LifecycleStatus::Disconnected => "disconnected",
        }
    }
}

/// Retained status event on `{status_topic_prefix}/{instance_id}`.
///
/// `extra` carries caller-supplied extension fields (config view, uptime,
/// health, rename origin, pong flag) flattened into the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub instance_id: String,
    pub status: LifecycleStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
