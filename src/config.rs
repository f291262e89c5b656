use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::bus::QosLevel;
use crate::error::{ProcessorError, Result};

/// Handle shared by every component that reads or mutates the runtime
/// configuration. Mutations happen only on the control-plane task.
pub type SharedConfig = Arc<RwLock<ProcessorConfig>>;

/// Runtime configuration for one processor instance.
///
/// Loaded from a TOML file or built from CLI flags; validated at
/// construction and after every mutation.
#[derive(Debug, Deserialize, Clone)]
pub struct ProcessorConfig {
    /// Stable identity used for command targeting and topic scoping.
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    /// RTSP stream URIs to process (non-empty).
    pub stream_uris: Vec<String>,
    /// Maps the engine's internal 0-based index to the externally
    /// meaningful stream id used in topics and payloads. Same length as
    /// `stream_uris`; filled with the identity mapping when absent.
    #[serde(default)]
    pub source_id_mapping: Vec<u32>,
    /// Base URL new stream URIs are synthesised from: `{stream_server}/{id}`.
    #[serde(default = "default_stream_server")]
    pub stream_server: String,
    /// Inference model identifier.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Maximum FPS limiter (None = unlimited). Enforced by the engine.
    #[serde(default)]
    pub max_fps: Option<f64>,
    /// Minimum confidence threshold for detections.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Enable the engine's metrics probe.
    #[serde(default = "default_true")]
    pub enable_watchdog: bool,
    /// Message-bus configuration.
    #[serde(default)]
    pub mqtt: MqttConfig,
    /// Control-plane configuration.
    #[serde(default)]
    pub control: ControlConfig,
}

/// MQTT broker and topic configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    /// Broker hostname.
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Broker username (optional).
    #[serde(default)]
    pub username: Option<String>,
    /// Broker password (optional).
    #[serde(default)]
    pub password: Option<String>,
    /// Topic prefix for detection events.
    #[serde(default = "default_detection_topic_prefix")]
    pub detection_topic_prefix: String,
    /// QoS level for detection events.
    #[serde(default)]
    pub qos: QosLevel,
    /// Topic prefix for periodic lightweight metrics.
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    /// Periodic metrics interval in seconds (0 disables).
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_s: u64,
    /// Data-bus connect timeout in seconds.
    #[serde(default = "default_bus_connect_timeout")]
    pub connect_timeout_s: u64,
}

/// Control-plane configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    /// Whether to bring up the MQTT control plane.
    #[serde(default = "default_true")]
    pub enable_control_plane: bool,
    /// Shared topic commands arrive on.
    #[serde(default = "default_command_topic")]
    pub command_topic: String,
    /// Prefix for per-instance status and ack topics.
    #[serde(default = "default_status_topic_prefix")]
    pub status_topic_prefix: String,
    /// Control-plane connect timeout in seconds.
    #[serde(default = "default_control_connect_timeout")]
    pub connect_timeout_s: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            detection_topic_prefix: default_detection_topic_prefix(),
            qos: QosLevel::default(),
            metrics_topic: default_metrics_topic(),
            metrics_interval_s: default_metrics_interval(),
            connect_timeout_s: default_bus_connect_timeout(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enable_control_plane: true,
            command_topic: default_command_topic(),
            status_topic_prefix: default_status_topic_prefix(),
            connect_timeout_s: default_control_connect_timeout(),
        }
    }
}

fn default_instance_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("proc-{}", &id[..8])
}
fn default_stream_server() -> String { "rtsp://localhost:8554".into() }
fn default_model_id() -> String { "yolov8x-640".into() }
fn default_confidence_threshold() -> f64 { 0.5 }
fn default_true() -> bool { true }
fn default_mqtt_host() -> String { "localhost".into() }
fn default_mqtt_port() -> u16 { 1883 }
fn default_detection_topic_prefix() -> String { "nvr/detections".into() }
fn default_metrics_topic() -> String { "nvr/metrics".into() }
fn default_metrics_interval() -> u64 { 30 }
fn default_bus_connect_timeout() -> u64 { 10 }
fn default_command_topic() -> String { "nvr/control/commands".into() }
fn default_status_topic_prefix() -> String { "nvr/status".into() }
fn default_control_connect_timeout() -> u64 { 5 }

impl ProcessorConfig {
    /// Build a configuration for the given stream URIs with defaults
    /// everywhere else. The source-id mapping is the identity.
    pub fn new(stream_uris: Vec<String>) -> Result<Self> {
        let mapping = (0..stream_uris.len() as u32).collect();
        let config = ProcessorConfig {
            instance_id: default_instance_id(),
            stream_uris,
            source_id_mapping: mapping,
            stream_server: default_stream_server(),
            model_id: default_model_id(),
            max_fps: None,
            confidence_threshold: default_confidence_threshold(),
            enable_watchdog: true,
            mqtt: MqttConfig::default(),
            control: ControlConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProcessorError::Config(format!("Cannot read config file: {e}")))?;
        let mut config: ProcessorConfig = toml::from_str(&content)
            .map_err(|e| ProcessorError::Config(format!("Invalid TOML: {e}")))?;
        if config.source_id_mapping.is_empty() {
            config.source_id_mapping = (0..config.stream_uris.len() as u32).collect();
        }
        config.validate()?;
        Ok(config)
    }

    /// Check every configuration invariant. Called at construction and
    /// after every mutation.
    pub fn validate(&self) -> Result<()> {
        if self.stream_uris.is_empty() {
            return Err(ProcessorError::Config("No stream URIs defined".into()));
        }
        for uri in &self.stream_uris {
            if !uri_is_wellformed(uri) {
                return Err(ProcessorError::Config(format!(
                    "Stream URI '{uri}' has no scheme/authority and is not a path"
                )));
            }
        }
        if self.stream_uris.len() != self.source_id_mapping.len() {
            return Err(ProcessorError::Config(format!(
                "source_id_mapping has {} entries for {} streams",
                self.source_id_mapping.len(),
                self.stream_uris.len()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for id in &self.source_id_mapping {
            if !seen.insert(*id) {
                return Err(ProcessorError::Config(format!("Duplicate source id {id}")));
            }
        }
        if self.mqtt.port == 0 {
            return Err(ProcessorError::Config("mqtt.port must be in 1..65535".into()));
        }
        if let Some(fps) = self.max_fps {
            if fps <= 0.0 {
                return Err(ProcessorError::Config(format!("max_fps must be > 0, got {fps}")));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ProcessorError::Config(format!(
                "confidence_threshold must be in [0,1], got {}",
                self.confidence_threshold
            )));
        }
        Ok(())
    }

    /// Add a stream for `source_id`, synthesising its URI from
    /// `stream_server`. Rejects ids already monitored. On failure the
    /// config is unchanged.
    pub fn add_stream(&mut self, source_id: u32) -> Result<()> {
        if self.source_id_mapping.contains(&source_id) {
            return Err(ProcessorError::Config(format!(
                "Source {source_id} is already monitored"
            )));
        }
        let mut candidate = self.clone();
        candidate.stream_uris.push(self.stream_uri_for(source_id));
        candidate.source_id_mapping.push(source_id);
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// Remove the stream mapped to `source_id`. Rejects unknown ids and
    /// refuses to leave zero streams. On failure the config is unchanged.
    pub fn remove_stream(&mut self, source_id: u32) -> Result<()> {
        let position = self
            .source_id_mapping
            .iter()
            .position(|id| *id == source_id)
            .ok_or_else(|| {
                ProcessorError::Config(format!("Source {source_id} is not monitored"))
            })?;
        if self.stream_uris.len() == 1 {
            return Err(ProcessorError::Config(
                "Cannot remove the last stream".into(),
            ));
        }
        let mut candidate = self.clone();
        candidate.stream_uris.remove(position);
        candidate.source_id_mapping.remove(position);
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    /// URI synthesised for `source_id` by the `{stream_server}/{id}`
    /// convention.
    pub fn stream_uri_for(&self, source_id: u32) -> String {
        format!("{}/{}", self.stream_server.trim_end_matches('/'), source_id)
    }

    /// Projection of the config safe to publish: everything except
    /// credentials.
    pub fn public_view(&self) -> serde_json::Value {
        json!({
            "instance_id": self.instance_id,
            "stream_uris": self.stream_uris,
            "source_id_mapping": self.source_id_mapping,
            "stream_server": self.stream_server,
            "model_id": self.model_id,
            "max_fps": self.max_fps,
            "confidence_threshold": self.confidence_threshold,
            "enable_watchdog": self.enable_watchdog,
            "mqtt": {
                "host": self.mqtt.host,
                "port": self.mqtt.port,
                "detection_topic_prefix": self.mqtt.detection_topic_prefix,
                "qos": u8::from(self.mqtt.qos),
                "metrics_topic": self.mqtt.metrics_topic,
                "metrics_interval_s": self.mqtt.metrics_interval_s,
            },
            "control": {
                "enable_control_plane": self.control.enable_control_plane,
                "command_topic": self.control.command_topic,
                "status_topic_prefix": self.control.status_topic_prefix,
            },
        })
    }
}

/// A URI is acceptable when it carries `scheme://rest` or is an absolute
/// path (file sources).
fn uri_is_wellformed(uri: &str) -> bool {
    match uri.split_once("://") {
        Some((scheme, rest)) => !scheme.is_empty() && !rest.is_empty(),
        None => uri.starts_with('/'),
    }
}
