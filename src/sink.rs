// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Detection sink: converts per-frame predictions into wire events.
//!
//! The sink is the engine's `on_prediction` callback. It remaps the
//! engine-internal source index to the external stream id, builds a
//! [`DetectionEvent`], and publishes it on the per-source detection topic.
//! A running gate pauses publication atomically: the flip is visible to
//! every concurrent caller before `pause()`/`resume()` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::bus::MessageBus;
use crate::config::SharedConfig;
use crate::engine::{FramePrediction, PredictionConsumer, VideoFrame};
use crate::error::Result;
use crate::events::protocol::detection_topic;
use crate::events::schema::{BoundingBox, Detection, DetectionEvent};

pub struct DetectionSink {
    bus: Arc<dyn MessageBus>,
    config: SharedConfig,
    /// Publication gate. Cleared by `pause()`; frames arriving while the
    /// gate is down are dropped silently, including frames the engine
    /// drains from its queues after a pause.
    running: AtomicBool,
}

impl DetectionSink {
    pub fn new(bus: Arc<dyn MessageBus>, config: SharedConfig) -> Arc<Self> {
        Arc::new(DetectionSink {
            bus,
            config,
            running: AtomicBool::new(true),
        })
    }

    /// Stop publishing. Takes effect before this call returns.
    pub fn pause(&self) {
        self.running.store(false, Ordering::Release);
        info!("Detection sink paused, no events will be published");
    }

    /// Re-open the gate.
    pub fn resume(&self) {
        self.running.store(true, Ordering::Release);
        info!("Detection sink resumed, publishing events");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Convenience for engines that deliver one frame at a time.
    pub fn on_prediction(&self, prediction: FramePrediction, frame: VideoFrame) {
        self.on_predictions(&[Some(prediction)], &[Some(frame)]);
    }

    fn publish_frame(&self, prediction: &FramePrediction, frame: &VideoFrame) -> Result<()> {
        let (topic, payload, qos) = {
            let config = self.config.read();
            let actual_source_id = config
                .source_id_mapping
                .get(frame.source_id)
                .copied()
                .unwrap_or(frame.source_id as u32);
            let event = DetectionEvent {
                instance_id: config.instance_id.clone(),
                source_id: actual_source_id,
                frame_id: frame.frame_id,
                timestamp: frame.timestamp,
                // Read at publish time so change_model takes effect
                // without recreating the sink.
                model_id: config.model_id.clone(),
                inference_time_ms: prediction.inference_time.as_secs_f64() * 1000.0,
                detections: prediction
                    .objects
                    .iter()
                    .map(|o| Detection {
                        class_name: o.class_name.clone(),
                        confidence: o.confidence,
                        bbox: BoundingBox {
                            x: o.x,
                            y: o.y,
                            width: o.width,
                            height: o.height,
                        },
                        tracker_id: o.tracker_id,
                    })
                    .collect(),
                fps: None,
                latency_ms: None,
            };
            let topic = detection_topic(&config.mqtt.detection_topic_prefix, actual_source_id);
            let payload = serde_json::to_vec(&event).expect("detection event serialises");
            (topic, payload, config.mqtt.qos)
        };
        self.bus.publish(&topic, &payload, qos, false)
    }
}

impl PredictionConsumer for DetectionSink {
    fn on_predictions(
        &self,
        predictions: &[Option<FramePrediction>],
        frames: &[Option<VideoFrame>],
    ) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        for (prediction, frame) in predictions.iter().zip(frames.iter()) {
            let (Some(prediction), Some(frame)) = (prediction, frame) else {
                continue;
            };
            // Publish failures never propagate into the engine callback.
            if let Err(e) = self.publish_frame(prediction, frame) {
                warn!(source = frame.source_id, error = %e, "Failed to publish detection");
            }
        }
    }
}
