// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Topic naming conventions.
//!
//! Detections:       `{detection_topic_prefix}/{source_id}`
//! Status (retained): `{status_topic_prefix}/{instance_id}`
//! Acks:             `{status_topic_prefix}/{instance_id}/ack`
//! Periodic metrics: `{metrics_topic}/{instance_id}`
//! Full metrics:     `{status_topic_prefix}/metrics/{instance_id}`

/// Topic a detection event for `source_id` is published on.
pub fn detection_topic(prefix: &str, source_id: u32) -> String {
    format!("{prefix}/{source_id}")
}

/// Retained per-instance status topic.
pub fn status_topic(prefix: &str, instance_id: &str) -> String {
    format!("{prefix}/{instance_id}")
}

/// Non-retained per-instance acknowledgement topic.
pub fn ack_topic(prefix: &str, instance_id: &str) -> String {
    format!("{prefix}/{instance_id}/ack")
}

/// Retained per-instance lightweight metrics topic.
pub fn metrics_topic(prefix: &str, instance_id: &str) -> String {
    format!("{prefix}/{instance_id}")
}

/// Non-retained topic the on-demand full metrics report goes to.
pub fn full_metrics_topic(status_prefix: &str, instance_id: &str) -> String {
    format!("{status_prefix}/metrics/{instance_id}")
}

/// Extract the source id from a detection topic, for consumers demuxing
/// `{prefix}/{source_id}` subscriptions. Returns `None` when the topic
/// has fewer than three segments or the last one is not an integer.
pub fn parse_source_id_from_topic(topic: &str) -> Option<u32> {
    let mut parts = topic.rsplit('/');
    let last = parts.next()?;
    parts.next()?;
    parts.next()?;
    last.parse().ok()
}
