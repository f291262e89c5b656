// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Message-bus abstraction and its MQTT implementation.
//!
//! The core talks to the bus through the [`MessageBus`] trait so tests can
//! substitute an in-process fake. [`MqttBus`] wraps a `rumqttc` client with
//! a background network-loop task that tracks connectivity, re-issues
//! subscriptions after a reconnect, and fans inbound publishes out to
//! per-subscription channels.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{ProcessorError, Result};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Delivery guarantee requested for a publication or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> u8 {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

impl From<QosLevel> for rumqttc::QoS {
    fn from(qos: QosLevel) -> rumqttc::QoS {
        match qos {
            QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// One inbound publication delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Minimal capability set the core needs from the transport.
///
/// `publish` is a non-blocking enqueue so it is safe to call from the
/// per-frame callback path.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8], qos: QosLevel, retain: bool) -> Result<()>;
    fn subscribe(&self, filter: &str, qos: QosLevel)
        -> Result<mpsc::UnboundedReceiver<BusMessage>>;
    fn is_connected(&self) -> bool;
    fn disconnect(&self);
}

/// Connection parameters for one bus session.
#[derive(Debug, Clone)]
pub struct BusOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Factory seam used by the core so tests can hand out fakes.
pub trait BusConnector: Send + Sync {
    fn connect(&self, options: BusOptions, timeout: Duration)
        -> BoxFuture<Result<Arc<dyn MessageBus>>>;
}

/// Production connector backed by [`MqttBus`].
pub struct MqttConnector;

impl BusConnector for MqttConnector {
    fn connect(
        &self,
        options: BusOptions,
        timeout: Duration,
    ) -> BoxFuture<Result<Arc<dyn MessageBus>>> {
        Box::pin(async move {
            let bus = MqttBus::connect(options, timeout).await?;
            Ok(bus as Arc<dyn MessageBus>)
        })
    }
}

struct Subscription {
    filter: String,
    qos: QosLevel,
    tx: mpsc::UnboundedSender<BusMessage>,
}

/// MQTT-backed [`MessageBus`].
pub struct MqttBus {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
}

impl MqttBus {
    /// Connect to the broker and wait until the session is acknowledged or
    /// `timeout` elapses. The network loop keeps running in the background
    /// and reconnects on transport errors.
    pub async fn connect(options: BusOptions, timeout: Duration) -> Result<Arc<Self>> {
        let mut mqtt_options =
            MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt_options
            .set_keep_alive(Duration::from_secs(30))
            .set_clean_session(true);
        if let (Some(user), Some(pass)) = (&options.username, &options.password) {
            mqtt_options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 128);
        let connected = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));
        let subscriptions: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, mut ready_rx) = watch::channel(false);

        let bus = Arc::new(MqttBus {
            client: client.clone(),
            connected: connected.clone(),
            closing: closing.clone(),
            subscriptions: subscriptions.clone(),
        });

        let host = options.host.clone();
        let port = options.port;
        tokio::spawn(async move {
            loop {
                if closing.load(Ordering::SeqCst) {
                    break;
                }
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(host, port, "Bus connected");
                        connected.store(true, Ordering::SeqCst);
                        let _ = ready_tx.send(true);
                        // Broker sessions are clean; re-issue every live
                        // subscription after a reconnect.
                        let filters: Vec<(String, QosLevel)> = {
                            let subs = subscriptions.lock();
                            subs.iter().map(|s| (s.filter.clone(), s.qos)).collect()
                        };
                        for (filter, qos) in filters {
                            if let Err(e) = client.try_subscribe(&filter, qos.into()) {
                                warn!(filter, error = %e, "Resubscribe failed");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = BusMessage {
                            topic: publish.topic.clone(),
                            payload: Bytes::copy_from_slice(&publish.payload),
                        };
                        let mut subs = subscriptions.lock();
                        subs.retain(|s| !s.tx.is_closed());
                        for sub in subs.iter() {
                            if topic_matches(&sub.filter, &message.topic) {
                                let _ = sub.tx.send(message.clone());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        connected.store(false, Ordering::SeqCst);
                        warn!(host, port, "Bus disconnected by broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected.store(false, Ordering::SeqCst);
                        if closing.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!(host, port, error = %e, "Bus connection error, will retry");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
            debug!(host, port, "Bus network loop exited");
        });

        let ready = tokio::time::timeout(timeout, ready_rx.wait_for(|up| *up)).await;
        if ready.is_err() || ready.is_ok_and(|r| r.is_err()) {
            bus.disconnect();
            return Err(ProcessorError::Bus(format!(
                "Timed out connecting to {}:{}",
                options.host, options.port
            )));
        }
        Ok(bus)
    }
}

impl MessageBus for MqttBus {
    fn publish(&self, topic: &str, payload: &[u8], qos: QosLevel, retain: bool) -> Result<()> {
        self.client
            .try_publish(topic, qos.into(), retain, payload.to_vec())
            .map_err(|e| ProcessorError::Bus(format!("Publish to '{topic}' failed: {e}")))
    }

    fn subscribe(
        &self,
        filter: &str,
        qos: QosLevel,
    ) -> Result<mpsc::UnboundedReceiver<BusMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.lock().push(Subscription {
            filter: filter.to_string(),
            qos,
            tx,
        });
        self.client
            .try_subscribe(filter, qos.into())
            .map_err(|e| ProcessorError::Bus(format!("Subscribe to '{filter}' failed: {e}")))?;
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.client.try_disconnect();
    }
}

/// MQTT topic-filter matching with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_filter_matches_only_itself() {
        assert!(topic_matches("nvr/control/commands", "nvr/control/commands"));
        assert!(!topic_matches("nvr/control/commands", "nvr/control/status"));
        assert!(!topic_matches("nvr/control", "nvr/control/commands"));
    }

    #[test]
    fn wildcard_filters() {
        assert!(topic_matches("nvr/detections/+", "nvr/detections/8"));
        assert!(!topic_matches("nvr/detections/+", "nvr/detections/8/extra"));
        assert!(topic_matches("nvr/#", "nvr/status/proc-1/ack"));
        assert!(topic_matches("nvr/status/#", "nvr/status"));
    }

    #[test]
    fn qos_from_wire_value() {
        assert_eq!(QosLevel::try_from(1u8), Ok(QosLevel::AtLeastOnce));
        assert!(QosLevel::try_from(3u8).is_err());
        assert_eq!(u8::from(QosLevel::ExactlyOnce), 2);
    }
}
