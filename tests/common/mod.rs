// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Shared test support: in-process bus fake, fault-injecting engine
//! factory, and helpers for driving a full processor core.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use nvr_processor::bus::{
    topic_matches, BoxFuture, BusConnector, BusMessage, BusOptions, MessageBus, QosLevel,
};
use nvr_processor::config::ProcessorConfig;
use nvr_processor::engine::{
    EngineFactory, PredictionConsumer, StreamEngine, SyntheticEngineFactory,
};
use nvr_processor::error::{ProcessorError, Result};
use nvr_processor::events::schema::{Acknowledgement, StatusEvent};
use nvr_processor::processor::ProcessorCore;

/// One publish recorded by the fake bus, with the instant it happened.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QosLevel,
    pub retain: bool,
    pub at: Instant,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).expect("published payload is JSON")
    }
}

/// In-process [`MessageBus`]: records every publish and routes injected
/// messages to subscribers by topic filter.
pub struct FakeBus {
    published: Mutex<Vec<PublishedMessage>>,
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<BusMessage>)>>,
    connected: AtomicBool,
    fail_publishes: AtomicBool,
}

impl FakeBus {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeBus {
            published: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            fail_publishes: AtomicBool::new(false),
        })
    }

    /// Deliver a JSON message to every matching subscriber, as if it
    /// arrived from the broker.
    pub fn inject(&self, topic: &str, payload: serde_json::Value) {
        self.inject_raw(topic, serde_json::to_vec(&payload).unwrap());
    }

    pub fn inject_raw(&self, topic: &str, payload: Vec<u8>) {
        let message = BusMessage {
            topic: topic.to_string(),
            payload: Bytes::from(payload),
        };
        let subscribers = self.subscribers.lock();
        for (filter, tx) in subscribers.iter() {
            if topic_matches(filter, topic) {
                let _ = tx.send(message.clone());
            }
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }

    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }
}

impl MessageBus for FakeBus {
    fn publish(&self, topic: &str, payload: &[u8], qos: QosLevel, retain: bool) -> Result<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(ProcessorError::Bus(format!(
                "Injected publish failure on '{topic}'"
            )));
        }
        self.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
            at: Instant::now(),
        });
        Ok(())
    }

    fn subscribe(
        &self,
        filter: &str,
        _qos: QosLevel,
    ) -> Result<mpsc::UnboundedReceiver<BusMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push((filter.to_string(), tx));
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Hands out the data and control fakes by client-id role suffix.
pub struct FakeConnector {
    pub data: Arc<FakeBus>,
    pub control: Arc<FakeBus>,
}

impl BusConnector for FakeConnector {
    fn connect(
        &self,
        options: BusOptions,
        _timeout: Duration,
    ) -> BoxFuture<Result<Arc<dyn MessageBus>>> {
        let bus = if options.client_id.ends_with("_control") {
            self.control.clone()
        } else {
            self.data.clone()
        };
        Box::pin(async move { Ok(bus as Arc<dyn MessageBus>) })
    }
}

/// Synthetic-engine factory that fails the next N creations on demand,
/// for exercising restart rollback.
pub struct FlakyEngineFactory {
    inner: SyntheticEngineFactory,
    fail_creates: AtomicUsize,
}

impl FlakyEngineFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(FlakyEngineFactory {
            inner: SyntheticEngineFactory,
            fail_creates: AtomicUsize::new(0),
        })
    }

    pub fn fail_next_creates(&self, count: usize) {
        self.fail_creates.store(count, Ordering::SeqCst);
    }
}

impl EngineFactory for FlakyEngineFactory {
    fn create(
        &self,
        config: &ProcessorConfig,
        consumer: Arc<dyn PredictionConsumer>,
    ) -> Result<Arc<dyn StreamEngine>> {
        let remaining = self.fail_creates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_creates.store(remaining - 1, Ordering::SeqCst);
            return Err(ProcessorError::Engine("Injected engine failure".into()));
        }
        self.inner.create(config, consumer)
    }
}

/// Config with quiet defaults for tests: named instance, explicit
/// mapping, metrics disabled, gentle frame rate.
pub fn test_config(instance_id: &str, uris: &[&str], mapping: &[u32]) -> ProcessorConfig {
    let mut config =
        ProcessorConfig::new(uris.iter().map(|u| u.to_string()).collect()).expect("valid config");
    config.instance_id = instance_id.to_string();
    config.source_id_mapping = mapping.to_vec();
    config.mqtt.metrics_interval_s = 0;
    config.max_fps = Some(20.0);
    config.validate().expect("valid test config");
    config
}

pub struct TestCore {
    pub core: Arc<ProcessorCore>,
    pub data: Arc<FakeBus>,
    pub control: Arc<FakeBus>,
}

/// Start a full processor core on fake buses with the given factory.
pub async fn start_core(config: ProcessorConfig, factory: Arc<dyn EngineFactory>) -> TestCore {
    let data = FakeBus::new();
    let control = FakeBus::new();
    let connector = Arc::new(FakeConnector {
        data: data.clone(),
        control: control.clone(),
    });
    let core = ProcessorCore::new(config, connector, factory);
    core.start().await.expect("core starts");
    TestCore { core, data, control }
}

pub async fn start_synthetic_core(config: ProcessorConfig) -> TestCore {
    start_core(config, Arc::new(SyntheticEngineFactory)).await
}

/// Inject a command envelope on the default command topic.
pub fn send_command(control: &FakeBus, envelope: serde_json::Value) {
    control.inject("nvr/control/commands", envelope);
}

/// Poll `predicate` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

pub fn acks_on(bus: &FakeBus, instance_id: &str) -> Vec<Acknowledgement> {
    bus.published_on(&format!("nvr/status/{instance_id}/ack"))
        .iter()
        .map(|m| serde_json::from_slice(&m.payload).expect("ack payload"))
        .collect()
}

pub fn statuses_on(bus: &FakeBus, instance_id: &str) -> Vec<StatusEvent> {
    bus.published_on(&format!("nvr/status/{instance_id}"))
        .iter()
        .map(|m| serde_json::from_slice(&m.payload).expect("status payload"))
        .collect()
}
