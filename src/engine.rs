//! Inference-engine boundary.
//!
//! The processor never sees a concrete engine: it drives an opaque
//! [`StreamEngine`] created through an [`EngineFactory`], feeds every
//! inferred frame to a [`PredictionConsumer`], and samples an optional
//! [`MetricsProbe`]. Production plugs a real inference backend in here;
//! [`SyntheticEngine`] fabricates frames for soak tests and the
//! integration suite.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ProcessorConfig;
use crate::error::{ProcessorError, Result};

/// Frame metadata handed to the per-frame callback.
///
/// `source_id` is the engine-internal 0-based index into the configured
/// stream list; the sink remaps it before anything reaches the wire.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub source_id: usize,
    pub frame_id: u64,
    pub timestamp: DateTime<Utc>,
}

/// One detected object, in pixel space of the source frame.
#[derive(Debug, Clone)]
pub struct PredictedObject {
    pub class_name: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub tracker_id: Option<i64>,
}

/// Inference output for one frame.
#[derive(Debug, Clone)]
pub struct FramePrediction {
    pub objects: Vec<PredictedObject>,
    pub inference_time: Duration,
}

/// Callback invoked by the engine at each inferred frame (or batch of
/// frames, one entry per source). Entries may be `None` for sources that
/// produced nothing in this round.
pub trait PredictionConsumer: Send + Sync {
    fn on_predictions(
        &self,
        predictions: &[Option<FramePrediction>],
        frames: &[Option<VideoFrame>],
    );
}

/// Lifecycle contract the core drives an engine through.
///
/// `start` blocks the calling thread until stream connections are
/// established or permanently refused; the manager bridges it with
/// `spawn_blocking`. `terminated` is the join signal: the receiver flips
/// to `true` exactly when the engine terminates.
pub trait StreamEngine: Send + Sync {
    fn start(&self) -> Result<()>;
    /// Stop buffering new frames. Frames already queued may still reach
    /// the callback; the sink gate is what silences the wire.
    fn pause_streams(&self) -> Result<()>;
    fn resume_streams(&self) -> Result<()>;
    fn terminate(&self);
    fn terminated(&self) -> watch::Receiver<bool>;
    fn metrics_probe(&self) -> Option<Arc<dyn MetricsProbe>>;
}

/// Creates engines from the current config. The factory honours
/// `enable_watchdog`: the returned engine carries a probe iff enabled.
pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        config: &ProcessorConfig,
        consumer: Arc<dyn PredictionConsumer>,
    ) -> Result<Arc<dyn StreamEngine>>;
}

// ──────────────── metrics probe ───────────────────────────────────────────

/// Per-source latency breakdown, in seconds.
#[derive(Debug, Clone)]
pub struct LatencyReport {
    pub source_id: usize,
    pub frame_decoding_latency: Option<f64>,
    pub inference_latency: Option<f64>,
    pub e2e_latency: Option<f64>,
}

/// Per-source stream metadata.
#[derive(Debug, Clone)]
pub struct SourceMetadata {
    pub source_id: usize,
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl UpdateSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSeverity::Debug => "DEBUG",
            UpdateSeverity::Info => "INFO",
            UpdateSeverity::Warning => "WARNING",
            UpdateSeverity::Error => "ERROR",
        }
    }
}

/// Severity-classified event from a video source.
#[derive(Debug, Clone)]
pub struct SourceStatusUpdate {
    pub source_id: usize,
    pub severity: UpdateSeverity,
    pub message: String,
}

/// Snapshot returned by a [`MetricsProbe`].
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    /// Inferences per second across all sources.
    pub inference_throughput: f64,
    pub latency_reports: Vec<LatencyReport>,
    pub sources_metadata: Vec<SourceMetadata>,
    pub status_updates: Vec<SourceStatusUpdate>,
}

/// Engine-side metrics sampler.
pub trait MetricsProbe: Send + Sync {
    fn report(&self) -> ProbeReport;
}

// ──────────────── synthetic engine ────────────────────────────────────────

/// Frame generator standing in for a real inference backend.
///
/// Spawns one worker thread per configured source, each emitting a frame
/// with a single fabricated detection at the configured rate (`max_fps`,
/// default 10). Honours the full engine lifecycle, which makes it usable
/// both for soak-testing the bus/control path (`run --synthetic`) and in
/// the integration tests.
pub struct SyntheticEngine {
    consumer: Arc<dyn PredictionConsumer>,
    sources: usize,
    frame_interval: Duration,
    started: AtomicBool,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    terminated_tx: watch::Sender<bool>,
    terminated_rx: watch::Receiver<bool>,
    probe: Option<Arc<SyntheticProbe>>,
}

impl SyntheticEngine {
    pub fn new(config: &ProcessorConfig, consumer: Arc<dyn PredictionConsumer>) -> Self {
        let fps = config.max_fps.unwrap_or(10.0);
        let (terminated_tx, terminated_rx) = watch::channel(false);
        let sources = config.stream_uris.len();
        let probe = config
            .enable_watchdog
            .then(|| Arc::new(SyntheticProbe::new(sources, fps)));
        SyntheticEngine {
            consumer,
            sources,
            frame_interval: Duration::from_secs_f64(1.0 / fps),
            started: AtomicBool::new(false),
            paused: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            terminated_tx,
            terminated_rx,
            probe,
        }
    }

    fn spawn_source_worker(&self, source_id: usize) {
        let consumer = self.consumer.clone();
        let paused = self.paused.clone();
        let stop = self.stop.clone();
        let probe = self.probe.clone();
        let interval = self.frame_interval;
        let builder =
            std::thread::Builder::new().name(format!("synthetic-source-{source_id}"));
        let _ = builder.spawn(move || {
            let mut frame_id: u64 = 0;
            while !stop.load(Ordering::SeqCst) {
                if !paused.load(Ordering::SeqCst) {
                    let frame = VideoFrame {
                        source_id,
                        frame_id,
                        timestamp: Utc::now(),
                    };
                    let prediction = FramePrediction {
                        objects: vec![PredictedObject {
                            class_name: "person".into(),
                            confidence: 0.9,
                            x: 100.0,
                            y: 150.0,
                            width: 80.0,
                            height: 200.0,
                            tracker_id: None,
                        }],
                        inference_time: Duration::from_millis(5),
                    };
                    consumer.on_predictions(&[Some(prediction)], &[Some(frame)]);
                    if let Some(probe) = &probe {
                        probe.record_frame(source_id);
                    }
                    frame_id += 1;
                }
                std::thread::sleep(interval);
            }
            debug!(source = source_id, "Synthetic source worker exited");
        });
    }
}

impl StreamEngine for SyntheticEngine {
    fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProcessorError::Engine("Engine already started".into()));
        }
        if *self.terminated_rx.borrow() {
            return Err(ProcessorError::Engine("Engine already terminated".into()));
        }
        for source_id in 0..self.sources {
            self.spawn_source_worker(source_id);
        }
        info!(sources = self.sources, "Synthetic engine started");
        Ok(())
    }

    fn pause_streams(&self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn resume_streams(&self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.terminated_tx.send(true);
    }

    fn terminated(&self) -> watch::Receiver<bool> {
        self.terminated_rx.clone()
    }

    fn metrics_probe(&self) -> Option<Arc<dyn MetricsProbe>> {
        self.probe
            .as_ref()
            .map(|p| p.clone() as Arc<dyn MetricsProbe>)
    }
}

/// Factory for [`SyntheticEngine`].
pub struct SyntheticEngineFactory;

impl EngineFactory for SyntheticEngineFactory {
    fn create(
        &self,
        config: &ProcessorConfig,
        consumer: Arc<dyn PredictionConsumer>,
    ) -> Result<Arc<dyn StreamEngine>> {
        Ok(Arc::new(SyntheticEngine::new(config, consumer)))
    }
}

/// Probe fed by the synthetic workers' real frame counters.
pub struct SyntheticProbe {
    started_at: Instant,
    per_source: Vec<AtomicU64>,
    nominal_fps: f64,
}

impl SyntheticProbe {
    fn new(sources: usize, nominal_fps: f64) -> Self {
        SyntheticProbe {
            started_at: Instant::now(),
            per_source: (0..sources).map(|_| AtomicU64::new(0)).collect(),
            nominal_fps,
        }
    }

    fn record_frame(&self, source_id: usize) {
        if let Some(counter) = self.per_source.get(source_id) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl MetricsProbe for SyntheticProbe {
    fn report(&self) -> ProbeReport {
        let elapsed = self.started_at.elapsed().as_secs_f64().max(f64::EPSILON);
        let total: u64 = self
            .per_source
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum();
        ProbeReport {
            inference_throughput: total as f64 / elapsed,
            latency_reports: (0..self.per_source.len())
                .map(|source_id| LatencyReport {
                    source_id,
                    frame_decoding_latency: Some(0.001),
                    inference_latency: Some(0.005),
                    e2e_latency: Some(0.006),
                })
                .collect(),
            sources_metadata: (0..self.per_source.len())
                .map(|source_id| SourceMetadata {
                    source_id,
                    fps: Some(self.nominal_fps),
                    width: Some(640),
                    height: Some(480),
                })
                .collect(),
            status_updates: Vec::new(),
        }
    }
}
