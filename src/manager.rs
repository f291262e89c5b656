// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Engine lifecycle manager.
//!
//! Owns the single current [`StreamEngine`] and drives it through
//! `absent → created → started ⇄ paused → terminated`, including the
//! two-level pause protocol (sink gate first, engine buffering second)
//! and the coordinated restart used by the reconfiguration commands.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::SharedConfig;
use crate::engine::{EngineFactory, MetricsProbe, PredictionConsumer, StreamEngine};
use crate::error::{ProcessorError, Result};
use crate::processor::Coordinator;
use crate::sink::DetectionSink;

/// Where the managed engine slot currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Absent,
    Created,
    Started,
    Paused,
    Terminated,
}

pub struct EngineManager {
    factory: Arc<dyn EngineFactory>,
    sink: Arc<DetectionSink>,
    config: SharedConfig,
    engine: RwLock<Option<Arc<dyn StreamEngine>>>,
    state: Mutex<EngineState>,
}

/// Clears the coordination flag on every exit path, including panics.
struct RestartFlagGuard<'a>(&'a Coordinator);

impl Drop for RestartFlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set_restarting(false);
    }
}

impl EngineManager {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        sink: Arc<DetectionSink>,
        config: SharedConfig,
    ) -> Arc<Self> {
        Arc::new(EngineManager {
            factory,
            sink,
            config,
            engine: RwLock::new(None),
            state: Mutex::new(EngineState::Absent),
        })
    }

    /// Create an engine from the current config without starting it.
    pub fn create(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !matches!(*state, EngineState::Absent | EngineState::Terminated) {
            return Err(ProcessorError::Engine(format!(
                "Cannot create engine from state {:?}",
                *state
            )));
        }
        let engine = {
            let config = self.config.read();
            self.factory
                .create(&config, self.sink.clone() as Arc<dyn PredictionConsumer>)?
        };
        *self.engine.write() = Some(engine);
        *state = EngineState::Created;
        info!("Engine created (not started yet)");
        Ok(())
    }

    /// Start the engine. Blocks (off the async threads) until stream
    /// connections are established or permanently refused.
    pub async fn start(&self) -> Result<()> {
        let engine = {
            let state = self.state.lock();
            if *state != EngineState::Created {
                return Err(ProcessorError::Engine(format!(
                    "Cannot start engine from state {:?}",
                    *state
                )));
            }
            self.engine
                .read()
                .clone()
                .ok_or_else(|| ProcessorError::Engine("No engine to start".into()))?
        };
        tokio::task::spawn_blocking(move || engine.start())
            .await
            .map_err(|e| ProcessorError::Engine(format!("Engine start task failed: {e}")))??;
        *self.state.lock() = EngineState::Started;
        info!("Engine started");
        Ok(())
    }

    /// Two-level pause: close the sink gate first so publication stops at
    /// this call's return, then stop the engine buffering new frames.
    /// Frames the engine drains afterwards hit the closed gate.
    pub fn pause(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != EngineState::Started {
            warn!(state = ?*state, "Cannot pause: engine not running");
            return Ok(());
        }
        self.sink.pause();
        if let Some(engine) = self.engine.read().as_ref() {
            engine.pause_streams()?;
        }
        *state = EngineState::Paused;
        info!("Engine paused");
        Ok(())
    }

    /// Strict inverse of `pause`: engine buffering back on, then the gate.
    pub fn resume(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != EngineState::Paused {
            warn!(state = ?*state, "Cannot resume: engine not paused");
            return Ok(());
        }
        if let Some(engine) = self.engine.read().as_ref() {
            engine.resume_streams()?;
        }
        self.sink.resume();
        *state = EngineState::Started;
        info!("Engine resumed");
        Ok(())
    }

    /// Terminate the current engine, if any. Idempotent.
    pub fn terminate(&self) {
        let engine = self.engine.write().take();
        if let Some(engine) = engine {
            engine.terminate();
            *self.state.lock() = EngineState::Terminated;
            info!("Engine terminated");
        }
    }

    /// Terminate, recreate, and start a fresh engine from the current
    /// config (reconfiguration handlers mutate the shared config before
    /// calling this). The coordinator's restart flag is set before
    /// teardown and cleared on every exit path so the join loop can tell
    /// a restart from a shutdown.
    pub async fn restart(&self, coordinator: &Coordinator) -> Result<()> {
        coordinator.set_restarting(true);
        let _flag = RestartFlagGuard(coordinator);
        self.restart_inner().await
    }

    async fn restart_inner(&self) -> Result<()> {
        info!("Restarting engine");
        self.terminate();
        self.create()?;
        self.start().await?;
        // A restart always lands in the running state.
        self.sink.resume();
        info!("Engine restarted");
        Ok(())
    }

    pub fn current_engine(&self) -> Option<Arc<dyn StreamEngine>> {
        self.engine.read().clone()
    }

    pub fn metrics_probe(&self) -> Option<Arc<dyn MetricsProbe>> {
        self.engine.read().as_ref().and_then(|e| e.metrics_probe())
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn is_paused(&self) -> bool {
        self.state() == EngineState::Paused
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Started
    }
}
