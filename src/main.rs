// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! NVR stream processor.
//!
//! Usage:
//!   nvr-processor run --n 6 --mqtt-host localhost
//!   nvr-processor run --config processor.toml
//!
//! The binary drives the built-in synthetic engine; production
//! deployments plug a real inference backend through `EngineFactory`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nvr_processor::bus::MqttConnector;
use nvr_processor::config::ProcessorConfig;
use nvr_processor::engine::SyntheticEngineFactory;
use nvr_processor::processor::ProcessorCore;

#[derive(Parser)]
#[command(name = "nvr-processor", about = "Headless NVR stream processor", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the stream processor until stopped.
    Run {
        /// TOML config file. When set, the remaining flags are ignored.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of streams, synthesised from --stream-server.
        #[arg(short, long, default_value_t = 6)]
        n: u32,
        /// Inference model ID.
        #[arg(long, default_value = "yolov8x-640")]
        model: String,
        /// MQTT broker host.
        #[arg(long, default_value = "localhost")]
        mqtt_host: String,
        /// MQTT broker port.
        #[arg(long, default_value_t = 1883)]
        mqtt_port: u16,
        /// RTSP server URL (default: $STREAM_SERVER or rtsp://localhost:8554).
        #[arg(long)]
        stream_server: Option<String>,
        /// Instance identity (default: random).
        #[arg(long)]
        instance_id: Option<String>,
        /// Maximum FPS limiter.
        #[arg(long)]
        max_fps: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            n,
            model,
            mqtt_host,
            mqtt_port,
            stream_server,
            instance_id,
            max_fps,
        } => {
            let config = match config {
                Some(path) => ProcessorConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => {
                    let server = stream_server
                        .or_else(|| std::env::var("STREAM_SERVER").ok())
                        .unwrap_or_else(|| "rtsp://localhost:8554".to_string());
                    let uris = (0..n)
                        .map(|i| format!("{}/{}", server.trim_end_matches('/'), i))
                        .collect();
                    let mut cfg =
                        ProcessorConfig::new(uris).context("building configuration")?;
                    cfg.stream_server = server;
                    cfg.model_id = model;
                    cfg.mqtt.host = mqtt_host;
                    cfg.mqtt.port = mqtt_port;
                    cfg.max_fps = max_fps;
                    if let Some(id) = instance_id {
                        cfg.instance_id = id;
                    }
                    cfg.validate().context("validating configuration")?;
                    cfg
                }
            };

            run(config).await
        }
    }
}

async fn run(config: ProcessorConfig) -> anyhow::Result<()> {
    let core = ProcessorCore::new(
        config,
        Arc::new(MqttConnector),
        Arc::new(SyntheticEngineFactory),
    );

    // SIGINT/SIGTERM unwind the join loop through terminate().
    let signal_core = core.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received CTRL+C, shutting down…");
                signal_core.terminate();
            }
            Err(e) => error!(error = %e, "Signal error"),
        }
    });

    core.start().await.context("starting processor")?;
    core.join().await;
    Ok(())
}
