//! blindspotd - blind-spot detection daemon
//!
//! This daemon:
//! 1. Loads configuration (file + environment)
//! 2. Builds the detector backend and one session per camera
//! 3. Connects the detection sink (MQTT or log) and the alert sink
//! 4. Runs the pipeline until Ctrl-C / SIGTERM or the cycle limit

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use blindspot_kernel::{
    source_for_device, AlertKind, AlertSink, BackendRegistry, BellAlert, BlindspotConfig,
    CameraSession, CommandAlert, DetectionFilter, DetectionSink, LogAlert, LogSink, MqttSink,
    Orchestrator, Publisher, SharedDetector, ShutdownSignal, SinkKind, StubBackend,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-camera blind-spot detection daemon")]
struct Args {
    /// Configuration file (.toml or .json).
    #[arg(long, env = "BLINDSPOT_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many cycles (default: run until interrupted).
    #[arg(long, env = "BLINDSPOT_MAX_CYCLES")]
    cycles: Option<u64>,

    /// Override the configured detection sink (mqtt|log).
    #[arg(long, value_name = "SINK")]
    sink: Option<String>,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(ui::UiMode::parse(&args.ui));

    let mut cfg = {
        let _stage = ui.stage("Loading configuration");
        BlindspotConfig::load(args.config.as_deref())?
    };
    if let Some(cycles) = args.cycles {
        cfg.pipeline.max_cycles = Some(cycles);
    }
    if let Some(sink) = args.sink.as_deref() {
        cfg.sink = match sink {
            "mqtt" => SinkKind::Mqtt,
            "log" => SinkKind::Log,
            other => anyhow::bail!("unknown sink '{}': expected 'mqtt' or 'log'", other),
        };
    }

    let detector = {
        let _stage = ui.stage("Loading detector");
        build_detector(&cfg)?
    };
    let sessions = {
        let _stage = ui.stage("Preparing cameras");
        build_sessions(&cfg)?
    };
    let publisher = {
        let _stage = ui.stage("Connecting detection sink");
        Publisher::new(build_sink(&cfg)?, cfg.publisher)
    };
    let alert = build_alert(&cfg)?;

    let mut orchestrator = Orchestrator::new(
        sessions,
        detector,
        DetectionFilter::new(cfg.filter_settings()),
        cfg.zone_classifier(),
        publisher,
        alert,
        cfg.pipeline.clone(),
    );

    let shutdown = ShutdownSignal::new();
    let handler = shutdown.clone();
    ctrlc::set_handler(move || handler.trigger()).context("failed to install signal handler")?;

    let result = orchestrator.run(&shutdown);
    // Startup failures return before Running; make sure the sink is closed.
    orchestrator.stop();
    ui.cameras(&orchestrator.camera_status());
    result?;

    let stats = orchestrator.stats();
    let published = orchestrator.publisher_stats();
    log::info!(
        "blindspotd exiting: {} cycles, {} detections, {} alerts, {} batches published, {} dropped",
        stats.total_cycles,
        stats.total_detections,
        stats.total_alerts,
        published.batches_delivered,
        published.batches_dropped
    );
    Ok(())
}

fn build_detector(cfg: &BlindspotConfig) -> Result<SharedDetector> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new(cfg.detection.stub_class_id));

    #[cfg(feature = "backend-tract")]
    {
        if let Some(path) = &cfg.detection.model_path {
            let backend = blindspot_kernel::TractBackend::new(
                path,
                cfg.detection.model_input_width,
                cfg.detection.model_input_height,
            )
            .with_context(|| format!("failed to load model {}", path.display()))?;
            registry.register(backend);
            registry.set_default("tract")?;
        }
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        if let Some(path) = &cfg.detection.model_path {
            log::warn!(
                "model {} ignored: built without the backend-tract feature",
                path.display()
            );
        }
    }

    registry.warm_up_all().context("detector warm-up failed")?;
    let detector = registry.select(cfg.detection.detector.as_deref())?;
    {
        let backend = detector
            .lock()
            .map_err(|_| anyhow::anyhow!("detector lock poisoned"))?;
        log::info!(
            "detector backend: {} (available: {})",
            backend.name(),
            registry.list().join(", ")
        );
    }
    Ok(detector)
}

fn build_sessions(cfg: &BlindspotConfig) -> Result<Vec<CameraSession>> {
    cfg.cameras
        .iter()
        .map(|camera| {
            let source = source_for_device(&camera.identity.device_id)
                .with_context(|| format!("camera '{}'", camera.identity.zone))?;
            Ok(CameraSession::new(
                camera.identity.clone(),
                source,
                cfg.capture,
                cfg.session,
            ))
        })
        .collect()
}

fn build_sink(cfg: &BlindspotConfig) -> Result<Box<dyn DetectionSink>> {
    match cfg.sink {
        SinkKind::Mqtt => Ok(Box::new(
            MqttSink::connect(&cfg.mqtt).context("failed to set up MQTT sink")?,
        )),
        SinkKind::Log => Ok(Box::new(LogSink)),
    }
}

fn build_alert(cfg: &BlindspotConfig) -> Result<Box<dyn AlertSink>> {
    Ok(match cfg.alert.kind {
        AlertKind::Log => Box::new(LogAlert),
        AlertKind::Bell => Box::new(BellAlert),
        AlertKind::Command => Box::new(CommandAlert::new(&cfg.alert.command)?),
    })
}
