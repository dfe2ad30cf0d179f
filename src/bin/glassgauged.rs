//! glassgauged - live glass liquid-level estimation daemon
//!
//! This daemon:
//! 1. Loads configuration (file + environment)
//! 2. Warms the selected detector backend
//! 3. Acquires the camera stream for the current facing mode
//! 4. Polls detection on a fixed cadence and derives level/volume readings
//! 5. Requests best-effort confidence scores for each new reading
//! 6. Logs readings and health until interrupted

use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

use glass_gauge::{
    ConfidenceService, DetectorBackend, GaugeConfig, HttpConfidenceService, LuminanceBackend,
    Session, StubBackend, UnconfiguredService,
};

#[derive(Parser, Debug)]
#[command(name = "glassgauged", about = "Live drinking-glass volume estimation")]
struct Args {
    /// Detector backend: luminance | stub (| tract with backend-tract)
    #[arg(long, env = "GAUGE_DETECTOR", default_value = "luminance")]
    detector: String,

    /// ONNX model path for the tract backend
    #[cfg(feature = "backend-tract")]
    #[arg(long, env = "GAUGE_MODEL")]
    model: Option<String>,

    /// Seconds between reading log lines
    #[arg(long, default_value_t = 2)]
    report_secs: u64,

    /// Reading display: auto | plain | live
    #[arg(long)]
    ui: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = GaugeConfig::load()?;
    let detector = build_detector(&args, &config)?;
    let service = build_confidence_service(&config)?;

    log::info!(
        "glassgauged starting: capacity={}ml interval={:?} labels={:?}",
        config.capacity_ml,
        config.poll_interval,
        config.detector.labels
    );

    let mut session = Session::new(config, detector, service);
    session.start()?;
    session.set_detection_enabled(true)?;

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("failed to install signal handler: {}", e))?;

    let display = glass_gauge::ui::ReadingLine::new(
        glass_gauge::ui::UiMode::from_flag(args.ui.as_deref()),
        std::io::stderr().is_terminal(),
    );

    let report_interval = Duration::from_secs(args.report_secs.max(1));
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(report_interval);

        let snapshot = session.snapshot()?;
        let confidence = match &snapshot.confidence {
            Some(result) => format!("{:.2}", result.score),
            None => "-".to_string(),
        };
        display.update(format!(
            "level {:>5.1}%  volume {:>7.1} {}  detections {}  confidence {}",
            snapshot.level_percent,
            snapshot.display_volume,
            snapshot.unit,
            snapshot.detections.len(),
            confidence,
        ));
        if let Some(notice) = &snapshot.notice {
            log::warn!("notice: {}", notice.message);
        }

        let stats = session.stats()?;
        log::debug!(
            "health: polls={} failed={} frames={}",
            stats.polls_completed,
            stats.polls_failed,
            stats
                .camera
                .map(|camera| camera.frames_captured)
                .unwrap_or(0)
        );
    }

    display.finish();
    log::info!("shutting down");
    session.stop()?;
    Ok(())
}

#[cfg_attr(not(feature = "backend-tract"), allow(unused_variables))]
fn build_detector(args: &Args, config: &GaugeConfig) -> Result<Box<dyn DetectorBackend>> {
    match args.detector.as_str() {
        "luminance" => Ok(Box::new(LuminanceBackend::new())),
        "stub" => Ok(Box::new(StubBackend::new())),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let model = args
                .model
                .as_deref()
                .ok_or_else(|| anyhow!("--model is required for the tract backend"))?;
            Ok(Box::new(glass_gauge::TractBackend::new(
                model,
                config.camera.width,
                config.camera.height,
            )?))
        }
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}

fn build_confidence_service(config: &GaugeConfig) -> Result<Box<dyn ConfidenceService>> {
    match &config.confidence.endpoint {
        Some(endpoint) => Ok(Box::new(HttpConfidenceService::new(
            endpoint,
            config.confidence.timeout,
        )?)),
        None => {
            log::info!("no confidence endpoint configured; scores disabled");
            Ok(Box::new(UnconfiguredService))
        }
    }
}
