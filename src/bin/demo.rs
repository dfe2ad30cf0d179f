//! demo - scripted walkthrough of the estimation pipeline
//!
//! Runs the full session against the synthetic camera, a scripted detector,
//! and a scripted reasoning service. No hardware or network is touched.
//! Demonstrates:
//! - slider fallback while nothing is detected
//! - detection taking authority over the slider
//! - unit switching on the displayed volume
//! - facing-mode switching (old tracks stopped exactly once)
//! - silent confidence degradation when the service fails

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};

use glass_gauge::{
    ConfidenceQuery, ConfidenceResult, ConfidenceService, FacingMode, GaugeConfig, RawDetection,
    Session, Snapshot, StubBackend, VolumeUnit,
};

/// Succeeds on the first call, fails afterwards.
struct FlakyService {
    calls: Mutex<u32>,
}

impl ConfidenceService for FlakyService {
    fn assess(&self, query: &ConfidenceQuery) -> Result<ConfidenceResult> {
        let mut calls = self.calls.lock().map_err(|_| anyhow!("lock poisoned"))?;
        *calls += 1;
        if *calls == 1 {
            Ok(ConfidenceResult {
                score: 0.84,
                reasoning: format!(
                    "{} at {:.0} ml is consistent with the {}",
                    query.water_line_consistency, query.volume_estimate, query.glass_shape
                ),
            })
        } else {
            Err(anyhow!("reasoning service unavailable"))
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut config = GaugeConfig::default();
    config.poll_interval = Duration::from_millis(100);

    // A glass filling the middle band of a 640x480 frame, half full:
    // normalized box [0.25, 0.1, 0.75, 0.9] -> level 50%.
    let detector = StubBackend::with_detections(vec![RawDetection {
        label: "cup".to_string(),
        score: 0.92,
        x: 160.0,
        y: 48.0,
        w: 320.0,
        h: 384.0,
    }]);

    let mut session = Session::new(
        config,
        Box::new(detector),
        Box::new(FlakyService {
            calls: Mutex::new(0),
        }),
    );

    stage("1. start: camera acquired, nothing detected yet");
    session.start()?;
    session.set_simulated_level(25.0)?;
    show(&session.snapshot()?);

    stage("2. slider moves while detection is off");
    session.set_simulated_level(80.0)?;
    show(&session.snapshot()?);

    stage("3. detection on: the box overrides the slider");
    session.set_detection_enabled(true)?;
    settle();
    show(&session.snapshot()?);

    stage("4. display unit switches to ounces");
    session.set_unit(VolumeUnit::Ounces)?;
    show(&session.snapshot()?);

    stage("5. facing mode switches; old tracks stop once");
    session.set_facing_mode(FacingMode::User)?;
    settle();
    show(&session.snapshot()?);
    let stats = session.stats()?;
    eprintln!(
        "   track stops so far: {} (exactly one per replaced stream)",
        stats.track_stops
    );

    stage("6. confidence service now fails: score degrades to none");
    // force a detection-set change so a new request is issued
    session.set_detection_enabled(false)?;
    session.set_detection_enabled(true)?;
    settle();
    show(&session.snapshot()?);

    stage("7. detection off again: slider is authoritative");
    session.set_detection_enabled(false)?;
    show(&session.snapshot()?);

    session.stop()?;
    eprintln!("demo complete");
    Ok(())
}

fn stage(title: &str) {
    eprintln!("==> {}", title);
}

fn show(snapshot: &Snapshot) {
    let confidence = match &snapshot.confidence {
        Some(result) => format!("{:.2} ({})", result.score, result.reasoning),
        None => "none".to_string(),
    };
    eprintln!(
        "   level {:>5.1}%  volume {:>7.2} {}  detections {}  confidence {}",
        snapshot.level_percent,
        snapshot.display_volume,
        snapshot.unit,
        snapshot.detections.len(),
        confidence,
    );
}

/// Give the poller and confidence worker a few ticks to settle.
fn settle() {
    std::thread::sleep(Duration::from_millis(350));
}
