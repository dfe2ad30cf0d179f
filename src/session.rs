//! Session orchestration.
//!
//! A `Session` owns every mutable piece of the pipeline: the camera stream,
//! the detector, the poller thread, the confidence worker, and the state the
//! display layer reads. Resources have an explicit `start()`/`stop()`
//! lifecycle; nothing is ambient.
//!
//! Authority invariant: while `detections` is non-empty, the displayed level
//! derives from the first detection's box; while empty, the simulation
//! slider is authoritative. Readers always see a fully-replaced detection
//! list, never a partial update.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use crate::camera::{CameraStats, CameraStream, FacingMode};
use crate::config::GaugeConfig;
use crate::confidence::{
    describe_water_line, ConfidenceQuery, ConfidenceResult, ConfidenceService, ConfidenceWorker,
};
use crate::detect::{normalize_detections, DetectedObject, DetectorBackend, LabelFilter};
use crate::estimate::{convert_volume, liquid_level_percent, volume_ml, VolumeUnit};
use crate::poller::DetectionPoller;

/// Camera grant state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PermissionStatus {
    #[default]
    Unknown,
    Granted,
    Denied,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    PermissionDenied,
    ModelUnavailable,
    DetectionFailed,
}

/// User-visible degradation notice. Persistent notices (permission, model)
/// outlive individual polls; transient ones clear on the next success.
#[derive(Clone, Debug)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub persistent: bool,
}

/// The mutable fields a session aggregates.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub permission: PermissionStatus,
    pub detection_enabled: bool,
    pub facing: FacingMode,
    pub unit: VolumeUnit,
    /// Slider value in [0, 100]; authoritative only while no detections.
    pub simulated_level: f64,
    pub detections: Vec<DetectedObject>,
    pub confidence: Option<ConfidenceResult>,
    pub notice: Option<Notice>,
}

impl SessionState {
    fn new(config: &GaugeConfig) -> Self {
        Self {
            permission: PermissionStatus::Unknown,
            detection_enabled: false,
            facing: FacingMode::default(),
            unit: config.unit,
            simulated_level: 50.0,
            detections: Vec::new(),
            confidence: None,
            notice: None,
        }
    }
}

/// Immutable view handed to the display layer, with derived readings.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub permission: PermissionStatus,
    pub detection_enabled: bool,
    pub facing: FacingMode,
    pub unit: VolumeUnit,
    pub simulated_level: f64,
    pub detections: Vec<DetectedObject>,
    pub confidence: Option<ConfidenceResult>,
    pub notice: Option<Notice>,
    /// Level used for display: detection-derived when available, slider
    /// otherwise.
    pub level_percent: f64,
    pub volume_ml: f64,
    /// Volume converted to the display unit.
    pub display_volume: f64,
}

/// Health counters for the daemon's periodic log line.
#[derive(Clone, Debug)]
pub struct SessionStats {
    pub polls_completed: u64,
    pub polls_failed: u64,
    pub track_stops: u32,
    pub camera: Option<CameraStats>,
}

enum ConfidenceAction {
    Request(ConfidenceQuery),
    Invalidate,
    Nothing,
}

/// Shared pipeline internals; the poller thread holds a clone.
pub(crate) struct SessionCore {
    config: GaugeConfig,
    filter: LabelFilter,
    state: Arc<Mutex<SessionState>>,
    camera: Mutex<Option<CameraStream>>,
    detector: Mutex<Box<dyn DetectorBackend>>,
    detector_ready: AtomicBool,
    confidence: Mutex<Option<ConfidenceWorker>>,
    polls_completed: AtomicU64,
    polls_failed: AtomicU64,
    track_stops: AtomicU32,
}

impl SessionCore {
    fn lock_state(&self) -> Result<MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("session state lock poisoned"))
    }

    fn lock_camera(&self) -> Result<MutexGuard<'_, Option<CameraStream>>> {
        self.camera
            .lock()
            .map_err(|_| anyhow!("camera lock poisoned"))
    }

    fn lock_detector(&self) -> Result<MutexGuard<'_, Box<dyn DetectorBackend>>> {
        self.detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))
    }

    /// One full poll: gate, capture, detect, filter, publish.
    ///
    /// Runs inline on the poller thread, so polls never overlap; a slow
    /// detector stretches the period instead of stacking calls.
    pub(crate) fn poll_once(&self) {
        {
            let Ok(state) = self.state.lock() else { return };
            if !state.detection_enabled || state.permission != PermissionStatus::Granted {
                return;
            }
        }
        if !self.detector_ready.load(Ordering::SeqCst) {
            return;
        }

        let frame = {
            let Ok(mut camera) = self.camera.lock() else { return };
            let Some(stream) = camera.as_mut() else { return };
            match stream.capture() {
                Ok(frame) => frame,
                Err(err) => {
                    drop(camera);
                    self.poll_failed(&format!("frame capture failed: {}", err));
                    return;
                }
            }
        };

        let raw = {
            let Ok(mut detector) = self.detector.lock() else { return };
            match detector.detect(&frame.pixels, frame.width, frame.height) {
                Ok(raw) => raw,
                Err(err) => {
                    drop(detector);
                    self.poll_failed(&format!("detector call failed: {}", err));
                    return;
                }
            }
        };

        let detections = normalize_detections(raw, frame.width, frame.height, &self.filter);
        self.polls_completed.fetch_add(1, Ordering::SeqCst);
        log::debug!("poll completed: {} detection(s)", detections.len());
        self.clear_transient_notice();
        self.publish_detections(detections);
    }

    /// A single failed poll is recoverable: detections reset to empty for
    /// this tick and the loop keeps running.
    fn poll_failed(&self, message: &str) {
        self.polls_failed.fetch_add(1, Ordering::SeqCst);
        log::warn!("{}", message);
        self.set_notice(NoticeKind::DetectionFailed, message, false);
        self.publish_detections(Vec::new());
    }

    /// Replace the detection list wholesale and drive the confidence rules:
    /// a changed non-empty set issues one request; an empty set publishes
    /// `None` immediately and invalidates anything in flight.
    pub(crate) fn publish_detections(&self, mut detections: Vec<DetectedObject>) {
        let action = {
            let Ok(mut state) = self.state.lock() else { return };
            // a poll that raced a disable or a revocation is stale; its
            // results degrade to an empty set
            if !state.detection_enabled || state.permission != PermissionStatus::Granted {
                detections.clear();
            }
            let changed = state.detections != detections;
            state.detections = detections;
            if !state.detections.is_empty() {
                if changed {
                    let level = liquid_level_percent(&state.detections[0].bbox);
                    let volume = volume_ml(level, self.config.capacity_ml);
                    ConfidenceAction::Request(ConfidenceQuery {
                        glass_shape: self.config.confidence.glass_shape.clone(),
                        water_line_consistency: describe_water_line(level),
                        volume_estimate: volume,
                    })
                } else {
                    ConfidenceAction::Nothing
                }
            } else {
                let had_confidence = state.confidence.take().is_some();
                if changed || had_confidence {
                    ConfidenceAction::Invalidate
                } else {
                    ConfidenceAction::Nothing
                }
            }
        };

        match action {
            ConfidenceAction::Request(query) => {
                if let Ok(worker) = self.confidence.lock() {
                    if let Some(worker) = worker.as_ref() {
                        worker.request(query);
                    }
                }
            }
            ConfidenceAction::Invalidate => self.invalidate_confidence(),
            ConfidenceAction::Nothing => {}
        }
    }

    fn invalidate_confidence(&self) {
        if let Ok(worker) = self.confidence.lock() {
            if let Some(worker) = worker.as_ref() {
                worker.invalidate();
            }
        }
    }

    fn set_notice(&self, kind: NoticeKind, message: &str, persistent: bool) {
        let Ok(mut state) = self.state.lock() else { return };
        // permission/model notices outrank per-tick noise
        if let Some(existing) = &state.notice {
            if existing.persistent && !persistent {
                return;
            }
        }
        state.notice = Some(Notice {
            kind,
            message: message.to_string(),
            persistent,
        });
    }

    fn clear_transient_notice(&self) {
        let Ok(mut state) = self.state.lock() else { return };
        if state.notice.as_ref().is_some_and(|notice| !notice.persistent) {
            state.notice = None;
        }
    }

    /// Open the camera for a facing mode; success grants permission, failure
    /// denies it and posts the persistent notice.
    fn acquire_camera(&self, facing: FacingMode) -> Result<()> {
        match CameraStream::open(&self.config.camera, facing) {
            Ok(stream) => {
                {
                    let mut camera = self.lock_camera()?;
                    *camera = Some(stream);
                }
                let mut state = self.lock_state()?;
                state.permission = PermissionStatus::Granted;
                if state
                    .notice
                    .as_ref()
                    .is_some_and(|notice| notice.kind == NoticeKind::PermissionDenied)
                {
                    state.notice = None;
                }
                Ok(())
            }
            Err(err) => {
                {
                    let mut camera = self.lock_camera()?;
                    *camera = None;
                }
                {
                    let mut state = self.lock_state()?;
                    state.permission = PermissionStatus::Denied;
                    state.notice = Some(Notice {
                        kind: NoticeKind::PermissionDenied,
                        message: format!("camera access denied: {}", err),
                        persistent: true,
                    });
                }
                Err(err)
            }
        }
    }

    /// Stop the current stream's tracks (once) and release the slot.
    fn release_camera(&self) -> Result<()> {
        let mut camera = self.lock_camera()?;
        if let Some(stream) = camera.as_mut() {
            stream.stop();
            self.track_stops.fetch_add(1, Ordering::SeqCst);
        }
        *camera = None;
        Ok(())
    }
}

/// Owning handle for one live estimation session.
pub struct Session {
    core: Arc<SessionCore>,
    poller: Option<DetectionPoller>,
}

impl Session {
    pub fn new(
        config: GaugeConfig,
        detector: Box<dyn DetectorBackend>,
        service: Box<dyn ConfidenceService>,
    ) -> Self {
        let state = Arc::new(Mutex::new(SessionState::new(&config)));
        let filter = LabelFilter::new(&config.detector.labels, config.detector.min_score);

        let state_sink = state.clone();
        let worker = ConfidenceWorker::spawn(
            service,
            Box::new(move |outcome| {
                let Ok(mut state) = state_sink.lock() else { return };
                state.confidence = outcome;
            }),
        );

        let core = Arc::new(SessionCore {
            config,
            filter,
            state,
            camera: Mutex::new(None),
            detector: Mutex::new(detector),
            detector_ready: AtomicBool::new(false),
            confidence: Mutex::new(Some(worker)),
            polls_completed: AtomicU64::new(0),
            polls_failed: AtomicU64::new(0),
            track_stops: AtomicU32::new(0),
        });

        Self { core, poller: None }
    }

    /// Initialize the detector and request camera access.
    ///
    /// A denied grant or unavailable model does not fail the session; it
    /// degrades it and posts the corresponding notice.
    pub fn start(&mut self) -> Result<()> {
        {
            let mut detector = self.core.lock_detector()?;
            let name = detector.name();
            match detector.warm_up() {
                Ok(()) if detector.ready() => {
                    self.core.detector_ready.store(true, Ordering::SeqCst);
                    log::info!("detector '{}' ready", name);
                }
                Ok(()) => {
                    self.core.detector_ready.store(false, Ordering::SeqCst);
                    drop(detector);
                    let message = format!("detector '{}' is not ready", name);
                    log::error!("{}", message);
                    self.core
                        .set_notice(NoticeKind::ModelUnavailable, &message, true);
                }
                Err(err) => {
                    self.core.detector_ready.store(false, Ordering::SeqCst);
                    drop(detector);
                    let message = format!("detector '{}' failed to initialize: {}", name, err);
                    log::error!("{}", message);
                    self.core
                        .set_notice(NoticeKind::ModelUnavailable, &message, true);
                }
            }
        }

        let facing = self.core.lock_state()?.facing;
        if let Err(err) = self.core.acquire_camera(facing) {
            log::warn!("camera acquisition failed: {}", err);
        }
        Ok(())
    }

    /// Toggle detection. Enabling spawns the (single) poller; disabling
    /// joins it, clears detections, and resets confidence.
    pub fn set_detection_enabled(&mut self, enabled: bool) -> Result<()> {
        {
            let mut state = self.core.lock_state()?;
            if state.detection_enabled == enabled {
                return Ok(());
            }
            state.detection_enabled = enabled;
        }
        if enabled {
            if self.poller.is_none() {
                self.poller = Some(DetectionPoller::spawn(
                    self.core.clone(),
                    self.core.config.poll_interval,
                ));
            }
            log::info!("detection enabled");
        } else {
            if let Some(poller) = self.poller.take() {
                poller.stop()?;
            }
            self.core.publish_detections(Vec::new());
            log::info!("detection disabled");
        }
        Ok(())
    }

    /// Switch the camera facing mode, stopping the old stream's tracks
    /// exactly once before the new stream is requested.
    pub fn set_facing_mode(&mut self, facing: FacingMode) -> Result<()> {
        {
            let state = self.core.lock_state()?;
            if state.facing == facing {
                return Ok(());
            }
        }
        self.core.release_camera()?;
        {
            let mut state = self.core.lock_state()?;
            state.facing = facing;
        }
        log::info!("switching camera to {} facing", facing);
        self.core.acquire_camera(facing)
    }

    pub fn set_unit(&mut self, unit: VolumeUnit) -> Result<()> {
        let mut state = self.core.lock_state()?;
        state.unit = unit;
        Ok(())
    }

    /// Move the simulation slider. Clamped to [0, 100]; only authoritative
    /// while no objects are detected.
    pub fn set_simulated_level(&mut self, level: f64) -> Result<()> {
        let mut state = self.core.lock_state()?;
        state.simulated_level = if level.is_finite() {
            level.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Ok(())
    }

    /// Revoke the camera grant: detection becomes inert and a persistent
    /// notice is surfaced until a retry succeeds.
    pub fn deny_permission(&mut self) -> Result<()> {
        self.core.release_camera()?;
        {
            let mut state = self.core.lock_state()?;
            state.permission = PermissionStatus::Denied;
            state.detections.clear();
            state.confidence = None;
            state.notice = Some(Notice {
                kind: NoticeKind::PermissionDenied,
                message: "camera permission revoked".to_string(),
                persistent: true,
            });
        }
        self.core.invalidate_confidence();
        Ok(())
    }

    /// Retry camera acquisition after a denied grant.
    pub fn retry_camera(&mut self) -> Result<()> {
        let facing = self.core.lock_state()?.facing;
        self.core.acquire_camera(facing)
    }

    /// Consistent view for the display layer.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let state = self.core.lock_state()?;
        let level_percent = state
            .detections
            .first()
            .map(|det| liquid_level_percent(&det.bbox))
            .unwrap_or(state.simulated_level);
        let volume = volume_ml(level_percent, self.core.config.capacity_ml);
        Ok(Snapshot {
            permission: state.permission,
            detection_enabled: state.detection_enabled,
            facing: state.facing,
            unit: state.unit,
            simulated_level: state.simulated_level,
            detections: state.detections.clone(),
            confidence: state.confidence.clone(),
            notice: state.notice.clone(),
            level_percent,
            volume_ml: volume,
            display_volume: convert_volume(volume, state.unit),
        })
    }

    pub fn stats(&self) -> Result<SessionStats> {
        let camera = self.core.lock_camera()?;
        Ok(SessionStats {
            polls_completed: self.core.polls_completed.load(Ordering::SeqCst),
            polls_failed: self.core.polls_failed.load(Ordering::SeqCst),
            track_stops: self.core.track_stops.load(Ordering::SeqCst),
            camera: camera.as_ref().map(|stream| stream.stats()),
        })
    }

    /// Tear down every owned resource and reset the state. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(poller) = self.poller.take() {
            poller.stop()?;
        }
        let worker = {
            let mut slot = self
                .core
                .confidence
                .lock()
                .map_err(|_| anyhow!("confidence worker lock poisoned"))?;
            slot.take()
        };
        if let Some(worker) = worker {
            worker.stop()?;
        }
        self.core.release_camera()?;
        let mut state = self.core.lock_state()?;
        state.detection_enabled = false;
        state.permission = PermissionStatus::Unknown;
        state.detections.clear();
        state.confidence = None;
        state.notice = None;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::debug!("session teardown: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::UnconfiguredService;
    use crate::detect::{BoundingBox, StubBackend};

    fn session() -> Session {
        Session::new(
            GaugeConfig::default(),
            Box::new(StubBackend::new()),
            Box::new(UnconfiguredService),
        )
    }

    fn detection(y_min: f64, y_max: f64) -> DetectedObject {
        DetectedObject {
            label: "cup".to_string(),
            score: 0.9,
            bbox: BoundingBox::new(0.25, y_min, 0.75, y_max).unwrap(),
        }
    }

    #[test]
    fn slider_is_authoritative_without_detections() {
        let mut session = session();
        session.set_simulated_level(37.0).unwrap();
        let snap = session.snapshot().unwrap();
        assert_eq!(snap.level_percent, 37.0);
        assert!((snap.volume_ml - 0.37 * 350.0).abs() < 1e-9);
    }

    #[test]
    fn detections_override_slider() {
        let mut session = session();
        session.set_simulated_level(10.0).unwrap();
        {
            let mut state = session.core.lock_state().unwrap();
            state.detection_enabled = true;
            state.permission = PermissionStatus::Granted;
        }
        session.core.publish_detections(vec![detection(0.1, 0.9)]);
        let snap = session.snapshot().unwrap();
        assert!((snap.level_percent - 50.0).abs() < 1e-9);
        assert!((snap.volume_ml - 175.0).abs() < 1e-9);

        // emptied wholesale: slider takes over again
        session.core.publish_detections(Vec::new());
        let snap = session.snapshot().unwrap();
        assert_eq!(snap.level_percent, 10.0);
    }

    #[test]
    fn stale_results_after_disable_are_discarded() {
        let session = session();
        // neither enabled nor granted: a late-landing result stores nothing
        session.core.publish_detections(vec![detection(0.1, 0.9)]);
        let snap = session.snapshot().unwrap();
        assert!(snap.detections.is_empty());
    }

    #[test]
    fn slider_value_is_clamped() {
        let mut session = session();
        session.set_simulated_level(150.0).unwrap();
        assert_eq!(session.snapshot().unwrap().simulated_level, 100.0);
        session.set_simulated_level(-3.0).unwrap();
        assert_eq!(session.snapshot().unwrap().simulated_level, 0.0);
        session.set_simulated_level(f64::NAN).unwrap();
        assert_eq!(session.snapshot().unwrap().simulated_level, 0.0);
    }

    #[test]
    fn unit_switch_converts_display_volume() {
        let mut session = session();
        session.set_simulated_level(100.0).unwrap();
        session.set_unit(VolumeUnit::Ounces).unwrap();
        let snap = session.snapshot().unwrap();
        assert!((snap.display_volume - 350.0 * crate::estimate::OZ_PER_ML).abs() < 1e-9);
        assert_eq!(snap.volume_ml, 350.0);
    }

    #[test]
    fn transient_notice_does_not_displace_persistent_one() {
        let session = session();
        session
            .core
            .set_notice(NoticeKind::PermissionDenied, "denied", true);
        session
            .core
            .set_notice(NoticeKind::DetectionFailed, "one tick failed", false);
        let state = session.core.lock_state().unwrap();
        let notice = state.notice.as_ref().unwrap();
        assert_eq!(notice.kind, NoticeKind::PermissionDenied);
    }
}
