//! Glass Gauge
//!
//! Camera-based drinking-glass liquid level and volume estimation.
//!
//! # Architecture
//!
//! Data flows one direction per tick:
//!
//! camera frame → detection poll → detections → level estimate → volume →
//! unit conversion → display, with a confidence request branching off the
//! volume asynchronously.
//!
//! The detector and the reasoning service are external collaborators behind
//! traits; what is genuinely internal is the geometric level heuristic and
//! the session orchestration that keeps permission grants, model readiness,
//! and UI toggles consistent across threads.
//!
//! # Module Structure
//!
//! - `camera`: exclusive stream ownership, facing modes, frame capture
//! - `detect`: detector trait, backends, box filtering/normalization
//! - `estimate`: level/volume/unit math (pure functions)
//! - `poller`: fixed-cadence detection loop, serialized by construction
//! - `confidence`: reasoning-service client and last-write-wins worker
//! - `session`: the orchestrating state holder with start/stop lifecycle
//! - `config`: file + environment configuration

pub mod camera;
pub mod config;
pub mod confidence;
pub mod detect;
pub mod estimate;
pub mod poller;
pub mod session;
pub mod ui;

pub use camera::{CameraConfig, CameraStats, CameraStream, FacingMode, VideoFrame};
pub use config::{ConfidenceSettings, DetectorSettings, GaugeConfig};
pub use confidence::{
    describe_water_line, ConfidenceQuery, ConfidenceResult, ConfidenceService,
    HttpConfidenceService, UnconfiguredService,
};
pub use detect::{
    normalize_detections, BoundingBox, DetectedObject, DetectorBackend, LabelFilter,
    LuminanceBackend, RawDetection, StubBackend,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use estimate::{
    convert_volume, liquid_level_percent, volume_ml, VolumeUnit, DEFAULT_CAPACITY_ML, OZ_PER_ML,
};
pub use poller::DetectionPoller;
pub use session::{
    Notice, NoticeKind, PermissionStatus, Session, SessionState, SessionStats, Snapshot,
};
