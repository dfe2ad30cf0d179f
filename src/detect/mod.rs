mod backend;
mod backends;
mod result;

pub use backend::DetectorBackend;
pub use backends::LuminanceBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{normalize_detections, BoundingBox, DetectedObject, LabelFilter, RawDetection};
