pub mod luminance;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use luminance::LuminanceBackend;
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
