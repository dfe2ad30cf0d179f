use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Stub backend for tests and wiring checks.
///
/// Returns a fixed detection script on every call and counts invocations
/// through a shared counter, so callers can assert how often the detector was
/// actually consulted.
pub struct StubBackend {
    script: Vec<RawDetection>,
    calls: Arc<AtomicUsize>,
    fail: bool,
    ready: bool,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::with_detections(Vec::new())
    }

    pub fn with_detections(script: Vec<RawDetection>) -> Self {
        Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
            ready: true,
        }
    }

    /// Backend whose every call fails, for error-path coverage.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Backend whose model never becomes ready.
    pub fn unready() -> Self {
        Self {
            ready: false,
            ..Self::new()
        }
    }

    /// Shared call counter; incremented once per `detect` call.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn ready(&self) -> bool {
        self.ready
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("injected stub detector failure"));
        }
        Ok(self.script.clone())
    }
}
