//! Camera stream ownership.
//!
//! A session owns at most one open stream at a time. Switching facing mode
//! stops the old stream's tracks before a new stream is requested; `stop` is
//! idempotent, so tracks are released exactly once no matter how teardown is
//! reached.
//!
//! Sources:
//! - `stub://` URLs produce a synthetic scene (a backlit glass whose fill
//!   level drifts over time), always available, used by tests and the demo.
//! - `denied://` URLs simulate a rejected device grant and fail to open.
//! - http(s) URLs fetch JPEG stills from an IP camera (feature: camera-http).

use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[cfg(feature = "camera-http")]
use anyhow::Context;

/// Which device the stream faces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    #[default]
    Environment,
}

impl std::str::FromStr for FacingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "environment" => Ok(Self::Environment),
            other => Err(anyhow!(
                "unknown facing mode '{}' (expected user or environment)",
                other
            )),
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Environment => write!(f, "environment"),
        }
    }
}

/// Configuration for the camera layer: one URL per facing mode.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub user_url: String,
    pub environment_url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            user_url: "stub://user_camera".to_string(),
            environment_url: "stub://environment_camera".to_string(),
            width: 640,
            height: 480,
            target_fps: 10,
        }
    }
}

impl CameraConfig {
    pub fn url_for(&self, facing: FacingMode) -> &str {
        match facing {
            FacingMode::User => &self.user_url,
            FacingMode::Environment => &self.environment_url,
        }
    }
}

/// One captured RGB frame.
pub struct VideoFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl VideoFrame {
    /// Content digest for debug traceability; not an identity.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(&self.pixels).into()
    }
}

/// Statistics for an open stream.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub url: String,
}

/// Exclusively-owned camera stream.
pub struct CameraStream {
    backend: CameraBackend,
    facing: FacingMode,
    url: String,
    frame_count: u64,
    stopped: bool,
    stop_count: u32,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-http")]
    Http(HttpCamera),
}

impl CameraStream {
    /// Open the stream for the given facing mode.
    ///
    /// Failure here is the permission boundary: a `denied://` URL, a missing
    /// feature, or an unreachable device all surface as an open error, which
    /// the session records as a denied grant.
    pub fn open(config: &CameraConfig, facing: FacingMode) -> Result<Self> {
        let url = config.url_for(facing).to_string();
        let backend = if url.starts_with("stub://") {
            log::info!("CameraStream: connected to {} (synthetic)", url);
            CameraBackend::Synthetic(SyntheticCamera::new(config.width, config.height))
        } else if url.starts_with("denied://") {
            return Err(anyhow!("camera access denied for {}", url));
        } else {
            #[cfg(feature = "camera-http")]
            {
                CameraBackend::Http(HttpCamera::connect(&url)?)
            }
            #[cfg(not(feature = "camera-http"))]
            {
                return Err(anyhow!(
                    "camera url '{}' requires the camera-http feature",
                    url
                ));
            }
        };

        Ok(Self {
            backend,
            facing,
            url,
            frame_count: 0,
            stopped: false,
            stop_count: 0,
        })
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    /// Capture the next frame. Fails once the stream has been stopped.
    pub fn capture(&mut self) -> Result<VideoFrame> {
        if self.stopped {
            return Err(anyhow!("camera stream for {} is stopped", self.url));
        }
        let frame = match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.next_frame(),
            #[cfg(feature = "camera-http")]
            CameraBackend::Http(camera) => camera.next_frame()?,
        };
        self.frame_count += 1;
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "frame #{} from {}: {}x{} digest={}",
                self.frame_count,
                self.url,
                frame.width,
                frame.height,
                &hex::encode(frame.digest())[..16]
            );
        }
        Ok(frame)
    }

    /// Stop the stream's tracks. Idempotent: tracks are released once.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.stop_count += 1;
        log::info!("CameraStream: stopped tracks for {}", self.url);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// How many times tracks were actually released (0 or 1).
    pub fn stop_count(&self) -> u32 {
        self.stop_count
    }

    pub fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            url: self.url.clone(),
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticCamera {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn next_frame(&mut self) -> VideoFrame {
        self.frame_count += 1;
        // Drift the simulated fill level occasionally.
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        VideoFrame {
            pixels: self.generate_pixels(),
            width: self.width,
            height: self.height,
        }
    }

    /// Bright background with a dark "liquid" rectangle in the middle band.
    ///
    /// The rectangle's top edge moves with the simulated fill level, so a
    /// luminance scan over the frame recovers a box whose geometry matches
    /// the level that was drawn.
    fn generate_pixels(&self) -> Vec<u8> {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut pixels = vec![210u8; w * h * 3];

        let level_percent = ((self.scene_state as usize % 10) * 10) as f64;
        let x0 = w / 4;
        let x1 = (3 * w / 4).max(x0 + 1);
        let bottom = h - h / 10;
        let glass_height = bottom - h / 10;
        let liquid_height = (glass_height as f64 * level_percent / 100.0) as usize;
        let y0 = bottom.saturating_sub(liquid_height.max(1));

        for y in y0..bottom {
            for x in x0..x1 {
                let offset = (y * w + x) * 3;
                pixels[offset] = 25;
                pixels[offset + 1] = 30;
                pixels[offset + 2] = 45;
            }
        }
        pixels
    }
}

// ----------------------------------------------------------------------------
// HTTP still source (feature: camera-http)
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-http")]
struct HttpCamera {
    url: String,
    agent: ureq::Agent,
}

#[cfg(feature = "camera-http")]
impl HttpCamera {
    fn connect(raw_url: &str) -> Result<Self> {
        let parsed = url::Url::parse(raw_url).context("invalid camera url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("unsupported camera url scheme '{}'", parsed.scheme()));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(5))
            .build();
        log::info!("CameraStream: connected to {} (http)", raw_url);
        Ok(Self {
            url: raw_url.to_string(),
            agent,
        })
    }

    fn next_frame(&mut self) -> Result<VideoFrame> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .context("fetch camera still")?;
        let mut jpeg = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut jpeg)
            .context("read camera still body")?;
        let decoded = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)
            .context("decode camera jpeg")?
            .to_rgb8();
        let (width, height) = decoded.dimensions();
        Ok(VideoFrame {
            pixels: decoded.into_raw(),
            width,
            height,
        })
    }
}

#[cfg(feature = "camera-http")]
use std::io::Read;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_stream_captures_configured_dimensions() {
        let config = CameraConfig::default();
        let mut stream = CameraStream::open(&config, FacingMode::Environment).unwrap();
        let frame = stream.capture().unwrap();
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.pixels.len(), 640 * 480 * 3);
        assert_eq!(stream.stats().frames_captured, 1);
    }

    #[test]
    fn stop_releases_tracks_exactly_once() {
        let config = CameraConfig::default();
        let mut stream = CameraStream::open(&config, FacingMode::User).unwrap();
        stream.stop();
        stream.stop();
        stream.stop();
        assert!(stream.is_stopped());
        assert_eq!(stream.stop_count(), 1);
        assert!(stream.capture().is_err());
    }

    #[test]
    fn denied_url_fails_to_open() {
        let config = CameraConfig {
            environment_url: "denied://rear".to_string(),
            ..CameraConfig::default()
        };
        assert!(CameraStream::open(&config, FacingMode::Environment).is_err());
        // the user-facing camera still opens
        assert!(CameraStream::open(&config, FacingMode::User).is_ok());
    }

    #[test]
    fn url_selection_follows_facing_mode() {
        let config = CameraConfig::default();
        assert_eq!(config.url_for(FacingMode::User), "stub://user_camera");
        assert_eq!(
            config.url_for(FacingMode::Environment),
            "stub://environment_camera"
        );
    }

    #[test]
    fn facing_mode_parses_from_config_strings() {
        assert_eq!("user".parse::<FacingMode>().unwrap(), FacingMode::User);
        assert_eq!(
            "Environment".parse::<FacingMode>().unwrap(),
            FacingMode::Environment
        );
        assert!("rear".parse::<FacingMode>().is_err());
    }
}
