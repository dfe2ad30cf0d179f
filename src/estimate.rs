//! Liquid level, volume, and unit math.
//!
//! Everything in this module is a pure function of its inputs. The level
//! estimate is a geometric heuristic over a detected bounding box, not a
//! segmentation of the actual water line: a box whose top edge sits near the
//! frame top is read as "fuller". The heuristic is an acknowledged
//! approximation, not a measurement.

use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::BoundingBox;

/// Assumed maximum capacity of any detected glass, in milliliters.
pub const DEFAULT_CAPACITY_ML: f64 = 350.0;

/// Fluid ounces per milliliter.
pub const OZ_PER_ML: f64 = 0.033814;

/// Below this headroom the level formula divides by ~zero and is replaced by
/// an explicit fallback.
const HEADROOM_EPSILON: f64 = 1e-6;

/// Display unit for volume readings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeUnit {
    #[default]
    #[serde(rename = "ml")]
    Milliliters,
    #[serde(rename = "oz")]
    Ounces,
}

impl std::str::FromStr for VolumeUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ml" | "milliliters" => Ok(Self::Milliliters),
            "oz" | "ounces" => Ok(Self::Ounces),
            other => Err(anyhow!("unknown volume unit '{}' (expected ml or oz)", other)),
        }
    }
}

impl fmt::Display for VolumeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Milliliters => write!(f, "ml"),
            Self::Ounces => write!(f, "oz"),
        }
    }
}

/// Estimate the fill percentage of a glass from its detected bounding box.
///
/// The box's top edge `y_min` is inversely correlated with fill:
///
/// ```text
/// level = 100 - (y_min / (1 - box_height)) * 100
/// ```
///
/// When the box spans nearly the whole frame the denominator vanishes; the
/// fallback returns 100 for a box pinned to the frame top and 0 otherwise
/// (the formula's one-sided limit, clamped). The result is always finite and
/// in [0, 100].
pub fn liquid_level_percent(bbox: &BoundingBox) -> f64 {
    let headroom = 1.0 - bbox.height();
    if headroom <= HEADROOM_EPSILON {
        return if bbox.y_min <= HEADROOM_EPSILON { 100.0 } else { 0.0 };
    }
    let level = 100.0 - (bbox.y_min / headroom) * 100.0;
    level.clamp(0.0, 100.0)
}

/// Convert a fill percentage to a volume in milliliters against a fixed
/// glass capacity. No per-glass capacity inference occurs.
pub fn volume_ml(level_percent: f64, capacity_ml: f64) -> f64 {
    (level_percent / 100.0) * capacity_ml
}

/// Convert a milliliter volume to the requested display unit.
pub fn convert_volume(volume_ml: f64, unit: VolumeUnit) -> f64 {
    match unit {
        VolumeUnit::Milliliters => volume_ml,
        VolumeUnit::Ounces => volume_ml * OZ_PER_ML,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> BoundingBox {
        BoundingBox::new(x_min, y_min, x_max, y_max).unwrap()
    }

    #[test]
    fn box_at_frame_top_reads_full() {
        for h in [0.1, 0.5, 0.9, 0.99] {
            let level = liquid_level_percent(&bbox(0.2, 0.0, 0.8, h));
            assert_eq!(level, 100.0, "height {}", h);
        }
    }

    #[test]
    fn reference_box_reads_half_full() {
        // height 0.8, headroom 0.2: 100 - (0.1 / 0.2) * 100 = 50
        let level = liquid_level_percent(&bbox(0.25, 0.1, 0.75, 0.9));
        assert!((level - 50.0).abs() < 1e-9);
    }

    #[test]
    fn near_full_frame_box_stays_finite() {
        let level = liquid_level_percent(&bbox(0.0, 0.0, 1.0, 1.0));
        assert!(level.is_finite());
        assert_eq!(level, 100.0);

        let level = liquid_level_percent(&bbox(0.0, 1e-9, 1.0, 1.0));
        assert!(level.is_finite());
        assert!((0.0..=100.0).contains(&level));
    }

    #[test]
    fn box_touching_frame_bottom_reads_empty() {
        // with y_max = 1 the headroom equals y_min, so the ratio is 1
        let level = liquid_level_percent(&bbox(0.1, 0.6, 0.9, 1.0));
        assert!(level.abs() < 1e-9);
    }

    #[test]
    fn mid_frame_box_interpolates() {
        // height 0.5, headroom 0.5: 100 - (0.2 / 0.5) * 100 = 60
        let level = liquid_level_percent(&bbox(0.3, 0.2, 0.7, 0.7));
        assert!((level - 60.0).abs() < 1e-9);
    }

    #[test]
    fn volume_tracks_capacity_linearly() {
        assert_eq!(volume_ml(0.0, 350.0), 0.0);
        assert_eq!(volume_ml(100.0, 350.0), 350.0);
        assert!((volume_ml(50.0, 350.0) - 175.0).abs() < 1e-9);
    }

    #[test]
    fn ounce_conversion_uses_exact_factor() {
        assert!((convert_volume(175.0, VolumeUnit::Ounces) - 175.0 * 0.033814).abs() < 1e-9);
        assert_eq!(convert_volume(175.0, VolumeUnit::Milliliters), 175.0);
    }

    #[test]
    fn unit_parses_from_config_strings() {
        assert_eq!("ml".parse::<VolumeUnit>().unwrap(), VolumeUnit::Milliliters);
        assert_eq!("OZ".parse::<VolumeUnit>().unwrap(), VolumeUnit::Ounces);
        assert!("cups".parse::<VolumeUnit>().is_err());
    }
}
