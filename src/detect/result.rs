use anyhow::{anyhow, Result};

/// Axis-aligned box in normalized coordinates (0..1 against the frame).
///
/// Invariant: `x_min < x_max` and `y_min < y_max`, all within [0, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<Self> {
        for (name, value) in [
            ("x_min", x_min),
            ("y_min", y_min),
            ("x_max", x_max),
            ("y_max", y_max),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("bounding box {} out of range: {}", name, value));
            }
        }
        if x_min >= x_max || y_min >= y_max {
            return Err(anyhow!(
                "degenerate bounding box [{}, {}, {}, {}]",
                x_min,
                y_min,
                x_max,
                y_max
            ));
        }
        Ok(Self {
            x_min,
            y_min,
            x_max,
            y_max,
        })
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }
}

/// Detection as reported by a backend: pixel-space `[x, y, width, height]`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub score: f32,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// Detection after label/score filtering and coordinate normalization.
///
/// Produced fresh each poll; no identity is carried across polls.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedObject {
    pub label: String,
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Label allow-list plus minimum score, applied to every raw detection.
#[derive(Clone, Debug)]
pub struct LabelFilter {
    labels: Vec<String>,
    min_score: f32,
}

impl LabelFilter {
    /// Labels are matched case-insensitively; scores must be strictly above
    /// the threshold.
    pub fn new(labels: &[String], min_score: f32) -> Self {
        Self {
            labels: labels.iter().map(|label| label.to_lowercase()).collect(),
            min_score,
        }
    }

    pub fn accepts(&self, label: &str, score: f32) -> bool {
        if score <= self.min_score {
            return false;
        }
        let label = label.to_lowercase();
        self.labels.iter().any(|allowed| allowed == &label)
    }
}

/// Filter raw detections and convert their boxes from pixel space to
/// normalized `[x_min, y_min, x_max, y_max]`.
///
/// Coordinates are clamped into [0, 1]; boxes that degenerate under clamping
/// are dropped rather than published.
pub fn normalize_detections(
    raw: Vec<RawDetection>,
    frame_width: u32,
    frame_height: u32,
    filter: &LabelFilter,
) -> Vec<DetectedObject> {
    if frame_width == 0 || frame_height == 0 {
        return Vec::new();
    }
    let fw = frame_width as f64;
    let fh = frame_height as f64;

    let mut out = Vec::new();
    for det in raw {
        if !filter.accepts(&det.label, det.score) {
            continue;
        }
        let x_min = (det.x as f64 / fw).clamp(0.0, 1.0);
        let y_min = (det.y as f64 / fh).clamp(0.0, 1.0);
        let x_max = ((det.x + det.w) as f64 / fw).clamp(0.0, 1.0);
        let y_max = ((det.y + det.h) as f64 / fh).clamp(0.0, 1.0);
        match BoundingBox::new(x_min, y_min, x_max, y_max) {
            Ok(bbox) => out.push(DetectedObject {
                label: det.label,
                score: det.score,
                bbox,
            }),
            Err(err) => {
                log::debug!("dropping detection '{}': {}", det.label, err);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(label: &str, score: f32, x: f32, y: f32, w: f32, h: f32) -> RawDetection {
        RawDetection {
            label: label.to_string(),
            score,
            x,
            y,
            w,
            h,
        }
    }

    fn cup_filter() -> LabelFilter {
        LabelFilter::new(&["cup".to_string(), "wine glass".to_string()], 0.5)
    }

    #[test]
    fn filter_matches_labels_case_insensitively() {
        let filter = cup_filter();
        assert!(filter.accepts("Cup", 0.9));
        assert!(filter.accepts("WINE GLASS", 0.9));
        assert!(!filter.accepts("bottle", 0.9));
    }

    #[test]
    fn filter_threshold_is_strict() {
        let filter = cup_filter();
        assert!(!filter.accepts("cup", 0.5));
        assert!(filter.accepts("cup", 0.500001));
    }

    #[test]
    fn normalization_divides_by_frame_dimensions() {
        let dets = normalize_detections(
            vec![raw("cup", 0.9, 160.0, 48.0, 320.0, 384.0)],
            640,
            480,
            &cup_filter(),
        );
        assert_eq!(dets.len(), 1);
        let bbox = dets[0].bbox;
        assert!((bbox.x_min - 0.25).abs() < 1e-9);
        assert!((bbox.y_min - 0.1).abs() < 1e-9);
        assert!((bbox.x_max - 0.75).abs() < 1e-9);
        assert!((bbox.y_max - 0.9).abs() < 1e-9);
    }

    #[test]
    fn out_of_frame_boxes_are_clamped() {
        let dets = normalize_detections(
            vec![raw("cup", 0.9, -20.0, -20.0, 700.0, 520.0)],
            640,
            480,
            &cup_filter(),
        );
        assert_eq!(dets.len(), 1);
        let bbox = dets[0].bbox;
        assert_eq!(bbox.x_min, 0.0);
        assert_eq!(bbox.y_min, 0.0);
        assert_eq!(bbox.x_max, 1.0);
        assert_eq!(bbox.y_max, 1.0);
    }

    #[test]
    fn degenerate_boxes_are_dropped() {
        let dets = normalize_detections(
            vec![raw("cup", 0.9, 650.0, 10.0, 30.0, 30.0)],
            640,
            480,
            &cup_filter(),
        );
        assert!(dets.is_empty());
    }

    #[test]
    fn rejected_labels_are_dropped() {
        let dets = normalize_detections(
            vec![
                raw("bottle", 0.9, 10.0, 10.0, 50.0, 50.0),
                raw("cup", 0.4, 10.0, 10.0, 50.0, 50.0),
            ],
            640,
            480,
            &cup_filter(),
        );
        assert!(dets.is_empty());
    }

    #[test]
    fn bounding_box_enforces_ordering() {
        assert!(BoundingBox::new(0.5, 0.1, 0.5, 0.9).is_err());
        assert!(BoundingBox::new(0.1, 0.9, 0.5, 0.1).is_err());
        assert!(BoundingBox::new(-0.1, 0.0, 0.5, 0.5).is_err());
    }
}
