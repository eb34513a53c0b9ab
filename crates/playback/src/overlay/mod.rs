//! Detection overlay: per-track colours, label text and box geometry in display space.

use annotations::{BBox, Detection, FrameAnnotation};
use serde::{Deserialize, Serialize};

mod font;
mod surface;

pub use surface::{ImageSurface, OverlaySurface, ShapeLayer};

/// Hue step between consecutive track ids, in degrees.
pub const GOLDEN_ANGLE_DEG: f64 = 137.508;
pub const TRACK_SATURATION: f64 = 0.85;
pub const TRACK_VALUE: f64 = 0.9;

pub const BOX_STROKE_WIDTH: u32 = 2;
pub const TAG_HEIGHT: f32 = 18.0;
pub const TAG_CHAR_WIDTH: f32 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayOptions {
    pub visible: bool,
    pub show_labels: bool,
    pub show_track_ids: bool,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            visible: true,
            show_labels: true,
            show_track_ids: true,
        }
    }
}

/// Filled tag drawn above a box, holding white label text.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTag {
    pub text: String,
    /// Tag background in display coordinates.
    pub rect: BBox,
}

/// One drawable per detection.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayShape {
    /// Box outline in display coordinates.
    pub bbox: BBox,
    pub color: [u8; 3],
    pub stroke_width: u32,
    pub label: Option<LabelTag>,
}

pub fn track_hue(track_id: Option<i64>) -> f64 {
    match track_id {
        Some(id) => (id as f64 * GOLDEN_ANGLE_DEG).rem_euclid(360.0),
        None => 0.0,
    }
}

/// HSV (hue in degrees, s and v in [0, 1]) to 8-bit RGB, truncating.
pub fn hsv_to_rgb(hue_deg: f64, s: f64, v: f64) -> [u8; 3] {
    let h = (hue_deg.rem_euclid(360.0)) / 60.0;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector as u32 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let to_u8 = |c: f64| (c * 255.0).clamp(0.0, 255.0) as u8;
    [to_u8(r), to_u8(g), to_u8(b)]
}

pub fn track_color(track_id: Option<i64>) -> [u8; 3] {
    hsv_to_rgb(track_hue(track_id), TRACK_SATURATION, TRACK_VALUE)
}

/// `#<id>` and/or `<class> <pct>%`, space separated; `None` when both are off or empty.
pub fn label_text(detection: &Detection, options: &OverlayOptions) -> Option<String> {
    let mut parts = Vec::with_capacity(2);
    if options.show_track_ids {
        if let Some(id) = detection.track_id {
            parts.push(format!("#{id}"));
        }
    }
    if options.show_labels && !detection.class_name.is_empty() {
        let pct = (detection.score * 100.0).round() as i32;
        parts.push(format!("{} {}%", detection.class_name, pct));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn axis_ratio(dest: u32, source: u32) -> f32 {
    if source == 0 {
        1.0
    } else {
        dest as f32 / source as f32
    }
}

/// Turns a frame's detections into shapes on an [`OverlaySurface`].
///
/// Pure: no I/O, and a missing or empty annotation simply yields no shapes.
#[derive(Debug, Default, Clone, Copy)]
pub struct OverlayRenderer;

impl OverlayRenderer {
    pub fn shape_for(
        detection: &Detection,
        scale_x: f32,
        scale_y: f32,
        options: &OverlayOptions,
    ) -> OverlayShape {
        let bbox = detection.bbox.scaled(scale_x, scale_y);
        let label = label_text(detection, options).map(|text| LabelTag {
            rect: BBox::new(
                bbox.x1,
                bbox.y1 - TAG_HEIGHT,
                bbox.x1 + text.chars().count() as f32 * TAG_CHAR_WIDTH,
                bbox.y1,
            ),
            text,
        });
        OverlayShape {
            bbox,
            color: track_color(detection.track_id),
            stroke_width: BOX_STROKE_WIDTH,
            label,
        }
    }

    /// Clears `surface` and draws one shape per detection. Returns the shape count.
    pub fn render(
        &self,
        surface: &mut dyn OverlaySurface,
        frame: Option<&FrameAnnotation>,
        source_width: u32,
        source_height: u32,
        options: &OverlayOptions,
    ) -> usize {
        surface.clear();
        let Some(frame) = frame else {
            return 0;
        };
        if !options.visible {
            return 0;
        }
        let (dest_w, dest_h) = surface.size();
        let sx = axis_ratio(dest_w, source_width);
        let sy = axis_ratio(dest_h, source_height);
        for detection in &frame.detections {
            surface.draw(&Self::shape_for(detection, sx, sy, options));
        }
        frame.detections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(track_id: Option<i64>, name: &str, score: f32) -> Detection {
        Detection {
            bbox: BBox::new(100.0, 50.0, 300.0, 250.0),
            track_id,
            class_id: Some(0),
            class_name: name.into(),
            score,
        }
    }

    #[test]
    fn test_hue_golden_angle_step() {
        let step = (track_hue(Some(1)) - track_hue(Some(0))).rem_euclid(360.0);
        assert!((step - 137.508).abs() < 1e-9);
        assert_eq!(track_hue(None), 0.0);
        assert!((track_hue(Some(3)) - (3.0 * 137.508 - 360.0)).abs() < 1e-9);
        assert!(track_hue(Some(-1)) >= 0.0);
    }

    #[test]
    fn test_hsv_conversion() {
        // Hue 0 at S=0.85, V=0.9: r = 229, g = b = 0.9 * 0.15 * 255.
        assert_eq!(hsv_to_rgb(0.0, 0.85, 0.9), [229, 34, 34]);
        assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), [0, 255, 0]);
        assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), [0, 0, 255]);
        assert_eq!(track_color(None), [229, 34, 34]);
    }

    #[test]
    fn test_label_composition() {
        let all = OverlayOptions::default();
        assert_eq!(
            label_text(&det(Some(4), "person", 0.876), &all).as_deref(),
            Some("#4 person 88%")
        );
        assert_eq!(
            label_text(&det(None, "car", 0.5), &all).as_deref(),
            Some("car 50%")
        );

        let ids_only = OverlayOptions {
            show_labels: false,
            ..all
        };
        assert_eq!(
            label_text(&det(Some(4), "person", 0.9), &ids_only).as_deref(),
            Some("#4")
        );
        assert_eq!(label_text(&det(None, "person", 0.9), &ids_only), None);

        let labels_only = OverlayOptions {
            show_track_ids: false,
            ..all
        };
        assert_eq!(label_text(&det(Some(4), "", 0.9), &labels_only), None);
    }

    #[test]
    fn test_one_shape_per_detection() {
        let frame = FrameAnnotation::new(vec![
            det(Some(1), "person", 0.9),
            det(Some(2), "dog", 0.7),
            det(None, "cat", 0.6),
        ]);
        let mut layer = ShapeLayer::new(640, 360);
        let n = OverlayRenderer.render(
            &mut layer,
            Some(&frame),
            1280,
            720,
            &OverlayOptions::default(),
        );
        assert_eq!(n, 3);
        assert_eq!(layer.shapes().len(), 3);
        assert_eq!(layer.shapes()[0].bbox, BBox::new(50.0, 25.0, 150.0, 125.0));
        let tag = layer.shapes()[0].label.as_ref().unwrap();
        assert_eq!(tag.text, "#1 person 90%");
        assert_eq!(tag.rect, BBox::new(50.0, 7.0, 50.0 + 13.0 * 7.0, 25.0));
    }

    #[test]
    fn test_missing_or_empty_frame_draws_nothing() {
        let mut layer = ShapeLayer::new(640, 360);
        layer.draw(&OverlayRenderer::shape_for(
            &det(Some(1), "x", 0.5),
            1.0,
            1.0,
            &OverlayOptions::default(),
        ));
        let opts = OverlayOptions::default();
        assert_eq!(OverlayRenderer.render(&mut layer, None, 640, 360, &opts), 0);
        assert!(layer.shapes().is_empty());
        let empty = FrameAnnotation::default();
        assert_eq!(
            OverlayRenderer.render(&mut layer, Some(&empty), 640, 360, &opts),
            0
        );
    }

    #[test]
    fn test_zero_source_size_keeps_coordinates() {
        let frame = FrameAnnotation::new(vec![det(Some(1), "person", 0.9)]);
        let mut layer = ShapeLayer::new(640, 360);
        OverlayRenderer.render(&mut layer, Some(&frame), 0, 0, &OverlayOptions::default());
        assert_eq!(layer.shapes()[0].bbox, BBox::new(100.0, 50.0, 300.0, 250.0));
    }

    #[test]
    fn test_hidden_overlay_clears() {
        let frame = FrameAnnotation::new(vec![det(Some(1), "person", 0.9)]);
        let mut layer = ShapeLayer::new(640, 360);
        let hidden = OverlayOptions {
            visible: false,
            ..OverlayOptions::default()
        };
        assert_eq!(
            OverlayRenderer.render(&mut layer, Some(&frame), 640, 360, &hidden),
            0
        );
        assert!(layer.shapes().is_empty());
    }
}
