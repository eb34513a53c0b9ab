use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

mod wire;
use wire::WireTable;

/// Used whenever the producer could not report a usable frame rate.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

// Absorbs float error when a timestamp was itself derived from `index / fps`.
const FRAME_EPSILON: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("frame {frame}: `{field}` has {actual} entries, expected 0 or {expected}")]
    Misaligned {
        frame: usize,
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("frame {frame}: score {score} outside [0, 1]")]
    ScoreOutOfRange { frame: usize, score: f32 },
    #[error("frame index {0} leaves no room for a frame count")]
    FrameIndexOverflow(usize),
    #[error("invalid annotation json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FrameIndex = usize;

/// Axis-aligned box in source-video pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Scale by independent x/y ratios.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    /// Absent when the tracker did not keep identity for this detection.
    pub track_id: Option<i64>,
    pub class_id: Option<u32>,
    pub class_name: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaliencyMap {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameAnnotation {
    pub detections: Vec<Detection>,
    pub saliency: Option<SaliencyMap>,
}

impl FrameAnnotation {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            saliency: None,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Replace unknown, zero, negative or non-finite rates with [`DEFAULT_FRAME_RATE`].
pub fn normalize_frame_rate(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        DEFAULT_FRAME_RATE
    }
}

/// Nearest frame at or before `t_sec`, clamped to `[0, frame_count - 1]`.
pub fn frame_index_for_time(t_sec: f64, fps: f64, frame_count: usize) -> FrameIndex {
    if frame_count == 0 {
        return 0;
    }
    let raw = (t_sec.max(0.0) * normalize_frame_rate(fps) + FRAME_EPSILON).floor();
    // `as` saturates, so huge timestamps land on the last frame.
    (raw as usize).min(frame_count - 1)
}

/// Per-frame detections for one video, immutable once built.
///
/// Share it as `Arc<AnnotationTable>`: the tracking job writes it once and the
/// render loop only ever reads it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireTable", into = "WireTable")]
pub struct AnnotationTable {
    frame_rate: f64,
    frame_count: usize,
    frame_width: u32,
    frame_height: u32,
    frames: BTreeMap<FrameIndex, FrameAnnotation>,
    audio_levels: Vec<f32>,
}

impl AnnotationTable {
    pub fn builder(frame_rate: f64) -> AnnotationTableBuilder {
        AnnotationTableBuilder::new(frame_rate)
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Source resolution, `(0, 0)` when the producer could not determine it.
    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    pub fn frame(&self, index: FrameIndex) -> Option<&FrameAnnotation> {
        self.frames.get(&index)
    }

    /// Detections for `index`; a lookup miss means "nothing detected this frame".
    pub fn detections(&self, index: FrameIndex) -> &[Detection] {
        self.frames
            .get(&index)
            .map(|f| f.detections.as_slice())
            .unwrap_or(&[])
    }

    pub fn frames(&self) -> impl Iterator<Item = (FrameIndex, &FrameAnnotation)> {
        self.frames.iter().map(|(i, f)| (*i, f))
    }

    pub fn annotated_frames(&self) -> usize {
        self.frames.len()
    }

    /// Timestamp of the last valid frame.
    pub fn last_timestamp(&self) -> f64 {
        if self.frame_count == 0 {
            0.0
        } else {
            (self.frame_count - 1) as f64 / self.frame_rate
        }
    }

    pub fn frame_index_at(&self, t_sec: f64) -> FrameIndex {
        frame_index_for_time(t_sec, self.frame_rate, self.frame_count)
    }

    pub fn audio_levels(&self) -> &[f32] {
        &self.audio_levels
    }

    pub fn audio_level(&self, index: FrameIndex) -> f32 {
        self.audio_levels.get(index).copied().unwrap_or(0.0)
    }

    /// Pads audio levels with zeros to one entry per frame. Used when levels
    /// were requested but the producer returned fewer than `frame_count`.
    pub fn with_zero_filled_audio(mut self) -> Self {
        if self.audio_levels.len() < self.frame_count {
            self.audio_levels.resize(self.frame_count, 0.0);
        }
        self
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, AnnotationError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, AnnotationError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn load(path: &Path) -> Result<Self, AnnotationError> {
        let bytes = fs::read(path)?;
        Self::from_json_slice(&bytes)
    }

    pub fn write_json<W: Write>(&self, writer: W) -> Result<(), AnnotationError> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), AnnotationError> {
        let file = fs::File::create(path)?;
        self.write_json(std::io::BufWriter::new(file))
    }
}

/// Accumulates frames while a tracking run streams them in.
#[derive(Debug, Clone)]
pub struct AnnotationTableBuilder {
    frame_rate: f64,
    frame_count: usize,
    frame_width: u32,
    frame_height: u32,
    frames: BTreeMap<FrameIndex, FrameAnnotation>,
    audio_levels: Vec<f32>,
    zero_fill_audio: bool,
}

impl AnnotationTableBuilder {
    pub fn new(frame_rate: f64) -> Self {
        Self {
            frame_rate: normalize_frame_rate(frame_rate),
            frame_count: 0,
            frame_width: 0,
            frame_height: 0,
            frames: BTreeMap::new(),
            audio_levels: Vec::new(),
            zero_fill_audio: false,
        }
    }

    pub fn frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_width = width;
        self.frame_height = height;
        self
    }

    /// Lower bound on the frame count, e.g. from container metadata.
    pub fn frame_count(mut self, frame_count: usize) -> Self {
        self.frame_count = self.frame_count.max(frame_count);
        self
    }

    pub fn audio_levels(mut self, levels: Vec<f32>) -> Self {
        self.audio_levels = levels;
        self
    }

    /// Pad audio levels with zeros up to the frame count instead of leaving them absent.
    pub fn zero_fill_audio(mut self, enabled: bool) -> Self {
        self.zero_fill_audio = enabled;
        self
    }

    pub fn push_frame(
        &mut self,
        index: FrameIndex,
        frame: FrameAnnotation,
    ) -> Result<(), AnnotationError> {
        let count = index
            .checked_add(1)
            .ok_or(AnnotationError::FrameIndexOverflow(index))?;
        self.frame_count = self.frame_count.max(count);
        self.frames.insert(index, frame);
        Ok(())
    }

    pub fn with_frame(
        mut self,
        index: FrameIndex,
        frame: FrameAnnotation,
    ) -> Result<Self, AnnotationError> {
        self.push_frame(index, frame)?;
        Ok(self)
    }

    pub fn build(mut self) -> AnnotationTable {
        if self.zero_fill_audio && self.audio_levels.len() < self.frame_count {
            self.audio_levels.resize(self.frame_count, 0.0);
        }
        AnnotationTable {
            frame_rate: self.frame_rate,
            frame_count: self.frame_count,
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            frames: self.frames,
            audio_levels: self.audio_levels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(track_id: Option<i64>) -> Detection {
        Detection {
            bbox: BBox::new(10.0, 20.0, 110.0, 220.0),
            track_id,
            class_id: Some(0),
            class_name: "person".into(),
            score: 0.9,
        }
    }

    #[test]
    fn test_frame_rate_fallback() {
        assert_eq!(normalize_frame_rate(0.0), 30.0);
        assert_eq!(normalize_frame_rate(-5.0), 30.0);
        assert_eq!(normalize_frame_rate(f64::NAN), 30.0);
        assert_eq!(normalize_frame_rate(25.0), 25.0);
        assert_eq!(AnnotationTable::builder(0.0).build().frame_rate(), 30.0);
    }

    #[test]
    fn test_frame_count_refined_by_frames() {
        let mut builder = AnnotationTable::builder(30.0);
        builder
            .push_frame(4, FrameAnnotation::new(vec![det(Some(1))]))
            .unwrap();
        builder.push_frame(1, FrameAnnotation::default()).unwrap();
        let table = builder.build();
        assert_eq!(table.frame_count(), 5);
        assert_eq!(table.annotated_frames(), 2);
    }

    #[test]
    fn test_last_possible_index_is_rejected() {
        let mut builder = AnnotationTable::builder(30.0).frame_count(3);
        assert!(matches!(
            builder.push_frame(usize::MAX, FrameAnnotation::default()),
            Err(AnnotationError::FrameIndexOverflow(usize::MAX))
        ));
        let table = builder.build();
        assert_eq!(table.frame_count(), 3);
        assert_eq!(table.annotated_frames(), 0);
    }

    #[test]
    fn test_lookup_miss_is_empty() {
        let table = AnnotationTable::builder(30.0)
            .frame_count(10)
            .with_frame(2, FrameAnnotation::new(vec![det(None)]))
            .unwrap()
            .build();
        assert_eq!(table.detections(2).len(), 1);
        assert!(table.detections(3).is_empty());
        assert!(table.frame(3).is_none());
    }

    #[test]
    fn test_frame_index_clamped() {
        let table = AnnotationTable::builder(10.0).frame_count(50).build();
        assert_eq!(table.frame_index_at(-1.0), 0);
        assert_eq!(table.frame_index_at(0.0), 0);
        assert_eq!(table.frame_index_at(0.35), 3);
        assert_eq!(table.frame_index_at(4.9), 49);
        assert_eq!(table.frame_index_at(100.0), 49);
        assert_eq!(table.frame_index_at(f64::INFINITY), 49);
    }

    #[test]
    fn test_frame_index_survives_float_error() {
        let fps = 29.97;
        for i in 0..300usize {
            let t = i as f64 / fps;
            assert_eq!(frame_index_for_time(t, fps, 300), i);
        }
    }

    #[test]
    fn test_last_timestamp() {
        let table = AnnotationTable::builder(25.0).frame_count(101).build();
        assert!((table.last_timestamp() - 4.0).abs() < 1e-9);
        assert_eq!(AnnotationTable::builder(25.0).build().last_timestamp(), 0.0);
    }

    #[test]
    fn test_zero_filled_audio_levels() {
        let table = AnnotationTable::builder(30.0)
            .frame_count(4)
            .zero_fill_audio(true)
            .build();
        assert_eq!(table.audio_levels(), &[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(table.audio_level(99), 0.0);

        let table = AnnotationTable::builder(30.0).frame_count(4).build();
        assert!(table.audio_levels().is_empty());
        let table = table.with_zero_filled_audio();
        assert_eq!(table.audio_levels().len(), 4);
    }

    #[test]
    fn test_bbox_scaling_is_per_axis() {
        let b = BBox::new(10.0, 10.0, 20.0, 30.0).scaled(0.5, 2.0);
        assert_eq!(b, BBox::new(5.0, 20.0, 10.0, 60.0));
        assert_eq!(b.width(), 5.0);
        assert_eq!(b.height(), 40.0);
    }
}
