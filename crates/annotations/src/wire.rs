//! JSON shape produced by the tracking collaborator: parallel per-frame arrays
//! keyed by stringified frame index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    normalize_frame_rate, AnnotationError, AnnotationTable, BBox, Detection, FrameAnnotation,
    FrameIndex, SaliencyMap,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct WireFrame {
    #[serde(default)]
    boxes: Vec<[f32; 4]>,
    #[serde(default)]
    track_ids: Vec<Option<i64>>,
    #[serde(default)]
    classes: Vec<u32>,
    #[serde(default)]
    scores: Vec<f32>,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saliency: Option<SaliencyMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireTable {
    #[serde(default)]
    fps: f64,
    #[serde(default)]
    frame_count: usize,
    #[serde(default)]
    video_width: u32,
    #[serde(default)]
    video_height: u32,
    #[serde(default)]
    frames: BTreeMap<FrameIndex, WireFrame>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    audio_levels: Vec<f32>,
}

fn check_len(
    frame: FrameIndex,
    field: &'static str,
    actual: usize,
    expected: usize,
) -> Result<(), AnnotationError> {
    if actual == 0 || actual == expected {
        Ok(())
    } else {
        Err(AnnotationError::Misaligned {
            frame,
            field,
            expected,
            actual,
        })
    }
}

impl WireFrame {
    fn into_frame(self, index: FrameIndex) -> Result<FrameAnnotation, AnnotationError> {
        let n = self.boxes.len();
        check_len(index, "track_ids", self.track_ids.len(), n)?;
        check_len(index, "classes", self.classes.len(), n)?;
        check_len(index, "scores", self.scores.len(), n)?;
        check_len(index, "names", self.names.len(), n)?;

        let mut detections = Vec::with_capacity(n);
        for (i, raw_box) in self.boxes.into_iter().enumerate() {
            let score = self.scores.get(i).copied().unwrap_or(0.0);
            if !(0.0..=1.0).contains(&score) {
                return Err(AnnotationError::ScoreOutOfRange {
                    frame: index,
                    score,
                });
            }
            let class_id = self.classes.get(i).copied();
            // Producers without a name table fall back to the numeric class id.
            let class_name = match self.names.get(i) {
                Some(name) => name.clone(),
                None => class_id.map(|c| c.to_string()).unwrap_or_default(),
            };
            detections.push(Detection {
                bbox: BBox::from(raw_box),
                track_id: self.track_ids.get(i).copied().flatten(),
                class_id,
                class_name,
                score,
            });
        }
        Ok(FrameAnnotation {
            detections,
            saliency: self.saliency,
        })
    }

    fn from_frame(frame: FrameAnnotation) -> Self {
        let mut wire = WireFrame {
            saliency: frame.saliency,
            ..WireFrame::default()
        };
        let any_ids = frame.detections.iter().any(|d| d.track_id.is_some());
        let all_classes = frame.detections.iter().all(|d| d.class_id.is_some());
        for d in frame.detections {
            wire.boxes.push(d.bbox.into());
            if any_ids {
                wire.track_ids.push(d.track_id);
            }
            if all_classes {
                if let Some(c) = d.class_id {
                    wire.classes.push(c);
                }
            }
            wire.scores.push(d.score);
            wire.names.push(d.class_name);
        }
        wire
    }
}

impl TryFrom<WireTable> for AnnotationTable {
    type Error = AnnotationError;

    fn try_from(wire: WireTable) -> Result<Self, Self::Error> {
        let mut builder = AnnotationTable::builder(normalize_frame_rate(wire.fps))
            .frame_size(wire.video_width, wire.video_height)
            .frame_count(wire.frame_count)
            .audio_levels(wire.audio_levels);
        for (index, frame) in wire.frames {
            builder.push_frame(index, frame.into_frame(index)?)?;
        }
        Ok(builder.build())
    }
}

impl From<AnnotationTable> for WireTable {
    fn from(table: AnnotationTable) -> Self {
        WireTable {
            fps: table.frame_rate,
            frame_count: table.frame_count,
            video_width: table.frame_width,
            video_height: table.frame_height,
            frames: table
                .frames
                .into_iter()
                .map(|(i, f)| (i, WireFrame::from_frame(f)))
                .collect(),
            audio_levels: table.audio_levels,
        }
    }
}
