use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f32 },
    #[error("unknown tracker '{0}'")]
    UnknownTracker(String),
    #[error("model name is empty")]
    EmptyModel,
}

/// Multi-object tracker used to link detections across frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TrackerKind {
    ByteTrack,
    #[default]
    BotSort,
}

impl TrackerKind {
    /// Tracker configuration file handed to the detector.
    pub fn config_file(self) -> &'static str {
        match self {
            TrackerKind::ByteTrack => "bytetrack.yaml",
            TrackerKind::BotSort => "botsort.yaml",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrackerKind::ByteTrack => "ByteTrack",
            TrackerKind::BotSort => "BoT-SORT",
        }
    }
}

impl std::str::FromStr for TrackerKind {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ByteTrack" | "bytetrack" | "bytetrack.yaml" => Ok(TrackerKind::ByteTrack),
            "BoT-SORT" | "botsort" | "botsort.yaml" => Ok(TrackerKind::BotSort),
            other => Err(ParamsError::UnknownTracker(other.to_string())),
        }
    }
}

impl TryFrom<String> for TrackerKind {
    type Error = ParamsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TrackerKind> for String {
    fn from(kind: TrackerKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one tracking run. Field names on the wire follow the
/// tracking service (`conf`, `iou`, `model`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackParams {
    #[serde(rename = "conf")]
    pub confidence_threshold: f32,
    #[serde(rename = "iou")]
    pub iou_threshold: f32,
    pub tracker: TrackerKind,
    #[serde(rename = "model")]
    pub model_name: String,
    #[serde(rename = "persist")]
    pub persist_identities: bool,
    #[serde(rename = "classes")]
    pub class_filter: Option<Vec<u32>>,
    pub include_saliency: bool,
    pub include_audio_levels: bool,
}

impl Default for TrackParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            tracker: TrackerKind::BotSort,
            model_name: "yolo11n".to_string(),
            persist_identities: true,
            class_filter: None,
            include_saliency: true,
            include_audio_levels: true,
        }
    }
}

impl TrackParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        check_threshold("conf", self.confidence_threshold)?;
        check_threshold("iou", self.iou_threshold)?;
        if self.model_name.trim().is_empty() {
            return Err(ParamsError::EmptyModel);
        }
        Ok(())
    }

    /// Weights file for `model_name`, resolving the short aliases.
    pub fn model_weights(&self) -> String {
        model_weights(&self.model_name)
    }

    /// Suffix appended to every progress message for the extras requested.
    pub fn stage_suffix(&self) -> String {
        let mut suffix = String::new();
        if self.include_saliency {
            suffix.push_str(" + saliency");
        }
        if self.include_audio_levels {
            suffix.push_str(" + audio scan");
        }
        suffix
    }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ParamsError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ParamsError::ThresholdOutOfRange { name, value })
    }
}

pub fn model_weights(name: &str) -> String {
    let resolved = match name.to_lowercase().as_str() {
        "yolo11n" => "yolo11n.pt".to_string(),
        "yolo11s" => "yolo11s.pt".to_string(),
        "yolo11m" => "yolo11m.pt".to_string(),
        "yolo8n" => "yolov8n.pt".to_string(),
        "yolo8s" => "yolov8s.pt".to_string(),
        _ => name.to_string(),
    };
    if resolved.ends_with(".pt") {
        resolved
    } else {
        format!("{resolved}.pt")
    }
}
