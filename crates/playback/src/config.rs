use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::backend::BackendPreference;
use crate::clock::PlaybackSpeed;
use crate::overlay::OverlayOptions;
use crate::PlaybackError;

/// Player settings; every field has a default so partial JSON files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub max_display_width: u32,
    pub max_display_height: u32,
    pub tick_interval_ms: u64,
    /// Overlay refresh period when an external player owns the video.
    pub overlay_poll_ms: u64,
    pub overlay_visible: bool,
    pub show_labels: bool,
    pub show_track_ids: bool,
    pub backend: BackendPreference,
    pub player_program: String,
    pub speed: PlaybackSpeed,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_display_width: 1280,
            max_display_height: 720,
            tick_interval_ms: 33,
            overlay_poll_ms: 50,
            overlay_visible: true,
            show_labels: true,
            show_track_ids: true,
            backend: BackendPreference::Auto,
            player_program: "mpv".to_string(),
            speed: PlaybackSpeed::NORMAL,
        }
    }
}

impl PlayerConfig {
    pub fn load(path: &Path) -> Result<Self, PlaybackError> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| PlaybackError::Config(format!("{}: {e}", path.display())))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn overlay_poll_interval(&self) -> Duration {
        Duration::from_millis(self.overlay_poll_ms.max(1))
    }

    pub fn overlay_options(&self) -> OverlayOptions {
        OverlayOptions {
            visible: self.overlay_visible,
            show_labels: self.show_labels,
            show_track_ids: self.show_track_ids,
        }
    }
}
