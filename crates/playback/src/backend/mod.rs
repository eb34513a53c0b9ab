//! Playback backends and the capability-checked factory that picks one.
//!
//! Two structurally different ways of getting pixels on screen sit behind
//! [`PlaybackBackend`]: an in-process decoder that composites the overlay into
//! each frame, and an out-of-process player whose video the host surface shows
//! while only a transparent overlay layer is redrawn here.

use annotations::AnnotationTable;
use image::RgbaImage;
use media_io::{FfmpegFrameDecoder, FrameDecoder, VideoInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::clock::PlaybackSpeed;
use crate::config::PlayerConfig;
use crate::overlay::{OverlayOptions, ShapeLayer};
use crate::PlaybackError;

mod embedded;
mod external;
mod mpv;

pub use embedded::EmbeddedDecodeBackend;
pub use external::{ExternalPlayer, ExternalPlayerBackend, PlayerStatus};
pub use mpv::MpvPlayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    Uninitialized,
    /// Video open, annotations not available yet.
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Embedded,
    External,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Embedded => write!(f, "embedded"),
            BackendKind::External => write!(f, "external"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Embedded,
    External,
}

/// Where a backend puts its output each tick.
pub trait DisplaySink {
    /// A composited frame at display size (embedded backend).
    fn present_frame(&mut self, frame: &RgbaImage);
    /// Overlay shapes for the transparent layer above an external player.
    fn present_overlay(&mut self, layer: &ShapeLayer);
}

pub trait PlaybackBackend: Send {
    fn kind(&self) -> BackendKind;
    fn state(&self) -> PlayerState;

    /// Open a video: `Uninitialized -> Loading`, or `Ready` if annotations are already set.
    fn open(&mut self, video: &VideoInfo) -> Result<(), PlaybackError>;
    /// Attach annotations; `Loading -> Ready`.
    fn set_annotations(&mut self, table: Arc<AnnotationTable>, now: Instant);

    fn play(&mut self, now: Instant) -> Result<(), PlaybackError>;
    fn pause(&mut self, now: Instant) -> Result<(), PlaybackError>;
    fn seek(&mut self, t_sec: f64, now: Instant) -> Result<(), PlaybackError>;
    fn set_speed(&mut self, speed: PlaybackSpeed, now: Instant) -> Result<(), PlaybackError>;

    fn set_overlay_visible(&mut self, visible: bool);
    fn set_overlay_options(&mut self, options: OverlayOptions);

    fn current_time(&self) -> f64;
    fn display_size(&self) -> (u32, u32);

    /// Advance one render tick and push output to `sink`. Decode and player
    /// hiccups are logged and retried on a later tick; an error means the
    /// backend is gone for good.
    fn tick(&mut self, now: Instant, sink: &mut dyn DisplaySink) -> Result<(), PlaybackError>;

    /// Release the decoder or player. Idempotent.
    fn shutdown(&mut self);
}

/// Opens a frame decoder for a probed video at the given frame rate.
pub type DecoderOpener =
    Arc<dyn Fn(&VideoInfo, f64) -> Result<Box<dyn FrameDecoder>, PlaybackError> + Send + Sync>;

/// Starts an external player process, optionally embedded in a host window.
pub type PlayerLauncher = Arc<
    dyn Fn(&PlayerConfig, Option<u64>) -> Result<Box<dyn ExternalPlayer>, PlaybackError>
        + Send
        + Sync,
>;

fn ffmpeg_opener() -> DecoderOpener {
    Arc::new(
        |video: &VideoInfo, fps: f64| -> Result<Box<dyn FrameDecoder>, PlaybackError> {
            Ok(Box::new(FfmpegFrameDecoder::open(video, fps)?))
        },
    )
}

fn mpv_launcher() -> PlayerLauncher {
    Arc::new(
        |config: &PlayerConfig,
         window_id: Option<u64>|
         -> Result<Box<dyn ExternalPlayer>, PlaybackError> {
            Ok(Box::new(MpvPlayer::spawn(&config.player_program, window_id)?))
        },
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Resolved path of the external player program, if installed.
    pub external_player: Option<PathBuf>,
    pub ffmpeg: bool,
}

impl BackendCapabilities {
    pub fn probe(config: &PlayerConfig) -> Self {
        let external_player = which::which(&config.player_program).ok();
        let ffmpeg = which::which("ffmpeg").is_ok();
        info!(
            player = %config.player_program,
            external = external_player.is_some(),
            ffmpeg,
            "probed playback capabilities"
        );
        Self {
            external_player,
            ffmpeg,
        }
    }
}

/// The only place that decides which backend runs.
pub struct BackendFactory {
    config: PlayerConfig,
    capabilities: BackendCapabilities,
    window_id: Option<u64>,
    external_disabled: bool,
    decoder_opener: DecoderOpener,
    player_launcher: PlayerLauncher,
}

impl BackendFactory {
    pub fn new(config: PlayerConfig) -> Self {
        let capabilities = BackendCapabilities::probe(&config);
        Self::with_capabilities(config, capabilities)
    }

    pub fn with_capabilities(config: PlayerConfig, capabilities: BackendCapabilities) -> Self {
        Self {
            config,
            capabilities,
            window_id: None,
            external_disabled: false,
            decoder_opener: ffmpeg_opener(),
            player_launcher: mpv_launcher(),
        }
    }

    /// Native window the external player should render into.
    pub fn window_id(mut self, window_id: Option<u64>) -> Self {
        self.window_id = window_id;
        self
    }

    pub fn decoder_opener(mut self, opener: DecoderOpener) -> Self {
        self.decoder_opener = opener;
        self
    }

    pub fn player_launcher(mut self, launcher: PlayerLauncher) -> Self {
        self.player_launcher = launcher;
        self
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    pub fn external_available(&self) -> bool {
        !self.external_disabled && self.capabilities.external_player.is_some()
    }

    /// Stop offering the external backend for the rest of the run.
    pub fn disable_external(&mut self) {
        self.external_disabled = true;
    }

    /// Resolve `preference` to a backend kind.
    ///
    /// `Auto` picks the external player when it is installed and a host
    /// window was supplied to embed it in, or when ffmpeg is missing.
    pub fn resolve(&self, preference: BackendPreference) -> Result<BackendKind, PlaybackError> {
        let ffmpeg = self.capabilities.ffmpeg;
        match preference {
            BackendPreference::Embedded if ffmpeg => Ok(BackendKind::Embedded),
            BackendPreference::Embedded => Err(PlaybackError::DecoderUnavailable),
            BackendPreference::External if self.external_available() => Ok(BackendKind::External),
            BackendPreference::External => Err(PlaybackError::PlayerUnavailable(format!(
                "`{}` not found or disabled",
                self.config.player_program
            ))),
            BackendPreference::Auto => {
                if self.external_available() && (self.window_id.is_some() || !ffmpeg) {
                    Ok(BackendKind::External)
                } else if ffmpeg {
                    Ok(BackendKind::Embedded)
                } else {
                    Err(PlaybackError::DecoderUnavailable)
                }
            }
        }
    }

    pub fn create(
        &self,
        preference: BackendPreference,
    ) -> Result<Box<dyn PlaybackBackend>, PlaybackError> {
        let kind = self.resolve(preference)?;
        debug!(?preference, %kind, "creating playback backend");
        Ok(match kind {
            BackendKind::Embedded => Box::new(EmbeddedDecodeBackend::new(
                &self.config,
                self.decoder_opener.clone(),
            )),
            BackendKind::External => Box::new(ExternalPlayerBackend::new(
                &self.config,
                self.player_launcher.clone(),
                self.window_id,
            )),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records everything a backend presents.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub frames: Vec<RgbaImage>,
        pub overlays: Vec<ShapeLayer>,
    }

    impl DisplaySink for RecordingSink {
        fn present_frame(&mut self, frame: &RgbaImage) {
            self.frames.push(frame.clone());
        }

        fn present_overlay(&mut self, layer: &ShapeLayer) {
            self.overlays.push(layer.clone());
        }
    }

    fn caps(external: bool) -> BackendCapabilities {
        BackendCapabilities {
            external_player: external.then(|| PathBuf::from("/usr/bin/mpv")),
            ffmpeg: true,
        }
    }

    fn caps_without_ffmpeg(external: bool) -> BackendCapabilities {
        BackendCapabilities {
            ffmpeg: false,
            ..caps(external)
        }
    }

    #[test]
    fn test_explicit_preferences() {
        let factory = BackendFactory::with_capabilities(PlayerConfig::default(), caps(true));
        assert_eq!(
            factory.resolve(BackendPreference::Embedded).unwrap(),
            BackendKind::Embedded
        );
        assert_eq!(
            factory.resolve(BackendPreference::External).unwrap(),
            BackendKind::External
        );
    }

    #[test]
    fn test_auto_needs_player_and_window() {
        let factory = BackendFactory::with_capabilities(PlayerConfig::default(), caps(true));
        assert_eq!(
            factory.resolve(BackendPreference::Auto).unwrap(),
            BackendKind::Embedded
        );
        let factory = factory.window_id(Some(42));
        assert_eq!(
            factory.resolve(BackendPreference::Auto).unwrap(),
            BackendKind::External
        );

        let factory =
            BackendFactory::with_capabilities(PlayerConfig::default(), caps(false)).window_id(Some(42));
        assert_eq!(
            factory.resolve(BackendPreference::Auto).unwrap(),
            BackendKind::Embedded
        );
    }

    #[test]
    fn test_disabled_external_is_unavailable() {
        let mut factory =
            BackendFactory::with_capabilities(PlayerConfig::default(), caps(true)).window_id(Some(1));
        factory.disable_external();
        assert!(!factory.external_available());
        assert!(matches!(
            factory.resolve(BackendPreference::External),
            Err(PlaybackError::PlayerUnavailable(_))
        ));
        assert_eq!(
            factory.resolve(BackendPreference::Auto).unwrap(),
            BackendKind::Embedded
        );
        assert_eq!(
            factory.create(BackendPreference::Auto).unwrap().kind(),
            BackendKind::Embedded
        );
    }

    #[test]
    fn test_missing_ffmpeg_rules_out_embedded() {
        let factory =
            BackendFactory::with_capabilities(PlayerConfig::default(), caps_without_ffmpeg(true));
        assert!(matches!(
            factory.resolve(BackendPreference::Embedded),
            Err(PlaybackError::DecoderUnavailable)
        ));
        // No host window, but the player is the only way to show video.
        assert_eq!(
            factory.resolve(BackendPreference::Auto).unwrap(),
            BackendKind::External
        );

        let factory =
            BackendFactory::with_capabilities(PlayerConfig::default(), caps_without_ffmpeg(false));
        assert!(matches!(
            factory.resolve(BackendPreference::Auto),
            Err(PlaybackError::DecoderUnavailable)
        ));
    }
}
