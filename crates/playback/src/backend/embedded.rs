use annotations::{frame_index_for_time, normalize_frame_rate, AnnotationTable, FrameIndex};
use image::imageops::{self, FilterType};
use media_io::VideoInfo;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::{BackendKind, DecoderOpener, DisplaySink, PlaybackBackend, PlayerState};
use crate::clock::{PlaybackClock, PlaybackSpeed};
use crate::config::PlayerConfig;
use crate::fit::fit_size;
use crate::frame_source::{DecodedFrameSource, FrameSource};
use crate::overlay::{ImageSurface, OverlayOptions, OverlayRenderer};
use crate::PlaybackError;

/// Decodes frames in-process and composites the overlay into each one.
pub struct EmbeddedDecodeBackend {
    opener: DecoderOpener,
    max_display: (u32, u32),
    state: PlayerState,
    video: Option<VideoInfo>,
    source: Option<DecodedFrameSource>,
    table: Option<Arc<AnnotationTable>>,
    clock: PlaybackClock,
    display_size: (u32, u32),
    overlay: OverlayOptions,
    renderer: OverlayRenderer,
    /// Last index handed to the sink (or attempted); `dirty` forces a redraw anyway.
    last_presented: Option<FrameIndex>,
    dirty: bool,
}

impl EmbeddedDecodeBackend {
    pub fn new(config: &PlayerConfig, opener: DecoderOpener) -> Self {
        Self {
            opener,
            max_display: (config.max_display_width, config.max_display_height),
            state: PlayerState::Uninitialized,
            video: None,
            source: None,
            table: None,
            clock: PlaybackClock::new(0.0),
            display_size: (0, 0),
            overlay: config.overlay_options(),
            renderer: OverlayRenderer,
            last_presented: None,
            dirty: true,
        }
    }

    /// Frame rate and frame count, preferring the annotation table over probed metadata.
    fn timeline(&self) -> (f64, usize) {
        match (&self.table, &self.video) {
            (Some(table), _) => (table.frame_rate(), table.frame_count()),
            (None, Some(video)) => (normalize_frame_rate(video.fps.unwrap_or(0.0)), video.frame_count),
            (None, None) => (normalize_frame_rate(0.0), 0),
        }
    }

    fn end_time(&self) -> f64 {
        let (fps, count) = self.timeline();
        if count == 0 {
            0.0
        } else {
            (count - 1) as f64 / fps
        }
    }

    pub fn frame_index(&self) -> FrameIndex {
        let (fps, count) = self.timeline();
        frame_index_for_time(self.clock.current_time(), fps, count)
    }
}

impl PlaybackBackend for EmbeddedDecodeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    fn state(&self) -> PlayerState {
        self.state
    }

    fn open(&mut self, video: &VideoInfo) -> Result<(), PlaybackError> {
        self.shutdown();
        self.video = Some(video.clone());
        let (fps, _) = self.timeline();
        let decoder = (self.opener)(video, fps)?;
        self.source = Some(DecodedFrameSource::new(decoder));
        self.display_size = fit_size(
            video.width,
            video.height,
            self.max_display.0,
            self.max_display.1,
        );
        let speed = self.clock.speed();
        let now = Instant::now();
        self.clock = PlaybackClock::new(self.end_time());
        self.clock.set_speed(speed, now);
        self.state = if self.table.is_some() {
            PlayerState::Ready
        } else {
            PlayerState::Loading
        };
        self.last_presented = None;
        self.dirty = true;
        info!(
            path = %video.path.display(),
            display_w = self.display_size.0,
            display_h = self.display_size.1,
            "embedded backend opened video"
        );
        Ok(())
    }

    fn set_annotations(&mut self, table: Arc<AnnotationTable>, now: Instant) {
        self.table = Some(table);
        let end = self.end_time();
        self.clock.set_end_time(end, now);
        if self.state == PlayerState::Loading {
            self.state = PlayerState::Ready;
        }
        self.dirty = true;
    }

    fn play(&mut self, now: Instant) -> Result<(), PlaybackError> {
        match self.state {
            PlayerState::Uninitialized | PlayerState::Loading => Err(PlaybackError::NotReady),
            PlayerState::Playing | PlayerState::Ended => Ok(()),
            PlayerState::Ready | PlayerState::Paused => {
                self.state = if self.clock.play(now) {
                    PlayerState::Playing
                } else {
                    PlayerState::Ended
                };
                Ok(())
            }
        }
    }

    fn pause(&mut self, now: Instant) -> Result<(), PlaybackError> {
        if self.state == PlayerState::Playing {
            self.clock.pause(now);
            self.state = PlayerState::Paused;
        }
        Ok(())
    }

    fn seek(&mut self, t_sec: f64, now: Instant) -> Result<(), PlaybackError> {
        if self.state == PlayerState::Uninitialized {
            return Err(PlaybackError::NoVideo);
        }
        self.clock.seek(t_sec, now);
        if self.state == PlayerState::Ended && !self.clock.at_end() {
            self.state = PlayerState::Paused;
        }
        self.dirty = true;
        Ok(())
    }

    fn set_speed(&mut self, speed: PlaybackSpeed, now: Instant) -> Result<(), PlaybackError> {
        self.clock.set_speed(speed, now);
        Ok(())
    }

    fn set_overlay_visible(&mut self, visible: bool) {
        self.overlay.visible = visible;
        self.dirty = true;
    }

    fn set_overlay_options(&mut self, options: OverlayOptions) {
        self.overlay = options;
        self.dirty = true;
    }

    fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    fn display_size(&self) -> (u32, u32) {
        self.display_size
    }

    fn tick(&mut self, now: Instant, sink: &mut dyn DisplaySink) -> Result<(), PlaybackError> {
        if self.source.is_none() {
            return Ok(());
        }
        self.clock.tick(now);
        if self.state == PlayerState::Playing && !self.clock.is_playing() {
            info!(t = self.clock.current_time(), "end of stream");
            self.state = PlayerState::Ended;
        }

        let index = self.frame_index();
        if !self.dirty && self.last_presented == Some(index) {
            return Ok(());
        }
        self.last_presented = Some(index);
        self.dirty = false;

        let (dw, dh) = self.display_size;
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };
        let Some(frame) = source.get_frame(index) else {
            debug!(index, "no frame; keeping previous image");
            return Ok(());
        };
        let mut display = if frame.dimensions() == (dw, dh) {
            frame.clone()
        } else {
            imageops::resize(frame, dw, dh, FilterType::Triangle)
        };

        if let Some(table) = self.table.as_ref().filter(|_| self.overlay.visible) {
            let (sw, sh) = match table.frame_size() {
                (0, _) | (_, 0) => frame.dimensions(),
                size => size,
            };
            self.renderer.render(
                &mut ImageSurface::new(&mut display),
                table.frame(index),
                sw,
                sh,
                &self.overlay,
            );
        }
        sink.present_frame(&display);
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.source.take().is_some() {
            debug!("embedded decoder released");
        }
        self.state = PlayerState::Uninitialized;
    }
}
