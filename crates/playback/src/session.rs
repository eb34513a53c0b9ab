use annotations::AnnotationTable;
use media_io::VideoInfo;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::backend::{
    BackendFactory, BackendKind, BackendPreference, DisplaySink, PlaybackBackend, PlayerState,
};
use crate::clock::PlaybackSpeed;
use crate::overlay::OverlayOptions;
use crate::PlaybackError;

fn is_backend_failure(e: &PlaybackError) -> bool {
    !matches!(
        e,
        PlaybackError::NotReady | PlaybackError::NoVideo | PlaybackError::InvalidSpeed(_)
    )
}

/// One open video: the active backend plus the state that has to survive a
/// backend switch (annotations, display toggles, speed).
pub struct PlaybackSession {
    factory: BackendFactory,
    backend: Option<Box<dyn PlaybackBackend>>,
    video: Option<VideoInfo>,
    table: Option<Arc<AnnotationTable>>,
    overlay: OverlayOptions,
    speed: PlaybackSpeed,
}

impl PlaybackSession {
    pub fn new(factory: BackendFactory) -> Self {
        let overlay = factory.config().overlay_options();
        let speed = factory.config().speed;
        Self {
            factory,
            backend: None,
            video: None,
            table: None,
            overlay,
            speed,
        }
    }

    pub fn factory(&self) -> &BackendFactory {
        &self.factory
    }

    pub fn video(&self) -> Option<&VideoInfo> {
        self.video.as_ref()
    }

    pub fn annotations(&self) -> Option<&Arc<AnnotationTable>> {
        self.table.as_ref()
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    pub fn state(&self) -> PlayerState {
        self.backend
            .as_ref()
            .map(|b| b.state())
            .unwrap_or(PlayerState::Uninitialized)
    }

    pub fn current_time(&self) -> f64 {
        self.backend.as_ref().map(|b| b.current_time()).unwrap_or(0.0)
    }

    pub fn display_size(&self) -> (u32, u32) {
        self.backend.as_ref().map(|b| b.display_size()).unwrap_or((0, 0))
    }

    pub fn overlay_options(&self) -> OverlayOptions {
        self.overlay
    }

    pub fn speed(&self) -> PlaybackSpeed {
        self.speed
    }

    fn create_backend(&mut self) -> Result<Box<dyn PlaybackBackend>, PlaybackError> {
        let preference = self.factory.config().backend;
        match self.factory.create(preference) {
            Ok(backend) => Ok(backend),
            Err(e @ PlaybackError::PlayerUnavailable(_)) => {
                warn!(error = %e, "external player unavailable; using embedded decoder");
                self.factory.create(BackendPreference::Embedded)
            }
            Err(e) => Err(e),
        }
    }

    fn configure(&self, backend: &mut dyn PlaybackBackend, now: Instant) -> Result<(), PlaybackError> {
        backend.set_overlay_options(self.overlay);
        backend.set_speed(self.speed, now)?;
        if let Some(table) = &self.table {
            backend.set_annotations(table.clone(), now);
        }
        Ok(())
    }

    /// Open `video`, releasing whatever was open before. Annotations of the
    /// previous video are discarded.
    pub fn open_video(&mut self, video: VideoInfo, now: Instant) -> Result<BackendKind, PlaybackError> {
        self.close();
        let mut backend = self.create_backend()?;
        if let Err(e) = backend.open(&video) {
            if backend.kind() != BackendKind::External {
                return Err(e);
            }
            warn!(error = %e, "external player failed to open video; disabling it for this run");
            backend.shutdown();
            self.factory.disable_external();
            backend = self.factory.create(BackendPreference::Embedded)?;
            backend.open(&video)?;
        }
        self.configure(backend.as_mut(), now)?;
        let kind = backend.kind();
        info!(path = %video.path.display(), backend = %kind, "video opened");
        self.video = Some(video);
        self.backend = Some(backend);
        Ok(kind)
    }

    /// Replace the running external backend with an embedded one at the same position.
    fn fall_back_to_embedded(&mut self, now: Instant) -> Result<(), PlaybackError> {
        let video = self.video.clone().ok_or(PlaybackError::NoVideo)?;
        let (t, was_playing) = match self.backend.take() {
            Some(mut old) => {
                let snapshot = (old.current_time(), old.state() == PlayerState::Playing);
                old.shutdown();
                snapshot
            }
            None => (0.0, false),
        };
        self.factory.disable_external();
        let mut backend = self.factory.create(BackendPreference::Embedded)?;
        backend.open(&video)?;
        self.configure(backend.as_mut(), now)?;
        backend.seek(t, now)?;
        if was_playing {
            backend.play(now)?;
        }
        self.backend = Some(backend);
        Ok(())
    }

    fn with_backend<F>(&mut self, now: Instant, op: F) -> Result<(), PlaybackError>
    where
        F: Fn(&mut dyn PlaybackBackend) -> Result<(), PlaybackError>,
    {
        let backend = self.backend.as_mut().ok_or(PlaybackError::NoVideo)?;
        match op(backend.as_mut()) {
            Err(e) if backend.kind() == BackendKind::External && is_backend_failure(&e) => {
                warn!(error = %e, "external player failed; switching to embedded decoder for this run");
                self.fall_back_to_embedded(now)?;
                let backend = self.backend.as_mut().ok_or(PlaybackError::NoVideo)?;
                op(backend.as_mut())
            }
            other => other,
        }
    }

    pub fn set_annotations(&mut self, table: Arc<AnnotationTable>, now: Instant) {
        if let Some(backend) = self.backend.as_mut() {
            backend.set_annotations(table.clone(), now);
        }
        self.table = Some(table);
    }

    pub fn play(&mut self, now: Instant) -> Result<(), PlaybackError> {
        self.with_backend(now, |b| b.play(now))
    }

    pub fn pause(&mut self, now: Instant) -> Result<(), PlaybackError> {
        self.with_backend(now, |b| b.pause(now))
    }

    pub fn toggle_play(&mut self, now: Instant) -> Result<(), PlaybackError> {
        if self.state() == PlayerState::Playing {
            self.pause(now)
        } else {
            self.play(now)
        }
    }

    pub fn seek(&mut self, t_sec: f64, now: Instant) -> Result<(), PlaybackError> {
        self.with_backend(now, |b| b.seek(t_sec, now))
    }

    pub fn set_speed(&mut self, speed: PlaybackSpeed, now: Instant) -> Result<(), PlaybackError> {
        self.speed = speed;
        if self.backend.is_none() {
            return Ok(());
        }
        self.with_backend(now, |b| b.set_speed(speed, now))
    }

    pub fn set_overlay_options(&mut self, options: OverlayOptions) {
        self.overlay = options;
        if let Some(backend) = self.backend.as_mut() {
            backend.set_overlay_options(options);
        }
    }

    pub fn set_overlay_visible(&mut self, visible: bool) {
        self.overlay.visible = visible;
        if let Some(backend) = self.backend.as_mut() {
            backend.set_overlay_visible(visible);
        }
    }

    pub fn set_show_labels(&mut self, show: bool) {
        let options = OverlayOptions {
            show_labels: show,
            ..self.overlay
        };
        self.set_overlay_options(options);
    }

    pub fn set_show_track_ids(&mut self, show: bool) {
        let options = OverlayOptions {
            show_track_ids: show,
            ..self.overlay
        };
        self.set_overlay_options(options);
    }

    /// Advance the active backend. An external player that dies mid-run is
    /// replaced by the embedded decoder at the last known position.
    pub fn tick(&mut self, now: Instant, sink: &mut dyn DisplaySink) -> Result<(), PlaybackError> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        match backend.tick(now, sink) {
            Err(e) if backend.kind() == BackendKind::External && is_backend_failure(&e) => {
                warn!(error = %e, "external player died; switching to embedded decoder for this run");
                self.fall_back_to_embedded(now)?;
                match self.backend.as_mut() {
                    Some(backend) => backend.tick(now, sink),
                    None => Ok(()),
                }
            }
            other => other,
        }
    }

    /// Release the backend and forget the video and its annotations.
    pub fn close(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.shutdown();
        }
        self.video = None;
        self.table = None;
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.close();
    }
}
