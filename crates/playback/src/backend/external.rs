use annotations::{frame_index_for_time, normalize_frame_rate, AnnotationTable, FrameIndex};
use media_io::VideoInfo;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{BackendKind, DisplaySink, PlaybackBackend, PlayerLauncher, PlayerState};
use crate::clock::PlaybackSpeed;
use crate::config::PlayerConfig;
use crate::fit::fit_size;
use crate::overlay::{OverlayOptions, OverlayRenderer, OverlaySurface, ShapeLayer};
use crate::PlaybackError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerStatus {
    pub time_sec: f64,
    pub ended: bool,
}

/// Control surface of an out-of-process media player.
pub trait ExternalPlayer: Send {
    fn load(&mut self, path: &Path) -> Result<(), PlaybackError>;
    fn set_paused(&mut self, paused: bool) -> Result<(), PlaybackError>;
    fn seek(&mut self, t_sec: f64) -> Result<(), PlaybackError>;
    fn set_rate(&mut self, rate: f64) -> Result<(), PlaybackError>;
    /// `Ok(None)` while the player has no position to report yet.
    fn status(&mut self) -> Result<Option<PlayerStatus>, PlaybackError>;

    /// Teardown, called in this order: stop playback, release the player
    /// instance, release the native handle.
    fn stop(&mut self) -> Result<(), PlaybackError>;
    fn release(&mut self) -> Result<(), PlaybackError>;
    fn release_handle(&mut self) -> Result<(), PlaybackError>;
}

/// The player renders video itself; this backend only polls its position on a
/// fixed period and redraws the transparent overlay layer to match.
pub struct ExternalPlayerBackend {
    launcher: PlayerLauncher,
    config: PlayerConfig,
    window_id: Option<u64>,
    player: Option<Box<dyn ExternalPlayer>>,
    state: PlayerState,
    video: Option<VideoInfo>,
    table: Option<Arc<AnnotationTable>>,
    overlay: OverlayOptions,
    renderer: OverlayRenderer,
    layer: ShapeLayer,
    poll_interval: Duration,
    last_poll: Option<Instant>,
    current_time: f64,
    speed: PlaybackSpeed,
    last_index: Option<FrameIndex>,
    dirty: bool,
}

impl ExternalPlayerBackend {
    pub fn new(config: &PlayerConfig, launcher: PlayerLauncher, window_id: Option<u64>) -> Self {
        Self {
            launcher,
            config: config.clone(),
            window_id,
            player: None,
            state: PlayerState::Uninitialized,
            video: None,
            table: None,
            overlay: config.overlay_options(),
            renderer: OverlayRenderer,
            layer: ShapeLayer::default(),
            poll_interval: config.overlay_poll_interval(),
            last_poll: None,
            current_time: 0.0,
            speed: config.speed,
            last_index: None,
            dirty: true,
        }
    }

    pub fn overlay_layer(&self) -> &ShapeLayer {
        &self.layer
    }

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

    fn player(&mut self) -> Result<&mut Box<dyn ExternalPlayer>, PlaybackError> {
        self.player.as_mut().ok_or(PlaybackError::NoVideo)
    }

    /// Query the player and redraw the overlay if the frame changed. Only a
    /// player that has exited is reported; other query errors wait for the
    /// next poll.
    fn poll(&mut self, sink: &mut dyn DisplaySink) -> Result<(), PlaybackError> {
        let Some(player) = self.player.as_mut() else {
            return Ok(());
        };
        match player.status() {
            Ok(Some(status)) => {
                self.current_time = status.time_sec.max(0.0);
                if status.ended && self.state == PlayerState::Playing {
                    info!(t = self.current_time, "external player reached end of stream");
                    self.state = PlayerState::Ended;
                }
            }
            Ok(None) => return Ok(()),
            Err(e @ PlaybackError::PlayerExited(_)) => return Err(e),
            Err(e) => {
                debug!(error = %e, "player position unavailable; retrying next poll");
                return Ok(());
            }
        }

        let (fps, count) = self.timeline();
        let index = frame_index_for_time(self.current_time, fps, count);
        if !self.dirty && self.last_index == Some(index) {
            return Ok(());
        }
        self.last_index = Some(index);
        self.dirty = false;

        let (sw, sh) = match (&self.table, &self.video) {
            (Some(table), _) if table.frame_size().0 > 0 && table.frame_size().1 > 0 => {
                table.frame_size()
            }
            (_, Some(video)) => (video.width, video.height),
            _ => (0, 0),
        };
        let frame = self.table.as_ref().and_then(|t| t.frame(index));
        self.renderer
            .render(&mut self.layer, frame, sw, sh, &self.overlay);
        sink.present_overlay(&self.layer);
        Ok(())
    }
}

impl PlaybackBackend for ExternalPlayerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::External
    }

    fn state(&self) -> PlayerState {
        self.state
    }

    fn open(&mut self, video: &VideoInfo) -> Result<(), PlaybackError> {
        self.shutdown();
        let mut player = (self.launcher)(&self.config, self.window_id)?;
        let loaded = player
            .load(&video.path)
            .and_then(|_| player.set_rate(self.speed.value()));
        self.player = Some(player);
        if let Err(e) = loaded {
            self.shutdown();
            return Err(e);
        }

        self.video = Some(video.clone());
        let (w, h) = fit_size(
            video.width,
            video.height,
            self.config.max_display_width,
            self.config.max_display_height,
        );
        self.layer = ShapeLayer::new(w, h);
        self.current_time = 0.0;
        self.last_poll = None;
        self.last_index = None;
        self.dirty = true;
        self.state = if self.table.is_some() {
            PlayerState::Ready
        } else {
            PlayerState::Loading
        };
        info!(path = %video.path.display(), window = ?self.window_id, "external player opened video");
        Ok(())
    }

    fn set_annotations(&mut self, table: Arc<AnnotationTable>, _now: Instant) {
        self.table = Some(table);
        if self.state == PlayerState::Loading {
            self.state = PlayerState::Ready;
        }
        self.dirty = true;
    }

    fn play(&mut self, _now: Instant) -> Result<(), PlaybackError> {
        match self.state {
            PlayerState::Uninitialized | PlayerState::Loading => Err(PlaybackError::NotReady),
            PlayerState::Playing | PlayerState::Ended => Ok(()),
            PlayerState::Ready | PlayerState::Paused => {
                self.player()?.set_paused(false)?;
                self.state = PlayerState::Playing;
                Ok(())
            }
        }
    }

    fn pause(&mut self, _now: Instant) -> Result<(), PlaybackError> {
        if self.state == PlayerState::Playing {
            self.player()?.set_paused(true)?;
            self.state = PlayerState::Paused;
        }
        Ok(())
    }

    fn seek(&mut self, t_sec: f64, _now: Instant) -> Result<(), PlaybackError> {
        let end = self.end_time();
        let t = if t_sec.is_nan() { 0.0 } else { t_sec.clamp(0.0, end) };
        self.player()?.seek(t)?;
        self.current_time = t;
        if self.state == PlayerState::Ended && t < end {
            self.state = PlayerState::Paused;
        }
        self.dirty = true;
        // Redraw on the next tick instead of waiting out the poll period.
        self.last_poll = None;
        Ok(())
    }

    fn set_speed(&mut self, speed: PlaybackSpeed, _now: Instant) -> Result<(), PlaybackError> {
        if let Some(player) = self.player.as_mut() {
            player.set_rate(speed.value())?;
        }
        self.speed = speed;
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
        self.current_time
    }

    fn display_size(&self) -> (u32, u32) {
        self.layer.size()
    }

    fn tick(&mut self, now: Instant, sink: &mut dyn DisplaySink) -> Result<(), PlaybackError> {
        let due = match self.last_poll {
            Some(last) => now.saturating_duration_since(last) >= self.poll_interval,
            None => true,
        };
        if !due {
            return Ok(());
        }
        self.last_poll = Some(now);
        self.poll(sink)
    }

    fn shutdown(&mut self) {
        if let Some(mut player) = self.player.take() {
            if let Err(e) = player.stop() {
                warn!(error = %e, "failed to stop external player");
            }
            if let Err(e) = player.release() {
                warn!(error = %e, "failed to release external player");
            }
            if let Err(e) = player.release_handle() {
                warn!(error = %e, "failed to release external player handle");
            }
            debug!("external player torn down");
        }
        self.state = PlayerState::Uninitialized;
    }
}

impl Drop for ExternalPlayerBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::RecordingSink;
    use annotations::{BBox, Detection, FrameAnnotation};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        calls: Vec<String>,
        statuses: VecDeque<Result<Option<PlayerStatus>, PlaybackError>>,
        fail_stop: bool,
        fail_load: bool,
    }

    struct ScriptedPlayer(Arc<Mutex<Script>>);

    impl ScriptedPlayer {
        fn record(&self, call: String) {
            self.0.lock().unwrap().calls.push(call);
        }
    }

    impl ExternalPlayer for ScriptedPlayer {
        fn load(&mut self, path: &Path) -> Result<(), PlaybackError> {
            self.record(format!("load {}", path.display()));
            if self.0.lock().unwrap().fail_load {
                return Err(PlaybackError::Player("cannot open".into()));
            }
            Ok(())
        }
        fn set_paused(&mut self, paused: bool) -> Result<(), PlaybackError> {
            self.record(format!("paused {paused}"));
            Ok(())
        }
        fn seek(&mut self, t_sec: f64) -> Result<(), PlaybackError> {
            self.record(format!("seek {t_sec}"));
            Ok(())
        }
        fn set_rate(&mut self, rate: f64) -> Result<(), PlaybackError> {
            self.record(format!("rate {rate}"));
            Ok(())
        }
        fn status(&mut self) -> Result<Option<PlayerStatus>, PlaybackError> {
            self.record("status".into());
            self.0
                .lock()
                .unwrap()
                .statuses
                .pop_front()
                .unwrap_or(Ok(None))
        }
        fn stop(&mut self) -> Result<(), PlaybackError> {
            self.record("stop".into());
            if self.0.lock().unwrap().fail_stop {
                return Err(PlaybackError::Player("stop failed".into()));
            }
            Ok(())
        }
        fn release(&mut self) -> Result<(), PlaybackError> {
            self.record("release".into());
            Ok(())
        }
        fn release_handle(&mut self) -> Result<(), PlaybackError> {
            self.record("release_handle".into());
            Ok(())
        }
    }

    fn video() -> VideoInfo {
        VideoInfo {
            path: PathBuf::from("clip.mp4"),
            width: 1920,
            height: 1080,
            fps: Some(25.0),
            frame_count: 100,
            duration_seconds: Some(4.0),
        }
    }

    fn table() -> Arc<AnnotationTable> {
        let det = |id| Detection {
            bbox: BBox::new(0.0, 20.0, 100.0, 200.0),
            track_id: Some(id),
            class_id: Some(0),
            class_name: "person".into(),
            score: 0.8,
        };
        Arc::new(
            AnnotationTable::builder(25.0)
                .frame_size(1920, 1080)
                .frame_count(100)
                .with_frame(25, FrameAnnotation::new(vec![det(1), det(2)]))
                .unwrap()
                .build(),
        )
    }

    fn backend(script: &Arc<Mutex<Script>>) -> ExternalPlayerBackend {
        let script = script.clone();
        let launcher: PlayerLauncher = Arc::new(
            move |_: &PlayerConfig,
                  _: Option<u64>|
                  -> Result<Box<dyn ExternalPlayer>, PlaybackError> {
                Ok(Box::new(ScriptedPlayer(script.clone())))
            },
        );
        ExternalPlayerBackend::new(&PlayerConfig::default(), launcher, Some(7))
    }

    fn status(t: f64) -> Result<Option<PlayerStatus>, PlaybackError> {
        Ok(Some(PlayerStatus {
            time_sec: t,
            ended: false,
        }))
    }

    #[test]
    fn test_overlay_follows_player_time() {
        let script = Arc::new(Mutex::new(Script::default()));
        script.lock().unwrap().statuses.push_back(status(1.02));
        let mut b = backend(&script);
        let t0 = Instant::now();
        b.open(&video()).unwrap();
        b.set_annotations(table(), t0);
        b.play(t0).unwrap();

        let mut sink = RecordingSink::default();
        b.tick(t0, &mut sink).unwrap();
        assert_eq!(sink.overlays.len(), 1);
        let layer = &sink.overlays[0];
        assert_eq!(layer.shapes().len(), 2);
        // 1920x1080 fitted to 1280x720 scales boxes by 2/3.
        assert!((layer.shapes()[0].bbox.y2 - 133.333).abs() < 0.01);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_poll_runs_on_its_own_period() {
        let script = Arc::new(Mutex::new(Script::default()));
        let mut b = backend(&script);
        let t0 = Instant::now();
        b.open(&video()).unwrap();
        let mut sink = RecordingSink::default();
        for ms in [0u64, 33, 66, 99] {
            b.tick(t0 + Duration::from_millis(ms), &mut sink).unwrap();
        }
        let polls = script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| *c == "status")
            .count();
        // Polls at 0 and 66 only; 33 and 99 fall inside the 50 ms period.
        assert_eq!(polls, 2);
    }

    #[test]
    fn test_query_failure_is_silent() {
        let script = Arc::new(Mutex::new(Script::default()));
        script
            .lock()
            .unwrap()
            .statuses
            .push_back(Err(PlaybackError::Player("not ready".into())));
        script.lock().unwrap().statuses.push_back(status(0.0));
        let mut b = backend(&script);
        let t0 = Instant::now();
        b.open(&video()).unwrap();
        let mut sink = RecordingSink::default();
        b.tick(t0, &mut sink).unwrap();
        assert!(sink.overlays.is_empty());
        b.tick(t0 + Duration::from_millis(60), &mut sink).unwrap();
        assert_eq!(sink.overlays.len(), 1);
        assert!(sink.overlays[0].shapes().is_empty());
    }

    #[test]
    fn test_exited_player_is_reported() {
        let script = Arc::new(Mutex::new(Script::default()));
        script
            .lock()
            .unwrap()
            .statuses
            .push_back(Err(PlaybackError::PlayerExited("signal 9".into())));
        let mut b = backend(&script);
        let t0 = Instant::now();
        b.open(&video()).unwrap();
        let mut sink = RecordingSink::default();
        assert!(matches!(
            b.tick(t0, &mut sink),
            Err(PlaybackError::PlayerExited(_))
        ));
        assert!(sink.overlays.is_empty());
    }

    #[test]
    fn test_end_then_backward_seek() {
        let script = Arc::new(Mutex::new(Script::default()));
        script.lock().unwrap().statuses.push_back(Ok(Some(PlayerStatus {
            time_sec: 3.96,
            ended: true,
        })));
        let mut b = backend(&script);
        let t0 = Instant::now();
        b.open(&video()).unwrap();
        b.set_annotations(table(), t0);
        b.play(t0).unwrap();
        let mut sink = RecordingSink::default();
        b.tick(t0, &mut sink).unwrap();
        assert_eq!(b.state(), PlayerState::Ended);

        b.play(t0).unwrap();
        assert_eq!(b.state(), PlayerState::Ended);
        b.seek(1.0, t0).unwrap();
        assert_eq!(b.state(), PlayerState::Paused);
    }

    #[test]
    fn test_speed_forwarded_to_player() {
        let script = Arc::new(Mutex::new(Script::default()));
        let mut b = backend(&script);
        b.open(&video()).unwrap();
        b.set_speed(PlaybackSpeed::new(1.5).unwrap(), Instant::now())
            .unwrap();
        assert!(script
            .lock()
            .unwrap()
            .calls
            .contains(&"rate 1.5".to_string()));
    }

    #[test]
    fn test_teardown_order_survives_failures() {
        let script = Arc::new(Mutex::new(Script::default()));
        script.lock().unwrap().fail_stop = true;
        let mut b = backend(&script);
        b.open(&video()).unwrap();
        b.shutdown();
        b.shutdown();
        let calls = script.lock().unwrap().calls.clone();
        let tail: Vec<&str> = calls.iter().rev().take(3).rev().map(|s| s.as_str()).collect();
        assert_eq!(tail, ["stop", "release", "release_handle"]);
        assert_eq!(calls.iter().filter(|c| *c == "stop").count(), 1);
        assert_eq!(b.state(), PlayerState::Uninitialized);
    }

    #[test]
    fn test_failed_load_releases_player() {
        let script = Arc::new(Mutex::new(Script::default()));
        script.lock().unwrap().fail_load = true;
        let mut b = backend(&script);
        assert!(b.open(&video()).is_err());
        assert_eq!(b.state(), PlayerState::Uninitialized);
        assert!(script
            .lock()
            .unwrap()
            .calls
            .contains(&"release_handle".to_string()));
    }
}
