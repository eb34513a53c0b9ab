use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::PlaybackError;

/// Speed multipliers offered to the user.
pub const SPEEDS: [f64; 8] = [0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 1.75, 2.0];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct PlaybackSpeed(f64);

impl PlaybackSpeed {
    pub const NORMAL: PlaybackSpeed = PlaybackSpeed(1.0);

    pub fn new(value: f64) -> Result<Self, PlaybackError> {
        SPEEDS
            .iter()
            .copied()
            .find(|s| (s - value).abs() < 1e-9)
            .map(PlaybackSpeed)
            .ok_or(PlaybackError::InvalidSpeed(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = PlaybackSpeed> {
        SPEEDS.iter().copied().map(PlaybackSpeed)
    }
}

impl Default for PlaybackSpeed {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl TryFrom<f64> for PlaybackSpeed {
    type Error = PlaybackError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PlaybackSpeed> for f64 {
    fn from(speed: PlaybackSpeed) -> Self {
        speed.0
    }
}

impl fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

/// Presentation time derived from wall-clock time and a speed multiplier.
///
/// While playing, `current_time = anchor_time + (now - anchor_instant) * speed`.
/// The anchor is re-captured on every play, seek and speed change, so time never
/// jumps and render latency never accumulates into drift. Every method takes the
/// wall-clock `now` explicitly.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    playing: bool,
    speed: PlaybackSpeed,
    current_time: f64,
    /// Last valid timestamp, `(frame_count - 1) / fps`.
    end_time: f64,
    anchor_instant: Option<Instant>,
    anchor_time: f64,
}

impl PlaybackClock {
    pub fn new(end_time: f64) -> Self {
        Self {
            playing: false,
            speed: PlaybackSpeed::NORMAL,
            current_time: 0.0,
            end_time: end_time.max(0.0),
            anchor_instant: None,
            anchor_time: 0.0,
        }
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn speed(&self) -> PlaybackSpeed {
        self.speed
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn at_end(&self) -> bool {
        self.current_time >= self.end_time
    }

    /// Replace the end of the timeline, e.g. once annotations refine the frame count.
    pub fn set_end_time(&mut self, end_time: f64, now: Instant) {
        self.end_time = end_time.max(0.0);
        let t = self.current_time.min(self.end_time);
        self.seek(t, now);
    }

    fn clamp(&self, t: f64) -> f64 {
        if t.is_nan() {
            return 0.0;
        }
        t.clamp(0.0, self.end_time)
    }

    fn time_at(&self, now: Instant) -> f64 {
        match self.anchor_instant {
            Some(anchor) if self.playing => {
                let dt = now.saturating_duration_since(anchor).as_secs_f64();
                self.anchor_time + dt * self.speed.value()
            }
            _ => self.current_time,
        }
    }

    fn anchor(&mut self, now: Instant) {
        self.anchor_time = self.current_time;
        self.anchor_instant = Some(now);
    }

    /// Start advancing from the current time. Refused at end of stream until a
    /// seek moves time back.
    pub fn play(&mut self, now: Instant) -> bool {
        if self.at_end() {
            return false;
        }
        if !self.playing {
            self.playing = true;
            self.anchor(now);
        }
        true
    }

    pub fn pause(&mut self, now: Instant) {
        if self.playing {
            self.current_time = self.clamp(self.time_at(now));
            self.playing = false;
        }
        self.anchor(now);
    }

    pub fn seek(&mut self, t: f64, now: Instant) {
        self.current_time = self.clamp(t);
        self.anchor(now);
    }

    /// Fold time elapsed at the old speed into the anchor, then continue at `speed`.
    pub fn set_speed(&mut self, speed: PlaybackSpeed, now: Instant) {
        if self.playing {
            self.current_time = self.clamp(self.time_at(now));
        }
        self.anchor(now);
        self.speed = speed;
    }

    /// Recompute the presentation time; stops and clamps at end of stream.
    pub fn tick(&mut self, now: Instant) -> f64 {
        if self.playing {
            let t = self.time_at(now);
            if t >= self.end_time {
                self.current_time = self.end_time;
                self.playing = false;
                self.anchor(now);
            } else {
                self.current_time = t.max(0.0);
            }
        }
        self.current_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_speed_set() {
        assert!(PlaybackSpeed::new(1.5).is_ok());
        assert!(matches!(
            PlaybackSpeed::new(3.0),
            Err(PlaybackError::InvalidSpeed(_))
        ));
        assert_eq!(PlaybackSpeed::all().count(), 8);
        assert_eq!(PlaybackSpeed::default().value(), 1.0);
    }

    #[test]
    fn test_elapsed_scales_with_speed() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(100.0);
        clock.set_speed(PlaybackSpeed::new(0.5).unwrap(), t0);
        assert!(clock.play(t0));
        // Tick cadence does not matter, only the instant passed in.
        clock.tick(t0 + Duration::from_millis(10));
        clock.tick(t0 + Duration::from_millis(500));
        let t = clock.tick(t0 + Duration::from_secs(4));
        assert!(approx(t, 2.0));
    }

    #[test]
    fn test_speed_change_does_not_jump() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(100.0);
        clock.play(t0);
        let t1 = t0 + Duration::from_secs(2);
        clock.set_speed(PlaybackSpeed::new(2.0).unwrap(), t1);
        assert!(approx(clock.current_time(), 2.0));
        let t = clock.tick(t1 + Duration::from_secs(1));
        assert!(approx(t, 4.0));
    }

    #[test]
    fn test_pause_freezes_time() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(100.0);
        clock.play(t0);
        clock.pause(t0 + Duration::from_secs(3));
        let t = clock.tick(t0 + Duration::from_secs(60));
        assert!(approx(t, 3.0));
        assert!(!clock.is_playing());
    }

    #[test]
    fn test_seek_then_tick_has_no_drift() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(100.0);
        clock.seek(42.0, t0);
        assert!(approx(clock.tick(t0 + Duration::from_secs(10)), 42.0));

        clock.play(t0 + Duration::from_secs(10));
        clock.seek(5.0, t0 + Duration::from_secs(11));
        assert!(approx(clock.tick(t0 + Duration::from_secs(12)), 6.0));
    }

    #[test]
    fn test_end_of_stream_stops_and_clamps() {
        let t0 = Instant::now();
        let mut clock = PlaybackClock::new(1.5);
        clock.play(t0);
        let t = clock.tick(t0 + Duration::from_secs(5));
        assert!(approx(t, 1.5));
        assert!(!clock.is_playing());
        assert!(clock.at_end());

        // No auto-loop and no restart from the end.
        assert!(!clock.play(t0 + Duration::from_secs(6)));
        clock.seek(0.5, t0 + Duration::from_secs(6));
        assert!(clock.play(t0 + Duration::from_secs(6)));
    }

    #[test]
    fn test_seek_is_clamped() {
        let now = Instant::now();
        let mut clock = PlaybackClock::new(10.0);
        clock.seek(-3.0, now);
        assert_eq!(clock.current_time(), 0.0);
        clock.seek(99.0, now);
        assert_eq!(clock.current_time(), 10.0);
    }
}
