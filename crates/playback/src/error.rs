use media_io::{DecodeError, ProbeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no annotations loaded; track the video first")]
    NotReady,
    #[error("no video open")]
    NoVideo,
    #[error("unsupported playback speed {0}")]
    InvalidSpeed(f64),
    #[error("external player unavailable: {0}")]
    PlayerUnavailable(String),
    #[error("external player error: {0}")]
    Player(String),
    #[error("external player exited: {0}")]
    PlayerExited(String),
    #[error("embedded decoder unavailable: ffmpeg not found")]
    DecoderUnavailable,
    #[error("player ipc: {0}")]
    Ipc(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Config(String),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
