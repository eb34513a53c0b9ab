//! Keeps a video clock, a frame source and the detection overlay in step,
//! behind either an in-process decoder or an external player.

pub mod backend;
pub mod clock;
pub mod config;
mod error;
pub mod fit;
pub mod frame_source;
pub mod overlay;
pub mod session;

pub use backend::{
    BackendCapabilities, BackendFactory, BackendKind, BackendPreference, DisplaySink,
    PlaybackBackend, PlayerState,
};
pub use clock::{PlaybackClock, PlaybackSpeed, SPEEDS};
pub use config::PlayerConfig;
pub use error::PlaybackError;
pub use fit::fit_size;
pub use frame_source::{DecodedFrameSource, FrameCache, FrameSource, NullFrameSource};
pub use overlay::{
    ImageSurface, OverlayOptions, OverlayRenderer, OverlayShape, OverlaySurface, ShapeLayer,
};
pub use session::PlaybackSession;
