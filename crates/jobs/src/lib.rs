//! Background tracking jobs: parameters, the tracker collaborator, and the two
//! ways of following a run (a polled bridge for the render loop, a shared
//! registry for request handlers).

mod bridge;
pub mod params;
mod registry;
mod runner;
mod state;
pub mod tracker;

use thiserror::Error;

pub use bridge::{JobBridge, JobEvent, JobHandle};
pub use params::{ParamsError, TrackParams, TrackerKind};
pub use registry::JobRegistry;
pub use state::{JobId, JobMessage, JobState, JobStatus};
pub use tracker::{CommandTracker, PrecomputedTracker, Progress, Tracker};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("a tracking job is already running")]
    Busy,
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error("failed to start job thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job {job} is already running for {key}")]
    Busy { key: String, job: JobId },
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {0} not finished")]
    NotReady(JobId),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error("failed to start job thread: {0}")]
    Spawn(#[from] std::io::Error),
}
