use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info};

use crate::params::TrackParams;
use crate::runner::run_job;
use crate::state::{JobId, JobMessage, JobState};
use crate::tracker::Tracker;
use crate::JobError;

#[derive(Debug, Clone)]
pub struct JobEvent {
    pub id: JobId,
    pub message: JobMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    id: JobId,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }
}

/// Runs tracking jobs on a background thread and relays their messages to a
/// render loop that calls [`JobBridge::poll`] once per tick.
///
/// Only one job is followed at a time: `submit` is refused while the current
/// job is still pending or running.
pub struct JobBridge {
    tracker: Arc<dyn Tracker>,
    tx_events: Sender<JobEvent>,
    rx_events: Receiver<JobEvent>,
    active: Option<(JobId, JobState)>,
}

impl JobBridge {
    pub fn new(tracker: Arc<dyn Tracker>) -> Self {
        let (tx_events, rx_events) = unbounded();
        Self {
            tracker,
            tx_events,
            rx_events,
            active: None,
        }
    }

    pub fn submit(
        &mut self,
        video: impl Into<PathBuf>,
        params: TrackParams,
    ) -> Result<JobHandle, JobError> {
        if self.is_busy() {
            return Err(JobError::Busy);
        }
        params.validate()?;

        let id = JobId::new();
        let video = video.into();
        info!(job = %id, video = %video.display(), tracker = %params.tracker, "submitting tracking job");

        let tracker = Arc::clone(&self.tracker);
        let tx = self.tx_events.clone();
        thread::Builder::new()
            .name(format!("track-{id}"))
            .spawn(move || {
                run_job(tracker.as_ref(), &video, &params, &mut |message| {
                    // Receiver gone means the bridge was dropped.
                    let _ = tx.send(JobEvent { id, message });
                });
            })?;

        self.active = Some((id, JobState::new()));
        Ok(JobHandle { id })
    }

    /// Drains every pending message without blocking and returns the ones that
    /// changed the active job's state, in order.
    pub fn poll(&mut self) -> Vec<JobMessage> {
        let mut applied = Vec::new();
        for event in self.rx_events.try_iter() {
            match self.active.as_mut() {
                Some((id, state)) if *id == event.id => {
                    if state.apply(event.message.clone()) {
                        applied.push(event.message);
                    }
                }
                _ => debug!(job = %event.id, "dropping message for inactive job"),
            }
        }
        applied
    }

    pub fn state(&self) -> Option<&JobState> {
        self.active.as_ref().map(|(_, state)| state)
    }

    pub fn active_job(&self) -> Option<JobId> {
        self.active.as_ref().map(|(id, _)| *id)
    }

    pub fn is_busy(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|(_, state)| !state.is_terminal())
    }

    /// Forgets the active job. Its thread runs to completion but any message it
    /// still sends is ignored.
    pub fn invalidate(&mut self) {
        if let Some((id, _)) = self.active.take() {
            info!(job = %id, "tracking job invalidated");
        }
    }
}
