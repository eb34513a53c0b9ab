use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use annotations::AnnotationTable;
use parking_lot::Mutex;
use tracing::info;

use crate::params::TrackParams;
use crate::runner::run_job;
use crate::state::{JobId, JobState};
use crate::tracker::Tracker;
use crate::RegistryError;

#[derive(Default)]
struct RegistryInner {
    jobs: HashMap<JobId, JobState>,
    // session key (video id) -> job currently tracking it
    active: HashMap<String, JobId>,
}

/// Process-wide table of tracking jobs, shared by `Arc` with request handlers.
///
/// Entries live until [`JobRegistry::evict`] removes them.
pub struct JobRegistry {
    tracker: Arc<dyn Tracker>,
    inner: Arc<Mutex<RegistryInner>>,
}

impl JobRegistry {
    pub fn new(tracker: Arc<dyn Tracker>) -> Self {
        Self {
            tracker,
            inner: Arc::new(Mutex::new(RegistryInner::default())),
        }
    }

    /// Starts tracking `video` for session `key`. Refused while an earlier job
    /// for the same key is still pending or running.
    pub fn submit(
        &self,
        key: &str,
        video: PathBuf,
        params: TrackParams,
    ) -> Result<JobId, RegistryError> {
        params.validate()?;
        let id = JobId::new();
        {
            let mut inner = self.inner.lock();
            if let Some(running) = inner.active.get(key).copied() {
                if inner.jobs.get(&running).is_some_and(|s| !s.is_terminal()) {
                    return Err(RegistryError::Busy {
                        key: key.to_string(),
                        job: running,
                    });
                }
            }
            inner.jobs.insert(id, JobState::new());
            inner.active.insert(key.to_string(), id);
        }

        info!(job = %id, key, video = %video.display(), "tracking job registered");
        let tracker = Arc::clone(&self.tracker);
        let shared = Arc::clone(&self.inner);
        let owner = key.to_string();
        let spawned = thread::Builder::new()
            .name(format!("track-{id}"))
            .spawn(move || {
                run_job(tracker.as_ref(), &video, &params, &mut |message| {
                    let mut inner = shared.lock();
                    let finished = match inner.jobs.get_mut(&id) {
                        Some(state) => {
                            state.apply(message);
                            state.is_terminal()
                        }
                        None => false,
                    };
                    if finished && inner.active.get(&owner) == Some(&id) {
                        inner.active.remove(&owner);
                    }
                });
            });

        if let Err(e) = spawned {
            let mut inner = self.inner.lock();
            inner.jobs.remove(&id);
            inner.active.remove(key);
            return Err(e.into());
        }
        Ok(id)
    }

    /// Snapshot of the job's state.
    pub fn state(&self, id: JobId) -> Option<JobState> {
        self.inner.lock().jobs.get(&id).cloned()
    }

    /// The finished table, or why there is none yet.
    pub fn result(&self, id: JobId) -> Result<Arc<AnnotationTable>, RegistryError> {
        let inner = self.inner.lock();
        let state = inner.jobs.get(&id).ok_or(RegistryError::NotFound(id))?;
        if let Some(table) = state.result() {
            return Ok(Arc::clone(table));
        }
        match state.error() {
            Some(error) => Err(RegistryError::Failed(error.to_string())),
            None => Err(RegistryError::NotReady(id)),
        }
    }

    /// Forget a finished or failed job. A job still pending or running keeps
    /// its entry and its claim on the session key.
    pub fn evict(&self, id: JobId) -> Result<JobState, RegistryError> {
        let mut inner = self.inner.lock();
        match inner.jobs.get(&id) {
            None => return Err(RegistryError::NotFound(id)),
            Some(state) if !state.is_terminal() => return Err(RegistryError::NotReady(id)),
            Some(_) => {}
        }
        inner.active.retain(|_, job| *job != id);
        inner.jobs.remove(&id).ok_or(RegistryError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
