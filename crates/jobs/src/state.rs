use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use annotations::AnnotationTable;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

/// What a running job reports back. `Done` and `Failed` are terminal.
#[derive(Debug, Clone)]
pub enum JobMessage {
    Started {
        message: String,
    },
    Progress {
        current: u64,
        total: u64,
        message: String,
    },
    Done(Arc<AnnotationTable>),
    Failed(String),
}

impl JobMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobMessage::Done(_) | JobMessage::Failed(_))
    }
}

/// Lifecycle of one tracking run: `pending -> running -> done | error`.
#[derive(Debug, Clone)]
pub struct JobState {
    status: JobStatus,
    current: u64,
    total: u64,
    message: String,
    result: Option<Arc<AnnotationTable>>,
    error: Option<String>,
}

impl JobState {
    pub fn new() -> Self {
        Self {
            status: JobStatus::Pending,
            current: 0,
            total: 0,
            message: "Starting…".to_string(),
            result: None,
            error: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `(current, total)`; `total == 0` while the length is unknown.
    pub fn progress(&self) -> (u64, u64) {
        (self.current, self.total)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn result(&self) -> Option<&Arc<AnnotationTable>> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Folds `message` into the state. Returns `false` when it was ignored
    /// because the job had already finished.
    pub fn apply(&mut self, message: JobMessage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match message {
            JobMessage::Started { message } => {
                self.status = JobStatus::Running;
                self.message = message;
            }
            JobMessage::Progress {
                current,
                total,
                message,
            } => {
                self.status = JobStatus::Running;
                self.current = self.current.max(current);
                if total > 0 {
                    self.total = total;
                }
                self.message = message;
            }
            JobMessage::Done(table) => {
                let frames = self.current.max(table.frame_count() as u64);
                self.status = JobStatus::Done;
                self.current = frames;
                self.total = frames;
                self.message = "Done".to_string();
                self.result = Some(table);
            }
            JobMessage::Failed(error) => {
                self.status = JobStatus::Error;
                self.message = error.clone();
                self.error = Some(error);
            }
        }
        true
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}
