use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use annotations::AnnotationTable;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::params::TrackParams;

/// Progress reported by a tracker. `total == 0` means the length is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Progress {
    pub current: u64,
    pub total: u64,
    #[serde(default)]
    pub message: String,
}

impl Progress {
    pub fn new(current: u64, total: u64) -> Self {
        Self {
            current,
            total,
            message: String::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// The detector/tracker, treated as a black box producing a table.
pub trait Tracker: Send + Sync {
    fn run(
        &self,
        video: &Path,
        params: &TrackParams,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<AnnotationTable>;
}

/// One line of the tracker program's stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TrackerLine {
    Progress(Progress),
    Result { table: AnnotationTable },
    Error { message: String },
}

/// Runs an external tracking program that prints newline-delimited JSON.
///
/// The program is invoked as `<program> <args..> --video <path> --params <json>`
/// and reports with `{"type":"progress","current":..,"total":..}`,
/// `{"type":"result","table":{..}}` or `{"type":"error","message":".."}`.
#[derive(Debug, Clone)]
pub struct CommandTracker {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandTracker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `<program> <args> --video <path> --model <weights> --tracker <config> --params <json>`,
    /// with model and tracker aliases already resolved.
    fn command(&self, video: &Path, params: &TrackParams) -> Result<Command> {
        let params_json = serde_json::to_string(params)?;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--video")
            .arg(video)
            .arg("--model")
            .arg(params.model_weights())
            .arg("--tracker")
            .arg(params.tracker.config_file())
            .arg("--params")
            .arg(params_json);
        Ok(cmd)
    }
}

impl Tracker for CommandTracker {
    fn run(
        &self,
        video: &Path,
        params: &TrackParams,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<AnnotationTable> {
        let mut child = self
            .command(video, params)?
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn tracker {}", self.program.display()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("tracker stdout not captured"))?;

        let mut table = None;
        let mut failure = None;
        for line in BufReader::new(stdout).lines() {
            let line = line.context("read tracker output")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TrackerLine>(&line) {
                Ok(TrackerLine::Progress(p)) => progress(p),
                Ok(TrackerLine::Result { table: t }) => table = Some(t),
                Ok(TrackerLine::Error { message }) => failure = Some(message),
                Err(e) => debug!(error = %e, "ignoring tracker output line"),
            }
        }
        let status = child.wait().context("wait for tracker")?;

        if let Some(message) = failure {
            bail!(message);
        }
        match table {
            Some(table) => {
                if !status.success() {
                    warn!(%status, "tracker exited with failure after sending a result");
                }
                Ok(table)
            }
            None => bail!("tracker exited ({status}) without a result"),
        }
    }
}

/// Serves a table produced earlier and saved as JSON.
#[derive(Debug, Clone)]
pub struct PrecomputedTracker {
    path: PathBuf,
}

impl PrecomputedTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Tracker for PrecomputedTracker {
    fn run(
        &self,
        _video: &Path,
        _params: &TrackParams,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<AnnotationTable> {
        progress(Progress::new(0, 0).with_message("Loading annotations"));
        let table = AnnotationTable::load(&self.path)
            .with_context(|| format!("load annotations {}", self.path.display()))?;
        let n = table.frame_count() as u64;
        progress(Progress::new(n, n));
        Ok(table)
    }
}
