use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use jobs::{CommandTracker, Tracker};

pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_TRACKER_COMMAND: &str = "trackview-tracker";

/// Settings read from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// `UPLOAD_DIR`: where `<video_id>.mp4` files live.
    pub upload_dir: PathBuf,
    /// `TRACK_SERVER_ADDR`
    pub addr: String,
    /// `TRACKER_COMMAND`: tracker program followed by its arguments.
    pub tracker_command: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            upload_dir: non_empty("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            addr: non_empty("TRACK_SERVER_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            tracker_command: non_empty("TRACKER_COMMAND")
                .unwrap_or_else(|| DEFAULT_TRACKER_COMMAND.to_string()),
        }
    }

    pub fn tracker(&self) -> Result<Arc<dyn Tracker>> {
        let mut parts = self.tracker_command.split_whitespace();
        let Some(program) = parts.next() else {
            bail!("TRACKER_COMMAND is empty");
        };
        let tracker = parts.fold(CommandTracker::new(program), |t, arg| t.arg(arg));
        Ok(Arc::new(tracker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.addr, "127.0.0.1:8000");
        assert_eq!(config.tracker_command, "trackview-tracker");
        assert!(config.tracker().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("UPLOAD_DIR", "/data/videos"),
            ("TRACK_SERVER_ADDR", "0.0.0.0:9000"),
            ("TRACKER_COMMAND", "python3 tracker.py --device cpu"),
        ]
        .into_iter()
        .collect();
        let config = ServerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.upload_dir, PathBuf::from("/data/videos"));
        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.tracker_command, "python3 tracker.py --device cpu");

        let blank = ServerConfig::from_lookup(|_| Some("  ".into()));
        assert_eq!(blank.addr, DEFAULT_ADDR);
    }
}
