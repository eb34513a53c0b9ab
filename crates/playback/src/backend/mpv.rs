//! `mpv` driven over its JSON IPC socket (`--input-ipc-server`).

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Child;
use tracing::{debug, info};

use super::external::{ExternalPlayer, PlayerStatus};
use crate::PlaybackError;

/// One line read back from the IPC socket.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum IpcLine {
    Reply {
        request_id: u64,
        result: Result<Value, String>,
    },
    Event(String),
    Unknown,
}

pub(crate) fn encode_command(request_id: u64, args: &[Value]) -> String {
    let mut line = json!({ "command": args, "request_id": request_id }).to_string();
    line.push('\n');
    line
}

/// Socket errors that mean mpv is no longer on the other end.
pub(crate) fn classify_io_error(e: std::io::Error) -> PlaybackError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            PlaybackError::PlayerExited(format!("ipc socket: {e}"))
        }
        _ => PlaybackError::Ipc(e),
    }
}

pub(crate) fn parse_line(line: &str) -> IpcLine {
    let Ok(value) = serde_json::from_str::<Value>(line.trim()) else {
        return IpcLine::Unknown;
    };
    if let Some(event) = value.get("event").and_then(Value::as_str) {
        return IpcLine::Event(event.to_string());
    }
    let (Some(request_id), Some(error)) = (
        value.get("request_id").and_then(Value::as_u64),
        value.get("error").and_then(Value::as_str),
    ) else {
        return IpcLine::Unknown;
    };
    let result = if error == "success" {
        Ok(value.get("data").cloned().unwrap_or(Value::Null))
    } else {
        Err(error.to_string())
    };
    IpcLine::Reply { request_id, result }
}

#[cfg(unix)]
mod ipc {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::path::Path;
    use std::time::Duration;

    use super::{classify_io_error, encode_command, parse_line, IpcLine};
    use crate::PlaybackError;
    use serde_json::Value;

    const REPLY_TIMEOUT: Duration = Duration::from_millis(250);
    // Replies interleave with events; give up after this many unrelated lines.
    const MAX_SKIPPED_LINES: usize = 64;

    pub(super) struct MpvIpc {
        reader: BufReader<UnixStream>,
        writer: UnixStream,
        next_request_id: u64,
    }

    impl MpvIpc {
        pub(super) fn connect(socket: &Path) -> std::io::Result<Self> {
            let stream = UnixStream::connect(socket)?;
            stream.set_read_timeout(Some(REPLY_TIMEOUT))?;
            let writer = stream.try_clone()?;
            Ok(Self {
                reader: BufReader::new(stream),
                writer,
                next_request_id: 1,
            })
        }

        pub(super) fn command(&mut self, args: &[Value]) -> Result<Value, PlaybackError> {
            let id = self.next_request_id;
            self.next_request_id += 1;
            self.writer
                .write_all(encode_command(id, args).as_bytes())
                .map_err(classify_io_error)?;
            self.writer.flush().map_err(classify_io_error)?;

            let mut line = String::new();
            for _ in 0..MAX_SKIPPED_LINES {
                line.clear();
                if self.reader.read_line(&mut line).map_err(classify_io_error)? == 0 {
                    return Err(PlaybackError::PlayerExited("ipc socket closed".into()));
                }
                match parse_line(&line) {
                    IpcLine::Reply { request_id, result } if request_id == id => {
                        return result.map_err(PlaybackError::Player);
                    }
                    IpcLine::Event(name) => tracing::trace!(event = %name, "mpv event"),
                    _ => continue,
                }
            }
            Err(PlaybackError::Player("no reply from player".into()))
        }
    }
}

#[cfg(unix)]
fn socket_path() -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("trackview-mpv-{}-{}.sock", std::process::id(), n))
}

pub struct MpvPlayer {
    child: Option<Child>,
    #[cfg(unix)]
    ipc: Option<ipc::MpvIpc>,
    socket: PathBuf,
}

impl MpvPlayer {
    /// Start `program` idle and paused, listening on a fresh IPC socket.
    #[cfg(unix)]
    pub fn spawn(program: &str, window_id: Option<u64>) -> Result<Self, PlaybackError> {
        use std::process::{Command, Stdio};
        use std::time::Duration;

        let program = which::which(program)
            .map_err(|e| PlaybackError::PlayerUnavailable(format!("{program}: {e}")))?;
        let socket = socket_path();
        let mut cmd = Command::new(&program);
        cmd.arg("--idle=yes")
            .arg("--pause")
            .arg("--keep-open=yes")
            .arg("--no-terminal")
            .arg("--osc=no")
            .arg(format!("--input-ipc-server={}", socket.display()));
        if let Some(wid) = window_id {
            cmd.arg(format!("--wid={wid}"));
        } else {
            cmd.arg("--force-window=yes");
        }
        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlaybackError::PlayerUnavailable(format!("failed to start mpv: {e}")))?;

        let mut player = Self {
            child: Some(child),
            ipc: None,
            socket,
        };
        // mpv creates the socket shortly after start.
        for _ in 0..50 {
            match ipc::MpvIpc::connect(&player.socket) {
                Ok(ipc) => {
                    player.ipc = Some(ipc);
                    info!(program = %program.display(), socket = %player.socket.display(), "mpv started");
                    return Ok(player);
                }
                Err(_) => std::thread::sleep(Duration::from_millis(40)),
            }
        }
        player.release_handle()?;
        Err(PlaybackError::PlayerUnavailable(
            "mpv did not open its ipc socket".into(),
        ))
    }

    #[cfg(not(unix))]
    pub fn spawn(_program: &str, _window_id: Option<u64>) -> Result<Self, PlaybackError> {
        Err(PlaybackError::PlayerUnavailable(
            "mpv ipc requires unix domain sockets".into(),
        ))
    }

    #[cfg(unix)]
    fn command(&mut self, args: &[Value]) -> Result<Value, PlaybackError> {
        match self.ipc.as_mut() {
            Some(ipc) => ipc.command(args),
            None => Err(PlaybackError::Player("player released".into())),
        }
    }

    #[cfg(not(unix))]
    fn command(&mut self, _args: &[Value]) -> Result<Value, PlaybackError> {
        Err(PlaybackError::Player("player released".into()))
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn check_alive(&mut self) -> Result<(), PlaybackError> {
        let Some(child) = self.child.as_mut() else {
            return Err(PlaybackError::PlayerExited("player released".into()));
        };
        match child.try_wait()? {
            Some(status) => Err(PlaybackError::PlayerExited(status.to_string())),
            None => Ok(()),
        }
    }
}

impl ExternalPlayer for MpvPlayer {
    fn load(&mut self, path: &Path) -> Result<(), PlaybackError> {
        let path = path.to_string_lossy();
        self.command(&[json!("loadfile"), json!(path), json!("replace")])?;
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), PlaybackError> {
        self.command(&[json!("set_property"), json!("pause"), json!(paused)])?;
        Ok(())
    }

    fn seek(&mut self, t_sec: f64) -> Result<(), PlaybackError> {
        self.command(&[json!("seek"), json!(t_sec), json!("absolute+exact")])?;
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<(), PlaybackError> {
        self.command(&[json!("set_property"), json!("speed"), json!(rate)])?;
        Ok(())
    }

    fn status(&mut self) -> Result<Option<PlayerStatus>, PlaybackError> {
        self.check_alive()?;
        // "property unavailable" until a file is loaded and decoding started.
        let time_sec = match self.command(&[json!("get_property"), json!("time-pos")]) {
            Ok(value) => value.as_f64(),
            Err(PlaybackError::Player(_)) => None,
            Err(e) => return Err(e),
        };
        let Some(time_sec) = time_sec else {
            return Ok(None);
        };
        let ended = self
            .command(&[json!("get_property"), json!("eof-reached")])
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(Some(PlayerStatus { time_sec, ended }))
    }

    fn stop(&mut self) -> Result<(), PlaybackError> {
        self.command(&[json!("stop")])?;
        Ok(())
    }

    fn release(&mut self) -> Result<(), PlaybackError> {
        // mpv closes the socket as it quits.
        let result = match self.command(&[json!("quit")]) {
            Ok(_) | Err(PlaybackError::PlayerExited(_)) => Ok(()),
            Err(e) => Err(e),
        };
        #[cfg(unix)]
        {
            self.ipc = None;
        }
        result
    }

    fn release_handle(&mut self) -> Result<(), PlaybackError> {
        if let Some(mut child) = self.child.take() {
            if child.try_wait()?.is_none() {
                child.kill()?;
            }
            let status = child.wait()?;
            debug!(?status, "mpv exited");
        }
        if self.socket.exists() {
            std::fs::remove_file(&self.socket)?;
        }
        Ok(())
    }
}

impl Drop for MpvPlayer {
    fn drop(&mut self) {
        if self.child.is_some() {
            let _ = self.release_handle();
        }
    }
}
