use image::RgbaImage;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

use crate::VideoInfo;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("ffmpeg not found on PATH")]
    NotAvailable,
    #[error("video has no usable dimensions ({0}x{1})")]
    InvalidDimensions(u32, u32),
    #[error("failed to start ffmpeg: {0}")]
    Spawn(#[source] io::Error),
    #[error("decode failed: {0}")]
    Io(#[from] io::Error),
}

/// Frame-addressed access to a decoded video stream.
///
/// `read_next` returns the frame after the last one read (or the one a `seek`
/// landed on); `Ok(None)` is end of stream.
pub trait FrameDecoder: Send {
    fn seek(&mut self, index: usize) -> Result<(), DecodeError>;
    fn read_next(&mut self) -> Result<Option<RgbaImage>, DecodeError>;
}

impl<T: FrameDecoder + ?Sized> FrameDecoder for Box<T> {
    fn seek(&mut self, index: usize) -> Result<(), DecodeError> {
        (**self).seek(index)
    }

    fn read_next(&mut self) -> Result<Option<RgbaImage>, DecodeError> {
        (**self).read_next()
    }
}

/// Streams `rawvideo rgba` out of an `ffmpeg` child process.
///
/// Sequential reads cost one pipe read per frame; a seek restarts the child at
/// `index / fps` seconds.
pub struct FfmpegFrameDecoder {
    ffmpeg: PathBuf,
    path: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    start_index: usize,
}

impl FfmpegFrameDecoder {
    pub fn open(info: &VideoInfo, fps: f64) -> Result<Self, DecodeError> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| DecodeError::NotAvailable)?;
        if info.width == 0 || info.height == 0 {
            return Err(DecodeError::InvalidDimensions(info.width, info.height));
        }
        debug!(path = %info.path.display(), fps, "opening ffmpeg frame decoder");
        Ok(Self {
            ffmpeg,
            path: info.path.clone(),
            width: info.width,
            height: info.height,
            fps,
            child: None,
            stdout: None,
            start_index: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn spawn(&mut self) -> Result<(), DecodeError> {
        let start = self.start_index as f64 / self.fps;
        let mut child = Command::new(&self.ffmpeg)
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg(format!("{:.6}", start))
            .arg("-i")
            .arg(&self.path)
            .arg("-an")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(DecodeError::Spawn)?;
        self.stdout = child.stdout.take();
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                // Already exited on its own, typically at end of stream.
                debug!(error = %e, "ffmpeg child kill");
            }
            if let Err(e) = child.wait() {
                warn!(error = %e, "failed to reap ffmpeg child");
            }
        }
    }
}

impl FrameDecoder for FfmpegFrameDecoder {
    fn seek(&mut self, index: usize) -> Result<(), DecodeError> {
        self.stop();
        self.start_index = index;
        self.spawn()
    }

    fn read_next(&mut self) -> Result<Option<RgbaImage>, DecodeError> {
        if self.stdout.is_none() {
            self.spawn()?;
        }
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        match read_rgba_frame(stdout, self.width, self.height) {
            Ok(Some(frame)) => {
                self.start_index += 1;
                Ok(Some(frame))
            }
            Ok(None) => {
                self.stop();
                Ok(None)
            }
            Err(e) => {
                self.stop();
                Err(e.into())
            }
        }
    }
}

impl Drop for FfmpegFrameDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read exactly one `width * height * 4` frame; a short read is end of stream.
pub(crate) fn read_rgba_frame<R: Read>(
    reader: &mut R,
    width: u32,
    height: u32,
) -> io::Result<Option<RgbaImage>> {
    let len = width as usize * height as usize * 4;
    let mut buf = vec![0u8; len];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(RgbaImage::from_raw(width, height, buf)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}
