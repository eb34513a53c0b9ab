use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

mod decode;
pub use decode::{DecodeError, FfmpegFrameDecoder, FrameDecoder};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe not found on PATH; please install FFmpeg (ffprobe)")]
    FfprobeMissing,
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no video stream in {0}")]
    NoVideoStream(PathBuf),
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeJson {
    streams: Option<Vec<FfprobeStream>>,
    format: Option<FfprobeFormat>,
}

/// What the player needs to know about a video before opening it.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// `None` when the container reports no usable rate.
    pub fps: Option<f64>,
    /// Zero when neither a frame count nor a duration was reported.
    pub frame_count: usize,
    pub duration_seconds: Option<f64>,
}

fn parse_rate(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    if s == "0/0" || s == "0" || s.is_empty() {
        return None;
    }
    if let Some((a, b)) = s.split_once('/') {
        let num = a.parse().ok()?;
        let den = b.parse().ok()?;
        if den == 0 || num == 0 {
            return None;
        }
        return Some((num, den));
    }
    let v: u32 = s.parse().ok()?;
    if v == 0 {
        return None;
    }
    Some((v, 1))
}

fn parse_probe_output(path: &Path, stdout: &[u8]) -> Result<VideoInfo, ProbeError> {
    let parsed: FfprobeJson =
        serde_json::from_slice(stdout).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let stream = parsed
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ProbeError::NoVideoStream(path.to_path_buf()))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .map(|(n, d)| n as f64 / d as f64);

    let duration_seconds = stream
        .duration
        .as_deref()
        .or_else(|| parsed.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    // Containers without an index (e.g. some mkv) omit nb_frames; estimate from duration.
    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .or_else(|| match (duration_seconds, fps) {
            (Some(d), Some(f)) => Some((d * f).round() as usize),
            _ => None,
        })
        .unwrap_or(0);

    Ok(VideoInfo {
        path: path.to_path_buf(),
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        fps,
        frame_count,
        duration_seconds,
    })
}

pub fn probe_media(path: &Path) -> Result<VideoInfo, ProbeError> {
    let ffprobe = which::which("ffprobe").map_err(|_| ProbeError::FfprobeMissing)?;
    let out = Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_format")
        .arg("-show_streams")
        .arg("-print_format")
        .arg("json")
        .arg(path)
        .output()
        .map_err(|e| ProbeError::FfprobeFailed(e.to_string()))?;
    if !out.status.success() {
        return Err(ProbeError::FfprobeFailed(
            String::from_utf8_lossy(&out.stderr).into(),
        ));
    }
    let info = parse_probe_output(path, &out.stdout)?;
    debug!(
        path = %path.display(),
        width = info.width,
        height = info.height,
        fps = ?info.fps,
        frames = info.frame_count,
        "probed video"
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("30000/1001"), Some((30000, 1001)));
        assert_eq!(parse_rate("25"), Some((25, 1)));
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("24/0"), None);
        assert_eq!(parse_rate(""), None);
    }

    #[test]
    fn test_probe_output_with_frame_count() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "sample_rate": "48000"},
                {"codec_type": "video", "width": 1920, "height": 1080,
                 "avg_frame_rate": "25/1", "r_frame_rate": "25/1", "nb_frames": "250"}
            ],
            "format": {"duration": "10.000000"}
        }"#;
        let info = parse_probe_output(Path::new("clip.mp4"), json).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.fps, Some(25.0));
        assert_eq!(info.frame_count, 250);
        assert_eq!(info.duration_seconds, Some(10.0));
    }

    #[test]
    fn test_probe_output_estimates_frame_count() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 360,
                         "avg_frame_rate": "0/0", "r_frame_rate": "30/1"}],
            "format": {"duration": "2.5"}
        }"#;
        let info = parse_probe_output(Path::new("clip.mkv"), json).unwrap();
        assert_eq!(info.fps, Some(30.0));
        assert_eq!(info.frame_count, 75);
    }

    #[test]
    fn test_probe_output_without_video() {
        let json = br#"{"streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(
            parse_probe_output(Path::new("song.mp3"), json),
            Err(ProbeError::NoVideoStream(_))
        ));
    }

    #[test]
    fn test_probe_output_unknown_rate() {
        let json = br#"{"streams": [{"codec_type": "video", "width": 4, "height": 4}]}"#;
        let info = parse_probe_output(Path::new("x.mp4"), json).unwrap();
        assert_eq!(info.fps, None);
        assert_eq!(info.frame_count, 0);
    }
}
