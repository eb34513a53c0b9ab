use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use image::RgbaImage;
use jobs::{
    CommandTracker, JobBridge, JobMessage, PrecomputedTracker, TrackParams, Tracker, TrackerKind,
};
use playback::{
    BackendFactory, BackendPreference, DisplaySink, PlaybackSession, PlaybackSpeed, PlayerConfig,
    PlayerState, ShapeLayer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "trackview-cli")]
#[command(about = "Tracked-video overlay player - headless playback and tracking")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe video files
    Probe {
        /// Video files to probe
        files: Vec<PathBuf>,

        /// Write the results to a JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Track objects in a video and save the annotations
    Track {
        /// Video file
        video: PathBuf,

        /// Annotation JSON output path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        params: ParamsArgs,
    },

    /// Play a video with its tracking overlay
    Play(PlayArgs),
}

#[derive(Args)]
struct SourceArgs {
    /// Annotation JSON produced by an earlier run
    #[arg(long, conflicts_with = "tracker_command")]
    annotations: Option<PathBuf>,

    /// Tracker program (and arguments) speaking the NDJSON progress protocol
    #[arg(long, env = "TRACKER_COMMAND")]
    tracker_command: Option<String>,
}

impl SourceArgs {
    fn tracker(&self) -> Result<Arc<dyn Tracker>> {
        if let Some(path) = &self.annotations {
            return Ok(Arc::new(PrecomputedTracker::new(path)));
        }
        let Some(command) = &self.tracker_command else {
            bail!("either --annotations or --tracker-command is required");
        };
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            bail!("--tracker-command is empty");
        };
        let tracker = parts.fold(CommandTracker::new(program), |t, arg| t.arg(arg));
        Ok(Arc::new(tracker))
    }
}

#[derive(Args)]
struct ParamsArgs {
    /// Detection confidence threshold
    #[arg(long, default_value_t = 0.25)]
    conf: f32,

    /// IoU threshold for non-maximum suppression
    #[arg(long, default_value_t = 0.7)]
    iou: f32,

    /// Multi-object tracker (BoT-SORT, ByteTrack)
    #[arg(long, default_value = "BoT-SORT")]
    tracker: TrackerKind,

    /// Detector model (yolo11n, yolo11s, yolo11m, yolo8n, yolo8s or a weights file)
    #[arg(long, default_value = "yolo11n")]
    model: String,

    /// Only keep these class ids (comma separated)
    #[arg(long, value_delimiter = ',')]
    classes: Vec<u32>,

    /// Do not keep track identities between frames
    #[arg(long)]
    no_persist: bool,

    /// Skip saliency maps
    #[arg(long)]
    no_saliency: bool,

    /// Skip the audio level scan
    #[arg(long)]
    no_audio: bool,
}

impl ParamsArgs {
    fn to_params(&self) -> TrackParams {
        TrackParams {
            confidence_threshold: self.conf,
            iou_threshold: self.iou,
            tracker: self.tracker,
            model_name: self.model.clone(),
            persist_identities: !self.no_persist,
            class_filter: (!self.classes.is_empty()).then(|| self.classes.clone()),
            include_saliency: !self.no_saliency,
            include_audio_levels: !self.no_audio,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Auto,
    Embedded,
    External,
}

impl From<BackendArg> for BackendPreference {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::Embedded => BackendPreference::Embedded,
            BackendArg::External => BackendPreference::External,
        }
    }
}

#[derive(Args)]
struct PlayArgs {
    /// Video file
    video: PathBuf,

    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    params: ParamsArgs,

    /// Player settings (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Playback speed (0.25 to 2.0 in steps of 0.25)
    #[arg(long)]
    speed: Option<f64>,

    /// Native window the external player renders into
    #[arg(long)]
    window_id: Option<u64>,

    /// Start position in seconds
    #[arg(long)]
    start: Option<f64>,

    /// Stop after this many seconds of playback
    #[arg(long)]
    duration: Option<f64>,

    /// Write every composited frame here as PNG
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    /// Save the last composited frame as PNG
    #[arg(long)]
    snapshot: Option<PathBuf>,

    #[arg(long)]
    hide_overlay: bool,

    #[arg(long)]
    no_labels: bool,

    #[arg(long)]
    no_track_ids: bool,
}

impl PlayArgs {
    fn player_config(&self) -> Result<PlayerConfig> {
        let mut config = match &self.config {
            Some(path) => PlayerConfig::load(path)?,
            None => PlayerConfig::default(),
        };
        if let Some(backend) = self.backend {
            config.backend = backend.into();
        }
        if let Some(speed) = self.speed {
            config.speed = PlaybackSpeed::new(speed)?;
        }
        if self.hide_overlay {
            config.overlay_visible = false;
        }
        if self.no_labels {
            config.show_labels = false;
        }
        if self.no_track_ids {
            config.show_track_ids = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Probe { files, output } => probe_command(files, output).await,
        Commands::Track {
            video,
            output,
            source,
            params,
        } => track_command(video, output, source, params).await,
        Commands::Play(args) => play_command(args).await,
    }
}

async fn probe_command(files: Vec<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    info!("Probing {} files", files.len());

    let mut results = Vec::new();
    for file in &files {
        if !file.exists() {
            warn!(path = %file.display(), "file does not exist");
            continue;
        }
        match media_io::probe_media(file) {
            Ok(info) => results.push(serde_json::json!({
                "file": file,
                "width": info.width,
                "height": info.height,
                "fps": info.fps,
                "frame_count": info.frame_count,
                "duration_seconds": info.duration_seconds,
            })),
            Err(e) => warn!(path = %file.display(), error = %e, "probe failed"),
        }
    }

    let json = serde_json::to_string_pretty(&results)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
            info!(path = %path.display(), "probe results written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn track_command(
    video: PathBuf,
    output: PathBuf,
    source: SourceArgs,
    params: ParamsArgs,
) -> Result<()> {
    let mut bridge = JobBridge::new(source.tracker()?);
    let handle = bridge.submit(video.clone(), params.to_params())?;
    info!(job = %handle.id(), video = %video.display(), "tracking");

    let mut interval = tokio::time::interval(Duration::from_millis(100));
    loop {
        interval.tick().await;
        for message in bridge.poll() {
            match message {
                JobMessage::Started { message } => info!("{message}"),
                JobMessage::Progress { message, .. } => debug!("{message}"),
                JobMessage::Done(table) => {
                    table
                        .save(&output)
                        .with_context(|| format!("write {}", output.display()))?;
                    info!(
                        path = %output.display(),
                        frames = table.frame_count(),
                        annotated = table.annotated_frames(),
                        "annotations written"
                    );
                    return Ok(());
                }
                JobMessage::Failed(e) => bail!("tracking failed: {e}"),
            }
        }
    }
}

/// Collects what the player presents: PNG files for composited frames, a
/// shape count for the overlay layer of an external player.
struct PngSink {
    frames_dir: Option<PathBuf>,
    last_frame: Option<RgbaImage>,
    presented: usize,
    write_failed: bool,
}

impl PngSink {
    fn new(frames_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &frames_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(Self {
            frames_dir,
            last_frame: None,
            presented: 0,
            write_failed: false,
        })
    }

    fn save_last(&self, path: &Path) -> Result<()> {
        let Some(frame) = &self.last_frame else {
            bail!("no frame was presented");
        };
        frame
            .save(path)
            .with_context(|| format!("write {}", path.display()))?;
        info!(path = %path.display(), "snapshot written");
        Ok(())
    }
}

impl DisplaySink for PngSink {
    fn present_frame(&mut self, frame: &RgbaImage) {
        if let Some(dir) = &self.frames_dir {
            let path = dir.join(format!("frame_{:06}.png", self.presented));
            if let Err(e) = frame.save(&path) {
                // Report once, keep playing.
                if !self.write_failed {
                    warn!(path = %path.display(), error = %e, "failed to write frame");
                    self.write_failed = true;
                }
            }
        }
        self.presented += 1;
        self.last_frame = Some(frame.clone());
    }

    fn present_overlay(&mut self, layer: &ShapeLayer) {
        self.presented += 1;
        debug!(shapes = layer.shapes().len(), "overlay updated");
    }
}

async fn play_command(args: PlayArgs) -> Result<()> {
    let config = args.player_config()?;
    let video = media_io::probe_media(&args.video)
        .with_context(|| format!("probe {}", args.video.display()))?;
    info!(
        path = %video.path.display(),
        width = video.width,
        height = video.height,
        frames = video.frame_count,
        "video probed"
    );

    let tick = config.tick_interval();
    let factory = BackendFactory::new(config).window_id(args.window_id);
    let mut session = PlaybackSession::new(factory);
    let backend = session.open_video(video.clone(), Instant::now())?;
    info!(%backend, "playback backend ready");

    let mut bridge = JobBridge::new(args.source.tracker()?);
    bridge.submit(video.path.clone(), args.params.to_params())?;

    let mut sink = PngSink::new(args.frames_dir.clone())?;
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut playing_since: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
        }
        let now = Instant::now();

        for message in bridge.poll() {
            match message {
                JobMessage::Started { message } => info!("{message}"),
                JobMessage::Progress { message, .. } => debug!("{message}"),
                JobMessage::Done(table) => {
                    info!(frames = table.frame_count(), "annotations ready");
                    session.set_annotations(table, now);
                    if let Some(start) = args.start {
                        session.seek(start, now)?;
                    }
                    session.play(now)?;
                    playing_since = Some(now);
                }
                JobMessage::Failed(e) => bail!("tracking failed: {e}"),
            }
        }

        session.tick(now, &mut sink)?;

        if session.state() == PlayerState::Ended {
            info!(t = session.current_time(), "end of stream");
            break;
        }
        if let (Some(limit), Some(since)) = (args.duration, playing_since) {
            if now.duration_since(since).as_secs_f64() >= limit {
                session.pause(now)?;
                break;
            }
        }
    }

    if let Some(path) = &args.snapshot {
        sink.save_last(path)?;
    }
    session.close();
    info!(presented = sink.presented, "playback finished");
    Ok(())
}
