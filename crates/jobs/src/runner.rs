use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::params::TrackParams;
use crate::state::JobMessage;
use crate::tracker::{Progress, Tracker};

/// Runs `tracker` to completion on the calling thread, reporting through
/// `emit`. Always ends with exactly one terminal message, panics included.
pub(crate) fn run_job(
    tracker: &dyn Tracker,
    video: &Path,
    params: &TrackParams,
    emit: &mut dyn FnMut(JobMessage),
) {
    let suffix = params.stage_suffix();
    emit(JobMessage::Started {
        message: format!("Starting…{suffix}"),
    });

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        tracker.run(video, params, &mut |p| {
            emit(JobMessage::Progress {
                current: p.current,
                total: p.total,
                message: progress_message(&p, &suffix),
            })
        })
    }));

    let terminal = match outcome {
        Ok(Ok(table)) => {
            let table = if params.include_audio_levels {
                table.with_zero_filled_audio()
            } else {
                table
            };
            info!(
                video = %video.display(),
                frames = table.frame_count(),
                annotated = table.annotated_frames(),
                "tracking finished"
            );
            JobMessage::Done(Arc::new(table))
        }
        Ok(Err(e)) => {
            warn!(video = %video.display(), error = %format!("{e:#}"), "tracking failed");
            JobMessage::Failed(format!("{e:#}"))
        }
        Err(payload) => {
            let message = format!("tracker panicked: {}", panic_message(payload.as_ref()));
            warn!(video = %video.display(), "{message}");
            JobMessage::Failed(message)
        }
    };
    emit(terminal);
}

pub(crate) fn progress_message(progress: &Progress, suffix: &str) -> String {
    if progress.total > 0 {
        format!("Frame {}/{}{suffix}", progress.current, progress.total)
    } else if !progress.message.is_empty() {
        format!("{}{suffix}", progress.message)
    } else {
        format!("Frame {}{suffix}", progress.current)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
