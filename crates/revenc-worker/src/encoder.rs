//! Encoder subprocess supervision.
//!
//! The encoder contract: machine-readable progress (`key=value`
//! lines) on stdout, diagnostics on stderr, SIGKILL on cancellation,
//! and the last line of stderr as the user-visible reason on a
//! non-zero exit.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use revenc_core::JobError;
use revenc_core::domain::Preset;

use crate::progress::{is_progress_end, parse_progress_line};

/// Encoder binary name; resolved through `PATH`.
const FFMPEG_BIN: &str = "ffmpeg";

/// How a supervised encode ended, short of failure.
#[derive(Debug, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// Exit code 0; the output artifact is complete.
    Completed,
    /// The service is shutting down; the subprocess was stopped and
    /// the work should be redelivered later.
    Shutdown,
}

/// Everything needed to build one encoder invocation.
#[derive(Debug, Clone)]
pub struct EncodeSpec {
    /// Merged input artifact.
    pub input: PathBuf,
    /// Output path inside the workspace.
    pub output: PathBuf,
    /// Effective target height (already upscale-guarded).
    pub target_height: u32,
    /// Constant rate factor.
    pub crf: u8,
    /// Encoder preset.
    pub preset: Preset,
    /// Audio bitrate, e.g. "128k".
    pub audio_bitrate: String,
    /// Source audio channel count; 0 drops audio entirely.
    pub audio_channels: u32,
}

/// Build the encoder argument list for a spec.
///
/// HEVC at the given CRF and preset, scaled to the target height
/// (width follows, kept even), AAC audio with channel passthrough,
/// matroska container. Progress goes to stdout, diagnostics to
/// stderr.
#[must_use]
pub fn build_encoder_args(spec: &EncodeSpec) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostats",
        "-y",
        "-progress",
        "pipe:1",
        "-i",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();
    args.push(spec.input.display().to_string());

    args.extend(
        [
            "-c:v",
            "libx265",
            "-vf",
            &format!("scale=-2:{}", spec.target_height),
            "-crf",
            &spec.crf.to_string(),
            "-preset",
            spec.preset.as_str(),
            "-pix_fmt",
            "yuv420p10le",
        ]
        .iter()
        .map(ToString::to_string),
    );

    if spec.audio_channels == 0 {
        args.push("-an".to_string());
    } else {
        args.extend(
            ["-c:a", "aac", "-b:a", &spec.audio_bitrate]
                .iter()
                .map(ToString::to_string),
        );
    }

    args.extend(["-f".to_string(), "matroska".to_string()]);
    args.push(spec.output.display().to_string());
    args
}

/// Run the encoder to completion under supervision.
///
/// Progress positions (seconds) are published through `progress_tx`
/// as they arrive; the stream's end marker publishes
/// `duration_seconds` so the last status edit reads 100%.
/// Cancellation SIGKILLs the subprocess and returns
/// `JobError::Cancelled`; service shutdown stops it gracefully and
/// returns [`EncodeOutcome::Shutdown`].
pub async fn run_encoder(
    spec: &EncodeSpec,
    duration_seconds: f64,
    cancel: &CancellationToken,
    shutdown: &CancellationToken,
    progress_tx: &watch::Sender<f64>,
) -> Result<EncodeOutcome, JobError> {
    let args = build_encoder_args(spec);
    debug!(output = %spec.output.display(), "launching encoder");

    let mut child = Command::new(FFMPEG_BIN)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| JobError::internal(format!("failed to launch {FFMPEG_BIN}: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| JobError::internal("encoder stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| JobError::internal("encoder stderr not captured"))?;

    let progress_reader = tokio::spawn(read_progress(
        stdout,
        progress_tx.clone(),
        duration_seconds,
    ));
    let stderr_reader = tokio::spawn(collect_stderr_tail(stderr));

    let status = tokio::select! {
        biased;

        () = cancel.cancelled() => {
            warn!("encode cancelled, killing subprocess");
            kill_now(&mut child).await;
            return Err(JobError::Cancelled);
        }

        () = shutdown.cancelled() => {
            debug!("shutdown during encode, stopping subprocess");
            stop_gracefully(&mut child).await;
            return Ok(EncodeOutcome::Shutdown);
        }

        status = child.wait() => {
            status.map_err(|e| JobError::internal(format!("encoder wait failed: {e}")))?
        }
    };

    let _ = progress_reader.await;
    let stderr_tail = stderr_reader.await.unwrap_or_default();

    if status.success() {
        Ok(EncodeOutcome::Completed)
    } else {
        let reason = if stderr_tail.is_empty() {
            format!("encoder exited with {status}")
        } else {
            stderr_tail
        };
        Err(JobError::encoder(reason))
    }
}

/// Parse the progress stream line by line into the watch channel.
///
/// The `progress=end` marker publishes the full duration so the user
/// sees 100% even when the last timestamp line undershot it.
async fn read_progress(
    stdout: ChildStdout,
    progress_tx: watch::Sender<f64>,
    duration_seconds: f64,
) {
    let reader = BufReader::new(stdout);
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_progress_end(&line) {
            progress_tx.send_replace(duration_seconds);
            break;
        }
        if let Some(seconds) = parse_progress_line(&line) {
            progress_tx.send_replace(seconds);
        }
    }
}

/// Drain stderr, keeping the last non-empty line.
async fn collect_stderr_tail(stderr: ChildStderr) -> String {
    let reader = BufReader::new(stderr);
    let mut lines = reader.lines();
    let mut tail = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            tail = line;
        }
    }
    tail
}

/// Immediate SIGKILL and reap.
async fn kill_now(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill encoder");
    }
}

/// SIGTERM with a grace period, escalating to SIGKILL.
///
/// Used only for service shutdown; user cancellation always kills
/// immediately.
async fn stop_gracefully(child: &mut Child) {
    #[cfg(unix)]
    {
        use std::time::Duration;

        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            #[allow(clippy::cast_possible_wrap)]
            let pid = Pid::from_raw(pid as i32);
            if signal::kill(pid, Signal::SIGTERM).is_ok()
                && tokio::time::timeout(Duration::from_secs(5), child.wait())
                    .await
                    .is_ok()
            {
                return;
            }
        }
    }

    kill_now(child).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> EncodeSpec {
        EncodeSpec {
            input: PathBuf::from("/var/cache/jobs/t1/merged_input.mkv"),
            output: PathBuf::from("/var/cache/jobs/t1/out.mkv"),
            target_height: 720,
            crf: 24,
            preset: Preset::Medium,
            audio_bitrate: "128k".to_string(),
            audio_channels: 2,
        }
    }

    #[test]
    fn args_carry_codec_scale_and_container() {
        let args = build_encoder_args(&spec());
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx265"));
        assert!(joined.contains("-vf scale=-2:720"));
        assert!(joined.contains("-crf 24"));
        assert!(joined.contains("-preset medium"));
        assert!(joined.contains("-c:a aac -b:a 128k"));
        assert!(joined.contains("-f matroska"));
        assert!(joined.contains("-progress pipe:1"));
        assert!(joined.ends_with("out.mkv"));
    }

    #[test]
    fn silent_source_drops_audio() {
        let mut silent = spec();
        silent.audio_channels = 0;
        let args = build_encoder_args(&silent);
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"aac".to_string()));
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_last_stderr_line() {
        // `sh -c` stands in for the encoder: no progress, two stderr
        // lines, exit 1. The last stderr line becomes the reason.
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("echo first >&2; echo 'Invalid data found when processing input' >&2; exit 1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let stderr = child.stderr.take().unwrap();
        let tail = collect_stderr_tail(stderr).await;
        let status = child.wait().await.unwrap();

        assert!(!status.success());
        assert_eq!(tail, "Invalid data found when processing input");
    }

    #[tokio::test]
    async fn progress_reader_feeds_watch_channel() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("printf 'frame=10\\nout_time_ms=N/A\\nout_time_ms=1500000\\n'")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();

        let (tx, rx) = watch::channel(0.0_f64);
        read_progress(stdout, tx, 2.0).await;
        child.wait().await.unwrap();

        assert!((*rx.borrow() - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn end_marker_snaps_progress_to_full_duration() {
        // The encoder's last timestamp often undershoots the total;
        // the end marker publishes the full duration instead.
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("printf 'out_time_ms=1500000\\nprogress=end\\nout_time_ms=1600000\\n'")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();

        let (tx, rx) = watch::channel(0.0_f64);
        read_progress(stdout, tx, 2.0).await;
        child.wait().await.unwrap();

        assert!((*rx.borrow() - 2.0).abs() < 1e-9);
    }
}
