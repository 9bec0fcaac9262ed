//! Media analysis via ffprobe.
//!
//! Probes the merged input artifact for the handful of facts the
//! encode needs: duration, native height, pixel depth, and audio
//! channel count. Anything unplayable fails with `InvalidMedia` so
//! no encoder is ever launched for it.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use revenc_core::JobError;
use revenc_core::domain::MediaAnalysis;

/// Probe binary name; resolved through `PATH`.
const FFPROBE_BIN: &str = "ffprobe";

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    channels: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Probe a media file.
///
/// # Errors
///
/// Returns `InvalidMedia` for zero-byte files, unparseable
/// containers, and probes with no usable duration or height;
/// `Internal` when the probe binary itself cannot be run.
pub async fn probe_media(input: &Path) -> Result<MediaAnalysis, JobError> {
    let size = tokio::fs::metadata(input)
        .await
        .map_err(|e| JobError::invalid_media(format!("cannot stat input: {e}")))?
        .len();
    if size == 0 {
        return Err(JobError::invalid_media("zero-byte input"));
    }

    let output = Command::new(FFPROBE_BIN)
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| JobError::internal(format!("failed to run {FFPROBE_BIN}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(JobError::invalid_media(format!(
            "probe failed: {}",
            stderr.lines().last().unwrap_or("unknown probe error")
        )));
    }

    let analysis = parse_probe_output(&output.stdout)?;
    debug!(
        input = %input.display(),
        duration = analysis.duration_seconds,
        height = analysis.height,
        "probe complete"
    );
    Ok(analysis)
}

/// Parse ffprobe's JSON output into an analysis record.
pub fn parse_probe_output(stdout: &[u8]) -> Result<MediaAnalysis, JobError> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| JobError::invalid_media(format!("unparseable probe output: {e}")))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| JobError::invalid_media("no video stream"))?;

    let audio_channels = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .and_then(|s| s.channels)
        .unwrap_or(0);

    let duration_seconds = probe
        .format
        .and_then(|f| f.duration)
        .or_else(|| video.duration.clone())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let analysis = MediaAnalysis {
        duration_seconds,
        height: video.height.unwrap_or(0),
        is_10bit: video
            .pix_fmt
            .as_deref()
            .is_some_and(|p| p.contains("10le") || p.contains("10be")),
        audio_channels,
    };

    if !analysis.is_valid() {
        return Err(JobError::invalid_media(format!(
            "duration {}s, height {}",
            analysis.duration_seconds, analysis.height
        )));
    }
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_json(streams: &str, duration: &str) -> Vec<u8> {
        format!(r#"{{"streams": [{streams}], "format": {{"duration": "{duration}"}}}}"#)
            .into_bytes()
    }

    #[test]
    fn parses_video_and_audio_streams() {
        let json = probe_json(
            r#"{"codec_type": "video", "height": 1080, "pix_fmt": "yuv420p10le"},
               {"codec_type": "audio", "channels": 6}"#,
            "181.52",
        );
        let analysis = parse_probe_output(&json).unwrap();
        assert!((analysis.duration_seconds - 181.52).abs() < 1e-9);
        assert_eq!(analysis.height, 1080);
        assert!(analysis.is_10bit);
        assert_eq!(analysis.audio_channels, 6);
    }

    #[test]
    fn eight_bit_source_detected() {
        let json = probe_json(r#"{"codec_type": "video", "height": 720, "pix_fmt": "yuv420p"}"#, "60");
        let analysis = parse_probe_output(&json).unwrap();
        assert!(!analysis.is_10bit);
        assert_eq!(analysis.audio_channels, 0);
    }

    #[test]
    fn stream_duration_is_the_fallback() {
        let json = br#"{"streams": [{"codec_type": "video", "height": 480, "duration": "42.0"}]}"#;
        let analysis = parse_probe_output(json).unwrap();
        assert!((analysis.duration_seconds - 42.0).abs() < 1e-9);
    }

    #[test]
    fn missing_duration_or_height_is_invalid_media() {
        let no_duration = probe_json(r#"{"codec_type": "video", "height": 720}"#, "0");
        assert!(matches!(
            parse_probe_output(&no_duration),
            Err(JobError::InvalidMedia { .. })
        ));

        let no_video = probe_json(r#"{"codec_type": "audio", "channels": 2}"#, "60");
        assert!(matches!(
            parse_probe_output(&no_video),
            Err(JobError::InvalidMedia { .. })
        ));
    }

    #[test]
    fn garbage_output_is_invalid_media() {
        assert!(matches!(
            parse_probe_output(b"moov atom not found"),
            Err(JobError::InvalidMedia { .. })
        ));
    }
}
