//! Encoder progress stream parsing.
//!
//! The encoder writes line-oriented `key=value` pairs to its stdout.
//! Only the timestamp keys matter here; everything else (frame
//! counts, bitrate, `N/A` placeholders) is ignored.

/// Extract the encoded position in seconds from one progress line.
///
/// `out_time_ms` values are microseconds despite the name (a quirk
/// the encoder has kept for compatibility); `out_time` is a
/// `HH:MM:SS.micros` clock. Malformed values yield `None`.
#[must_use]
pub fn parse_progress_line(line: &str) -> Option<f64> {
    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("out_time_ms=") {
            if let Ok(us) = rest.parse::<f64>() {
                return Some(us / 1_000_000.0);
            }
        } else if let Some(rest) = token.strip_prefix("out_time=") {
            return parse_clock_to_seconds(rest);
        }
    }
    None
}

/// Whether this line marks the end of the progress stream.
#[must_use]
pub fn is_progress_end(line: &str) -> bool {
    line.split_whitespace()
        .any(|token| token.strip_prefix("progress=") == Some("end"))
}

fn parse_clock_to_seconds(s: &str) -> Option<f64> {
    let mut parts = s.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours.mul_add(3600.0, minutes.mul_add(60.0, seconds)))
}

/// Format a position in seconds as `H:MM:SS` / `M:SS` for status text.
#[must_use]
pub fn format_position(seconds: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_time_ms_is_microseconds() {
        assert_eq!(parse_progress_line("out_time_ms=820000"), Some(0.82));
        assert_eq!(parse_progress_line("out_time_ms=90000000"), Some(90.0));
    }

    #[test]
    fn out_time_clock_form() {
        assert_eq!(
            parse_progress_line("out_time=00:01:23.500000"),
            Some(83.5)
        );
    }

    #[test]
    fn malformed_values_are_ignored() {
        assert_eq!(parse_progress_line("out_time_ms=N/A"), None);
        assert_eq!(parse_progress_line("out_time=N/A"), None);
        assert_eq!(parse_progress_line("frame=241"), None);
        assert_eq!(parse_progress_line(""), None);
    }

    #[test]
    fn end_marker_detection() {
        assert!(is_progress_end("progress=end"));
        assert!(!is_progress_end("progress=continue"));
        assert!(!is_progress_end("out_time_ms=100"));
    }

    #[test]
    fn position_formatting() {
        assert_eq!(format_position(0.0), "0:00");
        assert_eq!(format_position(83.5), "1:23");
        assert_eq!(format_position(3725.0), "1:02:05");
    }
}
