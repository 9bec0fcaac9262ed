//! Output filename standardization.
//!
//! Cleans release-group noise out of a source filename, normalizes
//! the season/episode tag, and appends the encode tags and brand.
//! The quality tag always reflects the *requested* quality, even when
//! the effective encode height ends up lower.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::Quality;

static UNWANTED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\[\s*EZTVx\.to\s*\]",
        r"(?i)\[\s*RAWR\s*\]",
        r"(?i)-\s*MeGusta\s*",
        r"@\w+",
        r"\(.?\d{4}.?\)",
        r"(?i)\b(1080p|720p|480p|x264|x265|h264|h265)\b",
        r"(?i)\b(WEB-DL|WEBRip|BluRay)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

static SEASON_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(S|Season)\s*(\d{1,2})\s*(E|Episode)\s*(\d{1,2})").expect("static pattern")
});

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[._]").expect("static pattern"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static pattern"));

/// Build the standardized output filename for an encode.
///
/// Produces `Name.SxxEyy.<quality>p.10bit.WEBRip.2CH.x265-[brand].mkv`
/// with empty segments dropped.
#[must_use]
pub fn standardize_filename(original: &str, quality: Quality, brand: &str) -> String {
    let stem = original
        .rsplit_once('.')
        .map_or(original, |(stem, _ext)| stem);
    let mut clean = stem.to_string();

    for pattern in UNWANTED_PATTERNS.iter() {
        clean = pattern.replace_all(&clean, "").into_owned();
    }

    let season_episode = SEASON_EPISODE.captures(&clean).and_then(|caps| {
        let season: u32 = caps.get(2)?.as_str().parse().ok()?;
        let episode: u32 = caps.get(4)?.as_str().parse().ok()?;
        Some(format!("S{season:02}E{episode:02}"))
    });
    if season_episode.is_some() {
        clean = SEASON_EPISODE.replace_all(&clean, "").into_owned();
    }

    clean = SEPARATORS.replace_all(&clean, " ").into_owned();
    clean = WHITESPACE.replace_all(clean.trim(), ".").into_owned();
    let clean = clean.trim_matches('.');

    let quality_tag = quality.to_string();
    let parts = [
        clean,
        season_episode.as_deref().unwrap_or(""),
        &quality_tag,
        "10bit",
        "WEBRip",
        "2CH",
        "x265",
    ];
    let base: Vec<&str> = parts.into_iter().filter(|p| !p.is_empty()).collect();

    format!("{}-[{brand}].mkv", base.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_release_noise_and_normalizes() {
        let name = standardize_filename(
            "Some.Show.S1E3.1080p.WEB-DL.x264-MeGusta [EZTVx.to].mkv",
            Quality::Q720,
            "MyEnc",
        );
        assert_eq!(name, "Some.Show.S01E03.720p.10bit.WEBRip.2CH.x265-[MyEnc].mkv");
    }

    #[test]
    fn works_without_season_episode() {
        let name = standardize_filename("home movie 2.mp4", Quality::Q480, "MyEnc");
        assert_eq!(name, "home.movie.2.480p.10bit.WEBRip.2CH.x265-[MyEnc].mkv");
    }

    #[test]
    fn long_form_season_episode_is_recognized() {
        let name = standardize_filename(
            "Some Show Season 2 Episode 11 WEBRip.mkv",
            Quality::Q1080,
            "B",
        );
        assert!(name.contains("S02E11"));
        assert!(name.starts_with("Some.Show"));
    }

    #[test]
    fn quality_tag_tracks_requested_quality() {
        // A 1080p request on a 540p source still tags 1080p; the
        // upscale guard only affects the encoder invocation.
        let name = standardize_filename("clip.mkv", Quality::Q1080, "B");
        assert!(name.contains(".1080p."));
    }

    #[test]
    fn handles_names_without_extension() {
        let name = standardize_filename("raw_dump", Quality::Q720, "B");
        assert!(name.starts_with("raw.dump."));
        assert!(name.ends_with("-[B].mkv"));
    }
}
