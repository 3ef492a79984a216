//! Search patterns and candidate ranking.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

use crate::dedup::simplify_title;
use crate::store::ResultDescriptor;

/// Extensions accepted as audio candidates.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "flac", "mp3", "m4a", "aac", "ogg", "opus", "wav", "aiff", "alac", "ape", "wv",
];

const LOSSLESS_EXTENSIONS: &[&str] = &["flac", "wav", "aiff", "alac", "ape", "wv"];

#[allow(clippy::expect_used)]
static REMIX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:re-?mix(?:es|ed)?|rmx|bootleg|mash-?up|rework)\b")
        .expect("remix regex is valid") // Static pattern, safe to panic
});

/// Coarse audio quality class, best last so `Ord` ranks upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityTier {
    /// No bit depth reported.
    Unknown,
    /// 16-bit at a rate other than 44.1 kHz.
    Other16,
    /// 24-bit below 96 kHz.
    Other24,
    /// 16-bit / 44.1 kHz.
    Cd,
    /// 24-bit at 96 kHz or more.
    HiRes,
}

impl QualityTier {
    /// Tier for a result's reported bit depth and sample rate.
    #[must_use]
    pub fn of(result: &ResultDescriptor) -> Self {
        match (result.bit_depth, result.sample_rate) {
            (Some(depth), Some(rate)) if depth >= 24 && rate >= 96_000 => Self::HiRes,
            (Some(16), Some(44_100)) => Self::Cd,
            (Some(depth), _) if depth >= 24 => Self::Other24,
            (Some(depth), _) if depth >= 16 => Self::Other16,
            _ => Self::Unknown,
        }
    }
}

/// Lower-cased extension of a remote path, if any.
#[must_use]
pub fn extension_of(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    base.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Whether the path has an audio extension.
#[must_use]
pub fn is_audio_file(filename: &str) -> bool {
    extension_of(filename).is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

fn is_lossless(filename: &str) -> bool {
    extension_of(filename).is_some_and(|ext| LOSSLESS_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether the text names a remix, bootleg or similar rework.
#[must_use]
pub fn is_remix(text: &str) -> bool {
    REMIX_PATTERN.is_match(text)
}

/// Queries to try for a line, most specific first, without repeats.
///
/// ```
/// use trackhound_core::pipeline::search_patterns;
///
/// assert_eq!(
///     search_patterns("Soundgarden", "Black Hole Sun (Remastered)"),
///     vec![
///         "Soundgarden Black Hole Sun (Remastered) flac",
///         "Soundgarden Black Hole Sun (Remastered)",
///         "Soundgarden Black Hole Sun",
///     ]
/// );
/// assert_eq!(search_patterns("", "Roads"), vec!["Roads flac", "Roads"]);
/// ```
#[must_use]
pub fn search_patterns(artist: &str, song: &str) -> Vec<String> {
    let join = |title: &str| {
        format!("{} {}", artist.trim(), title.trim())
            .trim()
            .to_string()
    };
    let exact = join(song);
    let candidates = [
        format!("{exact} flac"),
        exact.clone(),
        join(&simplify_title(song)),
    ];

    let mut patterns: Vec<String> = Vec::with_capacity(candidates.len());
    for pattern in candidates {
        if exact.is_empty() || patterns.contains(&pattern) {
            continue;
        }
        patterns.push(pattern);
    }
    patterns
}

fn compare_candidates(a: &ResultDescriptor, b: &ResultDescriptor) -> Ordering {
    QualityTier::of(a)
        .cmp(&QualityTier::of(b))
        .then_with(|| is_lossless(&a.filename).cmp(&is_lossless(&b.filename)))
        .then_with(|| a.size.cmp(&b.size))
        .then_with(|| b.filename.cmp(&a.filename))
}

/// Picks the best audio candidate for `line`.
///
/// Remixes are excluded unless the line asks for one or nothing else is
/// available. Ties in quality tier break on lossless format, then larger
/// size, then filename.
#[must_use]
pub fn select_best_candidate(results: &[ResultDescriptor], line: &str) -> Option<ResultDescriptor> {
    let audio: Vec<&ResultDescriptor> = results
        .iter()
        .filter(|result| is_audio_file(&result.filename))
        .collect();

    let pool: Vec<&ResultDescriptor> = if is_remix(line) {
        audio
    } else {
        let originals: Vec<&ResultDescriptor> = audio
            .iter()
            .copied()
            .filter(|result| !is_remix(&result.filename))
            .collect();
        if originals.is_empty() { audio } else { originals }
    };

    pool.into_iter()
        .max_by(|a, b| compare_candidates(a, b))
        .cloned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn candidate(
        filename: &str,
        size: u64,
        bit_depth: Option<u32>,
        sample_rate: Option<u32>,
    ) -> ResultDescriptor {
        ResultDescriptor {
            username: "peer".to_string(),
            filename: filename.to_string(),
            size,
            bit_rate: None,
            bit_depth,
            sample_rate,
        }
    }

    // ==================== Ranking Tests ====================

    #[test]
    fn test_prefers_24_96_over_cd_and_24_48() {
        let results = vec![
            candidate("a/cd.flac", 30, Some(16), Some(44_100)),
            candidate("a/hires.flac", 60, Some(24), Some(96_000)),
            candidate("a/mid.flac", 90, Some(24), Some(48_000)),
        ];
        let best = select_best_candidate(&results, "Artist - Song").unwrap();
        assert_eq!(best.filename, "a/hires.flac");
    }

    #[test]
    fn test_tier_order() {
        let tiers: Vec<QualityTier> = [
            candidate("x.flac", 1, None, None),
            candidate("x.flac", 1, Some(16), Some(48_000)),
            candidate("x.flac", 1, Some(24), Some(48_000)),
            candidate("x.flac", 1, Some(16), Some(44_100)),
            candidate("x.flac", 1, Some(24), Some(192_000)),
        ]
        .iter()
        .map(QualityTier::of)
        .collect();
        let mut sorted = tiers.clone();
        sorted.sort();
        assert_eq!(tiers, sorted);
    }

    #[test]
    fn test_unknown_quality_prefers_lossless_then_size() {
        let results = vec![
            candidate("song.mp3", 900, None, None),
            candidate("song.flac", 100, None, None),
            candidate("song (1).flac", 200, None, None),
        ];
        let best = select_best_candidate(&results, "A - Song").unwrap();
        assert_eq!(best.filename, "song (1).flac");
    }

    #[test]
    fn test_equal_candidates_break_on_filename() {
        let results = vec![
            candidate("b.flac", 10, None, None),
            candidate("a.flac", 10, None, None),
        ];
        assert_eq!(
            select_best_candidate(&results, "x").unwrap().filename,
            "a.flac"
        );
    }

    // ==================== Filter Tests ====================

    #[test]
    fn test_non_audio_files_are_ignored() {
        let results = vec![
            candidate("cover.jpg", 10_000, None, None),
            candidate("notes.txt", 10, None, None),
        ];
        assert!(select_best_candidate(&results, "A - B").is_none());
    }

    #[test]
    fn test_remix_excluded_when_original_exists() {
        let results = vec![
            candidate("Song (Club Remix).flac", 100, Some(24), Some(96_000)),
            candidate("Song.mp3", 10, None, None),
        ];
        assert_eq!(
            select_best_candidate(&results, "A - Song").unwrap().filename,
            "Song.mp3"
        );
    }

    #[test]
    fn test_remix_allowed_when_only_option() {
        let results = vec![candidate("Song (Remix).flac", 100, None, None)];
        assert!(select_best_candidate(&results, "A - Song").is_some());
    }

    #[test]
    fn test_remix_request_keeps_remixes() {
        let results = vec![
            candidate("Song (Remix).flac", 100, Some(24), Some(96_000)),
            candidate("Song.flac", 100, Some(16), Some(44_100)),
        ];
        let best = select_best_candidate(&results, "A - Song (Remix)").unwrap();
        assert_eq!(best.filename, "Song (Remix).flac");
    }

    #[test]
    fn test_is_remix_word_boundaries() {
        assert!(is_remix("Track (RMX)"));
        assert!(is_remix("Re-Mix"));
        assert!(!is_remix("Premixed Concrete"));
    }

    // ==================== Pattern Tests ====================

    #[test]
    fn test_patterns_skip_duplicates() {
        assert_eq!(
            search_patterns("Portishead", "Roads"),
            vec!["Portishead Roads flac", "Portishead Roads"]
        );
    }

    #[test]
    fn test_patterns_empty_line() {
        assert!(search_patterns("", "").is_empty());
    }

    #[test]
    fn test_extension_of_handles_windows_paths() {
        assert_eq!(extension_of("C:\\Music\\a.FLAC").as_deref(), Some("flac"));
        assert_eq!(extension_of("dir.v2/file"), None);
    }
}
