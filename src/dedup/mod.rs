//! Duplicate detection against previously successful downloads.
//!
//! A playlist line is considered already satisfied when any of three checks
//! fires, evaluated in priority order and short-circuiting on the first hit:
//!
//! 1. [`DuplicateReason::ExactLineMatch`] - the same line text has a `SUCCESS` row
//! 2. [`DuplicateReason::NormalizedFilenameMatch`] - the candidate's normalized
//!    remote filename matches a stored one
//! 3. [`DuplicateReason::FuzzyMatch`] - `artist song` is similar enough to a
//!    stored line
//!
//! Only `SUCCESS` rows count; a line that previously failed or was not found
//! is always eligible again.

mod normalize;

pub use normalize::{
    collapse_words, extract_artist_song, fuzzy_key, normalize_filename, simplify_title,
};

use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::config::DEFAULT_FUZZY_THRESHOLD;
use crate::store::{Result, Store, StoreError};

/// Fuzzy keys shorter than this never match anything.
const MIN_FUZZY_KEY_CHARS: usize = 4;

/// Which rule identified a line as a duplicate.
#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateReason {
    /// Verbatim line text already succeeded.
    ExactLineMatch,
    /// The candidate file's normalized name already succeeded.
    NormalizedFilenameMatch,
    /// A stored line is similar enough to `artist song`.
    FuzzyMatch {
        /// Best similarity found, in `[0, 1]`.
        similarity: f64,
        /// Stored line that produced it.
        matched_line: String,
    },
    /// A fetched local file has the same content hash as a stored success.
    FileHashMatch,
}

impl DuplicateReason {
    /// Stable tag used in logs and reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactLineMatch => "exact_line_match",
            Self::NormalizedFilenameMatch => "normalized_filename_match",
            Self::FuzzyMatch { .. } => "fuzzy_match",
            Self::FileHashMatch => "file_hash_match",
        }
    }
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of [`DuplicateDetector::check_all_duplicates`].
#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateVerdict {
    /// Nothing stored satisfies the line.
    New,
    /// The line is already satisfied.
    Duplicate(DuplicateReason),
}

impl DuplicateVerdict {
    /// Whether the line should be skipped.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }

    /// The reason tag, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&DuplicateReason> {
        match self {
            Self::New => None,
            Self::Duplicate(reason) => Some(reason),
        }
    }
}

/// Result of hashing a local file and looking the hash up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHashCheck {
    /// Lower-case hex SHA-256 of the file contents.
    pub hash: String,
    /// Whether a `SUCCESS` row already carries this hash.
    pub is_duplicate: bool,
}

/// Runs the duplicate checks against a [`Store`].
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    store: Store,
    threshold: f64,
}

impl DuplicateDetector {
    /// Creates a detector with the given fuzzy similarity threshold.
    ///
    /// Out-of-range thresholds are clamped into `[0, 1]`; `NaN` falls back to
    /// the default.
    #[must_use]
    pub fn new(store: Store, threshold: f64) -> Self {
        let threshold = if threshold.is_nan() {
            DEFAULT_FUZZY_THRESHOLD
        } else {
            threshold.clamp(0.0, 1.0)
        };
        Self { store, threshold }
    }

    /// Configured fuzzy threshold.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Applies exact, normalized-filename and fuzzy checks in that order.
    ///
    /// `filename` is the remote path of a chosen candidate; pass `None` before
    /// a candidate exists and the filename check is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a lookup fails.
    #[instrument(skip(self), fields(threshold = self.threshold))]
    pub async fn check_all_duplicates(
        &self,
        line: &str,
        filename: Option<&str>,
        artist: &str,
        song: &str,
    ) -> Result<DuplicateVerdict> {
        if !line.trim().is_empty() && self.store.is_downloaded(line).await? {
            debug!("exact line match");
            return Ok(DuplicateVerdict::Duplicate(DuplicateReason::ExactLineMatch));
        }

        if let Some(filename) = filename {
            let normalized = normalize_filename(filename);
            if self
                .store
                .is_duplicate_by_normalized_name(&normalized)
                .await?
            {
                debug!(%normalized, "normalized filename match");
                return Ok(DuplicateVerdict::Duplicate(
                    DuplicateReason::NormalizedFilenameMatch,
                ));
            }
        }

        if let Some(reason) = self.fuzzy_match(artist, song).await? {
            debug!(%reason, "fuzzy match");
            return Ok(DuplicateVerdict::Duplicate(reason));
        }

        Ok(DuplicateVerdict::New)
    }

    async fn fuzzy_match(&self, artist: &str, song: &str) -> Result<Option<DuplicateReason>> {
        let key = fuzzy_key(artist, song);
        if key.chars().count() < MIN_FUZZY_KEY_CHARS || song.trim().is_empty() {
            return Ok(None);
        }

        let mut best: Option<(f64, String)> = None;
        for stored in self.store.successful_lines().await? {
            let similarity = line_similarity(&key, &stored);
            if best.as_ref().is_none_or(|(score, _)| similarity > *score) {
                best = Some((similarity, stored));
            }
        }

        Ok(best
            .filter(|(similarity, _)| *similarity >= self.threshold)
            .map(|(similarity, matched_line)| DuplicateReason::FuzzyMatch {
                similarity,
                matched_line,
            }))
    }

    /// Hashes a local file and checks whether the hash already succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FileRead`] if the file cannot be read, or
    /// [`StoreError::Database`] if the lookup fails.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn check_file_hash(&self, path: &Path) -> Result<FileHashCheck> {
        let hash = hash_file(path).await?;
        let is_duplicate = self.store.is_duplicate_by_hash(&hash).await?;
        Ok(FileHashCheck { hash, is_duplicate })
    }
}

/// Similarity between a fuzzy key and a stored line.
///
/// The stored line is compared both as lower-cased text and reduced to its
/// own `artist song` key; the higher score wins.
#[must_use]
pub fn line_similarity(key: &str, stored_line: &str) -> f64 {
    let lowered = stored_line.trim().to_lowercase();
    let (artist, song) = extract_artist_song(stored_line);
    let stored_key = fuzzy_key(&artist, &song);

    let direct = strsim::normalized_levenshtein(key, &lowered);
    if stored_key.chars().count() < MIN_FUZZY_KEY_CHARS {
        return direct;
    }
    direct.max(strsim::normalized_levenshtein(key, &stored_key))
}

/// SHA-256 of a local file as lower-case hex.
///
/// # Errors
///
/// Returns [`StoreError::FileRead`] if the file cannot be read.
pub async fn hash_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| StoreError::FileRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(sha256_hex(&bytes))
}

/// SHA-256 digest as lower-case hex.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex_encode(&Sha256::digest(data))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{DownloadStatus, NewDownloadRecord};

    async fn detector_with(rows: &[(&str, &str, DownloadStatus)]) -> DuplicateDetector {
        let clock = Arc::new(ManualClock::starting_at(Duration::from_secs(1_000)));
        let store = Store::open_in_memory(clock).await.unwrap();
        for (line, filename, status) in rows {
            store
                .record_download(
                    &NewDownloadRecord {
                        username: "peer",
                        filename,
                        file_line: line,
                        ..Default::default()
                    },
                    *status,
                )
                .await
                .unwrap();
        }
        DuplicateDetector::new(store, 0.85)
    }

    // ==================== Priority Tests ====================

    #[tokio::test]
    async fn test_exact_match_wins_over_other_rules() {
        let line = "Soundgarden - Superunknown - Black Hole Sun";
        let detector = detector_with(&[(
            line,
            "Music\\Soundgarden\\07 - Black Hole Sun.flac",
            DownloadStatus::Success,
        )])
        .await;

        let verdict = detector
            .check_all_duplicates(
                line,
                Some("other/07 - Black Hole Sun.mp3"),
                "Soundgarden",
                "Black Hole Sun",
            )
            .await
            .unwrap();
        assert_eq!(
            verdict,
            DuplicateVerdict::Duplicate(DuplicateReason::ExactLineMatch)
        );
        assert_eq!(verdict.reason().unwrap().as_str(), "exact_line_match");
    }

    #[tokio::test]
    async fn test_normalized_filename_match() {
        let detector = detector_with(&[(
            "Some Other Text",
            "peer/Music/01 - Glory Box.flac",
            DownloadStatus::Success,
        )])
        .await;

        let verdict = detector
            .check_all_duplicates("zzz", Some("x\\y\\1-01. Glory Box.mp3"), "", "zzz")
            .await
            .unwrap();
        assert_eq!(
            verdict,
            DuplicateVerdict::Duplicate(DuplicateReason::NormalizedFilenameMatch)
        );
    }

    #[tokio::test]
    async fn test_fuzzy_match_against_three_part_line() {
        let detector = detector_with(&[(
            "Soundgarden - Superunknown - Black Hole Sun",
            "",
            DownloadStatus::Success,
        )])
        .await;

        let verdict = detector
            .check_all_duplicates(
                "Soundgarden - Black Hole Sun",
                None,
                "Soundgarden",
                "Black Hole Sun",
            )
            .await
            .unwrap();
        match verdict {
            DuplicateVerdict::Duplicate(DuplicateReason::FuzzyMatch {
                similarity,
                matched_line,
            }) => {
                assert!(similarity >= 0.85);
                assert_eq!(matched_line, "Soundgarden - Superunknown - Black Hole Sun");
            }
            other => panic!("expected fuzzy match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dissimilar_line_is_new() {
        let detector = detector_with(&[(
            "Portishead - Dummy - Roads",
            "Roads.flac",
            DownloadStatus::Success,
        )])
        .await;

        let verdict = detector
            .check_all_duplicates("Massive Attack - Teardrop", None, "Massive Attack", "Teardrop")
            .await
            .unwrap();
        assert_eq!(verdict, DuplicateVerdict::New);
    }

    #[tokio::test]
    async fn test_failed_rows_do_not_count() {
        let line = "Portishead - Roads";
        let detector = detector_with(&[(line, "Roads.flac", DownloadStatus::NotFound)]).await;

        let verdict = detector
            .check_all_duplicates(line, Some("Roads.flac"), "Portishead", "Roads")
            .await
            .unwrap();
        assert!(!verdict.is_duplicate());
    }

    // ==================== Edge Case Tests ====================

    #[tokio::test]
    async fn test_empty_and_short_inputs_never_match() {
        let detector = detector_with(&[("ab", "ab.mp3", DownloadStatus::Success)]).await;

        for (line, artist, song) in [("", "", ""), ("  ", "", "a"), ("x", "", "ab")] {
            let verdict = detector
                .check_all_duplicates(line, Some(""), artist, song)
                .await
                .unwrap();
            assert_eq!(verdict, DuplicateVerdict::New, "line {line:?}");
        }
    }

    #[tokio::test]
    async fn test_threshold_is_clamped() {
        let detector = detector_with(&[]).await;
        let strict = DuplicateDetector::new(detector.store.clone(), 3.0);
        assert!((strict.threshold() - 1.0).abs() < f64::EPSILON);
        let fallback = DuplicateDetector::new(detector.store, f64::NAN);
        assert!((fallback.threshold() - DEFAULT_FUZZY_THRESHOLD).abs() < f64::EPSILON);
    }

    // ==================== Hash Tests ====================

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_check_file_hash_finds_stored_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.flac");
        std::fs::write(&path, b"abc").unwrap();

        let detector = detector_with(&[]).await;
        let hash = sha256_hex(b"abc");
        detector
            .store
            .record_download(
                &NewDownloadRecord {
                    file_line: "A - B",
                    file_hash: Some(&hash),
                    ..Default::default()
                },
                DownloadStatus::Success,
            )
            .await
            .unwrap();

        let check = detector.check_file_hash(&path).await.unwrap();
        assert_eq!(check.hash, hash);
        assert!(check.is_duplicate);
    }

    #[tokio::test]
    async fn test_check_file_hash_missing_file_errors() {
        let detector = detector_with(&[]).await;
        let err = detector
            .check_file_hash(Path::new("/nonexistent/trackhound/file.flac"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::FileRead { .. }));
    }
}
