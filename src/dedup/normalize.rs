//! Text normalization shared by the store and the duplicate detector.

use std::sync::LazyLock;

use regex::Regex;

/// Leading track numbers such as `07 - `, `07. `, `1-03 ` or `12) `.
/// A bare number needs a separator or whitespace after it so titles like
/// `1979` survive.
#[allow(clippy::expect_used)]
static TRACK_NUMBER_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d{1,3}(?:[-.]\d{1,3})?(?:\s*[-._)\]]\s*|\s+)")
        .expect("track number regex is valid") // Static pattern, safe to panic
});

/// Runs of anything that is not a letter or digit.
#[allow(clippy::expect_used)]
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\W_]+").expect("non-word regex is valid"));

/// Parenthesized or bracketed qualifiers: `(Remastered 2009)`, `[Live]`.
#[allow(clippy::expect_used)]
static BRACKETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("bracket regex is valid")
});

/// Featured-artist credits through the end of the title.
#[allow(clippy::expect_used)]
static FEATURING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+.*$").expect("featuring regex is valid")
});

/// Separator between artist, album and song in a playlist line.
const LINE_SEPARATOR: &str = " - ";

/// Builds the comparison key for a remote filename.
///
/// Strips directories (either separator style) and the extension, drops a
/// leading track number, lower-cases, and collapses every run of non-word
/// characters into one space.
///
/// # Examples
///
/// ```
/// use trackhound_core::dedup::normalize_filename;
///
/// assert_eq!(
///     normalize_filename(r"@@peer\Music\Superunknown\07 - Black Hole Sun.flac"),
///     "black hole sun"
/// );
/// assert_eq!(normalize_filename("1979.mp3"), "1979");
/// assert_eq!(normalize_filename(""), "");
/// ```
#[must_use]
pub fn normalize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let stem = strip_extension(base);
    let without_number = TRACK_NUMBER_PREFIX.replace(stem, "");
    collapse_words(&without_number.to_lowercase())
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot)
            if dot > 0
                && (1..=5).contains(&(name.len() - dot - 1))
                && name[dot + 1..].chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            &name[..dot]
        }
        _ => name,
    }
}

/// Lower-cases and replaces non-word runs with single spaces.
#[must_use]
pub fn collapse_words(text: &str) -> String {
    NON_WORD
        .replace_all(&text.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Splits a playlist line into `(artist, song)`.
///
/// - `Artist - Album - Song` (three or more parts): the song is everything
///   after the album, re-joined.
/// - `Artist - Song`: the two halves.
/// - Anything else: empty artist, whole line as the song.
///
/// # Examples
///
/// ```
/// use trackhound_core::dedup::extract_artist_song;
///
/// assert_eq!(
///     extract_artist_song("Soundgarden - Superunknown - Black Hole Sun"),
///     ("Soundgarden".to_string(), "Black Hole Sun".to_string())
/// );
/// assert_eq!(
///     extract_artist_song("Portishead - Roads"),
///     ("Portishead".to_string(), "Roads".to_string())
/// );
/// assert_eq!(
///     extract_artist_song("Roads"),
///     (String::new(), "Roads".to_string())
/// );
/// ```
#[must_use]
pub fn extract_artist_song(line: &str) -> (String, String) {
    let line = line.trim();
    let parts: Vec<&str> = line.split(LINE_SEPARATOR).map(str::trim).collect();
    match parts.as_slice() {
        [artist, _album, rest @ ..] if !rest.is_empty() => {
            ((*artist).to_string(), rest.join(LINE_SEPARATOR))
        }
        [artist, song] => ((*artist).to_string(), (*song).to_string()),
        _ => (String::new(), line.to_string()),
    }
}

/// Drops bracketed qualifiers and featured-artist credits from a title.
///
/// Returns the input unchanged when stripping would leave nothing.
#[must_use]
pub fn simplify_title(title: &str) -> String {
    let stripped = BRACKETED.replace_all(title, " ");
    let stripped = FEATURING.replace(&stripped, "");
    let simplified = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if simplified.is_empty() {
        title.trim().to_string()
    } else {
        simplified
    }
}

/// Key used for fuzzy artist+song comparison.
#[must_use]
pub fn fuzzy_key(artist: &str, song: &str) -> String {
    collapse_words(&format!("{artist} {song}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_unix_path_and_extension() {
        assert_eq!(
            normalize_filename("music/Portishead/Dummy/03. Roads.mp3"),
            "roads"
        );
    }

    #[test]
    fn test_normalize_strips_disc_track_prefix() {
        assert_eq!(normalize_filename("1-03 Glory Box.flac"), "glory box");
    }

    #[test]
    fn test_normalize_keeps_number_titles() {
        assert_eq!(normalize_filename("1979.flac"), "1979");
    }

    #[test]
    fn test_normalize_collapses_punctuation_and_underscores() {
        assert_eq!(
            normalize_filename("AC_DC -- Back.In.Black!!.flac"),
            "ac dc back in black"
        );
    }

    #[test]
    fn test_normalize_keeps_long_suffix_that_is_not_an_extension() {
        assert_eq!(normalize_filename("Mr. Blue Sky"), "mr blue sky");
    }

    #[test]
    fn test_extract_keeps_extra_separators_in_song() {
        let (artist, song) = extract_artist_song("A - B - C - D");
        assert_eq!(artist, "A");
        assert_eq!(song, "C - D");
    }

    #[test]
    fn test_extract_handles_hyphenated_words() {
        let (artist, song) = extract_artist_song("Jay-Z - 99 Problems");
        assert_eq!(artist, "Jay-Z");
        assert_eq!(song, "99 Problems");
    }

    #[test]
    fn test_extract_empty_line() {
        assert_eq!(extract_artist_song("   "), (String::new(), String::new()));
    }

    #[test]
    fn test_simplify_title_drops_qualifiers() {
        assert_eq!(
            simplify_title("Black Hole Sun (Remastered 2014) [Live] feat. Someone"),
            "Black Hole Sun"
        );
        assert_eq!(simplify_title("(Untitled)"), "(Untitled)");
    }

    #[test]
    fn test_fuzzy_key_is_lowercase_words() {
        assert_eq!(fuzzy_key("Sound-Garden", "Black Hole Sun!"), "sound garden black hole sun");
    }
}
