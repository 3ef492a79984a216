//! `check`: run the duplicate detector for one line.

use anyhow::Result;
use trackhound_core::dedup::extract_artist_song;
use trackhound_core::{DuplicateDetector, DuplicateReason, DuplicateVerdict};

use super::open_store;
use crate::app_config::Settings;
use crate::cli::CheckArgs;

pub async fn run_check_command(settings: &Settings, args: &CheckArgs) -> Result<()> {
    let store = open_store(settings).await?;
    let detector = DuplicateDetector::new(store, settings.pipeline.fuzzy_threshold);
    let (artist, song) = extract_artist_song(&args.line);
    let verdict = detector
        .check_all_duplicates(&args.line, args.filename.as_deref(), &artist, &song)
        .await?;

    match verdict {
        DuplicateVerdict::New => println!("NEW: {}", args.line),
        DuplicateVerdict::Duplicate(DuplicateReason::FuzzyMatch {
            similarity,
            matched_line,
        }) => println!(
            "DUPLICATE (fuzzy_match {similarity:.2} against '{matched_line}'): {}",
            args.line
        ),
        DuplicateVerdict::Duplicate(reason) => println!("DUPLICATE ({reason}): {}", args.line),
    }
    Ok(())
}
