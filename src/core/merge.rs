use std::collections::HashSet;
use tracing::debug;

use crate::core::data::{CharInterval, Extraction};

/// Merges the extractions of several passes into one set of non-overlapping spans.
///
/// Earlier passes take precedence: an aligned extraction from a later pass is kept
/// only when its interval overlaps nothing already kept. Unaligned extractions are
/// kept once per class and text. The result is ordered by position, unaligned last.
pub fn merge_non_overlapping(passes: Vec<Vec<Extraction>>) -> Vec<Extraction> {
    let mut kept_intervals: Vec<CharInterval> = Vec::new();
    let mut seen_unaligned: HashSet<(String, String)> = HashSet::new();
    let mut merged: Vec<Extraction> = Vec::new();

    for (pass_index, pass) in passes.into_iter().enumerate() {
        let mut first_pass_intervals: Vec<CharInterval> = Vec::new();

        for extraction in pass {
            match extraction.char_interval {
                Some(interval) => {
                    // Within the first pass every aligned span is kept as produced.
                    let conflicts = pass_index > 0
                        && kept_intervals.iter().any(|kept| kept.overlaps(&interval));
                    if conflicts {
                        debug!(
                            "Dropping '{}' from pass {}: overlaps an earlier extraction",
                            extraction.extraction_text,
                            pass_index + 1
                        );
                        continue;
                    }
                    if pass_index == 0 {
                        first_pass_intervals.push(interval);
                    } else {
                        kept_intervals.push(interval);
                    }
                    merged.push(extraction);
                }
                None => {
                    let key = (
                        extraction.extraction_class.clone(),
                        extraction.extraction_text.clone(),
                    );
                    if seen_unaligned.insert(key) {
                        merged.push(extraction);
                    }
                }
            }
        }

        kept_intervals.extend(first_pass_intervals);
    }

    merged.sort_by_key(|e| match e.char_interval {
        Some(interval) => (0, interval.start_pos, interval.end_pos),
        None => (1, usize::MAX, usize::MAX),
    });
    merged
}
