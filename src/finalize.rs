//! Consecutive-duplicate removal and dense renumbering.

use crate::models::ParsedEntry;

/// Outcome of [`finalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Finalized {
    pub entries: Vec<ParsedEntry>,
    pub duplicates_removed: usize,
}

/// Drop records that repeat their immediate predecessor's
/// `(question, answer, note)` and assign ids `1..=n` in order.
pub fn finalize(entries: Vec<ParsedEntry>) -> Finalized {
    let before = entries.len();
    let mut kept: Vec<ParsedEntry> = Vec::with_capacity(before);
    for entry in entries {
        if let Some(prev) = kept.last() {
            if same_content(prev, &entry) {
                continue;
            }
        }
        kept.push(entry);
    }
    for (i, entry) in kept.iter_mut().enumerate() {
        entry.id = i as i64 + 1;
    }
    Finalized {
        duplicates_removed: before - kept.len(),
        entries: kept,
    }
}

fn same_content(a: &ParsedEntry, b: &ParsedEntry) -> bool {
    a.question == b.question && a.answer == b.answer && a.note == b.note
}
