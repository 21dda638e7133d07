//! Utterance collation.
//!
//! Turns the chronologically sorted utterances of a whole protocol into
//! question/answer/note records. The collator holds at most one pending
//! question: a question waits for the next answer, and anything else that
//! arrives first flushes it as a question-only record.

use std::cmp::Ordering;

use crate::models::{ParsedEntry, Utterance, TYPE_ANSWER, TYPE_QUESTION};

/// Role substring (lowercase) identifying the witness.
const WITNESS_MARKER: &str = "zeuge";
/// Role substring (lowercase) identifying a questioner ("Fragesteller").
const QUESTIONER_MARKER: &str = "frage";

/// How an utterance takes part in collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Question,
    Answer,
    Procedural,
}

/// Classify an utterance by its role text and statement type.
pub fn classify(utterance: &Utterance) -> Turn {
    let role = utterance.role.to_lowercase();
    let is_witness = role.contains(WITNESS_MARKER);
    let is_questioner = role.contains(QUESTIONER_MARKER);
    let kind = utterance.kind.as_str();

    if !is_witness && (kind == TYPE_QUESTION || (is_questioner && kind != TYPE_ANSWER)) {
        Turn::Question
    } else if (kind == TYPE_ANSWER || is_witness) && !is_questioner {
        Turn::Answer
    } else {
        Turn::Procedural
    }
}

/// Page number from the trailing segment of a `WP<protocol>/<page>`
/// reference. Leading digits of the last `/`- or whitespace-separated
/// segment are used; anything unparseable sorts as page 0.
pub fn page_number(source_reference: &str) -> u64 {
    let segment = source_reference
        .rsplit(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or("");
    let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Chronological order: page ascending, then the chunk-local ordinal.
pub fn chronological(a: &Utterance, b: &Utterance) -> Ordering {
    page_number(&a.source_reference)
        .cmp(&page_number(&b.source_reference))
        .then(a.id.cmp(&b.id))
}

/// Sort utterances into collation order. The sort is stable, so equal keys
/// keep their arrival order.
pub fn sort_chronologically(utterances: &mut [Utterance]) {
    utterances.sort_by(chronological);
}

/// Collate sorted utterances into records with collation-local ids
/// starting at 1.
pub fn collate(utterances: &[Utterance]) -> Vec<ParsedEntry> {
    let mut collator = Collator::default();
    for utterance in utterances {
        collator.push(utterance);
    }
    collator.finish()
}

#[derive(Default)]
struct Collator<'a> {
    out: Vec<ParsedEntry>,
    pending: Option<&'a Utterance>,
    next_id: i64,
}

impl<'a> Collator<'a> {
    fn push(&mut self, utterance: &'a Utterance) {
        match classify(utterance) {
            Turn::Question => {
                self.flush_pending();
                self.pending = Some(utterance);
            }
            Turn::Answer => match self.pending.take() {
                Some(question) => {
                    let id = self.take_id();
                    self.out.push(ParsedEntry::exchange(
                        id,
                        &question.source_reference,
                        Some(question.speaker.clone()),
                        Some(question.content.clone()),
                        Some(utterance.speaker.clone()),
                        Some(utterance.content.clone()),
                    ));
                }
                None => {
                    let id = self.take_id();
                    self.out.push(ParsedEntry::exchange(
                        id,
                        &utterance.source_reference,
                        None,
                        None,
                        Some(utterance.speaker.clone()),
                        Some(utterance.content.clone()),
                    ));
                }
            },
            Turn::Procedural => {
                self.flush_pending();
                let id = self.take_id();
                self.out.push(ParsedEntry::note(
                    id,
                    &utterance.source_reference,
                    format!("{}: {}", utterance.speaker, utterance.content),
                ));
            }
        }
    }

    /// Emit the pending question without an answer.
    fn flush_pending(&mut self) {
        if let Some(question) = self.pending.take() {
            let id = self.take_id();
            self.out.push(ParsedEntry::exchange(
                id,
                &question.source_reference,
                Some(question.speaker.clone()),
                Some(question.content.clone()),
                None,
                None,
            ));
        }
    }

    fn take_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn finish(mut self) -> Vec<ParsedEntry> {
        self.flush_pending();
        self.out
    }
}
