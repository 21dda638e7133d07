//! Core data models used throughout the workbench.
//!
//! [`Utterance`]s are the transient output of the structuring service for
//! one chunk; [`ParsedEntry`] is the durable record the dataset holds and
//! every tool reads, edits and exports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Statement type the structuring service assigns to a question.
pub const TYPE_QUESTION: &str = "Frage";
/// Statement type the structuring service assigns to an answer.
pub const TYPE_ANSWER: &str = "Antwort";
/// Statement type for procedural remarks.
pub const TYPE_PROCEDURAL: &str = "Verfahrenshinweis";

/// One speaker turn extracted from a chunk of protocol text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    /// Ordinal within the chunk it was extracted from.
    pub id: i64,
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub role: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: String,
    /// `WP<protocol>/<page>`.
    #[serde(default)]
    pub source_reference: String,
}

/// A durable protocol record: either a free-standing note or a (possibly
/// partial) question/answer pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedEntry {
    pub id: i64,
    #[serde(default)]
    pub source_reference: String,
    #[serde(default)]
    pub questioner: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub witness: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernaussage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zugeordnete_kategorien: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begruendung: Option<String>,
    #[serde(
        default,
        rename = "Fraktion",
        skip_serializing_if = "Option::is_none"
    )]
    pub fraktion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_reason: Option<String>,
}

impl ParsedEntry {
    /// A free-standing note record.
    pub fn note(id: i64, source_reference: &str, text: String) -> Self {
        Self {
            id,
            source_reference: source_reference.to_string(),
            note: Some(text),
            ..Default::default()
        }
    }

    /// A question/answer record; either side may be missing.
    pub fn exchange(
        id: i64,
        source_reference: &str,
        questioner: Option<String>,
        question: Option<String>,
        witness: Option<String>,
        answer: Option<String>,
    ) -> Self {
        Self {
            id,
            source_reference: source_reference.to_string(),
            questioner,
            question,
            witness,
            answer,
            ..Default::default()
        }
    }

    pub fn is_note(&self) -> bool {
        self.note.is_some()
    }

    /// Whether there is anything worth sending to a reasoning service.
    pub fn has_content(&self) -> bool {
        self.question.is_some()
            || self.answer.is_some()
            || self.kernaussage.is_some()
            || self.note.is_some()
    }

    pub fn has_analysis(&self) -> bool {
        self.kernaussage.is_some()
            || self.zugeordnete_kategorien.is_some()
            || self.begruendung.is_some()
    }

    /// Read a field as a sortable value.
    pub fn field(&self, field: EntryField) -> FieldValue<'_> {
        fn text(v: &Option<String>) -> FieldValue<'_> {
            match v {
                Some(s) => FieldValue::Text(s.as_str()),
                None => FieldValue::Null,
            }
        }
        match field {
            EntryField::Id => FieldValue::Number(self.id),
            EntryField::SourceReference => FieldValue::Text(&self.source_reference),
            EntryField::Questioner => text(&self.questioner),
            EntryField::Question => text(&self.question),
            EntryField::Witness => text(&self.witness),
            EntryField::Answer => text(&self.answer),
            EntryField::Note => text(&self.note),
            EntryField::Kernaussage => text(&self.kernaussage),
            EntryField::ZugeordneteKategorien => text(&self.zugeordnete_kategorien),
            EntryField::Begruendung => text(&self.begruendung),
            EntryField::Fraktion => text(&self.fraktion),
            EntryField::SearchReason => text(&self.search_reason),
        }
    }

    /// Overwrite one field from user input. An empty value clears optional
    /// fields.
    pub fn set_field(&mut self, field: EntryField, value: &str) -> anyhow::Result<()> {
        let opt = || {
            if value.trim().is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        };
        match field {
            EntryField::Id => anyhow::bail!("the record id cannot be edited"),
            EntryField::SourceReference => self.source_reference = value.to_string(),
            EntryField::Questioner => self.questioner = opt(),
            EntryField::Question => self.question = opt(),
            EntryField::Witness => self.witness = opt(),
            EntryField::Answer => self.answer = opt(),
            EntryField::Note => self.note = opt(),
            EntryField::Kernaussage => self.kernaussage = opt(),
            EntryField::ZugeordneteKategorien => self.zugeordnete_kategorien = opt(),
            EntryField::Begruendung => self.begruendung = opt(),
            EntryField::Fraktion => self.fraktion = opt(),
            EntryField::SearchReason => self.search_reason = opt(),
        }
        Ok(())
    }
}

/// Addressable fields of a [`ParsedEntry`], named as in the JSON form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryField {
    Id,
    SourceReference,
    Questioner,
    Question,
    Witness,
    Answer,
    Note,
    Kernaussage,
    ZugeordneteKategorien,
    Begruendung,
    Fraktion,
    SearchReason,
}

impl EntryField {
    pub const ALL: [EntryField; 12] = [
        EntryField::Id,
        EntryField::SourceReference,
        EntryField::Questioner,
        EntryField::Question,
        EntryField::Witness,
        EntryField::Answer,
        EntryField::Note,
        EntryField::Kernaussage,
        EntryField::ZugeordneteKategorien,
        EntryField::Begruendung,
        EntryField::Fraktion,
        EntryField::SearchReason,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntryField::Id => "id",
            EntryField::SourceReference => "sourceReference",
            EntryField::Questioner => "questioner",
            EntryField::Question => "question",
            EntryField::Witness => "witness",
            EntryField::Answer => "answer",
            EntryField::Note => "note",
            EntryField::Kernaussage => "kernaussage",
            EntryField::ZugeordneteKategorien => "zugeordneteKategorien",
            EntryField::Begruendung => "begruendung",
            EntryField::Fraktion => "Fraktion",
            EntryField::SearchReason => "searchReason",
        }
    }
}

impl fmt::Display for EntryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntryField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryField::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown field: '{}'", s))
    }
}

/// A field value as seen by sorting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Null,
    Number(i64),
    Text(&'a str),
}

/// Result of checking one record against a free-text query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevanceVerdict {
    pub is_relevant: bool,
    pub reason: String,
}

impl RelevanceVerdict {
    pub fn irrelevant() -> Self {
        Self {
            is_relevant: false,
            reason: "Nicht relevant".to_string(),
        }
    }
}

/// Thematic analysis of one record, keyed by the record id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryAnalysis {
    pub id: i64,
    pub kernaussage: String,
    pub zugeordnete_kategorien: String,
    pub begruendung: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInsightItem {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub references: String,
}

/// Summary plus the top insights synthesised from analysed records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInsights {
    pub summary: String,
    pub insights: Vec<KeyInsightItem>,
}

impl KeyInsights {
    pub fn to_markdown(&self) -> String {
        let mut text = format!(
            "# Generated Insights\n\n## Summary\n\n{}\n\n---\n\n## Key Insights\n\n",
            self.summary
        );
        for (i, item) in self.insights.iter().enumerate() {
            text.push_str(&format!(
                "### {}. {}\n{}\n**References:** {}\n\n",
                i + 1,
                item.title,
                item.description,
                item.references
            ));
        }
        text.trim().to_string()
    }
}

/// One node of the category catalogue used for thematic analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusItem {
    pub id: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "sub_items")]
    pub sub_items: Vec<CorpusItem>,
}
