//! Prompt texts and response schemas for the Gemini `generateContent` API.
//!
//! Each builder returns a complete request body. Response schemas use the
//! OpenAPI subset Gemini accepts (`"type": "ARRAY"` etc.) and ask for
//! `application/json` output.

use serde_json::{json, Value};

use crate::models::{CorpusItem, ParsedEntry};

fn request(system: Option<String>, prompt: String, schema: Value) -> Value {
    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": schema,
        },
    });
    if let Some(system) = system {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    body
}

pub fn structure_chunk(chunk: &str, protocol: &str) -> Value {
    let prompt = format!(
        "**AUFGABE**\n\
         Du strukturierst Wortprotokolle deutscher Untersuchungsausschüsse. \
         Erkenne im folgenden Text jede Wortmeldung mit Sprecher, Rolle \
         (Fragesteller, Zeuge, Vorsitz) und Art der Äußerung.\n\n\
         **TEXT**\nProtokollnummer: {protocol}\n---\n{chunk}\n---\n\n\
         **REGELN**\n\
         1. Art ist genau eines von \"Frage\", \"Antwort\" oder \"Verfahrenshinweis\".\n\
         2. Übernimm den vollständigen Wortlaut in `content`.\n\
         3. Die Fundstelle lautet immer \"WP{protocol}/<Seitenzahl>\".\n\
         4. Nummeriere die Wortmeldungen in `id` in der Reihenfolge des Textes.\n\
         5. Die Rolle eines Zeugen ist immer \"Zeuge\"; seine Äußerungen sind \"Antwort\", \
         auch wenn er zurückfragt.\n\
         6. Äußerungen von \"Abg.\" oder \"Vors.\" sind nie \"Verfahrenshinweis\".\n\
         7. Gib ausschließlich das JSON-Array aus."
    );
    let schema = json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "id": { "type": "INTEGER" },
                "speaker": { "type": "STRING" },
                "role": { "type": "STRING" },
                "type": { "type": "STRING" },
                "content": { "type": "STRING" },
                "sourceReference": {
                    "type": "STRING",
                    "description": "Fundstelle im Format \"WPXX/YY\"."
                },
            },
            "required": ["id", "speaker", "role", "type", "content", "sourceReference"],
        },
    });
    request(None, prompt, schema)
}

/// Render the category catalogue as an indented outline.
pub fn format_corpus(items: &[CorpusItem]) -> String {
    fn walk(items: &[CorpusItem], level: usize, out: &mut String) {
        for item in items {
            out.push_str(&format!(
                "{}{}: {} - {}\n",
                "  ".repeat(level),
                item.id,
                item.category,
                item.description
            ));
            walk(&item.sub_items, level + 1, out);
        }
    }
    let mut out = String::new();
    walk(items, 0, &mut out);
    out
}

fn or_na(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("N/A")
}

pub fn analyze_entries(entries: &[ParsedEntry], corpus: &[CorpusItem]) -> Value {
    let system = format!(
        "**AUFGABE**\n\
         Du analysierst Aussagen aus Protokollen parlamentarischer Untersuchungsausschüsse. \
         Fasse für JEDEN Eintrag die Kernaussage zusammen, ordne sie dem Fragenkatalog zu \
         und begründe die Zuordnung.\n\n\
         **FRAGENKATALOG**\n{}\n\
         **REGELN**\n\
         1. `kernaussage`: knappe, neutrale Zusammenfassung der ANTWORT, Kontext aus der Frage.\n\
         2. `zugeordneteKategorien`: alle passenden Katalog-IDs, durch Semikolon getrennt \
         (z. B. \"1 (a); 3 (b)\").\n\
         3. `begruendung`: kurze Begründung je zugeordneter Kategorie.\n\
         4. Kategorie \"0\" (Irrelevant / Prozedural) nur für rein verfahrensbezogene Inhalte.\n\
         5. Gib ausschließlich ein JSON-Array mit einem Objekt pro Eintrag aus und \
         übernimm die Eintrags-ID unverändert.",
        format_corpus(corpus)
    );
    let mut prompt = String::from("**EINTRÄGE**");
    for entry in entries {
        prompt.push_str(&format!(
            "\n---\nEntry ID: {}\nQuestioner: {}\nQuestion: {}\nWitness: {}\nAnswer: {}\n---",
            entry.id,
            or_na(&entry.questioner),
            or_na(&entry.question),
            or_na(&entry.witness),
            or_na(&entry.answer),
        ));
    }
    let schema = json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "id": { "type": "INTEGER" },
                "kernaussage": { "type": "STRING" },
                "zugeordneteKategorien": { "type": "STRING" },
                "begruendung": { "type": "STRING" },
            },
            "required": ["id", "kernaussage", "zugeordneteKategorien", "begruendung"],
        },
    });
    request(Some(system), prompt, schema)
}

pub fn check_relevance(entry: &ParsedEntry, query: &str) -> Value {
    let view = json!({
        "id": entry.id,
        "sourceReference": entry.source_reference,
        "questioner": entry.questioner,
        "question": entry.question,
        "witness": entry.witness,
        "answer": entry.answer,
        "note": entry.note,
        "kernaussage": entry.kernaussage,
    });
    let view = serde_json::to_string_pretty(&view).unwrap_or_default();
    let prompt = format!(
        "Du filterst Protokolleinträge. Prüfe, ob der folgende Eintrag für die \
         Suchanfrage relevant ist.\n\n\
         **Suchanfrage:**\n\"{query}\"\n\n\
         **Suchkontext:**\nBerücksichtige nicht nur wörtliche Treffer, sondern auch \
         inhaltlich verwandte Themen, beteiligte Personen und Institutionen.\n\n\
         **Eintrag (JSON):**\n{view}\n\n\
         Antworte ausschließlich als JSON: {{ \"isRelevant\": true|false, \"reason\": \
         \"kurze Begründung oder 'Nicht relevant'\" }}"
    );
    let schema = json!({
        "type": "OBJECT",
        "properties": {
            "isRelevant": { "type": "BOOLEAN" },
            "reason": { "type": "STRING" },
        },
        "required": ["isRelevant", "reason"],
    });
    request(None, prompt, schema)
}

pub fn synthesize_insights(entries: &[ParsedEntry], top_n: usize) -> Value {
    let mut data = String::new();
    for entry in entries {
        data.push_str(&format!(
            "\n---\nEntry #{}\nSource: {}\nCore Statement (Kernaussage): {}\nCategories: {}\n---",
            entry.id,
            entry.source_reference,
            entry.kernaussage.as_deref().unwrap_or(""),
            entry.zugeordnete_kategorien.as_deref().unwrap_or(""),
        ));
    }
    let prompt = format!(
        "**AUFGABE**\n\
         Verdichte die folgenden Kernaussagen eines Protokolls zu übergreifenden Themen. \
         Schreibe eine knappe Gesamtzusammenfassung und nenne die {top_n} wichtigsten, \
         nicht offensichtlichen Erkenntnisse.\n\n\
         **DATEN**{data}\n\n\
         **REGELN**\n\
         1. `summary`: kurze, sachliche Zusammenfassung der Hauptthemen auf Deutsch.\n\
         2. `insights`: genau {top_n} Einträge mit `title` und `description`.\n\
         3. `references`: die stützenden Eintragsnummern, z. B. \"#1, #5, #12\".\n\
         4. Antworte ausschließlich mit dem JSON-Objekt."
    );
    let schema = json!({
        "type": "OBJECT",
        "properties": {
            "summary": { "type": "STRING" },
            "insights": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "title": { "type": "STRING" },
                        "description": { "type": "STRING" },
                        "references": { "type": "STRING" },
                    },
                    "required": ["title", "description", "references"],
                },
            },
        },
        "required": ["summary", "insights"],
    });
    request(None, prompt, schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, category: &str, subs: Vec<CorpusItem>) -> CorpusItem {
        CorpusItem {
            id: id.into(),
            category: category.into(),
            description: "d".into(),
            sub_items: subs,
        }
    }

    #[test]
    fn corpus_outline_is_indented() {
        let corpus = vec![item("1", "Finanzen", vec![item("1 (a)", "Steuern", vec![])])];
        assert_eq!(
            format_corpus(&corpus),
            "1: Finanzen - d\n  1 (a): Steuern - d\n"
        );
    }

    #[test]
    fn structure_request_embeds_protocol_and_schema() {
        let body = structure_chunk("Vors.: Guten Morgen.", "20");
        let text = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(text.contains("WP20/<Seitenzahl>"));
        assert!(text.contains("Vors.: Guten Morgen."));
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "ARRAY");
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn analysis_request_carries_catalogue_as_system_instruction() {
        let entry = ParsedEntry::exchange(7, "WP20/2", None, Some("Q".into()), None, None);
        let body = analyze_entries(&[entry], &[item("3", "Cum-Ex", vec![])]);
        let system = body["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(system.contains("3: Cum-Ex - d"));
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("Entry ID: 7\nQuestioner: N/A\nQuestion: Q"));
    }
}
