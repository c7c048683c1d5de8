//! Prompt templates, one per query type

use crate::query::{ParsedQuery, QueryType};
use crate::synthesizer::SynthesisContext;
use integrity_common::llm::{Prompt, PromptPassage, PromptTask};
use integrity_common::models::ExtractedEntities;
use integrity_common::text::normalize_phrase;
use std::collections::HashSet;
use std::fmt::Write;

const MAX_HINTS: usize = 12;

const SYSTEM_BASE: &str = "You are an integrity due-diligence assistant. Answer only from the numbered passages \
you are given. End every sentence with the marker of the passage that supports it, for example [1] or [1][2]. \
Never cite a passage number that is not listed. Do not add facts, names or dates that are not in the passages. \
When the passages only partly answer the question, answer the supported part and say which part is not covered.";

const STRICT_SUFFIX: &str = "Your previous answer contained sentences without a valid passage marker. Rewrite it. \
Every sentence must end with at least one marker from the listed passages. Leave out any statement no passage supports.";

/// Task-specific instructions appended to the system prompt
pub fn instructions(query_type: QueryType) -> &'static str {
    match query_type {
        QueryType::PartyLookup => {
            "Describe the party: who they are, which assessments or documents cover them and what those documents record."
        }
        QueryType::PriorAssessment => {
            "State whether the party was assessed or screened before, when and by whom, and what each assessment concluded. \
Start with the most recent assessment."
        }
        QueryType::ConcernExtraction => {
            "List every concern or red flag the passages record for the party, one per sentence, with its source. \
Also report documents that recorded no concerns. Start with the most recent document."
        }
        QueryType::RiskRating => {
            "Report the risk rating or risk level given to the party, the document that assigned it and its date. \
If ratings differ between documents, give each one."
        }
        QueryType::RoleIdentification => {
            "Identify the role each named party plays (for example supplier, director or beneficial owner) as stated in the passages."
        }
        QueryType::MitigatingFactors => {
            "List the mitigating factors or remediation steps recorded against the concerns, and which concern each one addresses."
        }
        QueryType::DocumentTypeLookup => {
            "Say what type of document each relevant passage comes from, such as an integrity due diligence report or a questionnaire."
        }
        QueryType::CrossDocumentSearch => {
            "Go through every document that mentions the party and summarize what each one says, one document at a time."
        }
        QueryType::Timeline => {
            "Give a chronological account of the events and assessments in the passages, oldest first, with dates."
        }
        QueryType::General => "Answer the question directly and concisely.",
    }
}

/// Entity values worth steering the answer towards
pub fn hints(query: &ParsedQuery, context: &SynthesisContext) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    if let Some(subject) = &query.subject {
        values.push(subject.clone());
    }

    for entities in &context.entities {
        values.extend(hint_values(query.query_type, entities));
    }

    let mut seen = HashSet::new();
    values.retain(|v| seen.insert(normalize_phrase(v)));
    values.truncate(MAX_HINTS);
    values
}

fn hint_values(query_type: QueryType, entities: &ExtractedEntities) -> Vec<String> {
    let concerns = || entities.concerns.iter().map(|c| c.value.tag.clone()).collect::<Vec<_>>();
    let parties = || entities.parties.iter().map(|p| p.value.clone()).collect::<Vec<_>>();

    match query_type {
        QueryType::PriorAssessment | QueryType::ConcernExtraction => concerns(),
        QueryType::RiskRating => entities.risk_rating.iter().map(|r| format!("{} risk", r.value)).collect(),
        QueryType::RoleIdentification => entities
            .roles
            .iter()
            .map(|r| format!("{} ({})", r.value.name, r.value.role))
            .collect(),
        QueryType::MitigatingFactors => entities.mitigating_factors.iter().map(|m| m.value.clone()).collect(),
        QueryType::DocumentTypeLookup => entities.document_type.iter().map(|d| d.value.clone()).collect(),
        QueryType::PartyLookup | QueryType::CrossDocumentSearch => parties(),
        QueryType::Timeline => Vec::new(),
        QueryType::General => {
            let mut all = parties();
            all.extend(concerns());
            all
        }
    }
}

/// Render the answer prompt
pub fn answer_prompt(
    query: &ParsedQuery,
    context: &SynthesisContext,
    hints: &[String],
    strict: bool,
    max_tokens: usize,
    temperature: f32,
) -> Prompt {
    let mut system = format!("{}\n\n{}", SYSTEM_BASE, instructions(query.query_type));
    if strict {
        system.push_str("\n\n");
        system.push_str(STRICT_SUFFIX);
    }

    let mut user = String::new();
    let _ = writeln!(user, "Question: {}", query.original);
    if let Some(subject) = &query.subject {
        let _ = writeln!(user, "Subject: {}", subject);
    }
    if !hints.is_empty() {
        user.push_str("\nKnown entities:\n");
        for hint in hints {
            let _ = writeln!(user, "- {}", hint);
        }
    }
    user.push_str("\nPassages:\n");
    for cp in &context.passages {
        let p = &cp.passage;
        let _ = writeln!(
            user,
            "[{}] {} ({}, modified {}, {})\n{}\n",
            cp.index,
            p.title,
            p.version,
            p.modified_at.format("%Y-%m-%d"),
            p.location,
            p.text
        );
    }
    user.push_str("Answer:");

    Prompt {
        task: PromptTask::Answer,
        system,
        user,
        question: query.original.clone(),
        passages: context
            .passages
            .iter()
            .map(|cp| PromptPassage {
                index: cp.index,
                title: cp.passage.title.clone(),
                text: cp.passage.text.clone(),
            })
            .collect(),
        hints: hints.to_vec(),
        max_tokens,
        temperature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::{ContextPassage, Passage};
    use integrity_common::models::{ConcernTag, DocumentId, Extracted, Location, Provenance, Version};

    fn context() -> SynthesisContext {
        let doc = DocumentId::new("index", "a");
        let mut entities = ExtractedEntities::empty(doc.clone(), Version(2));
        entities.concerns.push(Extracted {
            value: ConcernTag { tag: "sanctions".into(), adverse: true },
            provenance: Provenance { document: doc.clone(), version: Version(2), start: 0, end: 9, page: None },
        });
        SynthesisContext {
            passages: vec![ContextPassage {
                index: 1,
                passage: Passage {
                    document: doc,
                    version: Version(2),
                    title: "Acme IDD.txt".into(),
                    modified_at: chrono::Utc::now(),
                    location: Location { start: 0, end: 30, page: Some(1) },
                    text: "sanctions exposure at Acme Corp".into(),
                    score: 1.0,
                },
            }],
            entities: vec![entities],
            ..Default::default()
        }
    }

    #[test]
    fn test_every_type_has_instructions() {
        let distinct: HashSet<&str> = QueryType::ALL.iter().map(|t| instructions(*t)).collect();
        assert_eq!(distinct.len(), QueryType::ALL.len());
    }

    #[test]
    fn test_prompt_lists_passages_and_hints() {
        let query = ParsedQuery::parse("What concerns were raised about Acme Corp?");
        let ctx = context();
        let hints = hints(&query, &ctx);
        assert_eq!(hints, vec!["Acme Corp".to_string(), "sanctions".to_string()]);

        let prompt = answer_prompt(&query, &ctx, &hints, false, 500, 0.0);
        assert!(prompt.user.contains("[1] Acme IDD.txt (v2"));
        assert!(prompt.user.contains("- sanctions"));
        assert!(!prompt.system.contains("previous answer"));
        assert_eq!(prompt.passages.len(), 1);

        let strict = answer_prompt(&query, &ctx, &hints, true, 500, 0.0);
        assert!(strict.system.contains("previous answer"));
    }
}
