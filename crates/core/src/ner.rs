//! Entity extraction for one turn.
//!
//! Sources are merged in order: the scoring service, the action's declared
//! enum and regex entities, the built-in duration and number extractors, then
//! the custom NER duty when the action declares an LLM schema. A failing
//! source is logged and contributes nothing.

use crate::classifier::IntentClassifier;
use regex::Regex;
use rusty_dialogue_common::{word_count, ActionConfig, ActionEntity, NerEntity};
use rusty_dialogue_llm::{Duty, LlmManager};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

fn duration_pattern() -> &'static Regex {
    static DURATION: OnceLock<Regex> = OnceLock::new();
    DURATION.get_or_init(|| {
        Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*(seconds?|secs?|minutes?|mins?|hours?|hrs?)\b")
            .unwrap_or_else(|e| unreachable!("static regex: {}", e))
    })
}

fn number_pattern() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| {
        Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap_or_else(|e| unreachable!("static regex: {}", e))
    })
}

pub struct EntityExtractor {
    classifier: Arc<dyn IntentClassifier>,
    llm: Arc<LlmManager>,
    guard_words: usize,
}

impl EntityExtractor {
    pub fn new(classifier: Arc<dyn IntentClassifier>, llm: Arc<LlmManager>, guard_words: usize) -> Self {
        Self {
            classifier,
            llm,
            guard_words,
        }
    }

    pub async fn extract(&self, lang: &str, utterance: &str, action: Option<&ActionConfig>) -> Vec<NerEntity> {
        let mut entities = Vec::new();

        if word_count(utterance) <= self.guard_words {
            match self.classifier.extract_entities(lang, utterance).await {
                Ok(found) => entities.extend(found),
                Err(e) => warn!("Entity service failed: {}", e),
            }
        } else {
            debug!("Utterance too long for the entity service, skipping it");
        }

        if let Some(action) = action {
            entities.extend(action_entities(action, utterance));
        }

        entities.extend(builtin_entities(utterance, &entities));

        if let Some(schema) = action.and_then(llm_schema) {
            if self.llm.is_enabled() {
                entities.extend(self.llm_entities(utterance, schema.clone()).await);
            }
        }

        debug!("Extracted {} entities", entities.len());
        entities
    }

    async fn llm_entities(&self, utterance: &str, schema: serde_json::Value) -> Vec<NerEntity> {
        let duty = Duty::CustomNer {
            input: utterance.to_string(),
            schema,
        };

        let result = match self.llm.execute(duty).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Custom NER duty failed: {}", e);
                return Vec::new();
            }
        };

        let Some(serde_json::Value::Object(fields)) = result.output.as_json() else {
            return Vec::new();
        };

        fields
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| {
                let source_text = match value {
                    serde_json::Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                NerEntity::new(name.clone(), "llm", source_text, utterance, value.clone())
            })
            .collect()
    }
}

fn llm_schema(action: &ActionConfig) -> Option<&serde_json::Value> {
    action.entities.iter().find_map(|entity| match entity {
        ActionEntity::Llm { schema } => Some(schema),
        _ => None,
    })
}

/// Enum synonyms and regex entities declared by the action.
pub fn action_entities(action: &ActionConfig, utterance: &str) -> Vec<NerEntity> {
    let lowered = utterance.to_lowercase();
    let mut entities = Vec::new();

    for declared in &action.entities {
        match declared {
            ActionEntity::Enum { name, options } => {
                for (option, values) in options {
                    let matched = values
                        .synonyms
                        .iter()
                        .filter(|synonym| contains_word(&lowered, &synonym.to_lowercase()))
                        .max_by_key(|synonym| synonym.len());
                    if let Some(synonym) = matched {
                        entities.push(
                            NerEntity::new(
                                name.clone(),
                                "enum",
                                synonym.clone(),
                                utterance,
                                serde_json::json!({ "value": option }),
                            )
                            .with_option(option.clone()),
                        );
                    }
                }
            }
            ActionEntity::Regex { name, regex } => match Regex::new(regex) {
                Ok(pattern) => {
                    for found in pattern.find_iter(utterance) {
                        entities.push(NerEntity::new(
                            name.clone(),
                            "regex",
                            found.as_str(),
                            utterance,
                            serde_json::json!({ "value": found.as_str() }),
                        ));
                    }
                }
                Err(e) => warn!("Invalid regex entity {}: {}", name, e),
            },
            ActionEntity::Llm { .. } => {}
        }
    }

    entities
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Durations and plain numbers. Numbers already covered by a duration or an
/// existing entity are not reported twice.
pub fn builtin_entities(utterance: &str, existing: &[NerEntity]) -> Vec<NerEntity> {
    let mut entities = Vec::new();
    let mut covered: Vec<(usize, usize)> = existing
        .iter()
        .filter(|entity| entity.entity_type == "duration" || entity.entity_type == "number")
        .map(|entity| (entity.start, entity.end + 1))
        .collect();

    for captures in duration_pattern().captures_iter(utterance) {
        let (Some(whole), Some(amount), Some(unit)) = (captures.get(0), captures.get(1), captures.get(2)) else {
            continue;
        };
        if covered.iter().any(|(start, end)| whole.start() < *end && whole.end() > *start) {
            continue;
        }
        let Ok(value) = amount.as_str().parse::<f64>() else {
            continue;
        };
        let (unit, factor) = normalize_unit(unit.as_str());

        let mut entity = NerEntity::new(
            "duration",
            "duration",
            whole.as_str(),
            utterance,
            serde_json::json!({
                "values": [{ "value": value, "unit": unit }],
                "seconds": (value * factor).round() as i64,
            }),
        );
        entity.start = whole.start();
        entity.end = whole.end().saturating_sub(1);
        covered.push((whole.start(), whole.end()));
        entities.push(entity);
    }

    for found in number_pattern().find_iter(utterance) {
        if covered.iter().any(|(start, end)| found.start() < *end && found.end() > *start) {
            continue;
        }
        let Ok(value) = found.as_str().parse::<f64>() else {
            continue;
        };
        let mut entity = NerEntity::new(
            "number",
            "number",
            found.as_str(),
            utterance,
            serde_json::json!({ "value": value }),
        );
        entity.start = found.start();
        entity.end = found.end().saturating_sub(1);
        entities.push(entity);
    }

    entities
}

fn normalize_unit(unit: &str) -> (&'static str, f64) {
    let unit = unit.to_lowercase();
    if unit.starts_with('h') {
        ("hour", 3_600.0)
    } else if unit.starts_with('m') {
        ("minute", 60.0)
    } else {
        ("second", 1.0)
    }
}
