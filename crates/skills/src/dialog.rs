use rand::seq::SliceRandom;
use rand::Rng;
use regex::{Captures, Regex};
use rusty_dialogue_common::{ActionConfig, NerEntity, NluResult};
use std::sync::OnceLock;
use tracing::debug;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([\w.]+)\s*\}\}").unwrap_or_else(|e| unreachable!("static regex: {}", e))
    })
}

fn has_placeholder(answer: &str) -> bool {
    placeholder().is_match(answer)
}

/// Answers a dialog action in-process from its templates.
///
/// Templates with placeholders are only picked when the turn carries entities
/// or slots. `{{ name }}` resolves to an entity or slot source text and
/// `{{ name.key }}` to the data of the matched enum option. A template left
/// with an unresolved placeholder falls back to a random unknown answer.
pub fn render_answer<R: Rng>(config: &ActionConfig, nlu: &NluResult, rng: &mut R) -> Option<String> {
    let has_values = !nlu.entities.is_empty() || nlu.slots.iter().any(|slot| slot.is_filled);

    let candidates: Vec<&String> = config
        .answers
        .iter()
        .filter(|answer| has_placeholder(answer) == has_values)
        .collect();
    let answer = match candidates.choose(rng) {
        Some(answer) => (*answer).clone(),
        None => config.answers.choose(rng)?.clone(),
    };

    let mut unresolved = false;
    let rendered = placeholder()
        .replace_all(&answer, |captures: &Captures| {
            let name = &captures[1];
            match resolve(name, config, nlu, rng) {
                Some(value) => value,
                None => {
                    debug!("Unresolved dialog placeholder: {}", name);
                    unresolved = true;
                    captures[0].to_string()
                }
            }
        })
        .into_owned();

    if unresolved {
        return config.unknown_answers.choose(rng).cloned().or(Some(rendered));
    }
    Some(rendered)
}

fn resolve<R: Rng>(name: &str, config: &ActionConfig, nlu: &NluResult, rng: &mut R) -> Option<String> {
    match name.split_once('.') {
        None => find_entity(name, nlu).map(|entity| entity.source_text.clone()),
        Some((entity_name, key)) => {
            let entity = find_entity(entity_name, nlu)?;
            let option = config.enum_option(entity_name, entity.option.as_deref()?)?;
            match option.data.get(key)? {
                serde_json::Value::Array(values) => values.choose(rng).map(value_to_string),
                value => Some(value_to_string(value)),
            }
        }
    }
}

fn find_entity<'a>(name: &str, nlu: &'a NluResult) -> Option<&'a NerEntity> {
    nlu.current_entities
        .iter()
        .chain(nlu.entities.iter())
        .find(|entity| entity.entity == name)
        .or_else(|| {
            nlu.slots
                .iter()
                .find(|slot| slot.name == name)
                .and_then(|slot| slot.value.as_ref())
        })
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
