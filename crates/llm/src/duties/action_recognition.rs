use rusty_dialogue_common::Result;

use crate::manager::{DutyCall, LlmManager};
use crate::provider::{CompletionOutput, CompletionResult, DutyKind};

pub const JSON_KEY_RESPONSE: &str = "intent_name";
pub const NOT_FOUND: &str = "not_found";
pub const HISTORY_SIZE: usize = 8;

pub fn system_prompt(actions_classifier_content: &str) -> String {
    format!(
        "INTENT MATCHING PROMPT:
You are tasked with matching user utterances to their corresponding intents. Your goal is to identify the most probable intent from a given utterance, considering the context of the conversation when necessary.
Once you have identified the intent, you must check again according to the sample whether the intent is correct or not.
It is better to not match any intent than to match the wrong intent.
INTENT FORMAT:
The intent format is \"{{domain}}.{{skill}}.{{action}}\", for example, \"food_drink.advisor.suggest\".
The intent format should always contain the domain, skill, and action.
INTENT LIST:
The valid intents are listed below. You must only respond with one of the intents from this list. Do not generate new intents.
{}
RESPONSE GUIDELINES:
* If the utterance matches one of the intents, respond with the corresponding intent in the format \"{{domain}}.{{skill}}.{{action}}\".
* If the utterance does not match any of the intents, respond with {{ \"{}\": \"{}\" }}. Do not make up new intents by yourself.",
        actions_classifier_content, JSON_KEY_RESPONSE, NOT_FOUND
    )
}

pub fn prompt(input: &str, existing_context_name: Option<&str>) -> String {
    match existing_context_name {
        Some(name) => format!("Utterance: \"{}\"\nPrevious intent context: \"{}\"", input, name),
        None => format!("Utterance: \"{}\"\nPrevious intent context: no context provided.", input),
    }
}

/// Lowercases the label and strips whitespace.
pub fn normalize_output(result: &mut CompletionResult) {
    if let CompletionOutput::Json(value) = &mut result.output {
        if let Some(intent) = value.get(JSON_KEY_RESPONSE).and_then(|v| v.as_str()) {
            let normalized: String = intent
                .to_lowercase()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            value[JSON_KEY_RESPONSE] = serde_json::Value::String(normalized);
        }
    }
}

pub fn recognized_intent(result: &CompletionResult) -> Option<&str> {
    result
        .output
        .as_json()
        .and_then(|value| value.get(JSON_KEY_RESPONSE))
        .and_then(|value| value.as_str())
}

pub(crate) async fn execute(
    manager: &LlmManager,
    input: &str,
    existing_context_name: Option<&str>,
) -> Result<CompletionResult> {
    let content = manager.actions_classifier_content().unwrap_or_default();
    let call = DutyCall::new(
        DutyKind::ActionRecognition,
        system_prompt(&content),
        prompt(input, existing_context_name),
    )
    .with_schema(serde_json::json!({ JSON_KEY_RESPONSE: { "type": "string" } }))
    .with_history(manager.conversation_log(), Some(HISTORY_SIZE));

    let mut result = manager.call(call).await?;
    normalize_output(&mut result);
    Ok(result)
}
