use rusty_dialogue_common::Result;

use crate::manager::{DutyCall, LlmManager};
use crate::provider::{CompletionResult, DutyKind};

pub const SYSTEM_PROMPT: &str = "You are an AI system that extracts entities (Named-Entity Recognition) from a given utterance. E.g. shopping list name = \"shopping\".";

pub fn prompt(input: &str) -> String {
    format!("UTTERANCE TO PARSE:\n\"{}\"", input)
}

pub(crate) async fn execute(manager: &LlmManager, input: &str, schema: serde_json::Value) -> Result<CompletionResult> {
    manager
        .call(DutyCall::new(DutyKind::CustomNer, SYSTEM_PROMPT, prompt(input)).with_schema(schema))
        .await
}
