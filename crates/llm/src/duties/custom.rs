use rusty_dialogue_common::Result;

use crate::manager::{DutyCall, LlmManager};
use crate::provider::{CompletionResult, DutyKind};

/// Free-form duty; the session is recreated whenever the system prompt changes.
pub(crate) async fn execute(manager: &LlmManager, input: &str, system_prompt: &str) -> Result<CompletionResult> {
    manager
        .call(DutyCall::new(DutyKind::Custom, system_prompt, input))
        .await
}
