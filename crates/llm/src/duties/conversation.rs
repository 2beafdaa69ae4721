use rusty_dialogue_common::{Result, Speaker};
use tracing::warn;

use crate::manager::{DutyCall, LlmManager};
use crate::provider::{CompletionResult, DutyKind};

pub const TEMPERATURE: f32 = 1.3;

/// Chit-chat on a dedicated context. History comes from the loop log (reset
/// on restart) or from the main conversation log.
pub(crate) async fn execute(manager: &LlmManager, input: &str, use_loop_history: bool) -> Result<CompletionResult> {
    let system_prompt = manager.persona().conversation_system_prompt();
    let history_log = if use_loop_history {
        manager.loop_conversation_log()
    } else {
        manager.conversation_log()
    };

    let result = manager
        .call(
            DutyCall::new(DutyKind::Conversation, system_prompt, input)
                .with_temperature(TEMPERATURE)
                .with_history(history_log, None)
                .streaming(true),
        )
        .await;

    let loop_log = manager.loop_conversation_log();
    if let Err(e) = loop_log.push(Speaker::Owner, input).await {
        warn!("Failed to log owner message: {}", e);
    }
    if let Ok(completion) = &result {
        let answer = completion.output.as_text().unwrap_or_default();
        if let Err(e) = loop_log.push(Speaker::Assistant, answer).await {
            warn!("Failed to log assistant message: {}", e);
        }
    }

    result
}
