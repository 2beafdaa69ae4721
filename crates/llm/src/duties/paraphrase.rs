use rusty_dialogue_common::Result;

use crate::manager::{DutyCall, LlmManager};
use crate::provider::{CompletionResult, DutyKind};

pub const TEMPERATURE: f32 = 0.8;

pub const DUTY_PROMPT: &str = "You are an AI system that generates answers (Natural Language Generation).
You must provide a text alternative according to your current mood and your personality.
Never indicate that it's a modified version.
Do not interpret the text, just paraphrase it.
You do not ask question if the original text does not contain any.
If there are data in the original text, make sure to provide them.
Examples:
Modify this text: I added your items to the shopping list.
I included the items you mentioned to the shopping list. Happy shopping!
Modify this text: the sun is a star.
The sun is a star, it is the closest star to Earth.";

pub fn prompt(input: &str) -> String {
    format!("Modify the following text but do not say you modified it: {}", input)
}

pub(crate) async fn execute(manager: &LlmManager, input: &str, is_warming_up: bool) -> Result<CompletionResult> {
    let system_prompt = manager.persona().duty_system_prompt(DUTY_PROMPT);
    manager
        .call(
            DutyCall::new(DutyKind::Paraphrase, system_prompt, prompt(input))
                .with_temperature(TEMPERATURE)
                .streaming(!is_warming_up),
        )
        .await
}
