pub mod action_recognition;
pub mod conversation;
pub mod custom;
pub mod custom_ner;
pub mod paraphrase;

use crate::provider::DutyKind;

/// One variant per LLM duty.
#[derive(Debug, Clone, PartialEq)]
pub enum Duty {
    CustomNer {
        input: String,
        schema: serde_json::Value,
    },
    ActionRecognition {
        input: String,
        existing_context_name: Option<String>,
    },
    Paraphrase {
        input: String,
    },
    Conversation {
        input: String,
        use_loop_history: bool,
    },
    Custom {
        input: String,
        system_prompt: String,
    },
}

impl Duty {
    pub fn kind(&self) -> DutyKind {
        match self {
            Duty::CustomNer { .. } => DutyKind::CustomNer,
            Duty::ActionRecognition { .. } => DutyKind::ActionRecognition,
            Duty::Paraphrase { .. } => DutyKind::Paraphrase,
            Duty::Conversation { .. } => DutyKind::Conversation,
            Duty::Custom { .. } => DutyKind::Custom,
        }
    }

    pub fn input(&self) -> &str {
        match self {
            Duty::CustomNer { input, .. }
            | Duty::ActionRecognition { input, .. }
            | Duty::Paraphrase { input }
            | Duty::Conversation { input, .. }
            | Duty::Custom { input, .. } => input,
        }
    }
}
