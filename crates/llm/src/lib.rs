pub mod chat;
pub mod duties;
pub mod engine;
pub mod local;
pub mod manager;
pub mod persona;
pub mod provider;
pub mod remote;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use duties::Duty;
pub use engine::{ChatServerEngine, ContextId, InferenceEngine, SessionHandle};
pub use manager::LlmManager;
pub use persona::{Mood, Persona, PersonaSettings};
pub use provider::{
    clean_up_result, heal_json, ChatHistoryItem, CompletionBackend, CompletionOptions,
    CompletionOutput, CompletionProvider, CompletionResult, DutyKind, RawCompletion,
};
pub use session::DutySessionManager;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: LlmProviderKind,
    pub nlg_enabled: bool,
    pub action_recognition_enabled: bool,
    pub warm_up: bool,
    /// OpenAI-compatible endpoint: a local inference server or a hosted API.
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub context_size: u32,
    pub core_sequences: usize,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub actions_classifier_path: Option<PathBuf>,
    pub mood_refresh_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: LlmProviderKind::Local,
            nlg_enabled: true,
            action_recognition_enabled: true,
            warm_up: true,
            base_url: "http://127.0.0.1:8080/v1".to_string(),
            api_key: None,
            model: "llama-3.1-8b-instruct".to_string(),
            context_size: 8_192,
            core_sequences: DutyKind::CORE.len(),
            timeout_ms: provider::DEFAULT_TIMEOUT.as_millis() as u64,
            max_retries: provider::DEFAULT_MAX_RETRIES,
            max_tokens: provider::DEFAULT_MAX_TOKENS,
            actions_classifier_path: None,
            mood_refresh_secs: 3_600,
        }
    }
}
