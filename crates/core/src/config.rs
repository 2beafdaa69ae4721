use rusty_dialogue_common::{AssistantError, Result};
use rusty_dialogue_llm::{LlmConfig, PersonaSettings};
use rusty_dialogue_skills::SkillsConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const ENV_PREFIX: &str = "DIALOGUE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub paths: PathsConfig,
    pub nlu: NluConfig,
    pub skills: SkillsConfig,
    pub llm: LlmConfig,
    pub brain: BrainConfig,
    pub persona: PersonaSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub enable_websocket: bool,
    pub api_prefix: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1337,
            cors_origins: vec!["http://localhost:5173".to_string()],
            enable_websocket: true,
            api_prefix: "/api/v1".to_string(),
            request_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub skills_dir: PathBuf,
    /// Transient skill request files.
    pub tmp_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub lang_dir: PathBuf,
    pub memory_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            skills_dir: PathBuf::from("skills"),
            tmp_dir: std::env::temp_dir().join("rusty-dialogue"),
            logs_dir: PathBuf::from("data/logs"),
            lang_dir: PathBuf::from("data/lang"),
            memory_dir: PathBuf::from("data/memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NluConfig {
    pub default_lang: String,
    pub supported_langs: Vec<String>,
    /// Intent/entity scoring service; classification is skipped without it.
    pub classifier_url: Option<String>,
    pub long_utterance_words: usize,
    pub entity_guard_words: usize,
    pub context_rescore_threshold: f32,
    pub conversation_action: String,
    pub conversation_setup_action: String,
    /// Restarted with the new language code appended on a language switch.
    pub language_backend_command: Vec<String>,
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            default_lang: "en".to_string(),
            supported_langs: vec!["en".to_string()],
            classifier_url: None,
            long_utterance_words: 12,
            entity_guard_words: 128,
            context_rescore_threshold: 0.6,
            conversation_action: "social_communication.conversation.converse".to_string(),
            conversation_setup_action: "social_communication.conversation.setup".to_string(),
            language_backend_command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    pub min_words_for_paraphrase: usize,
    pub conversation_log_capacity: usize,
    pub conversation_log_load: usize,
    pub loop_conversation_log_capacity: usize,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            min_words_for_paraphrase: 5,
            conversation_log_capacity: 100,
            conversation_log_load: 8,
            loop_conversation_log_capacity: 50,
        }
    }
}

/// Layers `config/default.toml`, `config/local.toml` and `DIALOGUE__*`
/// environment variables (double underscore for nesting).
pub fn load_settings(config_dir: impl AsRef<Path>) -> Result<Settings> {
    let dir = config_dir.as_ref();
    let settings = config::Config::builder()
        .add_source(config::File::from(dir.join("default.toml")).required(false))
        .add_source(config::File::from(dir.join("local.toml")).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(|built| built.try_deserialize::<Settings>())
        .map_err(|e| AssistantError::Configuration(e.to_string()))?;

    info!("Configuration loaded from {}", dir.display());
    Ok(settings)
}
