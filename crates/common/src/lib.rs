pub mod conversation_log;
pub mod events;
pub mod skill;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use conversation_log::{ConversationLogEntry, ConversationLogger, ConversationLoggerSettings, Speaker};
pub use events::{NullOutputChannel, OutputChannel, OutputEvent, RecordingOutputChannel};
pub use skill::*;

// Utterance and classification types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub lang: String,
}

impl Utterance {
    pub fn new(text: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lang: lang.into(),
        }
    }

    pub fn word_count(&self) -> usize {
        word_count(&self.text)
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub domain: String,
    pub skill: String,
    pub action: String,
    pub confidence: f32,
}

impl Classification {
    pub fn new(
        domain: impl Into<String>,
        skill: impl Into<String>,
        action: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            domain: domain.into(),
            skill: skill.into(),
            action: action.into(),
            confidence,
        }
    }

    /// Parses a `domain.skill.action` label.
    pub fn from_label(label: &str, confidence: f32) -> Option<Self> {
        let mut parts = label.split('.');
        let (domain, skill, action) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || domain.is_empty() || skill.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self::new(domain, skill, action, confidence))
    }

    /// `domain.skill`, the name an active context is tracked under.
    pub fn context_name(&self) -> String {
        format!("{}.{}", self.domain, self.skill)
    }

    /// `skill.action`
    pub fn intent(&self) -> String {
        format!("{}.{}", self.skill, self.action)
    }

    pub fn label(&self) -> String {
        format!("{}.{}.{}", self.domain, self.skill, self.action)
    }

    pub fn is_resolved(&self) -> bool {
        !self.domain.is_empty() && !self.skill.is_empty() && !self.action.is_empty()
    }
}

// Entity types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NerEntity {
    pub start: usize,
    pub end: usize,
    pub len: usize,
    pub entity: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub source_text: String,
    pub utterance_text: String,
    #[serde(default)]
    pub option: Option<String>,
    #[serde(default)]
    pub resolution: serde_json::Value,
}

impl NerEntity {
    pub fn new(
        entity: impl Into<String>,
        entity_type: impl Into<String>,
        source_text: impl Into<String>,
        utterance: &str,
        resolution: serde_json::Value,
    ) -> Self {
        let source_text = source_text.into();
        let lowered = utterance.to_lowercase();
        let start = lowered.find(&source_text.to_lowercase()).unwrap_or(0);
        let len = source_text.chars().count();
        let utterance_text = utterance
            .get(start..start + source_text.len())
            .unwrap_or(source_text.as_str())
            .to_string();

        Self {
            start,
            end: start + len.saturating_sub(1),
            len,
            entity: entity.into(),
            entity_type: entity_type.into(),
            source_text,
            utterance_text,
            option: None,
            resolution,
        }
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.option = Some(option.into());
        self
    }
}

// Slot state carried by an active context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub name: String,
    pub expected_entity: String,
    pub value: Option<NerEntity>,
    pub is_filled: bool,
    pub questions: Vec<String>,
    pub picked_question: String,
    pub suggestions: Vec<String>,
}

impl Slot {
    pub fn fill(&mut self, entity: NerEntity) {
        self.value = Some(entity);
        self.is_filled = true;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NluResult {
    pub utterance: String,
    pub new_utterance: String,
    pub lang: String,
    pub current_entities: Vec<NerEntity>,
    pub entities: Vec<NerEntity>,
    pub slots: Vec<Slot>,
    pub sentiment: Option<serde_json::Value>,
    pub classification: Classification,
    #[serde(skip)]
    pub action_config: Option<ActionConfig>,
}

impl NluResult {
    pub fn new(utterance: &Utterance) -> Self {
        Self {
            utterance: utterance.text.clone(),
            new_utterance: utterance.text.clone(),
            lang: utterance.lang.clone(),
            ..Default::default()
        }
    }

    /// Result used when an action is addressed directly rather than classified.
    pub fn for_action(classification: Classification, lang: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            classification,
            ..Default::default()
        }
    }

    pub fn filled_slot_values(&self) -> std::collections::BTreeMap<String, NerEntity> {
        self.slots
            .iter()
            .filter_map(|slot| slot.value.clone().map(|value| (slot.name.clone(), value)))
            .collect()
    }
}

// Error types
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Language not supported: {0}")]
    LanguageUnsupported(String),

    #[error("Skill process error: {0}")]
    SkillProcess(String),

    #[error("A skill execution is already in flight")]
    SkillBusy,

    #[error("Another turn is still being processed")]
    TurnInProgress,

    #[error("Completion for {duty} timed out after {attempts} attempts")]
    CompletionTimeout { duty: String, attempts: u32 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed output: {0}")]
    MalformedOutput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AssistantError>;

// API response types
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}
