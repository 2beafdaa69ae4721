use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::NerEntity;

/// Runtime a skill executable is launched through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillBridge {
    Python,
    Nodejs,
    Native,
}

impl SkillBridge {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillBridge::Python => "python",
            SkillBridge::Nodejs => "nodejs",
            SkillBridge::Native => "native",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainManifest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    pub bridge: SkillBridge,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Executable for the native bridge, relative to the skill directory.
    #[serde(default)]
    pub entrypoint: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    #[default]
    Logic,
    Dialog,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default)]
    pub expected_item: Option<ExpectedItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub name: String,
    pub item: ExpectedItem,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumOption {
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// Extra fields usable from dialog templates as `{{ entity.key }}`.
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

/// Entities an action declares on top of the classifier's own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionEntity {
    Enum {
        name: String,
        options: BTreeMap<String, EnumOption>,
    },
    Regex {
        name: String,
        regex: String,
    },
    Llm {
        schema: serde_json::Value,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(rename = "type", default)]
    pub action_type: ActionType,
    #[serde(rename = "loop", default)]
    pub loop_config: Option<LoopConfig>,
    #[serde(default)]
    pub next_action: Option<String>,
    #[serde(default)]
    pub slots: Vec<SlotConfig>,
    #[serde(default)]
    pub entities: Vec<ActionEntity>,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub unknown_answers: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub utterance_samples: Vec<String>,
    #[serde(default)]
    pub disable_llm_nlg: bool,
}

impl ActionConfig {
    pub fn has_loop(&self) -> bool {
        self.loop_config.is_some()
    }

    pub fn has_slots(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn is_dialog(&self) -> bool {
        self.action_type == ActionType::Dialog
    }

    pub fn enum_option(&self, entity: &str, option: &str) -> Option<&EnumOption> {
        self.entities.iter().find_map(|declared| match declared {
            ActionEntity::Enum { name, options } if name == entity => options.get(option),
            _ => None,
        })
    }
}

/// Per-language configuration of one skill.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillConfig {
    #[serde(default)]
    pub actions: BTreeMap<String, ActionConfig>,
    #[serde(default)]
    pub answers: BTreeMap<String, Vec<String>>,
}

// Request handed to a skill process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraContextData {
    pub lang: String,
    pub sentiment: Option<serde_json::Value>,
    pub date: String,
    pub time: String,
    pub timestamp: i64,
    pub date_time: String,
    pub week_day: String,
}

impl ExtraContextData {
    pub fn now(lang: &str, sentiment: Option<serde_json::Value>) -> Self {
        let now = chrono::Local::now();
        Self {
            lang: lang.to_string(),
            sentiment,
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            timestamp: now.timestamp_millis(),
            date_time: now.to_rfc3339(),
            week_day: now.format("%A").to_string().to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillExecutionRequest {
    pub id: String,
    pub lang: String,
    pub domain: String,
    pub skill: String,
    pub action: String,
    pub utterance: String,
    pub new_utterance: String,
    pub current_entities: Vec<NerEntity>,
    pub entities: Vec<NerEntity>,
    pub slots: BTreeMap<String, NerEntity>,
    pub extra_context_data: ExtraContextData,
}

// What a skill process writes back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Speech { text: String, speech: String },
    Text(String),
}

impl Answer {
    pub fn text(&self) -> &str {
        match self {
            Answer::Text(text) => text,
            Answer::Speech { text, .. } => text,
        }
    }

    pub fn speech(&self) -> &str {
        match self {
            Answer::Text(text) => text,
            Answer::Speech { speech, .. } => speech,
        }
    }
}

impl From<String> for Answer {
    fn from(text: String) -> Self {
        Answer::Text(text)
    }
}

impl From<&str> for Answer {
    fn from(text: &str) -> Self {
        Answer::Text(text.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillCoreData {
    #[serde(default)]
    pub restart: Option<bool>,
    #[serde(default)]
    pub is_in_action_loop: Option<bool>,
    #[serde(default)]
    pub show_next_action_suggestions: Option<bool>,
    #[serde(default)]
    pub show_suggestions: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillOutput {
    #[serde(default)]
    pub answer: Option<Answer>,
    #[serde(default)]
    pub widget: Option<serde_json::Value>,
    #[serde(default)]
    pub core: Option<SkillCoreData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillOutputEnvelope {
    pub output: SkillOutput,
}
