use rand::seq::SliceRandom;
use rusty_dialogue_common::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Ordered rule: fires when every word is present in the utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fallback {
    pub words: Vec<String>,
    pub domain: String,
    pub skill: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LangData {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default)]
    pub action_loop_stop_words: Vec<String>,
    #[serde(default)]
    pub fallbacks: Vec<Fallback>,
    #[serde(default)]
    pub answers: BTreeMap<String, Vec<String>>,
}

fn default_min_confidence() -> f32 {
    0.5
}

impl Default for LangData {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            action_loop_stop_words: Vec::new(),
            fallbacks: Vec::new(),
            answers: BTreeMap::new(),
        }
    }
}

impl LangData {
    /// Random phrase for `key` with `%name%` placeholders substituted.
    pub fn answer(&self, key: &str, data: &[(&str, &str)]) -> String {
        let phrase = self
            .answers
            .get(key)
            .and_then(|phrases| phrases.choose(&mut rand::thread_rng()))
            .cloned()
            .unwrap_or_else(|| {
                warn!("No answer phrase for key {}", key);
                key.to_string()
            });

        data.iter().fold(phrase, |phrase, (name, value)| {
            phrase.replace(&format!("%{}%", name), value)
        })
    }

    /// First fallback whose words all appear in the utterance.
    pub fn match_fallback(&self, utterance: &str) -> Option<&Fallback> {
        let words: Vec<String> = utterance
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|word| !word.is_empty())
            .map(str::to_string)
            .collect();

        self.fallbacks.iter().find(|fallback| {
            !fallback.words.is_empty()
                && fallback
                    .words
                    .iter()
                    .all(|word| words.iter().any(|w| w == &word.to_lowercase()))
        })
    }
}

/// Per-language data read from `<lang_dir>/<lang>.json`.
#[derive(Debug, Clone, Default)]
pub struct LangRegistry {
    langs: HashMap<String, LangData>,
}

impl LangRegistry {
    pub async fn load(dir: impl AsRef<Path>, supported: &[String]) -> Result<Self> {
        let dir = dir.as_ref();
        let mut langs = HashMap::new();

        for lang in supported {
            let path = dir.join(format!("{}.json", lang));
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                AssistantError::Configuration(format!("Missing language data {}: {}", path.display(), e))
            })?;
            let data: LangData = serde_json::from_str(&content)
                .map_err(|e| AssistantError::Configuration(format!("{}: {}", path.display(), e)))?;
            info!("Loaded language data for {}", lang);
            langs.insert(lang.clone(), data);
        }

        Ok(Self { langs })
    }

    pub fn from_data(langs: impl IntoIterator<Item = (String, LangData)>) -> Self {
        Self {
            langs: langs.into_iter().collect(),
        }
    }

    pub fn is_supported(&self, lang: &str) -> bool {
        self.langs.contains_key(lang)
    }

    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.langs.keys().cloned().collect();
        langs.sort();
        langs
    }

    pub fn get(&self, lang: &str) -> Result<&LangData> {
        self.langs
            .get(lang)
            .ok_or_else(|| AssistantError::LanguageUnsupported(lang.to_string()))
    }

    pub fn answer(&self, lang: &str, key: &str, data: &[(&str, &str)]) -> String {
        match self.get(lang) {
            Ok(lang_data) => lang_data.answer(key, data),
            Err(_) => key.to_string(),
        }
    }
}
