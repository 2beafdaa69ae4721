use async_trait::async_trait;
use rusty_dialogue_common::{AssistantError, NerEntity, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Label the scoring service returns when nothing matches.
pub const NO_INTENT: &str = "None";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredIntent {
    pub domain: String,
    /// `skill.action`
    pub intent: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    pub locale: String,
    pub domain: String,
    /// `skill.action`, or [`NO_INTENT`].
    pub intent: String,
    pub score: f32,
    #[serde(default)]
    pub sentiment: Option<serde_json::Value>,
    #[serde(default)]
    pub classifications: Vec<ScoredIntent>,
}

impl ClassifierOutput {
    pub fn is_match(&self) -> bool {
        self.intent != NO_INTENT && !self.intent.is_empty() && !self.domain.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntitySpan {
    start: usize,
    end: usize,
    source_text: String,
    entity: String,
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default)]
    resolution: serde_json::Value,
}

/// External intent and entity scoring.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, utterance: &str) -> Result<ClassifierOutput>;

    async fn extract_entities(&self, lang: &str, utterance: &str) -> Result<Vec<NerEntity>>;
}

/// Scoring service reached over HTTP (`POST /classify`, `POST /entities`).
pub struct HttpClassifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClassifier {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AssistantError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Classification(format!("Classifier unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(AssistantError::Classification(format!(
                "Classifier returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AssistantError::Classification(format!("Invalid classifier response: {}", e)))
    }
}

#[async_trait]
impl IntentClassifier for HttpClassifier {
    async fn classify(&self, utterance: &str) -> Result<ClassifierOutput> {
        let output: ClassifierOutput = self
            .post("/classify", serde_json::json!({ "utterance": utterance }))
            .await?;
        debug!("Classified as {}.{} ({})", output.domain, output.intent, output.score);
        Ok(output)
    }

    async fn extract_entities(&self, lang: &str, utterance: &str) -> Result<Vec<NerEntity>> {
        let spans: Vec<EntitySpan> = self
            .post("/entities", serde_json::json!({ "lang": lang, "utterance": utterance }))
            .await?;

        Ok(spans
            .into_iter()
            .map(|span| {
                let utterance_text = utterance
                    .get(span.start..=span.end)
                    .unwrap_or(&span.source_text)
                    .to_string();
                NerEntity {
                    start: span.start,
                    end: span.end,
                    len: span.end.saturating_sub(span.start) + 1,
                    entity: span.entity,
                    entity_type: span.entity_type,
                    source_text: span.source_text,
                    utterance_text,
                    option: None,
                    resolution: span.resolution,
                }
            })
            .collect())
    }
}

/// Stand-in when no scoring service is configured: every utterance is
/// unmatched, so fallbacks and LLM action recognition take over.
pub struct NullClassifier {
    lang: String,
}

impl NullClassifier {
    pub fn new(lang: impl Into<String>) -> Self {
        Self { lang: lang.into() }
    }
}

#[async_trait]
impl IntentClassifier for NullClassifier {
    async fn classify(&self, _utterance: &str) -> Result<ClassifierOutput> {
        Ok(ClassifierOutput {
            locale: self.lang.clone(),
            domain: String::new(),
            intent: NO_INTENT.to_string(),
            score: 0.0,
            sentiment: None,
            classifications: Vec::new(),
        })
    }

    async fn extract_entities(&self, _lang: &str, _utterance: &str) -> Result<Vec<NerEntity>> {
        Ok(Vec::new())
    }
}
