use async_trait::async_trait;
use rusty_dialogue_common::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::SessionHandle;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(32_000);
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_MAX_TOKENS: u32 = 8_192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DutyKind {
    CustomNer,
    ActionRecognition,
    Paraphrase,
    Conversation,
    Custom,
}

impl DutyKind {
    pub fn name(&self) -> &'static str {
        match self {
            DutyKind::CustomNer => "Custom NER LLM Duty",
            DutyKind::ActionRecognition => "Action Recognition LLM Duty",
            DutyKind::Paraphrase => "Paraphrase LLM Duty",
            DutyKind::Conversation => "Conversation LLM Duty",
            DutyKind::Custom => "Custom LLM Duty",
        }
    }

    /// Short-lived structured duties sharing one inference context.
    pub fn is_core(&self) -> bool {
        matches!(
            self,
            DutyKind::CustomNer | DutyKind::ActionRecognition | DutyKind::Paraphrase
        )
    }

    pub const CORE: [DutyKind; 3] = [
        DutyKind::CustomNer,
        DutyKind::ActionRecognition,
        DutyKind::Paraphrase,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "lowercase")]
pub enum ChatHistoryItem {
    System(String),
    User(String),
    Model(String),
}

pub type TokenSink = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct CompletionOptions {
    pub duty: DutyKind,
    pub system_prompt: String,
    pub session: Option<SessionHandle>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_retries: u32,
    /// JSON schema properties the output must follow.
    pub schema: Option<serde_json::Value>,
    /// Prior turns for backends without server-side sessions.
    pub history: Vec<ChatHistoryItem>,
    pub on_token: Option<TokenSink>,
}

impl CompletionOptions {
    pub fn new(duty: DutyKind, system_prompt: impl Into<String>) -> Self {
        Self {
            duty,
            system_prompt: system_prompt.into(),
            session: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            schema: None,
            history: Vec::new(),
            on_token: None,
        }
    }

    pub fn with_session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_history(mut self, history: Vec<ChatHistoryItem>) -> Self {
        self.history = history;
        self
    }

    pub fn with_token_sink(mut self, on_token: TokenSink) -> Self {
        self.on_token = Some(on_token);
        self
    }

    pub fn is_json_mode(&self) -> bool {
        self.schema.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCompletion {
    pub text: String,
    pub used_input_tokens: u32,
    pub used_output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CompletionOutput {
    Text(String),
    Json(serde_json::Value),
}

impl CompletionOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CompletionOutput::Text(text) => Some(text),
            CompletionOutput::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            CompletionOutput::Json(value) => Some(value),
            CompletionOutput::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    pub duty_type: DutyKind,
    pub system_prompt: String,
    pub input: String,
    pub output: CompletionOutput,
    pub data: Option<serde_json::Value>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub used_input_tokens: u32,
    pub used_output_tokens: u32,
    #[serde(skip)]
    pub attempts: u32,
}

/// One inference call against a local or remote backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<RawCompletion>;
}

pub struct CompletionProvider {
    backend: Arc<dyn CompletionBackend>,
}

enum AttemptFailure {
    Timeout,
    Transport(String),
}

impl CompletionProvider {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        info!("Completion provider ready with backend: {}", backend.name());
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Races the backend against `options.timeout`. Timeouts and transport
    /// errors are retried `options.max_retries` times with the same session.
    #[instrument(skip(self, prompt, options), fields(duty = options.duty.name()))]
    pub async fn prompt(&self, prompt: &str, options: CompletionOptions) -> Result<CompletionResult> {
        let max_attempts = options.max_retries + 1;
        let mut last_failure = AttemptFailure::Timeout;

        for attempt in 1..=max_attempts {
            debug!("Attempt {}/{}", attempt, max_attempts);

            match tokio::time::timeout(options.timeout, self.backend.complete(prompt, &options)).await {
                Ok(Ok(raw)) => return finalize(prompt, &options, raw, attempt),
                Ok(Err(AssistantError::Transport(message))) => {
                    warn!("Transport error on attempt {}: {}", attempt, message);
                    last_failure = AttemptFailure::Transport(message);
                }
                Ok(Err(e)) => {
                    error!("Completion failed: {}", e);
                    return Err(e);
                }
                Err(_) => {
                    warn!("Attempt {} timed out after {:?}", attempt, options.timeout);
                    last_failure = AttemptFailure::Timeout;
                }
            }
        }

        error!(
            "Prompt failed after {} retries. Prompt: {}",
            options.max_retries, prompt
        );

        Err(match last_failure {
            AttemptFailure::Timeout => AssistantError::CompletionTimeout {
                duty: options.duty.name().to_string(),
                attempts: max_attempts,
            },
            AttemptFailure::Transport(message) => AssistantError::Transport(format!(
                "{} (gave up after {} attempts)",
                message, max_attempts
            )),
        })
    }
}

fn finalize(
    prompt: &str,
    options: &CompletionOptions,
    raw: RawCompletion,
    attempts: u32,
) -> Result<CompletionResult> {
    let cleaned = clean_up_result(&raw.text);

    let output = if options.is_json_mode() {
        let healed = heal_json(&cleaned);
        let value = serde_json::from_str(&healed).map_err(|e| {
            error!("Malformed JSON output for {}: {} ({})", options.duty.name(), healed, e);
            AssistantError::MalformedOutput(format!("{}: {}", e, healed))
        })?;
        CompletionOutput::Json(value)
    } else {
        CompletionOutput::Text(cleaned)
    };

    Ok(CompletionResult {
        duty_type: options.duty,
        system_prompt: options.system_prompt.clone(),
        input: prompt.to_string(),
        output,
        data: options.schema.clone(),
        max_tokens: options.max_tokens,
        temperature: options.temperature,
        used_input_tokens: raw.used_input_tokens,
        used_output_tokens: raw.used_output_tokens,
        attempts,
    })
}

/// Trims the output and removes one pair of wrapping double quotes.
pub fn clean_up_result(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return trimmed[1..trimmed.len() - 1].to_string();
    }
    trimmed.to_string()
}

/// Appends the closing brace models tend to drop.
pub fn heal_json(raw: &str) -> String {
    let trimmed = raw.trim_end();
    if trimmed.ends_with('}') {
        trimmed.to_string()
    } else {
        format!("{}}}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    enum Script {
        Hang,
        Fail(String),
        Reply(String),
    }

    struct ScriptedBackend {
        calls: AtomicU32,
        script: Mutex<Vec<Script>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(script),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> Result<RawCompletion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.remove(0)
                } else {
                    match &script[0] {
                        Script::Hang => Script::Hang,
                        Script::Fail(message) => Script::Fail(message.clone()),
                        Script::Reply(text) => Script::Reply(text.clone()),
                    }
                }
            };

            match step {
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!("the provider timeout fires first")
                }
                Script::Fail(message) => Err(AssistantError::Transport(message)),
                Script::Reply(text) => Ok(RawCompletion {
                    text,
                    used_input_tokens: 10,
                    used_output_tokens: 5,
                }),
            }
        }
    }

    fn options() -> CompletionOptions {
        CompletionOptions::new(DutyKind::Paraphrase, "system").with_timeout(Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_timing_out_gives_up_after_three_attempts() {
        let backend = ScriptedBackend::new(vec![Script::Hang]);
        let provider = CompletionProvider::new(backend.clone());

        let result = provider.prompt("hello", options().with_max_retries(2)).await;

        assert!(matches!(
            result,
            Err(AssistantError::CompletionTimeout { attempts: 3, .. })
        ));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_timeout_and_transport_error() {
        let backend = ScriptedBackend::new(vec![
            Script::Hang,
            Script::Fail("connection reset".to_string()),
            Script::Reply("\"All good\"".to_string()),
        ]);
        let provider = CompletionProvider::new(backend.clone());

        let result = provider.prompt("hello", options()).await.unwrap();

        assert_eq!(result.output, CompletionOutput::Text("All good".to_string()));
        assert_eq!(result.attempts, 3);
        assert_eq!(result.used_input_tokens, 10);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_exhaust_retries() {
        let backend = ScriptedBackend::new(vec![Script::Fail("503".to_string())]);
        let provider = CompletionProvider::new(backend.clone());

        let result = provider.prompt("hello", options().with_max_retries(1)).await;

        assert!(matches!(result, Err(AssistantError::Transport(_))));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_json_output_is_healed() {
        let backend = ScriptedBackend::new(vec![Script::Reply(
            "{\"intent_name\": \"utilities.timer.set_timer\"".to_string(),
        )]);
        let provider = CompletionProvider::new(backend);

        let result = provider
            .prompt(
                "Utterance: \"set a timer\"",
                options().with_schema(serde_json::json!({ "intent_name": { "type": "string" } })),
            )
            .await
            .unwrap();

        let json = result.output.as_json().unwrap();
        assert_eq!(json["intent_name"], "utilities.timer.set_timer");
    }

    #[tokio::test]
    async fn test_malformed_json_is_not_retried() {
        let backend = ScriptedBackend::new(vec![Script::Reply("{\"items\": [1, 2".to_string())]);
        let provider = CompletionProvider::new(backend.clone());

        let result = provider
            .prompt("x", options().with_schema(serde_json::json!({})))
            .await;

        assert!(matches!(result, Err(AssistantError::MalformedOutput(_))));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_backend_failures_other_than_transport_are_final() {
        let mut backend = MockCompletionBackend::new();
        backend.expect_name().return_const("mock");
        backend
            .expect_complete()
            .times(1)
            .returning(|_, _| Err(AssistantError::Configuration("no model loaded".to_string())));
        let provider = CompletionProvider::new(Arc::new(backend));

        let result = provider.prompt("hello", options()).await;

        assert!(matches!(result, Err(AssistantError::Configuration(_))));
    }

    #[test]
    fn test_clean_up_result() {
        assert_eq!(clean_up_result("  \"quoted\" "), "quoted");
        assert_eq!(clean_up_result("\"half"), "\"half");
        assert_eq!(clean_up_result("\""), "\"");
        assert_eq!(clean_up_result("plain"), "plain");
    }
}
