use rand::distributions::Alphanumeric;
use rand::Rng;
use rusty_dialogue_common::{
    AssistantError, ConversationLogger, OutputChannel, OutputEvent, Result, Speaker,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chat::ChatClient;
use crate::duties::{self, Duty};
use crate::engine::{ChatServerEngine, InferenceEngine};
use crate::local::LocalBackend;
use crate::persona::Persona;
use crate::provider::{
    ChatHistoryItem, CompletionBackend, CompletionOptions, CompletionProvider, CompletionResult,
    DutyKind,
};
use crate::remote::RemoteBackend;
use crate::session::DutySessionManager;
use crate::{LlmConfig, LlmProviderKind};

const WARM_UP_NER_INPUT: &str = "Add apples, 1L of milk, orange juice and tissues to the shopping list";
const WARM_UP_ACTION_RECOGNITION_INPUT: &str = "Hi there";
const WARM_UP_PARAPHRASE_INPUT: &str = "We have a wonderful planet.";

/// One duty invocation, resolved to a session (local) or an explicit history
/// (remote) by [`LlmManager::call`].
pub(crate) struct DutyCall<'a> {
    kind: DutyKind,
    system_prompt: String,
    prompt: String,
    temperature: Option<f32>,
    schema: Option<serde_json::Value>,
    history: Option<(&'a ConversationLogger, Option<usize>)>,
    stream_tokens: bool,
}

impl<'a> DutyCall<'a> {
    pub(crate) fn new(kind: DutyKind, system_prompt: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            system_prompt: system_prompt.into(),
            prompt: prompt.into(),
            temperature: None,
            schema: None,
            history: None,
            stream_tokens: false,
        }
    }

    pub(crate) fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub(crate) fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub(crate) fn with_history(mut self, logger: &'a ConversationLogger, limit: Option<usize>) -> Self {
        self.history = Some((logger, limit));
        self
    }

    pub(crate) fn streaming(mut self, stream_tokens: bool) -> Self {
        self.stream_tokens = stream_tokens;
        self
    }
}

/// Entry point for every LLM duty.
pub struct LlmManager {
    config: LlmConfig,
    provider: Option<CompletionProvider>,
    sessions: Option<Arc<DutySessionManager>>,
    persona: Arc<Persona>,
    conversation_log: Arc<ConversationLogger>,
    loop_conversation_log: Arc<ConversationLogger>,
    output: Arc<dyn OutputChannel>,
    actions_classifier_content: RwLock<Option<String>>,
    warming_up: AtomicBool,
}

impl LlmManager {
    /// Builds the backend described by `config`. A disabled config yields a
    /// manager that rejects every duty.
    pub fn new(
        config: LlmConfig,
        persona: Arc<Persona>,
        conversation_log: Arc<ConversationLogger>,
        loop_conversation_log: Arc<ConversationLogger>,
        output: Arc<dyn OutputChannel>,
    ) -> Self {
        let client = ChatClient::new(&config.base_url, config.api_key.as_deref(), config.model.clone());

        let (backend, sessions) = match config.provider {
            LlmProviderKind::Local => {
                let engine: Arc<dyn InferenceEngine> =
                    Arc::new(ChatServerEngine::new(client, config.context_size));
                let sessions = Arc::new(DutySessionManager::new(engine.clone(), config.core_sequences));
                let backend: Arc<dyn CompletionBackend> = Arc::new(LocalBackend::new(engine));
                (backend, Some(sessions))
            }
            LlmProviderKind::Remote => {
                let backend: Arc<dyn CompletionBackend> = Arc::new(RemoteBackend::new(client));
                (backend, None)
            }
        };

        Self::with_backend(config, backend, sessions, persona, conversation_log, loop_conversation_log, output)
    }

    /// `sessions` is set for engines that keep sessions in-process.
    pub fn with_backend(
        config: LlmConfig,
        backend: Arc<dyn CompletionBackend>,
        sessions: Option<Arc<DutySessionManager>>,
        persona: Arc<Persona>,
        conversation_log: Arc<ConversationLogger>,
        loop_conversation_log: Arc<ConversationLogger>,
        output: Arc<dyn OutputChannel>,
    ) -> Self {
        let provider = config.enabled.then(|| CompletionProvider::new(backend));
        Self {
            config,
            provider,
            sessions,
            persona,
            conversation_log,
            loop_conversation_log,
            output,
            actions_classifier_content: RwLock::new(None),
            warming_up: AtomicBool::new(false),
        }
    }

    /// Loads the actions classifier listing and resets the loop log.
    pub async fn load(&self) -> Result<()> {
        if !self.is_enabled() {
            info!("LLM is disabled");
            return Ok(());
        }

        if let Some(path) = &self.config.actions_classifier_path {
            self.load_actions_classifier(path).await?;
        }

        self.loop_conversation_log.clear().await?;
        info!("LLM manager loaded ({:?} provider)", self.config.provider);
        Ok(())
    }

    async fn load_actions_classifier(&self, path: &Path) -> Result<()> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                self.set_actions_classifier_content(content);
                info!("Actions classifier loaded from {}", path.display());
            }
            Err(e) => warn!(
                "Actions classifier not found at {} ({}), action recognition will rely on the generated listing",
                path.display(),
                e
            ),
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn is_nlg_enabled(&self) -> bool {
        self.is_enabled() && self.config.nlg_enabled
    }

    pub fn is_action_recognition_enabled(&self) -> bool {
        self.is_enabled()
            && self.config.action_recognition_enabled
            && self.actions_classifier_content().is_some()
    }

    pub fn should_warm_up(&self) -> bool {
        self.is_enabled() && self.config.warm_up && self.config.provider == LlmProviderKind::Local
    }

    pub fn persona(&self) -> &Arc<Persona> {
        &self.persona
    }

    pub fn conversation_log(&self) -> &Arc<ConversationLogger> {
        &self.conversation_log
    }

    pub fn loop_conversation_log(&self) -> &Arc<ConversationLogger> {
        &self.loop_conversation_log
    }

    pub fn actions_classifier_content(&self) -> Option<String> {
        self.actions_classifier_content
            .read()
            .ok()
            .and_then(|content| content.clone())
    }

    pub fn set_actions_classifier_content(&self, content: String) {
        if let Ok(mut current) = self.actions_classifier_content.write() {
            *current = Some(content);
        }
    }

    pub async fn execute(&self, duty: Duty) -> Result<CompletionResult> {
        debug!("Executing {}", duty.kind().name());
        let is_warming_up = self.warming_up.load(Ordering::SeqCst);

        match duty {
            Duty::CustomNer { input, schema } => duties::custom_ner::execute(self, &input, schema).await,
            Duty::ActionRecognition {
                input,
                existing_context_name,
            } => {
                duties::action_recognition::execute(self, &input, existing_context_name.as_deref()).await
            }
            Duty::Paraphrase { input } => duties::paraphrase::execute(self, &input, is_warming_up).await,
            Duty::Conversation {
                input,
                use_loop_history,
            } => duties::conversation::execute(self, &input, use_loop_history).await,
            Duty::Custom { input, system_prompt } => {
                duties::custom::execute(self, &input, &system_prompt).await
            }
        }
    }

    pub(crate) async fn call(&self, call: DutyCall<'_>) -> Result<CompletionResult> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| AssistantError::Configuration("LLM is not enabled".to_string()))?;

        let mut options = CompletionOptions::new(call.kind, call.system_prompt.clone())
            .with_timeout(Duration::from_millis(self.config.timeout_ms))
            .with_max_retries(self.config.max_retries)
            .with_max_tokens(self.config.max_tokens);
        if let Some(temperature) = call.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(schema) = call.schema {
            options = options.with_schema(schema);
        }

        match &self.sessions {
            Some(sessions) => {
                let session = sessions.session_for(call.kind, &call.system_prompt, false).await?;
                if let Some((logger, limit)) = call.history {
                    let history = sessions.load_history(&session, logger, limit).await?;
                    sessions.engine().set_chat_history(&session, history).await?;
                }
                options = options
                    .with_max_tokens(sessions.engine().context_size())
                    .with_session(session);
            }
            None => {
                if let Some((logger, limit)) = call.history {
                    let history = logger
                        .load(limit)
                        .await?
                        .into_iter()
                        .map(|entry| match entry.speaker {
                            Speaker::Owner => ChatHistoryItem::User(entry.message),
                            Speaker::Assistant => ChatHistoryItem::Model(entry.message),
                        })
                        .collect();
                    options = options.with_history(history);
                }
            }
        }

        if call.stream_tokens {
            let generation_id = generation_id();
            let output = self.output.clone();
            options = options.with_token_sink(Arc::new(move |token: &str| {
                output.emit(OutputEvent::LlmToken {
                    token: token.to_string(),
                    generation_id: generation_id.clone(),
                });
            }));
        }

        info!("{}: executing", call.kind.name());
        match provider.prompt(&call.prompt, options).await {
            Ok(result) => {
                info!(
                    "{}: done in {} attempt(s), {} input / {} output tokens",
                    call.kind.name(),
                    result.attempts,
                    result.used_input_tokens,
                    result.used_output_tokens
                );
                debug!("{} output: {:?}", call.kind.name(), result.output);
                Ok(result)
            }
            Err(e) => {
                error!("{}: failed to execute: {} (prompt: {})", call.kind.name(), e, call.prompt);
                Err(e)
            }
        }
    }

    /// Primes the core sessions so the first real turn does not pay for it.
    pub async fn warm_up(&self) {
        if !self.should_warm_up() {
            return;
        }

        info!("Warming up LLM duties...");
        self.warming_up.store(true, Ordering::SeqCst);

        let ner = Duty::CustomNer {
            input: WARM_UP_NER_INPUT.to_string(),
            schema: serde_json::json!({
                "items": { "type": "array", "items": { "type": "string" } },
                "list_name": { "type": "string" }
            }),
        };
        if let Err(e) = self.execute(ner).await {
            warn!("Custom NER warm-up failed: {}", e);
        }

        if self.is_action_recognition_enabled() {
            let recognition = Duty::ActionRecognition {
                input: WARM_UP_ACTION_RECOGNITION_INPUT.to_string(),
                existing_context_name: None,
            };
            if let Err(e) = self.execute(recognition).await {
                warn!("Action recognition warm-up failed: {}", e);
            }
        }

        if self.is_nlg_enabled() {
            let paraphrase = Duty::Paraphrase {
                input: WARM_UP_PARAPHRASE_INPUT.to_string(),
            };
            if let Err(e) = self.execute(paraphrase).await {
                warn!("Paraphrase warm-up failed: {}", e);
            }
        }

        self.warming_up.store(false, Ordering::SeqCst);
        info!("LLM duties warmed up");
    }

    /// Mood-dependent sessions are rebuilt on their next use.
    pub async fn on_persona_changed(&self) -> Result<()> {
        let mood = self.persona.mood();
        self.output.emit(OutputEvent::NewMood {
            mood: mood.as_str().to_string(),
            emoji: mood.emoji().to_string(),
        });

        if let Some(sessions) = &self.sessions {
            sessions
                .invalidate(&[DutyKind::Paraphrase, DutyKind::Conversation])
                .await?;
        }
        Ok(())
    }

    pub fn spawn_persona_refresh(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.mood_refresh_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if self.persona.refresh_mood() {
                    if let Err(e) = self.on_persona_changed().await {
                        warn!("Failed to apply new mood: {}", e);
                    }
                }
            }
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(sessions) = &self.sessions {
            sessions.dispose_all().await?;
        }
        Ok(())
    }
}

fn generation_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .filter(|c| c.is_ascii_alphabetic())
        .take(6)
        .map(char::from)
        .collect()
}
