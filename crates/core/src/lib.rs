pub mod action_loop;
pub mod answer_queue;
pub mod brain;
pub mod classifier;
pub mod config;
pub mod conversation;
pub mod lang;
pub mod language;
pub mod ner;
pub mod nlu;
pub mod slot_filling;
pub mod speech;

#[cfg(test)]
pub(crate) mod tests_support;

pub use brain::{Brain, ExecutionResult};
pub use config::{load_settings, Settings};
pub use conversation::{ActiveContext, Conversation};
pub use nlu::{NluRouter, TurnOutcome, TurnResult};
pub use rusty_dialogue_llm::{LlmConfig, LlmProviderKind};

use classifier::{HttpClassifier, IntentClassifier, NullClassifier};
use language::{LanguageBackend, ProcessLanguageBackend};
use rusty_dialogue_common::{
    AssistantError, Classification, ConversationLogger, ConversationLoggerSettings, NerEntity, NluResult,
    OutputChannel, Result,
};
use rusty_dialogue_llm::{CompletionResult, Duty, LlmManager, Persona};
use rusty_dialogue_skills::{SkillDispatcher, SkillRegistry};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Optional NLU data merged into a directly addressed action.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionParams {
    pub utterance: String,
    pub lang: Option<String>,
    pub entities: Vec<NerEntity>,
    pub current_entities: Vec<NerEntity>,
    pub sentiment: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmInferenceRequest {
    pub duty_type: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl LlmInferenceRequest {
    /// `None` for an unknown duty type.
    pub fn duty(&self) -> Option<Duty> {
        let input = self.input.clone();
        let data = self.data.as_ref();
        let duty = match self.duty_type.as_str() {
            "custom-ner" => Duty::CustomNer {
                input,
                schema: data
                    .and_then(|data| data.get("schema"))
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({})),
            },
            "action-recognition" => Duty::ActionRecognition {
                input,
                existing_context_name: data
                    .and_then(|data| data.get("existingContextName"))
                    .and_then(|name| name.as_str())
                    .map(str::to_string),
            },
            "paraphrase" => Duty::Paraphrase { input },
            "conversation" => Duty::Conversation {
                input,
                use_loop_history: data
                    .and_then(|data| data.get("useLoopHistory"))
                    .and_then(|flag| flag.as_bool())
                    .unwrap_or(true),
            },
            "custom" => Duty::Custom {
                input,
                system_prompt: self.system_prompt.clone().unwrap_or_default(),
            },
            _ => return None,
        };
        Some(duty)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreInfo {
    pub version: String,
    pub languages: Vec<String>,
    pub lang: String,
    pub skills: usize,
    pub llm_enabled: bool,
    pub llm_nlg_enabled: bool,
    pub llm_action_recognition_enabled: bool,
    pub should_warm_up_llm_duties: bool,
    pub mood: serde_json::Value,
}

/// The dialogue runtime wired together: one conversation, one brain, one
/// router.
pub struct AssistantCore {
    settings: Settings,
    registry: Arc<SkillRegistry>,
    llm: Arc<LlmManager>,
    brain: Arc<Brain>,
    router: NluRouter,
    language_backend: Arc<dyn LanguageBackend>,
    conversation: Mutex<Conversation>,
    persona_refresh: StdMutex<Option<JoinHandle<()>>>,
}

impl AssistantCore {
    pub async fn new(settings: Settings, output: Arc<dyn OutputChannel>) -> Result<Self> {
        let paths = &settings.paths;
        let langs = Arc::new(lang::LangRegistry::load(&paths.lang_dir, &settings.nlu.supported_langs).await?);
        if !langs.is_supported(&settings.nlu.default_lang) {
            return Err(AssistantError::Configuration(format!(
                "Default language {} is not among the supported languages",
                settings.nlu.default_lang
            )));
        }

        let registry = Arc::new(SkillRegistry::load(&paths.skills_dir).await?);
        let dispatcher = Arc::new(SkillDispatcher::new(
            registry.clone(),
            settings.skills.clone(),
            paths.tmp_dir.clone(),
            paths.memory_dir.clone(),
        ));

        let conversation_log = Arc::new(ConversationLogger::new(ConversationLoggerSettings {
            logger_name: "Conversation Logger".to_string(),
            file_path: paths.logs_dir.join("conversation_log.json"),
            nb_of_logs_to_keep: settings.brain.conversation_log_capacity,
            nb_of_logs_to_load: settings.brain.conversation_log_load,
        }));
        let loop_conversation_log = Arc::new(ConversationLogger::new(ConversationLoggerSettings {
            logger_name: "Loop Conversation Logger".to_string(),
            file_path: paths.logs_dir.join("loop_conversation_log.json"),
            nb_of_logs_to_keep: settings.brain.loop_conversation_log_capacity,
            nb_of_logs_to_load: settings.brain.conversation_log_load,
        }));

        let llm = Arc::new(LlmManager::new(
            settings.llm.clone(),
            Arc::new(Persona::new(settings.persona.clone())),
            conversation_log.clone(),
            loop_conversation_log,
            output.clone(),
        ));

        let speech = Arc::new(speech::SpeechQueue::new(output.clone()));
        let brain = Arc::new(Brain::new(
            &settings.brain,
            registry.clone(),
            dispatcher,
            langs.clone(),
            llm.clone(),
            output,
            speech,
            conversation_log,
        ));

        let classifier: Arc<dyn IntentClassifier> = match &settings.nlu.classifier_url {
            Some(url) => Arc::new(HttpClassifier::new(url.clone())?),
            None => {
                warn!("No classifier service configured, only fallbacks will match");
                Arc::new(NullClassifier::new(settings.nlu.default_lang.clone()))
            }
        };
        let language_backend: Arc<dyn LanguageBackend> = Arc::new(ProcessLanguageBackend::new(
            settings.nlu.language_backend_command.clone(),
        ));

        let router = NluRouter::new(
            settings.nlu.clone(),
            classifier,
            registry.clone(),
            langs,
            llm.clone(),
            brain.clone(),
            language_backend.clone(),
        );

        Ok(Self {
            conversation: Mutex::new(Conversation::new(settings.nlu.default_lang.clone())),
            settings,
            registry,
            llm,
            brain,
            router,
            language_backend,
            persona_refresh: StdMutex::new(None),
        })
    }

    /// Loads the LLM, warms its duties up and starts the language backend.
    pub async fn initialize(&self) -> Result<()> {
        self.llm.load().await?;
        if self.llm.is_enabled() && self.llm.actions_classifier_content().is_none() {
            let listing = self.registry.actions_classifier_content(&self.settings.nlu.default_lang);
            self.llm.set_actions_classifier_content(listing);
        }
        self.llm.warm_up().await;

        if self.llm.is_enabled() {
            let handle = self.llm.clone().spawn_persona_refresh();
            if let Ok(mut refresh) = self.persona_refresh.lock() {
                *refresh = Some(handle);
            }
        }

        if let Err(e) = self.language_backend.switch_to(&self.settings.nlu.default_lang).await {
            warn!("Language backend did not start: {}", e);
        }

        info!("Assistant core initialized");
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn llm(&self) -> &Arc<LlmManager> {
        &self.llm
    }

    /// One turn. A turn already running is not interleaved.
    pub async fn process_utterance(&self, text: &str) -> Result<TurnResult> {
        let mut conversation = self.conversation.try_lock().map_err(|_| AssistantError::TurnInProgress)?;
        self.router.process(&mut conversation, text).await
    }

    pub fn skill_count(&self) -> usize {
        self.registry.skills().count()
    }

    pub fn action_exists(&self, classification: &Classification) -> bool {
        self.registry.action_exists(&classification.label())
    }

    pub async fn active_context(&self) -> Option<ActiveContext> {
        self.conversation.lock().await.active().cloned()
    }

    /// Runs `domain.skill.action` directly, bypassing classification.
    pub async fn run_action(&self, classification: Classification, params: ActionParams) -> Result<ExecutionResult> {
        let conversation = self.conversation.lock().await;
        let lang = params.lang.unwrap_or_else(|| conversation.lang().to_string());

        let nlu = NluResult {
            utterance: params.utterance.clone(),
            new_utterance: params.utterance,
            current_entities: params.current_entities,
            entities: params.entities,
            sentiment: params.sentiment,
            ..NluResult::for_action(classification, lang)
        };
        info!("Running action {}", nlu.classification.label());
        self.brain.execute(&nlu).await
    }

    /// Widget tree of `widget_id` from a muted execution.
    pub async fn fetch_widget(
        &self,
        classification: Classification,
        widget_id: &str,
    ) -> Result<Option<serde_json::Value>> {
        let conversation = self.conversation.lock().await;
        let entity = NerEntity::new(
            "widgetid",
            "enum",
            widget_id,
            widget_id,
            serde_json::json!({ "value": widget_id }),
        )
        .with_option(widget_id);
        let nlu = NluResult {
            utterance: widget_id.to_string(),
            new_utterance: widget_id.to_string(),
            current_entities: vec![entity.clone()],
            entities: vec![entity],
            ..NluResult::for_action(classification, conversation.lang())
        };

        self.brain.set_muted(true);
        let result = self.brain.execute(&nlu).await;
        self.brain.set_muted(false);

        Ok(result?.widget)
    }

    pub async fn llm_inference(&self, duty: Duty) -> Result<CompletionResult> {
        if !self.llm.is_enabled() {
            return Err(AssistantError::Configuration("LLM is not enabled".to_string()));
        }
        self.llm.execute(duty).await
    }

    pub fn set_talking_with_voice(&self, talking: bool) {
        self.brain.speech().set_talking_with_voice(talking);
    }

    pub async fn info(&self) -> CoreInfo {
        let mood = self.llm.persona().mood();
        CoreInfo {
            version: VERSION.to_string(),
            languages: self.brain.langs().languages(),
            lang: self.conversation.lock().await.lang().to_string(),
            skills: self.skill_count(),
            llm_enabled: self.llm.is_enabled(),
            llm_nlg_enabled: self.llm.is_nlg_enabled(),
            llm_action_recognition_enabled: self.llm.is_action_recognition_enabled(),
            should_warm_up_llm_duties: self.llm.should_warm_up(),
            mood: serde_json::json!({ "type": mood.as_str(), "emoji": mood.emoji() }),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Ok(mut refresh) = self.persona_refresh.lock() {
            if let Some(handle) = refresh.take() {
                handle.abort();
            }
        }
        if let Err(e) = self.brain.flush().await {
            warn!("Pending answers not delivered: {}", e);
        }
        self.language_backend.shutdown().await;
        self.llm.shutdown().await?;
        info!("Assistant core shut down");
        Ok(())
    }
}
