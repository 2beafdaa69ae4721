use crate::answer_queue::{AnswerQueue, AnswerQueueSettings, Paraphraser, QueuedAnswer};
use crate::config::BrainConfig;
use crate::lang::LangRegistry;
use crate::speech::SpeechQueue;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusty_dialogue_common::{
    ActionConfig, Answer, AssistantError, Classification, ConversationLogger, ExtraContextData,
    NluResult, OutputChannel, OutputEvent, Result, SkillCoreData, SkillExecutionRequest, SkillOutput,
};
use rusty_dialogue_llm::LlmManager;
use rusty_dialogue_skills::{render_answer, SkillDispatcher, SkillRegistry};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// Action to arm once the current one has run.
#[derive(Debug, Clone, PartialEq)]
pub struct NextAction {
    pub classification: Classification,
    pub config: ActionConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub classification: Classification,
    pub answers: Vec<String>,
    pub widget: Option<serde_json::Value>,
    #[serde(skip)]
    pub core: SkillCoreData,
    #[serde(skip)]
    pub next_action: Option<NextAction>,
    pub execution_time_ms: u64,
}

/// Executes resolved actions and owns everything said to the owner.
pub struct Brain {
    registry: Arc<SkillRegistry>,
    dispatcher: Arc<SkillDispatcher>,
    langs: Arc<LangRegistry>,
    output: Arc<dyn OutputChannel>,
    speech: Arc<SpeechQueue>,
    answers: AnswerQueue,
    nlg_enabled: bool,
    muted: AtomicBool,
    nlg_allowed: AtomicBool,
    owner_message: Mutex<Option<String>>,
}

impl Brain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: &BrainConfig,
        registry: Arc<SkillRegistry>,
        dispatcher: Arc<SkillDispatcher>,
        langs: Arc<LangRegistry>,
        llm: Arc<LlmManager>,
        output: Arc<dyn OutputChannel>,
        speech: Arc<SpeechQueue>,
        conversation_log: Arc<ConversationLogger>,
    ) -> Self {
        let nlg_enabled = llm.is_nlg_enabled();
        let paraphraser: Option<Arc<dyn Paraphraser>> = if nlg_enabled { Some(llm) } else { None };
        let answers = AnswerQueue::spawn(
            AnswerQueueSettings {
                min_words_for_paraphrase: settings.min_words_for_paraphrase,
            },
            paraphraser,
            output.clone(),
            conversation_log,
            speech.clone(),
        );

        Self {
            registry,
            dispatcher,
            langs,
            output,
            speech,
            answers,
            nlg_enabled,
            muted: AtomicBool::new(false),
            nlg_allowed: AtomicBool::new(true),
            owner_message: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn langs(&self) -> &Arc<LangRegistry> {
        &self.langs
    }

    pub fn speech(&self) -> &Arc<SpeechQueue> {
        &self.speech
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    /// Interrupts speech still pending from the previous turn and remembers
    /// the owner utterance so it is logged with the first answer.
    pub fn new_turn(&self, utterance: &str) {
        self.speech.interrupt();
        self.nlg_allowed.store(true, Ordering::SeqCst);
        if let Ok(mut owner_message) = self.owner_message.lock() {
            *owner_message = Some(utterance.to_string());
        }
    }

    /// Answers of actions with slots or a loop are never paraphrased, and
    /// neither are the questions asking for those slots.
    pub fn prepare_action(&self, config: &ActionConfig) {
        self.nlg_allowed.store(
            !config.has_loop() && !config.has_slots() && !config.disable_llm_nlg,
            Ordering::SeqCst,
        );
    }

    pub fn talk(&self, answer: impl Into<Answer>) {
        let paraphrase = self.nlg_enabled && self.nlg_allowed.load(Ordering::SeqCst);
        self.enqueue(answer.into(), paraphrase);
    }

    /// Delivered as is, never paraphrased.
    pub fn talk_verbatim(&self, answer: impl Into<Answer>) {
        self.enqueue(answer.into(), false);
    }

    fn enqueue(&self, answer: Answer, paraphrase: bool) {
        if self.is_muted() {
            return;
        }
        let owner_message = self.owner_message.lock().ok().and_then(|mut message| message.take());
        let queued = QueuedAnswer {
            text: answer.text().to_string(),
            speech: answer.speech().to_string(),
            paraphrase,
            owner_message,
        };

        if let Err(e) = self.answers.enqueue(queued) {
            error!("Failed to enqueue answer: {}", e);
        }
    }

    /// Speaks a language phrase and returns what was said.
    pub fn talk_phrase(&self, lang: &str, key: &str, data: &[(&str, &str)]) -> String {
        let phrase = self.langs.answer(lang, key, data);
        self.talk(phrase.clone());
        phrase
    }

    pub fn suggest(&self, suggestions: &[String]) {
        if self.is_muted() || suggestions.is_empty() {
            return;
        }
        self.output.emit(OutputEvent::Suggest(suggestions.to_vec()));
    }

    pub fn ask_to_repeat(&self, lang: &str, utterance: &str) -> String {
        let phrase = self.talk_phrase(lang, "random_not_sure", &[]);
        if !self.is_muted() {
            self.output.emit(OutputEvent::AskToRepeat(utterance.to_string()));
        }
        phrase
    }

    /// Waits until every answer given so far has been delivered.
    pub async fn flush(&self) -> Result<()> {
        self.answers.flush().await
    }

    #[instrument(skip(self, nlu), fields(action = %nlu.classification.label()))]
    pub async fn execute(&self, nlu: &NluResult) -> Result<ExecutionResult> {
        let classification = nlu.classification.clone();
        let config = match &nlu.action_config {
            Some(config) => config.clone(),
            None => self.registry.action_config(&classification, &nlu.lang)?.clone(),
        };
        self.prepare_action(&config);
        let next_action = self.resolve_next_action(&classification, &config, &nlu.lang);

        if config.is_dialog() {
            let answer = {
                let mut rng = rand::thread_rng();
                render_answer(&config, nlu, &mut rng)
            };
            let answers = match answer {
                Some(answer) => {
                    self.talk(answer.clone());
                    vec![answer]
                }
                None => {
                    warn!("Dialog action {} has no answer", classification.label());
                    Vec::new()
                }
            };
            self.suggest(&config.suggestions);

            return Ok(ExecutionResult {
                classification,
                answers,
                widget: None,
                core: SkillCoreData::default(),
                next_action,
                execution_time_ms: 0,
            });
        }

        let request = SkillExecutionRequest {
            id: request_id(),
            lang: nlu.lang.clone(),
            domain: classification.domain.clone(),
            skill: classification.skill.clone(),
            action: classification.action.clone(),
            utterance: nlu.utterance.clone(),
            new_utterance: nlu.new_utterance.clone(),
            current_entities: nlu.current_entities.clone(),
            entities: nlu.entities.clone(),
            slots: nlu.filled_slot_values(),
            extra_context_data: ExtraContextData::now(&nlu.lang, nlu.sentiment.clone()),
        };

        let result = match self
            .dispatcher
            .execute_with(&request, |output| self.deliver(output))
            .await
        {
            Ok(result) => result,
            Err(AssistantError::SkillBusy) => return Err(AssistantError::SkillBusy),
            Err(e) => {
                error!("Skill {} failed: {}", classification.label(), e);
                self.talk_skill_error(&classification, &nlu.lang);
                return Err(e);
            }
        };

        let last_output = result.last_output().cloned().unwrap_or_default();
        let core = last_output.core.clone().unwrap_or_default();

        if core.show_next_action_suggestions == Some(true) {
            if let Some(next) = &next_action {
                self.suggest(&next.config.suggestions);
            }
        }
        if core.show_suggestions == Some(true) {
            self.suggest(&config.suggestions);
        }

        info!(
            "{} executed in {} ms",
            classification.label(),
            result.execution_time_ms
        );
        Ok(ExecutionResult {
            classification,
            answers: result
                .outputs
                .iter()
                .filter_map(|output| output.answer.as_ref().map(|answer| answer.text().to_string()))
                .collect(),
            widget: last_output.widget,
            core,
            next_action,
            execution_time_ms: result.execution_time_ms,
        })
    }

    fn deliver(&self, output: &SkillOutput) {
        if let Some(answer) = &output.answer {
            self.talk(answer.clone());
        }
        if let Some(widget) = &output.widget {
            if !self.is_muted() {
                self.output.emit(OutputEvent::Widget(widget.clone()));
            }
        }
    }

    fn talk_skill_error(&self, classification: &Classification, lang: &str) {
        let skill_name = self
            .registry
            .skill(&classification.domain, &classification.skill)
            .map(|skill| skill.manifest.name.clone())
            .unwrap_or_else(|_| classification.skill.clone());
        let domain_name = self
            .registry
            .domains()
            .find(|(key, _)| *key == &classification.domain)
            .map(|(_, domain)| domain.manifest.name.clone())
            .unwrap_or_else(|| classification.domain.clone());

        self.talk_phrase(
            lang,
            "random_skill_errors",
            &[("skill_name", &skill_name), ("domain_name", &domain_name)],
        );
    }

    /// `next_action` names an action of the same skill, or a full
    /// `domain.skill.action` label.
    pub(crate) fn resolve_next_action(
        &self,
        classification: &Classification,
        config: &ActionConfig,
        lang: &str,
    ) -> Option<NextAction> {
        let name = config.next_action.as_deref()?;
        let next = if name.contains('.') {
            Classification::from_label(name, 1.0)?
        } else {
            Classification::new(&classification.domain, &classification.skill, name, 1.0)
        };

        match self.registry.action_config(&next, lang) {
            Ok(config) => Some(NextAction {
                classification: next,
                config: config.clone(),
            }),
            Err(e) => {
                warn!("Ignoring next action {}: {}", name, e);
                None
            }
        }
    }
}

/// `<epoch_ms>-<4 random alphanumerics>`
pub fn request_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect();
    debug!("New skill request id suffix {}", suffix);
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), suffix.to_lowercase())
}
