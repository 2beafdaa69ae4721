//! Routes one utterance through the conversation state to an action.

use crate::brain::{Brain, ExecutionResult};
use crate::classifier::IntentClassifier;
use crate::config::NluConfig;
use crate::conversation::{ActiveContext, Conversation};
use crate::lang::LangRegistry;
use crate::language::LanguageBackend;
use crate::ner::EntityExtractor;
use futures::future::BoxFuture;
use rusty_dialogue_common::{
    word_count, AssistantError, Classification, NerEntity, NluResult, Result, Utterance,
};
use rusty_dialogue_llm::{duties::action_recognition, Duty, LlmManager};
use rusty_dialogue_skills::SkillRegistry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

const LOOP_WORD: &str = "loop";
const LOOP_BREAK_MAX_WORDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnOutcome {
    Executed,
    SlotQuestion { slot: String },
    AskedToRepeat,
    LoopStopped,
    LanguageNotSupported { lang: String },
    Conversation,
    Unknown,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub utterance: String,
    pub lang: String,
    pub classification: Classification,
    pub entities: Vec<NerEntity>,
    pub answers: Vec<String>,
    pub widget: Option<serde_json::Value>,
    pub outcome: TurnOutcome,
    pub processing_time_ms: u64,
    pub execution_time_ms: u64,
}

impl TurnResult {
    pub fn new(utterance: &Utterance, outcome: TurnOutcome) -> Self {
        Self {
            utterance: utterance.text.clone(),
            lang: utterance.lang.clone(),
            classification: Classification::default(),
            entities: Vec::new(),
            answers: Vec::new(),
            widget: None,
            outcome,
            processing_time_ms: 0,
            execution_time_ms: 0,
        }
    }

    pub fn with_answer(mut self, answer: String) -> Self {
        self.answers.push(answer);
        self
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = classification;
        self
    }

    pub(crate) fn executed(utterance: &Utterance, nlu: NluResult, execution: ExecutionResult) -> Self {
        Self {
            utterance: utterance.text.clone(),
            lang: utterance.lang.clone(),
            classification: execution.classification,
            entities: nlu.entities,
            answers: execution.answers,
            widget: execution.widget,
            outcome: TurnOutcome::Executed,
            processing_time_ms: 0,
            execution_time_ms: execution.execution_time_ms,
        }
    }

    pub fn is_executed(&self) -> bool {
        self.outcome == TurnOutcome::Executed
    }
}

/// Short utterance with a stop word: alone while a context is active, or
/// together with "loop".
pub fn should_break_action_loop(utterance: &str, stop_words: &[String], has_active_context: bool) -> bool {
    let lowered = utterance.to_lowercase();
    let words = word_count(utterance);
    let has_stop_word = stop_words
        .iter()
        .filter(|word| !word.is_empty())
        .any(|word| lowered.contains(&word.to_lowercase()));

    (has_active_context && has_stop_word && words == 1)
        || (words < LOOP_BREAK_MAX_WORDS && has_stop_word && lowered.contains(LOOP_WORD))
}

struct Classified {
    classification: Classification,
    /// False when nothing matched and fallbacks apply.
    matched: bool,
    locale: String,
    sentiment: Option<serde_json::Value>,
}

pub struct NluRouter {
    pub(crate) settings: NluConfig,
    pub(crate) classifier: Arc<dyn IntentClassifier>,
    pub(crate) extractor: EntityExtractor,
    pub(crate) registry: Arc<SkillRegistry>,
    pub(crate) langs: Arc<LangRegistry>,
    pub(crate) llm: Arc<LlmManager>,
    pub(crate) brain: Arc<Brain>,
    language_backend: Arc<dyn LanguageBackend>,
}

impl NluRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: NluConfig,
        classifier: Arc<dyn IntentClassifier>,
        registry: Arc<SkillRegistry>,
        langs: Arc<LangRegistry>,
        llm: Arc<LlmManager>,
        brain: Arc<Brain>,
        language_backend: Arc<dyn LanguageBackend>,
    ) -> Self {
        let extractor = EntityExtractor::new(classifier.clone(), llm.clone(), settings.entity_guard_words);
        Self {
            settings,
            classifier,
            extractor,
            registry,
            langs,
            llm,
            brain,
            language_backend,
        }
    }

    pub async fn process(&self, conversation: &mut Conversation, text: &str) -> Result<TurnResult> {
        let started = Instant::now();
        let utterance = Utterance::new(text.trim(), conversation.lang());
        info!("Processing \"{}\" ({})", utterance.text, utterance.lang);
        self.brain.new_turn(&utterance.text);

        let mut result = self.route(conversation, &utterance).await?;
        result.processing_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            "Turn done in {} ms ({} ms executing)",
            result.processing_time_ms, result.execution_time_ms
        );
        Ok(result)
    }

    pub(crate) fn route<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        utterance: &'a Utterance,
    ) -> BoxFuture<'a, Result<TurnResult>> {
        Box::pin(async move {
            let stop_words = self
                .langs
                .get(&utterance.lang)
                .map(|lang| lang.action_loop_stop_words.clone())
                .unwrap_or_default();
            if should_break_action_loop(&utterance.text, &stop_words, conversation.has_active_context()) {
                info!("Breaking the action loop");
                conversation.clean();
                let phrase = self.brain.talk_phrase(&utterance.lang, "action_loop_stopped", &[]);
                return Ok(TurnResult::new(utterance, TurnOutcome::LoopStopped).with_answer(phrase));
            }

            if conversation.is_in_action_loop() {
                return self.handle_action_loop(conversation, utterance).await;
            }

            if conversation.has_unfilled_slots() {
                if let Some(result) = self.handle_slot_filling(conversation, utterance).await? {
                    return Ok(result);
                }
            } else if conversation.has_active_context() {
                return self.handle_armed_action(conversation, utterance).await;
            }

            self.classify_and_route(conversation, utterance).await
        })
    }

    pub(crate) async fn classify_and_route(&self, conversation: &mut Conversation, utterance: &Utterance) -> Result<TurnResult> {
        let classified = match self.match_action(conversation, utterance).await {
            Ok(classified) => classified,
            Err(e) => {
                error!("Classification failed: {}", e);
                let phrase = self.brain.talk_phrase(&utterance.lang, "random_errors", &[]);
                return Ok(
                    TurnResult::new(utterance, TurnOutcome::Failed { error: e.to_string() }).with_answer(phrase)
                );
            }
        };

        let min_confidence = self
            .langs
            .get(&utterance.lang)
            .map(|lang| lang.min_confidence)
            .unwrap_or(0.5);
        if classified.matched && classified.classification.confidence < min_confidence {
            info!(
                "Confidence {:.2} below {:.2} for {}",
                classified.classification.confidence,
                min_confidence,
                classified.classification.label()
            );
            let phrase = self.brain.ask_to_repeat(&utterance.lang, &utterance.text);
            return Ok(TurnResult::new(utterance, TurnOutcome::AskedToRepeat)
                .with_classification(classified.classification)
                .with_answer(phrase));
        }

        if !self.langs.is_supported(&classified.locale) {
            warn!("Language {} is not supported", classified.locale);
            let phrase = self
                .brain
                .talk_phrase(&utterance.lang, "random_language_not_supported", &[]);
            return Ok(TurnResult::new(
                utterance,
                TurnOutcome::LanguageNotSupported {
                    lang: classified.locale,
                },
            )
            .with_answer(phrase));
        }

        if classified.locale != utterance.lang {
            return self.switch_language(conversation, utterance, &classified.locale).await;
        }

        let classification = if classified.matched {
            classified.classification
        } else {
            let fallback = self
                .langs
                .get(&utterance.lang)
                .ok()
                .and_then(|lang| lang.match_fallback(&utterance.text))
                .map(|fallback| Classification::new(&fallback.domain, &fallback.skill, &fallback.action, 1.0));

            match fallback {
                Some(classification) => {
                    info!("Fallback matched: {}", classification.label());
                    classification
                }
                None if self.llm.is_enabled() => self.conversation_classification(),
                None => {
                    warn!("Intent not found");
                    let phrase = self.brain.talk_phrase(&utterance.lang, "random_unknown_intents", &[]);
                    return Ok(TurnResult::new(utterance, TurnOutcome::Unknown).with_answer(phrase));
                }
            }
        };

        info!(
            "Intent found: {} (confidence {:.2})",
            classification.label(),
            classification.confidence
        );
        self.dispatch(conversation, utterance, classification, classified.sentiment)
            .await
    }

    async fn match_action(&self, conversation: &Conversation, utterance: &Utterance) -> Result<Classified> {
        let text = &utterance.text;
        let is_long = word_count(text) >= self.settings.long_utterance_words;
        let output = self.classifier.classify(text).await?;
        let locale = if output.locale.is_empty() {
            utterance.lang.clone()
        } else {
            output.locale.clone()
        };

        let setup_requested =
            output.is_match() && format!("{}.{}", output.domain, output.intent) == self.settings.conversation_setup_action;

        if self.llm.is_action_recognition_enabled() && !setup_requested {
            let recognized = if is_long {
                None
            } else {
                self.recognize_action(conversation, text).await
            };
            let classification = recognized
                .and_then(|label| Classification::from_label(&label, 1.0))
                .unwrap_or_else(|| self.conversation_classification());

            return Ok(Classified {
                classification,
                matched: true,
                locale,
                sentiment: output.sentiment,
            });
        }

        if is_long && self.llm.is_enabled() {
            debug!("Long utterance, forcing conversation");
            return Ok(Classified {
                classification: self.conversation_classification(),
                matched: true,
                locale,
                sentiment: output.sentiment,
            });
        }

        if !output.is_match() {
            return Ok(Classified {
                classification: Classification::default(),
                matched: false,
                locale,
                sentiment: output.sentiment,
            });
        }

        let (mut domain, mut intent, mut score) = (output.domain.clone(), output.intent.clone(), output.score);
        if let Some(topic) = conversation.topic() {
            for candidate in &output.classifications {
                let skill = candidate.intent.split('.').next().unwrap_or_default();
                if candidate.score > self.settings.context_rescore_threshold
                    && format!("{}.{}", candidate.domain, skill) == topic
                {
                    domain = candidate.domain.clone();
                    intent = candidate.intent.clone();
                    score = candidate.score;
                }
            }
        }

        let classification = Classification::from_label(&format!("{}.{}", domain, intent), score)
            .ok_or_else(|| AssistantError::Classification(format!("Malformed intent {}.{}", domain, intent)))?;
        Ok(Classified {
            classification,
            matched: true,
            locale,
            sentiment: output.sentiment,
        })
    }

    /// Label from the action recognition duty, or `None` when it found
    /// nothing real.
    async fn recognize_action(&self, conversation: &Conversation, text: &str) -> Option<String> {
        let duty = Duty::ActionRecognition {
            input: text.to_string(),
            existing_context_name: conversation.active().map(|context| context.name.clone()),
        };
        let result = match self.llm.execute(duty).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Action recognition failed: {}", e);
                return None;
            }
        };

        let label = action_recognition::recognized_intent(&result)?.to_string();
        if label == action_recognition::NOT_FOUND || label == self.settings.conversation_setup_action {
            return None;
        }
        if !self.registry.action_exists(&label) {
            warn!("Action recognition returned an unknown action: {}", label);
            return None;
        }
        Some(label)
    }

    fn conversation_classification(&self) -> Classification {
        Classification::from_label(&self.settings.conversation_action, 1.0).unwrap_or_else(|| {
            Classification::new("social_communication", "conversation", "converse", 1.0)
        })
    }

    async fn switch_language(
        &self,
        conversation: &mut Conversation,
        utterance: &Utterance,
        locale: &str,
    ) -> Result<TurnResult> {
        info!("Switching language from {} to {}", utterance.lang, locale);
        conversation.set_lang(locale);
        self.brain.talk_phrase(locale, "random_language_switch", &[]);

        if let Err(e) = self.language_backend.switch_to(locale).await {
            error!("Failed to restart the language backend: {}", e);
        }

        let replay = Utterance::new(utterance.text.clone(), locale);
        self.route(conversation, &replay).await
    }

    /// Resolved intent: register slots or run the action.
    pub(crate) async fn dispatch(
        &self,
        conversation: &mut Conversation,
        utterance: &Utterance,
        classification: Classification,
        sentiment: Option<serde_json::Value>,
    ) -> Result<TurnResult> {
        if classification.label() == self.settings.conversation_action {
            return self.converse(conversation, utterance, classification).await;
        }

        let config = match self.registry.action_config(&classification, &utterance.lang) {
            Ok(config) => config.clone(),
            Err(e) => {
                error!("Cannot load {}: {}", classification.label(), e);
                let phrase = self.brain.talk_phrase(&utterance.lang, "random_errors", &[]);
                return Ok(TurnResult::new(utterance, TurnOutcome::Failed { error: e.to_string() })
                    .with_classification(classification)
                    .with_answer(phrase));
            }
        };

        self.brain.prepare_action(&config);
        let entities = self
            .extractor
            .extract(&utterance.lang, &utterance.text, Some(&config))
            .await;

        if config.has_slots() {
            let mut context = ActiveContext::new(classification.clone(), &config, &utterance.lang, &utterance.text);
            context.add_entities(&entities);
            context.fill_slots(&entities);
            conversation.activate(context);

            if let Some(result) = self.ask_next_slot(conversation, utterance) {
                return Ok(result);
            }
            return self.execute_filled_slots(conversation, utterance, entities).await;
        }

        conversation.clean();
        let nlu = NluResult {
            utterance: utterance.text.clone(),
            new_utterance: utterance.text.clone(),
            lang: utterance.lang.clone(),
            current_entities: entities.clone(),
            entities,
            slots: Vec::new(),
            sentiment,
            classification,
            action_config: Some(config),
        };
        self.execute_action(conversation, utterance, nlu).await
    }

    /// Runs the action and arms the loop or the next action it declares.
    pub(crate) async fn execute_action(
        &self,
        conversation: &mut Conversation,
        utterance: &Utterance,
        nlu: NluResult,
    ) -> Result<TurnResult> {
        let execution = match self.brain.execute(&nlu).await {
            Ok(execution) => execution,
            Err(AssistantError::SkillBusy) => return Err(AssistantError::SkillBusy),
            Err(e) => {
                return Ok(TurnResult::new(utterance, TurnOutcome::Failed { error: e.to_string() })
                    .with_classification(nlu.classification));
            }
        };

        let config = nlu.action_config.clone().unwrap_or_default();
        conversation.set_topic(nlu.classification.context_name());

        if config.has_loop() && execution.core.is_in_action_loop != Some(false) {
            let mut context = ActiveContext::new(nlu.classification.clone(), &config, &nlu.lang, &nlu.utterance);
            context.slots.clear();
            context.add_entities(&nlu.entities);
            conversation.activate(context);
        } else if let Some(next) = &execution.next_action {
            debug!("Arming next action {}", next.classification.label());
            conversation.activate(ActiveContext::new(
                next.classification.clone(),
                &next.config,
                &nlu.lang,
                &nlu.utterance,
            ));
        }

        Ok(TurnResult::executed(utterance, nlu, execution))
    }

    /// Context armed by a previous action: run it without classification.
    async fn handle_armed_action(&self, conversation: &mut Conversation, utterance: &Utterance) -> Result<TurnResult> {
        let Some(context) = conversation.active().cloned() else {
            return self.classify_and_route(conversation, utterance).await;
        };
        let config = match self.registry.action_config(&context.classification, &utterance.lang) {
            Ok(config) => config.clone(),
            Err(e) => {
                warn!("Dropping armed action {}: {}", context.classification.label(), e);
                conversation.clean();
                return self.classify_and_route(conversation, utterance).await;
            }
        };

        let entities = self
            .extractor
            .extract(&utterance.lang, &utterance.text, Some(&config))
            .await;
        conversation.clean();

        let mut all_entities = context.entities.clone();
        all_entities.extend(entities.iter().cloned());
        let nlu = NluResult {
            utterance: utterance.text.clone(),
            new_utterance: utterance.text.clone(),
            lang: utterance.lang.clone(),
            current_entities: entities,
            entities: all_entities,
            slots: context.slots,
            sentiment: None,
            classification: context.classification,
            action_config: Some(config),
        };
        self.execute_action(conversation, utterance, nlu).await
    }

    async fn converse(
        &self,
        conversation: &mut Conversation,
        utterance: &Utterance,
        classification: Classification,
    ) -> Result<TurnResult> {
        conversation.clean();

        if !self.llm.is_enabled() {
            let phrase = self.brain.talk_phrase(&utterance.lang, "llm_not_enabled", &[]);
            return Ok(TurnResult::new(utterance, TurnOutcome::Conversation)
                .with_classification(classification)
                .with_answer(phrase));
        }

        let started = Instant::now();
        let duty = Duty::Conversation {
            input: utterance.text.clone(),
            use_loop_history: false,
        };
        match self.llm.execute(duty).await {
            Ok(result) => {
                let answer = result.output.as_text().unwrap_or_default().to_string();
                self.brain.talk_verbatim(answer.clone());
                let mut turn = TurnResult::new(utterance, TurnOutcome::Conversation)
                    .with_classification(classification)
                    .with_answer(answer);
                turn.execution_time_ms = started.elapsed().as_millis() as u64;
                Ok(turn)
            }
            Err(e) => {
                error!("Conversation duty failed: {}", e);
                let phrase = self.brain.talk_phrase(&utterance.lang, "random_errors", &[]);
                Ok(TurnResult::new(utterance, TurnOutcome::Failed { error: e.to_string() })
                    .with_classification(classification)
                    .with_answer(phrase))
            }
        }
    }
}
