//! Fixtures shared by the unit tests of this crate.

use crate::brain::Brain;
use crate::classifier::MockIntentClassifier;
use crate::config::{BrainConfig, NluConfig};
use crate::conversation::{ActiveContext, Conversation};
use crate::lang::{LangData, LangRegistry};
use crate::language::LanguageBackend;
use crate::nlu::{NluRouter, TurnResult};
use crate::speech::SpeechQueue;
use async_trait::async_trait;
use rusty_dialogue_common::{
    ActionConfig, ActionEntity, ActionType, ConversationLogger, ConversationLoggerSettings, EnumOption,
    ExpectedItem, LoopConfig, NullOutputChannel, RecordingOutputChannel, Result, SkillBridge, SkillConfig,
    SkillManifest, SlotConfig,
};
use rusty_dialogue_llm::{
    CompletionBackend, CompletionOptions, LlmConfig, LlmManager, LlmProviderKind, Persona, PersonaSettings,
    RawCompletion,
};
use rusty_dialogue_skills::{SkillDispatcher, SkillEntry, SkillRegistry, SkillsConfig};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn logger(dir: &Path, name: &str) -> Arc<ConversationLogger> {
    Arc::new(ConversationLogger::new(ConversationLoggerSettings {
        logger_name: name.to_string(),
        file_path: dir.join(format!("{}.json", name)),
        nb_of_logs_to_keep: 50,
        nb_of_logs_to_load: 8,
    }))
}

pub(crate) fn disabled_llm(dir: &Path) -> Arc<LlmManager> {
    Arc::new(LlmManager::new(
        LlmConfig::default(),
        Arc::new(Persona::new(PersonaSettings::default())),
        logger(dir, "conversation_log"),
        logger(dir, "loop_conversation_log"),
        Arc::new(NullOutputChannel),
    ))
}

/// Remote backend double that paraphrases by shouting.
struct ShoutingBackend;

#[async_trait]
impl CompletionBackend for ShoutingBackend {
    fn name(&self) -> &'static str {
        "shouting"
    }

    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<RawCompletion> {
        let text = prompt.split_once(": ").map_or(prompt, |(_, text)| text);
        Ok(RawCompletion {
            text: text.to_uppercase(),
            used_input_tokens: prompt.len() as u32,
            used_output_tokens: text.len() as u32,
        })
    }
}

/// Enabled remote LLM with paraphrasing on and nothing else.
pub(crate) fn shouting_llm(dir: &Path) -> Arc<LlmManager> {
    let config = LlmConfig {
        enabled: true,
        provider: LlmProviderKind::Remote,
        nlg_enabled: true,
        action_recognition_enabled: false,
        warm_up: false,
        max_retries: 0,
        ..LlmConfig::default()
    };
    Arc::new(LlmManager::with_backend(
        config,
        Arc::new(ShoutingBackend),
        None,
        Arc::new(Persona::new(PersonaSettings::default())),
        logger(dir, "conversation_log"),
        logger(dir, "loop_conversation_log"),
        Arc::new(NullOutputChannel),
    ))
}

fn dialog(answers: &[&str]) -> ActionConfig {
    ActionConfig {
        action_type: ActionType::Dialog,
        answers: answers.iter().map(|a| a.to_string()).collect(),
        ..ActionConfig::default()
    }
}

fn enum_entity(name: &str, options: &[&str]) -> ActionEntity {
    ActionEntity::Enum {
        name: name.to_string(),
        options: options
            .iter()
            .map(|option| {
                (
                    option.to_lowercase(),
                    EnumOption {
                        synonyms: vec![option.to_string()],
                        data: BTreeMap::new(),
                    },
                )
            })
            .collect(),
    }
}

fn slot(name: &str, entity: &str, question: &str, suggestions: &[&str]) -> SlotConfig {
    SlotConfig {
        name: name.to_string(),
        item: ExpectedItem {
            item_type: "entity".to_string(),
            name: entity.to_string(),
        },
        questions: vec![question.to_string()],
        suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
    }
}

fn skill(
    dir: &Path,
    domain: &str,
    name: &str,
    display_name: &str,
    entrypoint: Option<&str>,
    configs: Vec<(&str, Vec<(&str, ActionConfig)>)>,
) -> SkillEntry {
    SkillEntry {
        domain: domain.to_string(),
        name: name.to_string(),
        dir: dir.join(domain).join(name),
        manifest: SkillManifest {
            name: display_name.to_string(),
            bridge: if entrypoint.is_some() {
                SkillBridge::Native
            } else {
                SkillBridge::Python
            },
            version: "1.0.0".to_string(),
            description: String::new(),
            entrypoint: entrypoint.map(str::to_string),
        },
        configs: configs
            .into_iter()
            .map(|(lang, actions)| {
                (
                    lang.to_string(),
                    SkillConfig {
                        actions: actions
                            .into_iter()
                            .map(|(action, config)| (action.to_string(), config))
                            .collect(),
                        answers: BTreeMap::new(),
                    },
                )
            })
            .collect(),
    }
}

/// Greeting, timer, guessing game and trip booking skills.
pub(crate) fn dialog_registry(dir: &Path) -> SkillRegistry {
    let greeting = skill(
        dir,
        "social",
        "greeting",
        "Greeting",
        None,
        vec![
            ("en", vec![("hello", dialog(&["Hello!"]))]),
            ("fr", vec![("hello", dialog(&["Salut !"]))]),
        ],
    );

    let timer = skill(
        dir,
        "utilities",
        "timer",
        "Timer",
        Some("missing-binary"),
        vec![("en", vec![("set_timer", ActionConfig::default())])],
    );

    let setup = ActionConfig {
        next_action: Some("play".to_string()),
        suggestions: vec!["5".to_string()],
        ..dialog(&["Pick a number between 1 and 10."])
    };
    let play = ActionConfig {
        loop_config: Some(LoopConfig {
            expected_item: Some(ExpectedItem {
                item_type: "entity".to_string(),
                name: "number".to_string(),
            }),
        }),
        ..dialog(&["Guess again"])
    };
    let guess = skill(
        dir,
        "leisure",
        "guess",
        "Guess",
        None,
        vec![(
            "en",
            vec![
                ("setup", setup),
                ("play", play),
                ("rules", dialog(&["Guess my number."])),
            ],
        )],
    );

    let book = ActionConfig {
        slots: vec![
            slot("from", "city", "Where from?", &[]),
            slot("date", "date", "When?", &["today", "tomorrow"]),
        ],
        entities: vec![
            enum_entity("city", &["Paris", "Rome"]),
            enum_entity("date", &["today", "tomorrow"]),
        ],
        ..dialog(&["Trip from {{ from }} booked for {{ date }}"])
    };
    let trip = skill(dir, "travel", "trip", "Trip", None, vec![("en", vec![("book", book)])]);

    SkillRegistry::from_entries(dir, vec![greeting, timer, guess, trip])
}

fn lang_data(answers: &[(&str, &str)], fallbacks: serde_json::Value) -> LangData {
    serde_json::from_value(serde_json::json!({
        "min_confidence": 0.5,
        "action_loop_stop_words": ["stop", "enough"],
        "fallbacks": fallbacks,
        "answers": answers
            .iter()
            .map(|(key, phrase)| (key.to_string(), vec![phrase.to_string()]))
            .collect::<BTreeMap<_, _>>(),
    }))
    .unwrap()
}

pub(crate) fn lang_registry() -> LangRegistry {
    let en = lang_data(
        &[
            ("random_not_sure", "Sorry, could you repeat?"),
            ("random_errors", "Something went wrong."),
            ("random_skill_errors", "%skill_name% from %domain_name% failed."),
            ("random_unknown_intents", "I did not get that."),
            ("random_language_switch", "Switching to English."),
            ("random_language_not_supported", "I do not speak that language."),
            ("random_context_out_of_topic", "Let's talk about something else."),
            ("action_loop_stopped", "Loop stopped."),
            ("llm_not_enabled", "The LLM is not enabled."),
        ],
        serde_json::json!([
            { "words": ["good", "morning"], "domain": "social", "skill": "greeting", "action": "hello" }
        ]),
    );
    let fr = lang_data(
        &[
            ("random_not_sure", "Pardon ?"),
            ("random_language_switch", "Switching to French."),
            ("random_language_not_supported", "Je ne parle pas cette langue."),
            ("random_unknown_intents", "Je n'ai pas compris."),
        ],
        serde_json::json!([]),
    );

    LangRegistry::from_data([("en".to_string(), en), ("fr".to_string(), fr)])
}

/// Records the languages it was switched to.
#[derive(Default)]
pub(crate) struct RecordingLanguageBackend {
    switches: Mutex<Vec<String>>,
}

#[async_trait]
impl LanguageBackend for RecordingLanguageBackend {
    async fn switch_to(&self, lang: &str) -> Result<()> {
        if let Ok(mut switches) = self.switches.lock() {
            switches.push(lang.to_string());
        }
        Ok(())
    }
}

/// A router over the fixture skills with a recording output channel.
pub(crate) struct Harness {
    _dir: TempDir,
    pub router: NluRouter,
    pub output: Arc<RecordingOutputChannel>,
    conversation: tokio::sync::Mutex<Conversation>,
    language_backend: Arc<RecordingLanguageBackend>,
}

impl Harness {
    pub fn new(classifier: MockIntentClassifier) -> Self {
        Self::build(classifier, disabled_llm, BrainConfig::default())
    }

    /// Every answer of at least one word may be paraphrased.
    pub fn with_paraphrasing(classifier: MockIntentClassifier) -> Self {
        let brain = BrainConfig {
            min_words_for_paraphrase: 1,
            ..BrainConfig::default()
        };
        Self::build(classifier, shouting_llm, brain)
    }

    fn build(
        classifier: MockIntentClassifier,
        llm: fn(&Path) -> Arc<LlmManager>,
        brain_config: BrainConfig,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let output = Arc::new(RecordingOutputChannel::new());
        let registry = Arc::new(dialog_registry(dir.path()));
        let langs = Arc::new(lang_registry());
        let llm = llm(dir.path());
        let dispatcher = Arc::new(SkillDispatcher::new(
            registry.clone(),
            SkillsConfig::default(),
            dir.path().join("tmp"),
            dir.path().join("memory"),
        ));
        let brain = Arc::new(Brain::new(
            &brain_config,
            registry.clone(),
            dispatcher,
            langs.clone(),
            llm.clone(),
            output.clone(),
            Arc::new(SpeechQueue::new(output.clone())),
            llm.conversation_log().clone(),
        ));
        let language_backend = Arc::new(RecordingLanguageBackend::default());

        let router = NluRouter::new(
            NluConfig::default(),
            Arc::new(classifier),
            registry,
            langs,
            llm,
            brain,
            language_backend.clone(),
        );

        Self {
            _dir: dir,
            router,
            output,
            conversation: tokio::sync::Mutex::new(Conversation::new("en")),
            language_backend,
        }
    }

    /// Runs one turn and waits for its answers to be delivered.
    pub async fn process(&self, text: &str) -> TurnResult {
        let mut conversation = self.conversation.lock().await;
        let result = self.router.process(&mut conversation, text).await.unwrap();
        self.router.brain.flush().await.unwrap();
        result
    }

    pub async fn active_context(&self) -> Option<ActiveContext> {
        self.conversation.lock().await.active().cloned()
    }

    pub fn language_switches(&self) -> Vec<String> {
        self.language_backend
            .switches
            .lock()
            .map(|switches| switches.clone())
            .unwrap_or_default()
    }
}
