use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rusty_dialogue_common::{ActionConfig, Classification, NerEntity, Slot};
use serde::Serialize;
use tracing::{debug, info};

/// The single live multi-turn context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveContext {
    /// `domain.skill`
    pub name: String,
    pub classification: Classification,
    pub lang: String,
    pub entities: Vec<NerEntity>,
    pub slots: Vec<Slot>,
    pub is_in_action_loop: bool,
    /// Utterance that opened the context; replayed on restart and sent to the
    /// skill once every slot is filled.
    pub original_utterance: String,
    pub activated_at: DateTime<Utc>,
}

impl ActiveContext {
    pub fn new(
        classification: Classification,
        config: &ActionConfig,
        lang: impl Into<String>,
        original_utterance: impl Into<String>,
    ) -> Self {
        let mut rng = rand::thread_rng();
        let slots = config
            .slots
            .iter()
            .map(|slot| Slot {
                name: slot.name.clone(),
                expected_entity: slot.item.name.clone(),
                value: None,
                is_filled: false,
                picked_question: slot.questions.choose(&mut rng).cloned().unwrap_or_default(),
                questions: slot.questions.clone(),
                suggestions: slot.suggestions.clone(),
            })
            .collect();

        Self {
            name: classification.context_name(),
            classification,
            lang: lang.into(),
            entities: Vec::new(),
            slots,
            is_in_action_loop: config.has_loop(),
            original_utterance: original_utterance.into(),
            activated_at: Utc::now(),
        }
    }

    /// Fills open slots from `entities`, each entity used at most once.
    /// Returns how many slots were filled.
    pub fn fill_slots(&mut self, entities: &[NerEntity]) -> usize {
        let mut used = vec![false; entities.len()];
        let mut filled = 0;

        for slot in self.slots.iter_mut().filter(|slot| !slot.is_filled) {
            let candidate = entities
                .iter()
                .enumerate()
                .find(|(i, entity)| !used[*i] && entity.entity == slot.expected_entity);
            if let Some((i, entity)) = candidate {
                used[i] = true;
                debug!("Slot {} filled with \"{}\"", slot.name, entity.source_text);
                slot.fill(entity.clone());
                filled += 1;
            }
        }

        filled
    }

    pub fn next_unfilled_slot(&self) -> Option<&Slot> {
        self.slots.iter().find(|slot| !slot.is_filled)
    }

    pub fn has_unfilled_slots(&self) -> bool {
        self.next_unfilled_slot().is_some()
    }

    pub fn add_entities(&mut self, entities: &[NerEntity]) {
        self.entities.extend(entities.iter().cloned());
    }
}

/// Conversation state for the one dialogue stream.
#[derive(Debug)]
pub struct Conversation {
    active: Option<ActiveContext>,
    /// Name of the last context an action ran under, kept after cleaning
    /// for context-aware rescoring.
    topic: Option<String>,
    lang: String,
}

impl Conversation {
    pub fn new(lang: impl Into<String>) -> Self {
        Self {
            active: None,
            topic: None,
            lang: lang.into(),
        }
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn set_lang(&mut self, lang: impl Into<String>) {
        self.lang = lang.into();
    }

    pub fn active(&self) -> Option<&ActiveContext> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveContext> {
        self.active.as_mut()
    }

    pub fn has_active_context(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_in_action_loop(&self) -> bool {
        self.active.as_ref().is_some_and(|context| context.is_in_action_loop)
    }

    pub fn has_unfilled_slots(&self) -> bool {
        self.active.as_ref().is_some_and(ActiveContext::has_unfilled_slots)
    }

    pub fn topic(&self) -> Option<&str> {
        self.active
            .as_ref()
            .map(|context| context.name.as_str())
            .or(self.topic.as_deref())
    }

    pub fn set_topic(&mut self, name: impl Into<String>) {
        self.topic = Some(name.into());
    }

    /// Makes `context` the active one, superseding any previous context.
    pub fn activate(&mut self, context: ActiveContext) {
        if let Some(previous) = &self.active {
            if previous.name != context.name {
                info!("Context {} replaced by {}", previous.name, context.name);
            }
        }
        debug!(
            "Active context {} ({}, loop: {}, slots: {})",
            context.name,
            context.classification.action,
            context.is_in_action_loop,
            context.slots.len()
        );
        self.topic = Some(context.name.clone());
        self.active = Some(context);
    }

    pub fn clean(&mut self) {
        if let Some(context) = self.active.take() {
            debug!("Context {} cleaned", context.name);
        }
    }
}
