//! Collecting the slots of an active context across turns.

use crate::conversation::Conversation;
use crate::nlu::{NluRouter, TurnOutcome, TurnResult};
use rusty_dialogue_common::{NerEntity, NluResult, Result, Utterance};
use tracing::{debug, info, warn};

impl NluRouter {
    /// `None` when the utterance left the context and must be classified
    /// from scratch.
    pub(crate) async fn handle_slot_filling(
        &self,
        conversation: &mut Conversation,
        utterance: &Utterance,
    ) -> Result<Option<TurnResult>> {
        let Some(context) = conversation.active().cloned() else {
            return Ok(None);
        };
        let config = match self.registry.action_config(&context.classification, &context.lang) {
            Ok(config) => config.clone(),
            Err(e) => {
                warn!("Dropping context {}: {}", context.name, e);
                conversation.clean();
                return Ok(None);
            }
        };
        self.brain.prepare_action(&config);

        let entities = self
            .extractor
            .extract(&utterance.lang, &utterance.text, Some(&config))
            .await;
        let expected = entities.iter().any(|entity| {
            context
                .slots
                .iter()
                .any(|slot| !slot.is_filled && slot.expected_entity == entity.entity)
        });

        if !expected {
            if self.is_out_of_topic(&context.name, utterance).await {
                info!("Utterance left the {} context", context.name);
                self.brain
                    .talk_phrase(&utterance.lang, "random_context_out_of_topic", &[]);
                conversation.clean();
                return Ok(None);
            }

            debug!("No expected entity, asking again");
            return Ok(self.ask_next_slot(conversation, utterance));
        }

        if let Some(active) = conversation.active_mut() {
            active.add_entities(&entities);
            active.fill_slots(&entities);
        }

        if let Some(question) = self.ask_next_slot(conversation, utterance) {
            return Ok(Some(question));
        }
        self.execute_filled_slots(conversation, utterance, entities)
            .await
            .map(Some)
    }

    /// Confidently classified into another context.
    async fn is_out_of_topic(&self, context_name: &str, utterance: &Utterance) -> bool {
        let output = match self.classifier.classify(&utterance.text).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Cannot check the topic: {}", e);
                return false;
            }
        };
        let min_confidence = self
            .langs
            .get(&utterance.lang)
            .map(|lang| lang.min_confidence)
            .unwrap_or(0.5);
        let skill = output.intent.split('.').next().unwrap_or_default();

        output.is_match()
            && output.score >= min_confidence
            && format!("{}.{}", output.domain, skill) != context_name
    }

    /// Asks the question of the next open slot, if any.
    pub(crate) fn ask_next_slot(&self, conversation: &Conversation, utterance: &Utterance) -> Option<TurnResult> {
        let context = conversation.active()?;
        let slot = context.next_unfilled_slot()?;

        self.brain.suggest(&slot.suggestions);
        self.brain.talk(slot.picked_question.clone());

        Some(
            TurnResult::new(
                utterance,
                TurnOutcome::SlotQuestion {
                    slot: slot.name.clone(),
                },
            )
            .with_classification(context.classification.clone())
            .with_answer(slot.picked_question.clone()),
        )
    }

    /// Every slot is filled: runs the slot action, or the next action it
    /// declares, with the utterance that opened the context.
    pub(crate) async fn execute_filled_slots(
        &self,
        conversation: &mut Conversation,
        utterance: &Utterance,
        current_entities: Vec<NerEntity>,
    ) -> Result<TurnResult> {
        // Reached from `dispatch`, which `classify_and_route` awaits.
        let Some(context) = conversation.active().cloned() else {
            return Box::pin(self.classify_and_route(conversation, utterance)).await;
        };
        conversation.clean();

        let config = self
            .registry
            .action_config(&context.classification, &context.lang)?
            .clone();
        let (classification, action_config) =
            match self
                .brain
                .resolve_next_action(&context.classification, &config, &context.lang)
            {
                Some(next) => (next.classification, next.config),
                None => (context.classification.clone(), config),
            };
        info!("Slots of {} filled, running {}", context.name, classification.label());

        let nlu = NluResult {
            utterance: context.original_utterance.clone(),
            new_utterance: utterance.text.clone(),
            lang: context.lang.clone(),
            current_entities,
            entities: context.entities.clone(),
            slots: context.slots.clone(),
            sentiment: None,
            classification,
            action_config: Some(action_config),
        };
        self.execute_action(conversation, utterance, nlu).await
    }
}
