use crate::conversation::{ActiveContext, Conversation};
use crate::nlu::{NluRouter, TurnOutcome, TurnResult};
use rusty_dialogue_common::{AssistantError, NluResult, Result, Utterance};
use tracing::{debug, info, warn};

impl NluRouter {
    /// Sends the utterance straight to the looping action, bypassing
    /// classification.
    pub(crate) async fn handle_action_loop(
        &self,
        conversation: &mut Conversation,
        utterance: &Utterance,
    ) -> Result<TurnResult> {
        let Some(context) = conversation.active().cloned() else {
            return self.classify_and_route(conversation, utterance).await;
        };
        let config = match self.registry.action_config(&context.classification, &utterance.lang) {
            Ok(config) => config.clone(),
            Err(e) => {
                warn!("Leaving the {} loop: {}", context.name, e);
                conversation.clean();
                return self.classify_and_route(conversation, utterance).await;
            }
        };

        let entities = self
            .extractor
            .extract(&utterance.lang, &utterance.text, Some(&config))
            .await;
        let mut all_entities = context.entities.clone();
        all_entities.extend(entities.iter().cloned());

        let nlu = NluResult {
            utterance: utterance.text.clone(),
            new_utterance: utterance.text.clone(),
            lang: utterance.lang.clone(),
            current_entities: entities.clone(),
            entities: all_entities,
            slots: Vec::new(),
            sentiment: None,
            classification: context.classification.clone(),
            action_config: Some(config),
        };

        let execution = match self.brain.execute(&nlu).await {
            Ok(execution) => execution,
            Err(AssistantError::SkillBusy) => return Err(AssistantError::SkillBusy),
            Err(e) => {
                conversation.clean();
                return Ok(TurnResult::new(utterance, TurnOutcome::Failed { error: e.to_string() })
                    .with_classification(context.classification));
            }
        };
        conversation.set_topic(context.name.clone());

        if execution.core.restart == Some(true) {
            info!("Restarting {} from \"{}\"", context.name, context.original_utterance);
            conversation.clean();
            let replay = Utterance::new(context.original_utterance.clone(), utterance.lang.clone());
            return self.route(conversation, &replay).await;
        }

        if execution.core.is_in_action_loop == Some(false) {
            debug!("Action loop of {} ended", context.name);
            match &execution.next_action {
                Some(next) => conversation.activate(ActiveContext::new(
                    next.classification.clone(),
                    &next.config,
                    &utterance.lang,
                    &context.original_utterance,
                )),
                None => conversation.clean(),
            }
        } else if let Some(active) = conversation.active_mut() {
            active.add_entities(&entities);
        }

        Ok(TurnResult::executed(utterance, nlu, execution))
    }
}

#[cfg(test)]
mod tests {
    use crate::classifier::{ClassifierOutput, MockIntentClassifier};
    use crate::tests_support::Harness;

    #[tokio::test]
    async fn test_loop_accumulates_entities_and_keeps_original_utterance() {
        let mut classifier = MockIntentClassifier::new();
        classifier.expect_classify().times(1).returning(|_| {
            Ok(ClassifierOutput {
                locale: "en".to_string(),
                domain: "leisure".to_string(),
                intent: "guess.setup".to_string(),
                score: 0.9,
                sentiment: None,
                classifications: Vec::new(),
            })
        });
        classifier.expect_extract_entities().returning(|_, _| Ok(Vec::new()));
        let harness = Harness::new(classifier);

        harness.process("play the guessing game").await;
        harness.process("is it 3").await;
        let result = harness.process("maybe 7").await;

        assert_eq!(result.classification.label(), "leisure.guess.play");
        assert_eq!(result.answers, vec!["Guess again"]);
        let context = harness.active_context().await.unwrap();
        assert_eq!(context.original_utterance, "play the guessing game");
        let numbers: Vec<_> = context
            .entities
            .iter()
            .filter(|entity| entity.entity == "number")
            .map(|entity| entity.source_text.as_str())
            .collect();
        assert_eq!(numbers, vec!["3", "7"]);
    }
}
