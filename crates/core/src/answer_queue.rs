//! Ordered delivery of answers.
//!
//! Answers are drained by a single worker task, so an answer enqueued while
//! another is being delivered always waits its turn.

use crate::speech::SpeechQueue;
use async_trait::async_trait;
use rusty_dialogue_common::{
    word_count, AssistantError, ConversationLogger, OutputChannel, OutputEvent, Result, Speaker,
};
use rusty_dialogue_llm::{Duty, LlmManager};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Rewrites an answer before delivery.
#[async_trait]
pub trait Paraphraser: Send + Sync {
    async fn paraphrase(&self, text: &str) -> Result<String>;
}

#[async_trait]
impl Paraphraser for LlmManager {
    async fn paraphrase(&self, text: &str) -> Result<String> {
        let result = self
            .execute(Duty::Paraphrase {
                input: text.to_string(),
            })
            .await?;
        result
            .output
            .as_text()
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AssistantError::MalformedOutput("Empty paraphrase".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAnswer {
    pub text: String,
    pub speech: String,
    pub paraphrase: bool,
    /// Owner utterance logged right before this answer.
    pub owner_message: Option<String>,
}

impl QueuedAnswer {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            speech: text.clone(),
            text,
            paraphrase: false,
            owner_message: None,
        }
    }
}

enum Message {
    Answer(QueuedAnswer),
    Flush(oneshot::Sender<()>),
}

pub struct AnswerQueueSettings {
    pub min_words_for_paraphrase: usize,
}

pub struct AnswerQueue {
    sender: mpsc::UnboundedSender<Message>,
    worker: JoinHandle<()>,
}

impl AnswerQueue {
    pub fn spawn(
        settings: AnswerQueueSettings,
        paraphraser: Option<Arc<dyn Paraphraser>>,
        output: Arc<dyn OutputChannel>,
        conversation_log: Arc<ConversationLogger>,
        speech: Arc<SpeechQueue>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            settings,
            paraphraser,
            output,
            conversation_log,
            speech,
        };
        let worker = tokio::spawn(worker.run(receiver));
        Self { sender, worker }
    }

    pub fn enqueue(&self, answer: QueuedAnswer) -> Result<()> {
        self.sender
            .send(Message::Answer(answer))
            .map_err(|_| AssistantError::Internal("Answer queue closed".to_string()))
    }

    /// Resolves once every answer enqueued before this call is delivered.
    pub async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.sender
            .send(Message::Flush(done))
            .map_err(|_| AssistantError::Internal("Answer queue closed".to_string()))?;
        wait.await
            .map_err(|_| AssistantError::Internal("Answer queue worker stopped".to_string()))
    }
}

impl Drop for AnswerQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

struct Worker {
    settings: AnswerQueueSettings,
    paraphraser: Option<Arc<dyn Paraphraser>>,
    output: Arc<dyn OutputChannel>,
    conversation_log: Arc<ConversationLogger>,
    speech: Arc<SpeechQueue>,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = receiver.recv().await {
            match message {
                Message::Answer(answer) => self.deliver(answer).await,
                Message::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Answer queue closed");
    }

    async fn deliver(&self, answer: QueuedAnswer) {
        self.output.emit(OutputEvent::IsTyping(true));

        let (text, speech) = match self.rewrite(&answer).await {
            Some(rewritten) => (rewritten.clone(), rewritten),
            None => (answer.text, answer.speech),
        };

        self.output.emit(OutputEvent::Answer(text.clone()));
        self.speech.push(&speech);

        if let Some(owner_message) = answer.owner_message {
            if let Err(e) = self.conversation_log.push(Speaker::Owner, owner_message).await {
                warn!("Failed to log owner message: {}", e);
            }
        }
        if let Err(e) = self.conversation_log.push(Speaker::Assistant, text).await {
            warn!("Failed to log answer: {}", e);
        }

        self.output.emit(OutputEvent::IsTyping(false));
    }

    async fn rewrite(&self, answer: &QueuedAnswer) -> Option<String> {
        let paraphraser = self.paraphraser.as_ref()?;
        if !answer.paraphrase || word_count(&answer.text) < self.settings.min_words_for_paraphrase {
            return None;
        }

        match paraphraser.paraphrase(&answer.text).await {
            Ok(rewritten) => Some(rewritten),
            Err(e) => {
                warn!("Paraphrase failed, delivering the original answer: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rusty_dialogue_common::{ConversationLoggerSettings, RecordingOutputChannel};

    struct Upper;

    #[async_trait]
    impl Paraphraser for Upper {
        async fn paraphrase(&self, text: &str) -> Result<String> {
            Ok(text.to_uppercase())
        }
    }

    struct Broken;

    #[async_trait]
    impl Paraphraser for Broken {
        async fn paraphrase(&self, _text: &str) -> Result<String> {
            Err(AssistantError::CompletionTimeout {
                duty: "paraphrase".to_string(),
                attempts: 3,
            })
        }
    }

    fn queue(
        dir: &tempfile::TempDir,
        paraphraser: Option<Arc<dyn Paraphraser>>,
    ) -> (AnswerQueue, Arc<RecordingOutputChannel>, Arc<ConversationLogger>) {
        let output = Arc::new(RecordingOutputChannel::new());
        let log = Arc::new(ConversationLogger::new(ConversationLoggerSettings {
            logger_name: "main".to_string(),
            file_path: dir.path().join("conversation.json"),
            nb_of_logs_to_keep: 1_000,
            nb_of_logs_to_load: 8,
        }));
        let speech = Arc::new(SpeechQueue::new(output.clone()));
        let queue = AnswerQueue::spawn(
            AnswerQueueSettings {
                min_words_for_paraphrase: 3,
            },
            paraphraser,
            output.clone(),
            log.clone(),
            speech,
        );
        (queue, output, log)
    }

    fn paraphrased(text: &str) -> QueuedAnswer {
        QueuedAnswer {
            paraphrase: true,
            ..QueuedAnswer::new(text)
        }
    }

    #[tokio::test]
    async fn test_delivery_events_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, output, log) = queue(&dir, None);

        queue
            .enqueue(QueuedAnswer {
                owner_message: Some("hello".to_string()),
                ..QueuedAnswer::new("Hi there")
            })
            .unwrap();
        queue.flush().await.unwrap();

        assert_eq!(
            output.events(),
            vec![
                OutputEvent::IsTyping(true),
                OutputEvent::Answer("Hi there".to_string()),
                OutputEvent::IsTyping(false),
            ]
        );
        let entries = log.load(None).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, Speaker::Owner);
        assert_eq!(entries[1].message, "Hi there");
    }

    #[tokio::test]
    async fn test_paraphrase_only_long_flagged_answers() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, output, _log) = queue(&dir, Some(Arc::new(Upper)));

        queue.enqueue(paraphrased("the timer is set")).unwrap();
        queue.enqueue(paraphrased("too short")).unwrap();
        queue.enqueue(QueuedAnswer::new("not flagged for rewriting")).unwrap();
        queue.flush().await.unwrap();

        assert_eq!(
            output.answers(),
            vec!["THE TIMER IS SET", "too short", "not flagged for rewriting"]
        );
    }

    #[tokio::test]
    async fn test_paraphrase_failure_delivers_original() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, output, _log) = queue(&dir, Some(Arc::new(Broken)));

        queue.enqueue(paraphrased("the timer is set")).unwrap();
        queue.flush().await.unwrap();
        assert_eq!(output.answers(), vec!["the timer is set"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_concurrent_enqueues_keep_fifo(batches in prop::collection::vec(1usize..6, 1..6)) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let (queue, output, _log) = queue(&dir, Some(Arc::new(Upper)));
                let queue = Arc::new(queue);

                let mut producers = Vec::new();
                for (producer, size) in batches.iter().enumerate() {
                    let queue = queue.clone();
                    let size = *size;
                    producers.push(tokio::spawn(async move {
                        for i in 0..size {
                            queue.enqueue(QueuedAnswer::new(format!("{}-{}", producer, i))).unwrap();
                            tokio::task::yield_now().await;
                        }
                    }));
                }
                for producer in producers {
                    producer.await.unwrap();
                }
                queue.flush().await.unwrap();

                let answers = output.answers();
                let total: usize = batches.iter().sum();
                prop_assert_eq!(answers.len(), total);

                // Each producer's answers arrive exactly once, in its own order.
                for (producer, size) in batches.iter().enumerate() {
                    let prefix = format!("{}-", producer);
                    let delivered: Vec<&String> = answers.iter().filter(|a| a.starts_with(&prefix)).collect();
                    let expected: Vec<String> = (0..*size).map(|i| format!("{}-{}", producer, i)).collect();
                    prop_assert_eq!(delivered, expected.iter().collect::<Vec<_>>());
                }
                Ok(())
            })?;
        }
    }
}
