use rusty_dialogue_common::{ConversationLogger, Result, Speaker};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::engine::{ContextId, InferenceEngine, SessionHandle};
use crate::provider::{ChatHistoryItem, DutyKind};

#[derive(Debug, Clone)]
pub struct DutySession {
    pub session: SessionHandle,
    pub system_prompt: String,
}

#[derive(Default)]
struct ManagerState {
    core_context: Option<ContextId>,
    dedicated_contexts: HashMap<DutyKind, ContextId>,
    sessions: HashMap<DutyKind, DutySession>,
}

/// A session taken out of the state, disposed once the lock is released.
struct RetiredSession {
    duty: DutyKind,
    previous: DutySession,
    dedicated_context: Option<ContextId>,
}

/// Owns one session per duty on top of the local engine.
///
/// Core duties share a single context sized to the number of core duties.
/// Every other duty gets a dedicated context that lives and dies with its
/// session. The state lock covers session swaps only, never inference and
/// never the wait for a running completion; a per-duty lock keeps two swaps
/// of the same duty apart.
pub struct DutySessionManager {
    engine: Arc<dyn InferenceEngine>,
    core_sequences: usize,
    state: Mutex<ManagerState>,
    duty_locks: Mutex<HashMap<DutyKind, Arc<Mutex<()>>>>,
}

impl DutySessionManager {
    pub fn new(engine: Arc<dyn InferenceEngine>, core_sequences: usize) -> Self {
        Self {
            engine,
            core_sequences: core_sequences.max(1),
            state: Mutex::new(ManagerState::default()),
            duty_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    /// Returns the live session of `duty`, creating it when missing, when the
    /// system prompt changed or when `force` is set.
    pub async fn session_for(&self, duty: DutyKind, system_prompt: &str, force: bool) -> Result<SessionHandle> {
        let duty_lock = self.duty_lock(duty).await;
        let _swap = duty_lock.lock().await;

        let retired = {
            let mut state = self.state.lock().await;
            if !force {
                if let Some(existing) = state.sessions.get(&duty) {
                    if existing.system_prompt == system_prompt {
                        return Ok(existing.session.clone());
                    }
                }
            }
            retire(&mut state, duty)
        };
        if let Some(retired) = retired {
            self.dispose_session(retired).await?;
        }

        info!("{}: initializing session", duty.name());
        let mut state = self.state.lock().await;
        let context = self.context_for(&mut state, duty).await?;
        let session = self.engine.create_session(context, system_prompt).await?;

        state.sessions.insert(
            duty,
            DutySession {
                session: session.clone(),
                system_prompt: system_prompt.to_string(),
            },
        );
        info!("{}: session initialized", duty.name());

        Ok(session)
    }

    pub async fn has_session(&self, duty: DutyKind) -> bool {
        self.state.lock().await.sessions.contains_key(&duty)
    }

    /// Disposes the sessions of `duties`; they are recreated on next use.
    pub async fn invalidate(&self, duties: &[DutyKind]) -> Result<()> {
        for duty in duties {
            let duty_lock = self.duty_lock(*duty).await;
            let _swap = duty_lock.lock().await;

            let retired = retire(&mut *self.state.lock().await, *duty);
            if let Some(retired) = retired {
                self.dispose_session(retired).await?;
            }
        }
        Ok(())
    }

    /// History for `session`: its system prompt followed by the most recent
    /// conversation log entries.
    pub async fn load_history(
        &self,
        session: &SessionHandle,
        logger: &ConversationLogger,
        limit: Option<usize>,
    ) -> Result<Vec<ChatHistoryItem>> {
        let system_message = self.engine.chat_history(session).await?.into_iter().next();
        let logs = logger.load(limit).await?;

        let mut history = Vec::with_capacity(logs.len() + 1);
        history.extend(system_message);
        history.extend(logs.into_iter().map(|entry| match entry.speaker {
            Speaker::Owner => ChatHistoryItem::User(entry.message),
            Speaker::Assistant => ChatHistoryItem::Model(entry.message),
        }));

        debug!("Loaded {} history items from {}", history.len(), logger.name());
        Ok(history)
    }

    pub async fn dispose_all(&self) -> Result<()> {
        let (retired, core_context) = {
            let mut state = self.state.lock().await;
            let duties: Vec<_> = state.sessions.keys().copied().collect();
            let retired: Vec<_> = duties
                .into_iter()
                .filter_map(|duty| retire(&mut state, duty))
                .collect();
            (retired, state.core_context.take())
        };

        for session in retired {
            self.dispose_session(session).await?;
        }
        if let Some(core) = core_context {
            self.engine.dispose_context(core).await?;
        }
        Ok(())
    }

    async fn duty_lock(&self, duty: DutyKind) -> Arc<Mutex<()>> {
        self.duty_locks.lock().await.entry(duty).or_default().clone()
    }

    async fn dispose_session(&self, retired: RetiredSession) -> Result<()> {
        let RetiredSession {
            duty,
            previous,
            dedicated_context,
        } = retired;

        previous.session.wait_idle().await;
        self.engine.dispose_session(&previous.session).await?;
        if let Some(context) = dedicated_context {
            self.engine.dispose_context(context).await?;
        }

        info!("{}: session disposed", duty.name());
        Ok(())
    }

    async fn context_for(&self, state: &mut ManagerState, duty: DutyKind) -> Result<ContextId> {
        if duty.is_core() {
            if let Some(context) = state.core_context {
                return Ok(context);
            }
            let context = self.engine.create_context(self.core_sequences).await?;
            state.core_context = Some(context);
            return Ok(context);
        }

        if let Some(context) = state.dedicated_contexts.get(&duty) {
            return Ok(*context);
        }
        let context = self.engine.create_context(1).await?;
        state.dedicated_contexts.insert(duty, context);
        Ok(context)
    }
}

fn retire(state: &mut ManagerState, duty: DutyKind) -> Option<RetiredSession> {
    let previous = state.sessions.remove(&duty)?;
    let dedicated_context = if duty.is_core() {
        None
    } else {
        state.dedicated_contexts.remove(&duty)
    };
    Some(RetiredSession {
        duty,
        previous,
        dedicated_context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use rusty_dialogue_common::ConversationLoggerSettings;
    use std::time::Duration;

    #[tokio::test]
    async fn test_session_is_reused_while_prompt_is_unchanged() {
        let engine = Arc::new(FakeEngine::new());
        let manager = DutySessionManager::new(engine.clone(), 3);

        let first = manager.session_for(DutyKind::Paraphrase, "prompt", false).await.unwrap();
        let second = manager.session_for(DutyKind::Paraphrase, "prompt", false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.created_sessions(), 1);
    }

    #[tokio::test]
    async fn test_core_duties_share_one_context() {
        let engine = Arc::new(FakeEngine::new());
        let manager = DutySessionManager::new(engine.clone(), 3);

        let ner = manager.session_for(DutyKind::CustomNer, "a", false).await.unwrap();
        let recognition = manager.session_for(DutyKind::ActionRecognition, "b", false).await.unwrap();
        let conversation = manager.session_for(DutyKind::Conversation, "c", false).await.unwrap();

        assert_eq!(ner.context, recognition.context);
        assert_ne!(ner.context, conversation.context);
        assert_eq!(engine.created_contexts(), 2);
    }

    #[tokio::test]
    async fn test_prompt_change_disposes_before_recreating() {
        let engine = Arc::new(FakeEngine::new());
        // A single sequence: recreation only succeeds if the old session was freed first.
        let manager = DutySessionManager::new(engine.clone(), 1);

        let first = manager.session_for(DutyKind::Paraphrase, "calm", false).await.unwrap();
        let second = manager.session_for(DutyKind::Paraphrase, "angry", false).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(engine.disposed_sessions(), vec![first.id]);

        let forced = manager.session_for(DutyKind::Paraphrase, "angry", true).await.unwrap();
        assert_ne!(forced, second);
    }

    #[tokio::test]
    async fn test_dedicated_context_recreated_with_session() {
        let engine = Arc::new(FakeEngine::new());
        let manager = DutySessionManager::new(engine.clone(), 3);

        manager.session_for(DutyKind::Custom, "one", false).await.unwrap();
        manager.session_for(DutyKind::Custom, "two", false).await.unwrap();

        assert_eq!(engine.disposed_contexts(), 1);
        assert_eq!(engine.created_contexts(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_waits_for_running_completion() {
        let engine = Arc::new(FakeEngine::new());
        let manager = Arc::new(DutySessionManager::new(engine.clone(), 3));
        let session = manager.session_for(DutyKind::Paraphrase, "p", false).await.unwrap();

        let guard = session.acquire().await;
        let invalidation = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.invalidate(&[DutyKind::Paraphrase]).await })
        };

        tokio::task::yield_now().await;
        assert!(engine.disposed_sessions().is_empty());

        drop(guard);
        invalidation.await.unwrap().unwrap();
        assert_eq!(engine.disposed_sessions(), vec![session.id]);
        assert!(!manager.has_session(DutyKind::Paraphrase).await);
    }

    #[tokio::test]
    async fn test_waiting_disposal_does_not_block_other_duties() {
        let engine = Arc::new(FakeEngine::new());
        let manager = Arc::new(DutySessionManager::new(engine.clone(), 3));
        let paraphrase = manager.session_for(DutyKind::Paraphrase, "p", false).await.unwrap();
        let recognition = manager.session_for(DutyKind::ActionRecognition, "a", false).await.unwrap();

        let guard = paraphrase.acquire().await;
        let invalidation = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.invalidate(&[DutyKind::Paraphrase]).await })
        };
        tokio::task::yield_now().await;

        let lookup = tokio::time::timeout(
            Duration::from_millis(500),
            manager.session_for(DutyKind::ActionRecognition, "a", false),
        )
        .await
        .expect("lookup waited on another duty's disposal")
        .unwrap();
        assert_eq!(lookup, recognition);

        let created = tokio::time::timeout(
            Duration::from_millis(500),
            manager.session_for(DutyKind::Custom, "c", false),
        )
        .await
        .expect("creation waited on another duty's disposal");
        assert!(created.is_ok());
        assert!(engine.disposed_sessions().is_empty());

        drop(guard);
        invalidation.await.unwrap().unwrap();
        assert_eq!(engine.disposed_sessions(), vec![paraphrase.id]);
    }

    #[tokio::test]
    async fn test_history_anchored_by_system_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ConversationLogger::new(ConversationLoggerSettings {
            logger_name: "history".to_string(),
            file_path: dir.path().join("log.json"),
            nb_of_logs_to_keep: 50,
            nb_of_logs_to_load: 8,
        });
        for i in 0..5 {
            logger.push(Speaker::Owner, format!("question {}", i)).await.unwrap();
            logger.push(Speaker::Assistant, format!("answer {}", i)).await.unwrap();
        }

        let engine = Arc::new(FakeEngine::new());
        let manager = DutySessionManager::new(engine, 3);
        let session = manager.session_for(DutyKind::ActionRecognition, "system", false).await.unwrap();

        let history = manager.load_history(&session, &logger, Some(3)).await.unwrap();
        assert_eq!(
            history,
            vec![
                ChatHistoryItem::System("system".to_string()),
                ChatHistoryItem::Model("answer 3".to_string()),
                ChatHistoryItem::User("question 4".to_string()),
                ChatHistoryItem::Model("answer 4".to_string()),
            ]
        );
    }
}
