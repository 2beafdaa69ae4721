use async_trait::async_trait;
use rusty_dialogue_common::{AssistantError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info};

use crate::chat::ChatClient;
use crate::provider::{ChatHistoryItem, CompletionOptions, DutyKind, RawCompletion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// Handle to one chat session living inside an inference context.
///
/// Completions hold a shared guard on `usage` for the duration of the call;
/// disposal takes the exclusive guard so a session is never torn down under
/// a running completion.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: u64,
    pub context: ContextId,
    usage: Arc<RwLock<()>>,
}

impl SessionHandle {
    pub fn new(id: u64, context: ContextId) -> Self {
        Self {
            id,
            context,
            usage: Arc::new(RwLock::new(())),
        }
    }

    pub async fn acquire(&self) -> RwLockReadGuard<'_, ()> {
        self.usage.read().await
    }

    pub(crate) async fn wait_idle(&self) {
        let _exclusive = self.usage.write().await;
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// In-process inference handle: owns contexts (each with a fixed number of
/// sequences) and the chat sessions bound to them.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    fn context_size(&self) -> u32;

    async fn create_context(&self, sequences: usize) -> Result<ContextId>;

    async fn dispose_context(&self, context: ContextId) -> Result<()>;

    async fn create_session(&self, context: ContextId, system_prompt: &str) -> Result<SessionHandle>;

    async fn dispose_session(&self, session: &SessionHandle) -> Result<()>;

    async fn chat_history(&self, session: &SessionHandle) -> Result<Vec<ChatHistoryItem>>;

    async fn set_chat_history(&self, session: &SessionHandle, history: Vec<ChatHistoryItem>) -> Result<()>;

    async fn prompt(
        &self,
        session: &SessionHandle,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<RawCompletion>;
}

#[derive(Debug)]
struct ContextState {
    sequences: usize,
    in_use: usize,
}

#[derive(Debug)]
struct SessionState {
    context: ContextId,
    history: Vec<ChatHistoryItem>,
}

#[derive(Default)]
struct EngineState {
    contexts: HashMap<ContextId, ContextState>,
    sessions: HashMap<u64, SessionState>,
}

/// Engine backed by a local OpenAI-compatible inference server. Sessions and
/// sequence accounting live here; every prompt replays the session history.
pub struct ChatServerEngine {
    client: ChatClient,
    context_size: u32,
    next_id: AtomicU64,
    state: Mutex<EngineState>,
}

impl ChatServerEngine {
    pub fn new(client: ChatClient, context_size: u32) -> Self {
        info!("Local inference engine using model {}", client.model());
        Self {
            client,
            context_size,
            next_id: AtomicU64::new(1),
            state: Mutex::new(EngineState::default()),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn free_sequences(&self, context: ContextId) -> Option<usize> {
        let state = self.state.lock().await;
        state
            .contexts
            .get(&context)
            .map(|ctx| ctx.sequences - ctx.in_use)
    }
}

#[async_trait]
impl InferenceEngine for ChatServerEngine {
    fn context_size(&self) -> u32 {
        self.context_size
    }

    async fn create_context(&self, sequences: usize) -> Result<ContextId> {
        let id = ContextId(self.next_id());
        let mut state = self.state.lock().await;
        state.contexts.insert(id, ContextState { sequences, in_use: 0 });
        debug!("Created context {:?} with {} sequences", id, sequences);
        Ok(id)
    }

    async fn dispose_context(&self, context: ContextId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sessions.retain(|_, session| session.context != context);
        state.contexts.remove(&context);
        debug!("Disposed context {:?}", context);
        Ok(())
    }

    async fn create_session(&self, context: ContextId, system_prompt: &str) -> Result<SessionHandle> {
        let id = self.next_id();
        let mut state = self.state.lock().await;
        let ctx = state
            .contexts
            .get_mut(&context)
            .ok_or_else(|| AssistantError::NotFound(format!("Inference context {:?}", context)))?;

        if ctx.in_use >= ctx.sequences {
            return Err(AssistantError::Internal(format!(
                "No free sequence left in context {:?}",
                context
            )));
        }
        ctx.in_use += 1;

        state.sessions.insert(
            id,
            SessionState {
                context,
                history: vec![ChatHistoryItem::System(system_prompt.to_string())],
            },
        );
        Ok(SessionHandle::new(id, context))
    }

    async fn dispose_session(&self, session: &SessionHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(removed) = state.sessions.remove(&session.id) {
            if let Some(ctx) = state.contexts.get_mut(&removed.context) {
                ctx.in_use = ctx.in_use.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn chat_history(&self, session: &SessionHandle) -> Result<Vec<ChatHistoryItem>> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(&session.id)
            .map(|s| s.history.clone())
            .ok_or_else(|| AssistantError::NotFound(format!("Session {}", session.id)))
    }

    async fn set_chat_history(&self, session: &SessionHandle, history: Vec<ChatHistoryItem>) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = state
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| AssistantError::NotFound(format!("Session {}", session.id)))?;
        entry.history = history;
        Ok(())
    }

    async fn prompt(
        &self,
        session: &SessionHandle,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<RawCompletion> {
        let history = self.chat_history(session).await?;
        let completion = self.client.complete(&history, prompt, options).await?;

        let mut state = self.state.lock().await;
        if let Some(entry) = state.sessions.get_mut(&session.id) {
            record_exchange(&mut entry.history, options.duty, prompt, &completion.text);
        }

        Ok(completion)
    }
}

/// Core duties answer each prompt on its own, so their sessions keep the
/// system prompt only.
fn record_exchange(history: &mut Vec<ChatHistoryItem>, duty: DutyKind, prompt: &str, answer: &str) {
    if duty.is_core() {
        history.retain(|item| matches!(item, ChatHistoryItem::System(_)));
        return;
    }
    history.push(ChatHistoryItem::User(prompt.to_string()));
    history.push(ChatHistoryItem::Model(answer.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ChatServerEngine {
        ChatServerEngine::new(ChatClient::new("http://127.0.0.1:9/v1", None, "test-model"), 4096)
    }

    #[tokio::test]
    async fn test_sequences_are_bounded() {
        let engine = engine();
        let context = engine.create_context(2).await.unwrap();

        let first = engine.create_session(context, "a").await.unwrap();
        let _second = engine.create_session(context, "b").await.unwrap();
        assert!(engine.create_session(context, "c").await.is_err());

        engine.dispose_session(&first).await.unwrap();
        assert_eq!(engine.free_sequences(context).await, Some(1));
        assert!(engine.create_session(context, "c").await.is_ok());
    }

    #[test]
    fn test_core_duty_history_stays_bounded() {
        let mut history = vec![ChatHistoryItem::System("system".to_string())];
        for i in 0..50 {
            record_exchange(&mut history, DutyKind::ActionRecognition, &format!("prompt {}", i), "answer");
        }
        assert_eq!(history, vec![ChatHistoryItem::System("system".to_string())]);

        record_exchange(&mut history, DutyKind::Custom, "hi", "hello");
        record_exchange(&mut history, DutyKind::Custom, "again", "sure");
        assert_eq!(history.len(), 5);
        assert_eq!(history[3], ChatHistoryItem::User("again".to_string()));
    }

    #[tokio::test]
    async fn test_session_history_starts_with_system_prompt() {
        let engine = engine();
        let context = engine.create_context(1).await.unwrap();
        let session = engine.create_session(context, "You are helpful").await.unwrap();

        let history = engine.chat_history(&session).await.unwrap();
        assert_eq!(history, vec![ChatHistoryItem::System("You are helpful".to_string())]);

        engine.dispose_context(context).await.unwrap();
        assert!(engine.chat_history(&session).await.is_err());
    }
}
