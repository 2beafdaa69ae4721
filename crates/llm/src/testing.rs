use async_trait::async_trait;
use rusty_dialogue_common::{AssistantError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::engine::{ContextId, InferenceEngine, SessionHandle};
use crate::provider::{ChatHistoryItem, CompletionOptions, RawCompletion};

type Responder = Box<dyn Fn(&str, &CompletionOptions) -> String + Send + Sync>;

#[derive(Default)]
struct FakeState {
    contexts: HashMap<ContextId, (usize, usize)>,
    histories: HashMap<u64, (ContextId, Vec<ChatHistoryItem>)>,
    created_sessions: usize,
    created_contexts: usize,
    disposed_sessions: Vec<u64>,
    disposed_contexts: usize,
    prompts: Vec<(u64, String)>,
}

/// Engine double with the same sequence accounting as the real one.
pub struct FakeEngine {
    next_id: AtomicU64,
    state: Mutex<FakeState>,
    responder: Responder,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::with_responder(|prompt, _| format!("echo: {}", prompt))
    }

    pub fn with_responder(
        responder: impl Fn(&str, &CompletionOptions) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(FakeState::default()),
            responder: Box::new(responder),
        }
    }

    pub fn created_sessions(&self) -> usize {
        self.state.lock().unwrap().created_sessions
    }

    pub fn created_contexts(&self) -> usize {
        self.state.lock().unwrap().created_contexts
    }

    pub fn disposed_sessions(&self) -> Vec<u64> {
        self.state.lock().unwrap().disposed_sessions.clone()
    }

    pub fn disposed_contexts(&self) -> usize {
        self.state.lock().unwrap().disposed_contexts
    }

    pub fn prompts(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().prompts.clone()
    }

    pub fn history_of(&self, session: &SessionHandle) -> Vec<ChatHistoryItem> {
        self.state
            .lock()
            .unwrap()
            .histories
            .get(&session.id)
            .map(|(_, history)| history.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl InferenceEngine for FakeEngine {
    fn context_size(&self) -> u32 {
        2048
    }

    async fn create_context(&self, sequences: usize) -> Result<ContextId> {
        let id = ContextId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock().unwrap();
        state.contexts.insert(id, (sequences, 0));
        state.created_contexts += 1;
        Ok(id)
    }

    async fn dispose_context(&self, context: ContextId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.contexts.remove(&context);
        state.disposed_contexts += 1;
        Ok(())
    }

    async fn create_session(&self, context: ContextId, system_prompt: &str) -> Result<SessionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let (sequences, in_use) = state
            .contexts
            .get_mut(&context)
            .ok_or_else(|| AssistantError::NotFound("context".to_string()))?;
        if *in_use >= *sequences {
            return Err(AssistantError::Internal("No free sequence".to_string()));
        }
        *in_use += 1;
        state.created_sessions += 1;
        state
            .histories
            .insert(id, (context, vec![ChatHistoryItem::System(system_prompt.to_string())]));
        Ok(SessionHandle::new(id, context))
    }

    async fn dispose_session(&self, session: &SessionHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some((context, _)) = state.histories.remove(&session.id) {
            if let Some((_, in_use)) = state.contexts.get_mut(&context) {
                *in_use = in_use.saturating_sub(1);
            }
        }
        state.disposed_sessions.push(session.id);
        Ok(())
    }

    async fn chat_history(&self, session: &SessionHandle) -> Result<Vec<ChatHistoryItem>> {
        let state = self.state.lock().unwrap();
        state
            .histories
            .get(&session.id)
            .map(|(_, history)| history.clone())
            .ok_or_else(|| AssistantError::NotFound("session".to_string()))
    }

    async fn set_chat_history(&self, session: &SessionHandle, history: Vec<ChatHistoryItem>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .histories
            .get_mut(&session.id)
            .ok_or_else(|| AssistantError::NotFound("session".to_string()))?;
        entry.1 = history;
        Ok(())
    }

    async fn prompt(
        &self,
        session: &SessionHandle,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<RawCompletion> {
        let text = (self.responder)(prompt, options);
        if let Some(on_token) = &options.on_token {
            for token in text.split_inclusive(' ') {
                on_token(token);
            }
        }
        self.state
            .lock()
            .unwrap()
            .prompts
            .push((session.id, prompt.to_string()));

        Ok(RawCompletion {
            text,
            used_input_tokens: prompt.len() as u32,
            used_output_tokens: 1,
        })
    }
}
