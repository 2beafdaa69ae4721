use async_trait::async_trait;
use rusty_dialogue_common::{AssistantError, Result};
use std::sync::Arc;

use crate::engine::InferenceEngine;
use crate::provider::{CompletionBackend, CompletionOptions, RawCompletion};

/// Runs completions on a session of the in-process engine.
pub struct LocalBackend {
    engine: Arc<dyn InferenceEngine>,
}

impl LocalBackend {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl CompletionBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "Local LLM Provider"
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<RawCompletion> {
        let session = options
            .session
            .as_ref()
            .ok_or_else(|| AssistantError::Configuration("Session is not defined".to_string()))?;

        let _in_use = session.acquire().await;
        self.engine.prompt(session, prompt, options).await
    }
}
