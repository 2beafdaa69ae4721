use async_trait::async_trait;
use rusty_dialogue_common::Result;

use crate::chat::ChatClient;
use crate::provider::{ChatHistoryItem, CompletionBackend, CompletionOptions, RawCompletion};

/// Hosted OpenAI-compatible provider. Stateless: the system prompt and any
/// history travel with every request.
pub struct RemoteBackend {
    client: ChatClient,
}

impl RemoteBackend {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CompletionBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "Remote LLM Provider"
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<RawCompletion> {
        let mut conversation = Vec::with_capacity(options.history.len() + 1);
        conversation.push(ChatHistoryItem::System(options.system_prompt.clone()));
        conversation.extend(
            options
                .history
                .iter()
                .filter(|item| !matches!(item, ChatHistoryItem::System(_)))
                .cloned(),
        );

        self.client.complete(&conversation, prompt, options).await
    }
}
