use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionResponseFormat, ChatCompletionResponseFormatType,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
    Client,
};
use futures::StreamExt;
use rusty_dialogue_common::{AssistantError, Result};
use tracing::debug;

use crate::provider::{ChatHistoryItem, CompletionOptions, RawCompletion};

/// OpenAI-compatible chat completion client, used for hosted providers and
/// for local inference servers alike.
pub struct ChatClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl ChatClient {
    pub fn new(base_url: &str, api_key: Option<&str>, model: impl Into<String>) -> Self {
        let mut config = OpenAIConfig::new().with_api_base(base_url);
        if let Some(key) = api_key {
            config = config.with_api_key(key);
        }

        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// `conversation` starts with the system message; `prompt` is the new user turn.
    pub async fn complete(
        &self,
        conversation: &[ChatHistoryItem],
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<RawCompletion> {
        let messages = build_messages(conversation, prompt, options)?;

        let mut request = CreateChatCompletionRequestArgs::default();
        request
            .model(&self.model)
            .messages(messages)
            .max_tokens(options.max_tokens)
            .temperature(options.temperature);
        if options.is_json_mode() {
            request.response_format(ChatCompletionResponseFormat {
                r#type: ChatCompletionResponseFormatType::JsonObject,
            });
        }
        let request = request.build().map_err(map_openai_error)?;

        match &options.on_token {
            Some(on_token) => self.complete_streaming(request, on_token.as_ref()).await,
            None => self.complete_once(request).await,
        }
    }

    async fn complete_once(&self, request: CreateChatCompletionRequest) -> Result<RawCompletion> {
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AssistantError::MalformedOutput("Completion returned no choices".to_string()))?;

        let (used_input_tokens, used_output_tokens) = response
            .usage
            .map(|usage| (usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or_default();

        Ok(RawCompletion {
            text,
            used_input_tokens,
            used_output_tokens,
        })
    }

    async fn complete_streaming(
        &self,
        request: CreateChatCompletionRequest,
        on_token: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<RawCompletion> {
        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(map_openai_error)?;

        let mut text = String::new();
        let mut chunks = 0u32;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_openai_error)?;
            for choice in chunk.choices {
                if let Some(token) = choice.delta.content {
                    on_token(&token);
                    text.push_str(&token);
                    chunks += 1;
                }
            }
        }

        debug!("Streamed {} chunks", chunks);
        Ok(RawCompletion {
            text,
            used_input_tokens: 0,
            used_output_tokens: chunks,
        })
    }
}

pub fn json_mode_system_prompt(system_prompt: &str, schema: &serde_json::Value) -> String {
    format!(
        "{}. Use a JSON format by following this schema: {}",
        system_prompt, schema
    )
}

fn build_messages(
    conversation: &[ChatHistoryItem],
    prompt: &str,
    options: &CompletionOptions,
) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);

    for item in conversation {
        let message = match item {
            ChatHistoryItem::System(content) => {
                let content = match &options.schema {
                    Some(schema) => json_mode_system_prompt(content, schema),
                    None => content.clone(),
                };
                ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(content)
                        .build()
                        .map_err(map_openai_error)?,
                )
            }
            ChatHistoryItem::User(content) => ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(content.clone())
                    .build()
                    .map_err(map_openai_error)?,
            ),
            ChatHistoryItem::Model(content) => ChatCompletionRequestMessage::Assistant(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content.clone())
                    .build()
                    .map_err(map_openai_error)?,
            ),
        };
        messages.push(message);
    }

    messages.push(ChatCompletionRequestMessage::User(
        ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(map_openai_error)?,
    ));

    Ok(messages)
}

fn map_openai_error(error: OpenAIError) -> AssistantError {
    match error {
        OpenAIError::InvalidArgument(message) => AssistantError::Configuration(message),
        OpenAIError::JSONDeserialize(e) => AssistantError::MalformedOutput(e.to_string()),
        other => AssistantError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::DutyKind;

    #[test]
    fn test_json_mode_system_prompt() {
        let prompt = json_mode_system_prompt(
            "You extract entities",
            &serde_json::json!({ "list_name": { "type": "string" } }),
        );
        assert!(prompt.starts_with("You extract entities. Use a JSON format"));
        assert!(prompt.contains("\"list_name\""));
    }

    #[test]
    fn test_build_messages_appends_prompt() {
        let options = CompletionOptions::new(DutyKind::Conversation, "system");
        let conversation = vec![
            ChatHistoryItem::System("system".to_string()),
            ChatHistoryItem::User("hi".to_string()),
            ChatHistoryItem::Model("hello".to_string()),
        ];

        let messages = build_messages(&conversation, "how are you?", &options).unwrap();
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(messages[3], ChatCompletionRequestMessage::User(_)));
    }
}
