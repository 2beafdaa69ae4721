use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Events pushed to the connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutputEvent {
    IsTyping(bool),
    Answer(String),
    Suggest(Vec<String>),
    Widget(serde_json::Value),
    TtsInterruption,
    LlmToken {
        token: String,
        #[serde(rename = "generationId")]
        generation_id: String,
    },
    NewMood {
        #[serde(rename = "type")]
        mood: String,
        emoji: String,
    },
    AskToRepeat(String),
}

impl OutputEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutputEvent::IsTyping(_) => "is-typing",
            OutputEvent::Answer(_) => "answer",
            OutputEvent::Suggest(_) => "suggest",
            OutputEvent::Widget(_) => "widget",
            OutputEvent::TtsInterruption => "tts-interruption",
            OutputEvent::LlmToken { .. } => "llm-token",
            OutputEvent::NewMood { .. } => "new-mood",
            OutputEvent::AskToRepeat(_) => "ask-to-repeat",
        }
    }
}

pub trait OutputChannel: Send + Sync {
    fn emit(&self, event: OutputEvent);
}

pub struct NullOutputChannel;

impl OutputChannel for NullOutputChannel {
    fn emit(&self, _event: OutputEvent) {}
}

/// Keeps every emitted event in memory.
#[derive(Default)]
pub struct RecordingOutputChannel {
    events: Mutex<Vec<OutputEvent>>,
}

impl RecordingOutputChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutputEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn answers(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                OutputEvent::Answer(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl OutputChannel for RecordingOutputChannel {
    fn emit(&self, event: OutputEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let value = serde_json::to_value(OutputEvent::IsTyping(true)).unwrap();
        assert_eq!(value, serde_json::json!({ "event": "is-typing", "data": true }));

        let value = serde_json::to_value(OutputEvent::LlmToken {
            token: "Hel".to_string(),
            generation_id: "abcdef".to_string(),
        })
        .unwrap();
        assert_eq!(value["event"], "llm-token");
        assert_eq!(value["data"]["generationId"], "abcdef");

        let value = serde_json::to_value(OutputEvent::TtsInterruption).unwrap();
        assert_eq!(value["event"], OutputEvent::TtsInterruption.name());
    }

    #[test]
    fn test_recording_channel() {
        let channel = RecordingOutputChannel::new();
        channel.emit(OutputEvent::Answer("one".to_string()));
        channel.emit(OutputEvent::IsTyping(false));
        channel.emit(OutputEvent::Answer("two".to_string()));

        assert_eq!(channel.answers(), vec!["one", "two"]);
        channel.clear();
        assert!(channel.events().is_empty());
    }
}
