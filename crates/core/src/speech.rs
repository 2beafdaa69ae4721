use regex::Regex;
use rusty_dialogue_common::{OutputChannel, OutputEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

fn html_tag() -> &'static Regex {
    static HTML_TAG: OnceLock<Regex> = OnceLock::new();
    HTML_TAG.get_or_init(|| Regex::new(r"<[^>]*>").unwrap_or_else(|e| unreachable!("static regex: {}", e)))
}

pub fn strip_html(text: &str) -> String {
    html_tag().replace_all(text, "").trim().to_string()
}

/// Pending speech for the synthesizer. Only filled while the owner talks
/// with their voice.
pub struct SpeechQueue {
    pending: Mutex<VecDeque<String>>,
    talking_with_voice: AtomicBool,
    output: Arc<dyn OutputChannel>,
}

impl SpeechQueue {
    pub fn new(output: Arc<dyn OutputChannel>) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            talking_with_voice: AtomicBool::new(false),
            output,
        }
    }

    pub fn set_talking_with_voice(&self, talking: bool) {
        self.talking_with_voice.store(talking, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.talking_with_voice.load(Ordering::SeqCst)
    }

    pub fn push(&self, speech: &str) {
        if !self.is_active() {
            return;
        }
        let speech = strip_html(speech);
        if speech.is_empty() {
            return;
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(speech);
        }
    }

    pub fn pop(&self) -> Option<String> {
        self.pending.lock().ok().and_then(|mut pending| pending.pop_front())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|pending| pending.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops pending speech and tells the client to stop talking.
    pub fn interrupt(&self) {
        if !self.is_active() {
            return;
        }
        if let Ok(mut pending) = self.pending.lock() {
            debug!("Interrupting speech, {} pending dropped", pending.len());
            pending.clear();
        }
        self.output.emit(OutputEvent::TtsInterruption);
    }
}
