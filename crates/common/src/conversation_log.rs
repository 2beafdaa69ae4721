use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Owner,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationLogEntry {
    pub speaker: Speaker,
    pub message: String,
    pub sent_at: i64,
}

#[derive(Debug, Clone)]
pub struct ConversationLoggerSettings {
    pub logger_name: String,
    pub file_path: PathBuf,
    pub nb_of_logs_to_keep: usize,
    pub nb_of_logs_to_load: usize,
}

/// Capped JSON array file of conversation turns. The oldest entry is evicted
/// once the cap is reached.
pub struct ConversationLogger {
    settings: ConversationLoggerSettings,
    write_lock: Mutex<()>,
}

impl ConversationLogger {
    pub fn new(settings: ConversationLoggerSettings) -> Self {
        Self {
            settings,
            write_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.logger_name
    }

    pub fn default_load_size(&self) -> usize {
        self.settings.nb_of_logs_to_load
    }

    pub async fn push(&self, speaker: Speaker, message: impl Into<String>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut logs = self.read_all().await?;

        let keep = self.settings.nb_of_logs_to_keep.max(1);
        if logs.len() >= keep {
            let excess = logs.len() + 1 - keep;
            logs.drain(0..excess);
        }

        logs.push(ConversationLogEntry {
            speaker,
            message: message.into(),
            sent_at: chrono::Utc::now().timestamp_millis(),
        });

        self.write_all(&logs).await?;
        debug!("{}: {} entries stored", self.settings.logger_name, logs.len());
        Ok(())
    }

    /// Returns the most recent entries, oldest first.
    pub async fn load(&self, limit: Option<usize>) -> Result<Vec<ConversationLogEntry>> {
        let _guard = self.write_lock.lock().await;
        let logs = self.read_all().await?;
        let limit = limit.unwrap_or(self.settings.nb_of_logs_to_load);
        let skip = logs.len().saturating_sub(limit);
        Ok(logs.into_iter().skip(skip).collect())
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_all(&[]).await
    }

    async fn read_all(&self) -> Result<Vec<ConversationLogEntry>> {
        let content = match fs::read_to_string(&self.settings.file_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str(&content) {
            Ok(logs) => Ok(logs),
            Err(e) => {
                warn!(
                    "{}: unreadable log file {:?}, starting over: {}",
                    self.settings.logger_name, self.settings.file_path, e
                );
                Ok(Vec::new())
            }
        }
    }

    async fn write_all(&self, logs: &[ConversationLogEntry]) -> Result<()> {
        if let Some(parent) = self.settings.file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(logs)?;
        fs::write(&self.settings.file_path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(dir: &tempfile::TempDir, keep: usize) -> ConversationLogger {
        ConversationLogger::new(ConversationLoggerSettings {
            logger_name: "test".to_string(),
            file_path: dir.path().join("logs").join("conversation_log.json"),
            nb_of_logs_to_keep: keep,
            nb_of_logs_to_load: 2,
        })
    }

    #[tokio::test]
    async fn test_push_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(&dir, 3);

        for i in 0..5 {
            logger.push(Speaker::Owner, format!("message {}", i)).await.unwrap();
        }

        let logs = logger.load(Some(10)).await.unwrap();
        let messages: Vec<_> = logs.iter().map(|log| log.message.as_str()).collect();
        assert_eq!(messages, vec!["message 2", "message 3", "message 4"]);
    }

    #[tokio::test]
    async fn test_load_default_limit_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(&dir, 10);
        assert!(logger.load(None).await.unwrap().is_empty());

        logger.push(Speaker::Owner, "hi").await.unwrap();
        logger.push(Speaker::Assistant, "hello").await.unwrap();
        logger.push(Speaker::Owner, "how are you").await.unwrap();

        let logs = logger.load(None).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].speaker, Speaker::Assistant);
        assert_eq!(logs[1].message, "how are you");

        logger.clear().await.unwrap();
        assert!(logger.load(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_file_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger(&dir, 10);
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::write(dir.path().join("logs").join("conversation_log.json"), "[{oops").unwrap();

        logger.push(Speaker::Owner, "fresh").await.unwrap();
        let logs = logger.load(None).await.unwrap();
        assert_eq!(logs.len(), 1);
    }
}
