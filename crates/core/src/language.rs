use async_trait::async_trait;
use rusty_dialogue_common::{AssistantError, Result};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Language-specific service torn down and recreated on a language switch.
#[async_trait]
pub trait LanguageBackend: Send + Sync {
    async fn switch_to(&self, lang: &str) -> Result<()>;

    async fn shutdown(&self) {}
}

/// Long-running helper process started with the language code as its last
/// argument. An empty command makes switching a no-op.
pub struct ProcessLanguageBackend {
    command: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl ProcessLanguageBackend {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            child: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[async_trait]
impl LanguageBackend for ProcessLanguageBackend {
    async fn switch_to(&self, lang: &str) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            debug!("No language backend configured");
            return Ok(());
        };

        let mut current = self.child.lock().await;
        if let Some(mut child) = current.take() {
            debug!("Stopping language backend");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        let child = Command::new(program)
            .args(args)
            .arg(lang)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AssistantError::Internal(format!("Failed to spawn language backend: {}", e)))?;

        info!("Language backend restarted for {}", lang);
        *current = Some(child);
        Ok(())
    }

    async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
