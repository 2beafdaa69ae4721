use rusty_dialogue_common::{
    AssistantError, Result, SkillBridge, SkillExecutionRequest, SkillOutput, SkillOutputEnvelope,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::registry::{SkillEntry, SkillRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl BridgeCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    pub python_bridge: BridgeCommand,
    pub nodejs_bridge: BridgeCommand,
    /// Fallback lookup for native entrypoints not found in the skill directory.
    pub native_bin_dir: Option<PathBuf>,
    pub execution_timeout_ms: u64,
    pub max_output_bytes: usize,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            python_bridge: BridgeCommand::new("python3", &["bridges/python/main.py"]),
            nodejs_bridge: BridgeCommand::new("node", &["bridges/nodejs/main.js"]),
            native_bin_dir: None,
            execution_timeout_ms: 60_000,
            max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SkillResult {
    /// Every answer payload the process wrote, in order.
    pub outputs: Vec<SkillOutput>,
    pub execution_time_ms: u64,
}

impl SkillResult {
    /// The last payload carries the control block and the final widget.
    pub fn last_output(&self) -> Option<&SkillOutput> {
        self.outputs.last()
    }
}

/// Transient request file, removed on every exit path.
struct RequestFile {
    path: PathBuf,
}

impl RequestFile {
    async fn write(dir: &Path, request: &SkillExecutionRequest) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.json", request.id));
        let file = Self { path };
        tokio::fs::write(&file.path, serde_json::to_vec(request)?).await?;
        Ok(file)
    }
}

impl Drop for RequestFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed request file {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove request file {:?}: {}", self.path, e),
        }
    }
}

#[derive(Debug)]
enum Terminal {
    Answered,
    Failed(String),
}

#[derive(Default)]
struct ProcessOutput {
    outputs: Vec<SkillOutput>,
    terminal: Option<Terminal>,
    bytes: usize,
}

impl ProcessOutput {
    fn on_stdout(&mut self, line: &str, on_output: &(dyn Fn(&SkillOutput) + Send + Sync)) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        match serde_json::from_str::<SkillOutputEnvelope>(trimmed) {
            Ok(envelope) => {
                if let Some(Terminal::Failed(_)) = self.terminal {
                    warn!("Ignoring skill answer written after an error");
                    return;
                }
                self.terminal.get_or_insert(Terminal::Answered);
                on_output(&envelope.output);
                self.outputs.push(envelope.output);
            }
            Err(_) => debug!("[skill] {}", trimmed),
        }
    }

    fn on_stderr(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        match &mut self.terminal {
            None => {
                error!("[skill stderr] {}", trimmed);
                self.terminal = Some(Terminal::Failed(trimmed.to_string()));
            }
            Some(Terminal::Failed(message)) => {
                message.push('\n');
                message.push_str(trimmed);
            }
            Some(Terminal::Answered) => warn!("[skill stderr after answer] {}", trimmed),
        }
    }
}

/// Runs one skill action as an external process: the request is written to a
/// transient JSON file whose path is the only argument, stdout carries
/// newline-delimited answers and any stderr output is a failure.
///
/// One execution at a time. A skill that both answers and writes to stderr
/// is judged by whichever came first.
pub struct SkillDispatcher {
    registry: Arc<SkillRegistry>,
    config: SkillsConfig,
    tmp_dir: PathBuf,
    memory_dir: PathBuf,
    in_flight: Mutex<()>,
}

impl SkillDispatcher {
    pub fn new(
        registry: Arc<SkillRegistry>,
        config: SkillsConfig,
        tmp_dir: impl Into<PathBuf>,
        memory_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            config,
            tmp_dir: tmp_dir.into(),
            memory_dir: memory_dir.into(),
            in_flight: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    pub async fn execute(&self, request: &SkillExecutionRequest) -> Result<SkillResult> {
        self.execute_with(request, |_| {}).await
    }

    /// Same as [`execute`](Self::execute), calling `on_output` for each answer
    /// as soon as the process writes it.
    #[instrument(skip(self, request, on_output), fields(action = %format!("{}.{}.{}", request.domain, request.skill, request.action)))]
    pub async fn execute_with(
        &self,
        request: &SkillExecutionRequest,
        on_output: impl Fn(&SkillOutput) + Send + Sync,
    ) -> Result<SkillResult> {
        let _in_flight = self.in_flight.try_lock().map_err(|_| AssistantError::SkillBusy)?;

        let skill = self.registry.skill(&request.domain, &request.skill)?;
        let started = Instant::now();
        let request_file = RequestFile::write(&self.tmp_dir, request).await?;

        let mut command = self.command_for(skill, &request_file.path)?;
        info!(
            "Executing {}.{}.{} via {} bridge",
            request.domain,
            request.skill,
            request.action,
            skill.manifest.bridge.as_str()
        );

        let child = command
            .spawn()
            .map_err(|e| AssistantError::SkillProcess(format!("Failed to spawn skill process: {}", e)))?;

        let timeout = Duration::from_millis(self.config.execution_timeout_ms);
        let run = self.collect(child, &on_output);
        let (output, status) = match tokio::time::timeout(timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                error!("Skill process timed out after {:?}", timeout);
                return Err(AssistantError::SkillProcess(format!(
                    "Skill timed out after {} ms",
                    self.config.execution_timeout_ms
                )));
            }
        };
        drop(request_file);

        let execution_time_ms = started.elapsed().as_millis() as u64;
        match output.terminal {
            Some(Terminal::Answered) => {
                if !status.success() {
                    warn!("Skill answered then exited with {}", status);
                }
                info!("Skill executed in {} ms", execution_time_ms);
                Ok(SkillResult {
                    outputs: output.outputs,
                    execution_time_ms,
                })
            }
            Some(Terminal::Failed(message)) => Err(AssistantError::SkillProcess(message)),
            None if status.success() => {
                debug!("Skill exited without an answer");
                Ok(SkillResult {
                    outputs: Vec::new(),
                    execution_time_ms,
                })
            }
            None => Err(AssistantError::SkillProcess(format!(
                "Skill exited with {}",
                status
            ))),
        }
    }

    // The child is owned here so a timeout drops it, and `kill_on_drop` reaps it.
    async fn collect(
        &self,
        mut child: tokio::process::Child,
        on_output: &(dyn Fn(&SkillOutput) + Send + Sync),
    ) -> Result<(ProcessOutput, ExitStatus)> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AssistantError::SkillProcess("Skill stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AssistantError::SkillProcess("Skill stderr unavailable".to_string()))?;

        // A line is only counted once complete, so each stream is cut one byte
        // past the limit to keep a newline-free flood from buffering forever.
        let stream_limit = self.config.max_output_bytes as u64 + 1;
        let mut stdout_lines = BufReader::new(stdout.take(stream_limit)).lines();
        let mut stderr_lines = BufReader::new(stderr.take(stream_limit)).lines();
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut output = ProcessOutput::default();

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout_lines.next_line(), if stdout_open => match line? {
                    Some(line) => {
                        output.bytes += line.len() + 1;
                        self.check_output_size(output.bytes)?;
                        output.on_stdout(&line, on_output);
                    }
                    None => stdout_open = false,
                },
                line = stderr_lines.next_line(), if stderr_open => match line? {
                    Some(line) => {
                        output.bytes += line.len() + 1;
                        self.check_output_size(output.bytes)?;
                        output.on_stderr(&line);
                    }
                    None => stderr_open = false,
                },
            }
        }

        let status = child.wait().await?;
        Ok((output, status))
    }

    fn check_output_size(&self, bytes: usize) -> Result<()> {
        if bytes > self.config.max_output_bytes {
            return Err(AssistantError::SkillProcess(format!(
                "Skill output exceeded {} bytes",
                self.config.max_output_bytes
            )));
        }
        Ok(())
    }

    fn command_for(&self, skill: &SkillEntry, request_path: &Path) -> Result<Command> {
        let mut command = match skill.manifest.bridge {
            SkillBridge::Python => bridge_command(&self.config.python_bridge),
            SkillBridge::Nodejs => bridge_command(&self.config.nodejs_bridge),
            SkillBridge::Native => Command::new(self.native_executable(skill)?),
        };

        command
            .arg(request_path)
            .env("SKILL_DIR", &skill.dir)
            .env(
                "SKILL_MEMORY_DIR",
                self.memory_dir.join(&skill.domain).join(&skill.name),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(command)
    }

    fn native_executable(&self, skill: &SkillEntry) -> Result<PathBuf> {
        let entrypoint = skill.manifest.entrypoint.as_deref().ok_or_else(|| {
            AssistantError::Configuration(format!(
                "Native skill {}.{} declares no entrypoint",
                skill.domain, skill.name
            ))
        })?;

        let local = skill.dir.join(entrypoint);
        if local.exists() {
            return Ok(local);
        }
        if let Some(bin_dir) = &self.config.native_bin_dir {
            let fallback = bin_dir.join(entrypoint);
            if fallback.exists() {
                return Ok(fallback);
            }
        }

        Err(AssistantError::Configuration(format!(
            "Entrypoint {} of skill {}.{} not found",
            entrypoint, skill.domain, skill.name
        )))
    }
}

fn bridge_command(bridge: &BridgeCommand) -> Command {
    let mut command = Command::new(&bridge.program);
    command.args(&bridge.args);
    command
}
