//! Shell detection and the shell-command tool.

use std::path::PathBuf;
use std::time::Duration;

use bif_types::{CapabilitySet, ToolCapability, ToolIcon};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::process::Command;

use crate::config::ShellConfig;
use crate::process::run_captured;
use crate::{ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args};

/// Detected shell for command execution.
#[derive(Debug, Clone)]
pub struct DetectedShell {
    /// Path or name of the shell binary.
    pub binary: PathBuf,
    /// Arguments to pass before the command (e.g., `["-c"]`).
    pub args: Vec<String>,
    /// Human-readable name for logging.
    pub name: String,
}

impl std::fmt::Display for DetectedShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Detect the shell to run commands with.
///
/// Priority:
/// - Config override (if set)
/// - `$SHELL`, then `bash` on the `PATH`, then `/bin/sh`
#[must_use]
pub fn detect_shell(config: Option<&ShellConfig>) -> DetectedShell {
    if let Some(cfg) = config
        && let Some(binary) = &cfg.binary
    {
        return DetectedShell {
            binary: PathBuf::from(binary),
            args: cfg.args.clone().unwrap_or_else(|| vec!["-c".to_string()]),
            name: "configured".into(),
        };
    }

    if let Ok(shell) = std::env::var("SHELL") {
        let path = std::path::Path::new(&shell);
        if path.exists() {
            let name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("user-shell")
                .to_string();
            return DetectedShell {
                binary: PathBuf::from(&shell),
                args: vec!["-c".to_string()],
                name,
            };
        }
    }

    if let Ok(path) = which::which("bash") {
        return DetectedShell {
            binary: path,
            args: vec!["-c".to_string()],
            name: "bash".into(),
        };
    }

    DetectedShell {
        binary: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string()],
        name: "sh".into(),
    }
}

impl DetectedShell {
    /// A command that runs `script` with this shell in `dir`.
    #[must_use]
    pub fn command(&self, script: &str, dir: &std::path::Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args).arg(script).current_dir(dir);
        cmd
    }
}

pub struct RunShellCommandTool {
    shell: DetectedShell,
    timeout: Duration,
}

impl RunShellCommandTool {
    #[must_use]
    pub fn new(shell: DetectedShell, timeout: Duration) -> Self {
        Self { shell, timeout }
    }
}

#[derive(Deserialize)]
struct RunShellCommandArgs {
    command: String,
}

impl ToolExecutor for RunShellCommandTool {
    fn name(&self) -> &'static str {
        "runShellCommand"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the project root and return its combined stdout and stderr. \
         Use for builds, package managers and anything no other tool covers."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command line to run"
                }
            },
            "required": ["command"]
        })
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[ToolCapability::ExecuteShellCommands])
    }

    fn icon(&self) -> Option<ToolIcon> {
        Some(ToolIcon::Execute)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let args: RunShellCommandArgs = parse_args(&args)?;
            if args.command.trim().is_empty() {
                return Err(ToolError::BadArgs {
                    message: "command must not be empty".to_string(),
                });
            }
            tracing::info!(shell = %self.shell, command = %args.command, "Running shell command");
            let cmd = self.shell.command(&args.command, ctx.project.path());
            let captured = run_captured(cmd, self.name()).await?;
            if captured.success() {
                Ok(captured.output)
            } else {
                let code = captured
                    .exit_code
                    .map_or_else(|| "signal".to_string(), |code| code.to_string());
                Err(ToolError::failed(
                    self.name(),
                    format!(
                        "Command '{}' failed with exit code {code}. Output:\n{}",
                        args.command, captured.output
                    ),
                ))
            }
        })
    }
}
