//! Configuration types used by tool executors.
//!
//! The engine owns the `[tools]` table of `config.toml` and hands the parsed
//! values down here, so this crate never reads files itself.

use std::time::Duration;

use serde::Deserialize;

/// Per-tool-family deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolTimeouts {
    /// File reads, writes, listings and diffs.
    pub default: Duration,
    pub search: Duration,
    pub tests: Duration,
    pub shell: Duration,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(10),
            search: Duration::from_secs(10),
            tests: Duration::from_secs(300),
            shell: Duration::from_secs(1000),
        }
    }
}

/// Shell configuration for command execution.
///
/// ```toml
/// [tools.shell]
/// binary = "zsh"
/// args = ["-c"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ShellConfig {
    /// Override shell binary (e.g., "bash", "/usr/local/bin/fish").
    pub binary: Option<String>,
    /// Override shell args (e.g., `["-c"]`).
    pub args: Option<Vec<String>>,
}

pub const DEFAULT_MAX_SEARCH_RESULTS: usize = 75;
pub const DEFAULT_TEST_COMMAND: &str = "./gradlew test --tests {target}";

/// Everything the built-in tools need to know about their environment.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub timeouts: ToolTimeouts,
    /// Text-search hits returned before the search stops.
    pub max_search_results: usize,
    /// Test command template. `{target}`, `{class}` and `{method}` are substituted.
    pub test_command: String,
    pub shell: ShellConfig,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            timeouts: ToolTimeouts::default(),
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
            test_command: DEFAULT_TEST_COMMAND.to_string(),
            shell: ShellConfig::default(),
        }
    }
}
