//! Local diff tool backed by the `git` CLI.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use bif_types::{CapabilitySet, ToolCapability, ToolIcon};
use serde_json::{Value, json};
use similar::TextDiff;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::process::ChildGuard;
use super::{ToolCtx, ToolError, ToolExecutor, ToolFut};

const TOOL_NAME: &str = "showLocalDiff";
const NO_CHANGES: &str = "No changes found.";

/// Untracked files above this size are listed but not inlined.
const MAX_UNTRACKED_INLINE_BYTES: u64 = 256 * 1024;

#[derive(Debug)]
struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

async fn run_git(working_dir: &Path, subcommand_args: &[&str]) -> Result<GitOutput, ToolError> {
    let git_bin = which::which("git")
        .map_err(|_| ToolError::failed(TOOL_NAME, "git not found in PATH"))?;

    let mut args: Vec<&str> = vec!["--no-pager", "-c", "color.ui=false"];
    // External diff drivers and textconv filters can run arbitrary programs.
    if let Some((&"diff", rest)) = subcommand_args.split_first() {
        args.extend(["diff", "--no-ext-diff", "--no-textconv"]);
        args.extend(rest);
    } else {
        args.extend(subcommand_args);
    }

    let mut cmd = Command::new(&git_bin);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .current_dir(working_dir);

    #[cfg(unix)]
    super::process::set_new_session(&mut cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| ToolError::failed(TOOL_NAME, format!("failed to spawn git: {e}")))?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut guard = ChildGuard::new(child);

    let (stdout, stderr) = tokio::join!(read_all(stdout), read_all(stderr));
    let (stdout, stderr) = (stdout?, stderr?);
    let status = guard
        .wait()
        .await
        .map_err(|e| ToolError::failed(TOOL_NAME, e.to_string()))?;

    Ok(GitOutput {
        success: status.success(),
        stdout,
        stderr,
    })
}

async fn read_all<R>(reader: Option<R>) -> Result<String, ToolError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| ToolError::failed(TOOL_NAME, format!("failed to read git output: {e}")))?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Unified diff presenting an untracked file as newly added.
fn synthesize_new_file_diff(relative: &str, content: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "diff --git a/{relative} b/{relative}");
    out.push_str("new file mode 100644\n");
    let new_header = format!("b/{relative}");
    let diff = TextDiff::from_lines("", content);
    let mut unified = diff.unified_diff();
    unified.context_radius(3).header("/dev/null", &new_header);
    let _ = write!(out, "{unified}");
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

async fn untracked_diffs(root: &Path) -> Result<String, ToolError> {
    let listing = run_git(root, &["ls-files", "--others", "--exclude-standard", "-z"]).await?;
    if !listing.success {
        return Err(ToolError::failed(TOOL_NAME, listing.stderr.trim().to_string()));
    }
    let mut out = String::new();
    for relative in listing.stdout.split('\0').filter(|p| !p.is_empty()) {
        let path: PathBuf = root.join(relative);
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            continue;
        };
        if meta.len() > MAX_UNTRACKED_INLINE_BYTES {
            let _ = writeln!(
                out,
                "diff --git a/{relative} b/{relative}\nnew file mode 100644\n(new file, {} bytes, not shown)",
                meta.len()
            );
            continue;
        }
        let Ok(bytes) = tokio::fs::read(&path).await else {
            continue;
        };
        if bytes.contains(&0) {
            let _ = writeln!(
                out,
                "diff --git a/{relative} b/{relative}\nnew file mode 100644\nBinary file"
            );
            continue;
        }
        out.push_str(&synthesize_new_file_diff(
            relative,
            &String::from_utf8_lossy(&bytes),
        ));
    }
    Ok(out)
}

/// Diff of tracked changes against `HEAD`, plus untracked files as additions.
pub async fn local_diff(root: &Path) -> Result<String, ToolError> {
    let work_tree = run_git(root, &["rev-parse", "--is-inside-work-tree"]).await?;
    if !work_tree.success {
        return Err(ToolError::failed(
            TOOL_NAME,
            format!("not a git repository: {}", work_tree.stderr.trim()),
        ));
    }

    let mut tracked = run_git(root, &["diff", "HEAD"]).await?;
    if !tracked.success {
        // No commits yet: compare the index instead.
        tracked = run_git(root, &["diff", "--cached"]).await?;
        if !tracked.success {
            return Err(ToolError::failed(TOOL_NAME, tracked.stderr.trim().to_string()));
        }
    }

    let mut combined = tracked.stdout;
    if !combined.is_empty() && !combined.ends_with('\n') {
        combined.push('\n');
    }
    combined.push_str(&untracked_diffs(root).await?);

    if combined.trim().is_empty() {
        return Ok(NO_CHANGES.to_string());
    }
    Ok(combined.trim_end().to_string())
}

#[derive(Debug)]
pub struct ShowLocalDiffTool {
    timeout: Duration,
}

impl ShowLocalDiffTool {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ToolExecutor for ShowLocalDiffTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Show uncommitted local changes as a unified diff, including untracked files."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[ToolCapability::ReadOnly])
    }

    fn icon(&self) -> Option<ToolIcon> {
        Some(ToolIcon::Diff)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute<'a>(&'a self, _args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move { local_diff(ctx.project.path()).await })
    }
}
