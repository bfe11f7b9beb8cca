//! Shared subprocess management utilities.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use super::ToolError;

/// Output cap for captured subprocess output. Bytes past the cap are drained
/// and discarded so the child never blocks on a full pipe.
pub const MAX_CAPTURED_BYTES: usize = 512 * 1024;

/// RAII guard that kills a child process (and its process group on Unix) on drop.
///
/// Wrap a spawned `tokio::process::Child` immediately after `spawn()` so that a
/// tool cancelled by its deadline takes its subprocess tree down with it.
pub struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    /// Wait for the child to exit. After a successful wait the guard is disarmed.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let Some(child) = self.child.as_mut() else {
            return Err(std::io::Error::other("child process already reaped"));
        };
        let status = child.wait().await?;
        self.child = None;
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        #[cfg(unix)]
        {
            if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
                // SAFETY: killpg has no memory-safety preconditions.
                unsafe {
                    if libc::killpg(pid, libc::SIGKILL) == -1 {
                        let _ = child.start_kill();
                    }
                }
            }
            let _ = child.try_wait();
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
            let _ = child.try_wait();
        }
    }
}

/// Put the child process in its own session (Unix only) so the entire process
/// group can be killed via `killpg` in `ChildGuard::drop`.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut Command) {
    // SAFETY: the closure only calls async-signal-safe functions.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Exit status and interleaved stdout/stderr of a finished subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub output: String,
    pub truncated: bool,
}

impl CapturedOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run a command to completion, merging stdout and stderr in arrival order.
pub async fn run_captured(mut cmd: Command, tool: &str) -> Result<CapturedOutput, ToolError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    set_new_session(&mut cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| ToolError::failed(tool, format!("failed to spawn process: {e}")))?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut guard = ChildGuard::new(child);

    let (bytes, truncated) = read_interleaved(stdout, stderr, MAX_CAPTURED_BYTES).await;
    let status = guard
        .wait()
        .await
        .map_err(|e| ToolError::failed(tool, e.to_string()))?;

    let mut output = String::from_utf8_lossy(&bytes).into_owned();
    if truncated {
        output.push_str("\n... output truncated");
    }
    Ok(CapturedOutput {
        exit_code: status.code(),
        output,
        truncated,
    })
}

#[derive(Clone, Copy)]
enum Stream {
    A,
    B,
}

async fn read_interleaved<A, B>(a: Option<A>, b: Option<B>, max_bytes: usize) -> (Vec<u8>, bool)
where
    A: AsyncRead + Unpin,
    B: AsyncRead + Unpin,
{
    let mut out = Vec::new();
    let mut truncated = false;
    let mut a = a;
    let mut b = b;
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];

    while a.is_some() || b.is_some() {
        let read = tokio::select! {
            n = read_some(a.as_mut(), &mut buf_a), if a.is_some() => (Stream::A, n),
            n = read_some(b.as_mut(), &mut buf_b), if b.is_some() => (Stream::B, n),
        };
        let chunk = match read {
            (Stream::A, Some(n)) => &buf_a[..n],
            (Stream::B, Some(n)) => &buf_b[..n],
            (Stream::A, None) => {
                a = None;
                continue;
            }
            (Stream::B, None) => {
                b = None;
                continue;
            }
        };
        let remaining = max_bytes.saturating_sub(out.len());
        if chunk.len() > remaining {
            truncated = true;
        }
        out.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
    }
    (out, truncated)
}

/// Read one chunk. `None` on EOF or error.
async fn read_some<R: AsyncRead + Unpin>(reader: Option<&mut R>, buf: &mut [u8]) -> Option<usize> {
    let reader = reader?;
    match reader.read(buf).await {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}
