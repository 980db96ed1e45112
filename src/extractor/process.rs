//! Launching the extraction tool and reading its diagnostic output

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::error::{ExtractorError, Result};
use crate::config::ExtractorConfig;

/// Upper bound on diagnostic text kept for error reporting; older output is dropped first
const MAX_CAPTURED_BYTES: usize = 64 * 1024;
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How to launch the extraction tool: a program plus arguments prepended to every call
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    base_args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self::new(config.program.clone(), config.base_args.clone())
    }

    /// Spawns the tool with piped stdout/stderr and no stdin.
    ///
    /// The child is killed if its handle is dropped, so an abandoned
    /// invocation never outlives its caller. On Unix it leads its own process
    /// group, which [`terminate`] signals as a whole.
    pub fn spawn<I, S>(&self, args: I) -> Result<Child>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| ExtractorError::SpawnFailure {
            program: self.program.clone(),
            source,
        })?;

        debug!(program = %self.program, pid = ?child.id(), "Spawned extraction tool");
        Ok(child)
    }
}

/// Forcibly stops the child, together with any helpers it started
/// (ffmpeg, a python interpreter's subprocesses), and reaps it
pub async fn terminate(child: &mut Child) {
    let pid = child.id();
    #[cfg(unix)]
    if let Some(pid) = pid {
        kill_process_group(pid);
    }
    match child.kill().await {
        Ok(()) => debug!(?pid, "Extraction tool terminated"),
        Err(e) => warn!(?pid, error = %e, "Failed to terminate extraction tool"),
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory of ours
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "Process group already gone");
    }
}

/// Reads a diagnostic stream to its end, handing every non-empty line to `on_line`.
///
/// Lines are split on both `\n` and `\r` since progress output rewrites the
/// current line with carriage returns. Returns the captured text (tail only).
pub async fn read_lines<R, F>(mut reader: R, mut on_line: F) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut pending = Vec::new();
    let mut captured = CapturedText::default();

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        for &byte in &chunk[..n] {
            if byte == b'\n' || byte == b'\r' {
                flush_line(&mut pending, &mut on_line, &mut captured);
            } else {
                pending.push(byte);
            }
        }
    }
    flush_line(&mut pending, &mut on_line, &mut captured);

    Ok(captured.text)
}

fn flush_line<F: FnMut(&str)>(pending: &mut Vec<u8>, on_line: &mut F, captured: &mut CapturedText) {
    if pending.is_empty() {
        return;
    }

    let line = String::from_utf8_lossy(pending);
    let line = line.trim_end();
    if !line.is_empty() {
        on_line(line);
        captured.push(line);
    }
    pending.clear();
}

#[derive(Default)]
struct CapturedText {
    text: String,
}

impl CapturedText {
    fn push(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');

        if self.text.len() > MAX_CAPTURED_BYTES {
            let mut cut = self.text.len() - MAX_CAPTURED_BYTES;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
        }
    }
}

/// Condenses captured diagnostics into a single error message
pub fn failure_message(stderr: &str, status: std::process::ExitStatus) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        match status.code() {
            Some(code) => format!("extraction tool exited with code {code}"),
            None => "extraction tool was terminated by a signal".to_string(),
        }
    } else {
        trimmed.to_string()
    }
}
