//! Spawning the probe tool and reading its output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Split};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::dialect::Dialect;
use super::session::{EventSink, ProbeSession};
use super::target::{resolve_target, HostLookup};
use super::{ProbeError, ProbeOptions, ProbeRequest, ResolvedTarget};

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Starts probe processes.
#[derive(Debug, Clone, Default)]
pub struct ProbeLauncher {
    /// Replaces the dialect's program name when set.
    program: Option<String>,
    /// Applied when a request carries no count.
    default_count: Option<u32>,
}

impl ProbeLauncher {
    pub fn new(program: Option<String>, default_count: Option<u32>) -> Self {
        Self {
            program,
            default_count,
        }
    }

    /// Validate, resolve and launch `request`, ready to stream into `sink`.
    ///
    /// Nothing is spawned unless every check passes.
    pub async fn open(
        &self,
        request: &ProbeRequest,
        lookup: &dyn HostLookup,
        sink: &dyn EventSink,
    ) -> Result<ProbeSession, ProbeError> {
        if !sink.supports_streaming() {
            return Err(ProbeError::StreamUnsupported);
        }
        request.validate()?;

        let target = resolve_target(&request.target, request.family, lookup).await?;
        let dialect = Dialect::host(target.is_ipv6());

        let mut options = request.options.clone();
        if options.count.is_none() {
            options.count = self.default_count;
        }

        let process = self.start(&target, &options, dialect)?;
        Ok(ProbeSession::new(target, dialect, process))
    }

    /// Spawn the probe tool for `target` using `dialect`'s flags.
    pub fn start(
        &self,
        target: &ResolvedTarget,
        options: &ProbeOptions,
        dialect: &'static Dialect,
    ) -> Result<ProbeProcess, ProbeError> {
        let program = self.program.as_deref().unwrap_or(dialect.program);
        let args = dialect.build_args(target, options);
        info!(%program, dialect = dialect.name, ?args, "starting probe");

        let mut cmd = Command::new(program);
        cmd.args(&args);
        ProbeProcess::spawn(cmd)
    }
}

/// A running probe tool with its stdout and stderr merged into one line
/// stream. The stream ends once both pipes close.
pub struct ProbeProcess {
    child: Option<Child>,
    pid: Option<u32>,
    stdout: Option<Split<BufReader<ChildStdout>>>,
    stderr: Option<Split<BufReader<ChildStderr>>>,
}

impl ProbeProcess {
    pub fn spawn(mut cmd: Command) -> Result<Self, ProbeError> {
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProbeError::Launch(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProbeError::Launch("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProbeError::Launch("stderr not captured".to_string()))?;

        let pid = child.id();
        debug!(?pid, "probe process spawned");

        Ok(Self {
            child: Some(child),
            pid,
            stdout: Some(BufReader::new(stdout).split(b'\n')),
            stderr: Some(BufReader::new(stderr).split(b'\n')),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next output line from either pipe, `None` at end of output.
    ///
    /// Invalid UTF-8 is replaced, never fatal. Cancel safe.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            let (segment, from_stdout) = tokio::select! {
                seg = next_segment(&mut self.stdout), if self.stdout.is_some() => (seg, true),
                seg = next_segment(&mut self.stderr), if self.stderr.is_some() => (seg, false),
                else => return None,
            };
            match segment {
                Some(bytes) => return Some(decode_line(&bytes)),
                None if from_stdout => self.stdout = None,
                None => self.stderr = None,
            }
        }
    }

    /// Wait for the process to exit and reap it.
    pub async fn wait(&mut self) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match child.wait().await {
            Ok(status) => {
                self.child = None;
                Some(status)
            }
            Err(e) => {
                warn!(error = %e, pid = ?self.pid, "failed to wait for probe process");
                self.child = None;
                None
            }
        }
    }

    /// Terminate (SIGTERM, then kill after a grace period) and reap.
    pub async fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            terminate_child(&mut child).await;
        }
        self.stdout = None;
        self.stderr = None;
    }
}

impl Drop for ProbeProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            // Reap on the runtime so no zombie is left behind.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = child.wait().await;
                });
            }
            debug!(pid = ?self.pid, "probe process killed on drop");
        }
    }
}

async fn next_segment<R>(reader: &mut Option<Split<R>>) -> Option<Vec<u8>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match reader {
        Some(r) => r.next_segment().await.ok().flatten(),
        None => None,
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

async fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(exit_code = status.code(), "probe exited after SIGTERM");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "error waiting for probe after SIGTERM");
        }
        Err(_) => {
            warn!("probe did not exit after SIGTERM, killing");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill probe");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_line_strips_cr_and_replaces_invalid_utf8() {
        assert_eq!(decode_line(b"Reply from 1.1.1.1\r"), "Reply from 1.1.1.1");
        assert_eq!(decode_line(b"caf\xe9"), "caf\u{fffd}");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_launch_error() {
        let launcher = ProbeLauncher::new(Some("/nonexistent/netdash-ping".to_string()), None);
        let target = ResolvedTarget::new("192.0.2.1".parse().unwrap());
        let err = launcher
            .start(&target, &ProbeOptions::default(), Dialect::host(false))
            .err()
            .expect("spawn must fail");
        assert!(matches!(err, ProbeError::Launch(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lines_from_both_pipes() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err 1>&2");
        let mut process = ProbeProcess::spawn(cmd).unwrap();

        let mut lines = Vec::new();
        while let Some(line) = process.next_line().await {
            lines.push(line);
        }
        lines.sort();
        assert_eq!(lines, ["err", "out"]);
        assert!(process.wait().await.unwrap().success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_reaps() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let mut process = ProbeProcess::spawn(cmd).unwrap();
        let pid = process.pid().unwrap() as i32;

        process.terminate().await;

        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive, "probe process {} still exists", pid);
        assert!(process.next_line().await.is_none());
    }
}
