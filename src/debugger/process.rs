//! Launching, probing and stopping the external debugger process

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::DebuggerError;

/// Executable plus arguments for one debugger instance
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Shell-like rendering for logs and dry runs
    pub fn command_line(&self) -> String {
        let mut parts = vec![quote(&self.program.to_string_lossy())];
        parts.extend(self.args.iter().map(|arg| quote(arg)));
        parts.join(" ")
    }
}

fn quote(part: &str) -> String {
    if part.is_empty() || part.contains(char::is_whitespace) {
        format!("\"{}\"", part)
    } else {
        part.to_string()
    }
}

/// Output pipes of a freshly spawned process, handed to the output pump
pub struct ProcessOutput {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// How a process ended when asked to terminate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// It was already gone before we asked
    AlreadyExited(Option<ExitStatus>),
    /// It honoured the exit command within the grace period
    Graceful(ExitStatus),
    /// It stopped after the forceful stop signal
    Signalled(ExitStatus),
    /// It had to be killed unconditionally
    Killed(Option<ExitStatus>),
}

/// Owned handle to a running debugger process
pub struct ProcessHandle {
    pid: Option<u32>,
    program: String,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    exit: OnceLock<ExitStatus>,
    started_at: Instant,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Exit status, once the process has been observed to exit
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit.get().copied()
    }

    /// Non-blocking liveness check.
    ///
    /// While a termination holds the child this reports the last known state.
    pub fn is_alive(&self) -> bool {
        if self.exit.get().is_some() {
            return false;
        }

        match self.child.try_lock() {
            Ok(mut child) => match child.try_wait() {
                Ok(Some(status)) => {
                    self.record_exit(status);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!("Failed to poll debugger process {:?}: {}", self.pid, e);
                    false
                }
            },
            Err(_) => true,
        }
    }

    /// Write one line to stdin and flush it
    pub async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        let Some(writer) = stdin.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "debugger stdin already closed",
            ));
        };

        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// Close stdin so the process sees end-of-input
    pub async fn close_stdin(&self) {
        if let Some(mut writer) = self.stdin.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Ignoring error while closing debugger stdin: {}", e);
            }
        }
    }

    fn record_exit(&self, status: ExitStatus) {
        if self.exit.set(status).is_ok() {
            debug!("Debugger process {:?} exited with {}", self.pid, status);
        }
    }
}

/// Starts and stops debugger processes
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    exit_command: String,
    kill_wait: Duration,
}

impl ProcessSupervisor {
    pub fn new(exit_command: impl Into<String>, kill_wait: Duration) -> Self {
        Self {
            exit_command: exit_command.into(),
            kill_wait,
        }
    }

    /// Spawn the process with all three standard streams piped
    pub fn start(&self, spec: &LaunchSpec) -> Result<(ProcessHandle, ProcessOutput), DebuggerError> {
        let program = spec.program.to_string_lossy().to_string();
        info!("Launching debugger: {}", spec.command_line());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| DebuggerError::Launch {
            program: program.clone(),
            source,
        })?;

        let missing_pipe = |name: &str| DebuggerError::Launch {
            program: program.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("{} pipe was not captured", name),
            ),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let pid = child.id();
        info!("Debugger started (PID: {:?})", pid);

        let handle = ProcessHandle {
            pid,
            program,
            child: Mutex::new(child),
            stdin: Mutex::new(Some(stdin)),
            exit: OnceLock::new(),
            started_at: Instant::now(),
        };

        Ok((handle, ProcessOutput { stdout, stderr }))
    }

    /// Non-blocking, side-effect-free liveness check
    pub fn is_alive(&self, handle: &ProcessHandle) -> bool {
        handle.is_alive()
    }

    /// Ask the process to exit, escalating to a stop signal and then a kill.
    ///
    /// The process is always reaped before this returns.
    pub async fn terminate(
        &self,
        handle: &ProcessHandle,
        grace: Duration,
    ) -> Result<Termination, DebuggerError> {
        if let Some(status) = handle.exit_status() {
            return Ok(Termination::AlreadyExited(Some(status)));
        }

        let mut child = handle.child.lock().await;

        if let Some(status) = child.try_wait()? {
            handle.record_exit(status);
            drop(child);
            handle.close_stdin().await;
            return Ok(Termination::AlreadyExited(Some(status)));
        }

        debug!(
            "Requesting debugger {:?} to exit with '{}'",
            handle.pid, self.exit_command
        );
        if let Err(e) = handle.write_line(&self.exit_command).await {
            debug!("Could not deliver exit command: {}", e);
        }
        handle.close_stdin().await;

        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            let status = status?;
            handle.record_exit(status);
            info!("Debugger {:?} exited gracefully ({})", handle.pid, status);
            return Ok(Termination::Graceful(status));
        }

        warn!(
            "Debugger {:?} ignored exit command for {:?}, sending stop signal",
            handle.pid, grace
        );
        send_stop_signal(&mut child);

        if let Ok(status) = tokio::time::timeout(self.kill_wait, child.wait()).await {
            let status = status?;
            handle.record_exit(status);
            return Ok(Termination::Signalled(status));
        }

        warn!("Debugger {:?} still alive, killing", handle.pid);
        child.kill().await?;
        let status = child.try_wait()?;
        if let Some(status) = status {
            handle.record_exit(status);
        }
        Ok(Termination::Killed(status))
    }
}

#[cfg(unix)]
fn send_stop_signal(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };

    // SAFETY: plain syscall on a PID we still own and have not reaped
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(
            "SIGTERM to {} failed: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn send_stop_signal(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to stop debugger process: {}", e);
    }
}

/// Resolve the artifact path the way the debugger will see it
pub fn absolute_artifact_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new("exit", Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let spec = LaunchSpec::new("/definitely/not/a/debugger");
        match supervisor().start(&spec) {
            Err(DebuggerError::Launch { program, .. }) => {
                assert!(program.contains("not/a/debugger"))
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[tokio::test]
    async fn test_graceful_exit_via_exit_command() {
        let supervisor = supervisor();
        let (handle, _output) = supervisor.start(&LaunchSpec::new("/bin/sh")).unwrap();
        assert!(supervisor.is_alive(&handle));
        assert!(handle.pid().is_some());

        let outcome = supervisor
            .terminate(&handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(outcome, Termination::Graceful(_)));
        assert!(!supervisor.is_alive(&handle));
    }

    #[tokio::test]
    async fn test_escalates_when_exit_command_is_ignored() {
        let supervisor = supervisor();
        let spec = LaunchSpec::new("/bin/sleep").arg("30");
        let (handle, _output) = supervisor.start(&spec).unwrap();

        let started = Instant::now();
        let outcome = supervisor
            .terminate(&handle, Duration::from_millis(200))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            Termination::Signalled(_) | Termination::Killed(_)
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_terminate_after_spontaneous_exit() {
        let supervisor = supervisor();
        let spec = LaunchSpec::new("/bin/sh").args(["-c", "exit 0"]);
        let (handle, _output) = supervisor.start(&spec).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.is_alive() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let outcome = supervisor
            .terminate(&handle, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(outcome, Termination::AlreadyExited(Some(_))));
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        let spec = LaunchSpec::new("cdb").args(["-z", "C:\\My Dumps\\crash.dmp"]);
        assert_eq!(spec.command_line(), "cdb -z \"C:\\My Dumps\\crash.dmp\"");
    }
}
