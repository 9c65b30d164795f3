//! Public session surface: open / execute / close / status

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::Config;

use super::channel::CommandChannel;
use super::error::DebuggerError;
use super::process::{LaunchSpec, ProcessHandle, ProcessSupervisor, absolute_artifact_path};
use super::protocol::{MarkerProtocol, PromptMatcher};
use super::pump::{LineObserver, ObserverSlot, OutputPump};
use super::readiness::ReadinessGate;
use super::types::{CommandResult, SessionFailure, SessionInfo, SessionState};

/// Everything the session core needs, resolved from configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub program: PathBuf,
    pub extra_args: Vec<String>,
    pub symbol_path: Option<(String, String)>,
    pub line_numbers_flag: Option<String>,
    pub artifact_flag: Option<String>,
    pub artifact_extensions: Vec<String>,
    pub exit_command: String,
    pub protocol: MarkerProtocol,
    pub prompt: PromptMatcher,
    pub command_timeout: Duration,
    pub ready_timeout: Duration,
    pub quiet_interval: Duration,
    pub poll_interval: Duration,
    pub partial_flush: Duration,
    pub grace_timeout: Duration,
    pub kill_wait: Duration,
    pub auto_restart: bool,
    pub restart_window: Duration,
    pub history_size: usize,
    pub max_command_length: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Result<Self, DebuggerError> {
        let debugger = &config.debugger;
        let session = &config.session;

        if debugger.path.trim().is_empty() {
            return Err(DebuggerError::InvalidSettings(
                "debugger path must not be empty".to_string(),
            ));
        }

        let non_empty = |flag: &str| (!flag.trim().is_empty()).then(|| flag.to_string());

        Ok(Self {
            program: PathBuf::from(&debugger.path),
            extra_args: debugger.extra_args.clone(),
            symbol_path: debugger
                .symbol_path
                .as_ref()
                .filter(|path| !path.trim().is_empty())
                .map(|path| (debugger.symbol_path_flag.clone(), path.clone())),
            line_numbers_flag: if debugger.line_numbers {
                non_empty(debugger.line_numbers_flag.as_str())
            } else {
                None
            },
            artifact_flag: non_empty(debugger.artifact_flag.as_str()),
            artifact_extensions: debugger
                .artifact_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            exit_command: debugger.exit_command.clone(),
            protocol: MarkerProtocol::new(&debugger.command_separator, &debugger.echo_template)?,
            prompt: PromptMatcher::new(&debugger.prompt_patterns)?,
            command_timeout: Duration::from_secs(session.command_timeout_secs),
            ready_timeout: Duration::from_secs(session.ready_timeout_secs),
            quiet_interval: Duration::from_millis(session.quiet_interval_ms),
            poll_interval: Duration::from_millis(session.poll_interval_ms),
            partial_flush: Duration::from_millis(session.partial_flush_ms),
            grace_timeout: Duration::from_millis(session.grace_timeout_ms),
            kill_wait: Duration::from_millis(session.kill_wait_ms),
            auto_restart: session.auto_restart,
            restart_window: Duration::from_secs(session.restart_window_secs),
            history_size: session.history_size,
            max_command_length: session.max_command_length,
        })
    }

    /// Debugger invocation that loads `artifact` at startup
    pub fn launch_spec(&self, artifact: &Path) -> LaunchSpec {
        let mut spec = LaunchSpec::new(&self.program).args(self.extra_args.iter().cloned());
        if let Some((flag, path)) = &self.symbol_path {
            spec = spec.arg(flag.clone()).arg(path.clone());
        }
        if let Some(flag) = &self.line_numbers_flag {
            spec = spec.arg(flag.clone());
        }
        if let Some(flag) = &self.artifact_flag {
            spec = spec.arg(flag.clone());
        }
        spec.arg(artifact.to_string_lossy().to_string())
    }

    /// Check that `path` is an existing artifact of an accepted kind
    pub fn validate_artifact(&self, path: &Path) -> Result<(), DebuggerError> {
        if path.as_os_str().is_empty() {
            return Err(DebuggerError::artifact(path, "path is empty"));
        }

        let metadata = std::fs::metadata(path)
            .map_err(|e| DebuggerError::artifact(path, format!("cannot access file: {}", e)))?;
        if !metadata.is_file() {
            return Err(DebuggerError::artifact(path, "not a regular file"));
        }

        if !self.artifact_extensions.is_empty() {
            let extension = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if !self.artifact_extensions.contains(&extension) {
                return Err(DebuggerError::artifact(
                    path,
                    format!("expected extension {}", self.artifact_extensions.join("/")),
                ));
            }
        }

        Ok(())
    }

    /// Reject input that would break framing before it reaches the process
    pub fn validate_command(&self, command: &str) -> Result<(), DebuggerError> {
        if command.trim().is_empty() {
            return Err(DebuggerError::InvalidCommand("command is empty".to_string()));
        }
        if command.chars().count() > self.max_command_length {
            return Err(DebuggerError::InvalidCommand(format!(
                "command exceeds {} characters",
                self.max_command_length
            )));
        }
        if command.contains(['\n', '\r']) {
            return Err(DebuggerError::InvalidCommand(
                "command must be a single line".to_string(),
            ));
        }
        Ok(())
    }
}

/// One executed command, kept for the session history
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub command: String,
    pub output: String,
    pub success: bool,
    pub duration_exceeded: bool,
    pub executed_at: DateTime<Utc>,
    pub elapsed_ms: u128,
}

struct ActiveSession {
    handle: Arc<ProcessHandle>,
    pump: OutputPump,
    channel: CommandChannel,
}

#[derive(Default)]
struct Lifecycle {
    active: Option<ActiveSession>,
    last_artifact: Option<PathBuf>,
    crashed: bool,
}

/// Persistent debugger session.
///
/// One external process per open session; all commands are serialized
/// through a single lock that is held for the whole request/response.
pub struct SessionManager {
    settings: SessionSettings,
    supervisor: ProcessSupervisor,
    lifecycle: Mutex<Lifecycle>,
    info_tx: watch::Sender<SessionInfo>,
    process: RwLock<Option<Arc<ProcessHandle>>>,
    observer: ObserverSlot,
    history: StdMutex<VecDeque<HistoryEntry>>,
    span: tracing::Span,
}

impl SessionManager {
    pub fn new(settings: SessionSettings) -> Self {
        let supervisor = ProcessSupervisor::new(settings.exit_command.clone(), settings.kill_wait);
        let (info_tx, _) = watch::channel(SessionInfo::closed());
        let span = info_span!("debug_session", program = %settings.program.display());

        Self {
            settings,
            supervisor,
            lifecycle: Mutex::new(Lifecycle::default()),
            info_tx,
            process: RwLock::new(None),
            observer: ObserverSlot::new(),
            history: StdMutex::new(VecDeque::new()),
            span,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, DebuggerError> {
        Ok(Self::new(SessionSettings::from_config(config)?))
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a debugger bound to `artifact` and wait for its prompt.
    ///
    /// Any previously open session is closed first, even when `artifact`
    /// turns out to be unusable. On failure the session is left `Closed`.
    pub async fn open(&self, artifact: impl AsRef<Path>) -> Result<(), DebuggerError> {
        let artifact = artifact.as_ref();
        async {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.active.is_some() {
                info!("Closing previous session before opening {}", artifact.display());
                self.shutdown_active(&mut lifecycle).await;
            }
            lifecycle.crashed = false;

            if let Err(e) = self.settings.validate_artifact(artifact) {
                warn!("Rejected artifact: {}", e);
                self.record_failure(&e);
                self.mark_closed();
                return Err(e);
            }
            let artifact = absolute_artifact_path(artifact);

            lifecycle.last_artifact = Some(artifact.clone());
            self.clear_history();
            self.start_locked(&mut lifecycle, &artifact, false).await
        }
        .instrument(self.span.clone())
        .await
    }

    /// Run one debugger command with the configured timeout
    pub async fn execute(&self, command: &str) -> Result<CommandResult, DebuggerError> {
        self.execute_with_timeout(command, self.settings.command_timeout)
            .await
    }

    /// Run one debugger command, waiting at most `timeout` for its marker
    pub async fn execute_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, DebuggerError> {
        async {
            let state = self.state();
            if !state.accepts_commands() && !self.may_auto_restart(state) {
                return Err(DebuggerError::NotReady { state });
            }
            self.settings.validate_command(command)?;

            let mut lifecycle = self.lifecycle.lock().await;
            self.reap_dead(&mut lifecycle).await;

            if lifecycle.active.is_none() {
                let restart = match (&lifecycle.last_artifact, lifecycle.crashed) {
                    (Some(path), true) if self.settings.auto_restart => Some(path.clone()),
                    _ => None,
                };
                let Some(artifact) = restart else {
                    return Err(DebuggerError::NotReady {
                        state: self.state(),
                    });
                };
                info!("Restarting crashed session for {}", artifact.display());
                self.start_locked(&mut lifecycle, &artifact, true).await?;
            }

            let Some(active) = lifecycle.active.as_mut() else {
                return Err(DebuggerError::NotReady {
                    state: self.state(),
                });
            };

            self.transition(SessionState::Busy);
            let mut in_flight = InFlight {
                manager: self,
                handle: active.handle.clone(),
                command,
                finished: false,
            };
            let result = active.channel.execute(command, timeout).await;
            in_flight.finished = true;
            self.record_history(&result);
            self.info_tx.send_modify(|info| info.commands_executed += 1);

            if result.process_exited {
                let status = active.handle.exit_status().map(|s| s.to_string());
                error!("Debugger exited during '{}' ({:?})", command, status);
                self.record_failure(&DebuggerError::ProcessExited { status });
                if let Some(active) = lifecycle.active.take() {
                    self.teardown(active).await;
                }
                lifecycle.crashed = true;
                self.mark_closed();
            } else {
                if result.duration_exceeded {
                    self.record_failure(&DebuggerError::CommandTimeout {
                        timeout,
                        partial_output: result.output.clone(),
                    });
                }
                self.transition(SessionState::Ready);
            }

            Ok(result)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Stop the debugger. Calling this on a closed session is a no-op.
    pub async fn close(&self) -> Result<(), DebuggerError> {
        async {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.crashed = false;
            if lifecycle.active.is_none() {
                debug!("close() on a session that is already closed");
                if self.state() != SessionState::Closed {
                    self.mark_closed();
                }
                return Ok(());
            }

            self.shutdown_active(&mut lifecycle).await;
            info!("Session closed");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Current session snapshot; never blocks on an in-flight command
    pub fn status(&self) -> SessionInfo {
        let mut info = self.info_tx.borrow().clone();
        info.alive = match self.process.read() {
            Ok(process) => process.as_ref().is_some_and(|handle| handle.is_alive()),
            Err(poisoned) => poisoned
                .into_inner()
                .as_ref()
                .is_some_and(|handle| handle.is_alive()),
        };
        info
    }

    pub fn state(&self) -> SessionState {
        self.info_tx.borrow().state
    }

    /// Watch every state change
    pub fn subscribe_status(&self) -> watch::Receiver<SessionInfo> {
        self.info_tx.subscribe()
    }

    /// Register the live output subscriber, replacing any previous one
    pub fn on_line<O>(&self, observer: O)
    where
        O: LineObserver + 'static,
    {
        self.observer.set(Arc::new(observer));
    }

    pub fn clear_observer(&self) {
        self.observer.clear();
    }

    /// Commands executed in the current session, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        match self.history.lock() {
            Ok(history) => history.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    async fn start_locked(
        &self,
        lifecycle: &mut Lifecycle,
        artifact: &Path,
        with_retry: bool,
    ) -> Result<(), DebuggerError> {
        self.transition(SessionState::Starting);
        self.info_tx.send_modify(|info| {
            info.artifact_path = Some(artifact.to_path_buf());
            info.pid = None;
            info.created_at = None;
            info.commands_executed = 0;
        });

        let launched = if with_retry {
            self.launch_with_backoff(artifact).await
        } else {
            self.launch(artifact).await
        };

        match launched {
            Ok(active) => {
                let pid = active.handle.pid();
                self.set_process(Some(active.handle.clone()));
                lifecycle.active = Some(active);
                self.info_tx.send_modify(|info| {
                    info.pid = pid;
                    info.created_at = Some(Utc::now());
                    info.last_error = None;
                });
                self.transition(SessionState::Ready);
                info!("Session ready for {} (PID: {:?})", artifact.display(), pid);
                Ok(())
            }
            Err(e) => {
                let error = DebuggerError::wrap_artifact(artifact, e);
                error!("{}", error);
                self.record_failure(&error);
                self.mark_closed();
                Err(error)
            }
        }
    }

    async fn launch(&self, artifact: &Path) -> Result<ActiveSession, DebuggerError> {
        let spec = self.settings.launch_spec(artifact);
        let (handle, output) = self.supervisor.start(&spec)?;
        let handle = Arc::new(handle);

        let (pump, mut queue) =
            OutputPump::start(output, self.observer.clone(), self.settings.partial_flush);

        let gate = ReadinessGate::new(
            &self.settings.prompt,
            self.settings.quiet_interval,
            self.settings.poll_interval,
        );
        match gate.await_ready(&mut queue, self.settings.ready_timeout).await {
            Ok(outcome) => {
                debug!(
                    "Debugger ready via {:?} after {:?}",
                    outcome.trigger, outcome.elapsed
                );
            }
            Err(e) => {
                warn!("Debugger failed to become ready: {}", e);
                self.terminate_quietly(&handle).await;
                pump.stop().await;
                return Err(e);
            }
        }

        let channel = CommandChannel::new(
            handle.clone(),
            queue,
            self.settings.protocol.clone(),
            self.settings.prompt.clone(),
            self.settings.poll_interval,
        );

        Ok(ActiveSession {
            handle,
            pump,
            channel,
        })
    }

    async fn launch_with_backoff(&self, artifact: &Path) -> Result<ActiveSession, DebuggerError> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.settings.restart_window),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(policy, || async move {
            self.launch(artifact).await.map_err(|e| match e {
                DebuggerError::Launch { .. } => backoff::Error::permanent(e),
                other => {
                    warn!("Restart attempt failed: {}", other);
                    backoff::Error::transient(other)
                }
            })
        })
        .await
    }

    async fn shutdown_active(&self, lifecycle: &mut Lifecycle) {
        let Some(active) = lifecycle.active.take() else {
            return;
        };
        if self.state() != SessionState::Closed {
            self.transition(SessionState::Closing);
        }
        self.teardown(active).await;
        self.mark_closed();
    }

    /// Tear down a process that died while no command was running, e.g.
    /// after an abandoned `execute`
    async fn reap_dead(&self, lifecycle: &mut Lifecycle) {
        let Some(active) = lifecycle.active.as_ref() else {
            return;
        };
        if active.handle.is_alive() {
            return;
        }

        let status = active.handle.exit_status().map(|s| s.to_string());
        warn!("Debugger exited between commands ({:?})", status);
        self.record_failure(&DebuggerError::ProcessExited { status });
        if let Some(active) = lifecycle.active.take() {
            self.teardown(active).await;
        }
        lifecycle.crashed = true;
        self.mark_closed();
    }

    async fn teardown(&self, active: ActiveSession) {
        let ActiveSession {
            handle,
            pump,
            channel,
        } = active;
        drop(channel);
        self.terminate_quietly(&handle).await;
        pump.stop().await;
        self.set_process(None);
    }

    async fn terminate_quietly(&self, handle: &ProcessHandle) {
        match self
            .supervisor
            .terminate(handle, self.settings.grace_timeout)
            .await
        {
            Ok(outcome) => debug!("Debugger {:?} terminated: {:?}", handle.pid(), outcome),
            Err(e) => error!("Failed to terminate debugger {:?}: {}", handle.pid(), e),
        }
    }

    fn may_auto_restart(&self, state: SessionState) -> bool {
        state == SessionState::Closed && self.settings.auto_restart
    }

    fn transition(&self, next: SessionState) {
        self.info_tx.send_if_modified(|info| {
            let current = info.state;
            if current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                warn!("Refusing session state change {} -> {}", current, next);
                return false;
            }
            debug!("Session state: {} -> {}", current, next);
            info.state = next;
            true
        });
    }

    fn mark_closed(&self) {
        self.transition(SessionState::Closed);
        self.set_process(None);
        self.info_tx.send_modify(|info| {
            info.pid = None;
            info.alive = false;
        });
    }

    fn set_process(&self, handle: Option<Arc<ProcessHandle>>) {
        match self.process.write() {
            Ok(mut process) => *process = handle,
            Err(poisoned) => *poisoned.into_inner() = handle,
        }
    }

    fn record_failure(&self, error: &DebuggerError) {
        let failure = SessionFailure::from(error);
        self.info_tx.send_modify(|info| info.last_error = Some(failure));
    }

    fn record_history(&self, result: &CommandResult) {
        if self.settings.history_size == 0 {
            return;
        }

        let entry = HistoryEntry {
            command: result.command.clone(),
            output: result.output.clone(),
            success: result.success,
            duration_exceeded: result.duration_exceeded,
            executed_at: Utc::now(),
            elapsed_ms: result.elapsed.as_millis(),
        };

        let mut history = match self.history.lock() {
            Ok(history) => history,
            Err(poisoned) => poisoned.into_inner(),
        };
        while history.len() >= self.settings.history_size {
            history.pop_front();
        }
        history.push_back(entry);
    }

    fn clear_history(&self) {
        match self.history.lock() {
            Ok(mut history) => history.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

/// Restores the session state when an `execute` future is dropped before
/// its command completes
struct InFlight<'a> {
    manager: &'a SessionManager,
    handle: Arc<ProcessHandle>,
    command: &'a str,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("Command '{}' abandoned before completion", self.command);
        if self.handle.is_alive() {
            self.manager.transition(SessionState::Ready);
        } else {
            self.manager.mark_closed();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.state() != SessionState::Closed {
            warn!("SessionManager dropped without close(); debugger will be killed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debugger::error::ErrorKind;
    use tempfile::Builder;

    fn settings() -> SessionSettings {
        let mut config = Config::default();
        config.debugger.path = "cdb".to_string();
        config.debugger.symbol_path = Some("srv*C:\\Symbols".to_string());
        SessionSettings::from_config(&config).unwrap()
    }

    #[test]
    fn test_launch_spec_orders_flags() {
        let spec = settings().launch_spec(Path::new("crash.dmp"));
        assert_eq!(
            spec.args,
            vec!["-y", "srv*C:\\Symbols", "-lines", "-z", "crash.dmp"]
        );
    }

    #[test]
    fn test_artifact_validation() {
        let settings = settings();

        let missing = settings
            .validate_artifact(Path::new("/no/such/crash.dmp"))
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::ArtifactLoad);

        let wrong_kind = Builder::new().suffix(".txt").tempfile().unwrap();
        assert!(settings.validate_artifact(wrong_kind.path()).is_err());

        let dump = Builder::new().suffix(".DMP").tempfile().unwrap();
        assert!(settings.validate_artifact(dump.path()).is_ok());
    }

    #[test]
    fn test_command_validation() {
        let settings = settings();
        assert!(settings.validate_command("k").is_ok());
        assert!(settings.validate_command("  ").is_err());
        assert!(settings.validate_command("k\nq").is_err());
        assert!(settings.validate_command(&"x".repeat(1001)).is_err());
    }

    #[tokio::test]
    async fn test_execute_on_closed_session_is_not_ready() {
        let manager = SessionManager::new(settings());
        let err = manager.execute("k").await.unwrap_err();
        assert!(matches!(
            err,
            DebuggerError::NotReady {
                state: SessionState::Closed
            }
        ));
        assert!(manager.status().pid.is_none());
    }

    #[tokio::test]
    async fn test_close_twice_is_noop() {
        let manager = SessionManager::new(settings());
        tokio_test::assert_ok!(manager.close().await);
        tokio_test::assert_ok!(manager.close().await);
        assert_eq!(manager.status().state, SessionState::Closed);
    }
}
