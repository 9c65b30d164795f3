//! Session data model shared by the debugger components

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::{DebuggerError, ErrorKind};

/// Lifecycle state of a debugger session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Closed,
    Starting,
    Ready,
    Busy,
    Closing,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Any state may fall back to `Closed`; `Starting` is only entered from
    /// `Closed` and `Closing` never returns to `Ready`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (_, Closed) => true,
            (Closed, Starting) => true,
            (Starting, Ready) => true,
            (Ready, Busy) | (Busy, Ready) => true,
            (Ready, Closing) | (Busy, Closing) | (Starting, Closing) => true,
            _ => false,
        }
    }

    /// Whether commands may be issued (or queued behind the in-flight one)
    pub fn accepts_commands(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Busy)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Last failure recorded on a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&DebuggerError> for SessionFailure {
    fn from(error: &DebuggerError) -> Self {
        Self {
            kind: error.kind(),
            message: error.report(),
        }
    }
}

/// Point-in-time snapshot of a session, as returned by `status()`
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub state: SessionState,
    pub artifact_path: Option<PathBuf>,
    pub pid: Option<u32>,
    pub alive: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub commands_executed: u64,
    pub last_error: Option<SessionFailure>,
}

impl SessionInfo {
    pub fn closed() -> Self {
        Self {
            state: SessionState::Closed,
            artifact_path: None,
            pid: None,
            alive: false,
            created_at: None,
            commands_executed: 0,
            last_error: None,
        }
    }

    /// How long the session has been open
    pub fn uptime(&self) -> Option<chrono::Duration> {
        self.created_at.map(|created| Utc::now() - created)
    }
}

/// Which pipe a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of raw debugger output, in arrival order
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub seq: u64,
    pub stream: OutputStream,
    pub text: String,
    /// Set when the line was flushed without a terminating newline (prompts)
    pub partial: bool,
    pub received_at: Instant,
}

/// Outcome of a single `execute` call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command: String,
    pub success: bool,
    pub output: String,
    pub error: String,
    pub duration_exceeded: bool,
    pub process_exited: bool,
    #[serde(rename = "elapsedMs", serialize_with = "serialize_duration_ms")]
    pub elapsed: Duration,
    #[serde(skip)]
    pub timeout: Duration,
}

impl CommandResult {
    pub(crate) fn completed(command: &str, output: String, elapsed: Duration) -> Self {
        Self {
            command: command.to_string(),
            success: true,
            output,
            error: String::new(),
            duration_exceeded: false,
            process_exited: false,
            elapsed,
            timeout: Duration::ZERO,
        }
    }

    pub(crate) fn timed_out(command: &str, partial: String, timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            success: false,
            output: partial,
            error: format!("command did not complete within {:?}", timeout),
            duration_exceeded: true,
            process_exited: false,
            elapsed: timeout,
            timeout,
        }
    }

    pub(crate) fn exited(command: &str, partial: String, elapsed: Duration) -> Self {
        Self {
            command: command.to_string(),
            success: false,
            output: partial,
            error: "process exited".to_string(),
            duration_exceeded: false,
            process_exited: true,
            elapsed,
            timeout: Duration::ZERO,
        }
    }

    /// Typed failure carried by this result, if any
    pub fn failure(&self) -> Option<DebuggerError> {
        if self.process_exited {
            Some(DebuggerError::ProcessExited { status: None })
        } else if self.duration_exceeded {
            Some(DebuggerError::CommandTimeout {
                timeout: self.timeout,
                partial_output: self.output.clone(),
            })
        } else {
            None
        }
    }

    /// Convert into the captured output, or the typed failure
    pub fn into_output(self) -> Result<String, DebuggerError> {
        match self.failure() {
            Some(error) => Err(error),
            None => Ok(self.output),
        }
    }
}

fn serialize_duration_ms<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_transitions() {
        use SessionState::*;

        assert!(Closed.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Busy));
        assert!(Busy.can_transition_to(Ready));
        assert!(Busy.can_transition_to(Closed));
        assert!(Closing.can_transition_to(Closed));

        assert!(!Ready.can_transition_to(Starting));
        assert!(!Closing.can_transition_to(Ready));
        assert!(!Closed.can_transition_to(Ready));
        assert!(!Closed.can_transition_to(Busy));
    }

    #[test]
    fn test_failed_results_map_to_typed_errors() {
        let timed_out = CommandResult::timed_out("k", "partial".to_string(), Duration::from_secs(2));
        assert!(!timed_out.success);
        match timed_out.into_output() {
            Err(DebuggerError::CommandTimeout { partial_output, .. }) => {
                assert_eq!(partial_output, "partial")
            }
            other => panic!("unexpected: {:?}", other),
        }

        let exited = CommandResult::exited("k", String::new(), Duration::from_millis(5));
        assert_eq!(exited.error, "process exited");
        assert_eq!(
            exited.failure().map(|e| e.kind()),
            Some(ErrorKind::ProcessExited)
        );

        let done = CommandResult::completed("k", "frames".to_string(), Duration::from_millis(5));
        assert_eq!(done.into_output().unwrap(), "frames");
    }

    #[test]
    fn test_closed_info_serializes() {
        let info = SessionInfo::closed();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["state"], "closed");
        assert_eq!(json["alive"], false);
    }
}
