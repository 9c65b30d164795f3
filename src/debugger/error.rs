//! Error taxonomy for the debugger session core

use std::path::PathBuf;
use std::time::Duration;

use super::types::SessionState;

/// Classification of a [`DebuggerError`] that callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Launch,
    ReadinessTimeout,
    ArtifactLoad,
    NotReady,
    CommandTimeout,
    ProcessExited,
    InvalidCommand,
    InvalidSettings,
    Io,
}

/// Errors produced by the debugger session core
#[derive(Debug, thiserror::Error)]
pub enum DebuggerError {
    #[error("failed to launch debugger '{program}'")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("debugger prompt not detected within {timeout:?}")]
    ReadinessTimeout {
        timeout: Duration,
        transcript: Vec<String>,
    },

    #[error("failed to load artifact {}: {reason}", path.display())]
    ArtifactLoad {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<Box<DebuggerError>>,
    },

    #[error("session is not ready (state: {state})")]
    NotReady { state: SessionState },

    #[error("command did not complete within {timeout:?}")]
    CommandTimeout {
        timeout: Duration,
        partial_output: String,
    },

    #[error("debugger process exited{}", status.as_deref().map(|s| format!(" ({s})")).unwrap_or_default())]
    ProcessExited { status: Option<String> },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid session settings: {0}")]
    InvalidSettings(String),

    #[error("debugger I/O failed")]
    Io(#[from] std::io::Error),
}

impl DebuggerError {
    /// Kind of this error, for branching without string matching
    pub fn kind(&self) -> ErrorKind {
        match self {
            DebuggerError::Launch { .. } => ErrorKind::Launch,
            DebuggerError::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            DebuggerError::ArtifactLoad { .. } => ErrorKind::ArtifactLoad,
            DebuggerError::NotReady { .. } => ErrorKind::NotReady,
            DebuggerError::CommandTimeout { .. } => ErrorKind::CommandTimeout,
            DebuggerError::ProcessExited { .. } => ErrorKind::ProcessExited,
            DebuggerError::InvalidCommand(_) => ErrorKind::InvalidCommand,
            DebuggerError::InvalidSettings(_) => ErrorKind::InvalidSettings,
            DebuggerError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the session stays usable after this error.
    ///
    /// `false` means the caller has to `open` again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DebuggerError::NotReady { .. }
                | DebuggerError::CommandTimeout { .. }
                | DebuggerError::InvalidCommand(_)
        )
    }

    /// Kind of the innermost wrapped error.
    pub fn root_kind(&self) -> ErrorKind {
        match self {
            DebuggerError::ArtifactLoad {
                source: Some(inner),
                ..
            } => inner.root_kind(),
            other => other.kind(),
        }
    }

    pub(crate) fn artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        DebuggerError::ArtifactLoad {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Message with every wrapped cause appended, outermost first
    pub fn report(&self) -> String {
        let mut message = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(inner) = cause {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            cause = inner.source();
        }
        message
    }

    /// Attach a session startup failure to the artifact being loaded.
    ///
    /// The reason stays short; the details live in the source chain.
    pub(crate) fn wrap_artifact(path: impl Into<PathBuf>, source: DebuggerError) -> Self {
        let reason = match source.kind() {
            ErrorKind::Launch => "debugger failed to start",
            ErrorKind::ReadinessTimeout => "debugger never became ready",
            _ => "debugger session failed",
        };
        DebuggerError::ArtifactLoad {
            path: path.into(),
            reason: reason.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_artifact_wrapping_keeps_source() {
        let launch = DebuggerError::Launch {
            program: "cdb".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let wrapped = DebuggerError::wrap_artifact("crash.dmp", launch);

        assert_eq!(wrapped.kind(), ErrorKind::ArtifactLoad);
        assert_eq!(wrapped.root_kind(), ErrorKind::Launch);
        assert!(wrapped.source().is_some());
        assert_eq!(
            wrapped.to_string(),
            "failed to load artifact crash.dmp: debugger failed to start"
        );
        assert_eq!(
            wrapped.report(),
            "failed to load artifact crash.dmp: debugger failed to start: \
             failed to launch debugger 'cdb': no such file"
        );
        assert_eq!(wrapped.report().matches("no such file").count(), 1);
    }

    #[test]
    fn test_recoverability() {
        let timeout = DebuggerError::CommandTimeout {
            timeout: Duration::from_secs(2),
            partial_output: String::new(),
        };
        assert!(timeout.is_recoverable());

        let exited = DebuggerError::ProcessExited { status: None };
        assert!(!exited.is_recoverable());
        assert_eq!(exited.to_string(), "debugger process exited");

        let exited = DebuggerError::ProcessExited {
            status: Some("exit status: 3".to_string()),
        };
        assert_eq!(exited.to_string(), "debugger process exited (exit status: 3)");
    }
}
