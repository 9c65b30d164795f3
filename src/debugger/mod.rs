//! Debugger session core
//!
//! Drives an interactive command-line debugger over its standard streams:
//! - `process` spawns and stops the external debugger
//! - `pump` drains its output into an ordered queue and to live observers
//! - `readiness` waits for the first prompt after launch
//! - `channel` frames each command's response with a unique marker
//! - `session` ties these together behind open / execute / close / status

pub mod channel;
pub mod error;
pub mod process;
pub mod protocol;
pub mod pump;
pub mod readiness;
pub mod session;
pub mod types;

pub use channel::CommandChannel;
pub use error::{DebuggerError, ErrorKind};
pub use process::{LaunchSpec, ProcessHandle, ProcessSupervisor, Termination};
pub use protocol::{MarkerProtocol, PromptMatcher};
pub use pump::{LineObserver, ObserverSlot, OutputPump};
pub use readiness::{ReadinessGate, ReadyOutcome, ReadyTrigger};
pub use session::{HistoryEntry, SessionManager, SessionSettings};
pub use types::{CommandResult, OutputLine, OutputStream, SessionFailure, SessionInfo, SessionState};
