//! Action Channel for asynchronous event processing

use anyhow::Result;
use tokio::sync::mpsc;

use crate::debugger::{OutputLine, SessionInfo};

/// Events feeding the interactive shell loop
#[derive(Debug, Clone)]
pub enum ShellEvent {
    /// A line typed by the user
    Input { line: String },
    /// Standard input reached end-of-file
    InputClosed,
    /// Shutdown request (Ctrl+C)
    ShutdownRequested,
    /// Live debugger output (follow mode)
    Output { line: OutputLine },
    /// The debugger session changed state
    StateChanged { info: SessionInfo },
    /// Error raised by a background task
    Error { message: String },
}

/// Action channel for event processing
pub struct ActionChannel {
    /// Event sender
    event_tx: mpsc::UnboundedSender<ShellEvent>,
    /// Event receiver
    event_rx: Option<mpsc::UnboundedReceiver<ShellEvent>>,
}

impl Clone for ActionChannel {
    fn clone(&self) -> Self {
        Self {
            event_tx: self.event_tx.clone(),
            event_rx: None,
        }
    }
}

impl ActionChannel {
    /// Create a new ActionChannel
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Send event to channel
    pub fn send_event(&self, event: ShellEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .map_err(|e| anyhow::anyhow!("Failed to send event: {}", e))
    }

    /// Get next event from channel
    pub async fn next_event(&mut self) -> Option<ShellEvent> {
        if let Some(event_rx) = &mut self.event_rx {
            event_rx.recv().await
        } else {
            None
        }
    }

    /// Get event sender for external use
    pub fn event_tx(&self) -> mpsc::UnboundedSender<ShellEvent> {
        self.event_tx.clone()
    }

    /// Send error event
    pub fn send_error(&self, message: String) -> Result<()> {
        self.send_event(ShellEvent::Error { message })
    }

    /// Send shutdown request
    pub fn request_shutdown(&self) -> Result<()> {
        self.send_event(ShellEvent::ShutdownRequested)
    }
}

impl Default for ActionChannel {
    fn default() -> Self {
        Self::new()
    }
}
