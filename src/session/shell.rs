//! Interactive shell over one debugger session

use anyhow::Result;
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::debugger::protocol::contains_marker;
use crate::debugger::{OutputLine, SessionManager, SessionState};
use crate::ui::cli as ui;

use super::action_channel::{ActionChannel, ShellEvent};
use super::command_router::{CommandRouter, ShellCommand};

/// Shell loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Running,
    ShuttingDown,
    Terminated,
}

/// Reads user input, forwards debugger commands and renders results
pub struct ShellSession {
    session: Arc<SessionManager>,
    router: CommandRouter,
    action_channel: ActionChannel,
    follow: Arc<AtomicBool>,
    state: ShellState,
    /// Events that arrived while a command was in flight
    deferred: VecDeque<ShellEvent>,
    background: Vec<tokio::task::JoinHandle<()>>,
}

impl ShellSession {
    /// Create a new ShellSession
    pub fn new(config: &Config, follow: bool) -> Result<Self> {
        info!("Creating new ShellSession");

        let session = Arc::new(SessionManager::from_config(config)?);
        let follow = Arc::new(AtomicBool::new(follow));

        let action_channel = ActionChannel::new();
        let live = follow.clone();
        let live_tx = action_channel.event_tx();
        session.on_line(move |line: &OutputLine| -> Result<()> {
            if live.load(Ordering::Relaxed) && !contains_marker(&line.text) {
                live_tx
                    .send(ShellEvent::Output { line: line.clone() })
                    .map_err(|_| anyhow::anyhow!("shell event channel closed"))?;
            }
            Ok(())
        });

        Ok(Self {
            session,
            router: CommandRouter::new(),
            action_channel,
            follow,
            state: ShellState::Running,
            deferred: VecDeque::new(),
            background: Vec::new(),
        })
    }

    /// Debugger session driven by this shell
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Open `artifact` and process input until quit, Ctrl+C or end of input.
    ///
    /// The debugger session is always closed before this returns.
    pub async fn run(&mut self, artifact: &Path) -> Result<()> {
        ui::display_welcome(&artifact.display().to_string());
        self.spawn_background_tasks();

        self.open(artifact).await;

        let result = self.event_loop().await;

        self.shutdown().await?;
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        while self.state == ShellState::Running {
            ui::display_prompt(self.session.state());

            let event = match self.deferred.pop_front() {
                Some(event) => event,
                None => match self.action_channel.next_event().await {
                    Some(event) => event,
                    None => {
                        warn!("Shell event channel closed");
                        break;
                    }
                },
            };
            self.handle_event(event).await?;
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: ShellEvent) -> Result<()> {
        match event {
            ShellEvent::Input { line } => match self.router.parse(&line) {
                Ok(Some(command)) => self.handle_command(command).await?,
                Ok(None) => {}
                Err(e) => ui::display_error(&e.to_string()),
            },
            ShellEvent::InputClosed => {
                info!("End of input, leaving shell");
                self.state = ShellState::ShuttingDown;
            }
            ShellEvent::ShutdownRequested => {
                info!("Ctrl+C received, leaving shell");
                println!();
                self.state = ShellState::ShuttingDown;
            }
            ShellEvent::Output { line } => ui::display_live_line(&line),
            ShellEvent::StateChanged { info } => {
                if info.state == SessionState::Closed {
                    if let Some(failure) = &info.last_error {
                        ui::display_error(&failure.message);
                    }
                }
                ui::display_state_change(&info);
            }
            ShellEvent::Error { message } => ui::display_error(&message),
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: ShellCommand) -> Result<()> {
        debug!("Handling shell command: {:?}", command);

        match command {
            ShellCommand::Debugger { command } | ShellCommand::Run { command } => {
                self.execute(&command).await;
            }
            ShellCommand::Open { path } => {
                self.open(&path).await;
            }
            ShellCommand::Close => {
                if let Err(e) = self.session.close().await {
                    ui::display_error(&e.report());
                }
            }
            ShellCommand::Status => {
                ui::display_status(&self.session.status())
                    .map_err(|e| anyhow::anyhow!("{}", e))?;
            }
            ShellCommand::History => {
                ui::display_history(&self.session.history())
                    .map_err(|e| anyhow::anyhow!("{}", e))?;
            }
            ShellCommand::Aliases => {
                ui::display_aliases().map_err(|e| anyhow::anyhow!("{}", e))?;
            }
            ShellCommand::Follow { enabled } => {
                self.follow.store(enabled, Ordering::Relaxed);
                ui::display_info(if enabled {
                    "Live output on"
                } else {
                    "Live output off"
                });
            }
            ShellCommand::Help => ui::display_help(&self.router.help_messages()),
            ShellCommand::Quit => {
                self.state = ShellState::ShuttingDown;
            }
        }
        Ok(())
    }

    async fn open(&self, artifact: &Path) {
        ui::display_info(&format!("Loading {} ...", artifact.display()));
        match self.session.open(artifact).await {
            Ok(()) => ui::display_info("Debugger ready"),
            Err(e) => {
                error!("Failed to open {}: {}", artifact.display(), e);
                ui::display_error(&e.report());
            }
        }
    }

    /// Run one debugger command, rendering live output while it is in flight.
    ///
    /// Ctrl+C abandons the command and ends the shell; other events are
    /// deferred until the command finishes.
    async fn execute(&mut self, command: &str) {
        let session = self.session.clone();
        let following = self.follow.load(Ordering::Relaxed);

        let execution = session.execute(command);
        tokio::pin!(execution);

        loop {
            tokio::select! {
                result = &mut execution => {
                    match result {
                        Ok(result) => ui::display_result(&result, !following),
                        Err(e) => ui::display_error(&e.report()),
                    }
                    break;
                }
                Some(event) = self.action_channel.next_event() => match event {
                    ShellEvent::Output { line } => ui::display_live_line(&line),
                    ShellEvent::ShutdownRequested => {
                        warn!("Ctrl+C while '{}' was running", command);
                        println!();
                        self.state = ShellState::ShuttingDown;
                        break;
                    }
                    other => self.deferred.push_back(other),
                },
            }
        }
    }

    fn spawn_background_tasks(&mut self) {
        // User input, on a plain thread so a pending read never holds up
        // runtime shutdown
        let input_tx = self.action_channel.event_tx();
        let reader = std::thread::Builder::new()
            .name("dbgshell-stdin".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    match line {
                        Ok(line) => {
                            if input_tx.send(ShellEvent::Input { line }).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = input_tx.send(ShellEvent::Error {
                                message: format!("Failed to read input: {}", e),
                            });
                            break;
                        }
                    }
                }
                let _ = input_tx.send(ShellEvent::InputClosed);
            });
        if let Err(e) = reader {
            error!("Failed to start input reader: {}", e);
            let _ = self.action_channel.send_event(ShellEvent::InputClosed);
        }

        // Ctrl+C
        let signal_channel = self.action_channel.clone();
        self.background.push(tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            let _ = signal_channel.request_shutdown();
        }));

        // Session state notices
        let mut status_rx = self.session.subscribe_status();
        let status_tx = self.action_channel.event_tx();
        self.background.push(tokio::spawn(async move {
            let mut last = status_rx.borrow().state;
            while status_rx.changed().await.is_ok() {
                let info = status_rx.borrow_and_update().clone();
                if info.state == last {
                    continue;
                }
                last = info.state;
                if status_tx.send(ShellEvent::StateChanged { info }).is_err() {
                    break;
                }
            }
        }));
    }

    /// Graceful shutdown: close the debugger and stop background tasks
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state == ShellState::Terminated {
            return Ok(());
        }
        info!("Initiating shell shutdown");
        self.state = ShellState::ShuttingDown;

        if let Err(e) = self.session.close().await {
            error!("Failed to close debugger session: {}", e);
        }
        self.session.clear_observer();

        for task in self.background.drain(..) {
            task.abort();
        }

        self.state = ShellState::Terminated;
        info!("Shell shutdown completed");
        Ok(())
    }

    pub fn state(&self) -> ShellState {
        self.state
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        if self.state != ShellState::Terminated {
            warn!("ShellSession dropped without proper shutdown");
        }
    }
}
