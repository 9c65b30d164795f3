//! Startup gate: wait until the debugger sits at its interactive prompt

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::error::DebuggerError;
use super::protocol::PromptMatcher;
use super::types::OutputLine;

const TRANSCRIPT_LINES: usize = 50;

/// What made the gate open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyTrigger {
    /// A line matched one of the prompt patterns
    Prompt,
    /// Output went quiet after a `>` had been seen
    Quiescence,
}

#[derive(Debug, Clone)]
pub struct ReadyOutcome {
    pub trigger: ReadyTrigger,
    /// Last startup lines (banner, symbol loading, prompt)
    pub transcript: Vec<String>,
    pub elapsed: Duration,
}

pub struct ReadinessGate<'a> {
    prompt: &'a PromptMatcher,
    quiet_interval: Duration,
    poll_interval: Duration,
}

impl<'a> ReadinessGate<'a> {
    pub fn new(prompt: &'a PromptMatcher, quiet_interval: Duration, poll_interval: Duration) -> Self {
        Self {
            prompt,
            quiet_interval,
            poll_interval,
        }
    }

    /// Drain startup output until a prompt shows up or `timeout` elapses
    pub async fn await_ready(
        &self,
        queue: &mut mpsc::UnboundedReceiver<OutputLine>,
        timeout: Duration,
    ) -> Result<ReadyOutcome, DebuggerError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut last_output = started;
        let mut seen_angle = false;
        let mut transcript: VecDeque<String> = VecDeque::with_capacity(TRANSCRIPT_LINES);

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(DebuggerError::ReadinessTimeout {
                    timeout,
                    transcript: transcript.into(),
                });
            }

            let wait = self.poll_interval.min(deadline - now);
            match tokio::time::timeout(wait, queue.recv()).await {
                Ok(Some(line)) => {
                    last_output = Instant::now();
                    seen_angle |= line.text.contains('>');

                    if transcript.len() == TRANSCRIPT_LINES {
                        transcript.pop_front();
                    }
                    transcript.push_back(line.text.clone());

                    if self.prompt.is_prompt(&line.text) {
                        info!("Debugger prompt detected after {:?}", started.elapsed());
                        return Ok(ReadyOutcome {
                            trigger: ReadyTrigger::Prompt,
                            transcript: transcript.into(),
                            elapsed: started.elapsed(),
                        });
                    }
                }
                Ok(None) => {
                    debug!("Debugger output closed during startup");
                    return Err(DebuggerError::ProcessExited { status: None });
                }
                Err(_) => {
                    if seen_angle && last_output.elapsed() >= self.quiet_interval {
                        info!(
                            "No prompt matched, output quiet for {:?}; assuming ready",
                            self.quiet_interval
                        );
                        return Ok(ReadyOutcome {
                            trigger: ReadyTrigger::Quiescence,
                            transcript: transcript.into(),
                            elapsed: started.elapsed(),
                        });
                    }
                }
            }
        }
    }
}
