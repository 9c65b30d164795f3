//! Request/response framing over the shared debugger output stream

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{histogram, increment_counter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::process::ProcessHandle;
use super::protocol::{MarkerProtocol, PromptMatcher, generate_marker};
use super::types::{CommandResult, OutputLine, OutputStream};

const MAX_ORPHANED_MARKERS: usize = 16;

/// Accumulates lines for one command until its marker shows up
pub struct ResponseFramer<'a> {
    marker: &'a str,
    echo_instruction: String,
    protocol: &'a MarkerProtocol,
    prompt: &'a PromptMatcher,
    orphaned: &'a mut VecDeque<String>,
    lines: Vec<String>,
    /// Unterminated chunk waiting for the rest of its line
    pending: Option<(OutputStream, String)>,
}

impl<'a> ResponseFramer<'a> {
    pub fn new(
        marker: &'a str,
        protocol: &'a MarkerProtocol,
        prompt: &'a PromptMatcher,
        orphaned: &'a mut VecDeque<String>,
    ) -> Self {
        Self {
            marker,
            echo_instruction: protocol.echo_instruction(marker),
            protocol,
            prompt,
            orphaned,
            lines: Vec::new(),
            pending: None,
        }
    }

    /// Feed one line; returns the framed output once the marker is seen.
    ///
    /// Partial chunks are joined with whatever follows on the same stream,
    /// so a pause inside a line never splits it.
    pub fn push(&mut self, line: &OutputLine) -> Option<String> {
        let text = match self.pending.take() {
            Some((stream, mut head)) if stream == line.stream => {
                head.push_str(&line.text);
                head
            }
            Some((_, other)) => {
                self.lines.push(other);
                line.text.clone()
            }
            None => line.text.clone(),
        };

        if line.partial && !self.mentions_marker(&text) {
            self.pending = Some((line.stream, text));
            return None;
        }
        self.push_complete(&text)
    }

    fn mentions_marker(&self, text: &str) -> bool {
        text.contains(self.marker) || self.orphaned.iter().any(|old| text.contains(old.as_str()))
    }

    fn push_complete(&mut self, line: &str) -> Option<String> {
        if line.contains(&self.echo_instruction) {
            return None;
        }

        if let Some(pos) = line.find(self.marker) {
            self.forget_orphan(self.marker);
            let head = &line[..pos];
            if !head.trim().is_empty() {
                self.lines.push(head.to_string());
            }
            return Some(self.render());
        }

        if let Some(old) = self
            .orphaned
            .iter()
            .find(|old| line.contains(old.as_str()))
            .cloned()
        {
            if line.contains(&self.protocol.echo_instruction(&old)) {
                return None;
            }
            // Late tail of a command that timed out or was abandoned
            debug!(
                "Discarding {} lines from an unfinished command",
                self.lines.len() + 1
            );
            self.forget_orphan(&old);
            self.lines.clear();
            return None;
        }

        self.lines.push(line.to_string());
        None
    }

    fn forget_orphan(&mut self, marker: &str) {
        self.orphaned.retain(|old| old != marker);
    }

    /// Output accumulated so far, without prompt artifacts
    pub fn render(&self) -> String {
        let pending = self.pending.as_ref().map(|(_, text)| text);
        let mut cleaned: Vec<&str> = Vec::with_capacity(self.lines.len() + 1);
        for line in self.lines.iter().chain(pending) {
            let stripped = self.prompt.strip_prompt(line);
            let was_prompt = stripped.len() != line.len();
            if was_prompt && stripped.trim().is_empty() {
                continue;
            }
            cleaned.push(stripped);
        }

        let first = cleaned
            .iter()
            .position(|line| !line.trim().is_empty())
            .unwrap_or(cleaned.len());

        cleaned[first..].join("\n").trim_end().to_string()
    }
}

/// Serialized command protocol for one debugger process.
///
/// Callers hold exclusive access (`&mut self`) for the whole exchange,
/// which is what keeps a single command in flight.
pub struct CommandChannel {
    handle: Arc<ProcessHandle>,
    output: mpsc::UnboundedReceiver<OutputLine>,
    protocol: MarkerProtocol,
    prompt: PromptMatcher,
    poll_interval: Duration,
    orphaned: VecDeque<String>,
}

impl CommandChannel {
    pub fn new(
        handle: Arc<ProcessHandle>,
        output: mpsc::UnboundedReceiver<OutputLine>,
        protocol: MarkerProtocol,
        prompt: PromptMatcher,
        poll_interval: Duration,
    ) -> Self {
        Self {
            handle,
            output,
            protocol,
            prompt,
            poll_interval,
            orphaned: VecDeque::new(),
        }
    }

    /// Discard whatever is already queued, settling any unfinished
    /// command whose marker is among it
    pub fn drain_stale(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(line) = self.output.try_recv() {
            debug!("Discarding stale output: {}", line.text);
            self.orphaned.retain(|old| !line.text.contains(old.as_str()));
            discarded += 1;
        }
        discarded
    }

    /// Send `command` and collect exactly its output.
    ///
    /// The marker is registered as outstanding before the command is
    /// written and only cleared once it comes back, so dropping this future
    /// mid-command leaves the late tail to be discarded by the next call.
    pub async fn execute(&mut self, command: &str, timeout: Duration) -> CommandResult {
        let started = Instant::now();
        increment_counter!("dbgshell_commands_total");

        let stale = self.drain_stale();
        if stale > 0 {
            debug!("Dropped {} stale lines before '{}'", stale, command);
        }

        let marker = generate_marker();
        let payload = self.protocol.render(command, &marker);
        debug!("Sending command: {}", payload);
        self.remember_orphan(marker.clone());

        if let Err(e) = self.handle.write_line(&payload).await {
            warn!("Failed to write command '{}': {}", command, e);
            self.orphaned.pop_back();
            let elapsed = started.elapsed();
            histogram!("dbgshell_command_duration_seconds", elapsed.as_secs_f64());
            return CommandResult::exited(command, String::new(), elapsed);
        }

        let deadline = started + timeout;
        let mut framer =
            ResponseFramer::new(&marker, &self.protocol, &self.prompt, &mut self.orphaned);

        let result = 'exchange: loop {
            let now = Instant::now();
            if now >= deadline {
                break None;
            }

            let wait = self.poll_interval.min(deadline - now);
            match tokio::time::timeout(wait, self.output.recv()).await {
                Ok(Some(line)) => {
                    if let Some(output) = framer.push(&line) {
                        break Some(Ok(output));
                    }
                }
                Ok(None) => break Some(Err(framer.render())),
                Err(_) => {
                    if !self.handle.is_alive() {
                        while let Ok(line) = self.output.try_recv() {
                            if let Some(output) = framer.push(&line) {
                                break 'exchange Some(Ok(output));
                            }
                        }
                        break Some(Err(framer.render()));
                    }
                }
            }
        };

        let elapsed = started.elapsed();
        histogram!("dbgshell_command_duration_seconds", elapsed.as_secs_f64());

        match result {
            Some(Ok(output)) => {
                debug!("Command '{}' completed in {:?}", command, elapsed);
                CommandResult::completed(command, output, elapsed)
            }
            Some(Err(partial)) => {
                warn!("Debugger exited while running '{}'", command);
                CommandResult::exited(command, partial, elapsed)
            }
            None => {
                let partial = framer.render();
                increment_counter!("dbgshell_command_timeouts_total");
                info!("Command '{}' timed out after {:?}", command, timeout);
                CommandResult::timed_out(command, partial, timeout)
            }
        }
    }

    fn remember_orphan(&mut self, marker: String) {
        if self.orphaned.len() == MAX_ORPHANED_MARKERS {
            self.orphaned.pop_front();
        }
        self.orphaned.push_back(marker);
    }

    pub fn handle(&self) -> &Arc<ProcessHandle> {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> MarkerProtocol {
        MarkerProtocol::new(";", ".echo {marker}").unwrap()
    }

    fn out(text: &str) -> OutputLine {
        OutputLine {
            seq: 0,
            stream: OutputStream::Stdout,
            text: text.to_string(),
            partial: false,
            received_at: Instant::now(),
        }
    }

    fn partial(text: &str) -> OutputLine {
        OutputLine {
            partial: true,
            ..out(text)
        }
    }

    #[test]
    fn test_framer_stops_at_marker_and_strips_prompt() {
        let prompt = PromptMatcher::default();
        let protocol = protocol();
        let mut orphaned = VecDeque::new();
        let mut framer = ResponseFramer::new("MARK42", &protocol, &prompt, &mut orphaned);

        assert_eq!(framer.push(&out("0:000> ")), None);
        assert_eq!(framer.push(&out("0:000> Child-SP          RetAddr")), None);
        assert_eq!(framer.push(&out("00 ntdll!KiUserExceptionDispatch")), None);
        assert_eq!(framer.push(&out("   ")), None);

        let output = framer.push(&out("MARK42")).unwrap();
        assert_eq!(
            output,
            "Child-SP          RetAddr\n00 ntdll!KiUserExceptionDispatch"
        );
        assert!(!output.contains("MARK42"));
    }

    #[test]
    fn test_framer_keeps_text_before_marker_on_same_line() {
        let prompt = PromptMatcher::default();
        let protocol = protocol();
        let mut orphaned = VecDeque::new();
        let mut framer = ResponseFramer::new("MARK", &protocol, &prompt, &mut orphaned);

        assert_eq!(framer.push(&out("result: 42 MARK")).unwrap(), "result: 42");
    }

    #[test]
    fn test_framer_ignores_echoed_input() {
        let prompt = PromptMatcher::default();
        let protocol = protocol();
        let mut orphaned = VecDeque::new();
        let mut framer = ResponseFramer::new("MARK", &protocol, &prompt, &mut orphaned);

        assert_eq!(framer.push(&out("0:000> r;.echo MARK")), None);
        assert_eq!(framer.push(&out("eax=00000000")), None);
        assert_eq!(framer.push(&out("MARK")).unwrap(), "eax=00000000");
    }

    #[test]
    fn test_framer_discards_tail_of_unfinished_command() {
        let prompt = PromptMatcher::default();
        let protocol = protocol();
        let mut orphaned = VecDeque::from(vec!["OLD".to_string(), "NEW".to_string()]);
        let mut framer = ResponseFramer::new("NEW", &protocol, &prompt, &mut orphaned);

        assert_eq!(framer.push(&out("late output")), None);
        assert_eq!(framer.push(&out("OLD")), None);
        assert_eq!(framer.push(&out("0:000> fresh output")), None);
        assert_eq!(framer.push(&out("NEW")).unwrap(), "fresh output");
        drop(framer);
        assert!(orphaned.is_empty());
    }

    #[test]
    fn test_framer_joins_partial_chunks() {
        let prompt = PromptMatcher::default();
        let protocol = protocol();
        let mut orphaned = VecDeque::new();
        let mut framer = ResponseFramer::new("MARK", &protocol, &prompt, &mut orphaned);

        assert_eq!(framer.push(&partial("abc")), None);
        assert_eq!(framer.push(&out("def")), None);
        assert_eq!(framer.push(&partial("MA")), None);
        assert_eq!(framer.push(&out("RK")).unwrap(), "abcdef");
    }

    #[test]
    fn test_framer_keeps_streams_apart() {
        let prompt = PromptMatcher::default();
        let protocol = protocol();
        let mut orphaned = VecDeque::new();
        let mut framer = ResponseFramer::new("MARK", &protocol, &prompt, &mut orphaned);

        assert_eq!(framer.push(&partial("progress")), None);
        let warning = OutputLine {
            stream: OutputStream::Stderr,
            ..out("warning")
        };
        assert_eq!(framer.push(&warning), None);
        assert_eq!(framer.render(), "progress\nwarning");
    }

    #[test]
    fn test_render_of_empty_output() {
        let prompt = PromptMatcher::default();
        let protocol = protocol();
        let mut orphaned = VecDeque::new();
        let mut framer = ResponseFramer::new("M", &protocol, &prompt, &mut orphaned);

        assert_eq!(framer.push(&partial("0:000> ")), None);
        assert_eq!(framer.push(&out("M")).unwrap(), "");
    }
}
