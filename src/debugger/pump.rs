//! Background draining of debugger output into an ordered queue

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::process::ProcessOutput;
use super::types::{OutputLine, OutputStream};

const READ_BUFFER_SIZE: usize = 4096;

/// Live subscriber for debugger output.
///
/// Invoked synchronously on the pump task for every line; implementations
/// must not block.
pub trait LineObserver: Send + Sync {
    fn on_line(&self, line: &OutputLine) -> anyhow::Result<()>;
}

impl<F> LineObserver for F
where
    F: Fn(&OutputLine) -> anyhow::Result<()> + Send + Sync,
{
    fn on_line(&self, line: &OutputLine) -> anyhow::Result<()> {
        self(line)
    }
}

/// Holds at most one active observer, shared with the pump tasks
#[derive(Clone, Default)]
pub struct ObserverSlot {
    inner: Arc<RwLock<Option<Arc<dyn LineObserver>>>>,
}

impl ObserverSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `observer`, replacing any previous one
    pub fn set(&self, observer: Arc<dyn LineObserver>) {
        match self.inner.write() {
            Ok(mut slot) => *slot = Some(observer),
            Err(poisoned) => *poisoned.into_inner() = Some(observer),
        }
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    pub fn is_set(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<dyn LineObserver>> {
        match self.inner.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn notify(&self, line: &OutputLine) {
        let Some(observer) = self.current() else {
            return;
        };

        match catch_unwind(AssertUnwindSafe(|| observer.on_line(line))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Output observer failed on line {}: {}", line.seq, e),
            Err(_) => error!("Output observer panicked on line {}", line.seq),
        }
    }
}

struct PumpShared {
    seq: AtomicU64,
    observer: ObserverSlot,
    queue: mpsc::UnboundedSender<OutputLine>,
    partial_flush: Duration,
}

impl PumpShared {
    fn emit(&self, stream: OutputStream, raw: &[u8], partial: bool) {
        let text = decode_line(raw);
        let line = OutputLine {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            stream,
            text,
            partial,
            received_at: Instant::now(),
        };

        trace!(seq = line.seq, ?stream, partial, "{}", line.text);

        self.observer.notify(&line);
        if self.queue.send(line).is_err() {
            debug!("Output queue receiver dropped, discarding line");
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(raw).into_owned();
    while text.ends_with('\n') || text.ends_with('\r') {
        text.pop();
    }
    text
}

/// Reader tasks draining stdout and stderr for one process.
///
/// The queue closes once both pipes reach end-of-stream.
pub struct OutputPump {
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl OutputPump {
    /// Spawn the reader tasks and return the pump with its output queue
    pub fn start(
        output: ProcessOutput,
        observer: ObserverSlot,
        partial_flush: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<OutputLine>) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(PumpShared {
            seq: AtomicU64::new(0),
            observer,
            queue: queue_tx,
            partial_flush,
        });

        let tasks = vec![
            tokio::spawn(pump_stream(
                output.stdout,
                OutputStream::Stdout,
                shared.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(pump_stream(
                output.stderr,
                OutputStream::Stderr,
                shared,
                shutdown_rx,
            )),
        ];

        (Self { tasks, shutdown_tx }, queue_rx)
    }

    /// Whether any reader task is still draining its pipe
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Cancel the reader tasks and wait for them to finish
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            match tokio::time::timeout(Duration::from_secs(1), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => error!("Output pump task failed: {}", e),
                Err(_) => warn!("Output pump task did not stop in time"),
            }
        }
    }
}

impl Drop for OutputPump {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn pump_stream<R>(
    mut reader: R,
    stream: OutputStream,
    shared: Arc<PumpShared>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read = tokio::select! {
            _ = shutdown_rx.changed() => break,
            read = read_or_idle(&mut reader, &mut buf, !pending.is_empty(), shared.partial_flush) => read,
        };

        match read {
            // Idle with an unterminated chunk buffered: typically a prompt
            None => {
                shared.emit(stream, &pending, true);
                pending.clear();
            }
            Some(Ok(0)) => {
                if !pending.is_empty() {
                    shared.emit(stream, &pending, true);
                }
                debug!("Debugger {:?} reached end of stream", stream);
                break;
            }
            Some(Ok(n)) => {
                pending.extend_from_slice(&buf[..n]);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    shared.emit(stream, &line, false);
                }
            }
            Some(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Some(Err(e)) => {
                warn!("Error reading debugger {:?}: {}", stream, e);
                break;
            }
        }
    }
}

/// Read once; when `flush_when_idle` is set give up after `idle` and return `None`
async fn read_or_idle<R>(
    reader: &mut R,
    buf: &mut [u8],
    flush_when_idle: bool,
    idle: Duration,
) -> Option<std::io::Result<usize>>
where
    R: AsyncRead + Unpin,
{
    if flush_when_idle {
        tokio::time::timeout(idle, reader.read(buf)).await.ok()
    } else {
        Some(reader.read(buf).await)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::debugger::process::{LaunchSpec, ProcessSupervisor};
    use std::sync::Mutex;

    async fn collect(rx: &mut mpsc::UnboundedReceiver<OutputLine>) -> Vec<OutputLine> {
        let mut lines = Vec::new();
        while let Ok(Some(line)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_pump_merges_streams_and_flushes_partial_prompt() {
        let supervisor = ProcessSupervisor::new("exit", Duration::from_millis(200));
        let spec = LaunchSpec::new("/bin/sh").args([
            "-c",
            "echo first; echo oops 1>&2; printf '0:000> '; sleep 0.3; echo last",
        ]);
        let (_handle, output) = supervisor.start(&spec).unwrap();
        let (_pump, mut rx) = OutputPump::start(output, ObserverSlot::new(), Duration::from_millis(50));

        let lines = collect(&mut rx).await;
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();

        assert!(texts.contains(&"first"));
        assert!(texts.contains(&"oops"));
        assert!(texts.contains(&"last"));

        let prompt = lines.iter().find(|l| l.text == "0:000> ").unwrap();
        assert!(prompt.partial);
        assert_eq!(
            lines.iter().find(|l| l.text == "oops").unwrap().stream,
            OutputStream::Stderr
        );

        let stdout_seqs: Vec<u64> = lines
            .iter()
            .filter(|l| l.stream == OutputStream::Stdout)
            .map(|l| l.seq)
            .collect();
        assert!(stdout_seqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_stop_pump() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot = ObserverSlot::new();
        let sink = seen.clone();
        slot.set(Arc::new(move |line: &OutputLine| -> anyhow::Result<()> {
            sink.lock().unwrap().push(line.text.clone());
            anyhow::bail!("subscriber rejected {}", line.text)
        }));

        let supervisor = ProcessSupervisor::new("exit", Duration::from_millis(200));
        let spec = LaunchSpec::new("/bin/sh").args(["-c", "echo a; echo b; echo c"]);
        let (_handle, output) = supervisor.start(&spec).unwrap();
        let (_pump, mut rx) = OutputPump::start(output, slot, Duration::from_millis(50));

        let lines = collect(&mut rx).await;
        assert_eq!(lines.len(), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_decode_strips_crlf() {
        assert_eq!(decode_line(b"0:000> k\r\n"), "0:000> k");
        assert_eq!(decode_line(b"plain"), "plain");
    }
}
