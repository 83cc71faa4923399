//! Log watching - Kill a client as soon as its output shows a fatal error

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::process::{terminate, ProcessHandle};

/// Lines buffered between the output readers and the watcher
const LINE_BUFFER: usize = 256;

/// Longest line kept from client output; the remainder of a longer line is dropped
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Decides whether a line of client output is fatal
pub trait LineTrigger: Send + Sync {
    /// The marker found in `line`, if any
    fn detect(&self, line: &str) -> Option<&str>;
}

/// Exact substring match against a set of markers
#[derive(Debug, Clone, Default)]
pub struct MarkerTrigger {
    markers: Vec<String>,
}

impl MarkerTrigger {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }
}

impl LineTrigger for MarkerTrigger {
    fn detect(&self, line: &str) -> Option<&str> {
        self.markers
            .iter()
            .find(|marker| line.contains(marker.as_str()))
            .map(String::as_str)
    }
}

/// How a watcher finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Output ended, normally because the process exited
    StreamClosed { lines: usize },
    /// A fatal marker was seen on `line` and the process was killed
    Triggered { line: usize, marker: String },
    /// Reading output failed
    ReadFailed(String),
}

/// Watches one process's merged stdout/stderr
pub struct LogWatcher<H> {
    instance: String,
    handle: H,
    trigger: Arc<dyn LineTrigger>,
}

impl<H: ProcessHandle> LogWatcher<H> {
    pub fn new(instance: impl Into<String>, handle: H, trigger: Arc<dyn LineTrigger>) -> Self {
        Self {
            instance: instance.into(),
            handle,
            trigger,
        }
    }

    /// Merge both output streams and watch them on a detached task
    pub fn spawn<O, E>(self, stdout: Option<O>, stderr: Option<E>) -> JoinHandle<WatchOutcome>
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        if let Some(out) = stdout {
            tokio::spawn(forward_lines(out, tx.clone()));
        }
        if let Some(err) = stderr {
            tokio::spawn(forward_lines(err, tx.clone()));
        }
        drop(tx);

        tokio::spawn(self.run(rx))
    }

    /// Consume lines until the stream closes, fails, or a trigger fires
    pub async fn run(self, mut lines: mpsc::Receiver<io::Result<String>>) -> WatchOutcome {
        let mut count = 0;
        while let Some(next) = lines.recv().await {
            let raw = match next {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("[{}] Log monitor error: {}", self.instance, e);
                    return WatchOutcome::ReadFailed(e.to_string());
                }
            };
            count += 1;

            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            trace!("[{}] {}", self.instance, line);

            if let Some(marker) = self.trigger.detect(line) {
                warn!(
                    "[{}] Detected \"{}\" in output, killing process",
                    self.instance, marker
                );
                terminate(&self.handle, &self.instance);
                return WatchOutcome::Triggered {
                    line: count,
                    marker: marker.to_string(),
                };
            }
        }

        debug!("[{}] Output closed after {} lines", self.instance, count);
        WatchOutcome::StreamClosed { lines: count }
    }
}

/// Read newline-terminated chunks, decoding lossily so bad bytes never stop the watcher
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<io::Result<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match read_capped_line(&mut reader, &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(Ok(line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
}

/// Like `read_until(b'\n')`, keeping at most `MAX_LINE_BYTES` and skipping the rest of the line
async fn read_capped_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES)
        .read_until(b'\n', buf)
        .await?;
    if read as u64 == MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }
            let newline = available.iter().position(|&b| b == b'\n');
            let len = available.len();
            match newline {
                Some(pos) => {
                    reader.consume(pos + 1);
                    break;
                }
                None => reader.consume(len),
            }
        }
    }
    Ok(read)
}
