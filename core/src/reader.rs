//! Blocking read loop over the controller side of the terminal.

use std::io::ErrorKind;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::pipeline::LinePipeline;

pub const READ_CHUNK_BYTES: usize = 4096;

/// What the read loop needs from the session that owns it. Every call carries
/// the session generation so a late reader cannot touch a newer session.
pub(crate) trait ReaderHost: Send + Sync {
    fn append_output(&self, chunk: String);

    fn publish_scalar(&self, generation: u64, scalar: i64);

    fn record_error(&self, generation: u64, message: String);

    /// Non-blocking reap; true once the child has exited.
    fn child_exited(&self, generation: u64) -> bool;

    /// Called once when the channel closed without a stop request.
    fn reader_finished(&self, generation: u64, cause: String);
}

/// Decodes UTF-8 across read boundaries. Invalid sequences become U+FFFD;
/// an incomplete trailing sequence is held back for the next chunk.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Drains a sequence left incomplete when the stream ended.
    pub(crate) fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

pub(crate) struct OutputReader<H: ReaderHost> {
    host: Arc<H>,
    generation: u64,
    active: Arc<AtomicBool>,
    reader: Box<dyn Read + Send>,
    decoder: Utf8Decoder,
    pipeline: LinePipeline,
    backoff: Duration,
}

impl<H: ReaderHost> OutputReader<H> {
    pub(crate) fn new(
        host: Arc<H>,
        generation: u64,
        active: Arc<AtomicBool>,
        reader: Box<dyn Read + Send>,
        pipeline: LinePipeline,
        backoff: Duration,
    ) -> Self {
        Self {
            host,
            generation,
            active,
            reader,
            decoder: Utf8Decoder::default(),
            pipeline,
            backoff,
        }
    }

    /// Runs until the channel closes or the session is deactivated. Meant for
    /// `spawn_blocking`.
    pub(crate) fn run(mut self) {
        let mut buf = [0u8; READ_CHUNK_BYTES];
        let cause = loop {
            if !self.active.load(Ordering::SeqCst) {
                tracing::debug!(generation = self.generation, "reader stopping on request");
                return;
            }
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    if self.host.child_exited(self.generation) {
                        break "terminal channel reached end of file".to_string();
                    }
                    std::thread::sleep(self.backoff);
                }
                Ok(n) => self.handle_chunk(&buf[..n]),
                Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(self.backoff);
                }
                Err(err) => break format!("terminal channel closed: {err}"),
            }
        };

        let tail = self.decoder.finish();
        if !tail.is_empty() {
            self.host.append_output(tail);
        }

        // A stop in progress owns the teardown.
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        tracing::debug!(generation = self.generation, "{cause}");
        self.host.reader_finished(self.generation, cause);
    }

    fn handle_chunk(&mut self, bytes: &[u8]) {
        let text = self.decoder.decode(bytes);
        if text.is_empty() {
            return;
        }
        self.host.append_output(text.clone());
        if let Err(err) = self.pipeline.push_text(&text) {
            tracing::warn!("failed to append gameplay event: {err}");
            self.host
                .record_error(self.generation, format!("event log write failed: {err}"));
        }
        self.host
            .publish_scalar(self.generation, self.pipeline.scalar());
    }
}
