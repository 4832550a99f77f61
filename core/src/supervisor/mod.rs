//! Lifecycle of one upstream program attached to a pseudo-terminal.
//!
//! A [`Supervisor`] owns at most one live child at a time. All mutable
//! session state sits behind a single mutex; the only work done outside it is
//! command resolution, spawning, sleeping between shutdown polls, and the
//! blocking terminal read. Every start bumps a generation counter so that a
//! reader left over from an earlier session can never tear down a newer one.

mod errors;
mod pty;
mod signal;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use portable_pty::Child;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::time::Instant;
use toybox_utils_ring_buffer::RingBuffer;

use crate::adapter::AdapterSpec;
use crate::command::resolve_command_from_env;
use crate::config::SupervisorSettings;
use crate::event_log::DomainEvent;
use crate::event_log::EventLog;
use crate::event_log::Payload;
use crate::parser::LineParser;
use crate::parser::ScalarTracker;
use crate::pipeline::LinePipeline;
use crate::reader::OutputReader;
use crate::reader::ReaderHost;

pub use errors::SupervisorError;

pub const RUNTIME_STARTED_EVENT: &str = "TOYBOX_RUNTIME_STARTED";
pub const RUNTIME_STOPPED_EVENT: &str = "TOYBOX_RUNTIME_STOPPED";

/// How long the reader keeps trying to reap after the channel closes before
/// the child is presumed wedged and killed.
const REAP_GRACE: Duration = Duration::from_secs(1);
/// How long to wait for the child to disappear after SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Outcome of spawning for a claimed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Launch {
    Running,
    /// A stop arrived while spawning; the new child was killed and reaped.
    Discarded { pid: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// How the child ended. A signal death carries the signal description and no
/// exit code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
}

impl From<&portable_pty::ExitStatus> for ExitInfo {
    fn from(status: &portable_pty::ExitStatus) -> Self {
        match status.signal() {
            Some(signal) => Self {
                exit_code: None,
                signal: Some(signal.to_string()),
            },
            None => Self {
                exit_code: i32::try_from(status.exit_code()).ok(),
                signal: None,
            },
        }
    }
}

/// Point-in-time view of the session, serialized as the `/status` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub adapter_id: String,
    pub state: SessionState,
    /// True only while the session is running and the child still exists.
    pub running: bool,
    pub pid: Option<u32>,
    pub resolved_command: Option<Vec<String>>,
    pub last_error: Option<String>,
    pub last_scalar: i64,
    pub exit_code: Option<i32>,
    pub terminating_signal: Option<String>,
}

struct Session {
    state: SessionState,
    generation: u64,
    pid: Option<u32>,
    child: Option<Box<dyn Child + Send + Sync>>,
    channel: Option<pty::PtyChannel>,
    resolved_command: Option<Vec<String>>,
    exit: Option<ExitInfo>,
    last_error: Option<String>,
    last_scalar: i64,
    /// Cleared when the session is being torn down; the reader checks it
    /// before every read.
    active: Arc<AtomicBool>,
}

impl Session {
    fn new(initial_scalar: i64) -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            pid: None,
            child: None,
            channel: None,
            resolved_command: None,
            exit: None,
            last_error: None,
            last_scalar: initial_scalar,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Non-blocking wait. The first observed exit is cached so later calls
    /// agree with it.
    fn reap(&mut self) -> Option<ExitInfo> {
        if let Some(exit) = &self.exit {
            return Some(exit.clone());
        }
        let child = self.child.as_mut()?;
        let exit = match child.try_wait() {
            Ok(Some(status)) => ExitInfo::from(&status),
            Ok(None) => return None,
            Err(err) => {
                // Already collected elsewhere; the status is gone.
                tracing::debug!("try_wait failed: {err}");
                ExitInfo::default()
            }
        };
        self.exit = Some(exit.clone());
        Some(exit)
    }

    /// Drops the channel and child handle. Taking the channel out of its
    /// `Option` under the lock is what makes release happen once.
    fn release(&mut self, next: SessionState) -> bool {
        self.active.store(false, Ordering::SeqCst);
        let released = self.channel.take().is_some();
        self.child = None;
        self.pid = None;
        self.state = next;
        released
    }
}

struct Inner {
    spec: AdapterSpec,
    settings: SupervisorSettings,
    source: String,
    parser: Arc<dyn LineParser>,
    tracker: ScalarTracker,
    events: Arc<EventLog>,
    session: Mutex<Session>,
    output: Mutex<RingBuffer<String>>,
}

impl Inner {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_output(&self) -> MutexGuard<'_, RingBuffer<String>> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event_type: &str, payload: Payload) {
        let event = DomainEvent::new(&self.source, event_type, payload);
        if let Err(err) = self.events.append(&event) {
            tracing::warn!(adapter_id = %self.spec.id, "failed to record {event_type}: {err}");
        }
    }

    fn emit_stopped(&self, reason: &str, exit: Option<&ExitInfo>) {
        let mut payload = Payload::new();
        payload.insert("reason".to_string(), Value::from(reason));
        if let Some(exit) = exit {
            if let Some(code) = exit.exit_code {
                payload.insert("exit_code".to_string(), Value::from(code));
            }
            if let Some(signal) = &exit.signal {
                payload.insert("signal".to_string(), Value::from(signal.as_str()));
            }
        }
        self.emit(RUNTIME_STOPPED_EVENT, payload);
    }

    fn fail_start(&self, generation: u64, err: &SupervisorError) {
        tracing::warn!(adapter_id = %self.spec.id, "failed to start runtime: {err}");
        let mut session = self.lock_session();
        if session.generation != generation {
            return;
        }
        session.active.store(false, Ordering::SeqCst);
        session.state = SessionState::Failed;
        session.last_error = Some(err.to_string());
    }

    fn force_kill(&self, generation: u64, pid: Option<u32>) {
        let delivered = match pid {
            Some(pid) => match signal::force_kill(pid) {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!(pid, "SIGKILL failed: {err}");
                    false
                }
            },
            None => false,
        };
        if delivered {
            return;
        }
        let mut session = self.lock_session();
        if session.generation != generation {
            return;
        }
        if let Some(child) = session.child.as_mut()
            && let Err(err) = child.kill()
        {
            tracing::warn!(adapter_id = %self.spec.id, "failed to kill runtime: {err}");
        }
    }

    /// Releases the session if it still belongs to `generation` and has not
    /// been released yet.
    fn finish(
        &self,
        generation: u64,
        next: SessionState,
        exit: Option<ExitInfo>,
        last_error: Option<String>,
    ) -> bool {
        let mut session = self.lock_session();
        if session.generation != generation {
            return false;
        }
        if exit.is_some() {
            session.exit = exit;
        }
        if last_error.is_some() {
            session.last_error = last_error;
        }
        session.release(next)
    }
}

impl ReaderHost for Inner {
    fn append_output(&self, chunk: String) {
        self.lock_output().push(chunk);
    }

    fn publish_scalar(&self, generation: u64, scalar: i64) {
        let mut session = self.lock_session();
        if session.generation == generation {
            session.last_scalar = scalar;
        }
    }

    fn record_error(&self, generation: u64, message: String) {
        let mut session = self.lock_session();
        if session.generation == generation {
            session.last_error = Some(message);
        }
    }

    fn child_exited(&self, generation: u64) -> bool {
        let mut session = self.lock_session();
        session.generation == generation && session.reap().is_some()
    }

    fn reader_finished(&self, generation: u64, cause: String) {
        let deadline = std::time::Instant::now() + REAP_GRACE;
        while std::time::Instant::now() < deadline {
            {
                let mut session = self.lock_session();
                if session.generation != generation || session.state != SessionState::Running {
                    return;
                }
                if let Some(exit) = session.reap() {
                    session.last_error = Some(cause);
                    session.release(SessionState::Stopped);
                    drop(session);
                    tracing::info!(adapter_id = %self.spec.id, ?exit, "runtime exited");
                    self.emit_stopped("exited", Some(&exit));
                    return;
                }
            }
            std::thread::sleep(self.settings.read_backoff());
        }

        let pid = {
            let session = self.lock_session();
            if session.generation != generation || session.state != SessionState::Running {
                return;
            }
            session.pid
        };
        tracing::warn!(
            adapter_id = %self.spec.id,
            "terminal channel failed while the runtime is alive; killing it: {cause}"
        );
        self.force_kill(generation, pid);

        let deadline = std::time::Instant::now() + KILL_GRACE;
        let exit = loop {
            {
                let mut session = self.lock_session();
                if session.generation != generation || session.state != SessionState::Running {
                    return;
                }
                if let Some(exit) = session.reap() {
                    break Some(exit);
                }
            }
            if std::time::Instant::now() >= deadline {
                break None;
            }
            std::thread::sleep(self.settings.read_backoff());
        };

        {
            let mut session = self.lock_session();
            if session.generation != generation || session.state != SessionState::Running {
                return;
            }
            session.last_error = Some(cause);
            session.release(SessionState::Failed);
        }
        self.emit_stopped("channel_failed", exit.as_ref());
    }
}

/// Supervises one adapter's upstream program. Cheap to share behind an
/// `Arc`; every method takes `&self`.
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        spec: AdapterSpec,
        settings: SupervisorSettings,
        events: Arc<EventLog>,
    ) -> Result<Self, SupervisorError> {
        let parser = spec.build_parser().map_err(|err| {
            SupervisorError::configuration(format!("invalid parser rules for {}: {err}", spec.id))
        })?;
        let tracker = spec.scalar_tracker().map_err(|err| {
            SupervisorError::configuration(format!("invalid scalar pattern for {}: {err}", spec.id))
        })?;
        let output = RingBuffer::new(settings.output_capacity);
        Ok(Self {
            inner: Arc::new(Inner {
                source: spec.source(),
                session: Mutex::new(Session::new(spec.scalar_initial)),
                output: Mutex::new(output),
                spec,
                settings,
                parser,
                tracker,
                events,
            }),
        })
    }

    /// Like [`Supervisor::new`], opening the event log named by `settings`.
    pub fn open(spec: AdapterSpec, settings: SupervisorSettings) -> Result<Self, SupervisorError> {
        let path = settings.events_path();
        let events = EventLog::open(path.clone()).map_err(|err| {
            SupervisorError::configuration(format!(
                "cannot open event log {}: {err}",
                path.display()
            ))
        })?;
        Self::new(spec, settings, Arc::new(events))
    }

    pub fn adapter(&self) -> &AdapterSpec {
        &self.inner.spec
    }

    pub fn events(&self) -> &EventLog {
        &self.inner.events
    }

    /// Resolves the command, spawns it on a new terminal and starts the
    /// reader. A no-op while a session is starting, running or stopping.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let Some((generation, active)) = self.claim_start() else {
            return Ok(());
        };
        if let Launch::Discarded { pid } = self.launch(generation, active).await? {
            tracing::info!(
                adapter_id = %self.inner.spec.id,
                ?pid,
                "stop requested during launch; runtime discarded"
            );
        }
        Ok(())
    }

    /// Moves the session to `Starting` under a fresh generation, or returns
    /// `None` when a session is already live.
    fn claim_start(&self) -> Option<(u64, Arc<AtomicBool>)> {
        let mut session = self.inner.lock_session();
        if matches!(
            session.state,
            SessionState::Starting | SessionState::Running | SessionState::Stopping
        ) {
            tracing::debug!(state = ?session.state, "start ignored");
            return None;
        }
        session.generation += 1;
        session.state = SessionState::Starting;
        session.exit = None;
        session.last_error = None;
        session.resolved_command = None;
        session.last_scalar = self.inner.spec.scalar_initial;
        session.active = Arc::new(AtomicBool::new(true));
        Some((session.generation, Arc::clone(&session.active)))
    }

    async fn launch(
        &self,
        generation: u64,
        active: Arc<AtomicBool>,
    ) -> Result<Launch, SupervisorError> {
        let launched = resolve_command_from_env(&self.inner.spec).and_then(|argv| {
            let spawned = pty::spawn_runtime(&argv, &self.inner.settings)?;
            Ok((argv, spawned))
        });
        let (argv, spawned) = match launched {
            Ok(launched) => launched,
            Err(err) => {
                self.inner.fail_start(generation, &err);
                return Err(err);
            }
        };
        let pty::SpawnedRuntime {
            mut child,
            pid,
            channel,
            reader,
        } = spawned;

        {
            let mut session = self.inner.lock_session();
            if session.generation != generation || session.state != SessionState::Starting {
                drop(session);
                drop(channel);
                let reaped = tokio::task::spawn_blocking(move || {
                    let _ = child.kill();
                    child.wait()
                })
                .await;
                if let Ok(Err(err)) = reaped {
                    tracing::debug!(?pid, "discarded runtime was not reaped: {err}");
                }
                return Ok(Launch::Discarded { pid });
            }
            session.pid = pid;
            session.child = Some(child);
            session.channel = Some(channel);
            session.resolved_command = Some(argv.clone());
            session.state = SessionState::Running;
        }

        tracing::info!(
            adapter_id = %self.inner.spec.id,
            pid = ?pid,
            command = ?argv,
            "runtime started"
        );
        let mut payload = Payload::new();
        payload.insert("command".to_string(), json!(argv));
        self.inner.emit(RUNTIME_STARTED_EVENT, payload);

        let pipeline = LinePipeline::new(
            self.inner.source.clone(),
            self.inner.spec.scalar_key.clone(),
            Arc::clone(&self.inner.parser),
            self.inner.tracker.clone(),
            Arc::clone(&self.inner.events),
        );
        let output_reader = OutputReader::new(
            Arc::clone(&self.inner),
            generation,
            active,
            reader,
            pipeline,
            self.inner.settings.read_backoff(),
        );
        tokio::task::spawn_blocking(move || output_reader.run());
        Ok(Launch::Running)
    }

    /// Queues `text` for the child, appending a newline when missing.
    pub async fn send(&self, text: &str) -> Result<(), SupervisorError> {
        let writer = {
            let mut session = self.inner.lock_session();
            let exited = session.reap().is_some();
            match session.channel.as_ref() {
                Some(channel) if session.state == SessionState::Running && !exited => {
                    channel.writer()
                }
                _ => return Err(SupervisorError::not_running(&self.inner.spec.id)),
            }
        };
        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        writer.send(line.into_bytes()).await.map_err(|_| {
            SupervisorError::channel_io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "terminal writer closed",
            ))
        })
    }

    /// SIGTERM, then poll for exit until the shutdown timeout. On timeout the
    /// child is killed when escalation is enabled; otherwise the session is
    /// released anyway and [`SupervisorError::ShutdownTimeout`] is returned.
    /// A no-op unless a session is starting or running.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let (generation, pid) = {
            let mut session = self.inner.lock_session();
            match session.state {
                SessionState::Running => {}
                SessionState::Starting => {
                    // start() notices the state change once its spawn returns.
                    session.active.store(false, Ordering::SeqCst);
                    session.state = SessionState::Stopped;
                    return Ok(());
                }
                _ => return Ok(()),
            }
            session.state = SessionState::Stopping;
            session.active.store(false, Ordering::SeqCst);
            let pid = if session.reap().is_some() {
                None
            } else {
                session.pid
            };
            (session.generation, pid)
        };

        let adapter_id = self.inner.spec.id.as_str();
        let mut reason = "stopped";
        if let Some(pid) = pid {
            tracing::info!(adapter_id, pid, "sending SIGTERM");
            if let Err(err) = signal::terminate(pid) {
                tracing::warn!(adapter_id, pid, "SIGTERM failed, killing instead: {err}");
                self.inner.force_kill(generation, Some(pid));
                reason = "killed";
            }
        }

        let mut exit = self
            .wait_for_exit(generation, self.inner.settings.shutdown_timeout())
            .await;
        let mut timeout = None;
        if exit.is_none() {
            let timeout_ms = self.inner.settings.shutdown_timeout_ms;
            if self.inner.settings.escalate_on_timeout {
                tracing::warn!(adapter_id, "no exit within {timeout_ms}ms; sending SIGKILL");
                self.inner.force_kill(generation, pid);
                reason = "killed";
                exit = self.wait_for_exit(generation, KILL_GRACE).await;
            } else {
                tracing::warn!(adapter_id, "no exit within {timeout_ms}ms; releasing anyway");
                reason = "timeout";
                timeout = Some(SupervisorError::ShutdownTimeout {
                    adapter_id: adapter_id.to_string(),
                    timeout_ms,
                });
            }
        }

        let last_error = timeout.as_ref().map(ToString::to_string);
        if self
            .inner
            .finish(generation, SessionState::Stopped, exit.clone(), last_error)
        {
            tracing::info!(adapter_id, ?exit, reason, "runtime stopped");
            self.inner.emit_stopped(reason, exit.as_ref());
        }
        match timeout {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn wait_for_exit(&self, generation: u64, budget: Duration) -> Option<ExitInfo> {
        let deadline = Instant::now() + budget;
        loop {
            {
                let mut session = self.inner.lock_session();
                if session.generation != generation {
                    return None;
                }
                if let Some(exit) = session.reap() {
                    return Some(exit);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.inner.settings.stop_poll_interval()).await;
        }
    }

    /// Never fails; safe to call from any thread at any time.
    pub fn status(&self) -> StatusSnapshot {
        let mut session = self.inner.lock_session();
        let exited = session.reap().is_some();
        let running = session.state == SessionState::Running
            && !exited
            && session.pid.is_none_or(signal::is_alive);
        let exit = session.exit.clone().unwrap_or_default();
        StatusSnapshot {
            adapter_id: self.inner.spec.id.clone(),
            state: session.state,
            running,
            pid: session.pid,
            resolved_command: session.resolved_command.clone(),
            last_error: session.last_error.clone(),
            last_scalar: session.last_scalar,
            exit_code: exit.exit_code,
            terminating_signal: exit.signal,
        }
    }

    /// The most recent output, at most `output_tail_chars` characters.
    pub fn output(&self) -> String {
        self.output_tail(self.inner.settings.output_tail_chars)
    }

    pub fn output_tail(&self, max_chars: usize) -> String {
        self.inner.lock_output().tail_chars(max_chars)
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.inner.lock_session();
        f.debug_struct("Supervisor")
            .field("adapter_id", &self.inner.spec.id)
            .field("state", &session.state)
            .field("pid", &session.pid)
            .finish_non_exhaustive()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let mut session = self.inner.lock_session();
        if session.child.is_none() {
            return;
        }
        if let Some(pid) = session.pid
            && session.reap().is_none()
        {
            tracing::warn!(adapter_id = %self.inner.spec.id, pid, "supervisor dropped while running; killing runtime");
            let _ = signal::force_kill(pid);
        }
        session.release(SessionState::Stopped);
    }
}
