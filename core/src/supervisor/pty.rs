use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;

use portable_pty::Child;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SupervisorSettings;
use crate::supervisor::SupervisorError;

const WRITE_QUEUE_DEPTH: usize = 128;

/// Controller side of the terminal. Dropping it closes the master and stops
/// the writer task, which is how a session releases its channel.
pub(crate) struct PtyChannel {
    _master: Box<dyn MasterPty + Send>,
    writer_tx: mpsc::Sender<Vec<u8>>,
    writer_task: JoinHandle<()>,
}

impl PtyChannel {
    pub(crate) fn writer(&self) -> mpsc::Sender<Vec<u8>> {
        self.writer_tx.clone()
    }
}

impl Drop for PtyChannel {
    fn drop(&mut self) {
        self.writer_task.abort();
    }
}

pub(crate) struct SpawnedRuntime {
    pub(crate) child: Box<dyn Child + Send + Sync>,
    pub(crate) pid: Option<u32>,
    pub(crate) channel: PtyChannel,
    pub(crate) reader: Box<dyn Read + Send>,
}

/// Launches `argv` attached to a fresh pseudo-terminal. Must be called from
/// within a tokio runtime; the writer half runs as a task.
pub(crate) fn spawn_runtime(
    argv: &[String],
    settings: &SupervisorSettings,
) -> Result<SpawnedRuntime, SupervisorError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(SupervisorError::configuration("resolved command line is empty"));
    };

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: settings.pty_rows,
            cols: settings.pty_cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|err| SupervisorError::spawn(program, err))?;

    let mut command_builder = CommandBuilder::new(program);
    command_builder.args(args);
    command_builder.cwd(settings.root_dir.as_os_str());
    for (key, value) in terminal_env(settings) {
        if std::env::var_os(key).is_none() {
            command_builder.env(key, value);
        }
    }

    let child = pair
        .slave
        .spawn_command(command_builder)
        .map_err(|err| SupervisorError::spawn(program, err))?;
    // The parent must not keep the slave open or the master never sees EOF.
    drop(pair.slave);
    let pid = child.process_id();

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|err| SupervisorError::spawn(program, err))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|err| SupervisorError::spawn(program, err))?;

    let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_DEPTH);
    let writer = Arc::new(StdMutex::new(writer));
    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = writer_rx.recv().await {
            let writer = Arc::clone(&writer);
            let result = tokio::task::spawn_blocking(move || {
                let mut guard = writer.lock().unwrap_or_else(PoisonError::into_inner);
                guard.write_all(&bytes)?;
                guard.flush()
            })
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!("terminal write failed: {err}"),
                Err(err) => tracing::warn!("terminal write task failed: {err}"),
            }
        }
    });

    Ok(SpawnedRuntime {
        child,
        pid,
        channel: PtyChannel {
            _master: pair.master,
            writer_tx,
            writer_task,
        },
        reader,
    })
}

fn terminal_env(settings: &SupervisorSettings) -> [(&'static str, String); 3] {
    [
        ("TERM", "xterm-256color".to_string()),
        ("LINES", settings.pty_rows.to_string()),
        ("COLUMNS", settings.pty_cols.to_string()),
    ]
}
