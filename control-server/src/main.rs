use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use toybox_control_server::AppState;
use toybox_control_server::default_listen_addr;
use toybox_control_server::serve;
use toybox_core::Supervisor;
use toybox_core::ToyboxConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADAPTER: &str = "hethack";

/// Run an interactive terminal program under a pseudo-terminal and expose it
/// over HTTP.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Adapter preset (`hethack`, `elite`) or a custom adapter id.
    #[arg(long, short = 'a')]
    adapter: Option<String>,

    /// Socket address for the control surface.
    #[arg(long, short = 'l')]
    listen: Option<String>,

    /// Working directory of the child process.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Event log path; relative paths resolve against the root.
    #[arg(long)]
    events_file: Option<PathBuf>,

    /// Explicit command line for the upstream program.
    #[arg(long)]
    command: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut ToyboxConfig) {
        if let Some(adapter) = self.adapter {
            config.adapter.id = Some(adapter);
        }
        if let Some(command) = self.command {
            config.adapter.command = Some(command);
        }
        if let Some(root) = self.root {
            config.supervisor.root_dir = root;
        }
        if let Some(events_file) = self.events_file {
            config.supervisor.events_file = Some(events_file);
        }
        if let Some(listen) = self.listen {
            config.server.listen = Some(listen);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ToyboxConfig::load(path)?,
        None => ToyboxConfig::default(),
    };
    cli.apply(&mut config);

    let spec = config.adapter.into_spec(DEFAULT_ADAPTER);
    let listen = config
        .server
        .listen
        .unwrap_or_else(|| default_listen_addr(spec.control_port));
    let supervisor = Arc::new(
        Supervisor::open(spec, config.supervisor).context("failed to configure supervisor")?,
    );

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    supervisor
        .start()
        .await
        .context("failed to start upstream runtime")?;

    let served = serve(
        listener,
        Arc::new(AppState::new(Arc::clone(&supervisor))),
        shutdown_signal(),
    )
    .await;

    if let Err(err) = supervisor.stop().await {
        tracing::warn!("shutdown incomplete: {err}");
    }
    served.context("control surface failed")
}

fn setup_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown requested");
}
