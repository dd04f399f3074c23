//! `stenod`: headless speech-to-text ingest daemon entry point.
//!
//! Wires the collaborator implementations (stubbed for audio capture,
//! recognition and summarization — real backends are external, `spec.md`
//! §1) to `steno-core`'s control plane, binds the Unix-domain socket, and
//! runs until `SIGTERM`/`SIGINT`. Logging init and the overall
//! construct-then-run shape mirror the teacher's `dictum-app/src/main.rs`,
//! substituted for this process's own entry point rather than a Tauri
//! `Builder`.

mod config;
mod pidfile;
mod server;
mod stubs;

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use steno_core::repository::SqliteRepository;
use steno_core::{CommandDispatcher, EventBroadcaster, RecordingEngine, Repository, SummaryCoordinator};

use config::DaemonConfig;
use pidfile::PidFile;
use server::SocketServer;
use stubs::{
    AllowAllPermissionProbe, StubAudioSourceFactory, StubRecognizerFactory, StubSummarizer,
};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "steno=info".parse().unwrap()),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = DaemonConfig::from_env();
    info!(socket = %config.socket_path.display(), db = %config.db_path.display(), "starting stenod");

    let pid_file = PidFile::acquire(&config.pid_path)?;

    let repository: Arc<dyn Repository> = Arc::new(SqliteRepository::open(config.db_path.clone())?);
    let audio_factory = Arc::new(StubAudioSourceFactory);
    let recognizer_factory = Arc::new(StubRecognizerFactory);
    let permission_probe = Arc::new(AllowAllPermissionProbe);
    let summarizer = Arc::new(StubSummarizer::new());

    let coordinator = Arc::new(SummaryCoordinator::new(
        repository.clone(),
        summarizer,
        config.coordinator.clone(),
    ));
    let broadcaster = EventBroadcaster::new();

    let engine = Arc::new(RecordingEngine::new(
        repository,
        audio_factory.clone(),
        recognizer_factory,
        permission_probe,
        coordinator,
        broadcaster.clone(),
    ));

    let dispatcher = Arc::new(CommandDispatcher::new(
        engine.clone(),
        broadcaster.clone(),
        audio_factory,
    ));

    let socket_server = SocketServer::bind(&config.socket_path, dispatcher, broadcaster)?;
    info!(socket = %config.socket_path.display(), "listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let serve_task = tokio::spawn(socket_server.serve(shutdown_rx));

    wait_for_shutdown_signal().await?;
    info!("shutdown signal received, stopping recording engine");

    engine.stop().await;
    let _ = shutdown_tx.send(true);
    if let Err(e) = serve_task.await {
        error!(error = %e, "socket server task did not shut down cleanly");
    }

    std::fs::remove_file(&config.socket_path).ok();
    pid_file.release();
    info!("stenod stopped");
    Ok(())
}

/// Waits for `SIGTERM` or `SIGINT`, whichever arrives first (`spec.md` §6
/// "graceful shutdown").
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = terminate.recv() => {}
        _ = interrupt.recv() => {}
    }
    Ok(())
}
