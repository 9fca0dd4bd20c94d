//! Tannoy daemon: hosts the announcement engine, the scheduler and the
//! operator console on one machine with one speaker.

mod console;
mod settings;

use anyhow::Context;
use settings::DaemonConfig;
use std::sync::Arc;
use std::time::Duration;
use tannoy_core::config::layered_source;
use tannoy_core::{
    Collaborators, EngineConfig, JsonScheduleStore, JsonlLogSink, Orchestrator, Scheduler, TtsEngine,
    UnavailableTts,
};
use tannoy_voice::{playlist_from_files, FileChime, HttpTts, MicCapture, RodioSink, TtsConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for the engine tasks after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[tannoy] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let source = layered_source(None).context("read configuration")?;
    let engine_config = EngineConfig::from_source(&source).context("engine configuration")?;
    let daemon = DaemonConfig::from_source(&source).context("daemon configuration")?;

    let sink = Arc::new(RodioSink::open_default().context("open output device")?);
    let tts = build_tts(daemon.tts.clone()).await;
    let log = Arc::new(
        JsonlLogSink::open(&daemon.paths.log)
            .with_context(|| format!("open announcement log {}", daemon.paths.log.display()))?,
    );

    let mut parts = Collaborators::new(sink, tts, log).with_chime(Arc::new(FileChime::load(&daemon.paths.chime)));
    if !daemon.paths.background.is_empty() {
        parts = parts.with_background(Box::new(playlist_from_files(&daemon.paths.background)));
    }

    let (orchestrator, handle) = Orchestrator::new(&engine_config, parts)?;
    let scheduler = Scheduler::new(
        Box::new(JsonScheduleStore::new(&daemon.paths.schedule)),
        &handle,
        engine_config.grace_window(),
    );

    tracing::info!(
        schedule = %daemon.paths.schedule.display(),
        log = %daemon.paths.log.display(),
        queue_capacity = engine_config.queue_capacity,
        "tannoy daemon started"
    );

    let engine_task = tokio::spawn(orchestrator.run());
    let scheduler_task = tokio::spawn(scheduler.run(engine_config.tick_interval()));
    let events_task = tokio::spawn(console::print_events(handle.subscribe()));

    let result = console::Console::new(handle.clone(), MicCapture::new(daemon.mic.into()))
        .run()
        .await;

    handle.shutdown();
    drop(handle);
    for (name, task) in [("orchestrator", engine_task), ("scheduler", scheduler_task)] {
        match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(task = name, error = %e, "task ended abnormally"),
            Err(_) => tracing::warn!(task = name, "task did not stop in time"),
        }
    }
    events_task.abort();
    tracing::info!("tannoy daemon stopped");
    result
}

/// HTTP TTS when an API key is configured; otherwise every text
/// announcement fails with a render error.
async fn build_tts(config: TtsConfig) -> Arc<dyn TtsEngine> {
    if config.api_key.is_none() {
        tracing::warn!("no tts.api_key configured; text announcements will fail");
        return Arc::new(UnavailableTts);
    }
    match tokio::task::spawn_blocking(move || HttpTts::new(&config)).await {
        Ok(Ok(tts)) => Arc::new(tts),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "TTS backend unavailable");
            Arc::new(UnavailableTts)
        }
        Err(e) => {
            tracing::warn!(error = %e, "TTS setup task failed");
            Arc::new(UnavailableTts)
        }
    }
}
