use anyhow::{Context, Result};

use netlog::collector::{CollectorEvent, CollectorSession};
use netlog::config::{self, Config};
use netlog::diagnostics;

#[tokio::main]
async fn main() -> Result<()> {
    // Ensure config directory exists (creates diagnostics dir too)
    config::ensure_directories()?;

    // Initialize diagnostics BEFORE any tracing calls
    let guard = diagnostics::init_tracing(&config::diagnostics_dir())?;

    if let Ok(count) = diagnostics::cleanup_old_diagnostics(
        &config::diagnostics_dir(),
        diagnostics::DEFAULT_RETENTION_DAYS,
    ) {
        if count > 0 {
            tracing::info!("Cleaned up {} old diagnostics files", count);
        }
    }

    tracing::info!("Diagnostics written to: {}", guard.path().display());

    let config = Config::load()?;
    let session_config = config
        .session_config()
        .context("Invalid configuration")?;

    let session = CollectorSession::new(config.buffer_capacity, config.event_channel_capacity);
    let mut events = session
        .take_events()
        .context("Event receiver already taken")?;

    let addr = session.start(session_config).await?;
    tracing::info!("Listening on {} {}", config.protocol, addr);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Shutdown requested");
                break;
            }
            Some(event) = events.recv() => match event {
                CollectorEvent::ListenerFailed { .. } => {
                    tracing::error!("{}", event);
                    break;
                }
                CollectorEvent::AutoSaveFailed { .. } | CollectorEvent::CleanupFailed { .. } => {
                    tracing::warn!("{}", event);
                }
                CollectorEvent::Rotated { .. } => tracing::info!("{}", event),
            },
        }
    }

    session.stop().await;
    Ok(())
}
