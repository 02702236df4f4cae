//! Collector session
//!
//! Owns the listener and auto-save writer lifecycles. A session moves between `Idle` and
//! `Running`; the retention buffer outlives individual runs.
//!
//! ```text
//! socket -> Listener -> Pipeline -> RetentionBuffer
//!                              \-> RotatingWriter (auto-save)
//! ```
//!
//! Problems that happen after `start` returned are reported as [`CollectorEvent`]s.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{RetentionBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::config::{friendly_io_error_message, SessionConfig};
use crate::entry::{LogEntry, Protocol};
use crate::error::{CollectorError, ListenerError, WriterError};
use crate::format::LogFormat;
use crate::listener::{Listener, MessageSink};
use crate::storage::{default_export_path, export_entries, Rotation, RotatingWriter};

/// Default number of undelivered events kept before new ones are dropped
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something the caller should know about that happened while running
#[derive(Debug)]
pub enum CollectorEvent {
    /// The listener stopped on a socket error; the session must be stopped and restarted
    ListenerFailed {
        protocol: Protocol,
        error: ListenerError,
    },
    /// Auto-save hit an IO failure and is off for the rest of this run
    AutoSaveFailed { path: PathBuf, reason: String },
    /// A new auto-save file was started
    Rotated { previous: PathBuf, current: PathBuf },
    /// Old rotated files could not be removed
    CleanupFailed { reason: String },
}

impl fmt::Display for CollectorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorEvent::ListenerFailed { protocol, error } => {
                write!(f, "Error in {} listener: {}", protocol, error)
            }
            CollectorEvent::AutoSaveFailed { path, reason } => {
                write!(f, "{} ({})", reason, path.display())
            }
            CollectorEvent::Rotated { current, .. } => {
                write!(f, "Auto-save rotated to {}", current.display())
            }
            CollectorEvent::CleanupFailed { reason } => write!(f, "Cleanup failed: {}", reason),
        }
    }
}

/// Current state of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Idle,
    Running {
        protocol: Protocol,
        local_addr: SocketAddr,
        /// File auto-save is currently writing, if enabled and healthy
        auto_save_path: Option<PathBuf>,
    },
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => f.write_str("Not Listening"),
            Status::Running {
                protocol,
                local_addr,
                ..
            } => write!(f, "Listening on {} port {}", protocol, local_addr.port()),
        }
    }
}

/// Forwards events without ever blocking ingestion
#[derive(Clone)]
struct EventSender {
    tx: mpsc::Sender<CollectorEvent>,
}

impl EventSender {
    fn send(&self, event: CollectorEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Event channel full, dropping event: {}", event);
            }
            Err(TrySendError::Closed(event)) => {
                debug!("No event receiver, dropping event: {}", event);
            }
        }
    }
}

/// Turns delivered messages into entries and stores them
///
/// Writer IO is synchronous and runs on the calling connection task while the writer lock
/// is held. Each append writes a single bounded entry.
struct Pipeline {
    protocol: Protocol,
    buffer: Arc<RetentionBuffer>,
    writer: Mutex<Option<RotatingWriter>>,
    events: EventSender,
}

impl Pipeline {
    fn new(
        protocol: Protocol,
        buffer: Arc<RetentionBuffer>,
        writer: Option<RotatingWriter>,
        events: EventSender,
    ) -> Self {
        Self {
            protocol,
            buffer,
            writer: Mutex::new(writer),
            events,
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<RotatingWriter>> {
        match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, entry: LogEntry) {
        self.buffer.add(entry.clone());
        self.persist(&entry);
    }

    fn record_system(&self, message: String) {
        self.record(LogEntry::system(self.protocol, message));
    }

    /// Rotate-check and append under one lock
    fn persist(&self, entry: &LogEntry) {
        let mut writer = self.lock_writer();
        let Some(active) = writer.as_mut() else {
            return;
        };

        match active.write_entry(entry) {
            Ok(Some(rotation)) => self.report_rotation(rotation),
            Ok(None) => {}
            Err(e) if !e.is_fatal() => {
                warn!("Auto-save cleanup failed: {}", e);
                self.events.send(CollectorEvent::CleanupFailed {
                    reason: friendly_io_error_message(e.io_error(), "Cleanup failed"),
                });
            }
            Err(e) => {
                let path = e.path().clone();
                error!(path = %path.display(), "Auto-save failed, disabling: {}", e);
                // Dropping the writer closes the file and repairs JSON
                *writer = None;
                self.events.send(CollectorEvent::AutoSaveFailed {
                    path,
                    reason: friendly_io_error_message(e.io_error(), "Auto-save disabled"),
                });
            }
        }
    }

    fn report_rotation(&self, rotation: Rotation) {
        if let Some(report) = &rotation.cleanup {
            if !report.deleted.is_empty() {
                debug!(count = report.deleted.len(), "Removed old auto-save files");
            }
            for failure in &report.failures {
                warn!("Failed to remove old auto-save file: {}", failure);
                self.events.send(CollectorEvent::CleanupFailed {
                    reason: friendly_io_error_message(
                        failure.io_error(),
                        &format!("Cannot delete {}", failure.path().display()),
                    ),
                });
            }
        }
        if let Some(e) = &rotation.cleanup_error {
            self.events.send(CollectorEvent::CleanupFailed {
                reason: friendly_io_error_message(e.io_error(), "Cannot list save directory"),
            });
        }

        self.events.send(CollectorEvent::Rotated {
            previous: rotation.previous,
            current: rotation.current,
        });
    }

    fn auto_save_path(&self) -> Option<PathBuf> {
        self.lock_writer().as_ref().map(|w| w.path().to_path_buf())
    }

    /// Close auto-save; later entries only reach the buffer
    fn close_writer(&self) {
        let mut writer = self.lock_writer();
        if let Some(mut active) = writer.take() {
            if let Err(e) = active.close() {
                error!("Failed to close auto-save file: {}", e);
                self.events.send(CollectorEvent::AutoSaveFailed {
                    path: e.path().clone(),
                    reason: friendly_io_error_message(
                        e.io_error(),
                        "Closing auto-save file failed",
                    ),
                });
            }
        }
    }
}

impl MessageSink for Pipeline {
    fn deliver(&self, message: String, source: String) {
        self.record(LogEntry::new(self.protocol, source, message));
    }
}

struct RunningSession {
    protocol: Protocol,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    pipeline: Arc<Pipeline>,
}

/// Receives log messages over the network and keeps them in memory and on disk
pub struct CollectorSession {
    buffer: Arc<RetentionBuffer>,
    running: tokio::sync::Mutex<Option<RunningSession>>,
    events: EventSender,
    events_rx: Mutex<Option<mpsc::Receiver<CollectorEvent>>>,
}

impl CollectorSession {
    pub fn new(buffer_capacity: usize, event_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(event_capacity.max(1));
        Self {
            buffer: Arc::new(RetentionBuffer::new(buffer_capacity)),
            running: tokio::sync::Mutex::new(None),
            events: EventSender { tx },
            events_rx: Mutex::new(Some(rx)),
        }
    }

    /// Take the event receiver; returns `None` after the first call
    pub fn take_events(&self) -> Option<mpsc::Receiver<CollectorEvent>> {
        match self.events_rx.lock() {
            Ok(mut rx) => rx.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Start listening with `config`
    ///
    /// Nothing changes when this fails. Returns the bound address, which differs from the
    /// configured one when port 0 was requested.
    ///
    /// An auto-save file that cannot be opened does not fail the start: the session runs
    /// without auto-save and reports `CollectorEvent::AutoSaveFailed`.
    pub async fn start(&self, config: SessionConfig) -> Result<SocketAddr, CollectorError> {
        config.validate()?;

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }

        config.ensure_save_path()?;

        let listener = Listener::bind(config.protocol, config.socket_addr(), config.framing).await?;
        let local_addr = listener.local_addr();

        let writer = if config.auto_save_enabled {
            match RotatingWriter::open(config.rotation_settings()) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    error!(path = %e.path().display(), "Auto-save unavailable: {}", e);
                    self.events.send(CollectorEvent::AutoSaveFailed {
                        path: e.path().clone(),
                        reason: friendly_io_error_message(e.io_error(), "Auto-save disabled"),
                    });
                    None
                }
            }
        } else {
            None
        };

        let pipeline = Arc::new(Pipeline::new(
            config.protocol,
            Arc::clone(&self.buffer),
            writer,
            self.events.clone(),
        ));
        pipeline.record_system(format!(
            "Started listening on {} port {}",
            config.protocol,
            local_addr.port()
        ));

        let cancel = CancellationToken::new();
        let sink: Arc<dyn MessageSink> = pipeline.clone();
        let task = tokio::spawn(run_listener(
            listener,
            sink,
            cancel.clone(),
            self.events.clone(),
        ));

        info!(
            protocol = %config.protocol,
            addr = %local_addr,
            auto_save = config.auto_save_enabled,
            format = %config.format,
            "Collector started"
        );

        *running = Some(RunningSession {
            protocol: config.protocol,
            local_addr,
            cancel,
            task,
            pipeline,
        });
        Ok(local_addr)
    }

    /// Stop listening and close auto-save
    ///
    /// Waits for the listener and every connection handler to finish. Does nothing when
    /// idle.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(session) = running.take() else {
            debug!("Stop requested while idle");
            return;
        };

        session.cancel.cancel();
        if let Err(e) = session.task.await {
            warn!("Listener task ended abnormally: {}", e);
        }

        session.pipeline.record_system(format!(
            "Stopped listening on {} port {}",
            session.protocol,
            session.local_addr.port()
        ));
        session.pipeline.close_writer();

        info!(protocol = %session.protocol, addr = %session.local_addr, "Collector stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn status(&self) -> Status {
        match self.running.lock().await.as_ref() {
            None => Status::Idle,
            Some(session) => Status::Running {
                protocol: session.protocol,
                local_addr: session.local_addr,
                auto_save_path: session.pipeline.auto_save_path(),
            },
        }
    }

    /// Retained entries, oldest first
    pub fn recent_entries(&self) -> Vec<LogEntry> {
        self.buffer.snapshot()
    }

    pub fn clear_entries(&self) {
        self.buffer.clear();
    }

    /// Write every retained entry to `path` in `format`
    pub fn export_all(&self, path: &Path, format: LogFormat) -> Result<(), WriterError> {
        let entries = self.buffer.snapshot();
        export_entries(path, &entries, format)?;
        info!(path = %path.display(), count = entries.len(), "Exported entries");
        Ok(())
    }

    /// Export into `dir` under a timestamped `Logs_` name
    pub fn export_to_dir(&self, dir: &Path, format: LogFormat) -> Result<PathBuf, CollectorError> {
        if self.buffer.is_empty() {
            return Err(CollectorError::NothingToExport);
        }
        let path = default_export_path(dir, format);
        self.export_all(&path, format)?;
        Ok(path)
    }
}

impl Default for CollectorSession {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, DEFAULT_EVENT_CAPACITY)
    }
}

impl Drop for CollectorSession {
    fn drop(&mut self) {
        // The writer closes once the listener task releases the pipeline
        if let Some(session) = self.running.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

async fn run_listener(
    listener: Listener,
    sink: Arc<dyn MessageSink>,
    cancel: CancellationToken,
    events: EventSender,
) {
    let protocol = listener.protocol();
    if let Err(e) = listener.run(sink, cancel).await {
        error!(protocol = %protocol, "Listener failed: {}", e);
        events.send(CollectorEvent::ListenerFailed { protocol, error: e });
    }
}
