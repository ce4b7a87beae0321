//! Structured event stream.
//!
//! Every parse error, validation warning, build transition and server
//! lifecycle change is emitted as an [`Event`]. Where events end up is the
//! caller's choice: pass any [`EventSink`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Mutex, mpsc};

use crate::parser::ParseCause;
use crate::validator::WarningKind;

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    ParseError {
        path: PathBuf,
        line: usize,
        column: usize,
        cause: ParseCause,
        message: String,
    },
    InvalidDocument {
        path: PathBuf,
        errors: Vec<String>,
    },
    ValidationWarning {
        path: PathBuf,
        kind: WarningKind,
        section: String,
        message: String,
    },
    PageWritten {
        path: PathBuf,
    },
    PageRemoved {
        path: PathBuf,
    },
    BuildStarted {
        job: u64,
        reason: String,
    },
    BuildCancelled {
        job: u64,
    },
    BuildCompleted {
        job: u64,
        rendered: usize,
        failed: usize,
    },
    BuildFailed {
        job: u64,
        error: String,
    },
    ServerStarting {
        port: u16,
    },
    ServerStarted {
        port: u16,
    },
    ServerReloaded,
    ServerRebuilt,
    ServerStopped,
    ServerCrashed {
        output: String,
    },
    ServerError {
        error: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        match &event.kind {
            EventKind::ParseError {
                path,
                line,
                column,
                message,
                ..
            } => tracing::error!("{}:{line}:{column}: {message}", path.display()),
            EventKind::InvalidDocument { path, errors } => {
                tracing::error!("{}: {}", path.display(), errors.join("; "))
            }
            EventKind::ValidationWarning {
                path,
                section,
                message,
                ..
            } => tracing::warn!("{}: {section}: {message}", path.display()),
            EventKind::PageWritten { path } => {
                tracing::debug!(path = %path.display(), "page written")
            }
            EventKind::PageRemoved { path } => {
                tracing::info!(path = %path.display(), "page removed")
            }
            EventKind::BuildStarted { job, reason } => {
                tracing::info!(job, %reason, "build started")
            }
            EventKind::BuildCancelled { job } => tracing::info!(job, "build cancelled"),
            EventKind::BuildCompleted {
                job,
                rendered,
                failed,
            } => tracing::info!(job, rendered, failed, "build completed"),
            EventKind::BuildFailed { job, error } => tracing::error!(job, %error, "build failed"),
            EventKind::ServerStarting { port } => tracing::info!(port, "server starting"),
            EventKind::ServerStarted { port } => tracing::info!(port, "server started"),
            EventKind::ServerReloaded => tracing::info!("server reloaded content"),
            EventKind::ServerRebuilt => tracing::info!("server rebuilt"),
            EventKind::ServerStopped => tracing::info!("server stopped"),
            EventKind::ServerCrashed { output } => tracing::error!(%output, "server crashed"),
            EventKind::ServerError { error } => tracing::error!(%error, "server error"),
        }
    }
}

/// Forwards events over a channel. Send failures (receiver gone) are ignored.
pub struct ChannelSink {
    tx: Mutex<mpsc::Sender<Event>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: Event) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(event);
        }
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Fans one event out to several sinks.
pub struct Fanout(pub Vec<std::sync::Arc<dyn EventSink>>);

impl EventSink for Fanout {
    fn emit(&self, event: Event) {
        for sink in &self.0 {
            sink.emit(event.clone());
        }
    }
}
