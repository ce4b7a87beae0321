//! Control surface over whatever serves the generated pages.

mod live;
mod process;

pub use live::{LiveMessage, LiveServer, LiveServerConfig, inject_livereload_script};
pub use process::{OutputTail, ProcessServer, ProcessServerConfig, RestartPolicy};

use serde::Serialize;
use std::future::Future;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,
    #[error("no server command configured")]
    MissingCommand,
    #[error("invalid server state change from {from:?} to {to:?}")]
    InvalidTransition { from: ServerState, to: ServerState },
    #[error("could not start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("server exited during startup ({status})\n{output}")]
    Exited { status: String, output: String },
    #[error("`{command}` failed\n{output}")]
    Command { command: String, output: String },
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl ServerState {
    pub fn can_become(self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Crashed)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Running, Crashed)
                | (Stopping, Stopped)
                | (Crashed, Starting)
                | (Crashed, Stopped)
        )
    }

    /// Moves to `next` if the state machine allows it.
    pub fn advance(&mut self, next: ServerState) -> Result<(), ServerError> {
        if !self.can_become(next) {
            return Err(ServerError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        tracing::debug!(from = ?self, to = ?next, "server state");
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub state: ServerState,
    pub running: bool,
    pub port: Option<u16>,
}

/// What the orchestrator needs from a page server.
pub trait RenderServer: Send {
    fn start(&mut self, port: u16) -> impl Future<Output = Result<(), ServerError>> + Send;

    fn stop(&mut self) -> impl Future<Output = Result<(), ServerError>> + Send;

    /// Makes the server pick up new pages when it cannot do so on its own,
    /// refreshing any search index it keeps.
    fn rebuild_for_search_index(&mut self) -> impl Future<Output = Result<(), ServerError>> + Send;

    /// Pushes changed content to connected clients.
    fn reload(&mut self) -> impl Future<Output = Result<(), ServerError>> + Send;

    fn supports_content_reload(&self) -> bool;

    fn status(&self) -> ServerStatus;
}
