//! Watch mode: turns source changes into debounced rebuilds and keeps a page
//! server in step with the output tree.

pub mod debounce;
pub mod job;
pub mod orchestrator;
pub mod server;
pub mod session;
pub mod watcher;

pub use debounce::{DEFAULT_DEBOUNCE_WINDOW, DebounceState, Debouncer, Trigger, run_debouncer};
pub use job::{BuildJob, BuildReason, JobState};
pub use orchestrator::{
    BuildRunner, BuildSummary, ConverterRunner, Orchestrator, OrchestratorState, RunSummary,
};
pub use server::{
    LiveMessage, LiveServer, LiveServerConfig, OutputTail, ProcessServer, ProcessServerConfig,
    RenderServer, RestartPolicy, ServerError, ServerState, ServerStatus,
};
pub use session::{StopHandle, WatchOptions, WatchSession};
pub use watcher::{SourceWatcher, WatchError};
