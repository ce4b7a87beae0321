use specpage_core::{Converter, EventSink, SourceChange};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::debounce::{DEFAULT_DEBOUNCE_WINDOW, Debouncer, run_debouncer};
use crate::job::BuildJob;
use crate::orchestrator::{BuildRunner, ConverterRunner, Orchestrator, RunSummary};
use crate::server::RenderServer;
use crate::watcher::{SourceWatcher, WatchError};

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub debounce_window: Duration,
    pub port: u16,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            port: 3000,
        }
    }
}

/// Stops a running [`WatchSession`] from another task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Watches a source tree, rebuilds on change, and keeps a server fed with
/// the output until stopped. A stopped session can be run again.
pub struct WatchSession {
    options: WatchOptions,
    sink: Arc<dyn EventSink>,
    job_slot: Arc<Mutex<Weak<BuildJob>>>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl WatchSession {
    pub fn new(options: WatchOptions, sink: Arc<dyn EventSink>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            options,
            sink,
            job_slot: Arc::new(Mutex::new(Weak::new())),
            stop_tx: Arc::new(stop_tx),
        }
    }

    pub fn debounce_window(&self) -> Duration {
        self.options.debounce_window
    }

    /// The build running right now, if any.
    pub fn current_job(&self) -> Option<Arc<BuildJob>> {
        self.job_slot.lock().ok()?.upgrade()
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Watches the converter's source tree until [`stop`](Self::stop).
    pub async fn run<S: RenderServer>(
        &self,
        converter: Arc<Converter>,
        server: S,
    ) -> Result<RunSummary, WatchError> {
        let (change_tx, change_rx) = mpsc::channel(256);
        let _watcher = SourceWatcher::start(converter.filter().clone(), change_tx)?;
        let runner = ConverterRunner::new(converter);
        Ok(self.run_with(runner, server, change_rx).await)
    }

    /// Like [`run`](Self::run), but with changes and builds supplied by the
    /// caller.
    pub async fn run_with<R: BuildRunner, S: RenderServer>(
        &self,
        runner: R,
        server: S,
        changes: mpsc::Receiver<SourceChange>,
    ) -> RunSummary {
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let debouncer = tokio::spawn(run_debouncer(
            Debouncer::new(self.options.debounce_window),
            changes,
            trigger_tx,
        ));

        tracing::info!(
            debounce_ms = self.options.debounce_window.as_millis() as u64,
            port = self.options.port,
            "watch session started"
        );
        let summary = Orchestrator::new(runner, server, self.sink.clone(), self.options.port)
            .with_job_slot(self.job_slot.clone())
            .run(trigger_rx, self.stop_tx.subscribe())
            .await;

        debouncer.abort();
        self.stop_tx.send_replace(false);
        tracing::info!(jobs = summary.jobs_started, "watch session stopped");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::BuildJob;
    use crate::orchestrator::BuildSummary;
    use crate::server::{ServerError, ServerState, ServerStatus};
    use specpage_core::MemorySink;

    struct InstantRunner;

    impl BuildRunner for InstantRunner {
        async fn run(&self, _job: Arc<BuildJob>) -> anyhow::Result<BuildSummary> {
            Ok(BuildSummary::default())
        }
    }

    struct StartedServer {
        started: mpsc::UnboundedSender<()>,
        running: bool,
    }

    impl RenderServer for StartedServer {
        async fn start(&mut self, _port: u16) -> Result<(), ServerError> {
            self.running = true;
            let _ = self.started.send(());
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), ServerError> {
            self.running = false;
            Ok(())
        }

        async fn rebuild_for_search_index(&mut self) -> Result<(), ServerError> {
            Ok(())
        }

        async fn reload(&mut self) -> Result<(), ServerError> {
            Ok(())
        }

        fn supports_content_reload(&self) -> bool {
            true
        }

        fn status(&self) -> ServerStatus {
            let state = if self.running {
                ServerState::Running
            } else {
                ServerState::Stopped
            };
            ServerStatus {
                state,
                running: self.running,
                port: None,
            }
        }
    }

    #[test]
    fn test_defaults() {
        let session = WatchSession::new(WatchOptions::default(), Arc::new(MemorySink::new()));
        assert_eq!(session.debounce_window(), Duration::from_secs(2));
        assert!(session.current_job().is_none());
    }

    #[test]
    fn test_stop_handle_shares_the_signal() {
        let session = WatchSession::new(WatchOptions::default(), Arc::new(MemorySink::new()));
        let rx = session.stop_tx.subscribe();
        session.stop_handle().stop();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_session_runs_again_after_stop() {
        let session = Arc::new(WatchSession::new(
            WatchOptions::default(),
            Arc::new(MemorySink::new()),
        ));

        for _ in 0..2 {
            let (started_tx, mut started) = mpsc::unbounded_channel();
            let server = StartedServer {
                started: started_tx,
                running: false,
            };
            let (_change_tx, change_rx) = mpsc::channel(1);
            let run = tokio::spawn({
                let session = session.clone();
                async move { session.run_with(InstantRunner, server, change_rx).await }
            });

            assert_eq!(started.recv().await, Some(()));
            assert!(!run.is_finished());
            session.stop();
            let summary = run.await.unwrap();
            assert_eq!(summary.jobs_started, 1);
            assert!(!*session.stop_tx.borrow());
        }
    }
}
