//! Serializes rebuilds and tells the page server about fresh output.
//!
//! There is at most one running [`BuildJob`]. A trigger that arrives while a
//! job runs cancels it and starts the next job right away, carrying over the
//! cancelled job's changes. The cancelled job keeps running on the blocking
//! pool, writes nothing more, and its result is dropped when it arrives.
//!
//! The server only hears about builds that finished without a failing
//! document; after a failed build it keeps serving the previous output.

use serde::Serialize;
use specpage_core::{Converter, Event, EventKind, EventSink};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, watch};

use crate::debounce::Trigger;
use crate::job::{BuildJob, BuildReason, JobState};
use crate::server::RenderServer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub rendered: usize,
    pub failed: usize,
}

/// Does the work of one job.
pub trait BuildRunner: Send + Sync + 'static {
    fn run(
        &self,
        job: Arc<BuildJob>,
    ) -> impl Future<Output = anyhow::Result<BuildSummary>> + Send;
}

/// Runs jobs through a [`Converter`] on the blocking pool.
pub struct ConverterRunner {
    converter: Arc<Converter>,
}

impl ConverterRunner {
    pub fn new(converter: Arc<Converter>) -> Self {
        Self { converter }
    }
}

impl BuildRunner for ConverterRunner {
    async fn run(&self, job: Arc<BuildJob>) -> anyhow::Result<BuildSummary> {
        let converter = self.converter.clone();
        let report = tokio::task::spawn_blocking(move || match job.reason() {
            BuildReason::Initial => converter.convert_all(job.token()),
            BuildReason::Changes(trigger) => converter.rebuild(&trigger.changes, job.token()),
        })
        .await??;

        Ok(BuildSummary {
            rendered: report.rendered.len(),
            failed: report.failures.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Building,
    ServingStale,
    ServingFresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub jobs_started: u64,
    /// The last build that was allowed to finish had a failing document, or
    /// failed outright.
    pub last_build_failed: bool,
}

type JobResult = (Arc<BuildJob>, anyhow::Result<BuildSummary>);

pub struct Orchestrator<R, S> {
    runner: Arc<R>,
    server: S,
    sink: Arc<dyn EventSink>,
    port: u16,
    state: OrchestratorState,
    next_id: u64,
    current: Option<Arc<BuildJob>>,
    job_slot: Arc<Mutex<Weak<BuildJob>>>,
    server_started: bool,
    last_build_failed: bool,
}

impl<R: BuildRunner, S: RenderServer> Orchestrator<R, S> {
    pub fn new(runner: R, server: S, sink: Arc<dyn EventSink>, port: u16) -> Self {
        Self {
            runner: Arc::new(runner),
            server,
            sink,
            port,
            state: OrchestratorState::Idle,
            next_id: 0,
            current: None,
            job_slot: Arc::new(Mutex::new(Weak::new())),
            server_started: false,
            last_build_failed: false,
        }
    }

    /// Publishes the running job into `slot` for outside lookup.
    pub fn with_job_slot(mut self, slot: Arc<Mutex<Weak<BuildJob>>>) -> Self {
        self.job_slot = slot;
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Runs the initial build, then one job per trigger until `shutdown`
    /// flips to `true` (or its sender goes away).
    pub async fn run(
        mut self,
        mut triggers: mpsc::Receiver<Trigger>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunSummary {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<JobResult>();
        let mut triggers_open = true;

        self.launch(BuildReason::Initial, &done_tx);
        loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break,
                trigger = triggers.recv(), if triggers_open => match trigger {
                    Some(trigger) => {
                        let reason = match self.abandon_current() {
                            Some(BuildReason::Initial) => BuildReason::Initial,
                            Some(BuildReason::Changes(earlier)) => {
                                BuildReason::Changes(trigger.carry(&earlier))
                            }
                            None => BuildReason::Changes(trigger),
                        };
                        self.launch(reason, &done_tx);
                    }
                    None => triggers_open = false,
                },
                Some((job, result)) = done_rx.recv() => self.finish(job, result).await,
            }
        }

        self.shutdown().await
    }

    fn emit(&self, kind: EventKind) {
        self.sink.emit(Event::now(kind));
    }

    fn launch(&mut self, reason: BuildReason, done: &mpsc::UnboundedSender<JobResult>) {
        self.next_id += 1;
        let job = Arc::new(BuildJob::new(self.next_id, reason));
        self.emit(EventKind::BuildStarted {
            job: job.id(),
            reason: job.reason().describe(),
        });
        job.transition(JobState::Running);
        self.state = OrchestratorState::Building;
        self.publish(Arc::downgrade(&job));
        self.current = Some(job.clone());

        let runner = self.runner.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let result = runner.run(job.clone()).await;
            // Closed once the orchestrator has stopped.
            let _ = done.send((job, result));
        });
    }

    /// Cancels the running job. Returns its reason when the job was
    /// actually stopped short.
    fn abandon_current(&mut self) -> Option<BuildReason> {
        let job = self.current.take()?;
        self.publish(Weak::new());
        if !job.cancel() {
            return None;
        }
        self.emit(EventKind::BuildCancelled { job: job.id() });
        Some(job.reason().clone())
    }

    fn publish(&self, job: Weak<BuildJob>) {
        match self.job_slot.lock() {
            Ok(mut slot) => *slot = job,
            Err(poisoned) => *poisoned.into_inner() = job,
        }
    }

    async fn finish(&mut self, job: Arc<BuildJob>, result: anyhow::Result<BuildSummary>) {
        let is_current = self
            .current
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &job));
        if !is_current || job.is_cancelled() {
            tracing::debug!(job = job.id(), "dropping result of abandoned build");
            return;
        }
        self.current = None;
        self.publish(Weak::new());

        let built = match result {
            Ok(summary) => {
                job.transition(JobState::Completed);
                self.emit(EventKind::BuildCompleted {
                    job: job.id(),
                    rendered: summary.rendered,
                    failed: summary.failed,
                });
                summary.failed == 0
            }
            Err(e) => {
                job.transition(JobState::Failed);
                self.emit(EventKind::BuildFailed {
                    job: job.id(),
                    error: format!("{e:#}"),
                });
                false
            }
        };
        self.last_build_failed = !built;

        self.state = if !built {
            tracing::warn!(job = job.id(), "build had errors, server left as is");
            if self.server_started {
                OrchestratorState::ServingStale
            } else {
                OrchestratorState::Idle
            }
        } else if self.signal_server().await {
            OrchestratorState::ServingFresh
        } else {
            OrchestratorState::ServingStale
        };
        tracing::debug!(job = job.id(), state = ?self.state, "build finished");
    }

    /// Starts the server after the first build, afterwards asks it to pick
    /// up the new output.
    async fn signal_server(&mut self) -> bool {
        let result = if !self.server_started {
            self.emit(EventKind::ServerStarting { port: self.port });
            let result = self.server.start(self.port).await;
            if result.is_ok() {
                self.server_started = true;
                let port = self.server.status().port.unwrap_or(self.port);
                self.emit(EventKind::ServerStarted { port });
            }
            result
        } else if self.server.supports_content_reload() {
            let result = self.server.reload().await;
            if result.is_ok() {
                self.emit(EventKind::ServerReloaded);
            }
            result
        } else {
            let result = self.server.rebuild_for_search_index().await;
            if result.is_ok() {
                self.emit(EventKind::ServerRebuilt);
            }
            result
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                self.emit(EventKind::ServerError {
                    error: e.to_string(),
                });
                false
            }
        }
    }

    async fn shutdown(mut self) -> RunSummary {
        self.abandon_current();
        if self.server_started {
            match self.server.stop().await {
                Ok(()) => self.emit(EventKind::ServerStopped),
                Err(e) => self.emit(EventKind::ServerError {
                    error: e.to_string(),
                }),
            }
        }
        self.state = OrchestratorState::Idle;

        RunSummary {
            jobs_started: self.next_id,
            last_build_failed: self.last_build_failed,
        }
    }
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means stop.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ServerError, ServerState, ServerStatus};
    use specpage_core::{ChangeKind, MemorySink, SourceChange};
    use std::path::PathBuf;
    use tokio::sync::oneshot;

    /// Hands each job's release gate to the test.
    struct GatedRunner {
        started: mpsc::UnboundedSender<(u64, oneshot::Sender<BuildSummary>)>,
    }

    impl BuildRunner for GatedRunner {
        async fn run(&self, job: Arc<BuildJob>) -> anyhow::Result<BuildSummary> {
            let (gate_tx, gate_rx) = oneshot::channel();
            let _ = self.started.send((job.id(), gate_tx));
            Ok(gate_rx.await?)
        }
    }

    struct RecordingServer {
        calls: mpsc::UnboundedSender<&'static str>,
        content_reload: bool,
        state: ServerState,
    }

    impl RecordingServer {
        fn new(content_reload: bool) -> (Self, mpsc::UnboundedReceiver<&'static str>) {
            let (calls, rx) = mpsc::unbounded_channel();
            let server = Self {
                calls,
                content_reload,
                state: ServerState::Stopped,
            };
            (server, rx)
        }
    }

    impl RenderServer for RecordingServer {
        async fn start(&mut self, _port: u16) -> Result<(), ServerError> {
            self.state = ServerState::Running;
            let _ = self.calls.send("start");
            Ok(())
        }

        async fn stop(&mut self) -> Result<(), ServerError> {
            self.state = ServerState::Stopped;
            let _ = self.calls.send("stop");
            Ok(())
        }

        async fn rebuild_for_search_index(&mut self) -> Result<(), ServerError> {
            let _ = self.calls.send("rebuild");
            Ok(())
        }

        async fn reload(&mut self) -> Result<(), ServerError> {
            let _ = self.calls.send("reload");
            Ok(())
        }

        fn supports_content_reload(&self) -> bool {
            self.content_reload
        }

        fn status(&self) -> ServerStatus {
            ServerStatus {
                state: self.state,
                running: self.state == ServerState::Running,
                port: Some(4000),
            }
        }
    }

    fn trigger(path: &str) -> Trigger {
        Trigger {
            changes: vec![SourceChange::new(path, ChangeKind::Modified)],
            latest: PathBuf::from(path),
        }
    }

    const OK: BuildSummary = BuildSummary {
        rendered: 1,
        failed: 0,
    };

    const BROKEN: BuildSummary = BuildSummary {
        rendered: 0,
        failed: 1,
    };

    /// Lets the orchestrator run until `sink` has seen `kind`.
    async fn settle(sink: &MemorySink, kind: EventKind) {
        while !sink.kinds().contains(&kind) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_newer_trigger_cancels_running_build() {
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let (server, mut calls) = RecordingServer::new(true);
        let sink = Arc::new(MemorySink::new());
        let slot = Arc::new(Mutex::new(Weak::new()));
        let orchestrator = Orchestrator::new(
            GatedRunner {
                started: started_tx,
            },
            server,
            sink.clone(),
            4000,
        )
        .with_job_slot(slot.clone());

        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(orchestrator.run(trigger_rx, stop_rx));

        let (id, gate) = started.recv().await.unwrap();
        assert_eq!(id, 1);
        gate.send(OK).unwrap();
        assert_eq!(calls.recv().await, Some("start"));

        trigger_tx.send(trigger("a.yaml")).await.unwrap();
        let (id, second_gate) = started.recv().await.unwrap();
        assert_eq!(id, 2);
        let second = slot.lock().unwrap().upgrade().unwrap();
        assert_eq!(second.state(), JobState::Running);

        trigger_tx.send(trigger("b.yaml")).await.unwrap();
        let (id, third_gate) = started.recv().await.unwrap();
        assert_eq!(id, 3);
        assert_eq!(second.state(), JobState::Cancelled);
        assert!(second.token().is_cancelled());

        second_gate.send(OK).unwrap();
        third_gate.send(OK).unwrap();
        assert_eq!(calls.recv().await, Some("reload"));

        stop_tx.send(true).unwrap();
        let summary = run.await.unwrap();
        assert_eq!(calls.recv().await, Some("stop"));
        assert!(calls.try_recv().is_err());
        assert_eq!(
            summary,
            RunSummary {
                jobs_started: 3,
                last_build_failed: false,
            }
        );

        let kinds = sink.kinds();
        assert!(kinds.contains(&EventKind::BuildCancelled { job: 2 }));
        let completed: Vec<u64> = kinds
            .iter()
            .filter_map(|kind| match kind {
                EventKind::BuildCompleted { job, .. } => Some(*job),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_server_without_content_reload_is_rebuilt() {
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let (server, mut calls) = RecordingServer::new(false);
        let orchestrator = Orchestrator::new(
            GatedRunner {
                started: started_tx,
            },
            server,
            Arc::new(MemorySink::new()),
            4000,
        );

        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(orchestrator.run(trigger_rx, stop_rx));

        started.recv().await.unwrap().1.send(OK).unwrap();
        assert_eq!(calls.recv().await, Some("start"));

        trigger_tx.send(trigger("a.yaml")).await.unwrap();
        started
            .recv()
            .await
            .unwrap()
            .1
            .send(OK)
            .unwrap();
        assert_eq!(calls.recv().await, Some("rebuild"));

        drop(stop_tx);
        let summary = run.await.unwrap();
        assert!(!summary.last_build_failed);
        assert_eq!(calls.recv().await, Some("stop"));
    }

    #[tokio::test]
    async fn test_cancelled_changes_carry_into_next_build() {
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let (server, _calls) = RecordingServer::new(true);
        let slot = Arc::new(Mutex::new(Weak::new()));
        let orchestrator = Orchestrator::new(
            GatedRunner {
                started: started_tx,
            },
            server,
            Arc::new(MemorySink::new()),
            4000,
        )
        .with_job_slot(slot.clone());

        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(orchestrator.run(trigger_rx, stop_rx));

        started.recv().await.unwrap().1.send(OK).unwrap();
        trigger_tx.send(trigger("a.yaml")).await.unwrap();
        let (id, _second_gate) = started.recv().await.unwrap();
        assert_eq!(id, 2);

        trigger_tx.send(trigger("b.yaml")).await.unwrap();
        let (id, third_gate) = started.recv().await.unwrap();
        assert_eq!(id, 3);
        let third = slot.lock().unwrap().upgrade().unwrap();
        let BuildReason::Changes(covered) = third.reason() else {
            panic!("expected a change build, got {:?}", third.reason());
        };
        assert_eq!(
            covered.changes,
            vec![
                SourceChange::new("a.yaml", ChangeKind::Modified),
                SourceChange::new("b.yaml", ChangeKind::Modified),
            ]
        );
        assert_eq!(covered.latest, PathBuf::from("b.yaml"));

        third_gate.send(OK).unwrap();
        stop_tx.send(true).unwrap();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_rebuild_leaves_server_alone() {
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let (server, mut calls) = RecordingServer::new(true);
        let sink = Arc::new(MemorySink::new());
        let orchestrator = Orchestrator::new(
            GatedRunner {
                started: started_tx,
            },
            server,
            sink.clone(),
            4000,
        );

        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(orchestrator.run(trigger_rx, stop_rx));

        started.recv().await.unwrap().1.send(OK).unwrap();
        assert_eq!(calls.recv().await, Some("start"));

        trigger_tx.send(trigger("a.yaml")).await.unwrap();
        started.recv().await.unwrap().1.send(BROKEN).unwrap();
        settle(
            &sink,
            EventKind::BuildCompleted {
                job: 2,
                rendered: 0,
                failed: 1,
            },
        )
        .await;
        assert!(calls.try_recv().is_err());

        trigger_tx.send(trigger("a.yaml")).await.unwrap();
        started.recv().await.unwrap().1.send(OK).unwrap();
        assert_eq!(calls.recv().await, Some("reload"));

        stop_tx.send(true).unwrap();
        let summary = run.await.unwrap();
        assert!(!summary.last_build_failed);
        assert_eq!(calls.recv().await, Some("stop"));
        assert!(!sink.kinds().contains(&EventKind::BuildCancelled { job: 2 }));
    }

    #[tokio::test]
    async fn test_failed_build_is_reported() {
        struct FailingRunner;

        impl BuildRunner for FailingRunner {
            async fn run(&self, _job: Arc<BuildJob>) -> anyhow::Result<BuildSummary> {
                anyhow::bail!("disk full")
            }
        }

        let (server, mut calls) = RecordingServer::new(true);
        let sink = Arc::new(MemorySink::new());
        let orchestrator = Orchestrator::new(FailingRunner, server, sink.clone(), 4000);

        let (_trigger_tx, trigger_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(orchestrator.run(trigger_rx, stop_rx));

        settle(
            &sink,
            EventKind::BuildFailed {
                job: 1,
                error: "disk full".to_string(),
            },
        )
        .await;
        stop_tx.send(true).unwrap();
        let summary = run.await.unwrap();

        assert!(summary.last_build_failed);
        // Never started, so never stopped either.
        assert!(calls.try_recv().is_err());
        assert!(
            !sink
                .kinds()
                .iter()
                .any(|kind| matches!(kind, EventKind::ServerStarting { .. }))
        );
    }
}
