use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use specpage_core::{Event, EventKind, EventSink};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{RenderServer, ServerError, ServerState, ServerStatus};

/// How long a fresh process must stay up to count as started.
const STARTUP_GRACE: Duration = Duration::from_millis(500);
const RESTART_DELAY: Duration = Duration::from_millis(250);
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const TAIL_LINES: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub restart_on_crash: bool,
    pub max_restarts: u32,
}

impl RestartPolicy {
    /// Whether a crash after `restarts` earlier restarts gets another try.
    pub fn should_restart(&self, restarts: u32) -> bool {
        self.restart_on_crash && restarts < self.max_restarts
    }
}

/// The last lines a process wrote to stdout or stderr.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn text(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct ProcessServerConfig {
    /// Shell command line; `{port}` is replaced with the port.
    pub command: String,
    pub rebuild_command: Option<String>,
    pub working_dir: PathBuf,
    /// The process notices changed pages by itself.
    pub hot_reload: bool,
    pub policy: RestartPolicy,
}

struct Shared {
    state: ServerState,
    port: Option<u16>,
    tail: OutputTail,
    restarts: u32,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Supervises an external documentation server process.
pub struct ProcessServer {
    config: ProcessServerConfig,
    sink: Arc<dyn EventSink>,
    shared: Arc<Mutex<Shared>>,
    stop_tx: Option<oneshot::Sender<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl ProcessServer {
    pub fn new(config: ProcessServerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            shared: Arc::new(Mutex::new(Shared {
                state: ServerState::Stopped,
                port: None,
                tail: OutputTail::new(TAIL_LINES),
                restarts: 0,
            })),
            stop_tx: None,
            monitor: None,
        }
    }

    /// Recent process output, for error reports.
    pub fn output_tail(&self) -> String {
        lock(&self.shared).tail.text()
    }
}

impl RenderServer for ProcessServer {
    async fn start(&mut self, port: u16) -> Result<(), ServerError> {
        {
            let mut shared = lock(&self.shared);
            if matches!(shared.state, ServerState::Running | ServerState::Starting) {
                return Err(ServerError::AlreadyRunning);
            }
            shared.state.advance(ServerState::Starting)?;
            shared.port = Some(port);
            shared.tail.clear();
            shared.restarts = 0;
        }

        let Spawned { mut child, readers } = match spawn_process(
            &self.config.command,
            port,
            &self.config.working_dir,
            &self.shared,
        ) {
            Ok(spawned) => spawned,
            Err(err) => {
                lock(&self.shared).state.advance(ServerState::Stopped)?;
                return Err(err);
            }
        };

        tokio::select! {
            status = child.wait() => {
                drain(readers).await;
                let output = {
                    let mut shared = lock(&self.shared);
                    shared.state.advance(ServerState::Crashed)?;
                    shared.tail.text()
                };
                return Err(ServerError::Exited { status: describe_exit(status), output });
            }
            _ = tokio::time::sleep(STARTUP_GRACE) => {}
        }

        lock(&self.shared).state.advance(ServerState::Running)?;
        tracing::info!(port, command = %self.config.command, "server process running");

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);
        self.monitor = Some(tokio::spawn(supervise(
            child,
            readers,
            stop_rx,
            self.config.clone(),
            port,
            self.shared.clone(),
            self.sink.clone(),
        )));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ServerError> {
        let Some(stop_tx) = self.stop_tx.take() else {
            let mut shared = lock(&self.shared);
            if shared.state == ServerState::Crashed {
                shared.state.advance(ServerState::Stopped)?;
            }
            return Ok(());
        };

        {
            let mut shared = lock(&self.shared);
            if shared.state == ServerState::Running {
                shared.state.advance(ServerState::Stopping)?;
            }
        }
        let _ = stop_tx.send(());
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
        }

        let mut shared = lock(&self.shared);
        if shared.state != ServerState::Stopped {
            shared.state.advance(ServerState::Stopped)?;
        }
        shared.port = None;
        tracing::info!("server process stopped");
        Ok(())
    }

    async fn rebuild_for_search_index(&mut self) -> Result<(), ServerError> {
        let port = lock(&self.shared).port;
        if let Some(command) = &self.config.rebuild_command {
            run_to_completion(command, port.unwrap_or_default(), &self.config.working_dir).await?;
        }
        // The platform only reads its search index on startup.
        if let Some(port) = port {
            self.stop().await?;
            self.start(port).await?;
        }
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), ServerError> {
        if self.config.hot_reload {
            return Ok(());
        }
        self.rebuild_for_search_index().await
    }

    fn supports_content_reload(&self) -> bool {
        self.config.hot_reload
    }

    fn status(&self) -> ServerStatus {
        let shared = lock(&self.shared);
        ServerStatus {
            state: shared.state,
            running: shared.state == ServerState::Running,
            port: shared.port,
        }
    }
}

struct Spawned {
    child: Child,
    readers: Vec<JoinHandle<()>>,
}

fn shell(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(command_line);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        command
    }
}

fn spawn_process(
    command: &str,
    port: u16,
    working_dir: &Path,
    shared: &Arc<Mutex<Shared>>,
) -> Result<Spawned, ServerError> {
    let command_line = command.replace("{port}", &port.to_string());
    tracing::debug!(command = %command_line, "spawning server process");

    let mut child = shell(&command_line)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ServerError::Spawn {
            command: command_line.clone(),
            source,
        })?;

    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(capture(stdout, shared.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(capture(stderr, shared.clone())));
    }
    Ok(Spawned { child, readers })
}

async fn capture<R>(stream: R, shared: Arc<Mutex<Shared>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "specpage::server", "{line}");
        lock(&shared).tail.push(line);
    }
}

/// Waits for output readers to reach end of stream, bounded in case a
/// grandchild keeps the pipes open.
async fn drain(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
    }
}

fn describe_exit(status: std::io::Result<std::process::ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(err) => err.to_string(),
    }
}

async fn run_to_completion(
    command: &str,
    port: u16,
    working_dir: &Path,
) -> Result<(), ServerError> {
    let command_line = command.replace("{port}", &port.to_string());
    let output = shell(&command_line)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ServerError::Spawn {
            command: command_line.clone(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }
    let mut tail = OutputTail::new(TAIL_LINES);
    for line in String::from_utf8_lossy(&output.stdout)
        .lines()
        .chain(String::from_utf8_lossy(&output.stderr).lines())
    {
        tail.push(line.to_string());
    }
    Err(ServerError::Command {
        command: command_line,
        output: tail.text(),
    })
}

async fn supervise(
    mut child: Child,
    mut readers: Vec<JoinHandle<()>>,
    mut stop_rx: oneshot::Receiver<()>,
    config: ProcessServerConfig,
    port: u16,
    shared: Arc<Mutex<Shared>>,
    sink: Arc<dyn EventSink>,
) {
    loop {
        let status = tokio::select! {
            _ = &mut stop_rx => {
                let _ = child.kill().await;
                return;
            }
            status = child.wait() => status,
        };

        drain(std::mem::take(&mut readers)).await;
        let (output, restarts) = {
            let mut guard = lock(&shared);
            let _ = guard.state.advance(ServerState::Crashed);
            (guard.tail.text(), guard.restarts)
        };
        tracing::error!(status = %describe_exit(status), "server process exited");
        sink.emit(Event::now(EventKind::ServerCrashed { output }));

        if !config.policy.should_restart(restarts) {
            tracing::warn!(restarts, "not restarting server process");
            return;
        }

        tokio::select! {
            _ = &mut stop_rx => return,
            _ = tokio::time::sleep(RESTART_DELAY) => {}
        }

        {
            let mut guard = lock(&shared);
            guard.restarts += 1;
            let _ = guard.state.advance(ServerState::Starting);
        }
        match spawn_process(&config.command, port, &config.working_dir, &shared) {
            Ok(spawned) => {
                child = spawned.child;
                readers = spawned.readers;
                let _ = lock(&shared).state.advance(ServerState::Running);
                tracing::info!(port, "server process restarted");
                sink.emit(Event::now(EventKind::ServerStarted { port }));
            }
            Err(err) => {
                let _ = lock(&shared).state.advance(ServerState::Crashed);
                sink.emit(Event::now(EventKind::ServerError {
                    error: err.to_string(),
                }));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specpage_core::MemorySink;

    fn server(command: &str, policy: RestartPolicy) -> (ProcessServer, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let config = ProcessServerConfig {
            command: command.to_string(),
            rebuild_command: None,
            working_dir: std::env::temp_dir(),
            hot_reload: true,
            policy,
        };
        (ProcessServer::new(config, sink.clone()), sink)
    }

    const NO_RESTART: RestartPolicy = RestartPolicy {
        restart_on_crash: false,
        max_restarts: 0,
    };

    #[test]
    fn test_restart_policy() {
        let policy = RestartPolicy {
            restart_on_crash: true,
            max_restarts: 2,
        };
        assert!(policy.should_restart(0));
        assert!(policy.should_restart(1));
        assert!(!policy.should_restart(2));
        assert!(!NO_RESTART.should_restart(0));
    }

    #[test]
    fn test_output_tail_keeps_last_lines() {
        let mut tail = OutputTail::new(2);
        for line in ["a", "b", "c"] {
            tail.push(line.to_string());
        }
        assert_eq!(tail.text(), "b\nc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_and_stop() {
        let (mut server, _) = server("sleep 30 # {port}", NO_RESTART);
        server.start(4100).await.unwrap();
        assert_eq!(
            server.status(),
            ServerStatus {
                state: ServerState::Running,
                running: true,
                port: Some(4100)
            }
        );
        assert!(matches!(server.start(4100).await, Err(ServerError::AlreadyRunning)));

        server.stop().await.unwrap();
        assert_eq!(server.status().state, ServerState::Stopped);
        assert_eq!(server.status().port, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_startup_failure_reports_output() {
        let (mut server, _) = server("echo port {port} is taken >&2; exit 3", NO_RESTART);
        match server.start(4101).await {
            Err(ServerError::Exited { output, .. }) => {
                assert!(output.contains("port 4101 is taken"), "{output}");
            }
            other => panic!("expected startup failure, got {other:?}"),
        }
        assert_eq!(server.status().state, ServerState::Crashed);
        server.stop().await.unwrap();
        assert_eq!(server.status().state, ServerState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crashes_are_restarted_up_to_the_limit() {
        let policy = RestartPolicy {
            restart_on_crash: true,
            max_restarts: 1,
        };
        let (mut server, sink) = server("sleep 1; echo gone; exit 1", policy);
        server.start(4102).await.unwrap();

        let crashes = || {
            sink.kinds()
                .iter()
                .filter(|kind| matches!(kind, EventKind::ServerCrashed { .. }))
                .count()
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        while crashes() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(crashes(), 2);
        assert_eq!(server.status().state, ServerState::Crashed);
        assert!(server.output_tail().contains("gone"));
        server.stop().await.unwrap();
    }
}
