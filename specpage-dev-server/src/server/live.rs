use axum::{
    Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::{StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use specpage_core::INDEX_FILE;
use specpage_core::markdown::{split_frontmatter, to_html};
use std::path::{Component, Path, PathBuf};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use super::{RenderServer, ServerError, ServerState, ServerStatus};

const LIVERELOAD_PATH: &str = "/__livereload";

/// Pushed to browsers as `{"kind": ...}` JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiveMessage {
    Connected,
    /// The output tree changed; reload the page.
    Reload,
}

impl LiveMessage {
    fn to_frame(self) -> Option<Message> {
        match serde_json::to_string(&self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::warn!("could not encode {self:?}: {e}");
                None
            }
        }
    }
}

/// Configuration for the built-in preview server
#[derive(Debug, Clone)]
pub struct LiveServerConfig {
    /// Host to bind to
    pub host: String,
    /// Output tree to serve
    pub root: PathBuf,
    /// Auto-open browser once started
    pub open: bool,
}

impl Default for LiveServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            root: PathBuf::from("./docs"),
            open: false,
        }
    }
}

/// Preview server that renders generated pages to HTML and tells
/// connected browsers to reload when content changes.
pub struct LiveServer {
    config: LiveServerConfig,
    reload_tx: broadcast::Sender<LiveMessage>,
    state: ServerState,
    port: Option<u16>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LiveServer {
    pub fn new(config: LiveServerConfig) -> Self {
        let (reload_tx, _) = broadcast::channel(16);
        Self {
            config,
            reload_tx,
            state: ServerState::Stopped,
            port: None,
            shutdown_tx: None,
            task: None,
        }
    }

    /// Receives every message pushed to browsers.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveMessage> {
        self.reload_tx.subscribe()
    }

    fn broadcast_reload(&self) {
        let browsers = self.reload_tx.send(LiveMessage::Reload).unwrap_or(0);
        tracing::debug!(browsers, "reload pushed");
    }
}

impl RenderServer for LiveServer {
    async fn start(&mut self, port: u16) -> Result<(), ServerError> {
        if self.state == ServerState::Running {
            return Err(ServerError::AlreadyRunning);
        }
        self.state.advance(ServerState::Starting)?;

        let addr = format!("{}:{}", self.config.host, port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state.advance(ServerState::Stopped)?;
                return Err(ServerError::Bind { addr, source });
            }
        };
        let bound_port = listener.local_addr().map(|a| a.port()).unwrap_or(port);

        let state = AppState {
            root: self.config.root.clone(),
            reload_tx: self.reload_tx.clone(),
        };
        let app = Router::new()
            .route(LIVERELOAD_PATH, get(livereload_socket))
            .fallback(page_handler)
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.task = Some(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!("preview server error: {e}");
            }
        }));
        self.shutdown_tx = Some(shutdown_tx);
        self.port = Some(bound_port);
        self.state.advance(ServerState::Running)?;

        let url = format!("http://{}:{}", self.config.host, bound_port);
        tracing::info!("Serving at {url}");
        tracing::info!(
            "Live reload enabled at ws://{}:{bound_port}{LIVERELOAD_PATH}",
            self.config.host
        );

        if self.config.open {
            if let Err(e) = open::that(&url) {
                tracing::warn!("Failed to open browser: {e}");
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ServerError> {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return Ok(());
        };
        self.state.advance(ServerState::Stopping)?;
        let _ = shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            // Open websockets keep graceful shutdown waiting.
            task.abort();
            let _ = task.await;
        }
        self.port = None;
        self.state.advance(ServerState::Stopped)
    }

    async fn rebuild_for_search_index(&mut self) -> Result<(), ServerError> {
        self.broadcast_reload();
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), ServerError> {
        self.broadcast_reload();
        Ok(())
    }

    fn supports_content_reload(&self) -> bool {
        true
    }

    fn status(&self) -> ServerStatus {
        ServerStatus {
            state: self.state,
            running: self.state == ServerState::Running,
            port: self.port,
        }
    }
}

#[derive(Clone)]
struct AppState {
    root: PathBuf,
    reload_tx: broadcast::Sender<LiveMessage>,
}

async fn livereload_socket(
    upgrade: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // Subscribed before the upgrade so a reload during the handshake counts.
    let updates = state.reload_tx.subscribe();
    upgrade.on_upgrade(move |socket| push_updates(socket, updates))
}

/// Forwards reload messages to one browser until either side goes away.
async fn push_updates(mut socket: WebSocket, mut updates: broadcast::Receiver<LiveMessage>) {
    let mut next = Some(LiveMessage::Connected);
    loop {
        if let Some(message) = next.take().and_then(LiveMessage::to_frame) {
            if socket.send(message).await.is_err() {
                return;
            }
        }
        tokio::select! {
            update = updates.recv() => match update {
                Ok(message) => next = Some(message),
                // Missed some; one reload covers them all.
                Err(RecvError::Lagged(_)) => next = Some(LiveMessage::Reload),
                Err(RecvError::Closed) => return,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Serves `.md` pages as HTML and everything else from disk.
async fn page_handler(State(state): State<AppState>, uri: Uri) -> Response {
    let request_path = uri.path().trim_start_matches('/');
    let Some(relative) = safe_relative(request_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if relative.as_os_str().is_empty() {
        return page_list(&state.root).await;
    }

    let candidates = if relative.extension().is_some_and(|ext| ext == "md") {
        vec![relative.clone()]
    } else {
        vec![relative.with_extension("md"), relative.join("index.md")]
    };
    for candidate in candidates {
        let path = state.root.join(&candidate);
        if let Ok(text) = tokio::fs::read_to_string(&path).await {
            return Html(render_page(&candidate, &text)).into_response();
        }
    }

    let request = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty());
    match request {
        Ok(request) => match ServeDir::new(&state.root).oneshot(request).await {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        },
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

/// Rejects paths that would leave the served root.
fn safe_relative(request_path: &str) -> Option<PathBuf> {
    let path = Path::new(request_path);
    path.components()
        .all(|component| matches!(component, Component::Normal(_)))
        .then(|| path.to_path_buf())
}

fn render_page(path: &Path, text: &str) -> String {
    let (_, body) = split_frontmatter(text);
    let title = path.with_extension("").to_string_lossy().replace('\\', "/");
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
</head>
<body>
<nav><a href="/">All pages</a></nav>
<main>
{body}</main>
</body>
</html>
"#,
        title = html_escape::encode_text(&title),
        body = to_html(body),
    );
    inject_livereload_script(&html)
}

async fn page_list(root: &Path) -> Response {
    let index = tokio::fs::read_to_string(root.join(INDEX_FILE))
        .await
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok());

    let mut items = String::new();
    let title = index
        .as_ref()
        .and_then(|index| index["title"].as_str())
        .unwrap_or("Pages")
        .to_string();
    if let Some(pages) = index.as_ref().and_then(|index| index["pages"].as_array()) {
        for page in pages {
            let path = page["path"].as_str().unwrap_or_default();
            let label = page["title"].as_str().unwrap_or(path);
            items.push_str(&format!(
                "<li><a href=\"/{}\">{}</a></li>\n",
                html_escape::encode_double_quoted_attribute(path),
                html_escape::encode_text(label)
            ));
        }
    }

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
</head>
<body>
<h1>{title}</h1>
<ul>
{items}</ul>
</body>
</html>
"#,
        title = html_escape::encode_text(&title),
    );
    (
        [(header::CACHE_CONTROL, "no-store")],
        Html(inject_livereload_script(&html)),
    )
        .into_response()
}

const LIVERELOAD_SCRIPT: &str = r#"<script>
(function connect() {
  const socket = new WebSocket(`ws://${location.host}/__livereload`);
  socket.addEventListener('message', (event) => {
    if (JSON.parse(event.data).kind === 'reload') location.reload();
  });
  socket.addEventListener('close', () => setTimeout(connect, 1000));
})();
</script>
"#;

/// Adds the browser side of live reload to a rendered page, inside `<body>`
/// when there is one.
pub fn inject_livereload_script(html: &str) -> String {
    let at = html.rfind("</body>").unwrap_or(html.len());
    let mut page = html.to_string();
    page.insert_str(at, LIVERELOAD_SCRIPT);
    page
}
