//! HTTP server exposing the landing page, the archive download and a health probe

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

use crate::archive::{build_archive, ARCHIVE_NAME};
use crate::page::render_landing;
use crate::state::SharedFileSet;

/// How long `stop` waits for in-flight requests before aborting the server task
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Body returned by `/health`
pub const HEALTH_BODY: &str = "OK";

/// The local port could not be bound
#[derive(Debug, thiserror::Error)]
#[error("could not bind to {addr}: {source}")]
pub struct BindError {
    pub addr: String,
    #[source]
    pub source: std::io::Error,
}

/// File server for one sharing session
#[derive(Clone)]
pub struct FileServerApi {
    files: SharedFileSet,
}

impl FileServerApi {
    /// Create a new file server over a validated file set
    pub fn new(files: SharedFileSet) -> Self {
        Self { files }
    }

    /// Get the shared files
    pub fn files(&self) -> &SharedFileSet {
        &self.files
    }

    /// Create the axum router with all routes configured
    ///
    /// Unmatched paths render the landing page.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(landing_page))
            .route("/download", get(download))
            .route("/health", get(health_check))
            .fallback(landing_page)
            .with_state(self.files.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and start serving in the background
    ///
    /// # Arguments
    /// * `host` - Host to bind to (e.g., "127.0.0.1")
    /// * `port` - Port to bind to, `0` lets the OS pick a free one
    pub async fn bind(self, host: &str, port: u16) -> Result<RunningServer, BindError> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| BindError {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BindError { addr, source })?;

        tracing::info!("File server listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = self.router();
        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("File server error: {}", e);
            }
        });

        Ok(RunningServer {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

/// Handle to a server started with [`FileServerApi::bind`]
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The bound port; every tunnel forwards here
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop accepting connections and wait (bounded) for the server task
    ///
    /// Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
            Ok(_) => tracing::info!("File server stopped"),
            Err(_) => {
                tracing::warn!(
                    "File server did not stop within {:?}, aborting",
                    STOP_TIMEOUT
                );
                task.abort();
            }
        }
    }
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, HEALTH_BODY)
}

/// Landing page listing the shared files
async fn landing_page(State(files): State<SharedFileSet>) -> Html<String> {
    Html(render_landing(&files))
}

/// Build the archive on a blocking thread and stream it back
async fn download(State(files): State<SharedFileSet>) -> Result<Response, AppError> {
    let archive = tokio::task::spawn_blocking(move || build_archive(files.files()))
        .await
        .map_err(|e| AppError::Internal(format!("Archive task failed: {}", e)))?
        .map_err(|e| AppError::Internal(format!("Failed to build archive: {}", e)))?;

    tracing::info!(
        "Serving archive with {} file(s), {} bytes",
        archive.entries,
        archive.bytes.len()
    );
    if archive.skipped > 0 {
        tracing::warn!("{} file(s) could not be read and were skipped", archive.skipped);
    }

    let content_length = archive.bytes.len();
    let body = Body::from_stream(ReaderStream::new(Cursor::new(archive.bytes)));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", ARCHIVE_NAME),
        )
        .header(header::CONTENT_LENGTH, content_length)
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// Application error types
#[derive(Debug)]
enum AppError {
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Internal(msg) => {
                tracing::error!("{}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, message).into_response()
    }
}
