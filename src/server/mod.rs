//! HTTP server module
//!
//! Accepts multipart uploads on the configured upload path and hands each
//! request body to the [`UploadCoordinator`].
//!
//! # Endpoints
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `POST` | `server.upload_path` | `200 OK` or `400 Upload failed: ...` |
//! | `GET` | `/health` | `200 ok` |
//! | other | `server.upload_path` | `405`, `Allow: POST` |
//! | any | anything else | `404` |
//!
//! # Example
//!
//! ```no_run
//! use sluice_uploadr::config::Config;
//! use sluice_uploadr::server::Server;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::default();
//! config.server.port = 0;
//! let server = Server::new(config).await?;
//! println!("Listening on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use crate::allocator::FilenameAllocator;
use crate::config::{Config, ServerConfig};
use crate::notify::{LogSink, NotificationSink, Notifier, SinkError, TelegramSink};
use crate::relay::StreamRelay;
use crate::session::{SessionOutcome, UploadCoordinator};
use crate::storage::{DiskStorage, StorageError};
use http_body_util::BodyExt;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

/// How long shutdown waits for queued notifications
const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Notification sink error: {0}")]
    SinkError(#[from] SinkError),
}

/// Shared request-handling state
struct Routes {
    upload_path: String,
    coordinator: UploadCoordinator,
}

/// HTTP upload server
pub struct Server {
    routes: Arc<Routes>,
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Option<JoinHandle<()>>,
}

impl Server {
    /// Build the upload pipeline from `config` and bind the listener
    ///
    /// Opens the storage root, seeds the filename allocator past the highest
    /// sequence already on disk and starts the notification dispatcher.
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let storage =
            DiskStorage::with_write_buffer(&config.storage.root, config.storage.write_buffer_bytes)
                .await?;

        let next_sequence = storage
            .highest_sequence()
            .await?
            .map_or(0, |highest| highest.saturating_add(1));
        info!(
            root = %storage.root().display(),
            next_sequence,
            "Storage root ready"
        );

        let sink: Arc<dyn NotificationSink> = match config.notify.telegram {
            Some(ref telegram) => {
                let sink = TelegramSink::new(telegram.sink_config())?;
                info!(chat_id = sink.chat_id(), "Telegram notifications enabled");
                Arc::new(sink)
            }
            None => {
                info!("No notification sink configured, logging events");
                Arc::new(LogSink)
            }
        };
        let (notifier, dispatcher) = Notifier::spawn(sink, config.notify.queue_capacity);

        let relay = StreamRelay::new(Arc::new(storage)).discard_partial(config.storage.discard_partial);
        let coordinator = UploadCoordinator::new(
            Arc::new(FilenameAllocator::starting_at(next_sequence)),
            relay,
            notifier,
            config.session_settings(),
        );

        let mut server = Self::with_coordinator(&config.server, coordinator).await?;
        server.dispatcher = Some(dispatcher);
        Ok(server)
    }

    /// Bind a server around an existing coordinator
    pub async fn with_coordinator(
        config: &ServerConfig,
        coordinator: UploadCoordinator,
    ) -> Result<Self, ServerError> {
        let address = config.address();
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address {}: {}", address, e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        // Get actual bound address (important for port 0)
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            routes: Arc::new(Routes {
                upload_path: config.upload_path.clone(),
                coordinator,
            }),
            listener,
            local_addr,
            dispatcher: None,
        })
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> Result<(), ServerError> {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        };
        self.serve_until(shutdown).await
    }

    /// Serve until `shutdown` completes
    ///
    /// Each connection is handled in its own task; connection errors are
    /// logged and never stop the accept loop.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!(
            upload_path = %self.routes.upload_path,
            "Accepting uploads on {}", self.local_addr
        );
        tokio::pin!(shutdown);

        // Idle keep-alive connections hold route clones until they are dropped
        let mut connections = JoinSet::new();

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => continue,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let routes = Arc::clone(&self.routes);
            connections.spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let routes = Arc::clone(&routes);
                    async move { handle_request(req, routes).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    warn!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }

        info!(open_connections = connections.len(), "Shutting down server");
        connections.shutdown().await;

        let Self {
            routes, dispatcher, ..
        } = self;
        // Sessions still running hold their own coordinator clones
        drop(routes);
        if let Some(dispatcher) = dispatcher {
            if tokio::time::timeout(NOTIFY_DRAIN_TIMEOUT, dispatcher).await.is_err() {
                warn!("Notification queue not drained before shutdown");
            }
        }
        Ok(())
    }
}

/// Route one request
async fn handle_request(
    req: Request<Incoming>,
    routes: Arc<Routes>,
) -> Result<Response<String>, Infallible> {
    let path = req.uri().path();

    if path == "/health" && req.method() == Method::GET {
        return Ok(text_response(StatusCode::OK, "ok".to_string()));
    }

    if path != routes.upload_path {
        info!(method = %req.method(), path, "No route");
        return Ok(text_response(StatusCode::NOT_FOUND, "Not Found".to_string()));
    }

    if req.method() != Method::POST {
        let mut response = text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed".to_string(),
        );
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST"));
        return Ok(response);
    }

    Ok(handle_upload(req, &routes.coordinator).await)
}

/// Run the upload session for one request and map its outcome
async fn handle_upload(req: Request<Incoming>, coordinator: &UploadCoordinator) -> Response<String> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let body = req.into_body().into_data_stream();
    let coordinator = coordinator.clone();

    // A separate task keeps relays alive if the connection future is dropped
    let session = tokio::spawn(async move { coordinator.run(&content_type, body).await });

    match session.await {
        Ok(outcome) => upload_response(&outcome),
        Err(e) => {
            error!(error = %e, "Upload session task failed");
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_string(),
            )
        }
    }
}

fn upload_response(outcome: &SessionOutcome) -> Response<String> {
    match outcome.first_failure() {
        None => text_response(StatusCode::OK, "OK".to_string()),
        Some(cause) => text_response(StatusCode::BAD_REQUEST, format!("Upload failed: {}", cause)),
    }
}

fn text_response(status: StatusCode, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
