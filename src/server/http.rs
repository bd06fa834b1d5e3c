//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one task per connection.

use bytes::Bytes;
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::CallerTokenValidator;
use crate::routes::{self, BoxBody};
use crate::services::AvtaleService;
use crate::types::AvtaleError;

/// Shared application state
pub struct AppState {
    pub service: Arc<AvtaleService>,
    pub validator: Arc<CallerTokenValidator>,
    /// Whether `/internal/avtalemal` accepts uploads
    pub upload_enabled: bool,
    pub dev_mode: bool,
}

impl AppState {
    pub fn new(service: Arc<AvtaleService>, validator: Arc<CallerTokenValidator>) -> Self {
        Self {
            service,
            validator,
            upload_enabled: false,
            dev_mode: false,
        }
    }

    pub fn with_upload_enabled(mut self, enabled: bool) -> Self {
        self.upload_enabled = enabled;
        self
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }
}

/// Accept connections until the process stops
pub async fn run(state: Arc<AppState>, listen: SocketAddr) -> Result<(), AvtaleError> {
    let listener = TcpListener::bind(listen).await?;

    info!("avtaler listening on {}", listen);

    if state.dev_mode {
        warn!("Development mode enabled - caller tokens are not verified");
    }
    if state.upload_enabled {
        info!("Template upload enabled at /internal/avtalemal");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = Arc::clone(&state);
                        async move { Ok::<_, hyper::Error>(handle_request(state, addr, req).await) }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route an incoming request
pub async fn handle_request<B>(state: Arc<AppState>, addr: SocketAddr, req: Request<B>) -> Response<BoxBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: std::fmt::Display + Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/internal/isalive") => routes::is_alive(),
        (&Method::GET, "/internal/isready") => routes::is_ready(Arc::clone(&state)).await,
        (&Method::GET, "/internal/version") => routes::version_info(),

        (&Method::POST, "/internal/avtalemal") if state.upload_enabled => {
            routes::handle_avtalemal_upload(req, Arc::clone(&state)).await
        }

        (_, p) if p == "/api/avtale" || p.starts_with("/api/avtale/") => {
            routes::handle_avtale_request(req, Arc::clone(&state)).await
        }

        _ => routes::not_found_response(&path),
    };

    if !path.starts_with("/internal/is") {
        info!(
            "[{}] {} {} -> {} ({} ms)",
            addr,
            method,
            path,
            response.status().as_u16(),
            started.elapsed().as_millis()
        );
    }

    response
}
