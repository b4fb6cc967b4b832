//! HTTP health server for liveness and readiness probes.
//!
//! `/healthz` reports that the process is up. `/readyz` additionally
//! requires at least one backend in the pool.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::store::BackendPool;

/// Builds the probe response for a request path.
///
/// Returns 200 "ok" for `/healthz`, 200 "ok" or 503 for `/readyz`
/// depending on the pool, and 404 for all other paths.
pub fn probe_response(path: &str, pool: &BackendPool) -> Response<Full<Bytes>> {
    let (status, body) = match path {
        "/healthz" => (StatusCode::OK, "ok"),
        "/readyz" if pool.is_empty() => (StatusCode::SERVICE_UNAVAILABLE, "no backends"),
        "/readyz" => (StatusCode::OK, "ok"),
        _ => (StatusCode::NOT_FOUND, "not found"),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Starts the HTTP health server on the given address.
///
/// Runs indefinitely, accepting connections and handling probe requests.
pub async fn start_health_server(
    addr: SocketAddr,
    pool: Arc<BackendPool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let pool = Arc::clone(&pool);

        tokio::spawn(async move {
            let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                let response = probe_response(req.uri().path(), &pool);
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "health connection error");
            }
        });
    }
}
