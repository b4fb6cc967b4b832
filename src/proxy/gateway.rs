//! Pingora ProxyHttp implementation for the sticky gateway.
//!
//! Resolves each request's affinity cookie against a snapshot of the backend
//! pool, falls back to round-robin selection when there is no usable
//! affinity, and stamps every response with the chosen backend's token.

use std::sync::Arc;

use async_trait::async_trait;
use pingora_core::prelude::*;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};
use url::Url;

use crate::affinity::StickySession;
use crate::store::{Backend, BackendPool};

use super::LoadBalancer;

/// How the backend for a request was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The affinity cookie named a live backend.
    Affinity,
    /// Fallback selection picked the backend.
    Fallback,
}

impl Selection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Selection::Affinity => "hit",
            Selection::Fallback => "miss",
        }
    }
}

/// Per-request context for the gateway proxy.
#[derive(Default)]
pub struct GatewayCtx {
    /// The backend selected for this request.
    /// Used for cookie stamping and health tracking.
    pub backend: Option<Url>,
    pub selection: Option<Selection>,
}

/// Gateway proxy that routes HTTP requests with session affinity.
pub struct StickyGateway {
    pool: Arc<BackendPool>,
    sticky: StickySession,
    balancer: LoadBalancer,
}

impl StickyGateway {
    /// Creates a new gateway over the given pool.
    pub fn new(pool: Arc<BackendPool>, sticky: StickySession, balancer: LoadBalancer) -> Self {
        Self {
            pool,
            sticky,
            balancer,
        }
    }

    pub fn sticky(&self) -> &StickySession {
        &self.sticky
    }

    /// Chooses a backend for a request from one pool snapshot.
    ///
    /// An affinity hit on an unhealthy backend, a stale cookie and an
    /// unreadable cookie header all fall through to round-robin.
    pub fn select(
        &self,
        req: &RequestHeader,
        snapshot: &[Backend],
    ) -> Option<(Backend, Selection)> {
        let health = self.balancer.health_tracker();
        match self.sticky.get_backend(req, snapshot) {
            Ok(Some(backend)) if health.is_healthy(&backend.url) => {
                return Some((backend.clone(), Selection::Affinity));
            }
            Ok(Some(backend)) => {
                tracing::debug!(backend = %backend.url, "affinity target unhealthy");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to read affinity cookie, falling back");
            }
        }

        self.balancer
            .next(snapshot)
            .map(|backend| (backend.clone(), Selection::Fallback))
    }

    /// Creates an HttpPeer from a backend.
    ///
    /// Connects to the address fixed when the backend was built, enables TLS
    /// for `https`, and uses the host as SNI.
    fn backend_to_peer(backend: &Backend) -> Result<HttpPeer> {
        let addr = backend.addr.ok_or_else(|| {
            Error::explain(
                ErrorType::InternalError,
                format!("backend '{}' has no resolved address", backend.url),
            )
        })?;
        let use_tls = requires_tls(&backend.url);
        let sni = extract_sni(&backend.url);

        Ok(HttpPeer::new(addr, use_tls, sni))
    }
}

#[async_trait]
impl ProxyHttp for StickyGateway {
    type CTX = GatewayCtx;

    fn new_ctx(&self) -> Self::CTX {
        GatewayCtx::default()
    }

    async fn upstream_peer(
        &self,
        session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let snapshot = self.pool.snapshot();

        let (backend, selection) = self
            .select(session.req_header(), &snapshot)
            .ok_or_else(|| {
                Error::explain(
                    ErrorType::HTTPStatus(503),
                    format!("no healthy backend among {}", snapshot.len()),
                )
            })?;

        let peer = Self::backend_to_peer(&backend)?;

        ctx.backend = Some(backend.url);
        ctx.selection = Some(selection);
        Ok(Box::new(peer))
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()>
    where
        Self::CTX: Send + Sync,
    {
        if let Some(ref backend) = ctx.backend {
            self.sticky.stick_backend(backend, upstream_response);
        }
        Ok(())
    }

    async fn connected_to_upstream(
        &self,
        _session: &mut Session,
        _reused: bool,
        _peer: &HttpPeer,
        _fd: std::os::unix::io::RawFd,
        _digest: Option<&pingora_core::protocols::Digest>,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        if let Some(ref backend) = ctx.backend {
            self.balancer.health_tracker().record_success(backend);
        }
        Ok(())
    }

    fn fail_to_connect(
        &self,
        _session: &mut Session,
        _peer: &HttpPeer,
        ctx: &mut Self::CTX,
        e: Box<Error>,
    ) -> Box<Error> {
        if let Some(ref backend) = ctx.backend {
            self.balancer.health_tracker().record_failure(backend);
        }
        e
    }

    async fn logging(&self, session: &mut Session, _e: Option<&Error>, ctx: &mut Self::CTX) {
        let status = session
            .response_written()
            .map(|r| r.status.as_u16())
            .unwrap_or(0);

        let method = session.req_header().method.as_str();
        let path = session.req_header().uri.path();
        let backend = ctx.backend.as_ref().map(Url::as_str).unwrap_or("-");
        let affinity = ctx.selection.map(|s| s.as_str()).unwrap_or("-");

        tracing::info!(
            method = method,
            path = path,
            status = status,
            backend = backend,
            affinity = affinity,
            "request completed"
        );
    }
}

/// Determines if a backend requires TLS.
pub fn requires_tls(url: &Url) -> bool {
    url.scheme() == "https"
}

/// Extracts the SNI from a backend URL.
///
/// IPv6 literals are returned without brackets.
pub fn extract_sni(url: &Url) -> String {
    match url.host() {
        Some(url::Host::Ipv6(ip)) => ip.to_string(),
        Some(host) => host.to_string(),
        None => String::new(),
    }
}
