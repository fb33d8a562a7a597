//! HTTP middleware: CORS, security headers, request ids, request logging,
//! and per-IP rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;
use tracing::{info, warn, Span};
use uuid::Uuid;

use crate::metrics;

pub type IpRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Cap on tracked client IPs before the oldest buckets are evicted.
const MAX_TRACKED_IPS: usize = 10_000;

/// Idle buckets older than this are dropped during cleanup.
const BUCKET_TTL: Duration = Duration::from_secs(3600);

/// One token bucket per client IP, with TTL-based eviction.
#[derive(Clone)]
pub struct RateLimiterCache {
    buckets: Arc<RwLock<HashMap<IpAddr, (Arc<IpRateLimiter>, Instant)>>>,
    quota: Quota,
}

impl RateLimiterCache {
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second)
            .unwrap_or_else(|| NonZeroU32::new(10).expect("nonzero literal"));
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            quota: Quota::per_second(rps),
        }
    }

    /// True if `ip` still has budget for this request.
    pub async fn check(&self, ip: IpAddr) -> bool {
        self.bucket_for(ip).await.check().is_ok()
    }

    async fn bucket_for(&self, ip: IpAddr) -> Arc<IpRateLimiter> {
        if let Some((bucket, _)) = self.buckets.read().await.get(&ip) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write().await;
        // Double-check: another task may have inserted while we waited.
        if let Some((bucket, _)) = buckets.get(&ip) {
            return Arc::clone(bucket);
        }

        if buckets.len() >= MAX_TRACKED_IPS {
            Self::evict(&mut buckets);
        }

        let bucket = Arc::new(RateLimiter::direct(self.quota));
        buckets.insert(ip, (Arc::clone(&bucket), Instant::now()));
        bucket
    }

    fn evict(buckets: &mut HashMap<IpAddr, (Arc<IpRateLimiter>, Instant)>) {
        let now = Instant::now();
        buckets.retain(|_, (_, created)| now.duration_since(*created) < BUCKET_TTL);

        if buckets.len() >= MAX_TRACKED_IPS {
            let mut by_age: Vec<_> = buckets.iter().map(|(ip, (_, t))| (*ip, *t)).collect();
            by_age.sort_by_key(|(_, t)| *t);

            let excess = buckets.len() + 1 - MAX_TRACKED_IPS;
            for (ip, _) in by_age.into_iter().take(excess) {
                buckets.remove(&ip);
            }
            warn!(evicted = excess, "rate limiter cache over capacity");
        }
    }
}

/// CORS layer from the configured origin list.
///
/// A `*` entry means permissive mode without credentials; explicit origins
/// get credentials, since tower-http refuses wildcard-plus-credentials.
pub fn cors_layer(origins: &[String]) -> tower_http::cors::CorsLayer {
    use axum::http::{header, Method};
    use tower_http::cors::{Any, CorsLayer};

    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_origin(Any)
            .max_age(Duration::from_secs(600));
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
        ])
        .allow_credentials(true)
        .allow_origin(origins)
        .max_age(Duration::from_secs(600))
}

pub async fn security_headers(request: Request<Body>, next: Next) -> Response<Body> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Cross-Origin-Resource-Policy",
        HeaderValue::from_static("same-origin"),
    );
    response
}

/// Propagate an incoming `X-Request-ID` or mint a fresh one, attach it to
/// the request extensions and the current span, and echo it back.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response<Body> {
    let id = request
        .headers()
        .get("X-Request-ID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(id.clone());
    Span::current().record("request_id", &id);

    let mut response = next.run(request).await;
    if let Ok(value) = id.parse() {
        response.headers_mut().insert("X-Request-ID", value);
    }
    response
}

/// Log one line per completed request. Probe endpoints stay quiet.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    if !matches!(uri.path(), "/health" | "/healthz" | "/ready") {
        info!(
            method = %method,
            uri = %uri,
            status = %response.status(),
            duration_ms = %start.elapsed().as_millis(),
            "request completed"
        );
    }

    response
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiterCache>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if let Some(ip) = client_ip(&request) {
        if !limiter.check(ip).await {
            warn!(ip = %ip, "rate limit exceeded");
            metrics::record_rate_limit_hit(request.uri().path());
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", "1")],
                "Rate limit exceeded. Please try again later.",
            )
                .into_response();
        }
    }

    next.run(request).await
}

/// Client address: leftmost X-Forwarded-For hop, then X-Real-IP, then the
/// socket peer.
fn client_ip(request: &Request<Body>) -> Option<IpAddr> {
    let header_ip = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse().ok())
    };

    header_ip("X-Forwarded-For")
        .or_else(|| header_ip("X-Real-IP"))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<std::net::SocketAddr>>()
                .map(|ci| ci.0.ip())
        })
}
