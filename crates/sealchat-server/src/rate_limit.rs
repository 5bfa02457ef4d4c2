use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use sealchat_shared::types::UserId;

use crate::auth::principal;

/// Who a bucket belongs to: the authenticated user when known, otherwise
/// the client address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateKey {
    User(UserId),
    Ip(IpAddr),
}

impl std::fmt::Display for RateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateKey::User(id) => write!(f, "user:{id}"),
            RateKey::Ip(ip) => write!(f, "ip:{ip}"),
        }
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    updated: Instant,
}

impl TokenBucket {
    fn full(burst: f64, now: Instant) -> Self {
        Self {
            tokens: burst,
            updated: now,
        }
    }

    fn take(&mut self, now: Instant, per_sec: f64, burst: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.updated).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_sec).min(burst);
        self.updated = now;

        let allowed = self.tokens >= 1.0;
        if allowed {
            self.tokens -= 1.0;
        }
        allowed
    }
}

/// Token buckets per [`RateKey`], refilled at `per_sec` up to `burst`.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<RateKey, TokenBucket>>>,
    per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(per_sec: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            per_sec,
            burst,
        }
    }

    pub async fn check(&self, key: RateKey) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::full(self.burst, now))
            .take(now, self.per_sec, self.burst)
    }

    /// Drop buckets untouched for `max_idle`. Returns how many were removed.
    pub async fn purge_stale(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.updated) < max_idle);
        before - buckets.len()
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = principal(req.headers())
        .map(RateKey::User)
        .or_else(|| client_ip(&req).map(RateKey::Ip));

    if let Some(key) = key {
        if !limiter.check(key).await {
            warn!(key = %key, "Rate limit exceeded");
            let body = Json(json!({ "error": "rate limit exceeded" }));
            return (StatusCode::TOO_MANY_REQUESTS, body).into_response();
        }
    }

    next.run(req).await
}

/// Peer address from `ConnectInfo`, else the first `X-Forwarded-For` hop,
/// else `X-Real-IP`.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    let header_ip = |name: &str| -> Option<IpAddr> {
        let value = req.headers().get(name)?.to_str().ok()?;
        value.split(',').next()?.trim().parse().ok()
    };

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .or_else(|| header_ip("x-forwarded-for"))
        .or_else(|| header_ip("x-real-ip"))
}
