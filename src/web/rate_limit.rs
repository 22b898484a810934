use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::web::AppState;

const REGISTER_WINDOW_MS: u64 = 60_000;
const REGISTER_MAX: u64 = 3;
const LOGIN_WINDOW_MS: u64 = 60_000;
const LOGIN_MAX: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Register,
    Login,
}

impl Scope {
    fn label(self) -> &'static str {
        match self {
            Scope::Register => "registration",
            Scope::Login => "login",
        }
    }

    fn rejection_body(self) -> &'static str {
        match self {
            Scope::Register => "Too many registration attempts. Try again later.",
            Scope::Login => "Too many login attempts. Try again later.",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    window_start_ms: u64,
    hits: u64,
}

#[derive(Debug)]
struct LimiterState {
    entries: HashMap<IpAddr, Entry>,
    last_cleanup_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitCheck {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_after_seconds: u64,
}

/// Fixed-window request counter keyed by client IP.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                entries: HashMap::new(),
                last_cleanup_ms: 0,
            }),
        }
    }

    pub async fn check(&self, ip: IpAddr) -> RateLimitCheck {
        self.check_at(ip, now_ms()).await
    }

    async fn check_at(&self, ip: IpAddr, now_ms: u64) -> RateLimitCheck {
        let window_ms = self.config.window_ms;
        let mut state = self.state.lock().await;

        if now_ms.saturating_sub(state.last_cleanup_ms) >= window_ms {
            state
                .entries
                .retain(|_, entry| now_ms.saturating_sub(entry.window_start_ms) < window_ms);
            state.last_cleanup_ms = now_ms;
        }

        let entry = state.entries.entry(ip).or_insert(Entry {
            window_start_ms: now_ms,
            hits: 0,
        });

        if now_ms.saturating_sub(entry.window_start_ms) >= window_ms {
            entry.window_start_ms = now_ms;
            entry.hits = 0;
        }

        entry.hits = entry.hits.saturating_add(1);
        let allowed = entry.hits <= self.config.max;
        let reset_after_ms = window_ms.saturating_sub(now_ms.saturating_sub(entry.window_start_ms));

        RateLimitCheck {
            allowed,
            remaining: self.config.max.saturating_sub(entry.hits),
            reset_after_seconds: reset_after_ms.div_ceil(1000),
        }
    }
}

/// The limiters guarding the registration and login endpoints.
#[derive(Debug)]
pub struct RateLimiters {
    register: RateLimiter,
    login: RateLimiter,
    trust_proxy: bool,
}

impl RateLimiters {
    pub fn new(trust_proxy: bool) -> Self {
        Self {
            register: RateLimiter::new(RateLimitConfig {
                window_ms: REGISTER_WINDOW_MS,
                max: REGISTER_MAX,
            }),
            login: RateLimiter::new(RateLimitConfig {
                window_ms: LOGIN_WINDOW_MS,
                max: LOGIN_MAX,
            }),
            trust_proxy,
        }
    }

    fn limiter(&self, scope: Scope) -> &RateLimiter {
        match scope {
            Scope::Register => &self.register,
            Scope::Login => &self.login,
        }
    }
}

pub async fn limit_registration(State(state): State<AppState>, req: Request, next: Next) -> Response {
    enforce(&state, Scope::Register, req, next).await
}

pub async fn limit_login(State(state): State<AppState>, req: Request, next: Next) -> Response {
    enforce(&state, Scope::Login, req, next).await
}

async fn enforce(state: &AppState, scope: Scope, req: Request, next: Next) -> Response {
    let limiters = state.rate_limiters();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = client_ip(req.headers(), peer, limiters.trust_proxy)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    let check = limiters.limiter(scope).check(ip).await;
    if !check.allowed {
        warn!(%ip, scope = scope.label(), "rate limit exceeded");
        let mut res = (StatusCode::TOO_MANY_REQUESTS, scope.rejection_body()).into_response();
        if let Ok(value) = HeaderValue::from_str(&check.reset_after_seconds.to_string()) {
            res.headers_mut().insert(RETRY_AFTER, value);
        }
        return res;
    }

    next.run(req).await
}

fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = headers
            .get(HeaderName::from_static("x-forwarded-for"))
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| raw.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    peer
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn blocks_after_max_hits_in_window() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window_ms: 60_000,
            max: 3,
        });
        let start = 1_000_000;

        for hit in 0..3 {
            let check = limiter.check_at(ip(1), start + hit).await;
            assert!(check.allowed);
        }
        let blocked = limiter.check_at(ip(1), start + 10).await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
        assert_eq!(blocked.reset_after_seconds, 60);

        // another client is unaffected
        assert!(limiter.check_at(ip(2), start + 10).await.allowed);
    }

    #[tokio::test]
    async fn window_resets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window_ms: 60_000,
            max: 1,
        });
        assert!(limiter.check_at(ip(3), 5_000).await.allowed);
        assert!(!limiter.check_at(ip(3), 6_000).await.allowed);
        assert!(limiter.check_at(ip(3), 65_000).await.allowed);
    }

    #[test]
    fn forwarded_header_only_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        let peer = Some(ip(9));

        assert_eq!(client_ip(&headers, peer, false), peer);
        assert_eq!(
            client_ip(&headers, peer, true),
            Some("203.0.113.7".parse().unwrap())
        );

        let empty = HeaderMap::new();
        assert_eq!(client_ip(&empty, peer, true), peer);
    }
}
