use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
    Extension,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::RateLimitSettings;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Clone, Copy)]
struct Tier {
    limit: u32,
    period: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// Fixed-window counters per client, one window per tier. A request is
/// admitted only if every tier has headroom, and then counts against all of
/// them. Check and increment happen under one lock.
pub struct RateLimiter {
    clients: Mutex<HashMap<String, Vec<Window>>>,
    tiers: Vec<Tier>,
}

impl RateLimiter {
    fn with_tiers(tiers: Vec<Tier>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            tiers,
        }
    }

    /// Minute, hour and day windows.
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::with_tiers(vec![
            Tier { limit: settings.per_minute, period: Duration::from_secs(60) },
            Tier { limit: settings.per_hour, period: Duration::from_secs(3600) },
            Tier { limit: settings.per_day, period: Duration::from_secs(86_400) },
        ])
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::with_tiers(vec![Tier { limit, period: Duration::from_secs(60) }])
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Window>>> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Counts one request for `client`. On rejection returns the number of
    /// seconds until the exhausted window resets.
    pub fn check(&self, client: &str) -> Result<(), u64> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> Result<(), u64> {
        let mut clients = self.lock();
        let windows = clients.entry(client.to_string()).or_insert_with(|| {
            self.tiers
                .iter()
                .map(|_| Window { count: 0, started: now })
                .collect()
        });

        let mut retry_after: Option<u64> = None;
        for (tier, window) in self.tiers.iter().zip(windows.iter_mut()) {
            let elapsed = now.saturating_duration_since(window.started);
            if elapsed >= tier.period {
                window.count = 0;
                window.started = now;
            } else if window.count >= tier.limit {
                let remaining = (tier.period - elapsed).as_secs().max(1);
                retry_after = Some(retry_after.map_or(remaining, |r| r.max(remaining)));
            }
        }

        if let Some(seconds) = retry_after {
            return Err(seconds);
        }
        for window in windows.iter_mut() {
            window.count += 1;
        }
        Ok(())
    }

    /// Drops clients whose every window has expired.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let tiers = &self.tiers;
        self.lock().retain(|_, windows| {
            tiers
                .iter()
                .zip(windows.iter())
                .any(|(tier, window)| now.saturating_duration_since(window.started) < tier.period)
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn enforce(limiter: &RateLimiter, request: &Request, scope: &'static str) -> Result<(), ApiError> {
    let client_ip = client_key(request);
    if let Err(retry_after) = limiter.check(&client_ip) {
        tracing::warn!(client_ip = %client_ip, scope = scope, retry_after, "Rate limit exceeded");
        return Err(ApiError::RateLimited { retry_after });
    }

    // Occasionally clean up expired entries
    if rand::random::<u8>() < 10 {
        limiter.cleanup_expired();
    }
    Ok(())
}

/// Minute/hour/day limits from configuration, applied to every route.
pub async fn rate_limit_middleware(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    enforce(&state.rate_limiter, &request, "global")?;
    Ok(next.run(request).await)
}

/// Stricter limit for the authentication endpoints.
pub async fn strict_rate_limit_middleware(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    enforce(&state.auth_limiter, &request, "auth")?;
    Ok(next.run(request).await)
}
