/// Attempt-frequency gate for the public auth operations.
///
/// Sliding-window counters keyed by (caller identity, route class) behind a
/// shared mutex. Two tiers: a looser one for login/registration-adjacent
/// routes and a stricter one for password-reset-adjacent routes, where each
/// attempt has higher abuse value.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::configuration::RateLimitSettings;
use crate::error::{AppError, AuthError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Login, registration, refresh, logout.
    Auth,
    /// Forgot/verify/reset password, resend verification.
    Sensitive,
}

pub struct RateGate {
    window: Duration,
    auth_limit: usize,
    sensitive_limit: usize,
    windows: Mutex<HashMap<(String, RouteClass), Vec<Instant>>>,
}

impl RateGate {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            window: Duration::from_secs(settings.window_seconds),
            auth_limit: settings.auth_limit as usize,
            sensitive_limit: settings.sensitive_limit as usize,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn limit(&self, class: RouteClass) -> usize {
        match class {
            RouteClass::Auth => self.auth_limit,
            RouteClass::Sensitive => self.sensitive_limit,
        }
    }

    /// Admit or reject one attempt from `caller` against `class`.
    ///
    /// Rejection carries the seconds until the oldest counted attempt
    /// leaves the window.
    pub fn check(&self, caller: &str, class: RouteClass) -> Result<(), AppError> {
        let now = Instant::now();
        let limit = self.limit(class);

        let mut windows = self
            .windows
            .lock()
            .map_err(|_| AppError::Internal("Rate gate lock poisoned".to_string()))?;

        // Prune aged-out attempts everywhere and evict callers whose window
        // emptied, so the map does not grow with the set of IPs ever seen.
        windows.retain(|_, attempts| {
            attempts.retain(|t| now.duration_since(*t) < self.window);
            !attempts.is_empty()
        });

        let attempts = windows
            .entry((caller.to_string(), class))
            .or_insert_with(Vec::new);

        if attempts.len() >= limit {
            // A zero limit rejects before any attempt is recorded, so the
            // window may be empty here; the hint is then the full window.
            let retry_after = attempts
                .first()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window)
                .as_secs()
                .max(1);
            tracing::warn!(caller = caller, class = ?class, "Rate limit exceeded");
            return Err(AppError::Auth(AuthError::RateLimitExceeded {
                retry_after_seconds: retry_after,
            }));
        }

        attempts.push(now);
        Ok(())
    }
}
