//! Fixed-window request admission, keyed by client address per route.
//!
//! Each route bucket keeps its own window so the summarize and email limits
//! never interfere.  Windows roll over on time, not on count: once the window
//! elapses the counter resets and a new window starts.  State is created
//! lazily on the first request from a new identity.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::ApiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteBucket {
    Summarize,
    Email,
}

struct Window {
    count: u32,
    started: Instant,
}

pub struct RateLimiter {
    window: Duration,
    summarize_max: u32,
    email_max: u32,
    windows: DashMap<(RouteBucket, IpAddr), Window>,
}

impl RateLimiter {
    pub fn new(window: Duration, summarize_max: u32, email_max: u32) -> Self {
        Self {
            window,
            summarize_max,
            email_max,
            windows: DashMap::new(),
        }
    }

    /// Admit or reject a request before any further processing. The map entry
    /// stays locked for the whole check-and-increment, so concurrent requests
    /// from one client cannot slip past the limit.
    pub fn admit(&self, route: RouteBucket, client: IpAddr) -> Result<(), ApiError> {
        let max = match route {
            RouteBucket::Summarize => self.summarize_max,
            RouteBucket::Email => self.email_max,
        };
        let now = Instant::now();
        let mut entry = self.windows.entry((route, client)).or_insert(Window {
            count: 0,
            started: now,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }
        if entry.count >= max {
            tracing::warn!(route = ?route, client = %client, max, "rate limit exceeded");
            return Err(ApiError::RateLimited {
                message: match route {
                    RouteBucket::Summarize => {
                        "Too many summarize requests from this IP, please try again later."
                    }
                    RouteBucket::Email => {
                        "Too many email requests from this IP, please try again later."
                    }
                }
                .to_string(),
            });
        }
        entry.count += 1;
        Ok(())
    }
}
