//! Process-wide request metrics.
//!
//! One `MetricsCollector` is constructed at startup and shared through the
//! application state.  Counters are atomics; the bounded response-time ring
//! sits behind a mutex since eviction and append must happen together.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

use crate::RequestContext;

/// Capacity of the response-time ring. The oldest sample is evicted once the
/// ring is full.
const RESPONSE_TIME_SAMPLES: usize = 1000;

pub struct MetricsCollector {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    response_times: Mutex<VecDeque<u64>>,
    endpoint_counts: DashMap<String, u64>,
    started: Instant,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub average_response_time: u64,
    pub endpoint_counts: BTreeMap<String, u64>,
    /// Uptime in milliseconds.
    pub uptime: u64,
    pub uptime_formatted: String,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            response_times: Mutex::new(VecDeque::with_capacity(RESPONSE_TIME_SAMPLES)),
            endpoint_counts: DashMap::new(),
            started: Instant::now(),
        }
    }

    pub fn on_request_start(&self, ctx: &RequestContext) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        *self
            .endpoint_counts
            .entry(format!("{} {}", ctx.method, ctx.path))
            .or_insert(0) += 1;
        tracing::info!(
            request_id = %ctx.id,
            method = %ctx.method,
            path = %ctx.path,
            client = %ctx.client_ip,
            "incoming request"
        );
    }

    /// Record the outcome of a finished request. Returns the elapsed time in
    /// milliseconds so callers can reuse it for access logging.
    pub fn on_request_end(&self, ctx: &RequestContext, status: u16, payload_bytes: u64) -> u64 {
        let duration_ms = ctx.start.elapsed().as_millis() as u64;
        if status >= 400 {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        {
            let mut ring = self.response_times.lock().unwrap();
            ring.push_back(duration_ms);
            if ring.len() > RESPONSE_TIME_SAMPLES {
                ring.pop_front();
            }
        }
        tracing::info!(
            request_id = %ctx.id,
            method = %ctx.method,
            path = %ctx.path,
            status,
            duration_ms,
            payload_bytes,
            "outgoing response"
        );
        duration_ms
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let average = {
            let ring = self.response_times.lock().unwrap();
            if ring.is_empty() {
                0
            } else {
                let sum: u64 = ring.iter().sum();
                (sum as f64 / ring.len() as f64).round() as u64
            }
        };
        let uptime = self.started.elapsed().as_millis() as u64;
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            average_response_time: average,
            endpoint_counts: self
                .endpoint_counts
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            uptime,
            uptime_formatted: format_uptime(uptime),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn format_uptime(uptime_ms: u64) -> String {
    let secs = uptime_ms / 1000;
    format!("{}h {}m {}s", secs / 3600, secs / 60 % 60, secs % 60)
}
