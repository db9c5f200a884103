#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener as TokioTcpListener;
use tokio::task::JoinHandle;

use recapd::{app, build_state_from_env};

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    /// Clear every variable the gateway reads, so ambient environment never
    /// bleeds into a test.
    pub fn reset_service_env(&mut self) {
        for key in [
            "APP_ENV",
            "FRONTEND_URL",
            "AI_API_URL",
            "AI_API_KEY",
            "RECAPD_AI_TIMEOUT_MS",
            "RECAPD_PROBE_TIMEOUT_MS",
            "RECAPD_RETRY_BASE_MS",
            "RECAPD_MAX_REQUEST_BYTES",
            "RECAPD_SUMMARIZE_RPM",
            "RECAPD_EMAIL_RPM",
            "RECAPD_RATE_WINDOW_SECS",
            "EMAIL_RELAY_URL",
            "EMAIL_USER",
            "EMAIL_PASS",
            "LOG_FILE",
            "LOG_MAX_BYTES",
            "LOG_ROTATE_KEEP",
            "LOG_ROTATE_COMPRESS",
            "RECAPD_LOG_STDOUT",
        ] {
            self.remove(key);
        }
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Spawn the gateway on an ephemeral port with state built from the current
/// environment.
pub async fn spawn_app() -> (String, JoinHandle<()>) {
    let listener = TokioTcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = build_state_from_env().await.unwrap();
    let app = app(state);
    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (format!("http://{}", addr), handle)
}

/// Scripted upstream generator. Serves each `(status, body)` entry once,
/// repeating the final entry forever, and counts hits.
pub async fn spawn_generator_stub(
    script: Vec<(u16, serde_json::Value)>,
) -> (String, Arc<AtomicUsize>, JoinHandle<()>) {
    assert!(!script.is_empty());
    let hits = Arc::new(AtomicUsize::new(0));
    let script = Arc::new(Mutex::new(VecDeque::from(script)));

    let listener = TokioTcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handler_hits = hits.clone();
    let app = Router::new().route(
        "/generate",
        post(move || {
            let script = script.clone();
            let hits = handler_hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let (status, body) = {
                    let mut s = script.lock().unwrap();
                    if s.len() > 1 {
                        s.pop_front().unwrap()
                    } else {
                        s.front().cloned().unwrap()
                    }
                };
                (StatusCode::from_u16(status).unwrap(), Json(body))
            }
        }),
    );
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/generate", addr), hits, handle)
}

/// A well-formed provider response with one candidate.
pub fn candidate_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }] }
        }]
    })
}

/// A provider error body carrying a reported message.
pub fn upstream_error_body(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": { "message": message } })
}
