//! Core library for Recapd.  This module wires together the middleware
//! chain, route handlers and shared application state.  Heavier concerns
//! (validation, rate limiting, metrics, the resilient upstream caller and
//! the email capability) live in their own modules and are injected here.

mod config;
pub mod email;
pub mod error;
pub mod generate;
pub mod metrics;
pub mod ratelimit;
pub mod telemetry;
pub mod validate;

pub use config::{AppConfig, DEFAULT_AI_API_URL};
pub use error::{ApiError, ErrorEnvelope};

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::rejection::{BytesRejection, FailedToBufferBody, JsonRejection};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Extension, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use uuid::Uuid;

use crate::email::{EmailSender, RelayEmailSender};
use crate::generate::{GeminiGenerator, ResilientCaller, RetryPolicy};
use crate::metrics::MetricsCollector;
use crate::ratelimit::{RateLimiter, RouteBucket};
use crate::telemetry::{AccessLogSink, AccessRecord, RotatingWriter};
use crate::validate::{
    compose_prompt, validate_send_email, validate_summarize, SendEmailBody, SummarizeBody,
};

/// Per-request identity and timing, created before anything else runs and
/// carried through the pipeline as a request extension.  Never mutated.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub id: String,
    pub client_ip: IpAddr,
    pub method: String,
    pub path: String,
    pub start: Instant,
}

/// Shared application state. All stateful collaborators are constructed in
/// `build_state` and injected; nothing lives in process globals.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<MetricsCollector>,
    pub limits: Arc<RateLimiter>,
    pub caller: Arc<ResilientCaller>,
    pub email: Option<Arc<dyn EmailSender>>,
    pub email_configured: bool,
    pub access_log: AccessLogSink,
    pub max_request_bytes: usize,
    pub allowed_origins: Arc<Vec<String>>,
}

/// Build state from environment variables. See `AppConfig::from_env` for the
/// full list of recognized variables.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    Ok(build_state(config))
}

pub fn build_state(config: AppConfig) -> AppState {
    let generator = Arc::new(GeminiGenerator::new(
        config.ai_api_url.clone(),
        config.ai_api_key.clone(),
    ));
    let caller = Arc::new(ResilientCaller::new(
        generator,
        RetryPolicy {
            base_delay: config.retry_base_delay,
            ..RetryPolicy::default()
        },
        config.ai_timeout,
        config.probe_timeout,
    ));

    let email_configured = config.email_configured();
    let email: Option<Arc<dyn EmailSender>> = match (
        &config.email_relay_url,
        &config.email_user,
        &config.email_pass,
    ) {
        (Some(url), Some(user), Some(pass)) => Some(Arc::new(RelayEmailSender::new(
            url.clone(),
            user.clone(),
            pass.clone(),
        ))),
        _ => None,
    };

    let writer = match config.log_file.as_deref() {
        Some(path) => match RotatingWriter::open(path, &config.rotation) {
            Ok(w) => Some(Arc::new(Mutex::new(w))),
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "failed to open LOG_FILE; access log disabled");
                None
            }
        },
        None => None,
    };

    AppState {
        metrics: Arc::new(MetricsCollector::new()),
        limits: Arc::new(RateLimiter::new(
            config.rate_window,
            config.summarize_rpm,
            config.email_rpm,
        )),
        caller,
        email,
        email_configured,
        access_log: AccessLogSink::new(writer, config.log_stdout),
        max_request_bytes: config.max_request_bytes,
        allowed_origins: Arc::new(config.allowed_origins()),
    }
}

/// Build the Axum router. Middleware runs top-down in the order: request
/// identity, metrics/log wrap, compression, security headers, CORS origin
/// check, body size ceiling, route dispatch.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/summarize", post(summarize_handler))
        .route("/v1/send-email", post(send_email_handler))
        .layer(DefaultBodyLimit::max(state.max_request_bytes))
        .layer(cors_layer(&state.allowed_origins))
        .layer(middleware::from_fn_with_state(state.clone(), origin_guard))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn_with_state(state.clone(), track_request))
        .layer(middleware::from_fn(assign_request_identity))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE])
}

/// Outermost middleware: mint the request identity and stamp it on the
/// response, whatever the outcome below was.
async fn assign_request_identity(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext {
        id: Uuid::new_v4().to_string(),
        client_ip: addr.ip(),
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
        start: Instant::now(),
    };
    let id = ctx.id.clone();
    req.extensions_mut().insert(ctx);
    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

/// Metrics/log wrap. `next.run` always yields a response (handler errors are
/// converted by the boundary translator first), so the end hook fires exactly
/// once per request on every exit path.
async fn track_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    req: Request,
    next: Next,
) -> Response {
    state.metrics.on_request_start(&ctx);
    let resp = next.run(req).await;
    let payload_bytes = resp
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let status = resp.status().as_u16();
    let duration_ms = state.metrics.on_request_end(&ctx, status, payload_bytes);
    state.access_log.emit(&AccessRecord {
        request_id: &ctx.id,
        method: &ctx.method,
        path: &ctx.path,
        client_ip: ctx.client_ip.to_string(),
        status,
        duration_ms,
        payload_bytes,
    });
    resp
}

/// Reject cross-origin requests whose Origin is not allow-listed. Requests
/// without an Origin header (same-origin, curl, server-to-server) pass.
async fn origin_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(origin) = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
    {
        if !state.allowed_origins.iter().any(|o| o == origin) {
            return ApiError::internal("Not allowed by CORS").into_response();
        }
    }
    next.run(req).await
}

#[derive(Debug, Serialize)]
pub struct SummarizeResponse {
    pub success: bool,
    pub summary: String,
}

#[derive(Debug, Serialize)]
pub struct SendEmailResponse {
    pub success: bool,
}

/// Map body-extraction failures into the validation kind, so clients always
/// get the JSON envelope rather than a transport error page.
fn decode_body<T>(payload: Result<Json<T>, JsonRejection>, limit: usize) -> Result<T, ApiError> {
    match payload {
        Ok(Json(inner)) => Ok(inner),
        Err(JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        ))) => {
            tracing::warn!(limit, "request body exceeded configured limit");
            Err(ApiError::validation_with(
                "Request body too large",
                format!("body exceeded limit of {} bytes", limit),
            ))
        }
        Err(rejection) => Err(ApiError::validation_with(
            "Invalid JSON body",
            rejection.body_text(),
        )),
    }
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Recapd gateway is running",
        "status": "healthy",
    }))
}

/// Rate-limit admission runs first so an exhausted window rejects before any
/// validation work, then validation/sanitization, then the resilient call.
async fn summarize_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<SummarizeBody>, JsonRejection>,
) -> Result<Json<SummarizeResponse>, ApiError> {
    state.limits.admit(RouteBucket::Summarize, ctx.client_ip)?;
    let body = decode_body(payload, state.max_request_bytes)?;
    let request = validate_summarize(body)?;
    let prompt = compose_prompt(&request);
    let summary = state.caller.invoke(&prompt).await?;
    Ok(Json(SummarizeResponse {
        success: true,
        summary,
    }))
}

async fn send_email_handler(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<SendEmailBody>, JsonRejection>,
) -> Result<Json<SendEmailResponse>, ApiError> {
    state.limits.admit(RouteBucket::Email, ctx.client_ip)?;
    let body = decode_body(payload, state.max_request_bytes)?;
    let request = validate_send_email(body)?;
    let sender = state
        .email
        .as_ref()
        .ok_or_else(|| ApiError::internal("Email service not configured"))?;
    sender
        .send(&request.summary, &request.recipients)
        .await
        .map_err(|err| ApiError::Internal {
            message: "Failed to send email".into(),
            details: Some(err.to_string()),
        })?;
    Ok(Json(SendEmailResponse { success: true }))
}

/// Probe the generator with a short deadline and report the email
/// configuration state. Probe failure degrades status, it never fails the
/// endpoint itself.
async fn health_handler(State(state): State<AppState>) -> Response {
    let generator_healthy = match state.caller.probe().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "generator health probe failed");
            false
        }
    };
    let status = if generator_healthy {
        "healthy"
    } else {
        "degraded"
    };
    let generator = if generator_healthy {
        "healthy"
    } else {
        "unhealthy"
    };
    let email = if state.email_configured {
        "configured"
    } else {
        "not configured"
    };
    let body = serde_json::json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "services": {
            "generator": generator,
            "email": email,
        }
    });
    let code = if generator_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Json<metrics::MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
