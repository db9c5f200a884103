use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::telemetry::RotationConfig;

pub const DEFAULT_AI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash-latest:generateContent";

const DEV_ALLOWED_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://localhost:3000"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub production: bool,
    pub frontend_url: Option<String>,
    pub ai_api_url: String,
    pub ai_api_key: Option<String>,
    pub ai_timeout: Duration,
    pub probe_timeout: Duration,
    pub retry_base_delay: Duration,
    pub max_request_bytes: usize,
    pub summarize_rpm: u32,
    pub email_rpm: u32,
    pub rate_window: Duration,
    pub email_relay_url: Option<String>,
    pub email_user: Option<String>,
    pub email_pass: Option<String>,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let production = env::var("APP_ENV")
            .map(|v| v.trim().eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        Ok(Self {
            production,
            frontend_url: non_empty_var("FRONTEND_URL"),
            ai_api_url: non_empty_var("AI_API_URL")
                .unwrap_or_else(|| DEFAULT_AI_API_URL.to_string()),
            ai_api_key: non_empty_var("AI_API_KEY"),
            ai_timeout: Duration::from_millis(
                read_u64("RECAPD_AI_TIMEOUT_MS")?.unwrap_or(30_000),
            ),
            probe_timeout: Duration::from_millis(
                read_u64("RECAPD_PROBE_TIMEOUT_MS")?.unwrap_or(5_000),
            ),
            retry_base_delay: Duration::from_millis(
                read_u64("RECAPD_RETRY_BASE_MS")?.unwrap_or(100),
            ),
            max_request_bytes: read_u64("RECAPD_MAX_REQUEST_BYTES")?
                .unwrap_or(2 * 1024 * 1024) as usize,
            summarize_rpm: read_u64("RECAPD_SUMMARIZE_RPM")?.unwrap_or(10) as u32,
            email_rpm: read_u64("RECAPD_EMAIL_RPM")?.unwrap_or(5) as u32,
            rate_window: Duration::from_secs(
                read_u64("RECAPD_RATE_WINDOW_SECS")?.unwrap_or(60),
            ),
            email_relay_url: non_empty_var("EMAIL_RELAY_URL"),
            email_user: non_empty_var("EMAIL_USER"),
            email_pass: non_empty_var("EMAIL_PASS"),
            log_file: non_empty_var("LOG_FILE"),
            rotation: RotationConfig {
                max_bytes: read_u64("LOG_MAX_BYTES")?,
                keep: read_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
                compress: read_bool("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
            },
            log_stdout: read_bool("RECAPD_LOG_STDOUT")?.unwrap_or(false),
        })
    }

    /// Origins the gateway will answer for. Production serves exactly the
    /// configured front end; anything else gets the fixed development list.
    pub fn allowed_origins(&self) -> Vec<String> {
        if self.production {
            self.frontend_url.iter().cloned().collect()
        } else {
            DEV_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect()
        }
    }

    /// Email is considered configured when both credentials are present.
    pub fn email_configured(&self) -> bool {
        self.email_user.is_some() && self.email_pass.is_some()
    }
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn read_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn read_bool(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(anyhow!("{} must be a boolean (true/false/1/0)", var)),
            }
        }
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
