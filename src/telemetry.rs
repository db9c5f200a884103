//! Access-log sink with size-based rotation.
//!
//! When `LOG_FILE` is configured, every completed request is appended as one
//! newline-delimited JSON record.  On reaching the size limit the current
//! file is rotated to numbered backups (`<path>.1`, `<path>.2`, ...), the
//! freshest backup optionally gzip-compressed, and a new file started.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl RotatingWriter {
    pub fn open(path: &str, rotation: &RotationConfig) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            max_bytes: rotation.max_bytes,
            keep: rotation.keep,
            compress: rotation.compress,
        })
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.max_bytes {
            let at_limit = self
                .path
                .metadata()
                .map(|meta| meta.len() >= limit)
                .unwrap_or(false);
            if at_limit {
                self.rotate();
            }
        }
        writeln!(self.file, "{}", line)
    }

    fn rotate(&mut self) {
        if self.keep > 0 {
            for idx in (1..=self.keep).rev() {
                let src = if idx == 1 {
                    self.path.clone()
                } else {
                    self.path.with_extension(format!("{}", idx - 1))
                };
                if src.exists() {
                    let _ = fs::rename(&src, self.path.with_extension(format!("{}", idx)));
                }
            }
            if self.compress {
                self.compress_backup();
            }
        }
        if let Ok(fresh) = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
        {
            self.file = fresh;
        }
    }

    fn compress_backup(&self) {
        let rotated = self.path.with_extension("1");
        let Ok(data) = fs::read(&rotated) else {
            return;
        };
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        if gz.write_all(&data).is_ok() {
            if let Ok(buf) = gz.finish() {
                let _ = fs::write(rotated.with_extension("1.gz"), buf);
                let _ = fs::remove_file(&rotated);
            }
        }
    }
}

/// One record per completed request.
pub struct AccessRecord<'a> {
    pub request_id: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub client_ip: String,
    pub status: u16,
    pub duration_ms: u64,
    pub payload_bytes: u64,
}

#[derive(Clone)]
pub struct AccessLogSink {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
}

impl AccessLogSink {
    pub fn new(writer: Option<Arc<Mutex<RotatingWriter>>>, log_stdout: bool) -> Self {
        Self { writer, log_stdout }
    }

    pub fn disabled() -> Self {
        Self {
            writer: None,
            log_stdout: false,
        }
    }

    pub fn emit(&self, record: &AccessRecord<'_>) {
        let line = serde_json::json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "requestId": record.request_id,
            "method": record.method,
            "path": record.path,
            "clientIp": record.client_ip,
            "status": record.status,
            "durationMs": record.duration_ms,
            "payloadBytes": record.payload_bytes,
        })
        .to_string();

        if let Some(writer) = &self.writer {
            if let Ok(mut guard) = writer.lock() {
                if let Err(err) = guard.write_line(&line) {
                    tracing::warn!(error = %err, "failed to write access log line");
                }
            }
        }
        if self.log_stdout {
            tracing::info!(target: "access_log", "{}", line);
        }
    }
}
