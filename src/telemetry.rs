use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::config::AppConfig;
use crate::errors::AppResult;

const BUFFER_FILE: &str = "telemetry-buffer.jsonl";

/// Local usage log. Events are queued in memory and appended to a JSONL
/// buffer in batches; the buffer rotates once it would exceed its size cap.
#[derive(Clone)]
pub struct TelemetryClient {
    enabled: Arc<AtomicBool>,
    salt: Arc<str>,
    pending: Arc<Mutex<Vec<TelemetryEvent>>>,
    buffer_path: PathBuf,
    batch_size: usize,
    rollover_bytes: u64,
    retained_files: usize,
}

#[derive(Debug, Serialize)]
pub struct TelemetryEvent {
    pub event: String,
    pub recorded_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl TelemetryClient {
    pub fn new<P: AsRef<Path>>(
        data_dir: P,
        config: &AppConfig,
        enabled: bool,
        salt: &str,
    ) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let buffer_path = data_dir.join(BUFFER_FILE);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&buffer_path)?;

        Ok(Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
            salt: Arc::from(salt),
            pending: Arc::new(Mutex::new(Vec::new())),
            buffer_path,
            batch_size: config.telemetry_batch_size.max(1),
            rollover_bytes: config.telemetry_buffer_max_bytes,
            retained_files: config.telemetry_buffer_max_files.max(1),
        })
    }

    pub fn record(&self, name: impl Into<String>, payload: serde_json::Value) -> AppResult<()> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mut pending = self.pending.lock();
        pending.push(TelemetryEvent {
            event: name.into(),
            recorded_at: Utc::now(),
            payload,
        });
        if pending.len() >= self.batch_size {
            self.write_batch(&mut pending)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        self.write_batch(&mut self.pending.lock())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.pending.lock().clear();
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    /// Salted digest of an address; raw address text never reaches the buffer.
    pub fn fingerprint(&self, address: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(address.as_bytes());
        STANDARD_NO_PAD.encode(hasher.finalize())
    }

    fn write_batch(&self, batch: &mut Vec<TelemetryEvent>) -> AppResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut lines = Vec::with_capacity(batch.len());
        let mut incoming = 0_u64;
        for event in batch.iter() {
            let mut line = serde_json::to_vec(event)?;
            line.push(b'\n');
            incoming += line.len() as u64;
            lines.push(line);
        }

        self.roll_over(incoming)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.buffer_path)?;
        for line in &lines {
            file.write_all(line)?;
        }
        file.flush()?;
        trace!(target: "telemetry", events = lines.len(), "telemetry batch written");
        batch.clear();
        Ok(())
    }

    fn roll_over(&self, incoming: u64) -> AppResult<()> {
        let current = fs::metadata(&self.buffer_path)
            .map(|m| m.len())
            .unwrap_or(0);
        if current == 0 || current + incoming <= self.rollover_bytes {
            return Ok(());
        }

        if self.retained_files > 1 {
            let rotated = self.parent_dir().join(format!(
                "{}-{}.jsonl",
                self.buffer_stem(),
                Utc::now().format("%Y%m%d%H%M%S%3f")
            ));
            fs::rename(&self.buffer_path, rotated)?;
            self.prune_rotated()?;
        }

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.buffer_path)?;
        Ok(())
    }

    fn prune_rotated(&self) -> AppResult<()> {
        let prefix = format!("{}-", self.buffer_stem());
        let mut rotations = fs::read_dir(self.parent_dir())?
            .filter_map(Result::ok)
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with(&prefix) && name.ends_with(".jsonl")
            })
            .map(|entry| entry.path())
            .collect::<Vec<_>>();

        // Timestamped names sort chronologically.
        rotations.sort();
        let allowed = self.retained_files.saturating_sub(1);
        let excess = rotations.len().saturating_sub(allowed);
        for path in rotations.into_iter().take(excess) {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }

    fn parent_dir(&self) -> &Path {
        self.buffer_path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn buffer_stem(&self) -> String {
        self.buffer_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "telemetry-buffer".into())
    }
}
