//! History Store
//!
//! Append-only per-attempt artifacts, laid out as
//! `<root>/<YYYY-MM-DD>/<key>/` with `request.json`, `response.json`,
//! `frames.jsonl` and either `result.txt` or `error.json`.
//!
//! Keys are `<UTC timestamp ms>-<sequence>-<sha256 prefix>[-<label>]-a<attempt>`:
//! unique within the process and lexicographically time ordered.

use crate::error::{Error, Result};
use crate::normalize::NormalizedRequest;
use crate::transport::ResponseEnvelope;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Default history directory under the home directory
const DEFAULT_HISTORY_DIR: &str = ".runbit/history";

/// Hex characters of the content hash kept in a key
const HASH_PREFIX_LEN: usize = 12;

/// Longest label fragment kept in a key
const MAX_LABEL_LEN: usize = 40;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);
static LAST_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Identifier of one attempt's artifacts
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptKey {
    key: String,
    date: String,
}

impl AttemptKey {
    /// Build a key for an attempt of a request
    #[must_use]
    pub fn new(request: &NormalizedRequest, attempt: u32) -> Self {
        let now = Utc::now().timestamp_millis();
        let previous = LAST_MILLIS.fetch_max(now, Ordering::SeqCst);
        let millis = now.max(previous);
        let seq = SEQUENCE.fetch_add(1, Ordering::SeqCst);

        let stamp: DateTime<Utc> = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now);

        let mut key = format!(
            "{}-{seq:06}-{}",
            stamp.format("%Y%m%dT%H%M%S%3fZ"),
            content_hash(request)
        );
        if let Some(label) = request.label().map(sanitize_label).filter(|l| !l.is_empty()) {
            key.push('-');
            key.push_str(&label);
        }
        key.push_str(&format!("-a{attempt}"));

        Self {
            key,
            date: stamp.format("%Y-%m-%d").to_string(),
        }
    }

    /// Key string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn content_hash(request: &NormalizedRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.model().as_bytes());
    if let Ok(bytes) = serde_json::to_vec(request.messages()) {
        hasher.update(&bytes);
    }
    if let Ok(bytes) = serde_json::to_vec(request.params()) {
        hasher.update(&bytes);
    }
    let digest = hasher.finalize();
    digest
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()[..HASH_PREFIX_LEN]
        .to_string()
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
        .take(MAX_LABEL_LEN)
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

/// History Store
#[derive(Debug, Clone)]
pub struct HistoryStore {
    root: Option<PathBuf>,
}

impl HistoryStore {
    /// Create store with default path (`~/.runbit/history/`)
    #[must_use]
    pub fn new() -> Self {
        let root = dirs::home_dir()
            .map(|h| h.join(DEFAULT_HISTORY_DIR))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_DIR));
        Self { root: Some(root) }
    }

    /// Create store with custom path
    #[must_use]
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            root: Some(path.as_ref().to_path_buf()),
        }
    }

    /// A store that writes nothing
    #[must_use]
    pub fn disabled() -> Self {
        Self { root: None }
    }

    /// Root directory, if enabled
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Open the artifact directory for an attempt
    pub async fn begin(&self, key: &AttemptKey) -> Result<AttemptLog> {
        let Some(root) = &self.root else {
            return Ok(AttemptLog::disabled());
        };
        let dir = root.join(&key.date).join(&key.key);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| history_error("create", &dir, &e))?;
        debug!(key = %key, dir = ?dir, "History attempt opened");
        Ok(AttemptLog {
            dir: Some(dir),
            frames: None,
        })
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer for one attempt's artifacts
#[derive(Debug)]
pub struct AttemptLog {
    dir: Option<PathBuf>,
    frames: Option<File>,
}

impl AttemptLog {
    /// A log that writes nothing
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            dir: None,
            frames: None,
        }
    }

    /// Artifact directory, if enabled
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Write the outbound payload
    pub async fn write_request(&self, payload: &serde_json::Value) -> Result<()> {
        self.write_json("request.json", payload).await
    }

    /// Write the response status and headers
    pub async fn write_response(&self, envelope: &ResponseEnvelope) -> Result<()> {
        self.write_json("response.json", envelope).await
    }

    /// Append one raw transport frame
    pub async fn append_frame(&mut self, frame: &str) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        if self.frames.is_none() {
            let path = dir.join("frames.jsonl");
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| history_error("open", &path, &e))?;
            self.frames = Some(file);
        }
        let mut line = serde_json::to_string(frame)
            .map_err(|e| Error::History(format!("failed to encode frame: {e}")))?;
        line.push('\n');
        if let Some(file) = self.frames.as_mut() {
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| Error::History(format!("failed to append frame: {e}")))?;
        }
        Ok(())
    }

    /// Write the assembled text and close the frame log
    pub async fn write_result(&mut self, text: &str) -> Result<()> {
        self.close_frames().await?;
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join("result.txt");
        fs::write(&path, text)
            .await
            .map_err(|e| history_error("write", &path, &e))
    }

    /// Write the terminal error of the attempt and close the frame log
    pub async fn write_error(&mut self, error: &serde_json::Value) -> Result<()> {
        self.close_frames().await?;
        self.write_json("error.json", error).await
    }

    async fn close_frames(&mut self) -> Result<()> {
        if let Some(mut file) = self.frames.take() {
            file.flush()
                .await
                .map_err(|e| Error::History(format!("failed to flush frames: {e}")))?;
        }
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(name);
        let content = serde_json::to_vec_pretty(value)
            .map_err(|e| Error::History(format!("failed to serialize {name}: {e}")))?;
        fs::write(&path, content)
            .await
            .map_err(|e| history_error("write", &path, &e))
    }
}

fn history_error(action: &str, path: &Path, e: &std::io::Error) -> Error {
    Error::History(format!("failed to {action} {}: {e}", path.display()))
}
