//! C3: Dump Sink.
//!
//! A scoped PCM file writer that starts under a random UUID name and is
//! renamed exactly once to `out_<log_id>.pcm` when the vendor hands back a
//! log id, for post-hoc correlation (`spec.md` §4.3, §6). Grounded on
//! `soniox_asr_python/dumper.py` (lock-guarded async file handle, rotate by
//! closing then reopening) and `bytedance_llm_based_asr/log_id_dumper_manager.py`
//! (the rename-on-first-log-id policy and idempotence rules).

use std::path::PathBuf;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// A PCM dump file bound to a session connection, renamed once a vendor
/// log id arrives.
pub struct DumpSink {
    dir: PathBuf,
    state: Mutex<DumpState>,
}

struct DumpState {
    current_path: PathBuf,
    log_id: Option<String>,
    handle: Option<File>,
}

impl DumpSink {
    /// Creates (but does not open) a dump sink rooted at `dir`, with an
    /// initial `out_<uuid>.pcm` filename.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let current_path = dir.join(format!("out_{}.pcm", uuid::Uuid::new_v4()));
        Self {
            dir,
            state: Mutex::new(DumpState {
                current_path,
                log_id: None,
                handle: None,
            }),
        }
    }

    /// Opens the initial UUID-named file, creating `dir` if needed.
    pub async fn open(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let mut state = self.state.lock().await;
        let file = File::create(&state.current_path).await?;
        state.handle = Some(file);
        Ok(())
    }

    /// Writes bytes to the current file. Writes that race an in-flight
    /// rename (handle briefly absent) are dropped with a warning rather
    /// than failing the session (`spec.md` §4.3, taxonomy kind 5 in §7).
    pub async fn write(&self, bytes: &[u8]) {
        let mut state = self.state.lock().await;
        match state.handle.as_mut() {
            Some(file) => {
                if let Err(err) = file.write_all(bytes).await {
                    tracing::warn!(error = %err, "dump write failed, continuing");
                } else if let Err(err) = file.flush().await {
                    tracing::warn!(error = %err, "dump flush failed, continuing");
                }
            }
            None => {
                tracing::warn!("dump write dropped: no open handle (rename in flight?)");
            }
        }
    }

    /// Binds a vendor log id. Idempotent when called again with the same
    /// id; a conflicting id is a no-op logged at warn level. On first bind,
    /// closes the handle, renames `out_<uuid>.pcm` to `out_<log_id>.pcm`,
    /// and reopens in append mode so no bytes are lost.
    pub async fn bind_log_id(&self, log_id: &str) {
        let mut state = self.state.lock().await;

        if let Some(existing) = &state.log_id {
            if existing == log_id {
                return; // idempotent on equal ids
            }
            tracing::warn!(
                existing = %existing,
                attempted = %log_id,
                "ignoring conflicting log_id bind"
            );
            return;
        }

        // Close the current handle before renaming, per the file-lifecycle
        // contract; writes arriving during this window are tolerated above.
        state.handle = None;

        let new_path = self.dir.join(format!("out_{log_id}.pcm"));
        if let Err(err) = fs::rename(&state.current_path, &new_path).await {
            tracing::error!(error = %err, "failed to rename dump file");
            return;
        }

        match OpenOptions::new().append(true).open(&new_path).await {
            Ok(file) => {
                state.handle = Some(file);
                state.current_path = new_path;
                state.log_id = Some(log_id.to_string());
            }
            Err(err) => tracing::error!(error = %err, "failed to reopen renamed dump file"),
        }
    }

    /// Closes the dump file. Subsequent writes are dropped with a warning.
    pub async fn close(&self) {
        self.state.lock().await.handle = None;
    }

    /// The current on-disk path (UUID-named until a log id is bound).
    pub async fn current_path(&self) -> PathBuf {
        self.state.lock().await.current_path.clone()
    }
}

/// Append-only `asr_vendor_result.jsonl` companion log. No rotation policy
/// is imposed here; `spec.md` §9 leaves rotation to the operator.
pub struct VendorResultLog {
    path: PathBuf,
    handle: Mutex<Option<File>>,
}

impl VendorResultLog {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("asr_vendor_result.jsonl"),
            handle: Mutex::new(None),
        }
    }

    /// Opens the log for appending, creating the parent directory if needed.
    pub async fn open(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        *self.handle.lock().await = Some(file);
        Ok(())
    }

    /// Appends one JSON object as a line. Failures are logged, never fatal.
    pub async fn append_line(&self, json: &str) {
        let mut guard = self.handle.lock().await;
        if let Some(file) = guard.as_mut() {
            if let Err(err) = file.write_all(json.as_bytes()).await {
                tracing::warn!(error = %err, "vendor result log write failed");
                return;
            }
            if let Err(err) = file.write_all(b"\n").await {
                tracing::warn!(error = %err, "vendor result log newline write failed");
                return;
            }
            if let Err(err) = file.flush().await {
                tracing::warn!(error = %err, "vendor result log flush failed");
            }
        } else {
            tracing::warn!("vendor result log write dropped: not opened");
        }
    }
}
