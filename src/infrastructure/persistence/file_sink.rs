//! JSON file persistence sink
//!
//! Layout under the configured directory:
//! - `<sessionId>.events.jsonl`: one [`RecordedEvent`] per line, appended live
//! - `<sessionId>.json`: the final [`CallRecord`], written once via a temp
//!   file and rename so readers never see a partial record

use crate::domain::persistence::{CallRecord, PersistenceSink};
use crate::domain::shared::error::RelayError;
use crate::domain::shared::events::RecordedEvent;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub struct FilePersistenceSink {
    directory: PathBuf,
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> RelayError {
    RelayError::Internal(format!("failed to {} {}: {}", action, path.display(), e))
}

impl FilePersistenceSink {
    /// Create the sink, making sure `directory` exists
    pub async fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .await
            .map_err(|e| io_error("create", &directory, e))?;
        info!(directory = %directory.display(), "File persistence ready");
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn events_path(&self, session_id: &SessionId) -> PathBuf {
        self.directory.join(format!("{}.events.jsonl", session_id))
    }

    pub fn record_path(&self, session_id: &SessionId) -> PathBuf {
        self.directory.join(format!("{}.json", session_id))
    }
}

#[async_trait]
impl PersistenceSink for FilePersistenceSink {
    async fn append(&self, session_id: &SessionId, event: &RecordedEvent) -> Result<()> {
        let path = self.events_path(session_id);
        let mut line = serde_json::to_vec(event)
            .map_err(|e| RelayError::Internal(format!("failed to serialize event: {}", e)))?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error("open", &path, e))?;
        file.write_all(&line)
            .await
            .map_err(|e| io_error("append to", &path, e))?;
        file.flush().await.map_err(|e| io_error("flush", &path, e))?;
        Ok(())
    }

    async fn finalize(&self, session_id: &SessionId, record: &CallRecord) -> Result<()> {
        let path = self.record_path(session_id);
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Err(RelayError::AlreadyExists(format!(
                "call record {}",
                path.display()
            )));
        }

        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| RelayError::Internal(format!("failed to serialize record: {}", e)))?;
        let tmp = self.directory.join(format!("{}.json.tmp", session_id));
        fs::write(&tmp, &body)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("rename", &tmp, e))?;

        debug!(session_id = %session_id, path = %path.display(), "Call record written");
        Ok(())
    }
}
