//! Observable upload session state

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PartFailure, UploadError};
use crate::progress::ProgressSnapshot;
use crate::types::ChunkDescriptor;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Initiating,
    Uploading,
    Cancelling,
    Completing,
    Succeeded,
    Errored,
    Aborted,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Succeeded | UploadStatus::Errored | UploadStatus::Aborted
        )
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Initiating => write!(f, "initiating"),
            UploadStatus::Uploading => write!(f, "uploading"),
            UploadStatus::Cancelling => write!(f, "cancelling"),
            UploadStatus::Completing => write!(f, "completing"),
            UploadStatus::Succeeded => write!(f, "succeeded"),
            UploadStatus::Errored => write!(f, "errored"),
            UploadStatus::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    Pending,
    Uploading,
    Completed,
    Errored,
    Aborted,
}

impl PartStatus {
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PartStatus::Completed | PartStatus::Errored | PartStatus::Aborted
        )
    }
}

impl std::fmt::Display for PartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartStatus::Pending => write!(f, "pending"),
            PartStatus::Uploading => write!(f, "uploading"),
            PartStatus::Completed => write!(f, "completed"),
            PartStatus::Errored => write!(f, "errored"),
            PartStatus::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PartState {
    pub part_number: u32,
    pub byte_length: u64,
    pub bytes_sent: u64,
    pub status: PartStatus,
    /// In `[0, 1]`
    pub progress: f64,
    /// Bytes per second between the last two progress ticks
    pub speed: f64,
    pub error: Option<PartFailure>,
}

impl PartState {
    fn pending(chunk: &ChunkDescriptor) -> Self {
        Self {
            part_number: chunk.part_number,
            byte_length: chunk.byte_length,
            bytes_sent: 0,
            status: PartStatus::Pending,
            progress: 0.0,
            speed: 0.0,
            error: None,
        }
    }
}

/// The file being uploaded.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileIdentity {
    pub name: String,
    pub path: PathBuf,
    pub content_type: String,
}

/// A file ready to be uploaded: identity plus its size at start time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    pub file: FileIdentity,
    pub size: u64,
}

impl UploadSource {
    pub const DEFAULT_CONTENT_TYPE: &'static str = "application/octet-stream";

    /// Stat `path` and build a source named after its file name.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Not a file: {}", path.display()),
            ));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            file: FileIdentity {
                name,
                path: path.to_path_buf(),
                content_type: Self::DEFAULT_CONTENT_TYPE.to_string(),
            },
            size: metadata.len(),
        })
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.file.content_type = content_type.into();
        self
    }
}

/// Snapshot of one file's multipart upload, as published to observers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UploadSession {
    pub id: String,
    pub file: FileIdentity,
    pub total_bytes: u64,
    pub started_at: DateTime<Utc>,
    pub upload_id: Option<String>,
    pub storage_key: Option<String>,
    pub bytes_sent: u64,
    pub progress: f64,
    /// Bytes per second
    pub speed: f64,
    #[serde(serialize_with = "as_secs")]
    pub elapsed: Duration,
    #[serde(serialize_with = "as_secs")]
    pub remaining: Duration,
    pub status: UploadStatus,
    pub parts: Vec<PartState>,
    pub cancellation_requested: bool,
    pub public_reference: Option<String>,
    pub error: Option<UploadError>,
}

impl UploadSession {
    pub(crate) fn new(id: String, source: &UploadSource, chunks: &[ChunkDescriptor]) -> Self {
        Self {
            id,
            file: source.file.clone(),
            total_bytes: source.size,
            started_at: Utc::now(),
            upload_id: None,
            storage_key: None,
            bytes_sent: 0,
            progress: 0.0,
            speed: 0.0,
            elapsed: Duration::ZERO,
            remaining: Duration::ZERO,
            status: UploadStatus::Initiating,
            parts: chunks.iter().map(PartState::pending).collect(),
            cancellation_requested: false,
            public_reference: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Part number of the part whose failure ended the session.
    pub fn failed_part(&self) -> Option<u32> {
        self.error.as_ref().and_then(UploadError::part_number)
    }

    pub fn part(&self, part_number: u32) -> Option<&PartState> {
        self.parts.iter().find(|p| p.part_number == part_number)
    }

    pub(crate) fn part_mut(&mut self, part_number: u32) -> Option<&mut PartState> {
        self.parts.iter_mut().find(|p| p.part_number == part_number)
    }

    pub(crate) fn apply_progress(&mut self, snapshot: &ProgressSnapshot) {
        self.bytes_sent = snapshot.bytes_sent;
        self.progress = snapshot.fraction;
        self.speed = snapshot.speed;
        self.elapsed = snapshot.elapsed;
        self.remaining = snapshot.remaining;
    }

    /// Whole-percent progress for display.
    pub fn percent(&self) -> u32 {
        std::cmp::min((self.progress * 100.0).floor() as u32, 100)
    }
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PartUploadError;
    use crate::planner::plan_chunks;

    fn source(size: u64) -> UploadSource {
        UploadSource {
            file: FileIdentity {
                name: "video.mp4".to_string(),
                path: PathBuf::from("/tmp/video.mp4"),
                content_type: "video/mp4".to_string(),
            },
            size,
        }
    }

    #[test]
    fn upload_status_display_matches_expected_strings() {
        assert_eq!(UploadStatus::Initiating.to_string(), "initiating");
        assert_eq!(UploadStatus::Uploading.to_string(), "uploading");
        assert_eq!(UploadStatus::Cancelling.to_string(), "cancelling");
        assert_eq!(UploadStatus::Completing.to_string(), "completing");
        assert_eq!(UploadStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(UploadStatus::Errored.to_string(), "errored");
        assert_eq!(UploadStatus::Aborted.to_string(), "aborted");
    }

    #[test]
    fn only_final_statuses_are_terminal() {
        assert!(!UploadStatus::Initiating.is_terminal());
        assert!(!UploadStatus::Uploading.is_terminal());
        assert!(!UploadStatus::Cancelling.is_terminal());
        assert!(!UploadStatus::Completing.is_terminal());
        assert!(UploadStatus::Succeeded.is_terminal());
        assert!(UploadStatus::Errored.is_terminal());
        assert!(UploadStatus::Aborted.is_terminal());
        assert!(!PartStatus::Uploading.is_settled());
        assert!(PartStatus::Aborted.is_settled());
    }

    #[test]
    fn new_session_has_one_pending_part_per_chunk() {
        let chunks = plan_chunks(12, 5).unwrap();
        let session = UploadSession::new("s1".to_string(), &source(12), &chunks);
        assert_eq!(session.status, UploadStatus::Initiating);
        assert_eq!(session.parts.len(), 3);
        assert!(session.parts.iter().all(|p| p.status == PartStatus::Pending));
        assert_eq!(session.part(3).map(|p| p.byte_length), Some(2));
        assert_eq!(session.failed_part(), None);
    }

    #[test]
    fn session_serializes_durations_as_seconds() {
        let chunks = plan_chunks(12, 5).unwrap();
        let mut session = UploadSession::new("s1".to_string(), &source(12), &chunks);
        session.elapsed = Duration::from_millis(1500);
        session.status = UploadStatus::Errored;
        session.error = Some(UploadError::from(PartUploadError::new(
            2,
            PartFailure::Transport("connection reset".into()),
        )));

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["elapsed"], 1.5);
        assert_eq!(json["status"], "errored");
        assert_eq!(json["parts"][0]["status"], "pending");
        assert_eq!(session.failed_part(), Some(2));
    }
}
