//! Upload error taxonomy

use serde::Serialize;
use thiserror::Error;

/// Failure type returned by storage backends.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;
pub type BackendResult<T> = Result<T, BackendError>;

/// Session-level failure. Stored on the session snapshot, so it is `Clone` and serializable.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UploadError {
    #[error("invalid upload configuration: {0}")]
    Configuration(String),
    #[error("file of {size} bytes is below the multipart threshold of {threshold} bytes")]
    BelowMultipartThreshold { size: u64, threshold: u64 },
    #[error("failed to initiate multipart upload: {0}")]
    Initiation(String),
    #[error(transparent)]
    Part(#[from] PartUploadError),
    #[error("failed to complete multipart upload: {0}")]
    Completion(String),
    #[error("upload cancelled")]
    Cancelled,
    #[error("too many concurrent uploads (limit {limit})")]
    TooManyUploads { limit: usize },
}

impl UploadError {
    /// Part number of the failing part, if the failure was part-local.
    pub fn part_number(&self) -> Option<u32> {
        match self {
            UploadError::Part(err) => Some(err.part_number),
            _ => None,
        }
    }
}

/// One part's transport failed.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("part {part_number} failed: {cause}")]
pub struct PartUploadError {
    pub part_number: u32,
    pub cause: PartFailure,
}

impl PartUploadError {
    pub fn new(part_number: u32, cause: PartFailure) -> Self {
        Self { part_number, cause }
    }

    pub fn cancelled(part_number: u32) -> Self {
        Self::new(part_number, PartFailure::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cause == PartFailure::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PartFailure {
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error("failed to read source: {0}")]
    Source(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("store responded {status}: {body}")]
    Status { status: u16, body: String },
    #[error("store did not return an integrity tag")]
    MissingIntegrityTag,
    #[error("part task panicked")]
    Panicked,
    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_error_message_names_part_and_cause() {
        let err = UploadError::from(PartUploadError::new(
            2,
            PartFailure::Status {
                status: 403,
                body: "SignatureDoesNotMatch".to_string(),
            },
        ));
        assert_eq!(
            err.to_string(),
            "part 2 failed: store responded 403: SignatureDoesNotMatch"
        );
        assert_eq!(err.part_number(), Some(2));
        assert_eq!(UploadError::Cancelled.part_number(), None);
    }

    #[test]
    fn errors_serialize_with_kind_tags() {
        let err = UploadError::from(PartUploadError::cancelled(4));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "part");
        assert_eq!(json["detail"]["part_number"], 4);
        assert_eq!(json["detail"]["cause"]["kind"], "cancelled");

        let json = serde_json::to_value(UploadError::Initiation("denied".into())).unwrap();
        assert_eq!(json["kind"], "initiation");
        assert_eq!(json["detail"], "denied");
    }
}
