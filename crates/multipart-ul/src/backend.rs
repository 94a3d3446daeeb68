//! Storage backend capability consumed by the engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::BackendResult;
use crate::types::PartReceipt;

/// Identity of an open multipart upload on the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub storage_key: String,
}

/// Time-boxed authorization to write exactly one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHandle {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl TransportHandle {
    pub fn new(url: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Operations the engine needs from an object store.
///
/// Part bytes are not sent through this trait: `authorize_part_upload` hands out a URL and the
/// engine PUTs the bytes itself so it can observe transfer progress.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn initiate_multipart_upload(
        &self,
        filename: &str,
        content_type: &str,
    ) -> BackendResult<MultipartUpload>;

    async fn authorize_part_upload(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
    ) -> BackendResult<TransportHandle>;

    /// `receipts` are sorted by part number. Returns the public reference of the object.
    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        receipts: &[PartReceipt],
    ) -> BackendResult<String>;

    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> BackendResult<()>;
}
