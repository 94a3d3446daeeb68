//! Single part transport: authorize, stream the byte range, collect the integrity tag

use chrono::Utc;
use futures_util::StreamExt;
use log::debug;
use reqwest::header::{CONTENT_LENGTH, ETAG};
use reqwest::{Body, Client};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::backend::{MultipartUpload, StorageBackend};
use crate::error::{PartFailure, PartUploadError};
use crate::types::{ChunkDescriptor, PartProgress, PartReceipt};

/// Read buffer for streaming a part body (64 KB)
const READ_BUFFER_SIZE: usize = 64 * 1024;

pub type ProgressSender = UnboundedSender<PartProgress>;

/// Strip the quoting S3-compatible stores put around entity tags.
pub fn strip_etag_quotes(raw: &str) -> &str {
    raw.trim().trim_matches('"')
}

/// Uploads one part at a time. Holds no per-part state; every call is independent and does
/// not retry.
pub struct PartUploader {
    client: Client,
    backend: Arc<dyn StorageBackend>,
    progress_interval: Duration,
}

impl PartUploader {
    pub fn new(client: Client, backend: Arc<dyn StorageBackend>, progress_interval: Duration) -> Self {
        Self {
            client,
            backend,
            progress_interval,
        }
    }

    /// Upload `chunk` of the file at `source`.
    ///
    /// Progress ticks go to `progress`, spaced at least `progress_interval` apart except for the
    /// first and final tick. Cancelling `cancel` drops the in-flight request.
    pub async fn upload(
        &self,
        upload: &MultipartUpload,
        chunk: &ChunkDescriptor,
        source: &Path,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<PartReceipt, PartUploadError> {
        let part_number = chunk.part_number;
        let fail = |cause: PartFailure| PartUploadError::new(part_number, cause);

        if cancel.is_cancelled() {
            return Err(PartUploadError::cancelled(part_number));
        }

        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PartUploadError::cancelled(part_number)),
            res = self.backend.authorize_part_upload(upload, part_number) => {
                res.map_err(|e| fail(PartFailure::Authorization(e.to_string())))?
            }
        };
        if handle.is_expired(Utc::now()) {
            return Err(fail(PartFailure::Authorization(format!(
                "transport handle expired at {}",
                handle.expires_at
            ))));
        }

        let mut file = File::open(source)
            .await
            .map_err(|e| fail(PartFailure::Source(format!("Failed to open file: {}", e))))?;
        file.seek(SeekFrom::Start(chunk.byte_offset))
            .await
            .map_err(|e| fail(PartFailure::Source(format!("Failed to seek: {}", e))))?;

        let body = self.progress_body(file.take(chunk.byte_length), chunk, progress.clone());

        debug!(
            "part_upload_start: part={} offset={} length={}",
            part_number, chunk.byte_offset, chunk.byte_length
        );
        let _ = progress.send(PartProgress {
            part_number,
            bytes_sent: 0,
            bytes_total: chunk.byte_length,
            at: Instant::now(),
        });

        let request = self
            .client
            .put(&handle.url)
            .header(CONTENT_LENGTH, chunk.byte_length)
            .body(body);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PartUploadError::cancelled(part_number)),
            res = request.send() => res.map_err(|e| fail(PartFailure::Transport(e.to_string())))?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(fail(PartFailure::Status { status, body }));
        }

        let integrity_tag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(strip_etag_quotes)
            .filter(|tag| !tag.is_empty())
            .ok_or_else(|| fail(PartFailure::MissingIntegrityTag))?
            .to_string();

        debug!(
            "part_upload_done: part={} etag={}",
            part_number, integrity_tag
        );

        Ok(PartReceipt {
            part_number,
            integrity_tag,
        })
    }

    /// Wrap the part reader in a body stream that reports bytes handed to the transport.
    fn progress_body<R>(&self, reader: R, chunk: &ChunkDescriptor, progress: ProgressSender) -> Body
    where
        R: tokio::io::AsyncRead + Send + Sync + 'static,
    {
        let part_number = chunk.part_number;
        let bytes_total = chunk.byte_length;
        let interval = self.progress_interval;
        let mut sent: u64 = 0;
        let mut last_emit: Option<Instant> = None;

        let stream = ReaderStream::with_capacity(reader, READ_BUFFER_SIZE).map(move |chunk_result| {
            let chunk = chunk_result?;
            sent += chunk.len() as u64;

            let now = Instant::now();
            let due = match last_emit {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= interval,
            };
            if due || sent >= bytes_total {
                last_emit = Some(now);
                let _ = progress.send(PartProgress {
                    part_number,
                    bytes_sent: sent,
                    bytes_total,
                    at: now,
                });
            }

            Ok::<_, std::io::Error>(chunk)
        });

        Body::wrap_stream(stream)
    }
}
