//! Upload lifecycle: initiate, fan out part uploads, collect receipts, complete or abort
//!
//! One coordinator task owns each session. Part tasks never touch the session: they send
//! progress ticks over a channel and return their receipt (or error) through the join set, and
//! the coordinator applies both on a single update path before publishing a fresh snapshot.

use futures_util::FutureExt;
use log::{debug, error, info, warn};
use reqwest::Client;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{MultipartUpload, StorageBackend};
use crate::config::{SiblingFailurePolicy, UploadConfig};
use crate::error::{PartFailure, PartUploadError, UploadError};
use crate::part::PartUploader;
use crate::planner::{plan_chunks, UploadRoute};
use crate::progress::ProgressAggregator;
use crate::session::{PartStatus, UploadSession, UploadSource, UploadStatus};
use crate::types::{ChunkDescriptor, PartProgress, PartReceipt};

/// Starts multipart uploads against one storage backend.
pub struct Uploader {
    backend: Arc<dyn StorageBackend>,
    parts: Arc<PartUploader>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(backend: Arc<dyn StorageBackend>, config: UploadConfig) -> Result<Self, UploadError> {
        let client = Client::builder().build().map_err(|e| {
            UploadError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;
        Self::with_client(backend, client, config)
    }

    pub fn with_client(
        backend: Arc<dyn StorageBackend>,
        client: Client,
        config: UploadConfig,
    ) -> Result<Self, UploadError> {
        config.validate()?;
        let parts = Arc::new(PartUploader::new(
            client,
            backend.clone(),
            config.progress_interval,
        ));
        Ok(Self {
            backend,
            parts,
            config,
        })
    }

    /// Plan the file and spawn its coordinator. Returns as soon as the session is observable.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, source: UploadSource) -> Result<UploadHandle, UploadError> {
        let threshold = self.config.multipart_threshold;
        if UploadRoute::for_size(source.size, threshold) == UploadRoute::SinglePut {
            return Err(UploadError::BelowMultipartThreshold {
                size: source.size,
                threshold,
            });
        }

        let chunks = plan_chunks(source.size, self.config.chunk_size)?;
        let id = Uuid::new_v4().to_string();
        let session = UploadSession::new(id.clone(), &source, &chunks);
        let (state, receiver) = watch::channel(session.clone());
        let cancel = CancellationToken::new();
        let transports = cancel.child_token();

        let coordinator = Coordinator {
            backend: self.backend.clone(),
            parts: self.parts.clone(),
            config: self.config.clone(),
            progress: ProgressAggregator::new(source.size, Instant::now()),
            source,
            chunks,
            session,
            state,
            queued: transports.child_token(),
            transports,
            cancel: cancel.clone(),
        };
        tokio::spawn(coordinator.run());

        Ok(UploadHandle {
            id,
            state: receiver,
            cancel,
        })
    }
}

/// Caller-side view of one running session.
#[derive(Clone)]
pub struct UploadHandle {
    id: String,
    state: watch::Receiver<UploadSession>,
    cancel: CancellationToken,
}

impl UploadHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> UploadSession {
        self.state.borrow().clone()
    }

    /// Receiver that is notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<UploadSession> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Request cancellation. No-op once the session is terminal; repeated calls are harmless.
    pub fn cancel(&self) {
        if self.is_finished() {
            return;
        }
        self.cancel.cancel();
    }

    /// Wait for the first terminal snapshot.
    pub async fn wait(&self) -> UploadSession {
        let mut state = self.state.clone();
        let result = state
            .wait_for(|session| session.is_terminal())
            .await
            .map(|session| UploadSession::clone(&session));
        match result {
            Ok(session) => session,
            Err(_) => state.borrow().clone(),
        }
    }
}

struct Coordinator {
    backend: Arc<dyn StorageBackend>,
    parts: Arc<PartUploader>,
    config: UploadConfig,
    source: UploadSource,
    chunks: Vec<ChunkDescriptor>,
    session: UploadSession,
    progress: ProgressAggregator,
    state: watch::Sender<UploadSession>,
    /// Set by the caller
    cancel: CancellationToken,
    /// Child of `cancel`; also fired on its own for sibling cancellation
    transports: CancellationToken,
    /// Child of `transports`; fired on the first part failure so parts still waiting for a slot
    /// never start
    queued: CancellationToken,
}

impl Coordinator {
    async fn run(mut self) {
        info!(
            "upload_start: {} file={} total_bytes={} parts={}",
            self.session.id,
            self.source.file.name,
            self.source.size,
            self.chunks.len()
        );
        self.publish();

        let Some(upload) = self.initiate().await else {
            return;
        };

        let receipts = self.upload_parts(&upload).await;

        if self.session.status == UploadStatus::Errored {
            self.abort_remote(&upload).await;
            return;
        }
        if self.cancel.is_cancelled() {
            self.abort_remote(&upload).await;
            self.finish_aborted();
            return;
        }

        self.complete(&upload, receipts).await;
    }

    fn publish(&self) {
        self.state.send_replace(self.session.clone());
    }

    /// Terminal states are sticky: once reached, part events no longer change the session.
    fn accepting(&self) -> bool {
        !self.session.is_terminal()
    }

    fn refresh(&mut self) {
        let snapshot = self.progress.snapshot(Instant::now());
        self.session.apply_progress(&snapshot);
    }

    fn fail(&mut self, error: UploadError) {
        error!("upload_failed: {} error={}", self.session.id, error);
        self.refresh();
        self.session.status = UploadStatus::Errored;
        self.session.error = Some(error);
        self.publish();
    }

    fn finish_aborted(&mut self) {
        for part in &mut self.session.parts {
            if !part.status.is_settled() {
                part.status = PartStatus::Aborted;
            }
        }
        self.refresh();
        self.session.cancellation_requested = true;
        self.session.status = UploadStatus::Aborted;
        info!(
            "upload_aborted: {} bytes_sent={}",
            self.session.id, self.session.bytes_sent
        );
        self.publish();
    }

    async fn initiate(&mut self) -> Option<MultipartUpload> {
        let cancel = self.cancel.clone();
        let backend = self.backend.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = backend.initiate_multipart_upload(
                &self.source.file.name,
                &self.source.file.content_type,
            ) => Some(res),
        };

        match result {
            None => {
                info!("upload_cancelled_before_initiate: {}", self.session.id);
                self.finish_aborted();
                None
            }
            Some(Err(e)) => {
                self.fail(UploadError::Initiation(e.to_string()));
                None
            }
            Some(Ok(upload)) => {
                info!(
                    "upload_initiated: {} upload_id={} key={}",
                    self.session.id, upload.upload_id, upload.storage_key
                );
                self.session.upload_id = Some(upload.upload_id.clone());
                self.session.storage_key = Some(upload.storage_key.clone());
                self.session.status = UploadStatus::Uploading;
                self.publish();
                Some(upload)
            }
        }
    }

    async fn upload_parts(&mut self, upload: &MultipartUpload) -> Vec<PartReceipt> {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let limiter = self.config.part_limit().map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();

        for chunk in self.chunks.iter().copied() {
            let parts = self.parts.clone();
            let upload = upload.clone();
            let path = self.source.file.path.clone();
            let progress_tx = progress_tx.clone();
            let transports = self.transports.clone();
            let queued = self.queued.clone();
            let limiter = limiter.clone();

            tasks.spawn(async move {
                let part_number = chunk.part_number;
                let _permit = match limiter {
                    Some(limiter) => tokio::select! {
                        biased;
                        _ = queued.cancelled() => None,
                        permit = limiter.acquire_owned() => permit.ok(),
                    },
                    None => None,
                };
                if queued.is_cancelled() {
                    return (part_number, Err(PartUploadError::cancelled(part_number)));
                }

                let result = AssertUnwindSafe(parts.upload(
                    &upload,
                    &chunk,
                    &path,
                    &progress_tx,
                    &transports,
                ))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(PartUploadError::new(part_number, PartFailure::Panicked))
                });

                // Stop queued parts before this slot is released.
                if matches!(&result, Err(err) if !err.is_cancelled()) {
                    queued.cancel();
                }
                (part_number, result)
            });
        }
        drop(progress_tx);

        let mut receipts = Vec::with_capacity(self.chunks.len());
        let cancel = self.cancel.clone();
        let mut deadline: Option<Instant> = None;
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !tasks.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if deadline.is_none() => {
                    deadline = Some(Instant::now() + self.config.cancel_grace);
                    self.begin_cancelling();
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((part_number, result))) => {
                        self.settle_part(part_number, result, &mut receipts);
                    }
                    Some(Err(e)) => {
                        warn!("part_task_join_failed: {} error={}", self.session.id, e);
                    }
                    None => break,
                },
                Some(event) = progress_rx.recv() => self.on_progress(event),
                _ = ticker.tick() => {
                    if self.accepting() {
                        self.refresh();
                        self.publish();
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!(
                        "cancel_grace_expired: {} unsettled_parts={}",
                        self.session.id,
                        tasks.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        receipts
    }

    fn begin_cancelling(&mut self) {
        self.transports.cancel();
        if !self.accepting() {
            return;
        }
        info!("upload_cancelling: {}", self.session.id);
        self.session.cancellation_requested = true;
        self.session.status = UploadStatus::Cancelling;
        self.publish();
    }

    fn on_progress(&mut self, event: PartProgress) {
        if !self.accepting() {
            return;
        }
        let settled = self
            .session
            .part(event.part_number)
            .map(|part| part.status.is_settled())
            .unwrap_or(true);
        if settled {
            return;
        }
        let Some(speed) = self.progress.record(&event) else {
            return;
        };

        let bytes_sent = self.progress.part_bytes(event.part_number);
        if let Some(part) = self.session.part_mut(event.part_number) {
            part.status = PartStatus::Uploading;
            part.bytes_sent = bytes_sent;
            part.progress = if part.byte_length > 0 {
                (bytes_sent as f64 / part.byte_length as f64).clamp(0.0, 1.0)
            } else {
                1.0
            };
            part.speed = speed;
        }
        self.refresh();
        self.publish();
    }

    fn settle_part(
        &mut self,
        part_number: u32,
        result: Result<PartReceipt, PartUploadError>,
        receipts: &mut Vec<PartReceipt>,
    ) {
        if !self.accepting() {
            debug!(
                "part_settled_after_terminal: {} part={} ok={}",
                self.session.id,
                part_number,
                result.is_ok()
            );
            return;
        }

        match result {
            Ok(receipt) => {
                let byte_length = self
                    .session
                    .part(part_number)
                    .map(|part| part.byte_length)
                    .unwrap_or(0);
                self.progress.record(&PartProgress {
                    part_number,
                    bytes_sent: byte_length,
                    bytes_total: byte_length,
                    at: Instant::now(),
                });
                if let Some(part) = self.session.part_mut(part_number) {
                    part.status = PartStatus::Completed;
                    part.bytes_sent = byte_length;
                    part.progress = 1.0;
                }
                debug!(
                    "part_completed: {} part={} etag={}",
                    self.session.id, part_number, receipt.integrity_tag
                );
                receipts.push(receipt);
                self.refresh();
                self.publish();
            }
            Err(err) if err.is_cancelled() || self.cancel.is_cancelled() => {
                debug!("part_aborted: {} part={}", self.session.id, part_number);
                if let Some(part) = self.session.part_mut(part_number) {
                    part.status = PartStatus::Aborted;
                }
                self.publish();
            }
            Err(err) => {
                warn!(
                    "part_failed: {} part={} error={}",
                    self.session.id, part_number, err.cause
                );
                if let Some(part) = self.session.part_mut(part_number) {
                    part.status = PartStatus::Errored;
                    part.error = Some(err.cause.clone());
                }
                self.queued.cancel();
                self.fail(UploadError::Part(err));
                if self.config.sibling_failure == SiblingFailurePolicy::Cancel {
                    self.transports.cancel();
                }
            }
        }
    }

    async fn complete(&mut self, upload: &MultipartUpload, mut receipts: Vec<PartReceipt>) {
        if receipts.len() != self.chunks.len() {
            let message = format!(
                "Missing upload parts: {} of {} receipts",
                receipts.len(),
                self.chunks.len()
            );
            self.fail(UploadError::Completion(message));
            self.abort_remote(upload).await;
            return;
        }

        // Receipts arrive in completion order; the store requires part order.
        receipts.sort_by_key(|receipt| receipt.part_number);

        self.session.status = UploadStatus::Completing;
        self.publish();
        info!(
            "upload_completing: {} parts={}",
            self.session.id,
            receipts.len()
        );

        match self
            .backend
            .complete_multipart_upload(upload, &receipts)
            .await
        {
            Ok(reference) => {
                self.refresh();
                self.session.status = UploadStatus::Succeeded;
                info!(
                    "upload_succeeded: {} reference={} elapsed_ms={}",
                    self.session.id,
                    reference,
                    self.session.elapsed.as_millis()
                );
                self.session.public_reference = Some(reference);
                self.publish();
            }
            // Parts stay on the store; the caller may retry the whole upload.
            Err(e) => self.fail(UploadError::Completion(e.to_string())),
        }
    }

    /// Best-effort; failures are logged, never surfaced as upload errors.
    async fn abort_remote(&self, upload: &MultipartUpload) {
        let abort = self.backend.abort_multipart_upload(upload);
        match tokio::time::timeout(self.config.cancel_grace, abort).await {
            Ok(Ok(())) => info!(
                "upload_abort_remote: {} upload_id={}",
                self.session.id, upload.upload_id
            ),
            Ok(Err(e)) => warn!(
                "upload_abort_remote_failed: {} upload_id={} error={}",
                self.session.id, upload.upload_id, e
            ),
            Err(_) => warn!(
                "upload_abort_remote_timeout: {} upload_id={}",
                self.session.id, upload.upload_id
            ),
        }
    }
}
