//! Set of observable upload sessions
//!
//! Sessions stay listed while they run and for a retention window after they finish, so a UI
//! polling the registry gets to see the terminal state. Cancelled sessions are dropped as soon as
//! the cancellation is acknowledged.

use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::coordinator::{UploadHandle, Uploader};
use crate::error::UploadError;
use crate::session::{UploadSession, UploadSource, UploadStatus};

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// How long a finished session stays visible
    pub retention: Duration,
    /// `None` admits any number of concurrent sessions
    pub max_active_sessions: Option<usize>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(5),
            max_active_sessions: None,
        }
    }
}

#[derive(Clone)]
pub struct UploadRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    uploader: Uploader,
    options: RegistryOptions,
    sessions: Mutex<HashMap<String, UploadHandle>>,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, UploadHandle>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl UploadRegistry {
    pub fn new(uploader: Uploader, options: RegistryOptions) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                uploader,
                options,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start an upload and track its session.
    pub fn start(&self, source: UploadSource) -> Result<UploadHandle, UploadError> {
        let handle = {
            let mut sessions = self.inner.lock();
            if let Some(limit) = self.inner.options.max_active_sessions {
                let active = sessions.values().filter(|h| !h.is_finished()).count();
                if active >= limit {
                    return Err(UploadError::TooManyUploads { limit });
                }
            }
            let handle = self.inner.uploader.start(source)?;
            sessions.insert(handle.id().to_string(), handle.clone());
            handle
        };

        info!("registry_insert: {}", handle.id());
        spawn_retention(
            Arc::downgrade(&self.inner),
            handle.clone(),
            self.inner.options.retention,
        );
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<UploadHandle> {
        self.inner.lock().get(id).cloned()
    }

    pub fn snapshot(&self, id: &str) -> Option<UploadSession> {
        self.get(id).map(|handle| handle.snapshot())
    }

    /// All tracked sessions, oldest first.
    pub fn snapshots(&self) -> Vec<UploadSession> {
        let mut snapshots: Vec<UploadSession> = self
            .inner
            .lock()
            .values()
            .map(UploadHandle::snapshot)
            .collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        snapshots
    }

    /// Request cancellation of one session. Returns false when the id is unknown.
    pub fn cancel(&self, id: &str) -> bool {
        match self.get(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let handles: Vec<UploadHandle> = self.inner.lock().values().cloned().collect();
        info!("registry_cancel_all: sessions={}", handles.len());
        for handle in handles {
            handle.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

fn spawn_retention(registry: Weak<RegistryInner>, handle: UploadHandle, retention: Duration) {
    tokio::spawn(async move {
        let session = handle.wait().await;
        if session.status != UploadStatus::Aborted {
            tokio::time::sleep(retention).await;
        }
        if let Some(registry) = registry.upgrade() {
            registry.lock().remove(&session.id);
            debug!("registry_remove: {} status={}", session.id, session.status);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MultipartUpload, StorageBackend, TransportHandle};
    use crate::config::UploadConfig;
    use crate::error::BackendResult;
    use crate::session::FileIdentity;
    use crate::types::PartReceipt;
    use async_trait::async_trait;
    use std::path::PathBuf;

    /// Initiation either hangs forever or fails straight away.
    struct StubBackend {
        hang: bool,
    }

    #[async_trait]
    impl StorageBackend for StubBackend {
        async fn initiate_multipart_upload(
            &self,
            _filename: &str,
            _content_type: &str,
        ) -> BackendResult<MultipartUpload> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err("store unavailable".into())
        }

        async fn authorize_part_upload(
            &self,
            _upload: &MultipartUpload,
            _part_number: u32,
        ) -> BackendResult<TransportHandle> {
            Err("unused".into())
        }

        async fn complete_multipart_upload(
            &self,
            _upload: &MultipartUpload,
            _receipts: &[PartReceipt],
        ) -> BackendResult<String> {
            Err("unused".into())
        }

        async fn abort_multipart_upload(&self, _upload: &MultipartUpload) -> BackendResult<()> {
            Ok(())
        }
    }

    fn registry(hang: bool, options: RegistryOptions) -> UploadRegistry {
        let uploader =
            Uploader::new(Arc::new(StubBackend { hang }), UploadConfig::default()).unwrap();
        UploadRegistry::new(uploader, options)
    }

    fn source() -> UploadSource {
        UploadSource {
            file: FileIdentity {
                name: "big.bin".to_string(),
                path: PathBuf::from("/nonexistent/big.bin"),
                content_type: UploadSource::DEFAULT_CONTENT_TYPE.to_string(),
            },
            size: 12 * 1024 * 1024,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn admission_limit_counts_only_active_sessions() {
        let registry = registry(
            true,
            RegistryOptions {
                max_active_sessions: Some(1),
                ..RegistryOptions::default()
            },
        );

        let first = registry.start(source()).unwrap();
        assert!(matches!(
            registry.start(source()),
            Err(UploadError::TooManyUploads { limit: 1 })
        ));

        first.cancel();
        assert_eq!(first.wait().await.status, UploadStatus::Aborted);
        assert!(registry.start(source()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_sessions_are_removed_without_retention() {
        let registry = registry(true, RegistryOptions::default());
        let handle = registry.start(source()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.snapshot(handle.id()).is_some());

        assert!(registry.cancel(handle.id()));
        assert!(registry.cancel(handle.id()));
        handle.wait().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(registry.get(handle.id()).is_none());
        assert!(!registry.cancel(handle.id()));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_sessions_stay_visible_for_retention() {
        let retention = Duration::from_secs(5);
        let registry = registry(
            false,
            RegistryOptions {
                retention,
                ..RegistryOptions::default()
            },
        );
        let handle = registry.start(source()).unwrap();
        let session = handle.wait().await;
        assert_eq!(session.status, UploadStatus::Errored);
        assert!(matches!(session.error, Some(UploadError::Initiation(_))));

        tokio::time::sleep(retention / 2).await;
        assert_eq!(
            registry.snapshot(handle.id()).map(|s| s.status),
            Some(UploadStatus::Errored)
        );

        tokio::time::sleep(retention).await;
        assert!(registry.get(handle.id()).is_none());
    }

    #[tokio::test]
    async fn snapshots_list_every_tracked_session() {
        let registry = registry(true, RegistryOptions::default());
        let a = registry.start(source()).unwrap();
        let b = registry.start(source()).unwrap();

        let ids: Vec<String> = registry.snapshots().into_iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a.id().to_string()));
        assert!(ids.contains(&b.id().to_string()));

        registry.cancel_all();
        assert_eq!(a.wait().await.status, UploadStatus::Aborted);
        assert_eq!(b.wait().await.status, UploadStatus::Aborted);
    }
}
