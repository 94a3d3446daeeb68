//! Concurrent multipart upload engine.
//!
//! A file is split into fixed-size parts ([`plan_chunks`]), every part is streamed to a
//! presigned destination by its own task ([`PartUploader`]), and a per-file coordinator folds
//! progress into an observable [`UploadSession`] before assembling the object from the ordered
//! part receipts. The object store itself is reached through the [`StorageBackend`] trait.
//!
//! Failure handling:
//! - the first failing part ends the session as `Errored` straight away (fail-fast)
//! - cancellation stops every transport and ends the session as `Aborted`
//! - in both cases the multipart upload is aborted on the store, best effort

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod part;
pub mod planner;
pub mod progress;
pub mod registry;
pub mod session;
pub mod types;

pub use backend::{MultipartUpload, StorageBackend, TransportHandle};
pub use config::{SiblingFailurePolicy, UploadConfig};
pub use coordinator::{UploadHandle, Uploader};
pub use error::{BackendError, BackendResult, PartFailure, PartUploadError, UploadError};
pub use part::{strip_etag_quotes, PartUploader};
pub use planner::{plan_chunks, UploadRoute};
pub use progress::{ProgressAggregator, ProgressSnapshot};
pub use registry::{RegistryOptions, UploadRegistry};
pub use session::{
    FileIdentity, PartState, PartStatus, UploadSession, UploadSource, UploadStatus,
};
pub use types::{ChunkDescriptor, PartProgress, PartReceipt, DEFAULT_CHUNK_SIZE, MULTIPART_THRESHOLD};
