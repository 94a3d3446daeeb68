//! Multipart uploads of large files to S3-compatible storage.
//!
//! The upload engine lives in the `multipart-ul` crate; this crate wires it to `aws-sdk-s3`,
//! reads store settings from the environment, and exposes the command-line front end and
//! (with the `desktop` feature) Tauri commands.

pub mod cli;
#[cfg(feature = "desktop")]
pub mod commands;
pub mod config;
pub mod s3;

use multipart_ul::{RegistryOptions, UploadConfig, UploadError, UploadRegistry, Uploader};
use std::sync::Arc;

use config::AwsConfig;
use s3::S3Backend;

/// Build an upload registry backed by the configured S3 bucket.
pub fn create_registry(
    aws: AwsConfig,
    upload: UploadConfig,
    options: RegistryOptions,
) -> Result<UploadRegistry, UploadError> {
    log::info!(
        "registry_create: bucket={} region={} endpoint={} chunk_size={}",
        aws.bucket,
        aws.region,
        aws.endpoint_url.as_deref().unwrap_or("aws"),
        upload.chunk_size
    );
    let backend = Arc::new(S3Backend::new(aws));
    let uploader = Uploader::new(backend, upload)?;
    Ok(UploadRegistry::new(uploader, options))
}
