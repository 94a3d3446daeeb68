//! S3 implementation of the engine's storage backend
//!
//! Control calls (create/complete/abort, ACL) go through `aws-sdk-s3`. Part bytes never pass
//! through the SDK: each part is authorized with a presigned `UploadPart` URL that the engine
//! PUTs to directly.

use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use log::{debug, info};
use multipart_ul::{BackendResult, MultipartUpload, PartReceipt, StorageBackend, TransportHandle};
use std::time::Duration;

use crate::config::AwsConfig;

// Presigned part URLs are valid for one hour
const PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

pub struct S3ClientConfig<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
    pub endpoint_url: Option<&'a str>,
    pub force_path_style: bool,
}

pub fn create_s3_client(config: &S3ClientConfig<'_>) -> Client {
    let credentials = Credentials::new(
        config.access_key_id,
        config.secret_access_key,
        None,
        None,
        "uppy",
    );

    let mut builder = S3ConfigBuilder::new()
        .credentials_provider(credentials)
        .region(Region::new(config.region.to_string()));

    if let Some(endpoint_url) = config.endpoint_url {
        builder = builder.endpoint_url(endpoint_url);
    }

    if config.force_path_style {
        builder = builder.force_path_style(true);
    }

    Client::from_conf(builder.build())
}

/// Storage key for a new object: upload time in unix seconds, then the file name.
pub fn object_key(filename: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}", now.timestamp(), filename)
}

/// Public URL of `key` in the configured bucket.
pub fn public_url(config: &AwsConfig, key: &str) -> String {
    let encoded_key = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");

    match &config.endpoint_url {
        Some(endpoint) => format!("{}/{}/{}", endpoint, config.bucket, encoded_key),
        None => format!(
            "https://s3.{}.amazonaws.com/{}/{}",
            config.region, config.bucket, encoded_key
        ),
    }
}

pub struct S3Backend {
    client: Client,
    config: AwsConfig,
}

impl S3Backend {
    pub fn new(config: AwsConfig) -> Self {
        let client = create_s3_client(&S3ClientConfig {
            access_key_id: &config.access_key_id,
            secret_access_key: &config.secret_access_key,
            region: &config.region,
            endpoint_url: config.endpoint_url.as_deref(),
            force_path_style: config.force_path_style,
        });
        Self { client, config }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn initiate_multipart_upload(
        &self,
        filename: &str,
        content_type: &str,
    ) -> BackendResult<MultipartUpload> {
        let key = object_key(filename, Utc::now());

        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(&key)
            .content_type(content_type)
            .send()
            .await?;

        let upload_id = response
            .upload_id()
            .ok_or("No upload ID returned")?
            .to_string();

        info!(
            "s3_multipart_created: bucket={} key={} upload_id={}",
            self.config.bucket, key, upload_id
        );
        Ok(MultipartUpload {
            upload_id,
            storage_key: key,
        })
    }

    async fn authorize_part_upload(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
    ) -> BackendResult<TransportHandle> {
        let expires_at = Utc::now() + chrono::Duration::from_std(PRESIGN_EXPIRY)?;
        let presigning_config = PresigningConfig::expires_in(PRESIGN_EXPIRY)?;

        let presigned_request = self
            .client
            .upload_part()
            .bucket(&self.config.bucket)
            .key(&upload.storage_key)
            .upload_id(&upload.upload_id)
            .part_number(i32::try_from(part_number)?)
            .presigned(presigning_config)
            .await?;

        debug!(
            "s3_part_presigned: upload_id={} part={}",
            upload.upload_id, part_number
        );
        Ok(TransportHandle::new(
            presigned_request.uri().to_string(),
            expires_at,
        ))
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        receipts: &[PartReceipt],
    ) -> BackendResult<String> {
        let mut completed_parts = Vec::with_capacity(receipts.len());
        for receipt in receipts {
            completed_parts.push(
                CompletedPart::builder()
                    .part_number(i32::try_from(receipt.part_number)?)
                    .e_tag(&receipt.integrity_tag)
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.config.bucket)
            .key(&upload.storage_key)
            .upload_id(&upload.upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await?;

        if self.config.public_read {
            self.client
                .put_object_acl()
                .bucket(&self.config.bucket)
                .key(&upload.storage_key)
                .acl(ObjectCannedAcl::PublicRead)
                .send()
                .await?;
        }

        let url = public_url(&self.config, &upload.storage_key);
        info!(
            "s3_multipart_completed: key={} parts={} url={}",
            upload.storage_key,
            receipts.len(),
            url
        );
        Ok(url)
    }

    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> BackendResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.config.bucket)
            .key(&upload.storage_key)
            .upload_id(&upload.upload_id)
            .send()
            .await?;

        info!(
            "s3_multipart_aborted: key={} upload_id={}",
            upload.storage_key, upload.upload_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(endpoint_url: Option<&str>) -> AwsConfig {
        AwsConfig {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            region: "eu-west-2".to_string(),
            bucket: "uploads".to_string(),
            endpoint_url: endpoint_url.map(str::to_string),
            force_path_style: endpoint_url.is_some(),
            public_read: true,
        }
    }

    #[test]
    fn object_key_prefixes_unix_seconds() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(object_key("movie.mp4", now), "1704164645_movie.mp4");
    }

    #[test]
    fn public_url_uses_regional_aws_host() {
        assert_eq!(
            public_url(&config(None), "1704164645_movie.mp4"),
            "https://s3.eu-west-2.amazonaws.com/uploads/1704164645_movie.mp4"
        );
    }

    #[test]
    fn public_url_uses_custom_endpoint_and_encodes_segments() {
        assert_eq!(
            public_url(&config(Some("http://localhost:9000")), "dir/my file#1.bin"),
            "http://localhost:9000/uploads/dir/my%20file%231.bin"
        );
    }

    #[tokio::test]
    async fn part_authorization_presigns_upload_part() {
        let backend = S3Backend::new(config(None));
        let upload = MultipartUpload {
            upload_id: "abc123".to_string(),
            storage_key: "1704164645_movie.mp4".to_string(),
        };

        let before = Utc::now();
        let handle = backend.authorize_part_upload(&upload, 2).await.unwrap();

        assert!(handle.url.contains("1704164645_movie.mp4"));
        assert!(handle.url.contains("partNumber=2"));
        assert!(handle.url.contains("uploadId=abc123"));
        assert!(handle.url.contains("X-Amz-Expires=3600"));
        assert!(!handle.is_expired(before + chrono::Duration::minutes(59)));
        assert!(handle.is_expired(before + chrono::Duration::minutes(61)));
    }
}
