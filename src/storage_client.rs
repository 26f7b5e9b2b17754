use crate::config::StorageConfig;
use crate::validator::SelectedImage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Progress callback reporting (transferred, total) byte counts
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Seam over the object storage upload, mockable in orchestrator tests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload an image under the given key; resolves once fully stored
    async fn put_image(
        &self,
        key: &str,
        image: &SelectedImage,
        progress: Option<ProgressFn>,
    ) -> Result<()>;
}

/// S3 client for uploaded images
pub struct StorageClient {
    client: S3Client,
    bucket: String,
    config: StorageConfig,
}

impl StorageClient {
    /// Create a new storage client
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let s3_config = s3_config_builder.build();
        let client = S3Client::from_conf(s3_config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Storage client initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    /// Single-part upload for small files
    async fn simple_upload(
        &self,
        key: &str,
        image: &SelectedImage,
        progress: Option<&ProgressFn>,
    ) -> Result<()> {
        let total = image.data.len() as u64;
        if let Some(report) = progress {
            report(0, total);
        }

        let body = ByteStream::from(image.data.clone());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(&image.content_type)
            .metadata("original-name", &image.file_name)
            .send()
            .await
            .context("Failed to upload image to S3")?;

        if let Some(report) = progress {
            report(total, total);
        }

        Ok(())
    }

    /// Multipart upload for large files; progress fires as parts complete
    async fn multipart_upload(
        &self,
        key: &str,
        image: &SelectedImage,
        progress: Option<&ProgressFn>,
    ) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&image.content_type)
            .metadata("original-name", &image.file_name)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        let total = image.data.len() as u64;
        let mut transferred = 0u64;
        let mut completed_parts = Vec::new();
        let part_size = self.config.part_size_bytes;
        let mut part_number = 1;

        for chunk in image.data.chunks(part_size) {
            let body = ByteStream::from(chunk.to_vec());

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .context("Failed to upload part")?;

            let completed_part = aws_sdk_s3::types::CompletedPart::builder()
                .part_number(part_number)
                .e_tag(upload_part_response.e_tag().unwrap_or_default())
                .build();

            completed_parts.push(completed_part);
            part_number += 1;

            transferred += chunk.len() as u64;
            if let Some(report) = progress {
                report(transferred, total);
            }
        }

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for StorageClient {
    #[instrument(skip(self, image, progress), fields(key = %key, size_bytes = image.data.len()))]
    async fn put_image(
        &self,
        key: &str,
        image: &SelectedImage,
        progress: Option<ProgressFn>,
    ) -> Result<()> {
        debug!(
            content_type = %image.content_type,
            "Uploading image to object storage"
        );

        if image.data.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(key, image, progress.as_ref()).await?;
        } else {
            self.simple_upload(key, image, progress.as_ref()).await?;
        }

        info!(
            key = %key,
            size_bytes = image.data.len(),
            "Image uploaded successfully"
        );

        Ok(())
    }
}

/// Derive the object key for an upload.
/// Format: `<prefix>/<millisecond-timestamp>-<sanitized file name>`
///
/// The key doubles as the analysis lookup handle and the history item id, so
/// the time-based prefix keeps it unique per upload.
pub fn derive_object_key(prefix: &str, file_name: &str, uploaded_at: DateTime<Utc>) -> String {
    format!(
        "{}/{}-{}",
        prefix,
        uploaded_at.timestamp_millis(),
        sanitize_file_name(file_name)
    )
}

/// Sanitize a file name to prevent path traversal in object keys
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_derive_object_key_format() {
        let uploaded_at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        let key = derive_object_key("uploads", "photo.jpg", uploaded_at);

        assert_eq!(
            key,
            format!("uploads/{}-photo.jpg", uploaded_at.timestamp_millis())
        );
    }

    #[test]
    fn test_derive_object_key_sanitizes_name() {
        let uploaded_at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        let key = derive_object_key("uploads", "my holiday/photo.jpg", uploaded_at);

        assert!(key.ends_with("-my_holiday_photo.jpg"));
        assert_eq!(key.matches('/').count(), 1);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_file_name("my photo.jpg"), "my_photo.jpg");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("café.png"), "caf_.png");
    }
}
