use crate::config::UploadConfig;
use tracing::debug;

/// An image submitted for upload
#[derive(Debug, Clone)]
pub struct SelectedImage {
    /// Original file name as submitted
    pub file_name: String,
    /// MIME content type
    pub content_type: String,
    /// Raw image bytes
    pub data: Vec<u8>,
}

/// Decision on whether a submitted image may be uploaded
#[derive(Debug, Clone)]
pub enum ValidationDecision {
    /// The image passes type and size checks
    Accept,
    /// The image is rejected with given reason
    Reject { reason: String },
}

/// Validates submitted images before any network call is made
#[derive(Debug, Clone)]
pub struct ImageValidator {
    config: UploadConfig,
}

impl ImageValidator {
    /// Create a new validator with the given upload configuration
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    /// Configured size ceiling in bytes
    pub fn max_size_bytes(&self) -> usize {
        self.config.max_size_bytes
    }

    /// Check a submitted image against the configured type and size limits
    pub fn validate(&self, image: &SelectedImage) -> ValidationDecision {
        if image.data.is_empty() {
            return ValidationDecision::Reject {
                reason: "File is empty".to_string(),
            };
        }

        if !self
            .config
            .allowed_content_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&image.content_type))
        {
            return ValidationDecision::Reject {
                reason: format!("Unsupported content type: {}", image.content_type),
            };
        }

        if image.data.len() > self.config.max_size_bytes {
            return ValidationDecision::Reject {
                reason: format!(
                    "File too large: {} bytes > max {} bytes",
                    image.data.len(),
                    self.config.max_size_bytes
                ),
            };
        }

        debug!(
            file_name = %image.file_name,
            content_type = %image.content_type,
            size_bytes = image.data.len(),
            "Image accepted for upload"
        );

        ValidationDecision::Accept
    }
}
