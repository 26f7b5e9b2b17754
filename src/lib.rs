//! Snapsight - image upload and recognition gateway
//!
//! This library implements the upload/analyze flow behind the Snapsight API:
//!
//! - Validation of submitted images (type and size)
//! - Upload to S3-compatible object storage with progress reporting
//! - Recognition via a remote analysis endpoint, with tolerant response
//!   parsing and bounded retry
//! - A session-scoped history of past uploads
//!
//! # Example
//!
//! ```rust,no_run
//! use snapsight::config::Config;
//! use snapsight::storage_client::StorageClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let storage = StorageClient::new(&config.storage).await?;
//!     let _ = storage;
//!     Ok(())
//! }
//! ```

pub mod analysis_client;
pub mod api;
pub mod auth;
pub mod config;
pub mod history;
pub mod orchestrator;
pub mod response;
pub mod storage_client;
pub mod validator;

// Re-export main types
pub use analysis_client::{
    fetch_image_analysis, AnalysisApi, AnalysisClient, AnalysisError, AnalysisOutcome,
    SimilarImage,
};
pub use config::Config;
pub use history::{HistoryItem, HistoryStore};
pub use orchestrator::{FlowError, Orchestrator, RetryPolicy, Sleeper, TokioSleeper, UploadState};
pub use response::{parse_recognition_response, ImageAnalysis, LabelScore, ParsedRecognition};
pub use storage_client::{ObjectStore, ProgressFn, StorageClient};
pub use validator::{ImageValidator, SelectedImage, ValidationDecision};
