//! The upload/analyze flow state machine.
//!
//! One orchestrator instance drives one flow: validate a submitted image,
//! upload it to object storage, record it in history, then fetch analysis
//! results with bounded retry. The flow state is a single tagged value, so a
//! step can only start from the state that precedes it.

use crate::analysis_client::{fetch_image_analysis, AnalysisApi, AnalysisOutcome};
use crate::config::AnalysisConfig;
use crate::history::{HistoryItem, HistoryStore};
use crate::storage_client::{derive_object_key, ObjectStore, ProgressFn};
use crate::validator::{ImageValidator, SelectedImage, ValidationDecision};
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Thumbnails at most this large are inlined as data URLs in history items
const THUMBNAIL_INLINE_LIMIT: usize = 64 * 1024;

/// History thumbnail for images too large to inline
const PLACEHOLDER_THUMBNAIL: &str = "/placeholder.svg";

/// Errors surfaced to the caller of a flow action
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cannot {action} while {state}")]
    InvalidAction {
        state: &'static str,
        action: &'static str,
    },

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("analysis failed after {attempts} attempts: {message}")]
    Analysis { attempts: u32, message: String },
}

/// Step that failed, carrying what is needed to re-invoke it
#[derive(Debug, Clone)]
pub enum FailedStep {
    Upload { image: SelectedImage },
    Analyze { key: String },
}

/// Finite state of the upload/analyze flow.
///
/// Each variant carries only the data valid for that state; transitions are
/// monotonic along the documented path except for explicit retry and restart.
#[derive(Debug, Clone)]
pub enum UploadState {
    Idle,
    Uploading { image: SelectedImage },
    Uploaded { key: String },
    Analyzing { key: String },
    Complete { key: String, outcome: AnalysisOutcome },
    Error { failed: FailedStep, message: String },
}

impl UploadState {
    /// Short state name for logging and API responses
    pub fn name(&self) -> &'static str {
        match self {
            UploadState::Idle => "idle",
            UploadState::Uploading { .. } => "uploading",
            UploadState::Uploaded { .. } => "uploaded",
            UploadState::Analyzing { .. } => "analyzing",
            UploadState::Complete { .. } => "complete",
            UploadState::Error { .. } => "error",
        }
    }
}

/// Sleep dependency injected into the retry loop so tests record delays
/// instead of waiting them out
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Sleeper backed by the tokio timer
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Retry parameters for the analysis fetch
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total fetch attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling on the delay between attempts
    pub max_delay: Duration,
    /// Delay multiplier between attempts
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            multiplier: config.retry_multiplier,
        }
    }

    /// Deterministic multiplicative delay source for the retry loop
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            max_interval: self.max_delay,
            multiplier: self.multiplier,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Sequences one upload/analyze flow against the injected collaborators
pub struct Orchestrator {
    store: Arc<dyn ObjectStore>,
    analysis: Arc<dyn AnalysisApi>,
    history: Arc<HistoryStore>,
    validator: ImageValidator,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    key_prefix: String,
    /// Correlates all log lines of one flow
    flow_id: Uuid,
    state: UploadState,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        analysis: Arc<dyn AnalysisApi>,
        history: Arc<HistoryStore>,
        validator: ImageValidator,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        key_prefix: String,
    ) -> Self {
        Self {
            store,
            analysis,
            history,
            validator,
            retry,
            sleeper,
            key_prefix,
            flow_id: Uuid::new_v4(),
            state: UploadState::Idle,
        }
    }

    /// Current flow state
    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Validate the image and upload it to object storage.
    ///
    /// Validation happens before the transition to `Uploading`; a rejected
    /// image leaves the flow in `Idle` and no network call is made. On
    /// success the derived object key is recorded in history and returned.
    pub async fn begin_upload(
        &mut self,
        image: SelectedImage,
        user_id: &str,
        progress: Option<ProgressFn>,
    ) -> Result<String, FlowError> {
        if !matches!(self.state, UploadState::Idle) {
            return Err(FlowError::InvalidAction {
                state: self.state.name(),
                action: "upload",
            });
        }

        if let ValidationDecision::Reject { reason } = self.validator.validate(&image) {
            metrics::counter!("snapsight.uploads.rejected").increment(1);
            warn!(
                flow_id = %self.flow_id,
                file_name = %image.file_name,
                reason = %reason,
                "Upload rejected by validation"
            );
            return Err(FlowError::Validation(reason));
        }

        let key = derive_object_key(&self.key_prefix, &image.file_name, Utc::now());
        self.state = UploadState::Uploading {
            image: image.clone(),
        };

        match self.store.put_image(&key, &image, progress).await {
            Ok(()) => {
                metrics::counter!("snapsight.uploads.completed").increment(1);
                self.history.save_history_item(HistoryItem {
                    id: key.clone(),
                    name: image.file_name.clone(),
                    date: Utc::now().format("%Y-%m-%d").to_string(),
                    thumbnail: thumbnail_data_url(&image),
                    user_id: user_id.to_string(),
                });

                info!(flow_id = %self.flow_id, key = %key, "Upload complete");
                self.state = UploadState::Uploaded { key: key.clone() };
                Ok(key)
            }
            Err(e) => {
                metrics::counter!("snapsight.uploads.failed").increment(1);
                let message = e.to_string();
                self.state = UploadState::Error {
                    failed: FailedStep::Upload { image },
                    message: message.clone(),
                };
                Err(FlowError::Upload(message))
            }
        }
    }

    /// Fetch analysis results for the uploaded key, retrying with
    /// multiplicative backoff up to the configured attempt bound.
    pub async fn analyze(&mut self, auth_token: &str) -> Result<AnalysisOutcome, FlowError> {
        let key = match &self.state {
            UploadState::Uploaded { key } => key.clone(),
            other => {
                return Err(FlowError::InvalidAction {
                    state: other.name(),
                    action: "analyze",
                });
            }
        };

        self.state = UploadState::Analyzing { key: key.clone() };

        let mut backoff = self.retry.backoff();
        let mut attempt = 0u32;

        let outcome = loop {
            attempt += 1;
            match fetch_image_analysis(self.analysis.as_ref(), &key, auth_token).await {
                Ok(outcome) => break outcome,
                Err(e) => {
                    if attempt >= self.retry.max_attempts {
                        metrics::counter!("snapsight.analysis.failed").increment(1);
                        let message = e.to_string();
                        self.state = UploadState::Error {
                            failed: FailedStep::Analyze { key },
                            message: message.clone(),
                        };
                        return Err(FlowError::Analysis {
                            attempts: attempt,
                            message,
                        });
                    }

                    metrics::counter!("snapsight.analysis.retries").increment(1);
                    let delay = backoff.next_backoff().unwrap_or(self.retry.max_delay);
                    warn!(
                        flow_id = %self.flow_id,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Analysis fetch failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        };

        metrics::counter!("snapsight.analysis.completed").increment(1);
        info!(
            flow_id = %self.flow_id,
            key = %key,
            label_count = outcome.labels.len(),
            "Analysis complete"
        );
        self.state = UploadState::Complete {
            key,
            outcome: outcome.clone(),
        };
        Ok(outcome)
    }

    /// Re-invoke the step recorded in the error state
    pub async fn retry(&mut self, user_id: &str, auth_token: &str) -> Result<(), FlowError> {
        match self.state.clone() {
            UploadState::Error {
                failed: FailedStep::Upload { image },
                ..
            } => {
                self.state = UploadState::Idle;
                self.begin_upload(image, user_id, None).await?;
                Ok(())
            }
            UploadState::Error {
                failed: FailedStep::Analyze { key },
                ..
            } => {
                self.state = UploadState::Uploaded { key };
                self.analyze(auth_token).await?;
                Ok(())
            }
            other => Err(FlowError::InvalidAction {
                state: other.name(),
                action: "retry",
            }),
        }
    }

    /// Discard the in-flight flow and return to `Idle`
    pub fn restart(&mut self) {
        self.state = UploadState::Idle;
    }

    /// Run the full flow: upload, record history, analyze
    pub async fn run(
        &mut self,
        image: SelectedImage,
        user_id: &str,
        auth_token: &str,
        progress: Option<ProgressFn>,
    ) -> Result<(String, AnalysisOutcome), FlowError> {
        let key = self.begin_upload(image, user_id, progress).await?;
        let outcome = self.analyze(auth_token).await?;
        Ok((key, outcome))
    }
}

/// Inline small images as data URLs for the history thumbnail; larger ones
/// fall back to the placeholder path
fn thumbnail_data_url(image: &SelectedImage) -> String {
    if image.data.len() <= THUMBNAIL_INLINE_LIMIT {
        format!(
            "data:{};base64,{}",
            image.content_type,
            STANDARD.encode(&image.data)
        )
    } else {
        PLACEHOLDER_THUMBNAIL.to_string()
    }
}
