use crate::config::AnalysisConfig;
use crate::response::{parse_recognition_response, ColorShare, ImageAnalysis};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors that can occur while fetching analysis results
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("analysis endpoint returned status {0}")]
    Status(reqwest::StatusCode),
}

/// A placeholder external search result for a detected label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarImage {
    pub id: String,
    pub url: String,
    pub thumbnail_url: String,
    pub title: String,
    pub author: String,
    pub author_url: String,
}

/// Everything the display layer needs after an analysis completes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOutcome {
    /// Detected labels in endpoint order
    pub labels: Vec<String>,
    /// Normalized analysis record
    pub analysis: ImageAnalysis,
    /// Placeholder similar-image suggestions, one per label
    pub similar_images: Vec<SimilarImage>,
}

/// Seam over the recognition endpoint, mockable in orchestrator tests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    /// Fetch the raw recognition document for an uploaded object key
    async fn fetch_raw(&self, image_key: &str, auth_token: &str)
        -> Result<String, AnalysisError>;
}

/// HTTP client for the remote recognition endpoint
pub struct AnalysisClient {
    http: reqwest::Client,
    base_url: String,
}

impl AnalysisClient {
    /// Create a new analysis client
    pub fn new(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AnalysisApi for AnalysisClient {
    #[instrument(skip(self, auth_token), fields(image_key = %image_key))]
    async fn fetch_raw(
        &self,
        image_key: &str,
        auth_token: &str,
    ) -> Result<String, AnalysisError> {
        let url = format!("{}/{}", self.base_url, image_key);

        let response = self
            .http
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {auth_token}"),
            )
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::Status(status));
        }

        Ok(response.text().await?)
    }
}

/// Fetch and normalize analysis results for an uploaded object key.
///
/// An empty token selects the unauthenticated flow, which substitutes a
/// fixed demo analysis instead of calling the endpoint.
pub async fn fetch_image_analysis(
    api: &dyn AnalysisApi,
    image_key: &str,
    auth_token: &str,
) -> Result<AnalysisOutcome, AnalysisError> {
    if auth_token.is_empty() {
        debug!(image_key = %image_key, "No auth token presented, serving demo analysis");
        let analysis = demo_analysis();
        let labels = analysis.objects.clone();
        let similar_images = similar_images(&labels);
        return Ok(AnalysisOutcome {
            labels,
            analysis,
            similar_images,
        });
    }

    let raw = api.fetch_raw(image_key, auth_token).await?;
    let parsed = parse_recognition_response(&raw);
    let similar = similar_images(&parsed.labels);

    Ok(AnalysisOutcome {
        labels: parsed.labels,
        analysis: parsed.analysis,
        similar_images: similar,
    })
}

/// Deterministic placeholder search results, one per detected label.
/// Derived from the label text and its position only.
pub fn similar_images(labels: &[String]) -> Vec<SimilarImage> {
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let query = urlencoding::encode(&label.to_lowercase()).into_owned();
            let url = format!("https://source.unsplash.com/300x300/?{query}&sig={i}");
            SimilarImage {
                id: format!("img-{i}"),
                thumbnail_url: url.clone(),
                url,
                title: format!("Similar to {label}"),
                author: format!("Author {}", i + 1),
                author_url: format!("https://unsplash.com/@author{i}"),
            }
        })
        .collect()
}

/// Fixed analysis record for the unauthenticated flow
pub fn demo_analysis() -> ImageAnalysis {
    let objects = [
        "person",
        "tree",
        "car",
        "building",
        "sky",
        "road",
        "traffic light",
    ];
    let tags = [
        "outdoor",
        "urban",
        "daytime",
        "architecture",
        "street",
        "city",
        "modern",
        "sunny",
        "vehicle",
    ];

    ImageAnalysis {
        objects: objects.iter().map(|s| s.to_string()).collect(),
        confidence: Vec::new(),
        colors: vec![
            ColorShare {
                name: "Blue".to_string(),
                hex: "#4285F4".to_string(),
                percentage: 45.0,
            },
            ColorShare {
                name: "Green".to_string(),
                hex: "#34A853".to_string(),
                percentage: 30.0,
            },
            ColorShare {
                name: "Gray".to_string(),
                hex: "#9AA0A6".to_string(),
                percentage: 15.0,
            },
            ColorShare {
                name: "Red".to_string(),
                hex: "#EA4335".to_string(),
                percentage: 10.0,
            },
        ],
        tags: tags.iter().map(|s| s.to_string()).collect(),
        timestamp: None,
        image_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_similar_images_deterministic() {
        let first = similar_images(&labels(&["Cat", "Dog"]));
        let second = similar_images(&labels(&["Cat", "Dog"]));
        assert_eq!(first, second);
    }

    #[test]
    fn test_similar_images_one_per_label() {
        let images = similar_images(&labels(&["Cat", "Dog", "Bird"]));

        assert_eq!(images.len(), 3);
        assert_eq!(images[0].id, "img-0");
        assert_eq!(images[2].id, "img-2");
        assert!(images[0].url.contains("cat"));
        assert!(images[1].url.contains("sig=1"));
        assert_eq!(images[1].author, "Author 2");
    }

    #[test]
    fn test_similar_images_encodes_label_text() {
        let images = similar_images(&labels(&["Traffic Light"]));
        assert!(images[0].url.contains("traffic%20light"));
    }

    #[test]
    fn test_similar_images_empty_labels() {
        assert!(similar_images(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_empty_token_serves_demo_without_network_call() {
        let mut api = MockAnalysisApi::new();
        api.expect_fetch_raw().times(0);

        let outcome = fetch_image_analysis(&api, "uploads/1-photo.jpg", "")
            .await
            .unwrap();

        assert_eq!(outcome.labels.len(), 7);
        assert!(outcome.labels.contains(&"person".to_string()));
        assert_eq!(outcome.analysis.colors.len(), 4);
        assert_eq!(outcome.similar_images.len(), 7);
    }

    #[tokio::test]
    async fn test_authenticated_fetch_parses_and_derives_similar_images() {
        let mut api = MockAnalysisApi::new();
        api.expect_fetch_raw()
            .withf(|key, token| key == "uploads/1-photo.jpg" && token == "token-123")
            .returning(|_, _| {
                Ok(r#"{"Labels":["Cat"],"ConfidenceScores":[91.2]}"#.to_string())
            });

        let outcome = fetch_image_analysis(&api, "uploads/1-photo.jpg", "token-123")
            .await
            .unwrap();

        assert_eq!(outcome.labels, vec!["Cat"]);
        assert_eq!(outcome.analysis.confidence[0].score, 91.2);
        assert_eq!(outcome.similar_images.len(), 1);
        assert_eq!(outcome.similar_images[0].id, "img-0");
    }

    #[tokio::test]
    async fn test_endpoint_error_propagates() {
        let mut api = MockAnalysisApi::new();
        api.expect_fetch_raw().returning(|_, _| {
            Err(AnalysisError::Status(
                reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            ))
        });

        let result = fetch_image_analysis(&api, "uploads/1-photo.jpg", "token-123").await;

        assert!(matches!(result, Err(AnalysisError::Status(_))));
    }

    #[tokio::test]
    async fn test_unparseable_body_yields_empty_analysis() {
        let mut api = MockAnalysisApi::new();
        api.expect_fetch_raw()
            .returning(|_, _| Ok("not json".to_string()));

        let outcome = fetch_image_analysis(&api, "uploads/1-photo.jpg", "token-123")
            .await
            .unwrap();

        assert!(outcome.labels.is_empty());
        assert!(outcome.analysis.objects.is_empty());
        assert!(outcome.similar_images.is_empty());
    }
}
