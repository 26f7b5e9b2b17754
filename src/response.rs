//! Tolerant parsing of recognition endpoint responses.
//!
//! The analysis endpoint has shipped its payload in three nesting shapes over
//! time: fields at the JSON root, a `body` string holding the payload as
//! nested JSON (proxy integration), and a `latest` wrapper object. The parser
//! discriminates the shape explicitly and logs which one matched; a response
//! matching none of them degrades to an empty analysis so callers always have
//! a renderable value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// A detected label paired with its recognition confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

/// Dominant color entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorShare {
    pub name: String,
    pub hex: String,
    pub percentage: f64,
}

/// Normalized analysis record, replaced wholesale on each new analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    /// Detected object names
    pub objects: Vec<String>,
    /// Labels paired with confidence scores, sorted by descending score
    pub confidence: Vec<LabelScore>,
    /// Dominant colors
    pub colors: Vec<ColorShare>,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Analysis timestamp, if the endpoint reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Source image URL, if the endpoint reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Raw recognition payload as the endpoint reports it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognitionPayload {
    #[serde(default, alias = "Labels")]
    pub labels: Vec<String>,
    #[serde(default, alias = "ConfidenceScores")]
    pub confidence_scores: Vec<f64>,
    #[serde(default, alias = "Timestamp")]
    pub timestamp: Option<Value>,
    #[serde(default, alias = "ImageID")]
    pub image_id: Option<String>,
    #[serde(default, alias = "ImageURL")]
    pub image_url: Option<String>,
}

/// JSON nesting shape the endpoint responded with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Payload fields at the JSON root
    Root,
    /// Payload nested as JSON text inside a `body` string field
    Body,
    /// Payload inside a `latest` wrapper object
    Latest,
}

/// Errors that can occur while parsing a recognition response
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("no recognized payload shape (tried root, body, latest)")]
    UnrecognizedShape,
}

/// Parsed recognition response ready for display
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedRecognition {
    /// Detected labels in endpoint order
    pub labels: Vec<String>,
    /// Normalized analysis record
    pub analysis: ImageAnalysis,
}

/// Whether a JSON value carries a labels array under either casing
fn looks_like_payload(value: &Value) -> bool {
    value
        .get("Labels")
        .or_else(|| value.get("labels"))
        .map_or(false, Value::is_array)
}

/// Discriminate the response shape and extract the raw payload
pub fn parse_recognition_payload(raw: &str) -> Result<(ResponseShape, RecognitionPayload), ParseError> {
    let value: Value = serde_json::from_str(raw)?;

    // Shape A: payload fields at the root
    if looks_like_payload(&value) {
        let payload = serde_json::from_value(value)?;
        return Ok((ResponseShape::Root, payload));
    }

    // Shape B: a `body` string holding the payload as nested JSON. The inner
    // document may itself be root-shaped or carry a `latest` wrapper.
    if let Some(body) = value.get("body").and_then(Value::as_str) {
        let inner: Value = serde_json::from_str(body)?;
        if looks_like_payload(&inner) {
            let payload = serde_json::from_value(inner)?;
            return Ok((ResponseShape::Body, payload));
        }
        if let Some(latest) = inner.get("latest") {
            if looks_like_payload(latest) {
                let payload = serde_json::from_value(latest.clone())?;
                return Ok((ResponseShape::Body, payload));
            }
        }
    }

    // Shape C: a `latest` wrapper object
    if let Some(latest) = value.get("latest") {
        if looks_like_payload(latest) {
            let payload = serde_json::from_value(latest.clone())?;
            return Ok((ResponseShape::Latest, payload));
        }
    }

    Err(ParseError::UnrecognizedShape)
}

/// Pair labels with confidence scores positionally; a missing score defaults
/// to 0. The result is sorted by descending score.
pub fn pair_confidence(labels: &[String], scores: &[f64]) -> Vec<LabelScore> {
    let mut paired: Vec<LabelScore> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| LabelScore {
            label: label.clone(),
            score: scores.get(i).copied().unwrap_or(0.0),
        })
        .collect();

    paired.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    paired
}

impl ImageAnalysis {
    /// Build the normalized analysis record from a raw payload
    pub fn from_payload(payload: &RecognitionPayload) -> Self {
        Self {
            objects: payload.labels.clone(),
            confidence: pair_confidence(&payload.labels, &payload.confidence_scores),
            colors: Vec::new(),
            tags: payload.labels.iter().map(|l| l.to_lowercase()).collect(),
            timestamp: payload.timestamp.as_ref().map(value_to_string),
            image_url: payload.image_url.clone(),
        }
    }
}

/// Render a JSON scalar as display text without surrounding quotes
fn value_to_string(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

/// Parse a recognition response, degrading to an empty analysis on failure.
///
/// Never returns an error: the caller always gets a renderable (possibly
/// empty) value, and the failure reason is logged instead.
pub fn parse_recognition_response(raw: &str) -> ParsedRecognition {
    match parse_recognition_payload(raw) {
        Ok((shape, payload)) => {
            debug!(
                shape = ?shape,
                label_count = payload.labels.len(),
                "Parsed recognition response"
            );
            ParsedRecognition {
                labels: payload.labels.clone(),
                analysis: ImageAnalysis::from_payload(&payload),
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to parse recognition response, returning empty analysis");
            ParsedRecognition::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT_SHAPE: &str = r#"{"Labels":["Cat","Dog"],"ConfidenceScores":[91.2,80.5]}"#;

    fn latest_shape() -> String {
        r#"{"latest":{"Labels":["Cat","Dog"],"ConfidenceScores":[91.2,80.5]}}"#.to_string()
    }

    fn body_shape() -> String {
        let inner = r#"{"latest":{"Labels":["Cat","Dog"],"ConfidenceScores":[91.2,80.5]}}"#;
        serde_json::json!({ "statusCode": 200, "body": inner }).to_string()
    }

    #[test]
    fn test_root_shape() {
        let (shape, payload) = parse_recognition_payload(ROOT_SHAPE).unwrap();
        assert_eq!(shape, ResponseShape::Root);
        assert_eq!(payload.labels, vec!["Cat", "Dog"]);
        assert_eq!(payload.confidence_scores, vec![91.2, 80.5]);
    }

    #[test]
    fn test_latest_shape() {
        let (shape, payload) = parse_recognition_payload(&latest_shape()).unwrap();
        assert_eq!(shape, ResponseShape::Latest);
        assert_eq!(payload.labels, vec!["Cat", "Dog"]);
    }

    #[test]
    fn test_body_shape() {
        let (shape, payload) = parse_recognition_payload(&body_shape()).unwrap();
        assert_eq!(shape, ResponseShape::Body);
        assert_eq!(payload.labels, vec!["Cat", "Dog"]);
    }

    #[test]
    fn test_all_shapes_yield_identical_results() {
        let root = parse_recognition_response(ROOT_SHAPE);
        let latest = parse_recognition_response(&latest_shape());
        let body = parse_recognition_response(&body_shape());

        assert_eq!(root.labels, latest.labels);
        assert_eq!(root.labels, body.labels);
        assert_eq!(root.analysis.objects, latest.analysis.objects);
        assert_eq!(root.analysis.objects, body.analysis.objects);
    }

    #[test]
    fn test_missing_scores_default_to_zero_and_sort_descending() {
        let raw = r#"{"Labels":["A","B"],"ConfidenceScores":[50]}"#;
        let parsed = parse_recognition_response(raw);

        assert_eq!(
            parsed.analysis.confidence,
            vec![
                LabelScore {
                    label: "A".to_string(),
                    score: 50.0
                },
                LabelScore {
                    label: "B".to_string(),
                    score: 0.0
                },
            ]
        );
    }

    #[test]
    fn test_confidence_sorted_descending() {
        let raw = r#"{"Labels":["Low","High","Mid"],"ConfidenceScores":[10.0,99.0,55.0]}"#;
        let parsed = parse_recognition_response(raw);

        let labels: Vec<&str> = parsed
            .analysis
            .confidence
            .iter()
            .map(|c| c.label.as_str())
            .collect();
        assert_eq!(labels, vec!["High", "Mid", "Low"]);
    }

    #[test]
    fn test_malformed_json_degrades_to_empty() {
        let parsed = parse_recognition_response("not json at all {{");

        assert!(parsed.labels.is_empty());
        assert!(parsed.analysis.objects.is_empty());
        assert!(parsed.analysis.colors.is_empty());
        assert!(parsed.analysis.tags.is_empty());
    }

    #[test]
    fn test_unrecognized_shape_degrades_to_empty() {
        let parsed = parse_recognition_response(r#"{"something":"else"}"#);

        assert!(parsed.labels.is_empty());
        assert!(parsed.analysis.objects.is_empty());
    }

    #[test]
    fn test_optional_fields_carried_through() {
        let raw = r#"{"Labels":["Cat"],"ConfidenceScores":[91.2],"Timestamp":"2024-06-01T10:00:00Z","ImageURL":"https://img.example.com/cat.jpg"}"#;
        let parsed = parse_recognition_response(raw);

        assert_eq!(
            parsed.analysis.timestamp.as_deref(),
            Some("2024-06-01T10:00:00Z")
        );
        assert_eq!(
            parsed.analysis.image_url.as_deref(),
            Some("https://img.example.com/cat.jpg")
        );
    }

    #[test]
    fn test_numeric_timestamp_rendered_as_text() {
        let raw = r#"{"Labels":["Cat"],"ConfidenceScores":[91.2],"Timestamp":1712340000}"#;
        let parsed = parse_recognition_response(raw);

        assert_eq!(parsed.analysis.timestamp.as_deref(), Some("1712340000"));
    }

    #[test]
    fn test_tags_are_lowercased_labels() {
        let parsed = parse_recognition_response(ROOT_SHAPE);
        assert_eq!(parsed.analysis.tags, vec!["cat", "dog"]);
    }
}
