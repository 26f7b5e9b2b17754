use crate::analysis_client::{fetch_image_analysis, AnalysisApi, AnalysisOutcome, SimilarImage};
use crate::auth::{extract_code, AuthGateway};
use crate::config::ApiConfig;
use crate::history::{HistoryItem, HistoryStore};
use crate::orchestrator::{FlowError, Orchestrator, RetryPolicy, Sleeper};
use crate::response::ImageAnalysis;
use crate::storage_client::{ObjectStore, ProgressFn};
use crate::validator::{ImageValidator, SelectedImage};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub object_store: Arc<dyn ObjectStore>,
    pub analysis_api: Arc<dyn AnalysisApi>,
    pub history: Arc<HistoryStore>,
    pub auth: Arc<AuthGateway>,
    pub validator: Arc<ImageValidator>,
    pub retry: RetryPolicy,
    pub sleeper: Arc<dyn Sleeper>,
    pub key_prefix: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Terminal result of an upload flow
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Terminal flow state: "complete" or "error"
    pub state: String,
    /// Derived object key, present once the upload succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Detected labels
    pub labels: Vec<String>,
    /// Normalized analysis record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ImageAnalysis>,
    /// Placeholder similar-image suggestions
    pub similar_images: Vec<SimilarImage>,
    /// History record created for this upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_item: Option<HistoryItem>,
    /// User-visible error message for the "error" state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Query parameters for the re-analyze endpoint
#[derive(Debug, Deserialize)]
pub struct AnalysisQuery {
    /// Bearer token forwarded to the analysis endpoint; empty selects the
    /// unauthenticated demo flow
    #[serde(default)]
    pub auth_token: String,
}

/// Query parameters for the history endpoint
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub user_id: String,
}

/// History list response
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub items: Vec<HistoryItem>,
}

/// Callback response carrying the extracted authorization code
#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub code: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    // Leave multipart headroom above the validated image ceiling so the
    // size check rejects with a readable reason instead of a 413
    let body_limit = state.validator.max_size_bytes() * 2;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/images", post(upload_image))
        .route("/api/v1/images/*key", get(get_analysis))
        .route("/api/v1/history", get(list_history))
        .route("/auth/login", get(auth_login))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/logout", get(auth_logout))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "snapsight"
    }))
}

fn bad_request(message: &str, code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Progress callback logging transferred/total byte counts
fn progress_logger() -> ProgressFn {
    Arc::new(|transferred, total| {
        debug!(
            transferred = transferred,
            total = total,
            "Upload progress"
        );
    })
}

/// Multipart image upload running the full upload/analyze flow.
///
/// Fields: `file` (the image), optional `user_id`, optional `auth_token`.
/// Orchestration failures surface as a terminal "error" flow state, not as
/// transport errors.
#[instrument(skip(state, multipart))]
async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, Json<ErrorResponse>)> {
    let mut image: Option<SelectedImage> = None;
    let mut user_id = "anonymous".to_string();
    let mut auth_token = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(&format!("Malformed multipart body: {e}"), "BAD_MULTIPART"))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| {
                        bad_request(&format!("Failed to read file field: {e}"), "BAD_MULTIPART")
                    })?
                    .to_vec();
                image = Some(SelectedImage {
                    file_name,
                    content_type,
                    data,
                });
            }
            "user_id" => {
                user_id = field.text().await.map_err(|e| {
                    bad_request(&format!("Failed to read user_id field: {e}"), "BAD_MULTIPART")
                })?;
            }
            "auth_token" => {
                auth_token = field.text().await.map_err(|e| {
                    bad_request(
                        &format!("Failed to read auth_token field: {e}"),
                        "BAD_MULTIPART",
                    )
                })?;
            }
            _ => {}
        }
    }

    let image = image.ok_or_else(|| bad_request("Missing file field", "MISSING_FILE"))?;

    let mut orchestrator = Orchestrator::new(
        state.object_store.clone(),
        state.analysis_api.clone(),
        state.history.clone(),
        (*state.validator).clone(),
        state.retry.clone(),
        state.sleeper.clone(),
        state.key_prefix.clone(),
    );

    match orchestrator
        .run(image, &user_id, &auth_token, Some(progress_logger()))
        .await
    {
        Ok((key, outcome)) => {
            let history_item = state
                .history
                .get_history_items(&user_id)
                .into_iter()
                .find(|item| item.id == key);

            Ok(Json(UploadResponse {
                state: orchestrator.state().name().to_string(),
                key: Some(key),
                labels: outcome.labels,
                analysis: Some(outcome.analysis),
                similar_images: outcome.similar_images,
                history_item,
                error: None,
            }))
        }
        Err(FlowError::Validation(reason)) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: reason,
                code: "VALIDATION_ERROR".to_string(),
            }),
        )),
        Err(e @ (FlowError::Upload(_) | FlowError::Analysis { .. })) => {
            error!(error = %e, "Upload flow ended in error state");
            Ok(Json(UploadResponse {
                state: orchestrator.state().name().to_string(),
                key: None,
                labels: Vec::new(),
                analysis: None,
                similar_images: Vec::new(),
                history_item: None,
                error: Some(e.to_string()),
            }))
        }
        Err(e @ FlowError::InvalidAction { .. }) => Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "INVALID_ACTION".to_string(),
            }),
        )),
    }
}

/// Re-run the analyze step for a previously uploaded key (history selection)
#[instrument(skip(state, params))]
async fn get_analysis(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<AnalysisQuery>,
) -> Result<Json<AnalysisOutcome>, (StatusCode, Json<ErrorResponse>)> {
    match fetch_image_analysis(state.analysis_api.as_ref(), &key, &params.auth_token).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            error!(error = %e, key = %key, "Failed to fetch analysis");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: "Failed to fetch analysis".to_string(),
                    code: "ANALYSIS_ERROR".to_string(),
                }),
            ))
        }
    }
}

/// History items for a user, newest first
#[instrument(skip(state))]
async fn list_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        items: state.history.get_history_items(&params.user_id),
    })
}

/// Redirect to the identity provider authorize endpoint
async fn auth_login(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.auth.authorize_url())
}

/// Landing point for the provider redirect; surfaces the authorization code
async fn auth_callback(
    RawQuery(query): RawQuery,
) -> Result<Json<CallbackResponse>, (StatusCode, Json<ErrorResponse>)> {
    match query.as_deref().and_then(extract_code) {
        Some(code) => Ok(Json(CallbackResponse { code })),
        None => Err(bad_request(
            "Callback query carried no authorization code",
            "MISSING_CODE",
        )),
    }
}

/// Redirect to the identity provider logout endpoint
async fn auth_logout(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(&state.auth.logout_url())
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis_client::MockAnalysisApi;
    use crate::config::{AuthConfig, UploadConfig};
    use crate::orchestrator::TokioSleeper;
    use crate::storage_client::MockObjectStore;
    use std::time::Duration;

    fn test_state() -> AppState {
        AppState {
            object_store: Arc::new(MockObjectStore::new()),
            analysis_api: Arc::new(MockAnalysisApi::new()),
            history: Arc::new(HistoryStore::new()),
            auth: Arc::new(AuthGateway::new(AuthConfig {
                authority: "https://auth.example.com".to_string(),
                client_id: "client-123".to_string(),
                redirect_uri: "http://localhost:8080/auth/callback".to_string(),
                logout_uri: "http://localhost:8080/".to_string(),
                scope: "openid".to_string(),
            })),
            validator: Arc::new(ImageValidator::new(UploadConfig::default())),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(1000),
                multiplier: 2.0,
            },
            sleeper: Arc::new(TokioSleeper),
            key_prefix: "uploads".to_string(),
        }
    }

    #[test]
    fn test_router_builds_with_cors_enabled() {
        let config = ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_enabled: true,
            cors_origins: vec![],
        };
        let _ = create_router(test_state(), &config);
    }

    #[test]
    fn test_router_builds_with_explicit_origins() {
        let config = ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_enabled: true,
            cors_origins: vec!["http://localhost:3000".to_string()],
        };
        let _ = create_router(test_state(), &config);
    }

    #[test]
    fn test_error_response_shape() {
        let body = serde_json::to_value(ErrorResponse {
            error: "boom".to_string(),
            code: "TEST".to_string(),
        })
        .unwrap();

        assert_eq!(body["error"], "boom");
        assert_eq!(body["code"], "TEST");
    }

    #[test]
    fn test_upload_response_omits_absent_fields() {
        let body = serde_json::to_value(UploadResponse {
            state: "error".to_string(),
            key: None,
            labels: vec![],
            analysis: None,
            similar_images: vec![],
            history_item: None,
            error: Some("upload failed".to_string()),
        })
        .unwrap();

        assert!(body.get("key").is_none());
        assert!(body.get("analysis").is_none());
        assert_eq!(body["state"], "error");
    }
}
