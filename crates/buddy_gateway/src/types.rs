use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use buddy_core::{AttentionReport, DailySummary, EmotionLabel, IngestError, MissionCompletion, MissionType};
use buddy_reasoning::DayReport;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Name used in prompts and alerts when none is known.
pub const DEFAULT_SUBJECT_NAME: &str = "Patient";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub subject_user_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub label: EmotionLabel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRequest {
    pub subject_user_id: String,
    #[serde(default)]
    pub subject_name: Option<String>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRequest {
    pub from_user_id: String,
    pub to_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionRequest {
    pub subject_user_id: String,
    pub mission_type: MissionType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MissionResponse {
    Completed(MissionCompletion),
    #[serde(rename_all = "camelCase")]
    AlreadyCompleted { already_completed: bool },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionsToday {
    pub subject_user_id: String,
    pub date: NaiveDate,
    pub missions: Vec<MissionType>,
}

/// Step count pushed by the activity collaborator. `date` defaults to today.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRequest {
    pub subject_user_id: String,
    pub step_count: i64,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionResponse {
    pub subject_user_id: String,
    pub subject_name: String,
    #[serde(flatten)]
    pub report: AttentionReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub subject_user_id: String,
    pub days: Vec<DayReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummariesResponse {
    pub subject_user_id: String,
    pub subject_name: String,
    pub summaries: Vec<DailySummary>,
}

/// Error surface of the HTTP routes. Internal failures are logged and
/// answered with a generic body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::EmptyText => ApiError::BadRequest(e.to_string()),
            IngestError::Persist(source) => {
                tracing::error!("chat message not saved: {:#}", source);
                ApiError::Unavailable("could not save your message, please try again".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(e) => {
                tracing::error!("request failed: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
