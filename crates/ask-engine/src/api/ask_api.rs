// Question endpoint: identity from headers, body validation, error mapping
use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

use crate::backends::{HeaderIdentity, USER_ID_HEADER, USER_NAME_HEADER};
use crate::engine::{AskRequest, AskResponse};
use crate::error::{AskError, ErrorKind};
use crate::shared_state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AskBody {
    #[validate(length(min = 1, max = 2000))]
    pub question: String,
    #[validate(length(max = 128))]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

pub enum ApiError {
    Invalid(String),
    Ask { error: AskError, expose_details: bool },
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::GenerationError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ExecutionError => StatusCode::BAD_GATEWAY,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Invalid(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: message,
                    kind: "ValidationError".to_string(),
                    details: None,
                }),
            )
                .into_response(),
            ApiError::Ask { error, expose_details } => {
                let kind = error.kind();
                (
                    status_for(kind),
                    Json(ErrorResponse {
                        error: error.public_message().to_string(),
                        kind: kind.as_str().to_string(),
                        details: expose_details.then(|| format!("{:#}", error)),
                    }),
                )
                    .into_response()
            }
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Answer one question
pub async fn ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AskBody>,
) -> Result<Json<AskResponse>, ApiError> {
    body.validate().map_err(|e| ApiError::Invalid(e.to_string()))?;
    let question = body.question.trim();
    if question.is_empty() {
        return Err(ApiError::Invalid("question must not be blank".to_string()));
    }
    debug!("Question received over HTTP ({} chars)", question.chars().count());

    let identity = HeaderIdentity::new(header(&headers, USER_ID_HEADER), header(&headers, USER_NAME_HEADER));
    let request = AskRequest::new(question, body.session_id.unwrap_or_default());

    state
        .orchestrator
        .ask(&identity, request)
        .await
        .map(Json)
        .map_err(|error| ApiError::Ask {
            error,
            expose_details: state.config.expose_error_details,
        })
}
