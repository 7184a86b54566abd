use crate::{
    inference::InferenceResult,
    pipeline::PipelineError,
    routes::ErrorBody,
    server::SharedState,
};
use axum::{
    extract::{
        rejection::{FormRejection, JsonRejection},
        FromRequest, Request, State,
    },
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const ROUTE: &str = "/api/frame";

#[derive(Debug, Deserialize)]
pub struct FrameRequest {
    #[serde(default)]
    pub frame: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FrameResponse {
    status: &'static str,
    result: InferenceResult,
}

#[derive(Error, Debug)]
pub enum FrameRequestError {
    #[error("No frame data provided")]
    MissingFrame,
    #[error("Invalid request body: {message}")]
    InvalidBody { status: StatusCode, message: String },
    #[error("{0}")]
    Pipeline(#[from] PipelineError),
}

impl FrameRequestError {
    pub fn kind(&self) -> &'static str {
        match self {
            FrameRequestError::MissingFrame | FrameRequestError::InvalidBody { .. } => {
                "ValidationError"
            }
            FrameRequestError::Pipeline(e) => e.kind(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            FrameRequestError::MissingFrame => StatusCode::BAD_REQUEST,
            FrameRequestError::InvalidBody { status, .. } => *status,
            FrameRequestError::Pipeline(e) if e.is_oversize() => StatusCode::PAYLOAD_TOO_LARGE,
            FrameRequestError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn invalid_body(status: StatusCode, message: String) -> Self {
        let status = match status {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        FrameRequestError::InvalidBody { status, message }
    }
}

impl From<JsonRejection> for FrameRequestError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_body(rejection.status(), rejection.body_text())
    }
}

impl From<FormRejection> for FrameRequestError {
    fn from(rejection: FormRejection) -> Self {
        Self::invalid_body(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for FrameRequestError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

/// Frame upload body, read as a form when the client sends
/// `application/x-www-form-urlencoded` and as JSON otherwise.
pub struct FrameBody(pub FrameRequest);

impl<S> FromRequest<S> for FrameBody
where
    S: Send + Sync,
{
    type Rejection = FrameRequestError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(request) = Form::<FrameRequest>::from_request(req, state).await?;
            Ok(FrameBody(request))
        } else {
            let Json(request) = Json::<FrameRequest>::from_request(req, state).await?;
            Ok(FrameBody(request))
        }
    }
}

#[instrument(skip(state, body))]
pub async fn upload_frame(
    State(state): State<SharedState>,
    body: Result<FrameBody, FrameRequestError>,
) -> Result<Json<FrameResponse>, FrameRequestError> {
    state.metrics.record_request(ROUTE);

    let result = process_request(&state, body).await.inspect_err(|e| {
        tracing::error!(kind = e.kind(), "Error handling frame upload: {}", e);
        state.metrics.record_failure(ROUTE, e.kind());
    })?;

    Ok(Json(FrameResponse {
        status: "success",
        result,
    }))
}

async fn process_request(
    state: &SharedState,
    body: Result<FrameBody, FrameRequestError>,
) -> Result<InferenceResult, FrameRequestError> {
    let FrameBody(request) = body?;
    let frame = request
        .frame
        .filter(|frame| !frame.is_empty())
        .ok_or(FrameRequestError::MissingFrame)?;

    let started = Instant::now();
    let outcome = state.pipeline.process(&frame).await;
    state
        .metrics
        .record_inference_duration(started.elapsed().as_millis() as u64, ROUTE);

    Ok(outcome?)
}
