//! HTTP client for the attendance backend.
//!
//! Endpoints:
//! - `POST /generate-face-id` multipart `file` -> single-face encoding
//! - `POST /save-face-id` JSON -> registration
//! - `POST /attendance/face-session` multipart `file` + `class_id` -> present list
//! - `GET /class/{id}` -> classroom metadata
//! - `GET /class/{id}/attendance/today` -> today's records

use crate::wire::{
    AttendanceTodayResponse, ClassroomResponse, EncodeResponse, FaceSessionResponse,
    SaveFaceIdRequest, SaveFaceIdResponse,
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use rollcall_core::services::{
    AttendanceRecord, AttendanceSessionService, ClassroomDataService, ClassroomInfo, EncodeReply,
    RecognitionService, RegistrationReply, RegistrationRequest, RegistrationService, SessionReply,
};
use rollcall_core::ServiceError;
use rollcall_hw::CapturedImage;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Client for every backend service the session workflow uses.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base", &self.base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ApiClient {
    pub fn new(
        base: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Unexpected(format!("failed to build HTTP client: {e}")))?;

        let base = base.into().trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<Response, ServiceError> {
        let response = request.send().await.map_err(transport_error)?;
        tracing::debug!(endpoint, status = %response.status(), "backend replied");
        Ok(response)
    }
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        ServiceError::Unreachable(e.to_string())
    } else {
        ServiceError::Unexpected(e.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
    let status = response.status();
    let body = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&body)
        .map_err(|e| ServiceError::Unexpected(format!("HTTP {status}: undecodable body: {e}")))
}

fn image_part(image: &CapturedImage, stem: &str) -> Result<Part, ServiceError> {
    Part::bytes(image.bytes().to_vec())
        .file_name(format!("{stem}.{}", image.extension()))
        .mime_str(image.mime_type())
        .map_err(|e| ServiceError::Unexpected(format!("invalid image MIME type: {e}")))
}

fn class_path(classroom_id: &str, suffix: &str) -> Result<String, ServiceError> {
    let valid = !classroom_id.is_empty()
        && classroom_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ServiceError::Unexpected(format!(
            "invalid classroom id {classroom_id:?}"
        )));
    }
    Ok(format!("/class/{classroom_id}{suffix}"))
}

#[async_trait]
impl RecognitionService for ApiClient {
    async fn encode_face(&self, image: &CapturedImage) -> Result<EncodeReply, ServiceError> {
        let form = Form::new().part("file", image_part(image, "face")?);
        let request = self.http.post(self.url("/generate-face-id")).multipart(form);
        let response = self.send(request, "generate-face-id").await?;

        let reply: EncodeResponse = read_json(response).await?;
        Ok(reply.into())
    }
}

#[async_trait]
impl RegistrationService for ApiClient {
    async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationReply, ServiceError> {
        let body = SaveFaceIdRequest::from(request);
        let http_request = self.http.post(self.url("/save-face-id")).json(&body);
        let response = self.send(http_request, "save-face-id").await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ServiceError::Unexpected(format!("HTTP {status}")));
        }
        let reply: SaveFaceIdResponse = read_json(response).await?;
        Ok(reply.into_reply(status.is_success()))
    }
}

#[async_trait]
impl AttendanceSessionService for ApiClient {
    async fn recognize_classroom(
        &self,
        image: &CapturedImage,
        classroom_id: &str,
    ) -> Result<SessionReply, ServiceError> {
        let form = Form::new()
            .part("file", image_part(image, "classroom")?)
            .text("class_id", classroom_id.to_string());
        let request = self.authorized(
            self.http
                .post(self.url("/attendance/face-session"))
                .multipart(form),
        );
        let response = self.send(request, "attendance/face-session").await?;

        let reply: FaceSessionResponse = read_json(response).await?;
        Ok(reply.into())
    }
}

#[async_trait]
impl ClassroomDataService for ApiClient {
    async fn classroom(&self, classroom_id: &str) -> Result<Option<ClassroomInfo>, ServiceError> {
        let path = class_path(classroom_id, "")?;
        let request = self.authorized(self.http.get(self.url(&path)));
        let response = self.send(request, "class").await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                tracing::info!(
                    classroom = classroom_id,
                    status = %response.status(),
                    "classroom not visible"
                );
                return Ok(None);
            }
            s if !s.is_success() => return Err(ServiceError::Unexpected(format!("HTTP {s}"))),
            _ => {}
        }

        let reply: ClassroomResponse = read_json(response).await?;
        Ok(reply.into_info(classroom_id))
    }

    async fn attendance_today(
        &self,
        classroom_id: &str,
    ) -> Result<Vec<AttendanceRecord>, ServiceError> {
        let path = class_path(classroom_id, "/attendance/today")?;
        let request = self.authorized(self.http.get(self.url(&path)));
        let response = self.send(request, "class/attendance/today").await?;

        if !response.status().is_success() {
            tracing::warn!(
                classroom = classroom_id,
                status = %response.status(),
                "attendance query failed, treating as no records"
            );
            return Ok(Vec::new());
        }

        let reply: AttendanceTodayResponse = read_json(response).await?;
        Ok(reply.into_records())
    }
}
