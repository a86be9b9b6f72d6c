use rollcall_hw::{CameraError, CaptureError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("face not detected{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    NoFaceDetected { message: Option<String> },
    #[error("recognition service returned a malformed encoding")]
    MalformedEncoding,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("capture three accepted photos before registering")]
    IncompleteCapture,
    #[error("capture or supply an image first")]
    NoImage,
}

/// Transport-level or contract-level failure talking to a backend service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service unreachable: {0}")]
    Unreachable(String),
    #[error("unexpected service response: {0}")]
    Unexpected(String),
}

/// Any failure surfaced by an enrollment or recognition session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Capture(CaptureError),
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("registration failed: {0}")]
    RegistrationRejected(String),
    #[error("attendance session failed: {0}")]
    SessionRejected(String),
    #[error("cannot {action} while {phase}")]
    InvalidState {
        action: &'static str,
        phase: &'static str,
    },
}

impl From<CaptureError> for SessionError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::Camera(camera) => SessionError::Camera(camera),
            other => SessionError::Capture(other),
        }
    }
}

impl SessionError {
    /// Whether re-invoking the same action (after user correction such as
    /// re-acquiring the camera or retaking a photo) can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Camera(_)
            | SessionError::Capture(_)
            | SessionError::Recognition(_)
            | SessionError::Service(_)
            | SessionError::SessionRejected(_) => true,
            SessionError::Validation(_)
            | SessionError::RegistrationRejected(_)
            | SessionError::InvalidState { .. } => false,
        }
    }
}
