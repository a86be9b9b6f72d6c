//! Single-shot classroom recognition.
//!
//! One image (captured live or supplied from a file) is staged, then sent
//! with the classroom id to the attendance session service. Failures keep the
//! staged image so the caller can resubmit or retake; nothing is retried
//! implicitly.

use crate::error::{ServiceError, SessionError, ValidationError};
use crate::services::{AttendanceSessionService, SessionReply};
use crate::types::AttendanceSession;
use chrono::Utc;
use rollcall_hw::{capture_frame, CameraHandle, CaptureError, CapturedImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Staged,
    Submitting,
    Recorded,
    Cancelled,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Empty => "no image is staged",
            Phase::Staged => "an image is staged",
            Phase::Submitting => "submitting",
            Phase::Recorded => "recorded",
            Phase::Cancelled => "cancelled",
        }
    }
}

enum State {
    Empty,
    Staged { image: CapturedImage },
    Submitting { attempt: u64 },
    Recorded(AttendanceSession),
    Cancelled,
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::Empty => Phase::Empty,
            State::Staged { .. } => Phase::Staged,
            State::Submitting { .. } => Phase::Submitting,
            State::Recorded(_) => Phase::Recorded,
            State::Cancelled => Phase::Cancelled,
        }
    }
}

/// A staged image on its way to the attendance session service.
#[derive(Debug)]
pub struct PendingRecognition {
    attempt: u64,
    classroom_id: String,
    image: CapturedImage,
}

impl PendingRecognition {
    pub fn classroom_id(&self) -> &str {
        &self.classroom_id
    }

    pub fn image(&self) -> &CapturedImage {
        &self.image
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Recorded(AttendanceSession),
    /// The reply belonged to a session state that no longer exists.
    Ignored,
}

/// Recognition session for one classroom.
pub struct RecognitionSession {
    classroom_id: String,
    camera: Option<CameraHandle>,
    state: State,
    attempts: u64,
    last_error: Option<String>,
}

impl RecognitionSession {
    /// `camera` is optional: a session fed only with uploaded files never
    /// needs the device.
    pub fn new(classroom_id: impl Into<String>, camera: Option<CameraHandle>) -> Self {
        let classroom_id = classroom_id.into();
        tracing::debug!(classroom = %classroom_id, has_camera = camera.is_some(), "recognition session started");
        Self {
            classroom_id,
            camera,
            state: State::Empty,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn classroom_id(&self) -> &str {
        &self.classroom_id
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// The staged image.
    pub fn preview(&self) -> Option<&CapturedImage> {
        match &self.state {
            State::Staged { image } => Some(image),
            _ => None,
        }
    }

    /// The recorded session, once recognition succeeded.
    pub fn recorded(&self) -> Option<&AttendanceSession> {
        match &self.state {
            State::Recorded(session) => Some(session),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn camera(&self) -> Option<&CameraHandle> {
        self.camera.as_ref()
    }

    pub fn camera_mut(&mut self) -> Option<&mut CameraHandle> {
        self.camera.as_mut()
    }

    /// Replace a lost or missing camera.
    pub fn attach_camera(&mut self, camera: CameraHandle) -> Result<(), SessionError> {
        if !matches!(self.state, State::Empty | State::Staged { .. }) {
            return Err(self.invalid("attach a camera"));
        }
        self.release_camera();
        self.camera = Some(camera);
        Ok(())
    }

    /// Stage a frame from the live camera.
    pub fn capture(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state, State::Empty) {
            return Err(self.invalid("capture"));
        }

        let captured = match self.camera.as_mut() {
            Some(camera) => capture_frame(camera),
            None => Err(CaptureError::NotReady),
        };

        match captured {
            Ok(image) => {
                tracing::debug!(width = image.width(), height = image.height(), "classroom image captured");
                self.stage(image);
                Ok(())
            }
            Err(e) => {
                if matches!(e, CaptureError::Camera(_)) {
                    self.release_camera();
                }
                Err(self.fail_with(e.into()))
            }
        }
    }

    /// Stage an image the user supplied (e.g. an uploaded file).
    pub fn stage_image(&mut self, image: CapturedImage) -> Result<(), SessionError> {
        if !matches!(self.state, State::Empty) {
            return Err(self.invalid("stage an image"));
        }
        tracing::debug!(width = image.width(), height = image.height(), "classroom image supplied");
        self.stage(image);
        Ok(())
    }

    /// Discard the staged image so a new one can be captured or supplied.
    pub fn retake(&mut self) -> Result<(), SessionError> {
        match self.state {
            State::Staged { .. } | State::Empty => {
                self.state = State::Empty;
                self.last_error = None;
                Ok(())
            }
            _ => Err(self.invalid("retake")),
        }
    }

    /// Move the staged image to `Submitting`. Fails with `NoImage` when
    /// nothing is staged.
    pub fn begin_submit(&mut self) -> Result<PendingRecognition, SessionError> {
        let image = match std::mem::replace(&mut self.state, State::Cancelled) {
            State::Staged { image } => image,
            State::Empty => {
                self.state = State::Empty;
                return Err(self.fail_with(ValidationError::NoImage.into()));
            }
            other => {
                self.state = other;
                return Err(self.invalid("submit"));
            }
        };

        self.attempts += 1;
        let attempt = self.attempts;
        self.last_error = None;
        tracing::debug!(attempt, classroom = %self.classroom_id, "submitting classroom image");
        self.state = State::Submitting { attempt };

        Ok(PendingRecognition {
            attempt,
            classroom_id: self.classroom_id.clone(),
            image,
        })
    }

    /// Apply the attendance session service's reply.
    ///
    /// On failure the image stays staged for another attempt.
    pub fn complete_submit(
        &mut self,
        pending: PendingRecognition,
        reply: Result<SessionReply, ServiceError>,
    ) -> Result<RecognitionOutcome, SessionError> {
        match std::mem::replace(&mut self.state, State::Cancelled) {
            State::Submitting { attempt } if attempt == pending.attempt => {}
            other => {
                tracing::warn!(
                    attempt = pending.attempt,
                    phase = ?other.phase(),
                    "ignoring stale attendance session reply"
                );
                self.state = other;
                return Ok(RecognitionOutcome::Ignored);
            }
        }

        let image = pending.image;
        match reply {
            Ok(reply) if reply.success => {
                let session = AttendanceSession {
                    classroom_id: self.classroom_id.clone(),
                    present_members: reply.present.into_iter().collect(),
                    timestamp: Utc::now(),
                };
                tracing::info!(
                    classroom = %self.classroom_id,
                    present = session.present_count(),
                    "attendance recorded"
                );
                self.state = State::Recorded(session.clone());
                self.release_camera();
                Ok(RecognitionOutcome::Recorded(session))
            }
            Ok(reply) => {
                self.state = State::Staged { image };
                let message = reply
                    .message
                    .unwrap_or_else(|| "Error processing attendance.".to_string());
                tracing::info!(classroom = %self.classroom_id, %message, "attendance session rejected");
                Err(self.fail_with(SessionError::SessionRejected(message)))
            }
            Err(e) => {
                self.state = State::Staged { image };
                Err(self.fail_with(e.into()))
            }
        }
    }

    /// Submit the staged image to `service`.
    pub async fn submit_for_recognition(
        &mut self,
        service: &dyn AttendanceSessionService,
    ) -> Result<RecognitionOutcome, SessionError> {
        let pending = self.begin_submit()?;
        let reply = service
            .recognize_classroom(pending.image(), pending.classroom_id())
            .await;
        self.complete_submit(pending, reply)
    }

    /// Abandon the session and release the camera. A recorded result is kept.
    pub fn cancel(&mut self) {
        if !matches!(self.state, State::Recorded(_)) {
            tracing::info!(classroom = %self.classroom_id, phase = ?self.phase(), "recognition session cancelled");
            self.state = State::Cancelled;
        }
        self.release_camera();
    }

    fn stage(&mut self, image: CapturedImage) {
        self.state = State::Staged { image };
        self.last_error = None;
    }

    fn release_camera(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.release();
        }
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidState {
            action,
            phase: self.phase().as_str(),
        }
    }

    fn fail_with(&mut self, err: SessionError) -> SessionError {
        self.last_error = Some(err.to_string());
        err
    }
}

impl std::fmt::Debug for RecognitionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionSession")
            .field("classroom_id", &self.classroom_id)
            .field("phase", &self.phase())
            .field("camera", &self.camera)
            .field("last_error", &self.last_error)
            .finish()
    }
}
