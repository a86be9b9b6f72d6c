//! Three-shot face enrollment.
//!
//! Each shot is captured from the session's camera and validated by the
//! recognition service. Accepted encodings are append-only: a rejected or
//! failed shot retries the same slot and never touches earlier ones. Once
//! three shots are accepted the camera is released and only registration or
//! cancellation remain.
//!
//! Every network round-trip is split into `begin_*` / `complete_*` so that a
//! reply arriving after the session moved on (cancelled, or superseded) can
//! be recognized by its attempt number and ignored.

use crate::error::{RecognitionError, ServiceError, SessionError, ValidationError};
use crate::services::{
    EncodeReply, RecognitionService, RegistrationReply, RegistrationRequest, RegistrationService,
};
use crate::types::{FaceEncoding, Identity};
use rollcall_hw::{capture_frame, CameraHandle, CaptureError, CapturedImage};

/// Number of accepted shots required before registration.
pub const REQUIRED_SHOTS: usize = 3;

/// An accepted shot: the encoding plus the image shown in its preview slot.
#[derive(Debug, Clone)]
pub struct Shot {
    pub encoding: FaceEncoding,
    pub preview: CapturedImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Validating,
    Ready,
    Submitting,
    Registered,
    Failed,
    Cancelled,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Validating => "validating a shot",
            Phase::Ready => "ready to register",
            Phase::Submitting => "registering",
            Phase::Registered => "registered",
            Phase::Failed => "failed",
            Phase::Cancelled => "cancelled",
        }
    }
}

enum State {
    /// Fewer than three shots accepted; the next capture fills `shots.len()`.
    Idle { shots: Vec<Shot> },
    Validating { shots: Vec<Shot>, attempt: u64 },
    Ready { shots: Box<[Shot; REQUIRED_SHOTS]> },
    Submitting {
        shots: Box<[Shot; REQUIRED_SHOTS]>,
        attempt: u64,
    },
    Registered,
    Failed { message: String },
    Cancelled,
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::Idle { .. } => Phase::Idle,
            State::Validating { .. } => Phase::Validating,
            State::Ready { .. } => Phase::Ready,
            State::Submitting { .. } => Phase::Submitting,
            State::Registered => Phase::Registered,
            State::Failed { .. } => Phase::Failed,
            State::Cancelled => Phase::Cancelled,
        }
    }

    fn shots(&self) -> &[Shot] {
        match self {
            State::Idle { shots } | State::Validating { shots, .. } => shots.as_slice(),
            State::Ready { shots } | State::Submitting { shots, .. } => shots.as_slice(),
            State::Registered | State::Failed { .. } | State::Cancelled => &[],
        }
    }
}

/// A captured shot awaiting the recognition service's verdict.
#[derive(Debug)]
pub struct PendingShot {
    attempt: u64,
    slot: usize,
    image: CapturedImage,
}

impl PendingShot {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn image(&self) -> &CapturedImage {
        &self.image
    }
}

/// A registration request awaiting the registration service's reply.
#[derive(Debug)]
pub struct PendingRegistration {
    attempt: u64,
    request: RegistrationRequest,
}

impl PendingRegistration {
    pub fn request(&self) -> &RegistrationRequest {
        &self.request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotOutcome {
    /// The shot filled `slot`; `ready` once all three slots are filled.
    Accepted { slot: usize, ready: bool },
    /// The reply belonged to a session state that no longer exists.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Registered,
    Ignored,
}

/// In-progress enrollment for one identity.
pub struct EnrollmentSession {
    identity: Identity,
    camera: Option<CameraHandle>,
    state: State,
    attempts: u64,
    last_error: Option<String>,
}

impl EnrollmentSession {
    /// Start enrolling `identity` with an acquired camera. The camera may
    /// still be opening; captures fail with `NotReady` until it is ready.
    pub fn new(identity: Identity, camera: CameraHandle) -> Self {
        tracing::debug!(email = %identity.email, "enrollment session started");
        Self {
            identity,
            camera: Some(camera),
            state: State::Idle { shots: Vec::new() },
            attempts: 0,
            last_error: None,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Number of accepted shots. Authoritative for progress.
    pub fn accepted(&self) -> usize {
        self.state.shots().len()
    }

    /// Slot the next capture fills, while captures are allowed.
    pub fn current_slot(&self) -> Option<usize> {
        match &self.state {
            State::Idle { shots } | State::Validating { shots, .. } => Some(shots.len()),
            _ => None,
        }
    }

    /// Accepted encodings in acceptance order.
    pub fn encodings(&self) -> impl Iterator<Item = &FaceEncoding> {
        self.state.shots().iter().map(|s| &s.encoding)
    }

    /// Preview thumbnails by slot; empty slots are `None`.
    pub fn previews(&self) -> [Option<&CapturedImage>; REQUIRED_SHOTS] {
        let shots = self.state.shots();
        std::array::from_fn(|i| shots.get(i).map(|s| &s.preview))
    }

    /// Message for the most recent failed action, cleared on success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Failure message from the registration service, once `Failed`.
    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            State::Failed { message } => Some(message),
            _ => None,
        }
    }

    pub fn camera(&self) -> Option<&CameraHandle> {
        self.camera.as_ref()
    }

    /// Mutable access for readiness polling by the driver.
    pub fn camera_mut(&mut self) -> Option<&mut CameraHandle> {
        self.camera.as_mut()
    }

    /// Replace a lost or released camera. Only while shots are still needed.
    pub fn attach_camera(&mut self, camera: CameraHandle) -> Result<(), SessionError> {
        if !matches!(self.state, State::Idle { .. }) {
            return Err(self.invalid("attach a camera"));
        }
        self.release_camera();
        self.camera = Some(camera);
        Ok(())
    }

    /// Capture a frame for the current slot and move to `Validating`.
    ///
    /// A camera that is not ready fails with `NotReady` and consumes no
    /// slot. A camera lost mid-session is released; a new one must be
    /// attached with [`attach_camera`](Self::attach_camera).
    pub fn begin_capture(&mut self) -> Result<PendingShot, SessionError> {
        let shots = match std::mem::replace(&mut self.state, State::Cancelled) {
            State::Idle { shots } => shots,
            other => {
                self.state = other;
                return Err(self.invalid("capture"));
            }
        };

        let captured = match self.camera.as_mut() {
            Some(camera) => capture_frame(camera),
            None => Err(CaptureError::NotReady),
        };

        let image = match captured {
            Ok(image) => image,
            Err(e) => {
                self.state = State::Idle { shots };
                if matches!(e, CaptureError::Camera(_)) {
                    self.release_camera();
                }
                let err = SessionError::from(e);
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        self.attempts += 1;
        let attempt = self.attempts;
        let slot = shots.len();
        self.state = State::Validating { shots, attempt };
        self.last_error = None;
        tracing::debug!(slot, attempt, "shot captured, validating");

        Ok(PendingShot {
            attempt,
            slot,
            image,
        })
    }

    /// Apply the recognition service's verdict for a pending shot.
    ///
    /// A reply for an attempt that is no longer current leaves the session
    /// untouched and yields [`ShotOutcome::Ignored`].
    pub fn complete_capture(
        &mut self,
        pending: PendingShot,
        reply: Result<EncodeReply, ServiceError>,
    ) -> Result<ShotOutcome, SessionError> {
        let mut shots = match std::mem::replace(&mut self.state, State::Cancelled) {
            State::Validating { shots, attempt } if attempt == pending.attempt => shots,
            other => {
                tracing::warn!(
                    attempt = pending.attempt,
                    phase = ?other.phase(),
                    "ignoring stale recognition reply"
                );
                self.state = other;
                return Ok(ShotOutcome::Ignored);
            }
        };
        let slot = shots.len();

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                self.state = State::Idle { shots };
                return Err(self.fail_with(e.into()));
            }
        };

        if !reply.success {
            self.state = State::Idle { shots };
            tracing::info!(slot, "shot rejected: no face detected");
            return Err(self.fail_with(
                RecognitionError::NoFaceDetected {
                    message: reply.message,
                }
                .into(),
            ));
        }

        let Some(encoding) = reply.encoding.as_ref().and_then(FaceEncoding::from_wire) else {
            self.state = State::Idle { shots };
            tracing::warn!(slot, "shot rejected: malformed encoding in successful reply");
            return Err(self.fail_with(RecognitionError::MalformedEncoding.into()));
        };

        shots.push(Shot {
            encoding,
            preview: pending.image,
        });
        self.last_error = None;

        match <[Shot; REQUIRED_SHOTS]>::try_from(shots) {
            Ok(full) => {
                self.state = State::Ready {
                    shots: Box::new(full),
                };
                self.release_camera();
                tracing::info!(slot, "final shot accepted, ready to register");
                Ok(ShotOutcome::Accepted { slot, ready: true })
            }
            Err(shots) => {
                self.state = State::Idle { shots };
                tracing::info!(slot, "shot accepted");
                Ok(ShotOutcome::Accepted { slot, ready: false })
            }
        }
    }

    /// Capture the current slot and validate it with `service`.
    pub async fn capture_and_validate(
        &mut self,
        service: &dyn RecognitionService,
    ) -> Result<ShotOutcome, SessionError> {
        let pending = self.begin_capture()?;
        let reply = service.encode_face(pending.image()).await;
        self.complete_capture(pending, reply)
    }

    /// Package identity and the three encodings (in acceptance order) and
    /// move to `Submitting`. Anything short of three accepted shots fails
    /// with `IncompleteCapture`.
    pub fn begin_submit(&mut self) -> Result<PendingRegistration, SessionError> {
        let shots = match std::mem::replace(&mut self.state, State::Cancelled) {
            State::Ready { shots } => shots,
            other @ State::Submitting { .. } => {
                self.state = other;
                return Err(self.invalid("register"));
            }
            other => {
                self.state = other;
                let err = SessionError::from(ValidationError::IncompleteCapture);
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        let encodings: [FaceEncoding; REQUIRED_SHOTS] =
            std::array::from_fn(|i| shots[i].encoding.clone());
        self.attempts += 1;
        let attempt = self.attempts;
        self.state = State::Submitting { shots, attempt };
        self.last_error = None;
        tracing::debug!(attempt, email = %self.identity.email, "submitting registration");

        Ok(PendingRegistration {
            attempt,
            request: RegistrationRequest {
                identity: self.identity.clone(),
                encodings,
            },
        })
    }

    /// Apply the registration service's reply.
    ///
    /// A business rejection is final (`Failed`); a transport failure returns
    /// to `Ready` so the same registration can be re-invoked.
    pub fn complete_submit(
        &mut self,
        pending: PendingRegistration,
        reply: Result<RegistrationReply, ServiceError>,
    ) -> Result<SubmitOutcome, SessionError> {
        let shots = match std::mem::replace(&mut self.state, State::Cancelled) {
            State::Submitting { shots, attempt } if attempt == pending.attempt => shots,
            other => {
                tracing::warn!(
                    attempt = pending.attempt,
                    phase = ?other.phase(),
                    "ignoring stale registration reply"
                );
                self.state = other;
                return Ok(SubmitOutcome::Ignored);
            }
        };

        match reply {
            Ok(reply) if reply.saved => {
                self.state = State::Registered;
                self.release_camera();
                tracing::info!(email = %self.identity.email, "registration saved");
                Ok(SubmitOutcome::Registered)
            }
            Ok(reply) => {
                let message = reply.message.unwrap_or_else(|| "Unknown error".to_string());
                tracing::warn!(email = %self.identity.email, %message, "registration rejected");
                self.state = State::Failed {
                    message: message.clone(),
                };
                self.release_camera();
                Err(self.fail_with(SessionError::RegistrationRejected(message)))
            }
            Err(e) => {
                self.state = State::Ready { shots };
                Err(self.fail_with(e.into()))
            }
        }
    }

    /// Register with `service`.
    pub async fn submit(
        &mut self,
        service: &dyn RegistrationService,
    ) -> Result<SubmitOutcome, SessionError> {
        let pending = self.begin_submit()?;
        let reply = service.register(pending.request()).await;
        self.complete_submit(pending, reply)
    }

    /// Abandon the session: discard shots and release the camera. Terminal
    /// outcomes (`Registered`, `Failed`) are kept.
    pub fn cancel(&mut self) {
        if !matches!(self.state, State::Registered | State::Failed { .. }) {
            tracing::info!(phase = ?self.phase(), accepted = self.accepted(), "enrollment cancelled");
            self.state = State::Cancelled;
        }
        self.release_camera();
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

impl std::fmt::Debug for EnrollmentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentSession")
            .field("identity", &self.identity)
            .field("phase", &self.phase())
            .field("accepted", &self.accepted())
            .field("camera", &self.camera)
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use rollcall_hw::{CameraError, CaptureError};
    use std::sync::atomic::Ordering;

    fn identity() -> Identity {
        Identity::new("A", "a@x.com", "secret")
    }

    async fn enroll_three(session: &mut EnrollmentSession) {
        let service = ScriptedRecognition::new([
            Ok(encoding_reply(1.0)),
            Ok(encoding_reply(2.0)),
            Ok(encoding_reply(3.0)),
        ]);
        for _ in 0..REQUIRED_SHOTS {
            session.capture_and_validate(&service).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_three_accepts_reach_ready_and_release_camera() {
        let (manager, control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        let service = ScriptedRecognition::new([
            Ok(encoding_reply(1.0)),
            Ok(encoding_reply(2.0)),
            Ok(encoding_reply(3.0)),
        ]);

        assert_eq!(
            session.capture_and_validate(&service).await.unwrap(),
            ShotOutcome::Accepted { slot: 0, ready: false }
        );
        assert_eq!(session.current_slot(), Some(1));
        assert_eq!(
            session.capture_and_validate(&service).await.unwrap(),
            ShotOutcome::Accepted { slot: 1, ready: false }
        );
        assert_eq!(
            session.capture_and_validate(&service).await.unwrap(),
            ShotOutcome::Accepted { slot: 2, ready: true }
        );

        assert_eq!(session.phase(), Phase::Ready);
        assert_eq!(session.accepted(), 3);
        assert_eq!(session.current_slot(), None);
        assert!(session.previews().iter().all(Option::is_some));
        assert!(session.camera().is_none());
        assert!(!manager.is_in_use());
        assert_eq!(control.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_after_ready_is_refused() {
        let (manager, _control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        enroll_three(&mut session).await;

        let service = ScriptedRecognition::new([Ok(encoding_reply(9.0))]);
        let err = session.capture_and_validate(&service).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.accepted(), 3);
    }

    #[tokio::test]
    async fn test_rejection_retries_same_slot() {
        let (manager, _control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        let service = ScriptedRecognition::new([
            Ok(encoding_reply(1.0)),
            Ok(no_face_reply()),
            Ok(encoding_reply(2.0)),
        ]);

        session.capture_and_validate(&service).await.unwrap();
        let first = session.encodings().cloned().collect::<Vec<_>>();

        let err = session.capture_and_validate(&service).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Recognition(RecognitionError::NoFaceDetected { .. })
        ));
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.accepted(), 1);
        assert_eq!(session.current_slot(), Some(1));
        assert!(session.previews()[1].is_none());
        assert_eq!(session.encodings().cloned().collect::<Vec<_>>(), first);
        assert!(session.last_error().is_some());

        assert_eq!(
            session.capture_and_validate(&service).await.unwrap(),
            ShotOutcome::Accepted { slot: 1, ready: false }
        );
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn test_malformed_encoding_is_rejected() {
        let (manager, _control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        let service = ScriptedRecognition::new([
            Ok(EncodeReply {
                success: true,
                encoding: None,
                message: None,
            }),
            Ok(EncodeReply {
                success: true,
                encoding: Some(serde_json::json!({"not": "a vector"})),
                message: None,
            }),
        ]);

        for _ in 0..2 {
            let err = session.capture_and_validate(&service).await.unwrap_err();
            assert!(matches!(
                err,
                SessionError::Recognition(RecognitionError::MalformedEncoding)
            ));
        }
        assert_eq!(session.accepted(), 0);
    }

    #[tokio::test]
    async fn test_service_failure_keeps_progress() {
        let (manager, _control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        let service = ScriptedRecognition::new([
            Ok(encoding_reply(1.0)),
            Err(ServiceError::Unreachable("connection refused".into())),
        ]);

        session.capture_and_validate(&service).await.unwrap();
        let err = session.capture_and_validate(&service).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.accepted(), 1);
    }

    #[tokio::test]
    async fn test_accepted_count_is_monotonic_and_bounded() {
        let (manager, _control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        let service = ScriptedRecognition::new([
            Ok(no_face_reply()),
            Ok(encoding_reply(1.0)),
            Err(ServiceError::Unexpected("bad json".into())),
            Ok(no_face_reply()),
            Ok(encoding_reply(2.0)),
            Ok(EncodeReply::default()),
            Ok(encoding_reply(3.0)),
            Ok(encoding_reply(4.0)),
            Ok(encoding_reply(5.0)),
        ]);

        let mut previous = 0;
        for _ in 0..9 {
            let _ = session.capture_and_validate(&service).await;
            let now = session.accepted();
            assert!(now >= previous);
            assert!(now <= REQUIRED_SHOTS);
            previous = now;
        }
        assert_eq!(session.accepted(), 3);
        // The last two scripted replies are never requested.
        assert_eq!(service.calls.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_capture_before_ready_consumes_no_slot() {
        let (manager, _control) = fake_camera();
        let handle = manager.acquire().unwrap();
        let mut session = EnrollmentSession::new(identity(), handle);

        let err = session.begin_capture().unwrap_err();
        assert!(matches!(err, SessionError::Capture(CaptureError::NotReady)));
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.current_slot(), Some(0));

        session.camera_mut().unwrap().poll_ready().unwrap();
        assert!(session.begin_capture().is_ok());
    }

    #[test]
    fn test_undersized_frames_are_not_ready() {
        let (manager, _control) = sized_camera(40, 30);
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        assert!(matches!(
            session.begin_capture(),
            Err(SessionError::Capture(CaptureError::NotReady))
        ));
    }

    #[test]
    fn test_no_second_capture_while_validating() {
        let (manager, _control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        let _pending = session.begin_capture().unwrap();
        assert!(matches!(
            session.begin_capture(),
            Err(SessionError::InvalidState { .. })
        ));
        assert_eq!(session.phase(), Phase::Validating);
    }

    #[test]
    fn test_device_loss_requires_new_camera() {
        let (manager, control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        control.unplugged.store(true, Ordering::SeqCst);

        let err = session.begin_capture().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Camera(CameraError::DeviceUnavailable(_))
        ));
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.camera().is_none());
        assert!(!manager.is_in_use());

        // Without a camera every capture is refused as not ready.
        assert!(matches!(
            session.begin_capture(),
            Err(SessionError::Capture(CaptureError::NotReady))
        ));

        control.unplugged.store(false, Ordering::SeqCst);
        session.attach_camera(ready_handle(&manager)).unwrap();
        assert!(session.begin_capture().is_ok());
    }

    #[tokio::test]
    async fn test_submit_incomplete_makes_no_call() {
        let (manager, _control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        let registration = RecordingRegistration::saving();

        let err = session.submit(&registration).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::IncompleteCapture)
        ));

        let service = ScriptedRecognition::new([Ok(encoding_reply(1.0)), Ok(encoding_reply(2.0))]);
        session.capture_and_validate(&service).await.unwrap();
        session.capture_and_validate(&service).await.unwrap();
        let err = session.submit(&registration).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::IncompleteCapture)
        ));

        // Also while a shot is in flight.
        let _pending = session.begin_capture().unwrap();
        assert!(matches!(
            session.begin_submit(),
            Err(SessionError::Validation(ValidationError::IncompleteCapture))
        ));
        assert_eq!(registration.call_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_sends_encodings_in_capture_order() {
        let (manager, control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        enroll_three(&mut session).await;

        let registration = RecordingRegistration::saving();
        assert_eq!(
            session.submit(&registration).await.unwrap(),
            SubmitOutcome::Registered
        );
        assert_eq!(session.phase(), Phase::Registered);

        let requests = registration.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].identity.name, "A");
        assert_eq!(requests[0].identity.email, "a@x.com");
        let firsts: Vec<f64> = requests[0].encodings.iter().map(|e| e.values()[0]).collect();
        assert_eq!(firsts, vec![1.0, 2.0, 3.0]);
        assert_eq!(control.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_business_rejection_is_final() {
        let (manager, _control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        enroll_three(&mut session).await;

        let registration = RecordingRegistration::answering(Ok(RegistrationReply {
            saved: false,
            message: Some("Email already registered".into()),
        }));
        let err = session.submit(&registration).await.unwrap_err();
        assert!(matches!(err, SessionError::RegistrationRejected(ref m) if m == "Email already registered"));
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(session.failure(), Some("Email already registered"));

        // No partial resubmit.
        assert!(session.submit(&registration).await.is_err());
        assert_eq!(registration.call_count(), 1);
        assert!(!manager.is_in_use());
    }

    #[tokio::test]
    async fn test_transport_failure_allows_resubmit() {
        let (manager, _control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        enroll_three(&mut session).await;

        let down = RecordingRegistration::answering(Err(ServiceError::Unreachable(
            "connection refused".into(),
        )));
        assert!(matches!(
            session.submit(&down).await,
            Err(SessionError::Service(_))
        ));
        assert_eq!(session.phase(), Phase::Ready);

        let up = RecordingRegistration::saving();
        assert_eq!(session.submit(&up).await.unwrap(), SubmitOutcome::Registered);
    }

    #[test]
    fn test_cancel_ignores_late_recognition_reply() {
        let (manager, control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));

        let pending = session.begin_capture().unwrap();
        session.cancel();
        assert_eq!(session.phase(), Phase::Cancelled);
        assert!(!manager.is_in_use());

        let outcome = session
            .complete_capture(pending, Ok(encoding_reply(1.0)))
            .unwrap();
        assert_eq!(outcome, ShotOutcome::Ignored);
        assert_eq!(session.phase(), Phase::Cancelled);
        assert_eq!(session.accepted(), 0);
        assert_eq!(control.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_ignores_late_registration_reply() {
        let (manager, _control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        enroll_three(&mut session).await;

        let pending = session.begin_submit().unwrap();
        session.cancel();
        let outcome = session
            .complete_submit(
                pending,
                Ok(RegistrationReply {
                    saved: true,
                    message: None,
                }),
            )
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Ignored);
        assert_eq!(session.phase(), Phase::Cancelled);
    }

    #[test]
    fn test_cancel_twice_is_safe() {
        let (manager, control) = fake_camera();
        let mut session = EnrollmentSession::new(identity(), ready_handle(&manager));
        session.cancel();
        session.cancel();
        assert_eq!(control.stopped.load(Ordering::SeqCst), 1);
        assert!(manager.acquire().is_ok());
    }

    #[test]
    fn test_drop_releases_camera() {
        let (manager, _control) = fake_camera();
        {
            let _session = EnrollmentSession::new(identity(), ready_handle(&manager));
            assert!(manager.is_in_use());
        }
        assert!(!manager.is_in_use());
    }
}
