//! Scripted camera and service fakes for session tests.

use crate::error::ServiceError;
use crate::services::{
    AttendanceSessionService, EncodeReply, RecognitionService, RegistrationReply,
    RegistrationRequest, RegistrationService, SessionReply,
};
use async_trait::async_trait;
use rollcall_hw::{
    CameraBackend, CameraDevice, CameraError, CameraHandle, CameraManager, CapturedImage, Frame,
    PixelLayout,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared switches and counters for a [`FakeBackend`] camera.
#[derive(Default)]
pub struct FakeCameraControl {
    pub stopped: AtomicUsize,
    /// When set, frame reads fail as if the track ended.
    pub unplugged: AtomicBool,
}

pub struct FakeBackend {
    pub control: Arc<FakeCameraControl>,
    pub width: u32,
    pub height: u32,
}

struct FakeDevice {
    control: Arc<FakeCameraControl>,
    width: u32,
    height: u32,
    sequence: u32,
}

impl CameraBackend for FakeBackend {
    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        Ok(Box::new(FakeDevice {
            control: Arc::clone(&self.control),
            width: self.width,
            height: self.height,
            sequence: 0,
        }))
    }

    fn describe(&self) -> String {
        "fake".into()
    }
}

impl CameraDevice for FakeDevice {
    fn poll_ready(&mut self) -> Result<Option<(u32, u32)>, CameraError> {
        Ok(Some((self.width, self.height)))
    }

    fn latest_frame(&mut self) -> Result<Frame, CameraError> {
        if self.control.unplugged.load(Ordering::SeqCst) {
            return Err(CameraError::DeviceUnavailable("track ended".into()));
        }
        self.sequence += 1;
        Ok(Frame {
            data: vec![(self.sequence * 40 % 256) as u8; (self.width * self.height) as usize],
            width: self.width,
            height: self.height,
            layout: PixelLayout::Luma8,
            timestamp: std::time::Instant::now(),
            sequence: self.sequence,
        })
    }

    fn stop(&mut self) {
        self.control.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn fake_camera() -> (CameraManager, Arc<FakeCameraControl>) {
    sized_camera(64, 64)
}

pub fn sized_camera(width: u32, height: u32) -> (CameraManager, Arc<FakeCameraControl>) {
    let control = Arc::new(FakeCameraControl::default());
    let manager = CameraManager::new(FakeBackend {
        control: Arc::clone(&control),
        width,
        height,
    });
    (manager, control)
}

pub fn ready_handle(manager: &CameraManager) -> CameraHandle {
    let mut handle = manager.acquire().unwrap();
    handle.poll_ready().unwrap();
    handle
}

pub fn encoding_reply(seed: f64) -> EncodeReply {
    EncodeReply {
        success: true,
        encoding: Some(json!([seed, seed + 0.5, seed + 1.0])),
        message: None,
    }
}

pub fn no_face_reply() -> EncodeReply {
    EncodeReply {
        success: false,
        encoding: None,
        message: Some("No face detected".into()),
    }
}

/// Recognition service answering from a script, in order.
#[derive(Default)]
pub struct ScriptedRecognition {
    replies: Mutex<VecDeque<Result<EncodeReply, ServiceError>>>,
    pub calls: AtomicUsize,
}

impl ScriptedRecognition {
    pub fn new(replies: impl IntoIterator<Item = Result<EncodeReply, ServiceError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RecognitionService for ScriptedRecognition {
    async fn encode_face(&self, _image: &CapturedImage) -> Result<EncodeReply, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Unexpected("script exhausted".into())))
    }
}

/// Registration service that records every request it receives.
pub struct RecordingRegistration {
    pub requests: Mutex<Vec<RegistrationRequest>>,
    reply: Result<RegistrationReply, ServiceError>,
}

impl RecordingRegistration {
    pub fn answering(reply: Result<RegistrationReply, ServiceError>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply,
        }
    }

    pub fn saving() -> Self {
        Self::answering(Ok(RegistrationReply {
            saved: true,
            message: None,
        }))
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl RegistrationService for RecordingRegistration {
    async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationReply, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        self.reply.clone()
    }
}

/// Attendance session service answering from a script, in order.
#[derive(Default)]
pub struct ScriptedAttendance {
    replies: Mutex<VecDeque<Result<SessionReply, ServiceError>>>,
    pub classroom_ids: Mutex<Vec<String>>,
}

impl ScriptedAttendance {
    pub fn new(replies: impl IntoIterator<Item = Result<SessionReply, ServiceError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            classroom_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.classroom_ids.lock().unwrap().len()
    }
}

#[async_trait]
impl AttendanceSessionService for ScriptedAttendance {
    async fn recognize_classroom(
        &self,
        _image: &CapturedImage,
        classroom_id: &str,
    ) -> Result<SessionReply, ServiceError> {
        self.classroom_ids
            .lock()
            .unwrap()
            .push(classroom_id.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Unexpected("script exhausted".into())))
    }
}
