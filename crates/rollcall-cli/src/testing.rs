//! Camera and service fakes for driver tests.

use async_trait::async_trait;
use rollcall_core::services::{EncodeReply, RecognitionService};
use rollcall_core::ServiceError;
use rollcall_hw::{CameraBackend, CameraDevice, CameraError, CapturedImage, Frame, PixelLayout};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const EDGE: u32 = 64;
const NEVER: usize = usize::MAX;

/// Switches shared by a [`FlakyBackend`] and every device it opens.
#[derive(Default)]
pub struct FlakyControl {
    failed_opens_left: AtomicUsize,
    polls_before_ready: AtomicUsize,
    unplug_next_frame: AtomicBool,
}

impl FlakyControl {
    /// The next `n` opens fail as if the device node were gone.
    pub fn fail_next_opens(&self, n: usize) {
        self.failed_opens_left.store(n, Ordering::SeqCst);
    }

    pub fn ready_after_polls(&self, n: usize) {
        self.polls_before_ready.store(n, Ordering::SeqCst);
    }

    pub fn never_ready(&self) {
        self.polls_before_ready.store(NEVER, Ordering::SeqCst);
    }

    /// The next frame read fails as if the camera were unplugged.
    pub fn unplug_next_frame(&self) {
        self.unplug_next_frame.store(true, Ordering::SeqCst);
    }
}

pub struct FlakyBackend {
    control: Arc<FlakyControl>,
}

impl FlakyBackend {
    pub fn new() -> (Self, Arc<FlakyControl>) {
        let control = Arc::new(FlakyControl::default());
        (
            Self {
                control: Arc::clone(&control),
            },
            control,
        )
    }
}

struct FlakyDevice {
    control: Arc<FlakyControl>,
    sequence: u32,
}

impl CameraBackend for FlakyBackend {
    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        let failing = self
            .control
            .failed_opens_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CameraError::DeviceUnavailable("no such device".into()));
        }
        Ok(Box::new(FlakyDevice {
            control: Arc::clone(&self.control),
            sequence: 0,
        }))
    }

    fn describe(&self) -> String {
        "flaky".into()
    }
}

impl CameraDevice for FlakyDevice {
    fn poll_ready(&mut self) -> Result<Option<(u32, u32)>, CameraError> {
        let waiting = self
            .control
            .polls_before_ready
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                NEVER => Some(NEVER),
                n => Some(n - 1),
            })
            .is_ok();
        Ok((!waiting).then_some((EDGE, EDGE)))
    }

    fn latest_frame(&mut self) -> Result<Frame, CameraError> {
        if self.control.unplug_next_frame.swap(false, Ordering::SeqCst) {
            return Err(CameraError::DeviceUnavailable("unplugged".into()));
        }
        self.sequence += 1;
        Ok(Frame {
            data: vec![120; (EDGE * EDGE) as usize],
            width: EDGE,
            height: EDGE,
            layout: PixelLayout::Luma8,
            timestamp: std::time::Instant::now(),
            sequence: self.sequence,
        })
    }

    fn stop(&mut self) {}
}

/// Accepts every face with the same encoding.
pub struct AcceptingRecognition;

#[async_trait]
impl RecognitionService for AcceptingRecognition {
    async fn encode_face(&self, _image: &CapturedImage) -> Result<EncodeReply, ServiceError> {
        Ok(EncodeReply {
            success: true,
            encoding: Some(json!([0.1, 0.2, 0.3])),
            message: None,
        })
    }
}
