//! rollcall-hw — Camera resource management and still-frame capture.
//!
//! Provides an exclusive, release-on-drop camera handle over a pluggable
//! backend (V4L2 by default) and the capturer that turns the current frame
//! into a PNG still suitable for upload.

pub mod camera;
pub mod capture;
pub mod frame;
pub mod v4l2;

pub use camera::{CameraBackend, CameraDevice, CameraError, CameraHandle, CameraManager, HandleState};
pub use capture::{
    capture_frame, CaptureError, CapturedImage, MAX_ENCODED_BYTES, MAX_IMAGE_EDGE, MIN_FRAME_DIMENSION,
};
pub use frame::{Frame, PixelLayout};
pub use v4l2::{DeviceInfo, V4lBackend};
