//! Exclusive camera acquisition over a pluggable capture backend.
//!
//! A [`CameraManager`] hands out at most one [`CameraHandle`] at a time. The
//! handle owns the open device and releases it exactly once: on an explicit
//! [`CameraHandle::release`], on device loss, or when dropped.

use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("camera busy: another session holds the device")]
    Busy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
}

/// An open capture device, owned by a [`CameraHandle`].
pub trait CameraDevice: Send {
    /// Report usable frame dimensions once the device has started producing
    /// frames. `Ok(None)` means the device is still opening.
    fn poll_ready(&mut self) -> Result<Option<(u32, u32)>, CameraError>;

    /// Sample the most recent frame.
    fn latest_frame(&mut self) -> Result<Frame, CameraError>;

    /// Stop the stream and detach from the device. Called once.
    fn stop(&mut self);
}

/// Opens capture devices. Implemented by [`crate::V4lBackend`].
pub trait CameraBackend: Send + Sync {
    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError>;

    /// Human-readable device identifier for logs.
    fn describe(&self) -> String;
}

/// Lifecycle of a handle: released (absent), opening, or ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandleState {
    #[default]
    Released,
    Opening,
    Ready { width: u32, height: u32 },
}

/// Hands out exclusive camera handles.
pub struct CameraManager {
    backend: Box<dyn CameraBackend>,
    in_use: Arc<AtomicBool>,
}

impl CameraManager {
    pub fn new(backend: impl CameraBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the device. The returned handle starts out `Opening`; poll it
    /// with [`CameraHandle::poll_ready`] before capturing.
    ///
    /// Refuses with [`CameraError::Busy`] while another handle is live.
    pub fn acquire(&self) -> Result<CameraHandle, CameraError> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(device = %self.backend.describe(), "acquire refused: camera in use");
            return Err(CameraError::Busy);
        }

        let device = match self.backend.open() {
            Ok(device) => device,
            Err(e) => {
                self.in_use.store(false, Ordering::Release);
                tracing::warn!(device = %self.backend.describe(), error = %e, "camera open failed");
                return Err(e);
            }
        };

        tracing::info!(device = %self.backend.describe(), "camera acquired");
        Ok(CameraHandle {
            device: Some(device),
            state: HandleState::Opening,
            lease: Some(Arc::clone(&self.in_use)),
        })
    }

    /// True while a handle from this manager has not been released.
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }
}

/// Exclusive ownership of an open camera device.
///
/// `Default` yields an already-released handle.
#[derive(Default)]
pub struct CameraHandle {
    device: Option<Box<dyn CameraDevice>>,
    state: HandleState,
    lease: Option<Arc<AtomicBool>>,
}

impl CameraHandle {
    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, HandleState::Ready { .. })
    }

    pub fn is_released(&self) -> bool {
        self.state == HandleState::Released
    }

    /// Frame dimensions, once ready.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self.state {
            HandleState::Ready { width, height } => Some((width, height)),
            _ => None,
        }
    }

    /// Advance `Opening` to `Ready` once the device reports positive frame
    /// dimensions. A device failure releases the handle.
    pub fn poll_ready(&mut self) -> Result<HandleState, CameraError> {
        if self.state != HandleState::Opening {
            return Ok(self.state);
        }
        let Some(device) = self.device.as_mut() else {
            return Ok(self.state);
        };

        match device.poll_ready() {
            Ok(Some((width, height))) if width > 0 && height > 0 => {
                tracing::info!(width, height, "camera ready");
                self.state = HandleState::Ready { width, height };
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "camera failed while opening");
                self.release();
                return Err(e);
            }
        }
        Ok(self.state)
    }

    /// Sample the current frame from a ready device.
    ///
    /// Losing the device mid-stream releases the handle and reports
    /// [`CameraError::DeviceUnavailable`].
    pub(crate) fn sample(&mut self) -> Result<Frame, CameraError> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| CameraError::DeviceUnavailable("camera released".into()))?;

        match device.latest_frame() {
            Ok(frame) => Ok(frame),
            Err(e) => {
                tracing::warn!(error = %e, "camera lost mid-session");
                self.release();
                Err(match e {
                    CameraError::DeviceUnavailable(msg) => CameraError::DeviceUnavailable(msg),
                    other => CameraError::DeviceUnavailable(other.to_string()),
                })
            }
        }
    }

    /// Stop the device and give it back to the manager. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop();
            tracing::info!("camera released");
        }
        if let Some(lease) = self.lease.take() {
            lease.store(false, Ordering::Release);
        }
        self.state = HandleState::Released;
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraHandle")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
