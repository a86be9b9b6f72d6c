//! V4L2 camera backend via the `v4l` crate.

use crate::camera::{CameraBackend, CameraDevice, CameraError};
use crate::frame::{self, Frame, PixelLayout};
use std::io::ErrorKind;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUEST_WIDTH: u32 = 640;
const REQUEST_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb3,
    /// 8-bit grayscale.
    Grey,
}

/// Opens `/dev/videoN` devices.
#[derive(Debug, Clone)]
pub struct V4lBackend {
    pub device_path: String,
    /// Frames discarded before the device reports ready (AGC/AE settling).
    pub warmup_frames: usize,
}

impl V4lBackend {
    pub fn new(device_path: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            device_path: device_path.into(),
            warmup_frames,
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl CameraBackend for V4lBackend {
    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        let path = self.device_path.as_str();
        if !Path::new(path).exists() {
            return Err(CameraError::DeviceUnavailable(format!("{path}: no such device")));
        }

        let device = Device::with_path(path).map_err(|e| map_open_error(path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::DeviceUnavailable(format!("{path}: query caps: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceUnavailable(format!(
                "{path}: not a video capture device"
            )));
        }

        tracing::info!(
            device = path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUEST_WIDTH;
        fmt.height = REQUEST_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb3
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, RGB3, or GREY)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Box::new(V4lDevice {
            device,
            path: path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
            warmup_frames: self.warmup_frames,
            warmed_up: false,
        }))
    }

    fn describe(&self) -> String {
        self.device_path.clone()
    }
}

fn map_open_error(path: &str, e: std::io::Error) -> CameraError {
    if e.kind() == ErrorKind::PermissionDenied {
        CameraError::PermissionDenied(path.to_string())
    } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
        CameraError::Busy
    } else {
        CameraError::DeviceUnavailable(format!("{path}: {e}"))
    }
}

struct V4lDevice {
    device: Device,
    path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    warmup_frames: usize,
    warmed_up: bool,
}

impl V4lDevice {
    fn stream(&self) -> Result<MmapStream<'_>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS).map_err(
            |e| CameraError::DeviceUnavailable(format!("{}: failed to start stream: {e}", self.path)),
        )
    }

    fn convert(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Grey => frame::luma_to_rgb(buf, self.width, self.height),
            PixelFormat::Rgb3 => {
                let expected = (self.width * self.height * 3) as usize;
                if buf.len() < expected {
                    return Err(CameraError::DeviceUnavailable(format!(
                        "RGB3 buffer too short: expected {expected}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..expected].to_vec())
            }
        };
        converted.map_err(|e| CameraError::DeviceUnavailable(format!("frame conversion: {e}")))
    }
}

impl CameraDevice for V4lDevice {
    fn poll_ready(&mut self) -> Result<Option<(u32, u32)>, CameraError> {
        if !self.warmed_up {
            // Discard warmup frames for camera AGC/AE stabilization
            {
                let mut stream = self.stream()?;
                for _ in 0..self.warmup_frames {
                    stream.next().map_err(|e| {
                        CameraError::DeviceUnavailable(format!("{}: warmup frame: {e}", self.path))
                    })?;
                }
            }
            tracing::debug!(device = %self.path, count = self.warmup_frames, "warmup frames discarded");
            self.warmed_up = true;
        }
        Ok(Some((self.width, self.height)))
    }

    fn latest_frame(&mut self) -> Result<Frame, CameraError> {
        let mut stream = self.stream()?;
        let (buf, meta) = stream.next().map_err(|e| {
            CameraError::DeviceUnavailable(format!("{}: failed to dequeue buffer: {e}", self.path))
        })?;
        let sequence = meta.sequence;
        let data = self.convert(buf)?;

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            layout: PixelLayout::Rgb8,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    fn stop(&mut self) {
        // Streams are scoped to each sample; dropping the device closes the fd.
        tracing::debug!(device = %self.path, "stopping camera");
    }
}
