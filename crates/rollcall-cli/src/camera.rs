//! Camera setup for the interactive commands.

use anyhow::{bail, Context, Result};
use rollcall_hw::{CameraHandle, CameraManager, HandleState, V4lBackend};
use std::time::Duration;

use crate::config::Config;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn manager(config: &Config) -> CameraManager {
    CameraManager::new(V4lBackend::new(
        config.camera_device.clone(),
        config.warmup_frames,
    ))
}

/// Poll `handle` until it reports dimensions. The handle is released when
/// the timeout expires.
pub async fn wait_ready(handle: &mut CameraHandle, timeout: Duration) -> Result<(u32, u32)> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match handle.poll_ready()? {
            HandleState::Ready { width, height } => return Ok((width, height)),
            HandleState::Released => bail!("camera was released while starting"),
            HandleState::Opening => {}
        }
        if tokio::time::Instant::now() >= deadline {
            handle.release();
            bail!("camera not ready after {}s", timeout.as_secs_f32());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Acquire the camera and wait for it to become ready. Dropping the future
/// mid-wait releases the camera.
pub async fn acquire_ready(manager: &CameraManager, timeout: Duration) -> Result<CameraHandle> {
    let mut handle = manager
        .acquire()
        .with_context(|| format!("opening camera {}", manager.describe()))?;
    let (width, height) = wait_ready(&mut handle, timeout).await?;
    tracing::info!(device = %manager.describe(), width, height, "camera ready");
    Ok(handle)
}
