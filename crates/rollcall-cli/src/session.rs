//! `rollcall session`: photograph a classroom and record attendance.

use anyhow::{Context, Result};
use rollcall_client::ApiClient;
use rollcall_core::recognition::Phase;
use rollcall_core::services::{AttendanceSessionService, ClassroomDataService};
use rollcall_core::{build_report, AttendanceSession, RecognitionOutcome, RecognitionSession};
use rollcall_hw::{CameraManager, CapturedImage};
use std::path::Path;
use std::time::Duration;

use crate::camera;
use crate::config::Config;
use crate::prompt::{interruptible, Input, Prompt};
use crate::verdict;

pub async fn run(
    config: &Config,
    client: &ApiClient,
    classroom_id: &str,
    image: Option<&Path>,
) -> Result<()> {
    let manager = camera::manager(config);
    let mut session = match image {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let image = CapturedImage::from_encoded(bytes)
                .with_context(|| format!("decoding {}", path.display()))?;
            let mut session = RecognitionSession::new(classroom_id, None);
            session.stage_image(image)?;
            session
        }
        None => {
            let Some(handle) =
                interruptible(camera::acquire_ready(&manager, config.ready_timeout())).await
            else {
                println!("Session cancelled.");
                return Ok(());
            };
            RecognitionSession::new(classroom_id, Some(handle?))
        }
    };
    let mut prompt = Prompt::stdin();

    loop {
        match session.phase() {
            Phase::Empty => {
                match prompt
                    .ask("Press Enter to photograph the classroom (q to cancel)")
                    .await?
                {
                    Input::Line(l) if l.eq_ignore_ascii_case("q") => return cancelled(&mut session),
                    Input::Eof | Input::Interrupted => return cancelled(&mut session),
                    Input::Line(_) => {}
                }
                match capture_classroom(&mut session, &manager, config.ready_timeout()).await {
                    Capture::Staged => {}
                    Capture::Retry(message) => println!("{message}"),
                    Capture::Interrupted => return cancelled(&mut session),
                }
            }
            Phase::Staged => {
                let (width, height) = session
                    .preview()
                    .map(|p| (p.width(), p.height()))
                    .unwrap_or_default();
                let question = format!(
                    "Image {width}x{height} ready. Enter to submit, r to retake, q to cancel:"
                );
                match prompt.ask(&question).await? {
                    Input::Line(l) if l.eq_ignore_ascii_case("q") => return cancelled(&mut session),
                    Input::Line(l) if l.eq_ignore_ascii_case("r") => {
                        session.retake()?;
                        continue;
                    }
                    Input::Eof | Input::Interrupted => return cancelled(&mut session),
                    Input::Line(_) => {}
                }

                let pending = session.begin_submit()?;
                let service: &dyn AttendanceSessionService = client;
                let Some(reply) = interruptible(
                    service.recognize_classroom(pending.image(), pending.classroom_id()),
                )
                .await
                else {
                    return cancelled(&mut session);
                };

                match session.complete_submit(pending, reply) {
                    Ok(RecognitionOutcome::Recorded(recorded)) => {
                        print_recorded(&recorded);
                        print_report(client, classroom_id).await;
                        return Ok(());
                    }
                    Ok(RecognitionOutcome::Ignored) => {}
                    Err(e) => println!("{e}"),
                }
            }
            Phase::Submitting | Phase::Recorded | Phase::Cancelled => return Ok(()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Capture {
    Staged,
    Retry(String),
    Interrupted,
}

/// Stage a frame from the camera, re-acquiring it first if it was lost.
async fn capture_classroom(
    session: &mut RecognitionSession,
    manager: &CameraManager,
    ready_timeout: Duration,
) -> Capture {
    if session.camera().map_or(true, |c| c.is_released()) {
        match interruptible(camera::acquire_ready(manager, ready_timeout)).await {
            None => return Capture::Interrupted,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "camera re-acquire failed");
                return Capture::Retry(format!("Camera unavailable: {e:#}"));
            }
            Some(Ok(handle)) => {
                if let Err(e) = session.attach_camera(handle) {
                    return Capture::Retry(e.to_string());
                }
            }
        }
    }

    match session.capture() {
        Ok(()) => Capture::Staged,
        Err(e) => Capture::Retry(e.to_string()),
    }
}

fn cancelled(session: &mut RecognitionSession) -> Result<()> {
    session.cancel();
    println!("Session cancelled.");
    Ok(())
}

fn print_recorded(recorded: &AttendanceSession) {
    let local = recorded.timestamp.with_timezone(&chrono::Local);
    println!(
        "Attendance recorded at {}: {} present.",
        local.format("%Y-%m-%d %H:%M"),
        recorded.present_count()
    );
    for member in &recorded.present_members {
        println!("  {member}");
    }
}

/// Best effort; the session is already recorded.
async fn print_report(client: &ApiClient, classroom_id: &str) {
    let service: &dyn ClassroomDataService = client;
    let classroom = match service.classroom(classroom_id).await {
        Ok(Some(classroom)) => classroom,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(classroom = classroom_id, error = %e, "could not fetch classroom");
            return;
        }
    };
    match service.attendance_today(classroom_id).await {
        Ok(records) => verdict::print(&build_report(&classroom, &records)),
        Err(e) => tracing::warn!(classroom = classroom_id, error = %e, "could not fetch attendance"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyBackend;

    #[tokio::test]
    async fn test_capture_retries_after_failed_reopen() {
        let (backend, control) = FlakyBackend::new();
        let manager = CameraManager::new(backend);
        let timeout = Duration::from_secs(2);
        let mut session = RecognitionSession::new("c1", None);

        control.fail_next_opens(1);
        match capture_classroom(&mut session, &manager, timeout).await {
            Capture::Retry(message) => assert!(message.starts_with("Camera unavailable"), "{message}"),
            other => panic!("expected a retry, got {other:?}"),
        }
        assert_eq!(session.phase(), Phase::Empty);
        assert!(!manager.is_in_use());

        assert_eq!(capture_classroom(&mut session, &manager, timeout).await, Capture::Staged);
        assert_eq!(session.phase(), Phase::Staged);
        assert_eq!(session.preview().map(|p| p.width()), Some(64));
    }

    #[tokio::test]
    async fn test_unplugged_camera_is_reacquired_on_next_capture() {
        let (backend, control) = FlakyBackend::new();
        let manager = CameraManager::new(backend);
        let timeout = Duration::from_secs(2);
        let handle = camera::acquire_ready(&manager, timeout).await.unwrap();
        let mut session = RecognitionSession::new("c1", Some(handle));

        control.unplug_next_frame();
        assert!(matches!(
            capture_classroom(&mut session, &manager, timeout).await,
            Capture::Retry(_)
        ));
        assert!(session.camera().is_none());

        assert_eq!(capture_classroom(&mut session, &manager, timeout).await, Capture::Staged);
    }
}
