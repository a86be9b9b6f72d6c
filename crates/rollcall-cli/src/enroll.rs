//! `rollcall enroll`: capture three validated shots and register.

use anyhow::{Context, Result};
use rollcall_client::ApiClient;
use rollcall_core::enrollment::Phase;
use rollcall_core::{
    EnrollmentSession, Identity, RecognitionError, SessionError, ShotOutcome, SubmitOutcome,
    REQUIRED_SHOTS,
};
use rollcall_core::services::{RecognitionService, RegistrationService};
use rollcall_hw::CameraManager;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera;
use crate::config::Config;
use crate::prompt::{interruptible, Input, Prompt};

pub async fn run(
    config: &Config,
    client: &ApiClient,
    identity: Identity,
    save_previews: Option<PathBuf>,
) -> Result<()> {
    let manager = camera::manager(config);
    let Some(handle) = interruptible(camera::acquire_ready(&manager, config.ready_timeout())).await
    else {
        println!("Enrollment cancelled.");
        return Ok(());
    };
    let handle = handle?;
    let mut session = EnrollmentSession::new(identity, handle);
    let mut prompt = Prompt::stdin();

    println!("Enrolling {}.", session.identity().email);

    while let Some(slot) = session.current_slot() {
        let question = format!(
            "Shot {}/{REQUIRED_SHOTS}: press Enter to capture (q to cancel)",
            slot + 1
        );
        match prompt.ask(&question).await? {
            Input::Line(l) if l.eq_ignore_ascii_case("q") => return cancelled(&mut session),
            Input::Eof | Input::Interrupted => return cancelled(&mut session),
            Input::Line(_) => {}
        }

        match attempt_shot(&mut session, &manager, config.ready_timeout(), client).await {
            Attempt::Accepted { slot } => println!("Shot {} accepted.", slot + 1),
            Attempt::Retry(message) => println!("{message}"),
            Attempt::Interrupted => return cancelled(&mut session),
        }
    }

    if let Some(dir) = &save_previews {
        write_previews(&session, dir)?;
    }

    loop {
        match prompt.ask("All shots captured. Press Enter to register (q to cancel)").await? {
            Input::Line(l) if l.eq_ignore_ascii_case("q") => return cancelled(&mut session),
            Input::Eof | Input::Interrupted => return cancelled(&mut session),
            Input::Line(_) => {}
        }

        let pending = session.begin_submit()?;
        let service: &dyn RegistrationService = client;
        let Some(reply) = interruptible(service.register(pending.request())).await else {
            return cancelled(&mut session);
        };

        match session.complete_submit(pending, reply) {
            Ok(SubmitOutcome::Registered) => {
                println!("Registered {}.", session.identity().email);
                return Ok(());
            }
            Ok(SubmitOutcome::Ignored) => {}
            Err(e) if session.phase() == Phase::Failed => {
                anyhow::bail!("{}", describe(&e));
            }
            Err(e) => println!("{} Try again.", describe(&e)),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Attempt {
    Accepted { slot: usize },
    /// Nothing was accepted; the message says why. Earlier shots are kept.
    Retry(String),
    Interrupted,
}

/// Capture and validate one shot, re-acquiring the camera first if it was lost.
async fn attempt_shot(
    session: &mut EnrollmentSession,
    manager: &CameraManager,
    ready_timeout: Duration,
    service: &dyn RecognitionService,
) -> Attempt {
    if session.camera().map_or(true, |c| c.is_released()) {
        match interruptible(camera::acquire_ready(manager, ready_timeout)).await {
            None => return Attempt::Interrupted,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "camera re-acquire failed");
                return Attempt::Retry(format!("Camera unavailable: {e:#}"));
            }
            Some(Ok(handle)) => {
                if let Err(e) = session.attach_camera(handle) {
                    return Attempt::Retry(describe(&e));
                }
            }
        }
    }

    let pending = match session.begin_capture() {
        Ok(pending) => pending,
        Err(e) => return Attempt::Retry(describe(&e)),
    };

    let Some(reply) = interruptible(service.encode_face(pending.image())).await else {
        return Attempt::Interrupted;
    };

    match session.complete_capture(pending, reply) {
        Ok(ShotOutcome::Accepted { slot, .. }) => Attempt::Accepted { slot },
        Ok(ShotOutcome::Ignored) => Attempt::Retry("Late reply ignored. Try again.".to_string()),
        Err(e) => Attempt::Retry(describe(&e)),
    }
}

fn cancelled(session: &mut EnrollmentSession) -> Result<()> {
    session.cancel();
    println!("Enrollment cancelled.");
    Ok(())
}

fn describe(err: &SessionError) -> String {
    match err {
        SessionError::Recognition(RecognitionError::NoFaceDetected { .. }) => {
            "Face NOT detected. Try again.".to_string()
        }
        SessionError::RegistrationRejected(message) => message.clone(),
        other => other.to_string(),
    }
}

fn write_previews(session: &EnrollmentSession, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for (i, preview) in session.previews().into_iter().enumerate() {
        let Some(image) = preview else { continue };
        let path = dir.join(format!("shot-{}.{}", i + 1, image.extension()));
        std::fs::write(&path, image.bytes())
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved preview");
    }
    Ok(())
}
