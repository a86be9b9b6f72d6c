//! rollcall-core — Face-capture session workflow for classroom attendance.
//!
//! Drives the three-shot enrollment state machine and the single-shot
//! recognition session against opaque external services, and derives
//! attendance verdicts from classroom data.

pub mod aggregate;
pub mod enrollment;
pub mod error;
pub mod recognition;
pub mod services;
pub mod types;

#[cfg(test)]
mod testing;

pub use aggregate::{build_report, compute_verdict, count_present, AttendanceReport};
pub use enrollment::{EnrollmentSession, ShotOutcome, SubmitOutcome, REQUIRED_SHOTS};
pub use error::{RecognitionError, ServiceError, SessionError, ValidationError};
pub use recognition::{RecognitionOutcome, RecognitionSession};
pub use types::{AttendanceSession, AttendanceVerdict, FaceEncoding, Identity};
