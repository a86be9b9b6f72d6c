//! External collaborators consumed by the session workflow.
//!
//! The replies mirror what the backend actually says, untrusted; the session
//! state machines decide what a reply means.

use crate::error::ServiceError;
use crate::types::{FaceEncoding, Identity};
use async_trait::async_trait;
use rollcall_hw::CapturedImage;

/// Raw reply to a single-face encoding request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeReply {
    pub success: bool,
    /// Unvalidated encoding payload; see [`FaceEncoding::from_wire`].
    pub encoding: Option<serde_json::Value>,
    pub message: Option<String>,
}

/// Identity plus the three accepted encodings, in acceptance order.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationRequest {
    pub identity: Identity,
    pub encodings: [FaceEncoding; 3],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReply {
    pub saved: bool,
    pub message: Option<String>,
}

/// Reply to a classroom-photo recognition request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReply {
    pub success: bool,
    pub present: Vec<String>,
    pub message: Option<String>,
}

/// Classroom metadata relevant to attendance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassroomInfo {
    pub id: String,
    pub subject_name: Option<String>,
    pub teacher_name: Option<String>,
    /// Member identifiers of the enrolled students.
    pub roster: Vec<String>,
    /// Minimum attendance percentage for eligibility.
    pub min_attendance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Unknown,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => AttendanceStatus::Present,
            "absent" => AttendanceStatus::Absent,
            _ => AttendanceStatus::Unknown,
        }
    }
}

/// One row of a classroom's attendance for a day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub member_id: String,
    pub name: Option<String>,
    pub status: AttendanceStatus,
    pub timestamp: Option<String>,
}

/// Turns a single face image into an encoding.
#[async_trait]
pub trait RecognitionService: Send + Sync {
    async fn encode_face(&self, image: &CapturedImage) -> Result<EncodeReply, ServiceError>;
}

/// Stores a new user together with their face encodings.
#[async_trait]
pub trait RegistrationService: Send + Sync {
    async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationReply, ServiceError>;
}

/// Marks the members recognized in a classroom photo as present.
#[async_trait]
pub trait AttendanceSessionService: Send + Sync {
    async fn recognize_classroom(
        &self,
        image: &CapturedImage,
        classroom_id: &str,
    ) -> Result<SessionReply, ServiceError>;
}

/// Read-only classroom queries. Safe to re-query on an interval.
#[async_trait]
pub trait ClassroomDataService: Send + Sync {
    /// `Ok(None)` when the classroom does not exist or is not visible to the caller.
    async fn classroom(&self, classroom_id: &str) -> Result<Option<ClassroomInfo>, ServiceError>;

    async fn attendance_today(
        &self,
        classroom_id: &str,
    ) -> Result<Vec<AttendanceRecord>, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(AttendanceStatus::parse("present"), AttendanceStatus::Present);
        assert_eq!(AttendanceStatus::parse(" Present "), AttendanceStatus::Present);
        assert_eq!(AttendanceStatus::parse("absent"), AttendanceStatus::Absent);
        assert_eq!(AttendanceStatus::parse("late"), AttendanceStatus::Unknown);
    }
}
