//! JSON bodies exchanged with the attendance backend.
//!
//! Response types are lenient: missing fields default, and shapes the backend
//! has been seen to vary (member references, minimum attendance) accept
//! every observed form.

use rollcall_core::services::{
    AttendanceRecord, AttendanceStatus, ClassroomInfo, EncodeReply, RegistrationReply,
    RegistrationRequest, SessionReply,
};
use rollcall_core::FaceEncoding;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Used when a classroom does not specify its minimum attendance.
pub(crate) const DEFAULT_MIN_ATTENDANCE: u32 = 75;

#[derive(Debug, Deserialize)]
pub(crate) struct EncodeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    encoding: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

impl From<EncodeResponse> for EncodeReply {
    fn from(r: EncodeResponse) -> Self {
        EncodeReply {
            success: r.success,
            encoding: r.encoding,
            message: r.message,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct SaveFaceIdRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    usn: Option<&'a str>,
    face_id: &'a [FaceEncoding; 3],
}

impl<'a> From<&'a RegistrationRequest> for SaveFaceIdRequest<'a> {
    fn from(r: &'a RegistrationRequest) -> Self {
        SaveFaceIdRequest {
            name: &r.identity.name,
            email: &r.identity.email,
            password: &r.identity.password,
            usn: r.identity.student_id.as_deref(),
            face_id: &r.encodings,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SaveFaceIdResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

impl SaveFaceIdResponse {
    pub(crate) fn into_reply(self, http_ok: bool) -> RegistrationReply {
        let saved = http_ok && self.status.as_deref() == Some("saved");
        let message = match self.detail {
            Some(Value::String(s)) => Some(s),
            Some(Value::Null) | None => self.message,
            Some(other) => Some(other.to_string()),
        };
        RegistrationReply { saved, message }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FaceSessionResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    present: Option<Vec<MemberRef>>,
    #[serde(default)]
    message: Option<String>,
}

impl From<FaceSessionResponse> for SessionReply {
    fn from(r: FaceSessionResponse) -> Self {
        SessionReply {
            success: r.success,
            present: r
                .present
                .unwrap_or_default()
                .into_iter()
                .filter_map(MemberRef::into_id)
                .collect(),
            message: r.message,
        }
    }
}

/// A roster or present-list entry: a bare identifier, a user record, or
/// anything else the backend put in the list. One odd entry must not sink the
/// whole reply.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum MemberRef {
    Id(String),
    Record(MemberRecord),
    Other(Value),
}

#[derive(Debug, Deserialize)]
pub(crate) struct MemberRecord {
    #[serde(default)]
    usn: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "_id")]
    id: Option<String>,
}

impl MemberRef {
    /// Preferred identifier: usn, then email, then database id, then name.
    pub(crate) fn into_id(self) -> Option<String> {
        match self {
            MemberRef::Id(id) => Some(id),
            MemberRef::Record(r) => r.usn.or(r.email).or(r.id).or(r.name),
            MemberRef::Other(Value::Number(n)) => Some(n.to_string()),
            MemberRef::Other(other) => {
                tracing::warn!(entry = %other, "skipping member entry without an identifier");
                None
            }
        }
        .filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClassroomResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    classroom: Option<ClassroomBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClassroomBody {
    #[serde(default, rename = "_id")]
    id: Option<String>,
    #[serde(default)]
    subject_name: Option<String>,
    #[serde(default)]
    teacher_name: Option<String>,
    #[serde(default)]
    students: Option<Vec<MemberRef>>,
    #[serde(default)]
    min_attendance: Option<MinAttendance>,
}

/// Stored as a number or, by the classroom-creation form, as a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum MinAttendance {
    Number(f64),
    Text(String),
}

impl MinAttendance {
    fn percent(&self) -> Option<u32> {
        let value = match self {
            MinAttendance::Number(n) => *n,
            MinAttendance::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        (value.is_finite() && value >= 0.0).then(|| value.round().min(u32::MAX as f64) as u32)
    }
}

impl ClassroomResponse {
    pub(crate) fn into_info(self, requested_id: &str) -> Option<ClassroomInfo> {
        if !self.success {
            return None;
        }
        let body = self.classroom?;

        let roster = body
            .students
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, member)| member.into_id().unwrap_or_else(|| format!("#{i}")))
            .collect();

        let min_attendance = match &body.min_attendance {
            None => DEFAULT_MIN_ATTENDANCE,
            Some(raw) => raw.percent().unwrap_or_else(|| {
                tracing::warn!(classroom = requested_id, ?raw, "unparseable minAttendance, using default");
                DEFAULT_MIN_ATTENDANCE
            }),
        };

        Some(ClassroomInfo {
            id: body.id.unwrap_or_else(|| requested_id.to_string()),
            subject_name: body.subject_name,
            teacher_name: body.teacher_name,
            roster,
            min_attendance,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AttendanceTodayResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    attendance: Option<Vec<AttendanceRow>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AttendanceRow {
    #[serde(default)]
    usn: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
}

impl AttendanceTodayResponse {
    pub(crate) fn into_records(self) -> Vec<AttendanceRecord> {
        if !self.success {
            return Vec::new();
        }
        self.attendance
            .unwrap_or_default()
            .into_iter()
            .map(|row| AttendanceRecord {
                member_id: row
                    .usn
                    .or(row.email)
                    .or_else(|| row.name.clone())
                    .unwrap_or_default(),
                name: row.name,
                status: row
                    .status
                    .as_deref()
                    .map(AttendanceStatus::parse)
                    .unwrap_or(AttendanceStatus::Unknown),
                timestamp: row.timestamp.map(|t| match t {
                    Value::String(s) => s,
                    other => other.to_string(),
                }),
            })
            .collect()
    }
}
