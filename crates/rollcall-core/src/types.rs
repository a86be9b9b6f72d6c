use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Face feature vector produced by the recognition service.
///
/// Opaque to the client beyond the guarantee that it is a non-empty vector of
/// finite numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FaceEncoding {
    values: Vec<f64>,
}

impl FaceEncoding {
    /// Returns `None` for an empty vector or one containing NaN/infinity.
    pub fn new(values: Vec<f64>) -> Option<Self> {
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(Self { values })
    }

    /// Parse an encoding from an untrusted JSON value. Anything other than a
    /// non-empty array of finite numbers is rejected.
    pub fn from_wire(value: &serde_json::Value) -> Option<Self> {
        let items = value.as_array()?;
        let values = items
            .iter()
            .map(serde_json::Value::as_f64)
            .collect::<Option<Vec<f64>>>()?;
        Self::new(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Identity carried over from the signup step.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub password: String,
    /// University seat number, if the user is a student.
    pub student_id: Option<String>,
}

impl Identity {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            student_id: None,
        }
    }

    pub fn with_student_id(mut self, student_id: impl Into<String>) -> Self {
        self.student_id = Some(student_id.into());
        self
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("student_id", &self.student_id)
            .finish()
    }
}

/// Outcome of one successful recognition submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceSession {
    pub classroom_id: String,
    pub present_members: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
}

impl AttendanceSession {
    pub fn present_count(&self) -> usize {
        self.present_members.len()
    }
}

/// Attendance ratio against a classroom's minimum threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttendanceVerdict {
    pub present_count: usize,
    pub roster_size: usize,
    /// Rounded half up; 0 for an empty roster.
    pub percentage: u32,
    pub eligible: bool,
}
