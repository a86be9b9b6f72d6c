//! Attendance ratio and eligibility from already-fetched classroom data.

use crate::services::{AttendanceRecord, AttendanceStatus, ClassroomInfo};
use crate::types::AttendanceVerdict;
use serde::Serialize;

/// Percentage of the roster present, rounded half up, and whether it meets
/// `min_attendance`. An empty roster is 0% and never eligible.
pub fn compute_verdict(
    roster_size: usize,
    present_count: usize,
    min_attendance: u32,
) -> AttendanceVerdict {
    let percentage = if roster_size == 0 {
        0
    } else {
        // floor(100 * p / r + 1/2) in integers; u128 holds 200 * usize::MAX
        let (p, r) = (present_count as u128, roster_size as u128);
        ((200 * p + r) / (2 * r)).min(u32::MAX as u128) as u32
    };

    AttendanceVerdict {
        present_count,
        roster_size,
        percentage,
        eligible: roster_size > 0 && meets_minimum(percentage, min_attendance),
    }
}

/// Eligibility for an already-computed percentage (e.g. one reported by the
/// server for a single student).
pub fn meets_minimum(percentage: u32, min_attendance: u32) -> bool {
    percentage >= min_attendance
}

/// Number of records marked present.
pub fn count_present(records: &[AttendanceRecord]) -> usize {
    records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Present)
        .count()
}

/// Today's attendance summary for one classroom.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceReport {
    pub classroom_id: String,
    pub subject_name: Option<String>,
    pub min_attendance: u32,
    pub verdict: AttendanceVerdict,
}

/// Combine classroom metadata with today's records.
///
/// The roster size always comes from the classroom roster. When the roster
/// is empty but records exist the two sources disagree; that is logged and
/// the verdict stays 0%.
pub fn build_report(classroom: &ClassroomInfo, records: &[AttendanceRecord]) -> AttendanceReport {
    let roster_size = classroom.roster.len();
    if roster_size == 0 && !records.is_empty() {
        tracing::warn!(
            classroom = %classroom.id,
            records = records.len(),
            "classroom roster is empty but attendance records exist"
        );
    }

    let present_count = count_present(records);
    if present_count > roster_size && roster_size > 0 {
        tracing::warn!(
            classroom = %classroom.id,
            present_count,
            roster_size,
            "more members present than on the roster"
        );
    }

    AttendanceReport {
        classroom_id: classroom.id.clone(),
        subject_name: classroom.subject_name.clone(),
        min_attendance: classroom.min_attendance,
        verdict: compute_verdict(roster_size, present_count, classroom.min_attendance),
    }
}
