//! Comparison of freshly scraped attendance against what was stored on the previous pass.

use crate::models::{AttendanceRecord, StoredAttendance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The subject had no stored row; deltas are measured from zero.
    NewSubject,
    /// The subject was seen on an earlier pass.
    UpdatedSubject,
}

/// The outcome of comparing one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult {
    pub kind: ChangeKind,
    /// Change in present hours. Negative when the portal corrected an earlier value.
    pub present_delta: i32,
    /// Change in absent hours. Negative when the portal corrected an earlier value.
    pub absent_delta: i32,
    /// The row to persist, whether or not anything changed.
    pub row: StoredAttendance,
}

impl DiffResult {
    pub fn present_increased(&self) -> bool {
        self.present_delta > 0
    }

    pub fn absent_increased(&self) -> bool {
        self.absent_delta > 0
    }

    pub fn is_unchanged(&self) -> bool {
        self.kind == ChangeKind::UpdatedSubject && self.present_delta == 0 && self.absent_delta == 0
    }
}

/// Compares `fresh` against the `stored` row for the same subject.
///
/// Both deltas are computed independently, so a reclassification of hours can produce a positive
/// present delta and a positive absent delta at once.
pub fn diff(user_id: &str, stored: Option<&StoredAttendance>, fresh: &AttendanceRecord) -> DiffResult {
    let (kind, present_delta, absent_delta) = match stored {
        None => (ChangeKind::NewSubject, fresh.present_hours, fresh.absent_hours),
        Some(stored) => (
            ChangeKind::UpdatedSubject,
            fresh.present_hours - stored.attended_hours,
            fresh.absent_hours - stored.absent_hours,
        ),
    };

    DiffResult {
        kind,
        present_delta,
        absent_delta,
        row: StoredAttendance {
            user_id: user_id.to_string(),
            subject_code: fresh.subject_code.clone(),
            subject_name: fresh.subject_name.clone(),
            max_hours: fresh.total_hours,
            attended_hours: fresh.present_hours,
            absent_hours: fresh.absent_hours,
            total_percentage: fresh.percentage,
        },
    }
}
