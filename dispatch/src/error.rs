//! Error taxonomy for the dispatch core.
//!
//! Four families, handled differently by callers:
//! - validation errors are aggregated into a list, never partially applied
//! - state errors mean a logic bug or stale view; do not retry blindly
//! - unavailability is a normal outcome surfaced as a typed result
//! - integration failures are logged and degrade gracefully

use crate::model::{AssignmentStatus, RequestStatus, ShiftStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A single validation failure. `validate_params` returns these as a list
/// so the caller sees every violation at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum ValidationIssue {
    /// Shift starts sooner than the configured lead time allows.
    InsufficientLeadTime { required_hours: i64, actual_hours: i64 },
    /// Shift is shorter than the configured minimum.
    DurationTooShort { min_minutes: i64, actual_minutes: i64 },
    /// Shift is longer than the configured maximum.
    DurationTooLong { max_minutes: i64, actual_minutes: i64 },
    /// End does not come after start.
    EndNotAfterStart,
    /// Reported coordinates fall outside valid ranges.
    MalformedLocation { lat: f64, lon: f64 },
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientLeadTime {
                required_hours,
                actual_hours,
            } => write!(
                f,
                "lead time {}h is below the required {}h",
                actual_hours, required_hours
            ),
            Self::DurationTooShort {
                min_minutes,
                actual_minutes,
            } => write!(
                f,
                "duration {}min is below the minimum {}min",
                actual_minutes, min_minutes
            ),
            Self::DurationTooLong {
                max_minutes,
                actual_minutes,
            } => write!(
                f,
                "duration {}min exceeds the maximum {}min",
                actual_minutes, max_minutes
            ),
            Self::EndNotAfterStart => write!(f, "end time must come after start time"),
            Self::MalformedLocation { lat, lon } => {
                write!(f, "location ({}, {}) is out of range", lat, lon)
            }
        }
    }
}

/// Errors from dispatch core operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("caregiver {caregiver_id} already has a conflicting shift on {date}")]
    ShiftConflict {
        caregiver_id: Uuid,
        date: chrono::NaiveDate,
    },

    #[error("illegal shift transition {from} -> {to} for shift {shift_id}")]
    IllegalShiftTransition {
        shift_id: Uuid,
        from: ShiftStatus,
        to: ShiftStatus,
    },

    #[error("illegal request transition {from} -> {to} for request {request_id}")]
    IllegalRequestTransition {
        request_id: Uuid,
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("shift {shift_id} already has a check-{kind}")]
    DuplicateCheck { shift_id: Uuid, kind: &'static str },

    #[error("check-in for shift {shift_id} is {minutes_early}min before the early-arrival window")]
    CheckInTooEarly { shift_id: Uuid, minutes_early: i64 },

    #[error("check-out for shift {shift_id} requires a prior check-in")]
    CheckOutWithoutCheckIn { shift_id: Uuid },

    #[error("assignment {assignment_id} is {status}, not live")]
    AssignmentNotLive {
        assignment_id: Uuid,
        status: AssignmentStatus,
    },

    #[error("request {request_id} already has a live assignment")]
    LiveAssignmentExists { request_id: Uuid },

    #[error("assignment {assignment_id} is {status}, not awaiting confirmation")]
    AssignmentNotPending {
        assignment_id: Uuid,
        status: AssignmentStatus,
    },

    #[error("emergency {emergency_id} is already resolved")]
    EmergencyResolved { emergency_id: Uuid },

    #[error("emergency {emergency_id} is already at maximum severity")]
    SeverityAtMaximum { emergency_id: Uuid },

    #[error("no substitute available for request {request_id}")]
    NoSubstituteAvailable { request_id: Uuid },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("caregiver directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias used across the crate.
pub type DispatchResult<T> = Result<T, DispatchError>;
