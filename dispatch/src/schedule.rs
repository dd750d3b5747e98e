//! Shift scheduling — creation, validation, conflict detection, and the
//! cancellation-fee policy.
//!
//! Conflict detection expands every existing non-terminal shift of the
//! same caregiver on the same date by the configured minimum gap on both
//! ends; a candidate window intersecting any expanded window is rejected.
//! Validation violations are aggregated into a list rather than failing
//! fast on the first.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::config::{CancellationPolicy, ScheduleConfig};
use crate::error::{DispatchError, DispatchResult, ValidationIssue};
use crate::model::{Assignment, Shift, ShiftStatus};
use crate::store::SharedStore;

/// One requested shift window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShiftSpec {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Result of a cancellation, including the fee owed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationOutcome {
    pub shift_id: Uuid,
    pub fee_percent: u8,
    pub message: String,
}

/// Creates, validates, cancels and transitions shifts.
pub struct ScheduleManager {
    store: SharedStore,
    config: ScheduleConfig,
    policy: CancellationPolicy,
    /// Per-caregiver day-schedule read cache; every write to a
    /// (caregiver, date) invalidates its key before returning.
    day_cache: TtlCache<(Uuid, NaiveDate), Vec<Shift>>,
}

impl ScheduleManager {
    pub fn new(store: SharedStore, config: ScheduleConfig, policy: CancellationPolicy) -> Self {
        let ttl = Duration::from_secs(config.schedule_cache_ttl_secs);
        Self {
            store,
            config,
            policy,
            day_cache: TtlCache::new(ttl),
        }
    }

    /// A caregiver's shifts on one date, served from cache when fresh.
    pub fn caregiver_day(&self, caregiver_id: Uuid, date: NaiveDate) -> DispatchResult<Vec<Shift>> {
        let key = (caregiver_id, date);
        if let Some(shifts) = self.day_cache.get(&key) {
            return Ok(shifts);
        }
        let shifts = self.store.shifts_for_caregiver_on(caregiver_id, date)?;
        self.day_cache.insert(key, shifts.clone());
        Ok(shifts)
    }

    /// Whether a candidate window fits the caregiver's day once every
    /// existing non-terminal shift is expanded by the minimum gap.
    pub fn is_available(
        &self,
        caregiver_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> DispatchResult<bool> {
        let existing = self.caregiver_day(caregiver_id, date)?;
        Ok(!self.conflicts_any(&existing, start, end))
    }

    fn conflicts_any(&self, existing: &[Shift], start: NaiveTime, end: NaiveTime) -> bool {
        conflicts_with_gap(existing, start, end, self.config.min_gap_minutes)
    }

    /// The configured minimum gap, for callers that run the conflict check
    /// inside a store transaction.
    pub fn min_gap_minutes(&self) -> i64 {
        self.config.min_gap_minutes
    }

    /// Validate a shift window against lead-time and duration rules,
    /// returning every violation.
    pub fn validate_params(
        &self,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Vec<ValidationIssue> {
        self.validate_params_at(Utc::now(), date, start, end)
    }

    pub fn validate_params_at(
        &self,
        now: DateTime<Utc>,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if end <= start {
            issues.push(ValidationIssue::EndNotAfterStart);
        } else {
            let duration_minutes = minutes_of_day(end) - minutes_of_day(start);
            if duration_minutes < self.config.min_duration_minutes {
                issues.push(ValidationIssue::DurationTooShort {
                    min_minutes: self.config.min_duration_minutes,
                    actual_minutes: duration_minutes,
                });
            }
            if duration_minutes > self.config.max_duration_minutes {
                issues.push(ValidationIssue::DurationTooLong {
                    max_minutes: self.config.max_duration_minutes,
                    actual_minutes: duration_minutes,
                });
            }
        }

        let scheduled_start = date.and_time(start).and_utc();
        let lead_hours = (scheduled_start - now).num_hours();
        if lead_hours < self.config.min_lead_time_hours {
            issues.push(ValidationIssue::InsufficientLeadTime {
                required_hours: self.config.min_lead_time_hours,
                actual_hours: lead_hours,
            });
        }

        issues
    }

    /// Materialize shifts for an assignment. Every spec is validated and
    /// conflict-checked before anything is stored; a single violation
    /// anywhere leaves the schedule untouched.
    pub fn create_shifts(
        &self,
        assignment: &Assignment,
        client_id: Uuid,
        specs: &[ShiftSpec],
    ) -> DispatchResult<Vec<Shift>> {
        self.create_shifts_at(Utc::now(), assignment, client_id, specs)
    }

    pub fn create_shifts_at(
        &self,
        now: DateTime<Utc>,
        assignment: &Assignment,
        client_id: Uuid,
        specs: &[ShiftSpec],
    ) -> DispatchResult<Vec<Shift>> {
        let mut issues = Vec::new();
        for spec in specs {
            issues.extend(self.validate_params_at(now, spec.date, spec.start, spec.end));
        }
        if !issues.is_empty() {
            return Err(DispatchError::Validation(issues));
        }

        // Conflict-check against the stored schedule and against the other
        // specs in this batch.
        let mut pending: Vec<Shift> = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut existing = self
                .store
                .shifts_for_caregiver_on(assignment.caregiver_id, spec.date)?;
            existing.extend(pending.iter().filter(|s| s.date == spec.date).cloned());
            if self.conflicts_any(&existing, spec.start, spec.end) {
                return Err(DispatchError::ShiftConflict {
                    caregiver_id: assignment.caregiver_id,
                    date: spec.date,
                });
            }
            pending.push(Shift::new(assignment, client_id, spec.date, spec.start, spec.end));
        }

        for shift in &pending {
            self.store.put_shift(shift.clone())?;
            self.day_cache.invalidate(&(shift.caregiver_id, shift.date));
        }
        info!(
            assignment_id = %assignment.id,
            caregiver_id = %assignment.caregiver_id,
            shifts = pending.len(),
            "shifts created"
        );
        Ok(pending)
    }

    /// Cancel a planned shift, computing the fee from hours-until-service.
    pub fn cancel(&self, shift_id: Uuid, reason: &str) -> DispatchResult<CancellationOutcome> {
        self.cancel_at(Utc::now(), shift_id, reason)
    }

    pub fn cancel_at(
        &self,
        now: DateTime<Utc>,
        shift_id: Uuid,
        reason: &str,
    ) -> DispatchResult<CancellationOutcome> {
        let shift = self.store.get_shift(shift_id)?;
        let fee_percent = self.cancellation_fee_percent(now, &shift);
        let shift = self.transition(shift_id, ShiftStatus::Missed)?;
        info!(
            shift_id = %shift.id,
            fee_percent,
            reason,
            "shift canceled"
        );
        let message = match fee_percent {
            0 => "canceled free of charge".to_string(),
            100 => "canceled inside the no-refund window, full fee applies".to_string(),
            fee => format!("canceled with a reduced fee of {fee}%"),
        };
        Ok(CancellationOutcome {
            shift_id,
            fee_percent,
            message,
        })
    }

    /// Tiered, monotonic fee as a function of hours until the shift starts.
    fn cancellation_fee_percent(&self, now: DateTime<Utc>, shift: &Shift) -> u8 {
        let hours_until = (shift.scheduled_start() - now).num_minutes() as f64 / 60.0;
        if hours_until >= self.policy.free_cancellation_hours as f64 {
            0
        } else if hours_until >= self.policy.full_fee_hours as f64 {
            self.policy.reduced_fee_percent
        } else {
            100
        }
    }

    /// Drop the cached day schedule for a (caregiver, date). Called by
    /// writers outside this manager that move shifts between caregivers.
    pub fn invalidate_day(&self, caregiver_id: Uuid, date: NaiveDate) {
        self.day_cache.invalidate(&(caregiver_id, date));
    }

    /// Advance a shift's status. Illegal edges are a caller error.
    pub fn transition(&self, shift_id: Uuid, next: ShiftStatus) -> DispatchResult<Shift> {
        let shift = self.store.set_shift_status(shift_id, next)?;
        self.day_cache.invalidate(&(shift.caregiver_id, shift.date));
        debug!(shift_id = %shift.id, status = %shift.status, "shift transitioned");
        Ok(shift)
    }
}

/// Whether a candidate window collides with any non-terminal shift once
/// each existing shift is expanded by the minimum gap on both ends. The
/// single implementation of the no-overlap rule; the store's substitution
/// transaction reuses it for the replacement caregiver.
pub(crate) fn conflicts_with_gap(
    existing: &[Shift],
    start: NaiveTime,
    end: NaiveTime,
    min_gap_minutes: i64,
) -> bool {
    let candidate_start = minutes_of_day(start);
    let candidate_end = minutes_of_day(end);
    existing
        .iter()
        .filter(|s| !s.status.is_terminal())
        .any(|s| {
            // Expanded window may extend past midnight in either
            // direction; minutes-of-day arithmetic keeps that ordered.
            let expanded_start = minutes_of_day(s.start) - min_gap_minutes;
            let expanded_end = minutes_of_day(s.end) + min_gap_minutes;
            candidate_start < expanded_end && expanded_start < candidate_end
        })
}

fn minutes_of_day(t: NaiveTime) -> i64 {
    use chrono::Timelike;
    t.hour() as i64 * 60 + t.minute() as i64
}
