//! Checkpoint tracking — advances shifts through the check-in/check-out
//! lifecycle and detects lateness.
//!
//! Preconditions are enforced before any mutation; the event append and
//! the shift transition then commit as one store operation, and the
//! result is not reversible.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CheckpointConfig;
use crate::error::{DispatchError, DispatchResult, ValidationIssue};
use crate::model::{CheckEvent, CheckKind, GeoPoint, Shift, ShiftStatus};
use crate::schedule::ScheduleManager;
use crate::store::SharedStore;

/// A still-planned shift whose start has passed the lateness tolerance.
/// These are the candidates for no-show substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedShift {
    pub shift: Shift,
    pub delay_minutes: i64,
}

/// Tracks check-ins and check-outs against scheduled shifts.
pub struct CheckpointTracker {
    store: SharedStore,
    schedule: Arc<ScheduleManager>,
    config: CheckpointConfig,
}

impl CheckpointTracker {
    pub fn new(store: SharedStore, schedule: Arc<ScheduleManager>, config: CheckpointConfig) -> Self {
        Self {
            store,
            schedule,
            config,
        }
    }

    /// Record a check-in and move the shift to in-progress.
    pub fn check_in(&self, shift_id: Uuid, location: GeoPoint) -> DispatchResult<CheckEvent> {
        self.check_in_at(Utc::now(), shift_id, location)
    }

    pub fn check_in_at(
        &self,
        now: DateTime<Utc>,
        shift_id: Uuid,
        location: GeoPoint,
    ) -> DispatchResult<CheckEvent> {
        if !location.is_valid() {
            return Err(DispatchError::Validation(vec![
                ValidationIssue::MalformedLocation {
                    lat: location.lat,
                    lon: location.lon,
                },
            ]));
        }

        let shift = self.store.get_shift(shift_id)?;
        if shift.status != ShiftStatus::Planned {
            return Err(DispatchError::IllegalShiftTransition {
                shift_id,
                from: shift.status,
                to: ShiftStatus::InProgress,
            });
        }
        if self.store.check_in_event(shift_id)?.is_some() {
            return Err(DispatchError::DuplicateCheck {
                shift_id,
                kind: "in",
            });
        }

        let earliest = shift.scheduled_start()
            - chrono::Duration::minutes(self.config.early_tolerance_minutes);
        if now < earliest {
            return Err(DispatchError::CheckInTooEarly {
                shift_id,
                minutes_early: (earliest - now).num_minutes(),
            });
        }

        let event = CheckEvent {
            id: Uuid::new_v4(),
            shift_id,
            kind: CheckKind::In,
            at: now,
            location,
            activities: Vec::new(),
        };
        let updated = self.store.record_check(event.clone(), ShiftStatus::InProgress)?;
        self.schedule.invalidate_day(updated.caregiver_id, updated.date);

        let delay = lateness_minutes(&shift, now);
        if delay > self.config.late_tolerance_minutes {
            warn!(shift_id = %shift_id, delay_minutes = delay, "late check-in");
        } else {
            info!(shift_id = %shift_id, "check-in recorded");
        }
        Ok(event)
    }

    /// Record a check-out with activity notes and complete the shift.
    pub fn check_out(
        &self,
        shift_id: Uuid,
        location: GeoPoint,
        activities: Vec<String>,
    ) -> DispatchResult<CheckEvent> {
        self.check_out_at(Utc::now(), shift_id, location, activities)
    }

    pub fn check_out_at(
        &self,
        now: DateTime<Utc>,
        shift_id: Uuid,
        location: GeoPoint,
        activities: Vec<String>,
    ) -> DispatchResult<CheckEvent> {
        if !location.is_valid() {
            return Err(DispatchError::Validation(vec![
                ValidationIssue::MalformedLocation {
                    lat: location.lat,
                    lon: location.lon,
                },
            ]));
        }

        let shift = self.store.get_shift(shift_id)?;
        if shift.status != ShiftStatus::InProgress {
            return Err(DispatchError::IllegalShiftTransition {
                shift_id,
                from: shift.status,
                to: ShiftStatus::Done,
            });
        }
        if self.store.check_in_event(shift_id)?.is_none() {
            return Err(DispatchError::CheckOutWithoutCheckIn { shift_id });
        }

        let event = CheckEvent {
            id: Uuid::new_v4(),
            shift_id,
            kind: CheckKind::Out,
            at: now,
            location,
            activities,
        };
        let updated = self.store.record_check(event.clone(), ShiftStatus::Done)?;
        self.schedule.invalidate_day(updated.caregiver_id, updated.date);
        info!(shift_id = %shift_id, "check-out recorded");
        Ok(event)
    }

    /// Whether the check-in for a shift exceeded the lateness tolerance.
    pub fn is_late(&self, shift: &Shift, checked_in_at: DateTime<Utc>) -> bool {
        lateness_minutes(shift, checked_in_at) > self.config.late_tolerance_minutes
    }

    /// Today's still-planned shifts whose start plus tolerance has passed.
    pub fn check_delays(&self) -> DispatchResult<Vec<DelayedShift>> {
        self.check_delays_at(Utc::now())
    }

    pub fn check_delays_at(&self, now: DateTime<Utc>) -> DispatchResult<Vec<DelayedShift>> {
        let today = now.date_naive();
        let tolerance = chrono::Duration::minutes(self.config.late_tolerance_minutes);
        let mut delayed: Vec<DelayedShift> = self
            .store
            .shifts_on(today)?
            .into_iter()
            .filter(|s| s.status == ShiftStatus::Planned)
            .filter(|s| s.scheduled_start() + tolerance < now)
            .map(|shift| {
                let delay_minutes = (now - shift.scheduled_start()).num_minutes();
                DelayedShift {
                    shift,
                    delay_minutes,
                }
            })
            .collect();
        delayed.sort_by_key(|d| std::cmp::Reverse(d.delay_minutes));
        if !delayed.is_empty() {
            warn!(count = delayed.len(), "shifts overdue for check-in");
        }
        Ok(delayed)
    }
}

/// Minutes between actual check-in and scheduled start; negative when early.
fn lateness_minutes(shift: &Shift, checked_in_at: DateTime<Utc>) -> i64 {
    (checked_in_at - shift.scheduled_start()).num_minutes()
}
