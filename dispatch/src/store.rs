//! In-memory shared store for all dispatch entities.
//!
//! A single `RwLock` guards the whole entity graph, so any multi-entity
//! mutation taken under the write lock is all-or-nothing to concurrent
//! readers. The substitution transaction lives here for exactly that
//! reason: marking the old assignment replaced, creating the new one,
//! appending the substitution record, and transferring future shifts must
//! never be observed half-done.

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};
use crate::model::{
    Assignment, AssignmentStatus, CheckEvent, CheckKind, Emergency, MetricKind,
    NotificationRecord, RequestStatus, ServiceRequest, Shift, ShiftStatus, SlaAlert, SlaMetric,
    Substitution, SubstitutionReason,
};

/// Shared handle to the store.
pub type SharedStore = Arc<DispatchStore>;

/// Everything the substitution transaction produced, returned as one unit.
#[derive(Debug, Clone)]
pub struct SubstitutionApplied {
    pub old_assignment: Assignment,
    pub new_assignment: Assignment,
    pub substitution: Substitution,
    /// Future planned shifts moved onto the new assignment.
    pub transferred: Vec<Shift>,
}

#[derive(Default)]
struct Inner {
    requests: HashMap<Uuid, ServiceRequest>,
    assignments: HashMap<Uuid, Assignment>,
    shifts: HashMap<Uuid, Shift>,
    checks: HashMap<Uuid, Vec<CheckEvent>>,
    substitutions: Vec<Substitution>,
    emergencies: HashMap<Uuid, Emergency>,
    metrics: HashMap<(NaiveDate, MetricKind, Option<String>), SlaMetric>,
    alerts: HashMap<(MetricKind, NaiveDate), SlaAlert>,
    notifications: Vec<NotificationRecord>,
}

/// The store. Cheap to share via [`SharedStore`].
#[derive(Default)]
pub struct DispatchStore {
    inner: RwLock<Inner>,
}

impl DispatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }

    fn read(&self) -> DispatchResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| DispatchError::LockPoisoned)
    }

    fn write(&self) -> DispatchResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| DispatchError::LockPoisoned)
    }

    // =========================================================================
    // Service requests
    // =========================================================================

    pub fn put_request(&self, request: ServiceRequest) -> DispatchResult<()> {
        self.write()?.requests.insert(request.id, request);
        Ok(())
    }

    pub fn get_request(&self, id: Uuid) -> DispatchResult<ServiceRequest> {
        self.read()?
            .requests
            .get(&id)
            .cloned()
            .ok_or(DispatchError::NotFound {
                entity: "service request",
                id,
            })
    }

    /// Advance a request's lifecycle, rejecting illegal edges.
    pub fn update_request_status(&self, id: Uuid, next: RequestStatus) -> DispatchResult<()> {
        let mut inner = self.write()?;
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or(DispatchError::NotFound {
                entity: "service request",
                id,
            })?;
        if !request.status.can_transition_to(next) {
            return Err(DispatchError::IllegalRequestTransition {
                request_id: id,
                from: request.status,
                to: next,
            });
        }
        request.status = next;
        Ok(())
    }

    // =========================================================================
    // Assignments
    // =========================================================================

    /// Insert a new assignment, enforcing the at-most-one-live invariant.
    pub fn insert_assignment(&self, assignment: Assignment) -> DispatchResult<()> {
        let mut inner = self.write()?;
        let live_exists = inner
            .assignments
            .values()
            .any(|a| a.request_id == assignment.request_id && a.status.is_live());
        if live_exists {
            return Err(DispatchError::LiveAssignmentExists {
                request_id: assignment.request_id,
            });
        }
        inner.assignments.insert(assignment.id, assignment);
        Ok(())
    }

    pub fn get_assignment(&self, id: Uuid) -> DispatchResult<Assignment> {
        self.read()?
            .assignments
            .get(&id)
            .cloned()
            .ok_or(DispatchError::NotFound {
                entity: "assignment",
                id,
            })
    }

    /// The single live assignment for a request, if any.
    pub fn live_assignment_for_request(
        &self,
        request_id: Uuid,
    ) -> DispatchResult<Option<Assignment>> {
        Ok(self
            .read()?
            .assignments
            .values()
            .find(|a| a.request_id == request_id && a.status.is_live())
            .cloned())
    }

    /// The caregiver accepts a pending assignment.
    pub fn confirm_assignment(&self, id: Uuid) -> DispatchResult<Assignment> {
        self.settle_pending_assignment(id, AssignmentStatus::Confirmed)
    }

    /// The caregiver turns a pending assignment down; the request is free
    /// for re-matching.
    pub fn decline_assignment(&self, id: Uuid) -> DispatchResult<Assignment> {
        self.settle_pending_assignment(id, AssignmentStatus::Declined)
    }

    fn settle_pending_assignment(
        &self,
        id: Uuid,
        next: AssignmentStatus,
    ) -> DispatchResult<Assignment> {
        let mut inner = self.write()?;
        let assignment = inner
            .assignments
            .get_mut(&id)
            .ok_or(DispatchError::NotFound {
                entity: "assignment",
                id,
            })?;
        if assignment.status != AssignmentStatus::Assigned {
            return Err(DispatchError::AssignmentNotPending {
                assignment_id: id,
                status: assignment.status,
            });
        }
        assignment.status = next;
        Ok(assignment.clone())
    }

    pub fn set_assignment_status(
        &self,
        id: Uuid,
        status: AssignmentStatus,
    ) -> DispatchResult<()> {
        let mut inner = self.write()?;
        let assignment = inner
            .assignments
            .get_mut(&id)
            .ok_or(DispatchError::NotFound {
                entity: "assignment",
                id,
            })?;
        assignment.status = status;
        Ok(())
    }

    pub fn assignments_created_on(&self, date: NaiveDate) -> DispatchResult<Vec<Assignment>> {
        Ok(self
            .read()?
            .assignments
            .values()
            .filter(|a| a.assigned_at.date_naive() == date)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Shifts
    // =========================================================================

    pub fn put_shift(&self, shift: Shift) -> DispatchResult<()> {
        self.write()?.shifts.insert(shift.id, shift);
        Ok(())
    }

    pub fn get_shift(&self, id: Uuid) -> DispatchResult<Shift> {
        self.read()?
            .shifts
            .get(&id)
            .cloned()
            .ok_or(DispatchError::NotFound {
                entity: "shift",
                id,
            })
    }

    /// All shifts of one caregiver on one date.
    pub fn shifts_for_caregiver_on(
        &self,
        caregiver_id: Uuid,
        date: NaiveDate,
    ) -> DispatchResult<Vec<Shift>> {
        Ok(self
            .read()?
            .shifts
            .values()
            .filter(|s| s.caregiver_id == caregiver_id && s.date == date)
            .cloned()
            .collect())
    }

    pub fn shifts_for_assignment(&self, assignment_id: Uuid) -> DispatchResult<Vec<Shift>> {
        Ok(self
            .read()?
            .shifts
            .values()
            .filter(|s| s.assignment_id == assignment_id)
            .cloned()
            .collect())
    }

    pub fn shifts_on(&self, date: NaiveDate) -> DispatchResult<Vec<Shift>> {
        Ok(self
            .read()?
            .shifts
            .values()
            .filter(|s| s.date == date)
            .cloned()
            .collect())
    }

    /// Apply a shift status transition, rejecting illegal edges. This is
    /// the single enforcement point for the shift state machine.
    pub fn set_shift_status(&self, id: Uuid, next: ShiftStatus) -> DispatchResult<Shift> {
        let mut inner = self.write()?;
        let shift = inner.shifts.get_mut(&id).ok_or(DispatchError::NotFound {
            entity: "shift",
            id,
        })?;
        if !shift.status.can_transition_to(next) {
            return Err(DispatchError::IllegalShiftTransition {
                shift_id: id,
                from: shift.status,
                to: next,
            });
        }
        shift.status = next;
        Ok(shift.clone())
    }

    // =========================================================================
    // Check events
    // =========================================================================

    /// Append a check event, enforcing at most one check-in and one
    /// check-out per shift.
    pub fn add_check_event(&self, event: CheckEvent) -> DispatchResult<()> {
        let mut inner = self.write()?;
        let events = inner.checks.entry(event.shift_id).or_default();
        if events.iter().any(|e| e.kind == event.kind) {
            return Err(DispatchError::DuplicateCheck {
                shift_id: event.shift_id,
                kind: match event.kind {
                    CheckKind::In => "in",
                    CheckKind::Out => "out",
                },
            });
        }
        events.push(event);
        Ok(())
    }

    /// Append a check event and apply the shift transition it implies as
    /// one unit under the write guard; a rejected transition stores no
    /// event and a duplicate event leaves the shift untouched.
    pub fn record_check(&self, event: CheckEvent, next: ShiftStatus) -> DispatchResult<Shift> {
        let shift_id = event.shift_id;
        let mut inner = self.write()?;

        let current = inner
            .shifts
            .get(&shift_id)
            .ok_or(DispatchError::NotFound {
                entity: "shift",
                id: shift_id,
            })?;
        if !current.status.can_transition_to(next) {
            return Err(DispatchError::IllegalShiftTransition {
                shift_id,
                from: current.status,
                to: next,
            });
        }

        let events = inner.checks.entry(shift_id).or_default();
        if events.iter().any(|e| e.kind == event.kind) {
            return Err(DispatchError::DuplicateCheck {
                shift_id,
                kind: match event.kind {
                    CheckKind::In => "in",
                    CheckKind::Out => "out",
                },
            });
        }
        events.push(event);

        let shift = inner.shifts.get_mut(&shift_id).ok_or(DispatchError::NotFound {
            entity: "shift",
            id: shift_id,
        })?;
        shift.status = next;
        Ok(shift.clone())
    }

    pub fn check_events(&self, shift_id: Uuid) -> DispatchResult<Vec<CheckEvent>> {
        Ok(self
            .read()?
            .checks
            .get(&shift_id)
            .cloned()
            .unwrap_or_default())
    }

    pub fn check_in_event(&self, shift_id: Uuid) -> DispatchResult<Option<CheckEvent>> {
        Ok(self
            .read()?
            .checks
            .get(&shift_id)
            .and_then(|events| events.iter().find(|e| e.kind == CheckKind::In))
            .cloned())
    }

    // =========================================================================
    // Substitution transaction
    // =========================================================================

    /// Execute the caregiver swap as one atomic unit: supersede the old
    /// assignment, create the replacement, append the substitution record,
    /// and move every still-planned shift dated today or later. The
    /// replacement must be free, gap-expanded, for every shift that will
    /// move; a collision with their existing schedule aborts the whole
    /// transaction. A second concurrent attempt observes the assignment
    /// already replaced and fails cleanly without mutating anything.
    pub fn apply_substitution(
        &self,
        old_assignment_id: Uuid,
        new_caregiver_id: Uuid,
        match_score: Option<f64>,
        reason: SubstitutionReason,
        today: NaiveDate,
        min_gap_minutes: i64,
    ) -> DispatchResult<SubstitutionApplied> {
        let mut inner = self.write()?;

        let old_assignment = inner
            .assignments
            .get(&old_assignment_id)
            .cloned()
            .ok_or(DispatchError::NotFound {
                entity: "assignment",
                id: old_assignment_id,
            })?;
        if !old_assignment.status.is_live() {
            return Err(DispatchError::AssignmentNotLive {
                assignment_id: old_assignment_id,
                status: old_assignment.status,
            });
        }

        // Every shift that would move must fit the replacement's existing
        // day, checked under this same guard so no concurrent write can
        // slip between check and transfer.
        let moving: Vec<Shift> = inner
            .shifts
            .values()
            .filter(|s| {
                s.assignment_id == old_assignment.id
                    && s.status == ShiftStatus::Planned
                    && s.date >= today
            })
            .cloned()
            .collect();
        for shift in &moving {
            let existing: Vec<Shift> = inner
                .shifts
                .values()
                .filter(|s| s.caregiver_id == new_caregiver_id && s.date == shift.date)
                .cloned()
                .collect();
            if crate::schedule::conflicts_with_gap(
                &existing,
                shift.start,
                shift.end,
                min_gap_minutes,
            ) {
                return Err(DispatchError::ShiftConflict {
                    caregiver_id: new_caregiver_id,
                    date: shift.date,
                });
            }
        }

        // Point of no return: everything below happens under the same
        // write guard.
        let mut old_assignment = old_assignment;
        old_assignment.status = AssignmentStatus::Replaced;
        inner
            .assignments
            .insert(old_assignment.id, old_assignment.clone());

        let new_assignment =
            Assignment::new(old_assignment.request_id, new_caregiver_id, match_score);
        inner
            .assignments
            .insert(new_assignment.id, new_assignment.clone());

        let substitution = Substitution {
            id: Uuid::new_v4(),
            old_assignment_id: old_assignment.id,
            new_assignment_id: new_assignment.id,
            old_caregiver_id: old_assignment.caregiver_id,
            new_caregiver_id,
            reason,
            created_at: Utc::now(),
        };
        inner.substitutions.push(substitution.clone());

        let mut transferred = Vec::new();
        for shift in inner.shifts.values_mut() {
            if shift.assignment_id == old_assignment.id
                && shift.status == ShiftStatus::Planned
                && shift.date >= today
            {
                shift.assignment_id = new_assignment.id;
                shift.caregiver_id = new_caregiver_id;
                transferred.push(shift.clone());
            }
        }
        transferred.sort_by_key(|s| (s.date, s.start));

        Ok(SubstitutionApplied {
            old_assignment,
            new_assignment,
            substitution,
            transferred,
        })
    }

    pub fn substitutions_on(&self, date: NaiveDate) -> DispatchResult<Vec<Substitution>> {
        Ok(self
            .read()?
            .substitutions
            .iter()
            .filter(|s| s.created_at.date_naive() == date)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Emergencies
    // =========================================================================

    pub fn put_emergency(&self, emergency: Emergency) -> DispatchResult<()> {
        self.write()?.emergencies.insert(emergency.id, emergency);
        Ok(())
    }

    pub fn get_emergency(&self, id: Uuid) -> DispatchResult<Emergency> {
        self.read()?
            .emergencies
            .get(&id)
            .cloned()
            .ok_or(DispatchError::NotFound {
                entity: "emergency",
                id,
            })
    }

    /// Mutate one emergency under the write lock. The closure's error
    /// aborts the mutation.
    pub fn modify_emergency(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Emergency) -> DispatchResult<()>,
    ) -> DispatchResult<Emergency> {
        let mut inner = self.write()?;
        let emergency = inner
            .emergencies
            .get_mut(&id)
            .ok_or(DispatchError::NotFound {
                entity: "emergency",
                id,
            })?;
        f(emergency)?;
        Ok(emergency.clone())
    }

    pub fn unresolved_emergencies(&self) -> DispatchResult<Vec<Emergency>> {
        Ok(self
            .read()?
            .emergencies
            .values()
            .filter(|e| !e.is_resolved())
            .cloned()
            .collect())
    }

    pub fn emergencies_resolved_on(&self, date: NaiveDate) -> DispatchResult<Vec<Emergency>> {
        Ok(self
            .read()?
            .emergencies
            .values()
            .filter(|e| {
                e.resolved_at
                    .map(|at| at.date_naive() == date)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    // =========================================================================
    // SLA metrics and alerts
    // =========================================================================

    /// Upsert a metric row keyed by (date, kind, dimension). Re-running a
    /// batch replaces the row instead of duplicating it.
    pub fn upsert_metric(&self, metric: SlaMetric) -> DispatchResult<()> {
        let key = (metric.date, metric.kind, metric.dimension.clone());
        self.write()?.metrics.insert(key, metric);
        Ok(())
    }

    pub fn metrics_for(&self, date: NaiveDate) -> DispatchResult<Vec<SlaMetric>> {
        let mut metrics: Vec<SlaMetric> = self
            .read()?
            .metrics
            .values()
            .filter(|m| m.date == date)
            .cloned()
            .collect();
        metrics.sort_by_key(|m| m.kind.to_string());
        Ok(metrics)
    }

    /// Insert an alert unless one already exists for (kind, date).
    /// Returns whether the alert was inserted.
    pub fn insert_alert_if_absent(&self, alert: SlaAlert) -> DispatchResult<bool> {
        let mut inner = self.write()?;
        let key = (alert.metric_kind, alert.date);
        if inner.alerts.contains_key(&key) {
            return Ok(false);
        }
        inner.alerts.insert(key, alert);
        Ok(true)
    }

    pub fn alerts_for(&self, date: NaiveDate) -> DispatchResult<Vec<SlaAlert>> {
        let mut alerts: Vec<SlaAlert> = self
            .read()?
            .alerts
            .values()
            .filter(|a| a.date == date)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.metric_kind.to_string());
        Ok(alerts)
    }

    pub fn acknowledge_alert(&self, id: Uuid) -> DispatchResult<()> {
        let mut inner = self.write()?;
        let alert = inner
            .alerts
            .values_mut()
            .find(|a| a.id == id)
            .ok_or(DispatchError::NotFound {
                entity: "sla alert",
                id,
            })?;
        alert.acknowledged = true;
        Ok(())
    }

    // =========================================================================
    // Notification outcomes
    // =========================================================================

    pub fn record_notification(&self, record: NotificationRecord) -> DispatchResult<()> {
        self.write()?.notifications.push(record);
        Ok(())
    }

    pub fn notifications_on(&self, date: NaiveDate) -> DispatchResult<Vec<NotificationRecord>> {
        Ok(self
            .read()?
            .notifications
            .iter()
            .filter(|n| n.date == date)
            .cloned()
            .collect())
    }
}
