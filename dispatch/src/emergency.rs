//! Emergency tracking and severity escalation.
//!
//! Severity only moves up the scale while an emergency is unresolved, and
//! resolution is terminal. Auto-escalation is poll-driven: each emergency
//! carries a deadline after which the next poll may raise its severity,
//! and every escalation moves the deadline forward, so repeated polls in
//! one sweep never double-escalate.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EmergencyConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::model::{Emergency, EmergencySeverity};
use crate::store::SharedStore;

pub struct EmergencyEscalator {
    store: SharedStore,
    config: EmergencyConfig,
}

impl EmergencyEscalator {
    pub fn new(store: SharedStore, config: EmergencyConfig) -> Self {
        Self { store, config }
    }

    /// Report a new emergency against a service request.
    pub fn create(
        &self,
        request_id: Uuid,
        severity: EmergencySeverity,
        description: impl Into<String>,
    ) -> DispatchResult<Emergency> {
        self.create_at(Utc::now(), request_id, severity, description)
    }

    pub fn create_at(
        &self,
        now: DateTime<Utc>,
        request_id: Uuid,
        severity: EmergencySeverity,
        description: impl Into<String>,
    ) -> DispatchResult<Emergency> {
        // The request must exist; an emergency is always tied to one.
        self.store.get_request(request_id)?;

        let emergency = Emergency {
            id: Uuid::new_v4(),
            request_id,
            severity,
            description: description.into(),
            created_at: now,
            resolved_at: None,
            resolution_note: None,
            escalation_deadline_at: now + self.escalation_window(severity),
            escalation_count: 0,
        };
        self.store.put_emergency(emergency.clone())?;
        warn!(
            emergency_id = %emergency.id,
            request_id = %request_id,
            severity = %severity,
            "emergency reported"
        );
        Ok(emergency)
    }

    /// Raise severity one step. Illegal on a resolved emergency and at the
    /// top of the scale.
    pub fn escalate(&self, emergency_id: Uuid) -> DispatchResult<Emergency> {
        self.escalate_at(Utc::now(), emergency_id)
    }

    pub fn escalate_at(
        &self,
        now: DateTime<Utc>,
        emergency_id: Uuid,
    ) -> DispatchResult<Emergency> {
        let config = self.config.clone();
        let escalated = self.store.modify_emergency(emergency_id, |emergency| {
            if emergency.is_resolved() {
                return Err(DispatchError::EmergencyResolved { emergency_id });
            }
            let next = emergency
                .severity
                .next()
                .ok_or(DispatchError::SeverityAtMaximum { emergency_id })?;
            emergency.severity = next;
            emergency.escalation_count += 1;
            emergency.escalation_deadline_at = now
                + Duration::minutes(config.response_budget_minutes(next) + config.grace_minutes);
            Ok(())
        })?;
        error!(
            emergency_id = %emergency_id,
            severity = %escalated.severity,
            escalations = escalated.escalation_count,
            "emergency escalated"
        );
        Ok(escalated)
    }

    /// Resolve an emergency. Terminal; a second resolve is illegal.
    pub fn resolve(
        &self,
        emergency_id: Uuid,
        note: impl Into<String>,
    ) -> DispatchResult<Emergency> {
        self.resolve_at(Utc::now(), emergency_id, note)
    }

    pub fn resolve_at(
        &self,
        now: DateTime<Utc>,
        emergency_id: Uuid,
        note: impl Into<String>,
    ) -> DispatchResult<Emergency> {
        let note = note.into();
        let resolved = self.store.modify_emergency(emergency_id, |emergency| {
            if emergency.is_resolved() {
                return Err(DispatchError::EmergencyResolved { emergency_id });
            }
            emergency.resolved_at = Some(now);
            emergency.resolution_note = Some(note);
            Ok(())
        })?;
        info!(
            emergency_id = %emergency_id,
            severity = %resolved.severity,
            "emergency resolved"
        );
        Ok(resolved)
    }

    /// Poll sweep: escalate every unresolved emergency whose deadline has
    /// passed. An emergency that cannot escalate, because it sits at
    /// maximum severity or was resolved mid-sweep, is skipped and the rest
    /// of the sweep continues. Returns the emergencies escalated by this
    /// sweep; calling again at the same instant escalates nothing.
    pub fn poll(&self) -> DispatchResult<Vec<Emergency>> {
        self.poll_at(Utc::now())
    }

    pub fn poll_at(&self, now: DateTime<Utc>) -> DispatchResult<Vec<Emergency>> {
        let mut escalated = Vec::new();
        for emergency in self.store.unresolved_emergencies()? {
            if emergency.escalation_deadline_at > now {
                continue;
            }
            match self.escalate_at(now, emergency.id) {
                Ok(e) => escalated.push(e),
                Err(e) => {
                    debug!(emergency_id = %emergency.id, error = %e, "sweep skipped emergency");
                }
            }
        }
        Ok(escalated)
    }

    fn escalation_window(&self, severity: EmergencySeverity) -> Duration {
        Duration::minutes(
            self.config.response_budget_minutes(severity) + self.config.grace_minutes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ServiceRequest, UrgencyLevel};
    use crate::store::DispatchStore;
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn escalator() -> (EmergencyEscalator, Uuid) {
        let store = DispatchStore::new().shared();
        let request = ServiceRequest::new(
            Uuid::new_v4(),
            "elder_care",
            UrgencyLevel::High,
            "north",
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 6).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        );
        let request_id = request.id;
        store.put_request(request).unwrap();
        (
            EmergencyEscalator::new(store, EmergencyConfig::default()),
            request_id,
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_create_sets_deadline_from_severity_budget() {
        let (escalator, request_id) = escalator();
        // Medium budget 120min + grace 5min
        let emergency = escalator
            .create_at(t0(), request_id, EmergencySeverity::Medium, "fall reported")
            .unwrap();
        assert_eq!(
            emergency.escalation_deadline_at,
            t0() + Duration::minutes(125)
        );
        assert_eq!(emergency.escalation_count, 0);
    }

    #[test]
    fn test_create_requires_existing_request() {
        let (escalator, _) = escalator();
        let err = escalator
            .create_at(t0(), Uuid::new_v4(), EmergencySeverity::Low, "x")
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { .. }));
    }

    #[test]
    fn test_escalate_moves_one_step_and_resets_deadline() {
        let (escalator, request_id) = escalator();
        let emergency = escalator
            .create_at(t0(), request_id, EmergencySeverity::Low, "confusion")
            .unwrap();

        let later = t0() + Duration::hours(5);
        let escalated = escalator.escalate_at(later, emergency.id).unwrap();
        assert_eq!(escalated.severity, EmergencySeverity::Medium);
        assert_eq!(escalated.escalation_count, 1);
        // Deadline recomputed from the new severity's budget
        assert_eq!(
            escalated.escalation_deadline_at,
            later + Duration::minutes(125)
        );
    }

    #[test]
    fn test_escalate_at_maximum_is_illegal() {
        let (escalator, request_id) = escalator();
        let emergency = escalator
            .create_at(t0(), request_id, EmergencySeverity::Critical, "cardiac")
            .unwrap();
        let err = escalator.escalate_at(t0(), emergency.id).unwrap_err();
        assert!(matches!(err, DispatchError::SeverityAtMaximum { .. }));
    }

    #[test]
    fn test_resolution_is_terminal() {
        let (escalator, request_id) = escalator();
        let emergency = escalator
            .create_at(t0(), request_id, EmergencySeverity::High, "injury")
            .unwrap();

        let resolved = escalator
            .resolve_at(t0() + Duration::minutes(20), emergency.id, "paramedics on site")
            .unwrap();
        assert!(resolved.is_resolved());
        assert_eq!(resolved.resolution_note.as_deref(), Some("paramedics on site"));

        let err = escalator
            .resolve_at(t0() + Duration::minutes(30), emergency.id, "again")
            .unwrap_err();
        assert!(matches!(err, DispatchError::EmergencyResolved { .. }));

        let err = escalator
            .escalate_at(t0() + Duration::hours(2), emergency.id)
            .unwrap_err();
        assert!(matches!(err, DispatchError::EmergencyResolved { .. }));
    }

    #[test]
    fn test_poll_escalates_only_overdue() {
        let (escalator, request_id) = escalator();
        // High budget 30min + grace 5min, so overdue at t0+36
        let overdue = escalator
            .create_at(t0(), request_id, EmergencySeverity::High, "unresponsive")
            .unwrap();
        let fresh = escalator
            .create_at(t0(), request_id, EmergencySeverity::Low, "minor")
            .unwrap();

        let sweep = t0() + Duration::minutes(36);
        let escalated = escalator.poll_at(sweep).unwrap();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].id, overdue.id);
        assert_eq!(escalated[0].severity, EmergencySeverity::Critical);

        let fresh = escalator.store.get_emergency(fresh.id).unwrap();
        assert_eq!(fresh.severity, EmergencySeverity::Low);
    }

    #[test]
    fn test_repeated_poll_does_not_double_escalate() {
        let (escalator, request_id) = escalator();
        let emergency = escalator
            .create_at(t0(), request_id, EmergencySeverity::Low, "wandering")
            .unwrap();

        let sweep = t0() + Duration::hours(5);
        assert_eq!(escalator.poll_at(sweep).unwrap().len(), 1);
        // Same instant again: deadline moved forward, nothing to do
        assert_eq!(escalator.poll_at(sweep).unwrap().len(), 0);

        let current = escalator.store.get_emergency(emergency.id).unwrap();
        assert_eq!(current.severity, EmergencySeverity::Medium);
        assert_eq!(current.escalation_count, 1);
    }

    #[test]
    fn test_poll_skips_critical_and_resolved_but_finishes_sweep() {
        let (escalator, request_id) = escalator();
        let critical = escalator
            .create_at(t0(), request_id, EmergencySeverity::Critical, "cardiac")
            .unwrap();
        let resolved = escalator
            .create_at(t0(), request_id, EmergencySeverity::Low, "handled")
            .unwrap();
        escalator
            .resolve_at(t0() + Duration::minutes(1), resolved.id, "done")
            .unwrap();
        // Also overdue; must escalate even though another overdue
        // emergency in the same sweep cannot
        let escalatable = escalator
            .create_at(t0(), request_id, EmergencySeverity::Medium, "fall")
            .unwrap();

        let escalated = escalator.poll_at(t0() + Duration::days(1)).unwrap();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].id, escalatable.id);
        assert_eq!(escalated[0].severity, EmergencySeverity::High);

        let critical = escalator.store.get_emergency(critical.id).unwrap();
        assert_eq!(critical.severity, EmergencySeverity::Critical);
        assert_eq!(critical.escalation_count, 0);
    }
}
