//! Substitution — atomic reassignment of a shift series to a different
//! caregiver when the current one fails.
//!
//! Candidate selection and every precondition run before the store
//! transaction; any failure up to that point leaves all state unchanged.
//! The transaction itself supersedes the old assignment, creates the new
//! one, appends the substitution record, and transfers future planned
//! shifts in one atomic unit. Client notification happens after commit
//! and never rolls it back.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::directory::NotificationGateway;
use crate::error::{DispatchError, DispatchResult};
use crate::matcher::{CandidateMatcher, CareRequirements};
use crate::model::{NotificationRecord, Shift, ShiftStatus, SubstitutionReason};
use crate::schedule::ScheduleManager;
use crate::store::{SharedStore, SubstitutionApplied};

/// Coordinates caregiver swaps across matcher, schedule, and store.
pub struct SubstitutionCoordinator {
    store: SharedStore,
    matcher: Arc<CandidateMatcher>,
    schedule: Arc<ScheduleManager>,
    gateway: Arc<dyn NotificationGateway>,
}

impl SubstitutionCoordinator {
    pub fn new(
        store: SharedStore,
        matcher: Arc<CandidateMatcher>,
        schedule: Arc<ScheduleManager>,
        gateway: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            store,
            matcher,
            schedule,
            gateway,
        }
    }

    /// Replace the caregiver on a live assignment.
    ///
    /// When no replacement is given, the matcher proposes candidates and
    /// the first one free across the shifts to transfer is chosen; if
    /// none clears the threshold or all are busy the call fails with
    /// `NoSubstituteAvailable` and nothing is mutated. The store
    /// re-checks the chosen replacement's calendar under its write guard,
    /// so an explicit replacement with a clashing shift fails with
    /// `ShiftConflict`.
    pub async fn process_substitution(
        &self,
        assignment_id: Uuid,
        reason: SubstitutionReason,
        replacement: Option<Uuid>,
        requirements: &CareRequirements,
    ) -> DispatchResult<SubstitutionApplied> {
        self.process_substitution_at(
            Utc::now().date_naive(),
            assignment_id,
            reason,
            replacement,
            requirements,
        )
        .await
    }

    pub async fn process_substitution_at(
        &self,
        today: NaiveDate,
        assignment_id: Uuid,
        reason: SubstitutionReason,
        replacement: Option<Uuid>,
        requirements: &CareRequirements,
    ) -> DispatchResult<SubstitutionApplied> {
        let assignment = self.store.get_assignment(assignment_id)?;
        if !assignment.status.is_live() {
            return Err(DispatchError::AssignmentNotLive {
                assignment_id,
                status: assignment.status,
            });
        }
        let request = self.store.get_request(assignment.request_id)?;

        let (new_caregiver_id, match_score) = match replacement {
            Some(id) => (id, None),
            None => {
                let transfer = self.transfer_shifts(assignment_id, today)?;
                let candidates = self
                    .matcher
                    .substitute_candidates(&request, requirements, assignment.caregiver_id)
                    .await?;
                let mut chosen = None;
                for candidate in candidates {
                    if self.replacement_is_free(candidate.caregiver_id, &transfer)? {
                        chosen = Some(candidate);
                        break;
                    }
                }
                match chosen {
                    Some(candidate) => (candidate.caregiver_id, Some(candidate.total_score)),
                    None => {
                        info!(
                            assignment_id = %assignment_id,
                            reason = %reason,
                            "no substitute available"
                        );
                        return Err(DispatchError::NoSubstituteAvailable {
                            request_id: request.id,
                        });
                    }
                }
            }
        };

        // All-or-nothing from here: the store applies every mutation under
        // one write guard, re-checking the replacement's calendar there so
        // the transfer cannot create overlapping shifts, and a concurrent
        // attempt on the same assignment observes it already replaced.
        let applied = self.store.apply_substitution(
            assignment_id,
            new_caregiver_id,
            match_score,
            reason,
            today,
            self.schedule.min_gap_minutes(),
        )?;

        for shift in &applied.transferred {
            self.schedule
                .invalidate_day(applied.old_assignment.caregiver_id, shift.date);
            self.schedule.invalidate_day(shift.caregiver_id, shift.date);
        }

        info!(
            old_caregiver = %applied.old_assignment.caregiver_id,
            new_caregiver = %new_caregiver_id,
            reason = %reason,
            transferred = applied.transferred.len(),
            "substitution committed"
        );

        self.notify_client_async(&request.client_id, &applied, reason);
        Ok(applied)
    }

    /// No-show recovery: mark the missed shift, then substitute the
    /// caregiver on its assignment.
    pub async fn handle_no_show(
        &self,
        shift_id: Uuid,
        requirements: &CareRequirements,
    ) -> DispatchResult<SubstitutionApplied> {
        self.handle_no_show_at(Utc::now().date_naive(), shift_id, requirements)
            .await
    }

    pub async fn handle_no_show_at(
        &self,
        today: NaiveDate,
        shift_id: Uuid,
        requirements: &CareRequirements,
    ) -> DispatchResult<SubstitutionApplied> {
        let shift = self.schedule.transition(shift_id, ShiftStatus::Missed)?;
        warn!(shift_id = %shift_id, caregiver_id = %shift.caregiver_id, "no-show recorded");
        self.process_substitution_at(
            today,
            shift.assignment_id,
            SubstitutionReason::NoShow,
            None,
            requirements,
        )
        .await
    }

    /// Planned shifts from today onward, the set a substitution moves.
    fn transfer_shifts(&self, assignment_id: Uuid, today: NaiveDate) -> DispatchResult<Vec<Shift>> {
        let shifts = self.store.shifts_for_assignment(assignment_id)?;
        Ok(shifts
            .into_iter()
            .filter(|s| s.status == ShiftStatus::Planned && s.date >= today)
            .collect())
    }

    fn replacement_is_free(&self, caregiver_id: Uuid, shifts: &[Shift]) -> DispatchResult<bool> {
        for shift in shifts {
            if !self
                .schedule
                .is_available(caregiver_id, shift.date, shift.start, shift.end)?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fire-and-forget client notification; the substitution is already
    /// committed and a delivery failure must not undo it. The outcome is
    /// recorded for the notification-success metric.
    fn notify_client_async(
        &self,
        client_id: &Uuid,
        applied: &SubstitutionApplied,
        reason: SubstitutionReason,
    ) {
        let gateway = Arc::clone(&self.gateway);
        let store = Arc::clone(&self.store);
        let client_id = *client_id;
        let payload = serde_json::json!({
            "substitution_id": applied.substitution.id,
            "new_caregiver_id": applied.new_assignment.caregiver_id,
            "reason": reason.to_string(),
        });
        tokio::spawn(async move {
            let queued = match gateway
                .dispatch(client_id, "caregiver_substituted", payload)
                .await
            {
                Ok(outcome) => outcome == crate::directory::NotificationOutcome::Queued,
                Err(e) => {
                    warn!(client_id = %client_id, error = %e, "substitution notification failed");
                    false
                }
            };
            let now = Utc::now();
            let record = NotificationRecord {
                id: Uuid::new_v4(),
                client_id,
                kind: "caregiver_substituted".to_string(),
                date: now.date_naive(),
                queued,
                at: now,
            };
            if let Err(e) = store.record_notification(record) {
                warn!(error = %e, "failed to record notification outcome");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CancellationPolicy, MatchingConfig, ScheduleConfig};
    use crate::directory::{
        AvailabilityWindow, CaregiverProfile, InMemoryCrm, InMemoryDirectory, InMemoryGateway,
    };
    use crate::model::{Assignment, AssignmentStatus, ServiceRequest, Shift, UrgencyLevel};
    use crate::store::DispatchStore;
    use chrono::{NaiveDate, NaiveTime, Weekday};

    fn time(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn request() -> ServiceRequest {
        // 2025-06-02 is a Monday
        ServiceRequest::new(
            Uuid::new_v4(),
            "elder_care",
            UrgencyLevel::Normal,
            "north",
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 6).unwrap(),
            time(9),
            time(12),
        )
    }

    fn backup_profile(rating: f64) -> CaregiverProfile {
        CaregiverProfile {
            id: Uuid::new_v4(),
            name: "Backup".into(),
            service_types: vec!["elder_care".into()],
            skills: vec!["mobility".into()],
            availability: vec![AvailabilityWindow {
                weekday: Weekday::Mon,
                start: time(8),
                end: time(16),
            }],
            regions: vec!["north".into()],
            average_rating: rating,
            distance_km: None,
        }
    }

    struct Fixture {
        coordinator: SubstitutionCoordinator,
        store: SharedStore,
        gateway: Arc<InMemoryGateway>,
        request: ServiceRequest,
        assignment: Assignment,
        shifts: Vec<Shift>,
    }

    fn fixture(backups: Vec<CaregiverProfile>) -> Fixture {
        let store = DispatchStore::new().shared();
        let directory = Arc::new(InMemoryDirectory::with_profiles(backups));
        let matcher = Arc::new(CandidateMatcher::new(
            Arc::clone(&store),
            directory,
            Arc::new(InMemoryCrm::new()),
            MatchingConfig::default(),
        ));
        let schedule = Arc::new(ScheduleManager::new(
            Arc::clone(&store),
            ScheduleConfig::default(),
            CancellationPolicy::default(),
        ));
        let gateway = Arc::new(InMemoryGateway::new());
        let coordinator = SubstitutionCoordinator::new(
            Arc::clone(&store),
            matcher,
            schedule,
            Arc::clone(&gateway) as Arc<dyn NotificationGateway>,
        );

        let request = request();
        store.put_request(request.clone()).unwrap();
        let assignment = Assignment::new(request.id, Uuid::new_v4(), Some(90.0));
        store.insert_assignment(assignment.clone()).unwrap();

        let mut shifts = Vec::new();
        for day in [2u32, 3, 4, 5] {
            let shift = Shift::new(
                &assignment,
                request.client_id,
                NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
                time(9),
                time(12),
            );
            store.put_shift(shift.clone()).unwrap();
            shifts.push(shift);
        }

        Fixture {
            coordinator,
            store,
            gateway,
            request,
            assignment,
            shifts,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 3).unwrap()
    }

    #[tokio::test]
    async fn test_no_show_substitution_with_qualifying_backup() {
        // Backup scores 98 (all sub-scores 100 except rating 80),
        // well above the 70 threshold
        let fx = fixture(vec![backup_profile(4.0)]);
        let missed_shift = &fx.shifts[1]; // 2025-06-03

        let applied = fx
            .coordinator
            .handle_no_show_at(today(), missed_shift.id, &CareRequirements::default())
            .await
            .unwrap();

        assert_eq!(applied.old_assignment.status, AssignmentStatus::Replaced);
        assert_eq!(applied.substitution.reason, SubstitutionReason::NoShow);
        // The missed shift stays missed; the two later planned shifts move
        assert_eq!(applied.transferred.len(), 2);
        let missed = fx.store.get_shift(missed_shift.id).unwrap();
        assert_eq!(missed.status, ShiftStatus::Missed);
        assert_eq!(missed.caregiver_id, fx.assignment.caregiver_id);
        // Past shift untouched
        let past = fx.store.get_shift(fx.shifts[0].id).unwrap();
        assert_eq!(past.caregiver_id, fx.assignment.caregiver_id);
        // One substitution record
        let subs = fx.store.substitutions_on(Utc::now().date_naive()).unwrap();
        assert_eq!(subs.len(), 1);
    }

    #[tokio::test]
    async fn test_old_and_new_assignment_never_both_live() {
        let fx = fixture(vec![backup_profile(4.5)]);
        let applied = fx
            .coordinator
            .process_substitution_at(
                today(),
                fx.assignment.id,
                SubstitutionReason::Emergency,
                None,
                &CareRequirements::default(),
            )
            .await
            .unwrap();

        let old = fx.store.get_assignment(applied.old_assignment.id).unwrap();
        let new = fx.store.get_assignment(applied.new_assignment.id).unwrap();
        assert!(!old.status.is_live());
        assert!(new.status.is_live());
    }

    #[tokio::test]
    async fn test_no_backup_leaves_state_unchanged() {
        let fx = fixture(vec![]);
        let err = fx
            .coordinator
            .process_substitution_at(
                today(),
                fx.assignment.id,
                SubstitutionReason::ExcessiveDelay,
                None,
                &CareRequirements::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoSubstituteAvailable { .. }));

        // No mutation is observable
        let assignment = fx.store.get_assignment(fx.assignment.id).unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Assigned);
        for shift in &fx.shifts {
            assert_eq!(
                fx.store.get_shift(shift.id).unwrap().caregiver_id,
                fx.assignment.caregiver_id
            );
        }
        assert!(fx
            .store
            .substitutions_on(Utc::now().date_naive())
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_below_threshold_backup_is_not_chosen() {
        // Wrong region, no availability, rating 1.0: total 52, below
        // the 70 threshold
        let mut weak = backup_profile(1.0);
        weak.regions = vec!["south".into()];
        weak.availability.clear();
        let fx = fixture(vec![weak]);

        let err = fx
            .coordinator
            .process_substitution_at(
                today(),
                fx.assignment.id,
                SubstitutionReason::NoShow,
                None,
                &CareRequirements::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoSubstituteAvailable { .. }));
    }

    #[tokio::test]
    async fn test_second_substitution_fails_cleanly() {
        let fx = fixture(vec![backup_profile(4.5), backup_profile(4.0)]);
        fx.coordinator
            .process_substitution_at(
                today(),
                fx.assignment.id,
                SubstitutionReason::Emergency,
                None,
                &CareRequirements::default(),
            )
            .await
            .unwrap();

        let err = fx
            .coordinator
            .process_substitution_at(
                today(),
                fx.assignment.id,
                SubstitutionReason::Emergency,
                None,
                &CareRequirements::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::AssignmentNotLive { .. }));
    }

    #[tokio::test]
    async fn test_explicit_replacement_skips_matching() {
        let fx = fixture(vec![]); // empty directory: matching would fail
        let chosen = Uuid::new_v4();
        let applied = fx
            .coordinator
            .process_substitution_at(
                today(),
                fx.assignment.id,
                SubstitutionReason::ClientRequest,
                Some(chosen),
                &CareRequirements::default(),
            )
            .await
            .unwrap();
        assert_eq!(applied.new_assignment.caregiver_id, chosen);
        assert!(applied.new_assignment.match_score.is_none());
    }

    #[tokio::test]
    async fn test_busy_explicit_replacement_rejected_without_mutation() {
        let fx = fixture(vec![]);
        let chosen = Uuid::new_v4();
        // The chosen caregiver already works 10:00-13:00 on a transfer date
        let other_request = request();
        fx.store.put_request(other_request.clone()).unwrap();
        let other_assignment = Assignment::new(other_request.id, chosen, None);
        fx.store.insert_assignment(other_assignment.clone()).unwrap();
        let busy = Shift::new(
            &other_assignment,
            other_request.client_id,
            NaiveDate::from_ymd_opt(2025, 6, 4).unwrap(),
            time(10),
            time(13),
        );
        fx.store.put_shift(busy).unwrap();

        let err = fx
            .coordinator
            .process_substitution_at(
                today(),
                fx.assignment.id,
                SubstitutionReason::ClientRequest,
                Some(chosen),
                &CareRequirements::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ShiftConflict { .. }));

        // No mutation is observable
        let assignment = fx.store.get_assignment(fx.assignment.id).unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Assigned);
        for shift in &fx.shifts {
            assert_eq!(
                fx.store.get_shift(shift.id).unwrap().caregiver_id,
                fx.assignment.caregiver_id
            );
        }
        assert!(fx
            .store
            .substitutions_on(Utc::now().date_naive())
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_matcher_skips_busy_candidate_for_free_one() {
        let strong = backup_profile(5.0);
        let weak = backup_profile(4.0);
        let strong_id = strong.id;
        let weak_id = weak.id;
        let fx = fixture(vec![strong, weak]);

        // The higher-scored candidate is booked over one transfer shift
        let other_request = request();
        fx.store.put_request(other_request.clone()).unwrap();
        let other_assignment = Assignment::new(other_request.id, strong_id, None);
        fx.store.insert_assignment(other_assignment.clone()).unwrap();
        let busy = Shift::new(
            &other_assignment,
            other_request.client_id,
            NaiveDate::from_ymd_opt(2025, 6, 4).unwrap(),
            time(10),
            time(13),
        );
        fx.store.put_shift(busy).unwrap();

        let applied = fx
            .coordinator
            .process_substitution_at(
                today(),
                fx.assignment.id,
                SubstitutionReason::Emergency,
                None,
                &CareRequirements::default(),
            )
            .await
            .unwrap();
        assert_eq!(applied.new_assignment.caregiver_id, weak_id);
        for shift in &applied.transferred {
            assert_eq!(shift.caregiver_id, weak_id);
        }
    }

    #[tokio::test]
    async fn test_client_notified_after_commit() {
        let fx = fixture(vec![backup_profile(4.5)]);
        fx.coordinator
            .process_substitution_at(
                today(),
                fx.assignment.id,
                SubstitutionReason::NoShow,
                None,
                &CareRequirements::default(),
            )
            .await
            .unwrap();

        // The dispatch task is fire-and-forget; give it a beat
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let dispatched = fx.gateway.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].0, fx.request.client_id);
        assert_eq!(dispatched[0].1, "caregiver_substituted");
        // Outcome recorded for the SLA notification metric
        let records = fx
            .store
            .notifications_on(Utc::now().date_naive())
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].queued);
    }
}
