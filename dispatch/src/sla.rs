//! SLA monitoring — daily KPI computation and breach alerting.
//!
//! The daily batch recomputes six metrics for a date and upserts them, so
//! re-running a batch replaces rows instead of duplicating them. Breaches
//! raise an alert at most once per (metric, date), tiered by how far the
//! actual landed from the target. Real-time scans for overdue check-ins
//! and overdue emergencies run independently of the batch.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::checkpoint::{CheckpointTracker, DelayedShift};
use crate::config::{EmergencyConfig, SlaTargets};
use crate::error::DispatchResult;
use crate::model::{
    AlertSeverity, Emergency, MetricDirection, MetricKind, ShiftStatus, SlaAlert, SlaMetric,
};
use crate::store::SharedStore;

pub struct SlaMonitor {
    store: SharedStore,
    targets: SlaTargets,
    checkpoint: Arc<CheckpointTracker>,
    emergency: EmergencyConfig,
}

impl SlaMonitor {
    pub fn new(
        store: SharedStore,
        targets: SlaTargets,
        checkpoint: Arc<CheckpointTracker>,
        emergency: EmergencyConfig,
    ) -> Self {
        Self {
            store,
            targets,
            checkpoint,
            emergency,
        }
    }

    /// Compute and upsert every daily metric for a date, raising alerts
    /// for breached targets. Safe to re-run; rows are replaced and alerts
    /// deduplicated.
    pub fn run_daily(&self, date: NaiveDate) -> DispatchResult<Vec<SlaMetric>> {
        self.run_daily_at(Utc::now(), date)
    }

    pub fn run_daily_at(
        &self,
        now: DateTime<Utc>,
        date: NaiveDate,
    ) -> DispatchResult<Vec<SlaMetric>> {
        let mut metrics = Vec::with_capacity(MetricKind::all().len());
        for &kind in MetricKind::all() {
            let (actual, sample_size) = self.compute(kind, date)?;
            let target = self.target_for(kind);
            // An empty sample has nothing to breach.
            let target_met = sample_size == 0
                || match kind.direction() {
                    MetricDirection::HigherIsBetter => actual >= target,
                    MetricDirection::LowerIsBetter => actual <= target,
                };
            let metric = SlaMetric {
                id: Uuid::new_v4(),
                date,
                kind,
                dimension: None,
                target,
                actual,
                sample_size,
                target_met,
                computed_at: now,
            };
            if !metric.target_met {
                self.raise_alert(&metric, now)?;
            }
            self.store.upsert_metric(metric.clone())?;
            metrics.push(metric);
        }
        info!(date = %date, metrics = metrics.len(), "daily sla batch complete");
        Ok(metrics)
    }

    /// Shifts currently overdue for check-in.
    pub fn overdue_check_ins(&self) -> DispatchResult<Vec<DelayedShift>> {
        self.checkpoint.check_delays()
    }

    pub fn overdue_check_ins_at(&self, now: DateTime<Utc>) -> DispatchResult<Vec<DelayedShift>> {
        self.checkpoint.check_delays_at(now)
    }

    /// Unresolved emergencies older than their severity's response budget,
    /// most severe first.
    pub fn overdue_emergencies(&self) -> DispatchResult<Vec<Emergency>> {
        self.overdue_emergencies_at(Utc::now())
    }

    pub fn overdue_emergencies_at(&self, now: DateTime<Utc>) -> DispatchResult<Vec<Emergency>> {
        let mut overdue: Vec<Emergency> = self
            .store
            .unresolved_emergencies()?
            .into_iter()
            .filter(|e| {
                let budget = Duration::minutes(self.emergency.response_budget_minutes(e.severity));
                e.created_at + budget < now
            })
            .collect();
        overdue.sort_by_key(|e| (std::cmp::Reverse(e.severity), e.created_at));
        if !overdue.is_empty() {
            warn!(count = overdue.len(), "emergencies overdue for resolution");
        }
        Ok(overdue)
    }

    fn compute(&self, kind: MetricKind, date: NaiveDate) -> DispatchResult<(f64, usize)> {
        match kind {
            MetricKind::CheckInPunctuality => self.punctuality(date),
            MetricKind::SubstitutionRate => self.substitution_rate(date),
            MetricKind::CancellationRate => self.cancellation_rate(date),
            MetricKind::EmergencyResolutionTime => self.mean_resolution_minutes(date),
            MetricKind::NotificationSuccessRate => self.notification_success(date),
            MetricKind::OccupancyRate => self.occupancy(date),
        }
    }

    fn target_for(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::CheckInPunctuality => self.targets.punctuality_percent,
            MetricKind::SubstitutionRate => self.targets.substitution_rate_percent,
            MetricKind::CancellationRate => self.targets.cancellation_rate_percent,
            MetricKind::EmergencyResolutionTime => self.targets.emergency_resolution_minutes,
            MetricKind::NotificationSuccessRate => self.targets.notification_success_percent,
            MetricKind::OccupancyRate => self.targets.occupancy_percent,
        }
    }

    /// Share of the date's check-ins that landed within the lateness
    /// tolerance.
    fn punctuality(&self, date: NaiveDate) -> DispatchResult<(f64, usize)> {
        let mut total = 0usize;
        let mut on_time = 0usize;
        for shift in self.store.shifts_on(date)? {
            if let Some(event) = self.store.check_in_event(shift.id)? {
                total += 1;
                if !self.checkpoint.is_late(&shift, event.at) {
                    on_time += 1;
                }
            }
        }
        Ok((percent(on_time, total), total))
    }

    /// Substitutions per assignment created on the date.
    fn substitution_rate(&self, date: NaiveDate) -> DispatchResult<(f64, usize)> {
        let substitutions = self.store.substitutions_on(date)?.len();
        let assignments = self.store.assignments_created_on(date)?.len();
        Ok((percent(substitutions, assignments), assignments))
    }

    /// Missed shifts per shift scheduled on the date.
    fn cancellation_rate(&self, date: NaiveDate) -> DispatchResult<(f64, usize)> {
        let shifts = self.store.shifts_on(date)?;
        let missed = shifts
            .iter()
            .filter(|s| s.status == ShiftStatus::Missed)
            .count();
        Ok((percent(missed, shifts.len()), shifts.len()))
    }

    /// Mean minutes from report to resolution over the date's resolutions.
    fn mean_resolution_minutes(&self, date: NaiveDate) -> DispatchResult<(f64, usize)> {
        let resolved = self.store.emergencies_resolved_on(date)?;
        if resolved.is_empty() {
            return Ok((0.0, 0));
        }
        let total_minutes: i64 = resolved
            .iter()
            .filter_map(|e| e.resolved_at.map(|at| (at - e.created_at).num_minutes()))
            .sum();
        Ok((
            total_minutes as f64 / resolved.len() as f64,
            resolved.len(),
        ))
    }

    /// Share of the date's notifications the gateway accepted.
    fn notification_success(&self, date: NaiveDate) -> DispatchResult<(f64, usize)> {
        let records = self.store.notifications_on(date)?;
        let queued = records.iter().filter(|r| r.queued).count();
        Ok((percent(queued, records.len()), records.len()))
    }

    /// Scheduled care hours against the configured daily capacity.
    fn occupancy(&self, date: NaiveDate) -> DispatchResult<(f64, usize)> {
        let shifts = self.store.shifts_on(date)?;
        let scheduled_hours: f64 = shifts
            .iter()
            .map(|s| s.duration_minutes() as f64 / 60.0)
            .sum();
        let actual = if self.targets.daily_capacity_hours > 0.0 {
            (scheduled_hours / self.targets.daily_capacity_hours) * 100.0
        } else {
            0.0
        };
        Ok((actual, shifts.len()))
    }

    fn raise_alert(&self, metric: &SlaMetric, now: DateTime<Utc>) -> DispatchResult<()> {
        let variance = metric.variance_percent();
        let alert = SlaAlert {
            id: Uuid::new_v4(),
            metric_kind: metric.kind,
            date: metric.date,
            severity: alert_severity(variance),
            message: format!(
                "{} at {:.1} missed target {:.1}",
                metric.kind, metric.actual, metric.target
            ),
            variance_percent: variance,
            acknowledged: false,
            created_at: now,
        };
        if self.store.insert_alert_if_absent(alert.clone())? {
            warn!(
                metric = %metric.kind,
                date = %metric.date,
                severity = %alert.severity,
                variance = variance,
                "sla breach"
            );
        }
        Ok(())
    }
}

/// Alert severity tiered by variance magnitude.
fn alert_severity(variance_percent: f64) -> AlertSeverity {
    if variance_percent >= 30.0 {
        AlertSeverity::Critical
    } else if variance_percent >= 15.0 {
        AlertSeverity::Warning
    } else {
        AlertSeverity::Info
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CancellationPolicy, CheckpointConfig, ScheduleConfig};
    use crate::model::{
        Assignment, CheckEvent, CheckKind, GeoPoint, NotificationRecord, Shift,
        SubstitutionReason,
    };
    use crate::schedule::ScheduleManager;
    use crate::store::DispatchStore;
    use chrono::{NaiveTime, TimeZone};

    /// Route log output through the test harness so breach warnings show
    /// up in failing test output.
    fn capture_logs() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("dispatch=debug")
            .try_init();
    }

    fn monitor() -> (SlaMonitor, SharedStore) {
        let store = DispatchStore::new().shared();
        let schedule = Arc::new(ScheduleManager::new(
            Arc::clone(&store),
            ScheduleConfig::default(),
            CancellationPolicy::default(),
        ));
        let checkpoint = Arc::new(CheckpointTracker::new(
            Arc::clone(&store),
            schedule,
            CheckpointConfig::default(),
        ));
        (
            SlaMonitor::new(
                Arc::clone(&store),
                SlaTargets::default(),
                checkpoint,
                EmergencyConfig::default(),
            ),
            store,
        )
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        date().and_time(time(h, m)).and_utc()
    }

    fn shift_at(store: &SharedStore, start: NaiveTime, end: NaiveTime) -> Shift {
        let assignment = Assignment::new(Uuid::new_v4(), Uuid::new_v4(), None);
        let shift = Shift::new(&assignment, Uuid::new_v4(), date(), start, end);
        store.put_shift(shift.clone()).unwrap();
        shift
    }

    fn check_in(store: &SharedStore, shift: &Shift, when: DateTime<Utc>) {
        store
            .add_check_event(CheckEvent {
                id: Uuid::new_v4(),
                shift_id: shift.id,
                kind: CheckKind::In,
                at: when,
                location: GeoPoint {
                    lat: 52.5,
                    lon: 13.4,
                },
                activities: vec![],
            })
            .unwrap();
    }

    fn metric_for(metrics: &[SlaMetric], kind: MetricKind) -> &SlaMetric {
        metrics.iter().find(|m| m.kind == kind).unwrap()
    }

    #[test]
    fn test_punctuality_breach_raises_info_alert() {
        capture_logs();
        let (monitor, store) = monitor();
        // 25 check-ins, 23 on time: 92% against a 95% target
        for i in 0..25 {
            let shift = shift_at(&store, time(9, 0), time(12, 0));
            let delay = if i < 23 { 5 } else { 45 };
            check_in(&store, &shift, at(9, delay));
        }

        let metrics = monitor.run_daily_at(at(23, 0), date()).unwrap();
        let punctuality = metric_for(&metrics, MetricKind::CheckInPunctuality);
        assert_eq!(punctuality.actual, 92.0);
        assert_eq!(punctuality.sample_size, 25);
        assert!(!punctuality.target_met);
        // Variance 3.16%: informational only
        let alerts = store.alerts_for(date()).unwrap();
        let alert = alerts
            .iter()
            .find(|a| a.metric_kind == MetricKind::CheckInPunctuality)
            .unwrap();
        assert_eq!(alert.severity, AlertSeverity::Info);
        assert!((alert.variance_percent - 3.157894).abs() < 0.001);
    }

    #[test]
    fn test_rerun_replaces_metrics_and_keeps_one_alert() {
        let (monitor, store) = monitor();
        let shift = shift_at(&store, time(9, 0), time(12, 0));
        check_in(&store, &shift, at(10, 0)); // late: 0% punctuality

        monitor.run_daily_at(at(23, 0), date()).unwrap();
        monitor.run_daily_at(at(23, 30), date()).unwrap();

        let metrics = store.metrics_for(date()).unwrap();
        assert_eq!(metrics.len(), MetricKind::all().len());
        let alerts = store.alerts_for(date()).unwrap();
        assert_eq!(
            alerts
                .iter()
                .filter(|a| a.metric_kind == MetricKind::CheckInPunctuality)
                .count(),
            1
        );
    }

    #[test]
    fn test_empty_day_is_compliant_and_silent() {
        let (monitor, store) = monitor();
        let metrics = monitor.run_daily_at(at(23, 0), date()).unwrap();
        assert_eq!(metrics.len(), 6);
        for metric in &metrics {
            assert_eq!(metric.sample_size, 0);
            assert!(metric.target_met);
        }
        assert!(store.alerts_for(date()).unwrap().is_empty());
    }

    #[test]
    fn test_cancellation_rate_breach_is_critical() {
        capture_logs();
        let (monitor, store) = monitor();
        // 1 of 4 shifts missed: 25% against a 3% target, variance 733%
        for _ in 0..3 {
            shift_at(&store, time(9, 0), time(12, 0));
        }
        let missed = shift_at(&store, time(14, 0), time(17, 0));
        store
            .set_shift_status(missed.id, ShiftStatus::Missed)
            .unwrap();

        let metrics = monitor.run_daily_at(at(23, 0), date()).unwrap();
        let rate = metric_for(&metrics, MetricKind::CancellationRate);
        assert_eq!(rate.actual, 25.0);
        assert!(!rate.target_met);
        let alert = store
            .alerts_for(date())
            .unwrap()
            .into_iter()
            .find(|a| a.metric_kind == MetricKind::CancellationRate)
            .unwrap();
        assert_eq!(alert.severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_substitution_rate_counts_todays_assignments() {
        let (monitor, store) = monitor();
        let today = Utc::now().date_naive();
        let request = crate::model::ServiceRequest::new(
            Uuid::new_v4(),
            "elder_care",
            crate::model::UrgencyLevel::Normal,
            "north",
            today,
            today + Duration::days(4),
            time(9, 0),
            time(12, 0),
        );
        store.put_request(request.clone()).unwrap();
        let old = Assignment::new(request.id, Uuid::new_v4(), None);
        store.insert_assignment(old.clone()).unwrap();
        store
            .apply_substitution(
                old.id,
                Uuid::new_v4(),
                None,
                SubstitutionReason::NoShow,
                today,
                30,
            )
            .unwrap();

        let metrics = monitor.run_daily(today).unwrap();
        let rate = metric_for(&metrics, MetricKind::SubstitutionRate);
        // 1 substitution over 2 assignments created today
        assert_eq!(rate.actual, 50.0);
        assert_eq!(rate.sample_size, 2);
        assert!(!rate.target_met);
    }

    #[test]
    fn test_mean_resolution_time_at_target_is_met() {
        let (monitor, store) = monitor();
        let base = at(10, 0);
        for minutes in [30i64, 90] {
            store
                .put_emergency(Emergency {
                    id: Uuid::new_v4(),
                    request_id: Uuid::new_v4(),
                    severity: crate::model::EmergencySeverity::Medium,
                    description: "incident".into(),
                    created_at: base,
                    resolved_at: Some(base + Duration::minutes(minutes)),
                    resolution_note: Some("handled".into()),
                    escalation_deadline_at: base + Duration::minutes(125),
                    escalation_count: 0,
                })
                .unwrap();
        }

        let metrics = monitor.run_daily_at(at(23, 0), date()).unwrap();
        let resolution = metric_for(&metrics, MetricKind::EmergencyResolutionTime);
        assert_eq!(resolution.actual, 60.0);
        assert_eq!(resolution.sample_size, 2);
        // Lower is better and 60 <= 60
        assert!(resolution.target_met);
    }

    #[test]
    fn test_notification_success_rate() {
        let (monitor, store) = monitor();
        for queued in [true, false] {
            store
                .record_notification(NotificationRecord {
                    id: Uuid::new_v4(),
                    client_id: Uuid::new_v4(),
                    kind: "assignment_confirmed".into(),
                    date: date(),
                    queued,
                    at: at(12, 0),
                })
                .unwrap();
        }

        let metrics = monitor.run_daily_at(at(23, 0), date()).unwrap();
        let success = metric_for(&metrics, MetricKind::NotificationSuccessRate);
        assert_eq!(success.actual, 50.0);
        assert!(!success.target_met);
        let alert = store
            .alerts_for(date())
            .unwrap()
            .into_iter()
            .find(|a| a.metric_kind == MetricKind::NotificationSuccessRate)
            .unwrap();
        // Variance (98-50)/98 = 49%
        assert_eq!(alert.severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_occupancy_uses_capacity_denominator() {
        let (monitor, store) = monitor();
        // 100 three-hour shifts: 300 of 400 capacity hours = 75%
        for _ in 0..100 {
            shift_at(&store, time(9, 0), time(12, 0));
        }
        let metrics = monitor.run_daily_at(at(23, 0), date()).unwrap();
        let occupancy = metric_for(&metrics, MetricKind::OccupancyRate);
        assert_eq!(occupancy.actual, 75.0);
        assert!(occupancy.target_met);
    }

    #[test]
    fn test_overdue_emergencies_sorted_by_severity() {
        let (monitor, store) = monitor();
        let base = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
        // High budget 30min: overdue at +40. Low budget 240min: not yet.
        let mk = |severity, created: DateTime<Utc>| Emergency {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            severity,
            description: "incident".into(),
            created_at: created,
            resolved_at: None,
            resolution_note: None,
            escalation_deadline_at: created + Duration::days(1),
            escalation_count: 0,
        };
        let high = mk(crate::model::EmergencySeverity::High, base);
        let medium = mk(
            crate::model::EmergencySeverity::Medium,
            base - Duration::hours(3),
        );
        let low = mk(crate::model::EmergencySeverity::Low, base);
        store.put_emergency(high.clone()).unwrap();
        store.put_emergency(medium.clone()).unwrap();
        store.put_emergency(low.clone()).unwrap();

        let overdue = monitor
            .overdue_emergencies_at(base + Duration::minutes(40))
            .unwrap();
        assert_eq!(overdue.len(), 2);
        assert_eq!(overdue[0].id, high.id);
        assert_eq!(overdue[1].id, medium.id);
    }

    #[test]
    fn test_alert_severity_tiers() {
        assert_eq!(alert_severity(3.2), AlertSeverity::Info);
        assert_eq!(alert_severity(15.0), AlertSeverity::Warning);
        assert_eq!(alert_severity(29.9), AlertSeverity::Warning);
        assert_eq!(alert_severity(30.0), AlertSeverity::Critical);
    }
}
