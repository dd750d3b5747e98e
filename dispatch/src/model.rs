//! Domain model — entities and status machines for the dispatch core.
//!
//! Status enums expose `can_transition_to` predicates; components reject
//! illegal edges before any mutation.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Urgency of a service request, used to bound directory lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Low,
    Normal,
    High,
}

/// Lifecycle of a service request. Transitions are forward-only except
/// cancellation, which is legal from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Open,
    Scheduled,
    Active,
    Completed,
    Canceled,
}

impl RequestStatus {
    /// Whether the request can still change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    /// Legal forward edges plus cancel-from-anywhere-non-terminal.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        if next == Self::Canceled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Self::Open, Self::Scheduled)
                | (Self::Scheduled, Self::Active)
                | (Self::Active, Self::Completed)
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// A client's open need for care.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub client_id: Uuid,
    /// Kind of care requested (e.g. "elder_care", "post_op").
    pub service_type: String,
    pub urgency: UrgencyLevel,
    /// Region the care takes place in.
    pub region: String,
    /// First day care is needed.
    pub start_date: NaiveDate,
    /// Last day care is needed (inclusive).
    pub end_date: NaiveDate,
    /// Daily window start.
    pub window_start: NaiveTime,
    /// Daily window end.
    pub window_end: NaiveTime,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl ServiceRequest {
    pub fn new(
        client_id: Uuid,
        service_type: impl Into<String>,
        urgency: UrgencyLevel,
        region: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        window_start: NaiveTime,
        window_end: NaiveTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            service_type: service_type.into(),
            urgency,
            region: region.into(),
            start_date,
            end_date,
            window_start,
            window_end,
            status: RequestStatus::Open,
            created_at: Utc::now(),
        }
    }
}

/// Status of a caregiver-to-request binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    Confirmed,
    Declined,
    Replaced,
    Completed,
}

impl AssignmentStatus {
    /// A live assignment is the single binding currently responsible for
    /// the request. At most one per request may be live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Assigned | Self::Confirmed)
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assigned => write!(f, "assigned"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Declined => write!(f, "declined"),
            Self::Replaced => write!(f, "replaced"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Binding of one caregiver to one service request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub request_id: Uuid,
    pub caregiver_id: Uuid,
    pub status: AssignmentStatus,
    /// Total match score at assignment time, when produced by the matcher.
    pub match_score: Option<f64>,
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(request_id: Uuid, caregiver_id: Uuid, match_score: Option<f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            caregiver_id,
            status: AssignmentStatus::Assigned,
            match_score,
            assigned_at: Utc::now(),
        }
    }
}

/// Lifecycle of a single shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Planned,
    InProgress,
    Done,
    Missed,
}

impl ShiftStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Missed)
    }

    /// The only legal edges: planned → in_progress → done, planned → missed.
    pub fn can_transition_to(&self, next: ShiftStatus) -> bool {
        matches!(
            (self, next),
            (Self::Planned, Self::InProgress)
                | (Self::InProgress, Self::Done)
                | (Self::Planned, Self::Missed)
        )
    }
}

impl std::fmt::Display for ShiftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planned => write!(f, "planned"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
            Self::Missed => write!(f, "missed"),
        }
    }
}

/// One concrete dated time window of care under an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shift {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub caregiver_id: Uuid,
    pub client_id: Uuid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub status: ShiftStatus,
    pub created_at: DateTime<Utc>,
}

impl Shift {
    pub fn new(
        assignment: &Assignment,
        client_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignment_id: assignment.id,
            caregiver_id: assignment.caregiver_id,
            client_id,
            date,
            start,
            end,
            status: ShiftStatus::Planned,
            created_at: Utc::now(),
        }
    }

    /// Scheduled start as a UTC instant.
    pub fn scheduled_start(&self) -> DateTime<Utc> {
        self.date.and_time(self.start).and_utc()
    }

    /// Scheduled end as a UTC instant.
    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.date.and_time(self.end).and_utc()
    }

    /// Shift length in minutes.
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Kind of checkpoint event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    In,
    Out,
}

/// A reported location (decimal degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// A coordinate pair is malformed outside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A check-in or check-out record. At most one of each per shift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckEvent {
    pub id: Uuid,
    pub shift_id: Uuid,
    pub kind: CheckKind,
    pub at: DateTime<Utc>,
    pub location: GeoPoint,
    /// Activity notes, populated on check-out only.
    pub activities: Vec<String>,
}

/// Enumerated causes for a caregiver swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstitutionReason {
    NoShow,
    Emergency,
    ExcessiveDelay,
    CaregiverUnavailable,
    ClientRequest,
}

impl std::fmt::Display for SubstitutionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoShow => write!(f, "no_show"),
            Self::Emergency => write!(f, "emergency"),
            Self::ExcessiveDelay => write!(f, "excessive_delay"),
            Self::CaregiverUnavailable => write!(f, "caregiver_unavailable"),
            Self::ClientRequest => write!(f, "client_request"),
        }
    }
}

/// Immutable record of a caregiver swap. References two assignments but
/// owns neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Substitution {
    pub id: Uuid,
    pub old_assignment_id: Uuid,
    pub new_assignment_id: Uuid,
    pub old_caregiver_id: Uuid,
    pub new_caregiver_id: Uuid,
    pub reason: SubstitutionReason,
    pub created_at: DateTime<Utc>,
}

/// Ordered severity scale for emergencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EmergencySeverity {
    /// The next step up the scale, or `None` at the maximum.
    pub fn next(&self) -> Option<EmergencySeverity> {
        match self {
            Self::Low => Some(Self::Medium),
            Self::Medium => Some(Self::High),
            Self::High => Some(Self::Critical),
            Self::Critical => None,
        }
    }
}

impl std::fmt::Display for EmergencySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A safety/medical incident tied to a service request. Severity only
/// escalates upward while unresolved; resolution is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emergency {
    pub id: Uuid,
    pub request_id: Uuid,
    pub severity: EmergencySeverity,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
    /// Instant after which the poll sweep may auto-escalate. Moved forward
    /// on every escalation so repeated polls in one sweep are no-ops.
    pub escalation_deadline_at: DateTime<Utc>,
    /// How many times severity has been raised.
    pub escalation_count: u32,
}

impl Emergency {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Which comparison a metric uses for compliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    HigherIsBetter,
    LowerIsBetter,
}

/// The daily KPIs the monitor computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    CheckInPunctuality,
    SubstitutionRate,
    CancellationRate,
    EmergencyResolutionTime,
    NotificationSuccessRate,
    OccupancyRate,
}

impl MetricKind {
    pub fn all() -> &'static [MetricKind] {
        &[
            Self::CheckInPunctuality,
            Self::SubstitutionRate,
            Self::CancellationRate,
            Self::EmergencyResolutionTime,
            Self::NotificationSuccessRate,
            Self::OccupancyRate,
        ]
    }

    pub fn direction(&self) -> MetricDirection {
        match self {
            Self::CheckInPunctuality | Self::NotificationSuccessRate | Self::OccupancyRate => {
                MetricDirection::HigherIsBetter
            }
            Self::SubstitutionRate | Self::CancellationRate | Self::EmergencyResolutionTime => {
                MetricDirection::LowerIsBetter
            }
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CheckInPunctuality => write!(f, "check_in_punctuality"),
            Self::SubstitutionRate => write!(f, "substitution_rate"),
            Self::CancellationRate => write!(f, "cancellation_rate"),
            Self::EmergencyResolutionTime => write!(f, "emergency_resolution_time"),
            Self::NotificationSuccessRate => write!(f, "notification_success_rate"),
            Self::OccupancyRate => write!(f, "occupancy_rate"),
        }
    }
}

/// One computed KPI row. Upserted per (date, kind, dimension).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaMetric {
    pub id: Uuid,
    pub date: NaiveDate,
    pub kind: MetricKind,
    /// Optional slice the metric was computed over (e.g. a region).
    pub dimension: Option<String>,
    pub target: f64,
    pub actual: f64,
    pub sample_size: usize,
    pub target_met: bool,
    pub computed_at: DateTime<Utc>,
}

impl SlaMetric {
    /// Relative miss magnitude as a percentage of target.
    pub fn variance_percent(&self) -> f64 {
        if self.target == 0.0 {
            return 0.0;
        }
        ((self.actual - self.target).abs() / self.target) * 100.0
    }
}

/// Alert severity, tiered by variance magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Notification of a breached metric. Created at most once per
/// (metric kind, date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaAlert {
    pub id: Uuid,
    pub metric_kind: MetricKind,
    pub date: NaiveDate,
    pub severity: AlertSeverity,
    pub message: String,
    pub variance_percent: f64,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an outbound notification dispatch, recorded for the
/// notification-success metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub client_id: Uuid,
    pub kind: String,
    pub date: NaiveDate,
    pub queued: bool,
    pub at: DateTime<Utc>,
}
