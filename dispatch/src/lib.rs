//! Home-Care Dispatch Core
//!
//! This library provides the coordination layer of a home-care dispatch
//! system:
//! - Caregiver matching: scored, ranked candidates with threshold-gated
//!   auto-assignment
//! - Shift scheduling: validated, conflict-free shift series with tiered
//!   cancellation fees
//! - Checkpoint tracking: check-in/check-out lifecycle with lateness
//!   detection
//! - Substitution: atomic caregiver replacement when a shift fails
//! - Emergency escalation: ordered severity scale with poll-driven
//!   auto-escalation
//! - SLA monitoring: daily KPI batches, breach alerts, real-time overdue
//!   scans
//!
//! External collaborators (caregiver directory, client CRM, notification
//! gateway) sit behind async traits in [`directory`]; everything else is
//! deterministic over the in-memory [`store`].

#![allow(clippy::uninlined_format_args)]

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod directory;
pub mod emergency;
pub mod error;
pub mod matcher;
pub mod model;
pub mod schedule;
pub mod sla;
pub mod store;
pub mod substitution;

// Re-export the error surface
pub use error::{DispatchError, DispatchResult, ValidationIssue};

// Re-export configuration types
pub use config::{
    CancellationPolicy, CheckpointConfig, DispatchConfig, EmergencyConfig, MatchWeights,
    MatchingConfig, ScheduleConfig, SlaTargets,
};

// Re-export domain entities
pub use model::{
    AlertSeverity, Assignment, AssignmentStatus, CheckEvent, CheckKind, Emergency,
    EmergencySeverity, GeoPoint, MetricDirection, MetricKind, NotificationRecord, RequestStatus,
    ServiceRequest, Shift, ShiftStatus, SlaAlert, SlaMetric, Substitution, SubstitutionReason,
    UrgencyLevel,
};

// Re-export the store
pub use store::{DispatchStore, SharedStore, SubstitutionApplied};

// Re-export collaborator traits and in-memory implementations
pub use directory::{
    AvailabilityFilters, AvailabilityWindow, CaregiverDirectory, CaregiverProfile,
    ClientDirectory, ClientSummary, DirectoryError, InMemoryCrm, InMemoryDirectory,
    InMemoryGateway, NotificationGateway, NotificationOutcome,
};

// Re-export component types
pub use checkpoint::{CheckpointTracker, DelayedShift};
pub use emergency::EmergencyEscalator;
pub use matcher::{CandidateMatcher, CandidateScore, CareRequirements};
pub use schedule::{CancellationOutcome, ScheduleManager, ShiftSpec};
pub use sla::SlaMonitor;
pub use substitution::SubstitutionCoordinator;
