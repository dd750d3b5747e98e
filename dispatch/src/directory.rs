//! Outbound collaborator interfaces.
//!
//! The dispatch core never performs I/O directly; the caregiver directory,
//! the client CRM, and the notification gateway sit behind these traits so
//! matching, scheduling, and SLA logic stay testable with fakes. In-memory
//! implementations are provided for tests and offline operation.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::model::UrgencyLevel;

/// Errors from an outbound collaborator. The core logs these and degrades
/// rather than propagating a crash.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory unreachable: {0}")]
    Unreachable(String),

    #[error("directory rejected the request: {0}")]
    Rejected(String),
}

/// A recurring weekly availability window declared by a caregiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl AvailabilityWindow {
    /// Whether this window overlaps the given daily window on the given date.
    pub fn overlaps(&self, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> bool {
        use chrono::Datelike;
        self.weekday == date.weekday() && self.start < end && start < self.end
    }
}

/// A caregiver record as exposed by the external directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaregiverProfile {
    pub id: Uuid,
    pub name: String,
    /// Service types this caregiver can perform.
    pub service_types: Vec<String>,
    pub skills: Vec<String>,
    pub availability: Vec<AvailabilityWindow>,
    /// Regions served exactly (no travel surcharge).
    pub regions: Vec<String>,
    /// Average client rating in [0, 5].
    pub average_rating: f64,
    /// Distance to the requested region, when the directory knows it.
    pub distance_km: Option<f64>,
}

/// Bounds for a directory availability lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityFilters {
    pub service_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub urgency: UrgencyLevel,
    pub skills: Vec<String>,
    pub region: String,
    pub max_radius_km: f64,
}

/// External caregiver directory.
#[async_trait]
pub trait CaregiverDirectory: Send + Sync {
    /// Caregivers currently available within the filter bounds.
    async fn find_available(
        &self,
        filters: &AvailabilityFilters,
    ) -> Result<Vec<CaregiverProfile>, DirectoryError>;

    async fn get_profile(&self, id: Uuid) -> Result<Option<CaregiverProfile>, DirectoryError>;

    /// Inform a caregiver of a new assignment. Fire-and-forget from the
    /// core's perspective.
    async fn notify_assignment(
        &self,
        caregiver_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), DirectoryError>;
}

/// Client-facing display data from the CRM. Never used for scheduling
/// decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSummary {
    pub id: Uuid,
    pub name: String,
    pub region: String,
}

/// External client directory / CRM.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn get_client(&self, id: Uuid) -> Result<Option<ClientSummary>, DirectoryError>;

    async fn sync_service_request(&self, payload: serde_json::Value) -> Result<(), DirectoryError>;

    async fn update_status(&self, id: Uuid, status: &str) -> Result<(), DirectoryError>;
}

/// Whether the gateway accepted a notification for delivery. Delivery
/// mechanics beyond this are out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    Queued,
    Rejected,
}

/// Outbound notification gateway.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn dispatch(
        &self,
        client_id: Uuid,
        kind: &str,
        data: serde_json::Value,
    ) -> Result<NotificationOutcome, DirectoryError>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// In-memory caregiver directory backed by a fixed profile set.
#[derive(Default)]
pub struct InMemoryDirectory {
    profiles: RwLock<HashMap<Uuid, CaregiverProfile>>,
    notified: RwLock<Vec<(Uuid, serde_json::Value)>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<CaregiverProfile>) -> Self {
        let directory = Self::new();
        for profile in profiles {
            directory.upsert(profile);
        }
        directory
    }

    pub fn upsert(&self, profile: CaregiverProfile) {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.insert(profile.id, profile);
        }
    }

    /// Assignment notifications recorded so far (caregiver id, payload).
    pub fn notifications(&self) -> Vec<(Uuid, serde_json::Value)> {
        self.notified.read().map(|n| n.clone()).unwrap_or_default()
    }

    fn matches(profile: &CaregiverProfile, filters: &AvailabilityFilters) -> bool {
        if !profile
            .service_types
            .iter()
            .any(|t| t == &filters.service_type)
        {
            return false;
        }
        let in_region = profile.regions.iter().any(|r| r == &filters.region);
        let in_radius = profile
            .distance_km
            .map(|d| d <= filters.max_radius_km)
            .unwrap_or(false);
        in_region || in_radius || profile.distance_km.is_none()
    }
}

#[async_trait]
impl CaregiverDirectory for InMemoryDirectory {
    async fn find_available(
        &self,
        filters: &AvailabilityFilters,
    ) -> Result<Vec<CaregiverProfile>, DirectoryError> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| DirectoryError::Unreachable("profile lock poisoned".into()))?;
        Ok(profiles
            .values()
            .filter(|p| Self::matches(p, filters))
            .cloned()
            .collect())
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<CaregiverProfile>, DirectoryError> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| DirectoryError::Unreachable("profile lock poisoned".into()))?;
        Ok(profiles.get(&id).cloned())
    }

    async fn notify_assignment(
        &self,
        caregiver_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), DirectoryError> {
        if let Ok(mut notified) = self.notified.write() {
            notified.push((caregiver_id, payload));
        }
        Ok(())
    }
}

/// In-memory notification gateway that records every dispatch.
#[derive(Default)]
pub struct InMemoryGateway {
    dispatched: RwLock<Vec<(Uuid, String, serde_json::Value)>>,
    /// When set, every dispatch is rejected (for failure-path tests).
    reject_all: std::sync::atomic::AtomicBool,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject_all(&self, reject: bool) {
        self.reject_all
            .store(reject, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn dispatched(&self) -> Vec<(Uuid, String, serde_json::Value)> {
        self.dispatched
            .read()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationGateway for InMemoryGateway {
    async fn dispatch(
        &self,
        client_id: Uuid,
        kind: &str,
        data: serde_json::Value,
    ) -> Result<NotificationOutcome, DirectoryError> {
        if self.reject_all.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(NotificationOutcome::Rejected);
        }
        if let Ok(mut dispatched) = self.dispatched.write() {
            dispatched.push((client_id, kind.to_string(), data));
        }
        Ok(NotificationOutcome::Queued)
    }
}

/// In-memory client directory that records every sync, for tests and
/// offline operation.
#[derive(Default)]
pub struct InMemoryCrm {
    clients: RwLock<HashMap<Uuid, ClientSummary>>,
    synced: RwLock<Vec<serde_json::Value>>,
    status_updates: RwLock<Vec<(Uuid, String)>>,
}

impl InMemoryCrm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, client: ClientSummary) {
        if let Ok(mut clients) = self.clients.write() {
            clients.insert(client.id, client);
        }
    }

    /// Request payloads synced so far.
    pub fn synced(&self) -> Vec<serde_json::Value> {
        self.synced.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Status updates received so far (request id, status).
    pub fn status_updates(&self) -> Vec<(Uuid, String)> {
        self.status_updates
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClientDirectory for InMemoryCrm {
    async fn get_client(&self, id: Uuid) -> Result<Option<ClientSummary>, DirectoryError> {
        let clients = self
            .clients
            .read()
            .map_err(|_| DirectoryError::Unreachable("client lock poisoned".into()))?;
        Ok(clients.get(&id).cloned())
    }

    async fn sync_service_request(&self, payload: serde_json::Value) -> Result<(), DirectoryError> {
        if let Ok(mut synced) = self.synced.write() {
            synced.push(payload);
        }
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: &str) -> Result<(), DirectoryError> {
        if let Ok(mut updates) = self.status_updates.write() {
            updates.push((id, status.to_string()));
        }
        Ok(())
    }
}
