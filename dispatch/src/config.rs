//! Typed runtime configuration for every dispatch component.
//!
//! Weights, thresholds, and SLA targets are business-configurable; their
//! shape lives here, their values come from TOML or the documented
//! defaults. Components receive their config at construction and never
//! read global state inline.

use crate::error::{DispatchError, DispatchResult};
use crate::model::EmergencySeverity;
use serde::{Deserialize, Serialize};

/// Relative weights of the four candidate sub-scores. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub skill: f64,
    pub availability: f64,
    pub region: f64,
    pub rating: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            skill: 0.4,
            availability: 0.3,
            region: 0.2,
            rating: 0.1,
        }
    }
}

impl MatchWeights {
    pub fn sum(&self) -> f64 {
        self.skill + self.availability + self.region + self.rating
    }
}

/// Candidate matching parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub weights: MatchWeights,
    /// Minimum total score for `auto_match` to accept the top candidate.
    pub auto_match_threshold: f64,
    /// Ranked list is truncated to this many candidates.
    pub max_candidates: usize,
    /// Region score when distance to the caregiver is unknown.
    pub neutral_region_score: f64,
    /// TTL of the directory lookup cache, keyed by request id.
    pub candidate_cache_ttl_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weights: MatchWeights::default(),
            auto_match_threshold: 70.0,
            max_candidates: 10,
            neutral_region_score: 50.0,
            candidate_cache_ttl_secs: 60,
        }
    }
}

/// Shift creation and conflict detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Gap added to both ends of existing shifts during conflict checks.
    pub min_gap_minutes: i64,
    /// Minimum hours between now and a new shift's start.
    pub min_lead_time_hours: i64,
    pub min_duration_minutes: i64,
    pub max_duration_minutes: i64,
    /// TTL of the per-caregiver day-schedule read cache.
    pub schedule_cache_ttl_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_gap_minutes: 30,
            min_lead_time_hours: 12,
            min_duration_minutes: 60,
            max_duration_minutes: 720,
            schedule_cache_ttl_secs: 30,
        }
    }
}

/// Tiered cancellation fee policy, a monotonic function of
/// hours-until-service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CancellationPolicy {
    /// At or above this many hours before start, cancellation is free.
    pub free_cancellation_hours: i64,
    /// At or above this many hours (but below free), the reduced fee applies.
    /// Below it, the full fee applies.
    pub full_fee_hours: i64,
    /// Fee percentage charged in the reduced band.
    pub reduced_fee_percent: u8,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            free_cancellation_hours: 24,
            full_fee_hours: 6,
            reduced_fee_percent: 50,
        }
    }
}

/// Check-in/check-out tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// How early before scheduled start a check-in is accepted.
    pub early_tolerance_minutes: i64,
    /// Lateness beyond this marks the check-in late and, while still
    /// planned, makes the shift a substitution candidate.
    pub late_tolerance_minutes: i64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            early_tolerance_minutes: 30,
            late_tolerance_minutes: 15,
        }
    }
}

/// Emergency response-time budgets per severity, plus the grace period
/// added before auto-escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    pub low_response_minutes: i64,
    pub medium_response_minutes: i64,
    pub high_response_minutes: i64,
    pub critical_response_minutes: i64,
    pub grace_minutes: i64,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            low_response_minutes: 240,
            medium_response_minutes: 120,
            high_response_minutes: 30,
            critical_response_minutes: 10,
            grace_minutes: 5,
        }
    }
}

impl EmergencyConfig {
    /// Response budget for a severity, in minutes.
    pub fn response_budget_minutes(&self, severity: EmergencySeverity) -> i64 {
        match severity {
            EmergencySeverity::Low => self.low_response_minutes,
            EmergencySeverity::Medium => self.medium_response_minutes,
            EmergencySeverity::High => self.high_response_minutes,
            EmergencySeverity::Critical => self.critical_response_minutes,
        }
    }
}

/// Daily SLA targets. Percentages are in [0,100]; resolution time is in
/// minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaTargets {
    pub punctuality_percent: f64,
    pub substitution_rate_percent: f64,
    pub cancellation_rate_percent: f64,
    pub emergency_resolution_minutes: f64,
    pub notification_success_percent: f64,
    pub occupancy_percent: f64,
    /// Estimated daily capacity in care hours, denominator of occupancy.
    pub daily_capacity_hours: f64,
}

impl Default for SlaTargets {
    fn default() -> Self {
        Self {
            punctuality_percent: 95.0,
            substitution_rate_percent: 5.0,
            cancellation_rate_percent: 3.0,
            emergency_resolution_minutes: 60.0,
            notification_success_percent: 98.0,
            occupancy_percent: 75.0,
            daily_capacity_hours: 400.0,
        }
    }
}

/// Top-level configuration, one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub matching: MatchingConfig,
    pub schedule: ScheduleConfig,
    pub cancellation: CancellationPolicy,
    pub checkpoint: CheckpointConfig,
    pub emergency: EmergencyConfig,
    pub sla: SlaTargets,
}

impl DispatchConfig {
    /// Parse from TOML and validate.
    pub fn from_toml_str(raw: &str) -> DispatchResult<Self> {
        let config: DispatchConfig =
            toml::from_str(raw).map_err(|e| DispatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the algorithms meaningless.
    pub fn validate(&self) -> DispatchResult<()> {
        let sum = self.matching.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(DispatchError::Config(format!(
                "match weights must sum to 1.0, got {sum}"
            )));
        }
        if !(0.0..=100.0).contains(&self.matching.auto_match_threshold) {
            return Err(DispatchError::Config(format!(
                "auto_match_threshold must be in [0,100], got {}",
                self.matching.auto_match_threshold
            )));
        }
        if self.cancellation.free_cancellation_hours <= self.cancellation.full_fee_hours {
            return Err(DispatchError::Config(
                "free_cancellation_hours must exceed full_fee_hours".to_string(),
            ));
        }
        if self.cancellation.reduced_fee_percent > 100 {
            return Err(DispatchError::Config(
                "reduced_fee_percent must be at most 100".to_string(),
            ));
        }
        if self.schedule.min_duration_minutes > self.schedule.max_duration_minutes {
            return Err(DispatchError::Config(
                "min_duration_minutes must not exceed max_duration_minutes".to_string(),
            ));
        }
        Ok(())
    }
}
