//! Candidate matching — scores and ranks caregivers for a service request.
//!
//! Four sub-scores in [0,100] (skill, availability, region, rating) are
//! combined by configured weights into a total, candidates are sorted
//! descending and truncated. `auto_match` accepts the top candidate only
//! above the configured threshold; below it the ranked list goes back to a
//! human for manual selection.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::config::MatchingConfig;
use crate::directory::{AvailabilityFilters, CaregiverDirectory, CaregiverProfile, ClientDirectory};
use crate::error::DispatchResult;
use crate::model::{Assignment, RequestStatus, ServiceRequest};
use crate::store::SharedStore;

/// Hard requirements accompanying a service request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CareRequirements {
    pub required_skills: Vec<String>,
    pub max_radius_km: f64,
}

/// A candidate with all sub-scores made explicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub caregiver_id: Uuid,
    pub skill_score: f64,
    pub availability_score: f64,
    pub region_score: f64,
    pub rating_score: f64,
    /// Weighted sum of the four sub-scores, in [0,100].
    pub total_score: f64,
    pub profile: CaregiverProfile,
}

/// Scores and ranks caregivers fetched from the external directory.
pub struct CandidateMatcher {
    store: SharedStore,
    directory: Arc<dyn CaregiverDirectory>,
    crm: Arc<dyn ClientDirectory>,
    config: MatchingConfig,
    /// Read-through cache of directory lookups, keyed by request id.
    lookup_cache: TtlCache<Uuid, Vec<CaregiverProfile>>,
}

impl CandidateMatcher {
    pub fn new(
        store: SharedStore,
        directory: Arc<dyn CaregiverDirectory>,
        crm: Arc<dyn ClientDirectory>,
        config: MatchingConfig,
    ) -> Self {
        let ttl = Duration::from_secs(config.candidate_cache_ttl_secs);
        Self {
            store,
            directory,
            crm,
            config,
            lookup_cache: TtlCache::new(ttl),
        }
    }

    /// Fetch, score, and rank available caregivers for a request.
    ///
    /// A directory failure degrades to an empty list so the caller can fall
    /// back to manual dispatch instead of crashing.
    pub async fn find_candidates(
        &self,
        request: &ServiceRequest,
        requirements: &CareRequirements,
    ) -> DispatchResult<Vec<CandidateScore>> {
        let profiles = match self.lookup_cache.get(&request.id) {
            Some(cached) => cached,
            None => {
                let filters = AvailabilityFilters {
                    service_type: request.service_type.clone(),
                    start_date: request.start_date,
                    end_date: request.end_date,
                    urgency: request.urgency,
                    skills: requirements.required_skills.clone(),
                    region: request.region.clone(),
                    max_radius_km: requirements.max_radius_km,
                };
                match self.directory.find_available(&filters).await {
                    Ok(profiles) => {
                        self.lookup_cache.insert(request.id, profiles.clone());
                        profiles
                    }
                    Err(e) => {
                        warn!(request_id = %request.id, error = %e, "caregiver directory lookup failed, returning no candidates");
                        return Ok(Vec::new());
                    }
                }
            }
        };

        let mut candidates: Vec<CandidateScore> = profiles
            .into_iter()
            .map(|profile| self.score(request, requirements, profile))
            .collect();

        candidates.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(Ordering::Equal)
        });
        candidates.truncate(self.config.max_candidates);

        debug!(
            request_id = %request.id,
            candidates = candidates.len(),
            top_score = candidates.first().map(|c| c.total_score).unwrap_or(0.0),
            "candidate ranking complete"
        );
        Ok(candidates)
    }

    /// Assign the top candidate if it clears the auto-match threshold.
    ///
    /// Returns `None` when no candidate qualifies; the caller then presents
    /// the ranked list for manual selection.
    pub async fn auto_match(
        &self,
        request: &ServiceRequest,
        requirements: &CareRequirements,
    ) -> DispatchResult<Option<Assignment>> {
        let candidates = self.find_candidates(request, requirements).await?;
        let top = match candidates.first() {
            Some(top) if top.total_score >= self.config.auto_match_threshold => top.clone(),
            Some(top) => {
                info!(
                    request_id = %request.id,
                    top_score = top.total_score,
                    threshold = self.config.auto_match_threshold,
                    "top candidate below auto-match threshold, manual selection required"
                );
                return Ok(None);
            }
            None => return Ok(None),
        };

        let assignment = Assignment::new(request.id, top.caregiver_id, Some(top.total_score));
        self.store.insert_assignment(assignment.clone())?;
        self.store
            .update_request_status(request.id, RequestStatus::Scheduled)?;
        info!(
            request_id = %request.id,
            caregiver_id = %top.caregiver_id,
            score = top.total_score,
            "auto-matched caregiver"
        );

        // Caregiver notification and CRM sync are fire-and-forget: the
        // assignment is already committed and a delivery failure must not
        // undo it.
        let directory = Arc::clone(&self.directory);
        let caregiver_id = top.caregiver_id;
        let payload = serde_json::json!({
            "assignment_id": assignment.id,
            "request_id": request.id,
            "start_date": request.start_date,
        });
        tokio::spawn(async move {
            if let Err(e) = directory.notify_assignment(caregiver_id, payload).await {
                warn!(caregiver_id = %caregiver_id, error = %e, "assignment notification failed");
            }
        });
        let crm = Arc::clone(&self.crm);
        let request_id = request.id;
        tokio::spawn(async move {
            if let Err(e) = crm.update_status(request_id, "scheduled").await {
                warn!(request_id = %request_id, error = %e, "crm status sync failed");
            }
        });

        Ok(Some(assignment))
    }

    /// Replacement candidates for a failing caregiver: everyone but the
    /// excluded one that clears the auto-match threshold, best first. The
    /// caller filters further by schedule availability.
    pub async fn substitute_candidates(
        &self,
        request: &ServiceRequest,
        requirements: &CareRequirements,
        exclude_caregiver: Uuid,
    ) -> DispatchResult<Vec<CandidateScore>> {
        let candidates = self.find_candidates(request, requirements).await?;
        Ok(candidates
            .into_iter()
            .filter(|c| {
                c.caregiver_id != exclude_caregiver
                    && c.total_score >= self.config.auto_match_threshold
            })
            .collect())
    }

    fn score(
        &self,
        request: &ServiceRequest,
        requirements: &CareRequirements,
        profile: CaregiverProfile,
    ) -> CandidateScore {
        let skill_score = skill_score(&requirements.required_skills, &profile.skills);
        let availability_score = availability_score(request, &profile);
        let region_score = region_score(
            request,
            &profile,
            requirements.max_radius_km,
            self.config.neutral_region_score,
        );
        let rating_score = ((profile.average_rating / 5.0) * 100.0).clamp(0.0, 100.0);

        let weights = &self.config.weights;
        let total_score = skill_score * weights.skill
            + availability_score * weights.availability
            + region_score * weights.region
            + rating_score * weights.rating;

        CandidateScore {
            caregiver_id: profile.id,
            skill_score,
            availability_score,
            region_score,
            rating_score,
            total_score,
            profile,
        }
    }
}

/// Fraction of required skills present, as a percentage. No requirements
/// means a full score.
fn skill_score(required: &[String], offered: &[String]) -> f64 {
    if required.is_empty() {
        return 100.0;
    }
    let present = required.iter().filter(|s| offered.contains(s)).count();
    (present as f64 / required.len() as f64) * 100.0
}

/// 100 when any declared availability window overlaps the request's daily
/// window on any requested day, else 0. Weekly windows repeat, so only the
/// first seven days of the span need checking.
fn availability_score(request: &ServiceRequest, profile: &CaregiverProfile) -> f64 {
    let mut date = request.start_date;
    for _ in 0..7 {
        if date > request.end_date {
            break;
        }
        if profile
            .availability
            .iter()
            .any(|w| w.overlaps(date, request.window_start, request.window_end))
        {
            return 100.0;
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    0.0
}

/// 100 for an exact region match; linear decay over distance when known;
/// the configured neutral score otherwise.
fn region_score(
    request: &ServiceRequest,
    profile: &CaregiverProfile,
    max_radius_km: f64,
    neutral: f64,
) -> f64 {
    if profile.regions.iter().any(|r| r == &request.region) {
        return 100.0;
    }
    match profile.distance_km {
        Some(distance) if max_radius_km > 0.0 => {
            ((1.0 - distance / max_radius_km) * 100.0).max(0.0)
        }
        _ => neutral,
    }
}
