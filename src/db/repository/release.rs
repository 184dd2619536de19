//! Release repository trait: returning animals to the wild and tracking
//! them afterwards.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::api::{
    FollowUpEntry, NewFollowUp, NewRelease, Release, ReleaseCandidate, ReleaseFollowUp,
    ReleaseId, ReleasedAnimal,
};

/// Repository trait for releases and follow-ups.
#[async_trait]
pub trait ReleaseRepository: Send + Sync {
    /// Animals eligible for release: treatment `COMPLETED`, caregiver
    /// assigned, latest observation tagged ready-for-release, and no
    /// release recorded yet.
    async fn fetch_release_candidates(&self) -> RepositoryResult<Vec<ReleaseCandidate>>;

    /// Record a release. The eligibility preconditions are re-checked
    /// inside the same atomic unit as the insert, so two racing release
    /// attempts cannot both succeed.
    ///
    /// # Returns
    /// * `Err(RepositoryError::ValidationError)` - If the animal was never
    ///   cleared for release
    /// * `Err(RepositoryError::ConflictError)` - If the animal is already
    ///   released
    async fn store_release(&self, release: &NewRelease) -> RepositoryResult<Release>;

    /// All releases with follow-up summaries, newest first.
    async fn fetch_releases(&self) -> RepositoryResult<Vec<ReleasedAnimal>>;

    /// Append a follow-up entry to a release.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the release doesn't exist
    async fn store_follow_up(&self, follow_up: &NewFollowUp) -> RepositoryResult<ReleaseFollowUp>;

    /// Follow-up history for a release, newest first.
    async fn fetch_follow_ups(&self, release_id: ReleaseId)
        -> RepositoryResult<Vec<FollowUpEntry>>;
}
