//! Rescue repository trait: intake and rescue CRUD.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::api::{
    NewAnimal, NewRescue, RescueDeletion, RescueId, RescueWithAnimals,
};

/// Repository trait for rescue records and their animals.
///
/// Multi-table mutations (intake, update, cascade delete) are single
/// methods so implementations can make each one atomic: the Postgres
/// backend wraps them in one transaction, the in-memory backend holds
/// one write lock for the duration.
#[async_trait]
pub trait RescueRepository: Send + Sync {
    /// Record a rescue with at least one animal (Intake).
    ///
    /// Creates the rescue row, one animal row per descriptor and one
    /// `PENDING` treatment per animal, atomically. All IDs are
    /// database-generated.
    ///
    /// # Returns
    /// * `Ok(RescueWithAnimals)` - The stored rescue with assigned IDs
    /// * `Err(RepositoryError::ValidationError)` - If `animals` is empty or a
    ///   referenced species/rescuer doesn't exist
    async fn store_rescue(
        &self,
        rescue: &NewRescue,
        animals: &[NewAnimal],
    ) -> RepositoryResult<RescueWithAnimals>;

    /// List all rescues with their animals, newest first.
    async fn fetch_rescues(&self) -> RepositoryResult<Vec<RescueWithAnimals>>;

    /// Get one rescue with its animals.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the rescue doesn't exist
    async fn fetch_rescue(&self, id: RescueId) -> RepositoryResult<RescueWithAnimals>;

    /// Replace a rescue's fields and its animal set (delete-then-reinsert).
    ///
    /// Each replaced animal gets a fresh `PENDING` treatment; the old
    /// animals' treatments are removed with them. Atomic.
    async fn update_rescue(
        &self,
        id: RescueId,
        rescue: &NewRescue,
        animals: &[NewAnimal],
    ) -> RepositoryResult<RescueWithAnimals>;

    /// Delete a rescue and cascade to its animals and their treatment
    /// records. Atomic.
    ///
    /// # Returns
    /// * `Ok(RescueDeletion)` - Audit summary of what was removed
    /// * `Err(RepositoryError::NotFound)` - If the rescue doesn't exist
    async fn delete_rescue(&self, id: RescueId) -> RepositoryResult<RescueDeletion>;
}
