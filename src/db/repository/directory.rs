//! Reference-data repository trait.
//!
//! Employees, role assignments, the species catalog and the medication
//! catalog are administrative data: this backend reads them but never
//! creates or modifies them.

use async_trait::async_trait;
use std::collections::HashSet;

use super::error::RepositoryResult;
use crate::api::{Employee, EmployeeId, Medication, Role, Species, SpeciesId};

/// Repository trait for reference data lookups.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to work with async Rust.
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    // ==================== Health & Connection ====================

    /// Check if the database connection is healthy.
    async fn health_check(&self) -> RepositoryResult<bool>;

    // ==================== Employees ====================

    /// List all employees.
    async fn fetch_employees(&self) -> RepositoryResult<Vec<Employee>>;

    /// Get one employee by ID.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the employee doesn't exist
    async fn fetch_employee(&self, id: EmployeeId) -> RepositoryResult<Employee>;

    /// Look up an employee by username and password digest.
    ///
    /// The digest is a lowercase hex sha256 of the submitted password;
    /// cleartext never reaches the repository.
    ///
    /// # Returns
    /// * `Ok(None)` - If no employee matches the credentials
    async fn find_employee_by_credentials(
        &self,
        username: &str,
        password_digest: &str,
    ) -> RepositoryResult<Option<Employee>>;

    /// Get the set of roles assigned to an employee.
    ///
    /// An employee with no role rows gets an empty set, not an error.
    async fn fetch_employee_roles(&self, id: EmployeeId) -> RepositoryResult<HashSet<Role>>;

    // ==================== Species ====================

    /// List the species catalog.
    async fn fetch_species(&self) -> RepositoryResult<Vec<Species>>;

    /// Get one species by ID.
    async fn fetch_species_by_id(&self, id: SpeciesId) -> RepositoryResult<Species>;

    // ==================== Medications ====================

    /// List the medication catalog.
    async fn fetch_medications(&self) -> RepositoryResult<Vec<Medication>>;
}
