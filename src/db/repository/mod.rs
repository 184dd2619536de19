//! Repository trait definitions for database operations.
//!
//! This module provides a collection of focused repository traits that abstract
//! database operations. By splitting responsibilities across multiple traits,
//! implementations can be more focused and testable.
//!
//! # Module Organization
//!
//! - [`error`]: Error types for repository operations
//! - [`directory`]: Reference data (employees, roles, species, medications)
//! - [`rescue`]: Rescue intake and rescue CRUD
//! - [`treatment`]: Veterinary and caregiver lifecycle operations
//! - [`release`]: Release and post-release follow-up
//!
//! # Trait Composition
//!
//! A complete repository implementation typically implements all traits:
//!
//! ```ignore
//! impl DirectoryRepository for MyRepo { ... }
//! impl RescueRepository for MyRepo { ... }
//! impl TreatmentRepository for MyRepo { ... }
//! impl ReleaseRepository for MyRepo { ... }
//! ```

pub mod directory;
pub mod error;
pub mod release;
pub mod rescue;
pub mod treatment;

// Re-export error types
pub use error::{ErrorContext, RepositoryError, RepositoryResult};

// Re-export all traits
pub use directory::DirectoryRepository;
pub use release::ReleaseRepository;
pub use rescue::RescueRepository;
pub use treatment::TreatmentRepository;

/// Composite trait bound for a complete repository implementation.
///
/// This trait is automatically implemented for any type that implements
/// all four repository traits. Use this as a convenient bound when you
/// need access to all repository operations.
pub trait FullRepository:
    DirectoryRepository + RescueRepository + TreatmentRepository + ReleaseRepository
{
}

// Blanket implementation: any type implementing all four traits automatically implements FullRepository
impl<T> FullRepository for T where
    T: DirectoryRepository + RescueRepository + TreatmentRepository + ReleaseRepository
{
}
