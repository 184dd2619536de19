//! Postgres repository implementation using Diesel.
//!
//! This module implements the repository traits against a Postgres database.
//! State-guarded transitions are expressed as `UPDATE .. WHERE state = ..`;
//! a guard that matches zero rows surfaces as `ConflictError`. Multi-table
//! mutations run inside a single transaction.
//!
//! ## Features
//!
//! - Connection pooling with r2d2
//! - Automatic retry for transient failures
//! - Connection health monitoring
//! - Automatic migration execution
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL` or `PG_DATABASE_URL`: Connection string (required)
//! - `PG_POOL_MAX`: Maximum pool size (default: 10)
//! - `PG_POOL_MIN`: Minimum pool size (default: 1)
//! - `PG_CONN_TIMEOUT_SEC`: Connection timeout in seconds (default: 30)
//! - `PG_IDLE_TIMEOUT_SEC`: Idle connection timeout in seconds (default: 600)
//! - `PG_MAX_RETRIES`: Maximum retry attempts for transient failures (default: 3)
//! - `PG_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 100)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_query;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task;

use crate::api::{
    ActiveTreatment, Animal, AnimalCondition, AnimalId, AnimalRecord, CaregiverObservation,
    CompletedTreatment, Employee, EmployeeId, FollowUpEntry, HealthAssessment, HealthState,
    InCareAnimal, Medication, MedicationId, MedicationLine, NewAnimal, NewAssessment,
    NewFollowUp, NewObservation, NewRelease, NewRescue, NewTreatmentMedication,
    ObservationEntry, PendingAnimal, Release, ReleaseCandidate, ReleaseFollowUp, ReleaseId,
    ReleasedAnimal, RemovedAnimal, Rescue, RescueDeletion, RescueId, RescueWithAnimals, Role,
    Species, SpeciesId, Treatment, TreatmentChanges, TreatmentId, TreatmentState,
};
use crate::db::repository::{
    DirectoryRepository, ErrorContext, ReleaseRepository, RepositoryError, RepositoryResult,
    RescueRepository, TreatmentRepository,
};

mod models;
mod schema;

use models::*;
use schema::*;

type PgPool = Pool<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/db/repositories/postgres/migrations");

/// Configuration for connecting to Postgres.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_pool_size: u32,
    /// Minimum number of connections in the pool
    pub min_pool_size: u32,
    /// Connection timeout in seconds
    pub connection_timeout_sec: u64,
    /// Idle connection timeout in seconds
    pub idle_timeout_sec: u64,
    /// Maximum number of retry attempts for transient failures
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles with each retry)
    pub retry_delay_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_pool_size: 10,
            min_pool_size: 1,
            connection_timeout_sec: 30,
            idle_timeout_sec: 600,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

impl PostgresConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `DATABASE_URL` or `PG_DATABASE_URL`: Connection string (required)
    /// - `PG_POOL_MAX`: Maximum pool size (default: 10)
    /// - `PG_POOL_MIN`: Minimum pool size (default: 1)
    /// - `PG_CONN_TIMEOUT_SEC`: Connection timeout in seconds (default: 30)
    /// - `PG_IDLE_TIMEOUT_SEC`: Idle connection timeout in seconds (default: 600)
    /// - `PG_MAX_RETRIES`: Maximum retry attempts (default: 3)
    /// - `PG_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 100)
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("PG_DATABASE_URL"))
            .map_err(|_| "DATABASE_URL or PG_DATABASE_URL must be set".to_string())?;

        let max_pool_size = std::env::var("PG_POOL_MAX")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        let min_pool_size = std::env::var("PG_POOL_MIN")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1);

        let connection_timeout_sec = std::env::var("PG_CONN_TIMEOUT_SEC")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        let idle_timeout_sec = std::env::var("PG_IDLE_TIMEOUT_SEC")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(600);

        let max_retries = std::env::var("PG_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(3);

        let retry_delay_ms = std::env::var("PG_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(100);

        Ok(Self {
            database_url,
            max_pool_size,
            min_pool_size,
            connection_timeout_sec,
            idle_timeout_sec,
            max_retries,
            retry_delay_ms,
        })
    }

    /// Create a new configuration with a database URL.
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

/// Pool health statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of connections currently in use
    pub connections_in_use: u32,
    /// Number of idle connections
    pub idle_connections: u32,
    /// Total number of connections in the pool
    pub total_connections: u32,
    /// Maximum pool size
    pub max_size: u32,
    /// Total successful queries executed
    pub total_queries: u64,
    /// Total failed queries
    pub failed_queries: u64,
    /// Total retried operations
    pub retried_operations: u64,
}

/// Diesel-backed repository for Postgres.
///
/// This repository implementation provides:
/// - Connection pooling with configurable limits
/// - Automatic retry for transient failures
/// - Health monitoring and statistics
/// - Automatic schema migrations
#[derive(Clone, Debug)]
pub struct PostgresRepository {
    pool: PgPool,
    config: PostgresConfig,
    // Metrics counters
    total_queries: std::sync::Arc<AtomicU64>,
    failed_queries: std::sync::Arc<AtomicU64>,
    retried_operations: std::sync::Arc<AtomicU64>,
}

impl PostgresRepository {
    /// Create a new repository and run pending migrations.
    ///
    /// # Arguments
    /// * `config` - Database configuration
    ///
    /// # Returns
    /// * `Ok(PostgresRepository)` on success
    /// * `Err(RepositoryError)` if connection or migration fails
    pub fn new(config: PostgresConfig) -> RepositoryResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(config.min_pool_size))
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_sec)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_pool")
                        .with_details(format!("max_size={}", config.max_pool_size)),
                )
            })?;

        // Run migrations once during initialization
        {
            let mut conn = pool.get().map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_connection_for_migrations"),
                )
            })?;
            Self::run_migrations(&mut conn)?;
        }

        Ok(Self {
            pool,
            config,
            total_queries: std::sync::Arc::new(AtomicU64::new(0)),
            failed_queries: std::sync::Arc::new(AtomicU64::new(0)),
            retried_operations: std::sync::Arc::new(AtomicU64::new(0)),
        })
    }

    /// Run pending database migrations.
    fn run_migrations(conn: &mut PgConnection) -> RepositoryResult<()> {
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Migration failed: {}", e),
                ErrorContext::new("run_migrations"),
            )
        })?;

        Ok(())
    }

    /// Execute a database operation with automatic retry for transient failures.
    ///
    /// This method will retry the operation up to `max_retries` times if a
    /// retryable error occurs (connection errors, timeouts, serialization failures).
    async fn with_conn<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> RepositoryResult<T> + Send + 'static + Clone,
    {
        let pool = self.pool.clone();
        let max_retries = self.config.max_retries;
        let retry_delay_ms = self.config.retry_delay_ms;
        let total_queries = self.total_queries.clone();
        let failed_queries = self.failed_queries.clone();
        let retried_operations = self.retried_operations.clone();

        task::spawn_blocking(move || {
            let mut last_error = None;
            let mut retry_delay = Duration::from_millis(retry_delay_ms);

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    retried_operations.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(retry_delay);
                    retry_delay *= 2; // Exponential backoff
                }

                let mut conn = match pool.get() {
                    Ok(c) => c,
                    Err(e) => {
                        let err = RepositoryError::connection_with_context(
                            e.to_string(),
                            ErrorContext::new("get_connection")
                                .with_details(format!("attempt={}", attempt + 1))
                                .retryable(),
                        );
                        if attempt < max_retries {
                            last_error = Some(err);
                            continue;
                        }
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(err);
                    }
                };

                total_queries.fetch_add(1, Ordering::Relaxed);
                match f.clone()(&mut conn) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.is_retryable() && attempt < max_retries => {
                        last_error = Some(e);
                        continue;
                    }
                    Err(e) => {
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }
                }
            }

            failed_queries.fetch_add(1, Ordering::Relaxed);
            Err(last_error.unwrap_or_else(|| {
                RepositoryError::internal("Max retries exceeded with no error captured")
            }))
        })
        .await
        .map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Task join error: {}", e),
                ErrorContext::new("spawn_blocking"),
            )
        })?
    }

    /// Get pool health statistics.
    ///
    /// Returns current pool state and query statistics for monitoring.
    pub fn get_pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections_in_use: state.connections - state.idle_connections,
            idle_connections: state.idle_connections,
            total_connections: state.connections,
            max_size: self.config.max_pool_size,
            total_queries: self.total_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            retried_operations: self.retried_operations.load(Ordering::Relaxed),
        }
    }

    /// Check if the database connection is healthy.
    pub async fn is_healthy(&self) -> bool {
        self.health_check().await.unwrap_or(false)
    }

    /// Get detailed health information.
    ///
    /// Returns a tuple of (is_healthy, latency_ms, error_message).
    pub async fn health_check_detailed(&self) -> (bool, Option<u64>, Option<String>) {
        let start = Instant::now();
        match self.health_check().await {
            Ok(true) => (true, Some(start.elapsed().as_millis() as u64), None),
            Ok(false) => (
                false,
                Some(start.elapsed().as_millis() as u64),
                Some("Health check returned false".to_string()),
            ),
            Err(e) => (
                false,
                Some(start.elapsed().as_millis() as u64),
                Some(e.to_string()),
            ),
        }
    }
}

fn map_diesel_error(err: diesel::result::Error) -> RepositoryError {
    RepositoryError::from(err)
}

// ==================== Row conversions ====================

fn parse_treatment_state(s: &str) -> RepositoryResult<TreatmentState> {
    s.parse().map_err(RepositoryError::internal)
}

fn parse_health_state(s: &str) -> RepositoryResult<HealthState> {
    s.parse().map_err(RepositoryError::internal)
}

fn parse_condition(s: &str) -> RepositoryResult<AnimalCondition> {
    s.parse().map_err(RepositoryError::internal)
}

fn parse_role(s: &str) -> RepositoryResult<Role> {
    s.parse().map_err(RepositoryError::internal)
}

fn employee_from_row(row: EmployeeRow) -> Employee {
    Employee {
        id: EmployeeId(row.employee_id),
        name: row.name,
        surname: row.surname,
        phone: row.phone,
        email: row.email,
        username: row.username,
    }
}

fn species_from_row(row: SpeciesRow) -> Species {
    Species {
        id: SpeciesId(row.species_id),
        scientific_name: row.scientific_name,
        family: row.family,
        habitat: row.habitat,
        conservation_status: row.conservation_status,
        diet: row.diet,
    }
}

fn medication_from_row(row: MedicationRow) -> Medication {
    Medication {
        id: MedicationId(row.medication_id),
        name: row.name,
        kind: row.kind,
        description: row.description,
    }
}

fn rescue_from_row(row: RescueRow) -> Rescue {
    Rescue {
        id: RescueId(row.rescue_id),
        date: row.rescue_date,
        location: row.location,
        details: row.details,
        rescuer_id: EmployeeId(row.rescuer_id),
    }
}

fn animal_from_row(row: AnimalRow) -> Animal {
    Animal {
        id: AnimalId(row.animal_id),
        name: row.name,
        species_id: SpeciesId(row.species_id),
        breed: row.breed,
        age: row.age,
        sex: row.sex,
        rescue_id: RescueId(row.rescue_id),
    }
}

fn treatment_from_row(row: TreatmentRow) -> RepositoryResult<Treatment> {
    Ok(Treatment {
        id: TreatmentId(row.treatment_id),
        animal_id: AnimalId(row.animal_id),
        veterinarian_id: row.veterinarian_id.map(EmployeeId),
        caregiver_id: row.caregiver_id.map(EmployeeId),
        started_at: row.started_at,
        ended_at: row.ended_at,
        plan: row.plan,
        care_notes: row.care_notes,
        state: parse_treatment_state(&row.state)?,
    })
}

fn assessment_from_row(row: AssessmentRow) -> RepositoryResult<HealthAssessment> {
    Ok(HealthAssessment {
        id: crate::api::AssessmentId(row.assessment_id),
        animal_id: AnimalId(row.animal_id),
        evaluated_at: row.evaluated_at,
        problem_type: row.problem_type,
        diagnosis: row.diagnosis,
        state: parse_health_state(&row.state)?,
        veterinarian_id: EmployeeId(row.veterinarian_id),
    })
}

fn observation_from_row(row: ObservationRow) -> RepositoryResult<CaregiverObservation> {
    Ok(CaregiverObservation {
        id: crate::api::ObservationId(row.observation_id),
        treatment_id: TreatmentId(row.treatment_id),
        caregiver_id: EmployeeId(row.caregiver_id),
        observed_at: row.observed_at,
        text: row.text,
        condition: parse_condition(&row.condition)?,
    })
}

fn release_from_row(row: ReleaseRow) -> Release {
    Release {
        id: ReleaseId(row.release_id),
        animal_id: AnimalId(row.animal_id),
        released_at: row.released_at,
        location: row.location,
        notes: row.notes,
        rescuer_id: EmployeeId(row.rescuer_id),
    }
}

fn follow_up_from_row(row: FollowUpRow) -> ReleaseFollowUp {
    ReleaseFollowUp {
        id: crate::api::FollowUpId(row.follow_up_id),
        release_id: ReleaseId(row.release_id),
        recorded_at: row.recorded_at,
        tracking_method: row.tracking_method,
        observed_state: row.observed_state,
        sighting_location: row.sighting_location,
        notes: row.notes,
        rescuer_id: EmployeeId(row.rescuer_id),
    }
}

// ==================== Query helpers ====================

fn employee_exists(conn: &mut PgConnection, id: i64) -> RepositoryResult<bool> {
    let found: Option<i64> = employees::table
        .find(id)
        .select(employees::employee_id)
        .first(conn)
        .optional()
        .map_err(map_diesel_error)?;
    Ok(found.is_some())
}

fn full_name(conn: &mut PgConnection, id: i64) -> RepositoryResult<Option<String>> {
    let found: Option<(String, String)> = employees::table
        .find(id)
        .select((employees::name, employees::surname))
        .first(conn)
        .optional()
        .map_err(map_diesel_error)?;
    Ok(found.map(|(name, surname)| format!("{} {}", name, surname)))
}

fn species_label(conn: &mut PgConnection, id: i64) -> RepositoryResult<String> {
    let found: Option<String> = species::table
        .find(id)
        .select(species::scientific_name)
        .first(conn)
        .optional()
        .map_err(map_diesel_error)?;
    Ok(found.unwrap_or_default())
}

fn animals_for_rescue(conn: &mut PgConnection, rescue_id: i64) -> RepositoryResult<Vec<AnimalRow>> {
    animals::table
        .filter(animals::rescue_id.eq(rescue_id))
        .order(animals::animal_id.asc())
        .select(AnimalRow::as_select())
        .load(conn)
        .map_err(map_diesel_error)
}

fn rescue_view(conn: &mut PgConnection, row: RescueRow) -> RepositoryResult<RescueWithAnimals> {
    let animals = animals_for_rescue(conn, row.rescue_id)?
        .into_iter()
        .map(animal_from_row)
        .collect();
    let rescuer_name = full_name(conn, row.rescuer_id)?.unwrap_or_default();
    Ok(RescueWithAnimals {
        rescue: rescue_from_row(row),
        rescuer_name,
        animals,
    })
}

/// The animal's current treatment is its newest one; earlier completed
/// treatments stay as history.
fn current_treatment(
    conn: &mut PgConnection,
    animal_id: i64,
) -> RepositoryResult<Option<TreatmentRow>> {
    treatments::table
        .filter(treatments::animal_id.eq(animal_id))
        .order(treatments::treatment_id.desc())
        .select(TreatmentRow::as_select())
        .first(conn)
        .optional()
        .map_err(map_diesel_error)
}

fn latest_assessment(
    conn: &mut PgConnection,
    animal_id: i64,
) -> RepositoryResult<Option<AssessmentRow>> {
    health_assessments::table
        .filter(health_assessments::animal_id.eq(animal_id))
        .order((
            health_assessments::evaluated_at.desc(),
            health_assessments::assessment_id.desc(),
        ))
        .select(AssessmentRow::as_select())
        .first(conn)
        .optional()
        .map_err(map_diesel_error)
}

fn latest_observation(
    conn: &mut PgConnection,
    treatment_id: i64,
) -> RepositoryResult<Option<ObservationRow>> {
    caregiver_observations::table
        .filter(caregiver_observations::treatment_id.eq(treatment_id))
        .order((
            caregiver_observations::observed_at.desc(),
            caregiver_observations::observation_id.desc(),
        ))
        .select(ObservationRow::as_select())
        .first(conn)
        .optional()
        .map_err(map_diesel_error)
}

/// Most recent ready-for-release observation. Clearance is sticky: a later,
/// worse observation does not withdraw it.
fn ready_observation(
    conn: &mut PgConnection,
    treatment_id: i64,
) -> RepositoryResult<Option<ObservationRow>> {
    caregiver_observations::table
        .filter(caregiver_observations::treatment_id.eq(treatment_id))
        .filter(
            caregiver_observations::condition.eq(AnimalCondition::ReadyForRelease.as_str()),
        )
        .order((
            caregiver_observations::observed_at.desc(),
            caregiver_observations::observation_id.desc(),
        ))
        .select(ObservationRow::as_select())
        .first(conn)
        .optional()
        .map_err(map_diesel_error)
}

fn release_for_animal(
    conn: &mut PgConnection,
    animal_id: i64,
) -> RepositoryResult<Option<ReleaseRow>> {
    releases::table
        .filter(releases::animal_id.eq(animal_id))
        .select(ReleaseRow::as_select())
        .first(conn)
        .optional()
        .map_err(map_diesel_error)
}

fn medication_lines(
    conn: &mut PgConnection,
    treatment_id: i64,
) -> RepositoryResult<Vec<MedicationLine>> {
    let rows: Vec<(TreatmentMedicationRow, MedicationRow)> = treatment_medications::table
        .inner_join(medications::table)
        .filter(treatment_medications::treatment_id.eq(treatment_id))
        .order(treatment_medications::medication_id.asc())
        .select((
            TreatmentMedicationRow::as_select(),
            MedicationRow::as_select(),
        ))
        .load(conn)
        .map_err(map_diesel_error)?;

    Ok(rows
        .into_iter()
        .map(|(line, med)| MedicationLine {
            medication_id: MedicationId(med.medication_id),
            medication_name: med.name,
            kind: med.kind,
            dose: line.dose,
            start_date: line.start_date,
            end_date: line.end_date,
        })
        .collect())
}

fn validate_medications(
    conn: &mut PgConnection,
    operation: &str,
    lines: &[NewTreatmentMedication],
) -> RepositoryResult<()> {
    for line in lines {
        let found: Option<i64> = medications::table
            .find(line.medication_id.value())
            .select(medications::medication_id)
            .first(conn)
            .optional()
            .map_err(map_diesel_error)?;
        if found.is_none() {
            return Err(RepositoryError::validation_with_context(
                "Unknown medication",
                ErrorContext::new(operation)
                    .with_entity("medication")
                    .with_entity_id(line.medication_id),
            ));
        }
    }
    Ok(())
}

fn insert_medications(
    conn: &mut PgConnection,
    treatment_id: i64,
    lines: &[NewTreatmentMedication],
) -> RepositoryResult<()> {
    let rows: Vec<NewTreatmentMedicationRow> = lines
        .iter()
        .map(|line| NewTreatmentMedicationRow {
            treatment_id,
            medication_id: line.medication_id.value(),
            dose: line.dose.clone(),
            start_date: line.start_date,
            end_date: line.end_date,
        })
        .collect();
    diesel::insert_into(treatment_medications::table)
        .values(&rows)
        .execute(conn)
        .map_err(map_diesel_error)?;
    Ok(())
}

/// Validate animal descriptors before any row is written, so a failed
/// intake rolls back cleanly with a validation error rather than an FK
/// violation.
fn validate_animals(
    conn: &mut PgConnection,
    operation: &str,
    animals: &[NewAnimal],
) -> RepositoryResult<()> {
    for descriptor in animals {
        if descriptor.name.trim().is_empty() {
            return Err(RepositoryError::validation("Animal name must not be empty"));
        }
        let found: Option<i64> = species::table
            .find(descriptor.species_id.value())
            .select(species::species_id)
            .first(conn)
            .optional()
            .map_err(map_diesel_error)?;
        if found.is_none() {
            return Err(RepositoryError::validation_with_context(
                "Unknown species",
                ErrorContext::new(operation)
                    .with_entity("species")
                    .with_entity_id(descriptor.species_id),
            ));
        }
    }
    Ok(())
}

/// Insert animals plus their pending treatments. Inputs are already
/// validated; the caller runs this inside a transaction.
fn insert_animals(
    conn: &mut PgConnection,
    rescue_id: i64,
    animals_in: &[NewAnimal],
) -> RepositoryResult<()> {
    for descriptor in animals_in {
        let inserted: AnimalRow = diesel::insert_into(animals::table)
            .values(&NewAnimalRow {
                name: descriptor.name.clone(),
                species_id: descriptor.species_id.value(),
                breed: descriptor.breed.clone(),
                age: descriptor.age,
                sex: descriptor.sex.clone(),
                rescue_id,
            })
            .returning(AnimalRow::as_returning())
            .get_result(conn)
            .map_err(map_diesel_error)?;

        diesel::insert_into(treatments::table)
            .values(&NewTreatmentRow {
                animal_id: inserted.animal_id,
                state: TreatmentState::Pending.as_str().to_string(),
            })
            .execute(conn)
            .map_err(map_diesel_error)?;
    }
    Ok(())
}

#[async_trait]
impl DirectoryRepository for PostgresRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        self.with_conn(|conn| {
            sql_query("SELECT 1")
                .execute(conn)
                .map(|_| true)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn fetch_employees(&self) -> RepositoryResult<Vec<Employee>> {
        self.with_conn(|conn| {
            let rows: Vec<EmployeeRow> = employees::table
                .order(employees::employee_id.asc())
                .select(EmployeeRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            Ok(rows.into_iter().map(employee_from_row).collect())
        })
        .await
    }

    async fn fetch_employee(&self, id: EmployeeId) -> RepositoryResult<Employee> {
        self.with_conn(move |conn| {
            let row: Option<EmployeeRow> = employees::table
                .find(id.value())
                .select(EmployeeRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            row.map(employee_from_row)
                .ok_or_else(|| RepositoryError::not_found(format!("Employee {} not found", id)))
        })
        .await
    }

    async fn find_employee_by_credentials(
        &self,
        username: &str,
        password_digest: &str,
    ) -> RepositoryResult<Option<Employee>> {
        let username = username.to_string();
        let password_digest = password_digest.to_string();
        self.with_conn(move |conn| {
            let row: Option<EmployeeRow> = employees::table
                .filter(employees::username.eq(&username))
                .filter(employees::password_digest.eq(&password_digest))
                .select(EmployeeRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            Ok(row.map(employee_from_row))
        })
        .await
    }

    async fn fetch_employee_roles(&self, id: EmployeeId) -> RepositoryResult<HashSet<Role>> {
        self.with_conn(move |conn| {
            let codes: Vec<String> = employee_roles::table
                .filter(employee_roles::employee_id.eq(id.value()))
                .select(employee_roles::role)
                .load(conn)
                .map_err(map_diesel_error)?;
            let mut roles = HashSet::with_capacity(codes.len());
            for code in codes {
                roles.insert(parse_role(&code)?);
            }
            Ok(roles)
        })
        .await
    }

    async fn fetch_species(&self) -> RepositoryResult<Vec<Species>> {
        self.with_conn(|conn| {
            let rows: Vec<SpeciesRow> = species::table
                .order(species::species_id.asc())
                .select(SpeciesRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            Ok(rows.into_iter().map(species_from_row).collect())
        })
        .await
    }

    async fn fetch_species_by_id(&self, id: SpeciesId) -> RepositoryResult<Species> {
        self.with_conn(move |conn| {
            let row: Option<SpeciesRow> = species::table
                .find(id.value())
                .select(SpeciesRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            row.map(species_from_row)
                .ok_or_else(|| RepositoryError::not_found(format!("Species {} not found", id)))
        })
        .await
    }

    async fn fetch_medications(&self) -> RepositoryResult<Vec<Medication>> {
        self.with_conn(|conn| {
            let rows: Vec<MedicationRow> = medications::table
                .order(medications::medication_id.asc())
                .select(MedicationRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            Ok(rows.into_iter().map(medication_from_row).collect())
        })
        .await
    }
}

#[async_trait]
impl RescueRepository for PostgresRepository {
    async fn store_rescue(
        &self,
        rescue: &NewRescue,
        animals_in: &[NewAnimal],
    ) -> RepositoryResult<RescueWithAnimals> {
        if animals_in.is_empty() {
            return Err(RepositoryError::validation(
                "A rescue must include at least one animal",
            ));
        }

        let rescue = rescue.clone();
        let animals_in = animals_in.to_vec();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                if !employee_exists(tx, rescue.rescuer_id.value())? {
                    return Err(RepositoryError::validation_with_context(
                        "Unknown rescuer",
                        ErrorContext::new("store_rescue")
                            .with_entity("employee")
                            .with_entity_id(rescue.rescuer_id),
                    ));
                }
                validate_animals(tx, "store_rescue", &animals_in)?;

                let inserted: RescueRow = diesel::insert_into(rescues::table)
                    .values(&NewRescueRow {
                        rescue_date: rescue.date,
                        location: rescue.location.clone(),
                        details: rescue.details.clone(),
                        rescuer_id: rescue.rescuer_id.value(),
                    })
                    .returning(RescueRow::as_returning())
                    .get_result(tx)
                    .map_err(map_diesel_error)?;

                insert_animals(tx, inserted.rescue_id, &animals_in)?;
                rescue_view(tx, inserted)
            })
        })
        .await
    }

    async fn fetch_rescues(&self) -> RepositoryResult<Vec<RescueWithAnimals>> {
        self.with_conn(|conn| {
            let rows: Vec<RescueRow> = rescues::table
                .order((rescues::rescue_date.desc(), rescues::rescue_id.desc()))
                .select(RescueRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            rows.into_iter().map(|row| rescue_view(conn, row)).collect()
        })
        .await
    }

    async fn fetch_rescue(&self, id: RescueId) -> RepositoryResult<RescueWithAnimals> {
        self.with_conn(move |conn| {
            let row: Option<RescueRow> = rescues::table
                .find(id.value())
                .select(RescueRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            let row = row
                .ok_or_else(|| RepositoryError::not_found(format!("Rescue {} not found", id)))?;
            rescue_view(conn, row)
        })
        .await
    }

    async fn update_rescue(
        &self,
        id: RescueId,
        rescue: &NewRescue,
        animals_in: &[NewAnimal],
    ) -> RepositoryResult<RescueWithAnimals> {
        if animals_in.is_empty() {
            return Err(RepositoryError::validation(
                "A rescue must include at least one animal",
            ));
        }

        let rescue = rescue.clone();
        let animals_in = animals_in.to_vec();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let existing: Option<i64> = rescues::table
                    .find(id.value())
                    .select(rescues::rescue_id)
                    .first(tx)
                    .optional()
                    .map_err(map_diesel_error)?;
                if existing.is_none() {
                    return Err(RepositoryError::not_found(format!(
                        "Rescue {} not found",
                        id
                    )));
                }
                if !employee_exists(tx, rescue.rescuer_id.value())? {
                    return Err(RepositoryError::validation_with_context(
                        "Unknown rescuer",
                        ErrorContext::new("update_rescue")
                            .with_entity("employee")
                            .with_entity_id(rescue.rescuer_id),
                    ));
                }
                validate_animals(tx, "update_rescue", &animals_in)?;

                // Replace the animal set wholesale; dependent records go
                // with the old animals via FK cascades.
                diesel::delete(animals::table.filter(animals::rescue_id.eq(id.value())))
                    .execute(tx)
                    .map_err(map_diesel_error)?;

                let updated: RescueRow = diesel::update(rescues::table.find(id.value()))
                    .set((
                        rescues::rescue_date.eq(rescue.date),
                        rescues::location.eq(rescue.location.clone()),
                        rescues::details.eq(rescue.details.clone()),
                        rescues::rescuer_id.eq(rescue.rescuer_id.value()),
                    ))
                    .returning(RescueRow::as_returning())
                    .get_result(tx)
                    .map_err(map_diesel_error)?;

                insert_animals(tx, id.value(), &animals_in)?;
                rescue_view(tx, updated)
            })
        })
        .await
    }

    async fn delete_rescue(&self, id: RescueId) -> RepositoryResult<RescueDeletion> {
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let removed: Vec<RemovedAnimal> = animals::table
                    .filter(animals::rescue_id.eq(id.value()))
                    .order(animals::animal_id.asc())
                    .select((animals::animal_id, animals::name))
                    .load::<(i64, String)>(tx)
                    .map_err(map_diesel_error)?
                    .into_iter()
                    .map(|(animal_id, name)| RemovedAnimal {
                        id: AnimalId(animal_id),
                        name,
                    })
                    .collect();

                let deleted = diesel::delete(rescues::table.find(id.value()))
                    .execute(tx)
                    .map_err(map_diesel_error)?;
                if deleted == 0 {
                    return Err(RepositoryError::not_found(format!(
                        "Rescue {} not found",
                        id
                    )));
                }

                Ok(RescueDeletion {
                    rescue_id: id,
                    animals_removed: removed,
                })
            })
        })
        .await
    }
}

#[async_trait]
impl TreatmentRepository for PostgresRepository {
    async fn fetch_pending_animals(&self) -> RepositoryResult<Vec<PendingAnimal>> {
        self.with_conn(|conn| {
            let rows: Vec<(TreatmentRow, (AnimalRow, RescueRow))> = treatments::table
                .inner_join(animals::table.inner_join(rescues::table))
                .filter(treatments::state.eq(TreatmentState::Pending.as_str()))
                .select((
                    TreatmentRow::as_select(),
                    (AnimalRow::as_select(), RescueRow::as_select()),
                ))
                .load(conn)
                .map_err(map_diesel_error)?;

            let mut pending = Vec::with_capacity(rows.len());
            for (_, (animal, rescue)) in rows {
                pending.push(PendingAnimal {
                    animal_id: AnimalId(animal.animal_id),
                    animal_name: animal.name,
                    species_name: species_label(conn, animal.species_id)?,
                    age: animal.age,
                    sex: animal.sex,
                    rescue_date: rescue.rescue_date,
                    rescue_location: rescue.location,
                    rescue_details: rescue.details,
                    rescuer_name: full_name(conn, rescue.rescuer_id)?.unwrap_or_default(),
                });
            }

            // Oldest rescues first so the longest-waiting animals surface.
            pending.sort_by_key(|p| (p.rescue_date, p.animal_id));
            Ok(pending)
        })
        .await
    }

    async fn fetch_active_treatments(&self) -> RepositoryResult<Vec<ActiveTreatment>> {
        self.with_conn(|conn| {
            let rows: Vec<(TreatmentRow, AnimalRow)> = treatments::table
                .inner_join(animals::table)
                .filter(treatments::state.eq(TreatmentState::InTreatment.as_str()))
                .order(treatments::treatment_id.asc())
                .select((TreatmentRow::as_select(), AnimalRow::as_select()))
                .load(conn)
                .map_err(map_diesel_error)?;

            let mut active = Vec::with_capacity(rows.len());
            for (treatment, animal) in rows {
                let assessment = latest_assessment(conn, animal.animal_id)?;
                let veterinarian_name = match treatment.veterinarian_id {
                    Some(id) => full_name(conn, id)?,
                    None => None,
                };
                let (health_state, diagnosis) = match assessment {
                    Some(a) => (Some(parse_health_state(&a.state)?), Some(a.diagnosis)),
                    None => (None, None),
                };
                active.push(ActiveTreatment {
                    treatment_id: TreatmentId(treatment.treatment_id),
                    animal_id: AnimalId(animal.animal_id),
                    animal_name: animal.name,
                    species_name: species_label(conn, animal.species_id)?,
                    plan: treatment.plan,
                    started_at: treatment.started_at,
                    health_state,
                    diagnosis,
                    veterinarian_name,
                });
            }
            Ok(active)
        })
        .await
    }

    async fn fetch_completed_treatments(&self) -> RepositoryResult<Vec<CompletedTreatment>> {
        self.with_conn(|conn| {
            let rows: Vec<(TreatmentRow, AnimalRow)> = treatments::table
                .inner_join(animals::table)
                .filter(treatments::state.eq(TreatmentState::Completed.as_str()))
                .order(treatments::treatment_id.asc())
                .select((TreatmentRow::as_select(), AnimalRow::as_select()))
                .load(conn)
                .map_err(map_diesel_error)?;

            let mut completed = Vec::with_capacity(rows.len());
            for (treatment, animal) in rows {
                let veterinarian_name = match treatment.veterinarian_id {
                    Some(id) => full_name(conn, id)?,
                    None => None,
                };
                completed.push(CompletedTreatment {
                    treatment_id: TreatmentId(treatment.treatment_id),
                    animal_id: AnimalId(animal.animal_id),
                    animal_name: animal.name,
                    species_name: species_label(conn, animal.species_id)?,
                    plan: treatment.plan,
                    care_notes: treatment.care_notes,
                    ended_at: treatment.ended_at,
                    veterinarian_name,
                    caregiver_id: treatment.caregiver_id.map(EmployeeId),
                });
            }
            Ok(completed)
        })
        .await
    }

    async fn begin_treatment(
        &self,
        assessment: &NewAssessment,
        plan: &str,
        care_notes: Option<&str>,
        medications_in: &[NewTreatmentMedication],
    ) -> RepositoryResult<Treatment> {
        let assessment = assessment.clone();
        let plan = plan.to_string();
        let care_notes = care_notes.map(str::to_string);
        let medications_in = medications_in.to_vec();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let animal: Option<i64> = animals::table
                    .find(assessment.animal_id.value())
                    .select(animals::animal_id)
                    .first(tx)
                    .optional()
                    .map_err(map_diesel_error)?;
                if animal.is_none() {
                    return Err(RepositoryError::not_found(format!(
                        "Animal {} not found",
                        assessment.animal_id
                    )));
                }
                if !employee_exists(tx, assessment.veterinarian_id.value())? {
                    return Err(RepositoryError::validation_with_context(
                        "Unknown veterinarian",
                        ErrorContext::new("begin_treatment")
                            .with_entity("employee")
                            .with_entity_id(assessment.veterinarian_id),
                    ));
                }
                validate_medications(tx, "begin_treatment", &medications_in)?;

                let treatment = current_treatment(tx, assessment.animal_id.value())?
                    .ok_or_else(|| {
                        RepositoryError::not_found(format!(
                            "Animal {} has no treatment record",
                            assessment.animal_id
                        ))
                    })?;

                // State guard: only a PENDING treatment can be claimed. A
                // concurrent evaluation that already won makes this match
                // zero rows.
                let now = Utc::now();
                let updated: Option<TreatmentRow> = diesel::update(
                    treatments::table
                        .find(treatment.treatment_id)
                        .filter(treatments::state.eq(TreatmentState::Pending.as_str())),
                )
                .set((
                    treatments::veterinarian_id.eq(Some(assessment.veterinarian_id.value())),
                    treatments::plan.eq(Some(plan.clone())),
                    treatments::care_notes.eq(care_notes.clone()),
                    treatments::started_at.eq(Some(now)),
                    treatments::state.eq(TreatmentState::InTreatment.as_str()),
                ))
                .returning(TreatmentRow::as_returning())
                .get_result(tx)
                .optional()
                .map_err(map_diesel_error)?;

                let updated = updated.ok_or_else(|| {
                    RepositoryError::conflict_with_context(
                        format!("Treatment {} already left PENDING", treatment.treatment_id),
                        ErrorContext::new("begin_treatment")
                            .with_entity("treatment")
                            .with_entity_id(treatment.treatment_id)
                            .with_details(format!("state={}", treatment.state)),
                    )
                })?;

                diesel::insert_into(health_assessments::table)
                    .values(&NewAssessmentRow {
                        animal_id: assessment.animal_id.value(),
                        problem_type: assessment.problem_type.clone(),
                        diagnosis: assessment.diagnosis.clone(),
                        state: assessment.state.as_str().to_string(),
                        veterinarian_id: assessment.veterinarian_id.value(),
                    })
                    .execute(tx)
                    .map_err(map_diesel_error)?;

                insert_medications(tx, updated.treatment_id, &medications_in)?;
                treatment_from_row(updated)
            })
        })
        .await
    }

    async fn update_treatment(
        &self,
        id: TreatmentId,
        changes: &TreatmentChanges,
    ) -> RepositoryResult<Treatment> {
        let changes = changes.clone();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                if let Some(lines) = &changes.medications {
                    validate_medications(tx, "update_treatment", lines)?;
                }

                let row: Option<TreatmentRow> = treatments::table
                    .find(id.value())
                    .select(TreatmentRow::as_select())
                    .first(tx)
                    .optional()
                    .map_err(map_diesel_error)?;
                let row = row.ok_or_else(|| {
                    RepositoryError::not_found(format!("Treatment {} not found", id))
                })?;
                if row.state != TreatmentState::InTreatment.as_str() {
                    return Err(RepositoryError::conflict_with_context(
                        format!("Treatment {} is not in treatment", id),
                        ErrorContext::new("update_treatment")
                            .with_entity("treatment")
                            .with_entity_id(id)
                            .with_details(format!("state={}", row.state)),
                    ));
                }

                if let Some(lines) = &changes.medications {
                    diesel::delete(
                        treatment_medications::table
                            .filter(treatment_medications::treatment_id.eq(id.value())),
                    )
                    .execute(tx)
                    .map_err(map_diesel_error)?;
                    insert_medications(tx, id.value(), lines)?;
                }

                let updated: TreatmentRow = diesel::update(treatments::table.find(id.value()))
                    .set((
                        treatments::plan.eq(changes.plan.clone().or(row.plan)),
                        treatments::care_notes.eq(changes.care_notes.clone().or(row.care_notes)),
                    ))
                    .returning(TreatmentRow::as_returning())
                    .get_result(tx)
                    .map_err(map_diesel_error)?;

                treatment_from_row(updated)
            })
        })
        .await
    }

    async fn fetch_treatment(&self, id: TreatmentId) -> RepositoryResult<Treatment> {
        self.with_conn(move |conn| {
            let row: Option<TreatmentRow> = treatments::table
                .find(id.value())
                .select(TreatmentRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            match row {
                Some(row) => treatment_from_row(row),
                None => Err(RepositoryError::not_found(format!(
                    "Treatment {} not found",
                    id
                ))),
            }
        })
        .await
    }

    async fn complete_treatment(&self, id: TreatmentId) -> RepositoryResult<Treatment> {
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let now = Utc::now();
                let updated: Option<TreatmentRow> = diesel::update(
                    treatments::table
                        .find(id.value())
                        .filter(treatments::state.eq(TreatmentState::InTreatment.as_str())),
                )
                .set((
                    treatments::state.eq(TreatmentState::Completed.as_str()),
                    treatments::ended_at.eq(Some(now)),
                ))
                .returning(TreatmentRow::as_returning())
                .get_result(tx)
                .optional()
                .map_err(map_diesel_error)?;

                match updated {
                    Some(row) => treatment_from_row(row),
                    None => {
                        let row: Option<TreatmentRow> = treatments::table
                            .find(id.value())
                            .select(TreatmentRow::as_select())
                            .first(tx)
                            .optional()
                            .map_err(map_diesel_error)?;
                        match row {
                            Some(row) => Err(RepositoryError::conflict_with_context(
                                format!("Treatment {} is not in treatment", id),
                                ErrorContext::new("complete_treatment")
                                    .with_entity("treatment")
                                    .with_entity_id(id)
                                    .with_details(format!("state={}", row.state)),
                            )),
                            None => Err(RepositoryError::not_found(format!(
                                "Treatment {} not found",
                                id
                            ))),
                        }
                    }
                }
            })
        })
        .await
    }

    async fn assign_caregiver(
        &self,
        id: TreatmentId,
        caregiver_id: EmployeeId,
    ) -> RepositoryResult<Treatment> {
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                if !employee_exists(tx, caregiver_id.value())? {
                    return Err(RepositoryError::validation_with_context(
                        "Unknown caregiver",
                        ErrorContext::new("assign_caregiver")
                            .with_entity("employee")
                            .with_entity_id(caregiver_id),
                    ));
                }

                // Reassignment overwrites; observation history keeps
                // per-entry authors.
                let updated: Option<TreatmentRow> = diesel::update(
                    treatments::table
                        .find(id.value())
                        .filter(treatments::state.eq(TreatmentState::Completed.as_str())),
                )
                .set(treatments::caregiver_id.eq(Some(caregiver_id.value())))
                .returning(TreatmentRow::as_returning())
                .get_result(tx)
                .optional()
                .map_err(map_diesel_error)?;

                match updated {
                    Some(row) => treatment_from_row(row),
                    None => {
                        let row: Option<TreatmentRow> = treatments::table
                            .find(id.value())
                            .select(TreatmentRow::as_select())
                            .first(tx)
                            .optional()
                            .map_err(map_diesel_error)?;
                        match row {
                            Some(row) => Err(RepositoryError::conflict_with_context(
                                format!("Treatment {} is not completed", id),
                                ErrorContext::new("assign_caregiver")
                                    .with_entity("treatment")
                                    .with_entity_id(id)
                                    .with_details(format!("state={}", row.state)),
                            )),
                            None => Err(RepositoryError::not_found(format!(
                                "Treatment {} not found",
                                id
                            ))),
                        }
                    }
                }
            })
        })
        .await
    }

    async fn record_observation(
        &self,
        observation: &NewObservation,
    ) -> RepositoryResult<CaregiverObservation> {
        let observation = observation.clone();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                if !employee_exists(tx, observation.caregiver_id.value())? {
                    return Err(RepositoryError::validation_with_context(
                        "Unknown caregiver",
                        ErrorContext::new("record_observation")
                            .with_entity("employee")
                            .with_entity_id(observation.caregiver_id),
                    ));
                }

                let row: Option<TreatmentRow> = treatments::table
                    .find(observation.treatment_id.value())
                    .select(TreatmentRow::as_select())
                    .first(tx)
                    .optional()
                    .map_err(map_diesel_error)?;
                let row = row.ok_or_else(|| {
                    RepositoryError::not_found(format!(
                        "Treatment {} not found",
                        observation.treatment_id
                    ))
                })?;
                // The author must still be the assigned caregiver inside the
                // transaction; a concurrent reassignment invalidates the write.
                if row.state != TreatmentState::Completed.as_str()
                    || row.caregiver_id != Some(observation.caregiver_id.value())
                {
                    return Err(RepositoryError::conflict_with_context(
                        format!(
                            "Treatment {} is not in aftercare under caregiver {}",
                            observation.treatment_id, observation.caregiver_id
                        ),
                        ErrorContext::new("record_observation")
                            .with_entity("treatment")
                            .with_entity_id(observation.treatment_id)
                            .with_details(format!("state={}", row.state)),
                    ));
                }

                let inserted: ObservationRow =
                    diesel::insert_into(caregiver_observations::table)
                        .values(&NewObservationRow {
                            treatment_id: observation.treatment_id.value(),
                            caregiver_id: observation.caregiver_id.value(),
                            text: observation.text.clone(),
                            condition: observation.condition.as_str().to_string(),
                        })
                        .returning(ObservationRow::as_returning())
                        .get_result(tx)
                        .map_err(map_diesel_error)?;

                observation_from_row(inserted)
            })
        })
        .await
    }

    async fn fetch_in_care(
        &self,
        caregiver_id: Option<EmployeeId>,
    ) -> RepositoryResult<Vec<InCareAnimal>> {
        self.with_conn(move |conn| {
            let mut query = treatments::table
                .inner_join(animals::table)
                .filter(treatments::state.eq(TreatmentState::Completed.as_str()))
                .filter(treatments::caregiver_id.is_not_null())
                .order(treatments::treatment_id.asc())
                .select((TreatmentRow::as_select(), AnimalRow::as_select()))
                .into_boxed();
            if let Some(wanted) = caregiver_id {
                query = query.filter(treatments::caregiver_id.eq(wanted.value()));
            }
            let rows: Vec<(TreatmentRow, AnimalRow)> =
                query.load(conn).map_err(map_diesel_error)?;

            let mut in_care = Vec::with_capacity(rows.len());
            for (treatment, animal) in rows {
                // Released animals leave the aftercare dashboards.
                if release_for_animal(conn, animal.animal_id)?.is_some() {
                    continue;
                }
                let assigned = match treatment.caregiver_id {
                    Some(id) => id,
                    None => continue,
                };
                let last = latest_observation(conn, treatment.treatment_id)?;
                let (last_observation, last_condition) = match last {
                    Some(o) => (Some(o.text), Some(parse_condition(&o.condition)?)),
                    None => (None, None),
                };
                in_care.push(InCareAnimal {
                    treatment_id: TreatmentId(treatment.treatment_id),
                    animal_id: AnimalId(animal.animal_id),
                    animal_name: animal.name,
                    species_name: species_label(conn, animal.species_id)?,
                    caregiver_id: EmployeeId(assigned),
                    caregiver_name: full_name(conn, assigned)?.unwrap_or_default(),
                    assigned_at: treatment.ended_at,
                    last_observation,
                    last_condition,
                });
            }
            Ok(in_care)
        })
        .await
    }

    async fn fetch_observations(
        &self,
        treatment_id: TreatmentId,
    ) -> RepositoryResult<Vec<ObservationEntry>> {
        self.with_conn(move |conn| {
            let rows: Vec<ObservationRow> = caregiver_observations::table
                .filter(caregiver_observations::treatment_id.eq(treatment_id.value()))
                .order((
                    caregiver_observations::observed_at.desc(),
                    caregiver_observations::observation_id.desc(),
                ))
                .select(ObservationRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;

            let mut entries = Vec::with_capacity(rows.len());
            for row in rows {
                let caregiver_name = full_name(conn, row.caregiver_id)?.unwrap_or_default();
                entries.push(ObservationEntry {
                    observation: observation_from_row(row)?,
                    caregiver_name,
                });
            }
            Ok(entries)
        })
        .await
    }

    async fn fetch_animal_record(&self, animal_id: AnimalId) -> RepositoryResult<AnimalRecord> {
        self.with_conn(move |conn| {
            let row: Option<AnimalRow> = animals::table
                .find(animal_id.value())
                .select(AnimalRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            let animal_row = row.ok_or_else(|| {
                RepositoryError::not_found(format!("Animal {} not found", animal_id))
            })?;

            let rescue_row: Option<RescueRow> = rescues::table
                .find(animal_row.rescue_id)
                .select(RescueRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            let rescuer_name = match &rescue_row {
                Some(r) => full_name(conn, r.rescuer_id)?,
                None => None,
            };

            let treatment_row = current_treatment(conn, animal_row.animal_id)?;
            let medications = match &treatment_row {
                Some(t) => medication_lines(conn, t.treatment_id)?,
                None => Vec::new(),
            };
            let latest = latest_assessment(conn, animal_row.animal_id)?;

            Ok(AnimalRecord {
                species_name: species_label(conn, animal_row.species_id)?,
                rescuer_name,
                latest_assessment: latest.map(assessment_from_row).transpose()?,
                animal: animal_from_row(animal_row),
                rescue: rescue_row.map(rescue_from_row),
                treatment: treatment_row.map(treatment_from_row).transpose()?,
                medications,
            })
        })
        .await
    }
}

#[async_trait]
impl ReleaseRepository for PostgresRepository {
    async fn fetch_release_candidates(&self) -> RepositoryResult<Vec<ReleaseCandidate>> {
        self.with_conn(|conn| {
            let rows: Vec<(TreatmentRow, AnimalRow)> = treatments::table
                .inner_join(animals::table)
                .filter(treatments::state.eq(TreatmentState::Completed.as_str()))
                .filter(treatments::caregiver_id.is_not_null())
                .select((TreatmentRow::as_select(), AnimalRow::as_select()))
                .load(conn)
                .map_err(map_diesel_error)?;

            let mut candidates = Vec::new();
            for (treatment, animal) in rows {
                if release_for_animal(conn, animal.animal_id)?.is_some() {
                    continue;
                }
                let cleared = match ready_observation(conn, treatment.treatment_id)? {
                    Some(o) => o,
                    None => continue,
                };
                let last = match latest_observation(conn, treatment.treatment_id)? {
                    Some(o) => o,
                    None => continue,
                };
                let caregiver_name = match treatment.caregiver_id {
                    Some(id) => full_name(conn, id)?.unwrap_or_default(),
                    None => String::new(),
                };
                candidates.push(ReleaseCandidate {
                    animal_id: AnimalId(animal.animal_id),
                    animal_name: animal.name,
                    species_name: species_label(conn, animal.species_id)?,
                    treatment_id: TreatmentId(treatment.treatment_id),
                    caregiver_name,
                    last_observation: last.text,
                    cleared_at: cleared.observed_at,
                });
            }

            candidates.sort_by_key(|c| c.animal_id);
            Ok(candidates)
        })
        .await
    }

    async fn store_release(&self, release: &NewRelease) -> RepositoryResult<Release> {
        let release = release.clone();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                if !employee_exists(tx, release.rescuer_id.value())? {
                    return Err(RepositoryError::validation_with_context(
                        "Unknown rescuer",
                        ErrorContext::new("store_release")
                            .with_entity("employee")
                            .with_entity_id(release.rescuer_id),
                    ));
                }
                let animal: Option<i64> = animals::table
                    .find(release.animal_id.value())
                    .select(animals::animal_id)
                    .first(tx)
                    .optional()
                    .map_err(map_diesel_error)?;
                if animal.is_none() {
                    return Err(RepositoryError::not_found(format!(
                        "Animal {} not found",
                        release.animal_id
                    )));
                }
                if release_for_animal(tx, release.animal_id.value())?.is_some() {
                    return Err(RepositoryError::conflict_with_context(
                        format!("Animal {} is already released", release.animal_id),
                        ErrorContext::new("store_release")
                            .with_entity("animal")
                            .with_entity_id(release.animal_id),
                    ));
                }

                // Eligibility re-checked inside the transaction; the unique
                // index on releases.animal_id backs this up against races.
                let eligible = match current_treatment(tx, release.animal_id.value())? {
                    Some(t)
                        if t.state == TreatmentState::Completed.as_str()
                            && t.caregiver_id.is_some() =>
                    {
                        ready_observation(tx, t.treatment_id)?.is_some()
                    }
                    _ => false,
                };
                if !eligible {
                    return Err(RepositoryError::conflict_with_context(
                        format!("Animal {} is not cleared for release", release.animal_id),
                        ErrorContext::new("store_release")
                            .with_entity("animal")
                            .with_entity_id(release.animal_id),
                    ));
                }

                let inserted: ReleaseRow = diesel::insert_into(releases::table)
                    .values(&NewReleaseRow {
                        animal_id: release.animal_id.value(),
                        location: release.location.clone(),
                        notes: release.notes.clone(),
                        rescuer_id: release.rescuer_id.value(),
                    })
                    .returning(ReleaseRow::as_returning())
                    .get_result(tx)
                    .map_err(map_diesel_error)?;

                Ok(release_from_row(inserted))
            })
        })
        .await
    }

    async fn fetch_releases(&self) -> RepositoryResult<Vec<ReleasedAnimal>> {
        self.with_conn(|conn| {
            let rows: Vec<(ReleaseRow, AnimalRow)> = releases::table
                .inner_join(animals::table)
                .order((releases::released_at.desc(), releases::release_id.desc()))
                .select((ReleaseRow::as_select(), AnimalRow::as_select()))
                .load(conn)
                .map_err(map_diesel_error)?;

            let mut released = Vec::with_capacity(rows.len());
            for (release, animal) in rows {
                let follow_up_count: i64 = release_follow_ups::table
                    .filter(release_follow_ups::release_id.eq(release.release_id))
                    .count()
                    .get_result(conn)
                    .map_err(map_diesel_error)?;
                let last_follow_up: Option<DateTime<Utc>> = release_follow_ups::table
                    .filter(release_follow_ups::release_id.eq(release.release_id))
                    .select(diesel::dsl::max(release_follow_ups::recorded_at))
                    .first(conn)
                    .map_err(map_diesel_error)?;

                released.push(ReleasedAnimal {
                    release_id: ReleaseId(release.release_id),
                    animal_id: AnimalId(animal.animal_id),
                    animal_name: animal.name,
                    species_name: species_label(conn, animal.species_id)?,
                    released_at: release.released_at,
                    location: release.location,
                    notes: release.notes,
                    rescuer_name: full_name(conn, release.rescuer_id)?.unwrap_or_default(),
                    follow_up_count: follow_up_count as usize,
                    last_follow_up,
                });
            }
            Ok(released)
        })
        .await
    }

    async fn store_follow_up(&self, follow_up: &NewFollowUp) -> RepositoryResult<ReleaseFollowUp> {
        let follow_up = follow_up.clone();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let release: Option<i64> = releases::table
                    .find(follow_up.release_id.value())
                    .select(releases::release_id)
                    .first(tx)
                    .optional()
                    .map_err(map_diesel_error)?;
                if release.is_none() {
                    return Err(RepositoryError::not_found(format!(
                        "Release {} not found",
                        follow_up.release_id
                    )));
                }
                if !employee_exists(tx, follow_up.rescuer_id.value())? {
                    return Err(RepositoryError::validation_with_context(
                        "Unknown rescuer",
                        ErrorContext::new("store_follow_up")
                            .with_entity("employee")
                            .with_entity_id(follow_up.rescuer_id),
                    ));
                }

                let inserted: FollowUpRow = diesel::insert_into(release_follow_ups::table)
                    .values(&NewFollowUpRow {
                        release_id: follow_up.release_id.value(),
                        tracking_method: follow_up.tracking_method.clone(),
                        observed_state: follow_up.observed_state.clone(),
                        sighting_location: follow_up.sighting_location.clone(),
                        notes: follow_up.notes.clone(),
                        rescuer_id: follow_up.rescuer_id.value(),
                    })
                    .returning(FollowUpRow::as_returning())
                    .get_result(tx)
                    .map_err(map_diesel_error)?;

                Ok(follow_up_from_row(inserted))
            })
        })
        .await
    }

    async fn fetch_follow_ups(
        &self,
        release_id: ReleaseId,
    ) -> RepositoryResult<Vec<FollowUpEntry>> {
        self.with_conn(move |conn| {
            let release: Option<i64> = releases::table
                .find(release_id.value())
                .select(releases::release_id)
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            if release.is_none() {
                return Err(RepositoryError::not_found(format!(
                    "Release {} not found",
                    release_id
                )));
            }

            let rows: Vec<FollowUpRow> = release_follow_ups::table
                .filter(release_follow_ups::release_id.eq(release_id.value()))
                .order((
                    release_follow_ups::recorded_at.desc(),
                    release_follow_ups::follow_up_id.desc(),
                ))
                .select(FollowUpRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;

            let mut entries = Vec::with_capacity(rows.len());
            for row in rows {
                let rescuer_name = full_name(conn, row.rescuer_id)?.unwrap_or_default();
                entries.push(FollowUpEntry {
                    follow_up: follow_up_from_row(row),
                    rescuer_name,
                });
            }
            Ok(entries)
        })
        .await
    }
}
