//! Repository error taxonomy.
//!
//! Every storage backend maps its native failures into [`RepositoryError`]
//! so the workflow layer can react uniformly: `NotFound`, `ValidationError`
//! and `ConflictError` become client-facing responses, the rest surface as
//! server errors. Each variant carries an [`ErrorContext`] naming the
//! operation and entity involved.

use std::fmt;

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Structured diagnostic context attached to every repository error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Repository method that failed, e.g. "begin_treatment".
    pub operation: Option<String>,
    /// Entity kind involved, e.g. "treatment" or "release".
    pub entity: Option<String>,
    /// Id of the entity, when one exists.
    pub entity_id: Option<String>,
    /// Free-form detail, e.g. the observed state that failed a guard.
    pub details: Option<String>,
    /// Whether the caller may retry the operation as-is.
    pub retryable: bool,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Default::default()
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_entity_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref op) = self.operation {
            parts.push(format!("operation={}", op));
        }
        if let Some(ref entity) = self.entity {
            parts.push(format!("entity={}", entity));
        }
        if let Some(ref id) = self.entity_id {
            parts.push(format!("id={}", id));
        }
        if let Some(ref details) = self.details {
            parts.push(format!("details={}", details));
        }
        if self.retryable {
            parts.push("retryable=true".to_string());
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Error type shared by all repository backends.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::result_large_err)]
pub enum RepositoryError {
    /// Pool or database connectivity failure. Usually transient.
    #[error("Connection error: {message} {context}")]
    ConnectionError {
        message: String,
        context: ErrorContext,
    },

    /// Query execution failure.
    #[error("Query error: {message} {context}")]
    QueryError {
        message: String,
        context: ErrorContext,
    },

    /// The referenced entity does not exist.
    #[error("Not found: {message} {context}")]
    NotFound {
        message: String,
        context: ErrorContext,
    },

    /// The input references unknown reference data or is malformed
    /// (unknown species, empty animal name, rescuer without the role).
    #[error("Data validation error: {message} {context}")]
    ValidationError {
        message: String,
        context: ErrorContext,
    },

    /// The operation lost against the current state of the record:
    /// a state guard matched zero rows or a uniqueness rule was violated.
    /// Never retryable; the precondition itself no longer holds.
    #[error("Conflict: {message} {context}")]
    ConflictError {
        message: String,
        context: ErrorContext,
    },

    /// Bad backend configuration (missing DATABASE_URL, unknown type).
    #[error("Configuration error: {message} {context}")]
    ConfigurationError {
        message: String,
        context: ErrorContext,
    },

    /// Invariant breach inside the repository itself, e.g. an
    /// unparseable state code coming back from the database.
    #[error("Internal error: {message} {context}")]
    InternalError {
        message: String,
        context: ErrorContext,
    },

    /// Timed out waiting for a connection or a query.
    #[error("Timeout error: {message} {context}")]
    TimeoutError {
        message: String,
        context: ErrorContext,
    },
}

/// Generates the `foo(message)` / `foo_with_context(message, context)`
/// constructor pair for a variant. `retryable` marks the default context
/// retryable, for failures that are transient by nature.
macro_rules! error_ctors {
    ($short:ident, $with_ctx:ident, $variant:ident) => {
        pub fn $short(message: impl Into<String>) -> Self {
            Self::$variant {
                message: message.into(),
                context: ErrorContext::default(),
            }
        }

        pub fn $with_ctx(message: impl Into<String>, context: ErrorContext) -> Self {
            Self::$variant {
                message: message.into(),
                context,
            }
        }
    };
    ($short:ident, $with_ctx:ident, $variant:ident, retryable) => {
        pub fn $short(message: impl Into<String>) -> Self {
            Self::$variant {
                message: message.into(),
                context: ErrorContext::default().retryable(),
            }
        }

        pub fn $with_ctx(message: impl Into<String>, context: ErrorContext) -> Self {
            Self::$variant {
                message: message.into(),
                context: context.retryable(),
            }
        }
    };
}

impl RepositoryError {
    error_ctors!(connection, connection_with_context, ConnectionError, retryable);
    error_ctors!(query, query_with_context, QueryError);
    error_ctors!(not_found, not_found_with_context, NotFound);
    error_ctors!(validation, validation_with_context, ValidationError);
    error_ctors!(conflict, conflict_with_context, ConflictError);
    error_ctors!(configuration, configuration_with_context, ConfigurationError);
    error_ctors!(internal, internal_with_context, InternalError);
    error_ctors!(timeout, timeout_with_context, TimeoutError, retryable);

    /// Whether the retry loop in the Postgres backend should try again.
    /// Only infrastructure failures qualify; domain outcomes (not found,
    /// validation, conflict) are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionError { context, .. }
            | Self::TimeoutError { context, .. }
            | Self::QueryError { context, .. } => context.retryable,
            _ => false,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::ConnectionError { context, .. }
            | Self::QueryError { context, .. }
            | Self::NotFound { context, .. }
            | Self::ValidationError { context, .. }
            | Self::ConflictError { context, .. }
            | Self::ConfigurationError { context, .. }
            | Self::InternalError { context, .. }
            | Self::TimeoutError { context, .. } => context,
        }
    }

    /// Stamp (or replace) the operation name on the error's context.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        match &mut self {
            Self::ConnectionError { context, .. }
            | Self::QueryError { context, .. }
            | Self::NotFound { context, .. }
            | Self::ValidationError { context, .. }
            | Self::ConflictError { context, .. }
            | Self::ConfigurationError { context, .. }
            | Self::InternalError { context, .. }
            | Self::TimeoutError { context, .. } => {
                context.operation = Some(operation.into());
            }
        }
        self
    }
}

impl From<String> for RepositoryError {
    fn from(s: String) -> Self {
        RepositoryError::internal(s)
    }
}

impl From<&str> for RepositoryError {
    fn from(s: &str) -> Self {
        RepositoryError::internal(s.to_string())
    }
}

#[cfg(feature = "postgres-repo")]
impl From<diesel::result::Error> for RepositoryError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => RepositoryError::not_found("Record not found"),
            diesel::result::Error::DatabaseError(kind, info) => {
                let message = info.message().to_string();
                let context =
                    ErrorContext::default().with_details(format!("db_error_kind={:?}", kind));

                // Unique violations surface preconditions that no longer hold
                // (double release, second active treatment).
                if matches!(kind, diesel::result::DatabaseErrorKind::UniqueViolation) {
                    return RepositoryError::ConflictError { message, context };
                }

                // Deadlocks and serialization failures are worth a retry.
                let context = if matches!(
                    kind,
                    diesel::result::DatabaseErrorKind::SerializationFailure
                ) {
                    context.retryable()
                } else {
                    context
                };

                RepositoryError::QueryError { message, context }
            }
            diesel::result::Error::QueryBuilderError(e) => {
                RepositoryError::query(format!("Query builder error: {}", e))
            }
            diesel::result::Error::DeserializationError(e) => {
                RepositoryError::internal(format!("Deserialization error: {}", e))
            }
            diesel::result::Error::SerializationError(e) => {
                RepositoryError::internal(format!("Serialization error: {}", e))
            }
            other => RepositoryError::query(other.to_string()),
        }
    }
}

#[cfg(feature = "postgres-repo")]
impl From<diesel::r2d2::PoolError> for RepositoryError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        RepositoryError::connection_with_context(
            err.to_string(),
            ErrorContext::default()
                .with_details("pool_error")
                .retryable(),
        )
    }
}
