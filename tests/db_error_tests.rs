//! Tests for db::repository::error module.

use refugio_rust::db::{ErrorContext, RepositoryError};

#[test]
fn test_error_context_new() {
    let ctx = ErrorContext::new("store_rescue");
    assert_eq!(ctx.operation, Some("store_rescue".to_string()));
    assert!(ctx.entity.is_none());
    assert!(ctx.entity_id.is_none());
    assert!(ctx.details.is_none());
    assert!(!ctx.retryable);
}

#[test]
fn test_error_context_chaining() {
    let ctx = ErrorContext::new("begin_treatment")
        .with_entity("treatment")
        .with_entity_id(42)
        .with_details("state=COMPLETED")
        .retryable();

    assert_eq!(ctx.operation, Some("begin_treatment".to_string()));
    assert_eq!(ctx.entity, Some("treatment".to_string()));
    assert_eq!(ctx.entity_id, Some("42".to_string()));
    assert_eq!(ctx.details, Some("state=COMPLETED".to_string()));
    assert!(ctx.retryable);
}

#[test]
fn test_error_context_display() {
    let ctx = ErrorContext::new("store_release")
        .with_entity("animal")
        .with_entity_id("7");

    let display = format!("{}", ctx);
    assert!(display.contains("operation=store_release"));
    assert!(display.contains("entity=animal"));
    assert!(display.contains("id=7"));
}

#[test]
fn test_not_found_display() {
    let err = RepositoryError::not_found("Rescue 3 not found");
    assert!(err.to_string().contains("Rescue 3 not found"));
}

#[test]
fn test_conflict_is_never_retryable() {
    let err = RepositoryError::conflict_with_context(
        "Treatment 5 already left PENDING",
        ErrorContext::new("begin_treatment").with_entity_id(5),
    );
    assert!(!err.is_retryable());
    assert!(matches!(err, RepositoryError::ConflictError { .. }));
}

#[test]
fn test_connection_errors_are_retryable() {
    assert!(RepositoryError::connection("pool exhausted").is_retryable());
    assert!(RepositoryError::timeout("query timed out").is_retryable());
}

#[test]
fn test_validation_is_not_retryable() {
    assert!(!RepositoryError::validation("Unknown species").is_retryable());
    assert!(!RepositoryError::not_found("Animal 1 not found").is_retryable());
    assert!(!RepositoryError::internal("oops").is_retryable());
}

#[test]
fn test_query_error_retryable_only_with_context() {
    let plain = RepositoryError::query("syntax error");
    assert!(!plain.is_retryable());

    let transient = RepositoryError::query_with_context(
        "serialization failure",
        ErrorContext::default().retryable(),
    );
    assert!(transient.is_retryable());
}

#[test]
fn test_with_operation_updates_context() {
    let err = RepositoryError::validation("Unknown medication").with_operation("update_treatment");
    assert_eq!(
        err.context().operation,
        Some("update_treatment".to_string())
    );
}

#[test]
fn test_from_string() {
    let err: RepositoryError = "something broke".into();
    assert!(matches!(err, RepositoryError::InternalError { .. }));

    let err: RepositoryError = String::from("something else broke").into();
    assert!(err.to_string().contains("something else broke"));
}
