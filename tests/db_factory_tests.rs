//! Tests for repository selection and the factory.

mod support;

use refugio_rust::db::{RepositoryFactory, RepositoryType};
use support::with_scoped_env;

#[test]
fn repository_type_defaults_to_local_without_database_url() {
    let ty = with_scoped_env(
        &[
            ("REPOSITORY_TYPE", None),
            ("DATABASE_URL", None),
            ("PG_DATABASE_URL", None),
        ],
        RepositoryType::from_env,
    );
    assert_eq!(ty, RepositoryType::Local);
}

#[test]
fn repository_type_prefers_explicit_setting() {
    let ty = with_scoped_env(
        &[
            ("REPOSITORY_TYPE", Some("local")),
            ("DATABASE_URL", Some("postgres://ignored")),
        ],
        RepositoryType::from_env,
    );
    assert_eq!(ty, RepositoryType::Local);
}

#[test]
fn repository_type_follows_database_url() {
    let ty = with_scoped_env(
        &[
            ("REPOSITORY_TYPE", None),
            ("DATABASE_URL", Some("postgres://localhost/refugio")),
        ],
        RepositoryType::from_env,
    );
    assert_eq!(ty, RepositoryType::Postgres);
}

#[test]
fn repository_type_invalid_value_falls_back_to_local() {
    let ty = with_scoped_env(
        &[("REPOSITORY_TYPE", Some("oracle"))],
        RepositoryType::from_env,
    );
    assert_eq!(ty, RepositoryType::Local);
}

#[tokio::test]
async fn factory_creates_working_local_repository() {
    let repo = RepositoryFactory::create_local();
    assert!(repo.health_check().await.unwrap());
    assert!(repo.fetch_employees().await.unwrap().is_empty());
}

#[tokio::test]
async fn factory_create_local_by_type() {
    let repo = RepositoryFactory::create(RepositoryType::Local, None)
        .await
        .unwrap();
    assert!(repo.health_check().await.unwrap());
}
