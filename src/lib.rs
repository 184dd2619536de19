//! # Refugio Rust Backend
//!
//! Management backend for a wildlife rescue center.
//!
//! This crate tracks wild animals from field rescue through veterinary
//! treatment and aftercare to their release back into the wild, with
//! post-release follow-up. Staff members act under explicit roles
//! (rescuer, veterinarian, caregiver) and every lifecycle transition is
//! role-gated and state-guarded. The backend exposes a REST API via Axum.
//!
//! ## Architecture
//!
//! The crate is organized into several logical modules:
//!
//! - [`api`]: Domain types shared across layers
//! - [`db`]: Database operations, repository pattern, and persistence layer
//! - [`workflow`]: Role checks, input validation, and lifecycle orchestration
//! - [`http`]: Axum-based HTTP server and request handlers

// Allow large error types - RepositoryError contains rich context for debugging
#![allow(clippy::result_large_err)]

pub mod api;

pub mod db;

pub mod workflow;

#[cfg(feature = "http-server")]
pub mod http;
