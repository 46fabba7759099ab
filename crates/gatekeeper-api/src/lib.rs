//! Gatekeeper HTTP Surface
//!
//! This crate provides the axum handlers that accept client traffic,
//! run it through the routing decision engine and stream the chosen
//! upstream's answer back, plus the merge entry point that always
//! contacts both registries.

pub mod error;
pub mod forward;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use forward::{CredentialService, ForwardRequest, Forwarder, PassthroughCredentials};
pub use routes::{create_merge_router, create_router};
pub use state::AppState;
