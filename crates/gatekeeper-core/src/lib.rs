//! Gatekeeper Core Routing Logic
//!
//! This crate provides the policy-driven routing decision engine that sits
//! between clients and the private/public package registries, plus the
//! public-mirror rotator, the policy store and the proxy event bus.

pub mod engine;
pub mod error;
pub mod events;
pub mod package;
pub mod policy;
pub mod probe;
pub mod rotation;

pub use engine::{Resolution, RoutingEngine, WriteAuthorizer};
pub use error::RouteError;
pub use events::{EventBus, ProxyEvent};
pub use package::package_name;
pub use policy::{CredentialMode, PolicyLimits, PolicySpec, PolicyStore};
pub use probe::ExistenceProbe;
pub use rotation::{spawn_rotation_task, Rotation, Rotator};
