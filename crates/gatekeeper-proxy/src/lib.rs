//! Gatekeeper Upstream Proxy
//!
//! This crate provides the client for talking to upstream package
//! registries: existence probes, request forwarding, and the dual-upstream
//! merge fan-out.

pub mod client;
pub mod error;
pub mod merge;
pub mod target;

pub use client::{ClientOptions, ProbeOutcome, RegistryClient};
pub use error::ProxyError;
pub use merge::{MergedResponse, Merger};
pub use target::RegistryTarget;
