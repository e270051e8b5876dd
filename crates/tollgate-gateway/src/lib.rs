//! HTTP edge gateway.
//!
//! Sits in front of a fixed set of backend services: aggregates their
//! health, forwards requests by path prefix, and issues and validates
//! bearer tokens for the authentication endpoints it serves itself.

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod health;
pub mod middleware;
pub mod proxy;
pub mod registry;
pub mod server;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use health::{AggregatedStatus, HealthAggregator, HealthProbeResult, ProbeOutcome};
pub use proxy::RequestProxy;
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use server::{router, run, GatewayState};
