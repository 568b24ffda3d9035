//! sentinel-core: Shared types, configuration, and error handling for the
//! Sentinel platform.
//!
//! This crate provides the foundational types used across all Sentinel
//! components:
//! - Node types (Host, Service, User, etc.) for the knowledge graph
//! - Edge types (ConnectsTo, HasAccess, etc.) for graph relationships
//! - Event types and the in-process event bus
//! - Per-run execution context (explicit clock, cooperative cancel)
//! - Staleness policy and common error types

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod types;

pub use context::{CancelFlag, ScanContext};
pub use error::SentinelError;
