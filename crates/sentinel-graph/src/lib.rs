//! Sentinel Graph — tenant-scoped adapter over the knowledge graph.
//!
//! This crate is the single mutation point for the property graph. All
//! reads and writes flow through the [`GraphStore`] trait to enforce
//! tenant isolation, natural-key identity, temporal upsert semantics,
//! and schema compliance. Two implementations ship: [`Neo4jGraph`] for
//! production and [`MemoryGraph`] for tests and local development.

pub mod client;
pub mod memory;
pub mod neo4j;
pub mod store;

pub use client::{GraphClient, GraphConfig, GraphError};
pub use memory::MemoryGraph;
pub use neo4j::Neo4jGraph;
pub use store::{
    BatchOutcome, Direction, EdgeRecord, GraphStore, Neighbor, NodeFilter, NodeRecord, Page,
    TenantStats, UpsertOutcome,
};
