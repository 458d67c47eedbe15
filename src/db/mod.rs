//! Database access primitives.
//!
//! Everything the engine asks of the relational store goes through this
//! module: batched edge fetches for a frontier, node hydration by id set,
//! and predicate tests. One parameterized statement per request, never one
//! query per node.

pub mod access;
pub(crate) mod deadline;

pub use access::{EdgeFilters, WireEdge};
