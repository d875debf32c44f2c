//! Database Backends
//!
//! Defines the backend seam the relation layer resolves against: an
//! object-safe async `Database` trait over the query structures, a
//! PostgreSQL driver, and an in-memory driver for tests and prototyping.

mod memory;
mod postgres;

pub use memory::{row, MemoryDatabase};
pub use postgres::{DatabaseConfig, PostgresDatabase};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ModelResult;
use crate::query::{Mutation, QueryBuilder};

/// A fetched row as a raw attribute map
pub type Row = BTreeMap<String, Value>;

/// Abstract database the relation layer resolves against
#[async_trait]
pub trait Database: Send + Sync {
    /// Run a SELECT and return the matching rows
    async fn select(&self, query: &QueryBuilder) -> ModelResult<Vec<Row>>;

    /// Run a mutation and return the affected row count
    async fn execute(&self, mutation: &Mutation) -> ModelResult<u64>;
}
