//! PostgreSQL Backend - sqlx-backed driver
//!
//! Renders queries and mutations to SQL text and executes them on a
//! connection pool. Rows come back as raw attribute maps.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row as SqlxRow, TypeInfo};
use tracing::debug;

use super::{Database, Row};
use crate::error::{ModelError, ModelResult};
use crate::query::{Mutation, QueryBuilder};

/// Connection configuration for the Postgres driver
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,
    /// Maximum pool size
    pub max_connections: u32,
    /// Minimum pool size
    pub min_connections: u32,
    /// Seconds to wait when acquiring a connection
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/postgres".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    /// Build a configuration from the `DATABASE_URL` environment variable
    pub fn from_env() -> ModelResult<Self> {
        let url = std::env::var("DATABASE_URL").map_err(|_| {
            ModelError::Configuration("DATABASE_URL environment variable is not set".to_string())
        })?;
        Ok(Self {
            url,
            ..Self::default()
        })
    }

    /// Override the connection URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Override the maximum pool size
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}

/// Postgres-backed database over a sqlx connection pool
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    /// Connect a new pool using the given configuration
    pub async fn connect(config: &DatabaseConfig) -> ModelResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(|e| {
                ModelError::Connection(format!("Failed to connect to database: {}", e))
            })?;

        debug!(
            max_connections = config.max_connections,
            "Database pool created"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn select(&self, query: &QueryBuilder) -> ModelResult<Vec<Row>> {
        let sql = query.to_sql();
        debug!(sql = %sql, "Executing select");

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_map).collect()
    }

    async fn execute(&self, mutation: &Mutation) -> ModelResult<u64> {
        let sql = mutation.to_sql();
        debug!(sql = %sql, "Executing mutation");

        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

/// Convert a Postgres row into a raw attribute map
fn row_to_map(row: &PgRow) -> ModelResult<Row> {
    let mut map = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let value = match column.type_info().name() {
            "INT2" => row
                .try_get::<Option<i16>, _>(index)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "INT8" => row
                .try_get::<Option<i64>, _>(index)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(index)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(index)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "BOOL" => row
                .try_get::<Option<bool>, _>(index)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
                .map(|v| Value::String(v.to_rfc3339()))
                .unwrap_or(Value::Null),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
                .map(|v| Value::String(v.and_utc().to_rfc3339()))
                .unwrap_or(Value::Null),
            "JSON" | "JSONB" => row
                .try_get::<Option<Value>, _>(index)?
                .unwrap_or(Value::Null),
            _ => row
                .try_get::<Option<String>, _>(index)?
                .map(Value::String)
                .unwrap_or(Value::Null),
        };
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout_seconds, 30);
    }

    #[test]
    fn test_config_builder() {
        let config = DatabaseConfig::default()
            .with_url("postgresql://db.internal:5432/app")
            .with_max_connections(32);
        assert_eq!(config.url, "postgresql://db.internal:5432/app");
        assert_eq!(config.max_connections, 32);
    }
}
