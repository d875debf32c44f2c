//! In-Memory Backend - query interpreter over seeded tables
//!
//! Interprets the query structures directly, so relationship behavior can
//! be exercised without a running database server. Rows are plain attribute
//! maps; joined rows are evaluated through an environment that carries both
//! `column` and `table.column` keys.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Database, Row};
use crate::error::{ModelError, ModelResult};
use crate::query::{
    Mutation, OrderDirection, QueryBuilder, QueryOperator, SelectColumn, WhereCondition,
};

/// In-memory database for tests and prototyping
#[derive(Default)]
pub struct MemoryDatabase {
    tables: RwLock<BTreeMap<String, Vec<Row>>>,
}

impl MemoryDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to a table, creating the table on first use
    pub async fn insert_rows(&self, table: &str, rows: Vec<Row>) {
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().extend(rows);
    }

    /// Snapshot of a table's current rows
    pub async fn table_rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

/// Build a row from column/value pairs
pub fn row(entries: &[(&str, Value)]) -> Row {
    entries
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn select(&self, query: &QueryBuilder) -> ModelResult<Vec<Row>> {
        let table = query
            .table()
            .ok_or_else(|| ModelError::Query("select query has no table".to_string()))?;

        let tables = self.tables.read().await;
        let base_rows = tables.get(table).cloned().unwrap_or_default();
        let mut envs: Vec<Row> = base_rows.iter().map(|r| scope_row(table, r)).collect();

        for join in query.joins() {
            let join_rows = tables.get(join.table.as_str()).cloned().unwrap_or_default();
            let mut joined = Vec::new();
            for env in &envs {
                for join_row in &join_rows {
                    let candidate = merge_scoped(env, &scope_row(&join.table, join_row));
                    let on_match = join.on_conditions.iter().all(|(left, right)| {
                        let left_value = lookup(&candidate, left);
                        let right_value = lookup(&candidate, right);
                        !left_value.is_null() && values_equal(left_value, right_value)
                    });
                    if on_match {
                        joined.push(candidate);
                    }
                }
            }
            envs = joined;
        }

        envs.retain(|env| query.wheres().iter().all(|c| matches_condition(env, c)));

        // Stable sort applied minor-key first, so earlier clauses win
        for order in query.orders().iter().rev() {
            envs.sort_by(|a, b| {
                let ordering = compare_values(lookup(a, &order.column), lookup(b, &order.column));
                match order.direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit_count() {
            envs.truncate(limit.max(0) as usize);
        }

        let rows: Vec<Row> = envs.iter().map(|env| project(query.selects(), env)).collect();
        debug!(sql = %query.to_sql(), matched = rows.len(), "Memory select");
        Ok(rows)
    }

    async fn execute(&self, mutation: &Mutation) -> ModelResult<u64> {
        let mut tables = self.tables.write().await;
        let affected = match mutation {
            Mutation::Update {
                table,
                values,
                wheres,
            } => {
                let rows = tables.entry(table.clone()).or_default();
                let mut affected = 0u64;
                for source in rows.iter_mut() {
                    let env = scope_row(table, source);
                    if wheres.iter().all(|c| matches_condition(&env, c)) {
                        for (column, value) in values {
                            source.insert(column.clone(), value.clone());
                        }
                        affected += 1;
                    }
                }
                affected
            }
            Mutation::Insert { table, rows } => {
                let target = tables.entry(table.clone()).or_default();
                target.extend(rows.iter().cloned());
                rows.len() as u64
            }
            Mutation::Delete { table, wheres } => {
                let rows = tables.entry(table.clone()).or_default();
                let before = rows.len();
                rows.retain(|source| {
                    let env = scope_row(table, source);
                    !wheres.iter().all(|c| matches_condition(&env, c))
                });
                (before - rows.len()) as u64
            }
        };
        debug!(sql = %mutation.to_sql(), affected, "Memory mutation");
        Ok(affected)
    }
}

/// Expand a source row into an environment with `column` and
/// `table.column` keys
fn scope_row(table: &str, source: &Row) -> Row {
    let mut scoped = Row::new();
    for (column, value) in source {
        scoped.insert(format!("{}.{}", table, column), value.clone());
        scoped.insert(column.clone(), value.clone());
    }
    scoped
}

/// Merge a joined environment into a base one; the base wins on
/// unqualified column collisions
fn merge_scoped(base: &Row, addition: &Row) -> Row {
    let mut merged = base.clone();
    for (key, value) in addition {
        merged.entry(key.clone()).or_insert_with(|| value.clone());
    }
    merged
}

fn lookup<'a>(env: &'a Row, column: &str) -> &'a Value {
    env.get(column).unwrap_or(&Value::Null)
}

fn matches_condition(env: &Row, condition: &WhereCondition) -> bool {
    let actual = lookup(env, &condition.column);
    match condition.operator {
        QueryOperator::Equal => {
            // SQL NULL never compares equal, not even to NULL
            let expected = condition.value.as_ref().unwrap_or(&Value::Null);
            !actual.is_null() && !expected.is_null() && values_equal(actual, expected)
        }
        QueryOperator::In => {
            !actual.is_null() && condition.values.iter().any(|v| values_equal(actual, v))
        }
    }
}

/// Value equality with numeric widening across integer and float forms
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Apply the projection to an environment row
fn project(selects: &[SelectColumn], env: &Row) -> Row {
    let star_only =
        selects.is_empty() || (selects.len() == 1 && selects[0].column == "*");
    if star_only {
        return unqualified(env);
    }

    let mut out = Row::new();
    for select in selects {
        if select.column == "*" {
            for (key, value) in unqualified(env) {
                out.entry(key).or_insert(value);
            }
        } else if let Some(table) = select.column.strip_suffix(".*") {
            let prefix = format!("{}.", table);
            for (key, value) in env {
                if let Some(column) = key.strip_prefix(&prefix) {
                    out.insert(column.to_string(), value.clone());
                }
            }
        } else {
            let value = lookup(env, &select.column).clone();
            let name = match &select.alias {
                Some(alias) => alias.clone(),
                None => select
                    .column
                    .rsplit('.')
                    .next()
                    .unwrap_or(&select.column)
                    .to_string(),
            };
            out.insert(name, value);
        }
    }
    out
}

/// Environment entries without a table qualifier
fn unqualified(env: &Row) -> Row {
    env.iter()
        .filter(|(key, _)| !key.contains('.'))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
