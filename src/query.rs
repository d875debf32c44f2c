//! Query Builder - Fluent query construction for relationship resolution
//!
//! Provides a fluent interface for building the SELECT queries relations
//! constrain, plus a small mutation set for the write path (`touch`,
//! `raw_update`, pivot attach/detach). Backends either render the SQL text
//! or interpret the structures directly.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// Query operator types
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperator {
    Equal,
    In,
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOperator::Equal => write!(f, "="),
            QueryOperator::In => write!(f, "IN"),
        }
    }
}

/// Where clause condition
#[derive(Debug, Clone, PartialEq)]
pub struct WhereCondition {
    pub column: String,
    pub operator: QueryOperator,
    pub value: Option<Value>,
    pub values: Vec<Value>, // For IN
}

impl WhereCondition {
    /// Equality condition
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            operator: QueryOperator::Equal,
            value: Some(value),
            values: Vec::new(),
        }
    }

    /// Membership condition
    pub fn within(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            operator: QueryOperator::In,
            value: None,
            values,
        }
    }
}

/// Selected column with an optional output alias
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub column: String,
    pub alias: Option<String>,
}

/// Join clause (inner join on column equality)
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub table: String,
    pub on_conditions: Vec<(String, String)>, // (left_column, right_column)
}

/// Order by direction
#[derive(Debug, Clone, PartialEq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// Order by clause
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByClause {
    pub column: String,
    pub direction: OrderDirection,
}

/// Query builder for constructing relation queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryBuilder {
    select_columns: Vec<SelectColumn>,
    from_table: Option<String>,
    where_conditions: Vec<WhereCondition>,
    joins: Vec<JoinClause>,
    order_by: Vec<OrderByClause>,
    limit_value: Option<i64>,
}

impl QueryBuilder {
    /// Create a new query builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add SELECT columns (comma separated, no aliases)
    pub fn select(mut self, fields: &str) -> Self {
        if fields == "*" {
            self.select_columns.push(SelectColumn {
                column: "*".to_string(),
                alias: None,
            });
        } else {
            self.select_columns.extend(fields.split(',').map(|f| SelectColumn {
                column: f.trim().to_string(),
                alias: None,
            }));
        }
        self
    }

    /// Add a SELECT column under an output alias
    pub fn select_as(mut self, column: &str, alias: &str) -> Self {
        self.select_columns.push(SelectColumn {
            column: column.to_string(),
            alias: Some(alias.to_string()),
        });
        self
    }

    /// Set the FROM table
    pub fn from(mut self, table: &str) -> Self {
        self.from_table = Some(table.to_string());
        self
    }

    /// Add WHERE condition with equality
    pub fn where_eq<T: Into<Value>>(mut self, column: &str, value: T) -> Self {
        self.where_conditions
            .push(WhereCondition::eq(column, value.into()));
        self
    }

    /// Add WHERE condition with IN
    pub fn where_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.where_conditions
            .push(WhereCondition::within(column, values));
        self
    }

    /// Add an INNER JOIN on a single column equality
    pub fn join(mut self, table: &str, left_column: &str, right_column: &str) -> Self {
        self.joins.push(JoinClause {
            table: table.to_string(),
            on_conditions: vec![(left_column.to_string(), right_column.to_string())],
        });
        self
    }

    /// Add ORDER BY ascending
    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push(OrderByClause {
            column: column.to_string(),
            direction: OrderDirection::Asc,
        });
        self
    }

    /// Add ORDER BY descending
    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by.push(OrderByClause {
            column: column.to_string(),
            direction: OrderDirection::Desc,
        });
        self
    }

    /// Add LIMIT clause
    pub fn limit(mut self, count: i64) -> Self {
        self.limit_value = Some(count);
        self
    }

    /// The FROM table, if set
    pub fn table(&self) -> Option<&str> {
        self.from_table.as_deref()
    }

    /// Selected columns
    pub fn selects(&self) -> &[SelectColumn] {
        &self.select_columns
    }

    /// WHERE conditions
    pub fn wheres(&self) -> &[WhereCondition] {
        &self.where_conditions
    }

    /// JOIN clauses
    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    /// ORDER BY clauses
    pub fn orders(&self) -> &[OrderByClause] {
        &self.order_by
    }

    /// LIMIT value, if set
    pub fn limit_count(&self) -> Option<i64> {
        self.limit_value
    }

    /// Convert the query to SQL string
    pub fn to_sql(&self) -> String {
        let mut sql = String::new();

        // SELECT clause
        sql.push_str("SELECT ");
        if self.select_columns.is_empty() {
            sql.push('*');
        } else {
            let fields: Vec<String> = self
                .select_columns
                .iter()
                .map(|col| match &col.alias {
                    Some(alias) => format!("{} AS {}", col.column, alias),
                    None => col.column.clone(),
                })
                .collect();
            sql.push_str(&fields.join(", "));
        }

        // FROM clause
        if let Some(table) = &self.from_table {
            sql.push_str(&format!(" FROM {}", table));
        }

        // JOIN clauses
        for join in &self.joins {
            sql.push_str(&format!(" INNER JOIN {}", join.table));
            if !join.on_conditions.is_empty() {
                sql.push_str(" ON ");
                let conditions: Vec<String> = join
                    .on_conditions
                    .iter()
                    .map(|(left, right)| format!("{} = {}", left, right))
                    .collect();
                sql.push_str(&conditions.join(" AND "));
            }
        }

        // WHERE clause
        if !self.where_conditions.is_empty() {
            sql.push_str(" WHERE ");
            let conditions = render_where_conditions(&self.where_conditions);
            sql.push_str(&conditions.join(" AND "));
        }

        // ORDER BY clause
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            let order_clauses: Vec<String> = self
                .order_by
                .iter()
                .map(|clause| format!("{} {}", clause.column, clause.direction))
                .collect();
            sql.push_str(&order_clauses.join(", "));
        }

        // LIMIT clause
        if let Some(limit) = self.limit_value {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }
}

/// Write operations issued by relations
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// UPDATE of matching rows
    Update {
        table: String,
        values: BTreeMap<String, Value>,
        wheres: Vec<WhereCondition>,
    },
    /// INSERT of uniform rows
    Insert {
        table: String,
        rows: Vec<BTreeMap<String, Value>>,
    },
    /// DELETE of matching rows
    Delete {
        table: String,
        wheres: Vec<WhereCondition>,
    },
}

impl Mutation {
    /// Convert the mutation to SQL string
    pub fn to_sql(&self) -> String {
        match self {
            Mutation::Update {
                table,
                values,
                wheres,
            } => {
                let assignments: Vec<String> = values
                    .iter()
                    .map(|(column, value)| format!("{} = {}", column, format_value(value)))
                    .collect();
                let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
                if !wheres.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&render_where_conditions(wheres).join(" AND "));
                }
                sql
            }
            Mutation::Insert { table, rows } => {
                let columns: Vec<String> = rows
                    .first()
                    .map(|row| row.keys().cloned().collect())
                    .unwrap_or_default();
                let tuples: Vec<String> = rows
                    .iter()
                    .map(|row| {
                        let rendered: Vec<String> = columns
                            .iter()
                            .map(|column| format_value(row.get(column).unwrap_or(&Value::Null)))
                            .collect();
                        format!("({})", rendered.join(", "))
                    })
                    .collect();
                format!(
                    "INSERT INTO {} ({}) VALUES {}",
                    table,
                    columns.join(", "),
                    tuples.join(", ")
                )
            }
            Mutation::Delete { table, wheres } => {
                let mut sql = format!("DELETE FROM {}", table);
                if !wheres.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&render_where_conditions(wheres).join(" AND "));
                }
                sql
            }
        }
    }
}

/// Build WHERE condition strings
fn render_where_conditions(conditions: &[WhereCondition]) -> Vec<String> {
    conditions
        .iter()
        .map(|condition| match &condition.operator {
            QueryOperator::In => {
                if condition.values.is_empty() {
                    // IN over nothing matches nothing
                    "0 = 1".to_string()
                } else {
                    let values: Vec<String> =
                        condition.values.iter().map(format_value).collect();
                    format!(
                        "{} {} ({})",
                        condition.column,
                        condition.operator,
                        values.join(", ")
                    )
                }
            }
            QueryOperator::Equal => {
                let value = condition.value.as_ref().unwrap_or(&Value::Null);
                format!(
                    "{} {} {}",
                    condition.column,
                    condition.operator,
                    format_value(value)
                )
            }
        })
        .collect()
}

/// Format a value for SQL
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")), // Escape single quotes
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "NULL".to_string(),
        _ => "NULL".to_string(), // Arrays and objects not supported
    }
}
