//! BelongsToMany - many-to-many relationship through a pivot table
//!
//! Related rows are reached by joining the pivot table; the pivot foreign
//! key travels with each row under a `pivot_` prefixed alias so results
//! can be keyed back to their parents, and is removed from the rows handed
//! out. `attach` and `detach` manage pivot rows and are exposed through
//! the extension-operation surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::backend::Database;
use crate::error::{ModelError, ModelResult};
use crate::model::{ModelDef, Record};
use crate::query::{Mutation, QueryBuilder, WhereCondition};

use super::{
    assign_many, dictionary, fetch_records, parent_keys, value_key, Relation, RelationValue,
    RelationshipType,
};

/// Prefix under which pivot columns travel with related rows
pub(crate) const PIVOT_PREFIX: &str = "pivot_";

/// Flatten extension-operation arguments into a list of key values;
/// array arguments contribute their elements
pub(crate) fn id_arguments(args: &[Value]) -> Vec<Value> {
    let mut ids = Vec::new();
    for arg in args {
        match arg {
            Value::Array(items) => ids.extend(items.iter().cloned()),
            other => ids.push(other.clone()),
        }
    }
    ids
}

/// Many-to-many relationship through a pivot table
#[derive(Debug, Clone)]
pub struct BelongsToMany {
    parent: Record,
    related: Arc<ModelDef>,
    pivot_table: String,
    foreign_pivot_key: String,
    related_pivot_key: String,
    parent_key: String,
    related_key: String,
    query: QueryBuilder,
}

impl BelongsToMany {
    /// Create a new BelongsToMany relationship, constrained to its parent
    pub fn new(
        parent: &Record,
        related: Arc<ModelDef>,
        pivot_table: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
        parent_key: impl Into<String>,
        related_key: impl Into<String>,
    ) -> Self {
        let mut relation = Self {
            parent: parent.clone(),
            query: QueryBuilder::new().from(&related.table),
            related,
            pivot_table: pivot_table.into(),
            foreign_pivot_key: foreign_pivot_key.into(),
            related_pivot_key: related_pivot_key.into(),
            parent_key: parent_key.into(),
            related_key: related_key.into(),
        };
        relation.add_constraints();
        relation
    }

    /// The pivot table name
    pub fn pivot_table(&self) -> &str {
        &self.pivot_table
    }

    /// Alias under which the pivot foreign key travels with each row
    pub fn pivot_alias(&self) -> String {
        format!("{}{}", PIVOT_PREFIX, self.foreign_pivot_key)
    }

    fn base_query(&self) -> QueryBuilder {
        QueryBuilder::new()
            .from(&self.related.table)
            .select(&format!("{}.*", self.related.table))
            .select_as(
                &format!("{}.{}", self.pivot_table, self.foreign_pivot_key),
                &self.pivot_alias(),
            )
            .join(
                &self.pivot_table,
                &format!("{}.{}", self.pivot_table, self.related_pivot_key),
                &self.related.qualify(&self.related_key),
            )
    }

    fn parent_key_value(&self, operation: &str) -> ModelResult<Value> {
        let value = self.parent.get_value(&self.parent_key);
        if value.is_null() {
            return Err(ModelError::MissingKey(format!(
                "{} requires '{}' on the parent {} record",
                operation,
                self.parent_key,
                self.parent.model_name()
            )));
        }
        Ok(value)
    }

    async fn attach(&self, db: &dyn Database, args: &[Value]) -> ModelResult<RelationValue> {
        let parent_key = self.parent_key_value("attach")?;
        let ids = id_arguments(args);
        if ids.is_empty() {
            return Err(ModelError::Validation(
                "attach requires at least one related key".to_string(),
            ));
        }
        let rows: Vec<BTreeMap<String, Value>> = ids
            .into_iter()
            .map(|id| {
                let mut row = BTreeMap::new();
                row.insert(self.foreign_pivot_key.clone(), parent_key.clone());
                row.insert(self.related_pivot_key.clone(), id);
                row
            })
            .collect();
        let mutation = Mutation::Insert {
            table: self.pivot_table.clone(),
            rows,
        };
        let attached = db.execute(&mutation).await?;
        debug!(pivot = %self.pivot_table, attached, "Attached pivot rows");
        Ok(RelationValue::Empty)
    }

    async fn detach(&self, db: &dyn Database, args: &[Value]) -> ModelResult<RelationValue> {
        let parent_key = self.parent_key_value("detach")?;
        let mut wheres = vec![WhereCondition::eq(&self.foreign_pivot_key, parent_key)];
        let ids = id_arguments(args);
        if !ids.is_empty() {
            wheres.push(WhereCondition::within(&self.related_pivot_key, ids));
        }
        let mutation = Mutation::Delete {
            table: self.pivot_table.clone(),
            wheres,
        };
        let detached = db.execute(&mutation).await?;
        debug!(pivot = %self.pivot_table, detached, "Detached pivot rows");
        Ok(RelationValue::Empty)
    }
}

#[async_trait]
impl Relation for BelongsToMany {
    fn kind(&self) -> RelationshipType {
        RelationshipType::BelongsToMany
    }

    fn related(&self) -> &Arc<ModelDef> {
        &self.related
    }

    fn query(&self) -> &QueryBuilder {
        &self.query
    }

    fn add_constraints(&mut self) {
        self.query = self.base_query().where_eq(
            &format!("{}.{}", self.pivot_table, self.foreign_pivot_key),
            self.parent.get_value(&self.parent_key),
        );
    }

    fn add_eager_constraints(&mut self, parents: &[Record]) -> ModelResult<()> {
        self.query = self.base_query().where_in(
            &format!("{}.{}", self.pivot_table, self.foreign_pivot_key),
            parent_keys(parents, &self.parent_key),
        );
        Ok(())
    }

    fn match_eager(
        &self,
        parents: &mut [Record],
        results: &[Record],
        name: &str,
    ) -> ModelResult<()> {
        let alias = self.pivot_alias();
        let dictionary = dictionary(results, &alias, &self.related);
        for parent in parents.iter_mut() {
            let key = parent.get_value(&self.parent_key);
            if key.is_null() {
                continue;
            }
            if let Some(matched) = dictionary.get(&value_key(&key)) {
                let mut matched = matched.clone();
                for record in matched.iter_mut() {
                    record.remove(&alias);
                }
                assign_many(parent, name, matched);
            }
        }
        Ok(())
    }

    // The eager batch keeps the alias for matching; rows handed out here
    // are already keyed, so it comes off
    async fn get_results(&mut self, db: &dyn Database) -> ModelResult<RelationValue> {
        let mut records = fetch_records(db, &self.query, &self.related).await?;
        let alias = self.pivot_alias();
        for record in records.iter_mut() {
            record.remove(&alias);
        }
        Ok(RelationValue::Many(records))
    }

    // Updates cannot run through the pivot join, so matching related keys
    // are collected first and updated directly
    async fn raw_update(
        &mut self,
        db: &dyn Database,
        values: BTreeMap<String, Value>,
    ) -> ModelResult<RelationValue> {
        let rows = db.select(&self.query).await?;
        let keys: Vec<Value> = rows
            .iter()
            .map(|row| row.get(&self.related_key).cloned().unwrap_or(Value::Null))
            .filter(|value| !value.is_null())
            .collect();
        let mutation = Mutation::Update {
            table: self.related.table.clone(),
            values,
            wheres: vec![WhereCondition::within(&self.related_key, keys)],
        };
        let affected = db.execute(&mutation).await?;
        debug!(relation = self.kind().name(), affected, "Raw update applied");
        Ok(RelationValue::Empty)
    }

    async fn invoke(
        &mut self,
        db: &dyn Database,
        operation: &str,
        args: &[Value],
    ) -> ModelResult<RelationValue> {
        match operation {
            "attach" => self.attach(db, args).await,
            "detach" => self.detach(db, args).await,
            other => Err(ModelError::unsupported(self.kind().name(), other)),
        }
    }

    fn into_children(self: Box<Self>) -> Vec<Box<dyn Relation>> {
        vec![self]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{row, MemoryDatabase};
    use serde_json::json;

    fn post() -> Record {
        Record::new(Arc::new(ModelDef::new("Post"))).with_attribute("id", json!(1))
    }

    fn tag_def() -> Arc<ModelDef> {
        Arc::new(ModelDef::new("Tag"))
    }

    fn relation() -> BelongsToMany {
        BelongsToMany::new(
            &post(),
            tag_def(),
            "post_tag",
            "post_id",
            "tag_id",
            "id",
            "id",
        )
    }

    async fn seeded() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.insert_rows(
            "tags",
            vec![
                row(&[("id", json!(10)), ("label", json!("rust"))]),
                row(&[("id", json!(11)), ("label", json!("orm"))]),
                row(&[("id", json!(12)), ("label", json!("sql"))]),
            ],
        )
        .await;
        db.insert_rows(
            "post_tag",
            vec![
                row(&[("post_id", json!(1)), ("tag_id", json!(10))]),
                row(&[("post_id", json!(1)), ("tag_id", json!(11))]),
                row(&[("post_id", json!(2)), ("tag_id", json!(12))]),
            ],
        )
        .await;
        db
    }

    #[test]
    fn test_constraints_sql() {
        assert_eq!(
            relation().query().to_sql(),
            "SELECT tags.*, post_tag.post_id AS pivot_post_id FROM tags \
             INNER JOIN post_tag ON post_tag.tag_id = tags.id \
             WHERE post_tag.post_id = 1"
        );
    }

    #[tokio::test]
    async fn test_get_results_drops_the_pivot_alias() {
        let db = seeded().await;
        let mut relation = relation();

        let records = relation.get_results(&db).await.unwrap().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_value("label"), json!("rust"));
        assert!(records[0].get_value("pivot_post_id").is_null());
    }

    #[tokio::test]
    async fn test_eager_batch_keeps_the_alias_until_matching() {
        let db = seeded().await;
        let mut relation = relation();
        let mut parents = vec![
            post(),
            Record::new(Arc::new(ModelDef::new("Post"))).with_attribute("id", json!(2)),
        ];

        relation.add_eager_constraints(&parents).unwrap();
        relation.init_relation(&mut parents, "tags").unwrap();
        let results = relation.get_eager(&db).await.unwrap().records();
        assert!(results.iter().all(|r| !r.get_value("pivot_post_id").is_null()));

        relation.match_eager(&mut parents, &results, "tags").unwrap();
        let tags = parents[0].relation("tags").unwrap().as_many().unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().all(|r| r.get_value("pivot_post_id").is_null()));
        assert_eq!(parents[1].relation("tags").unwrap().as_many().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_attach_and_detach_manage_pivot_rows() {
        let db = seeded().await;
        let mut relation = relation();

        relation
            .invoke(&db, "attach", &[json!(12)])
            .await
            .unwrap();
        assert_eq!(relation.get_results(&db).await.unwrap().len(), 3);

        relation
            .invoke(&db, "detach", &[json!([10, 12])])
            .await
            .unwrap();
        assert_eq!(relation.get_results(&db).await.unwrap().len(), 1);

        // Detach with no arguments clears the parent's pivot rows
        relation.invoke(&db, "detach", &[]).await.unwrap();
        assert_eq!(relation.get_results(&db).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_attach_without_parent_key_is_missing_key() {
        let db = MemoryDatabase::new();
        let unsaved = Record::new(Arc::new(ModelDef::new("Post")));
        let mut relation = BelongsToMany::new(
            &unsaved,
            tag_def(),
            "post_tag",
            "post_id",
            "tag_id",
            "id",
            "id",
        );

        let err = relation.invoke(&db, "attach", &[json!(10)]).await.unwrap_err();
        assert!(matches!(err, ModelError::MissingKey(_)));
    }

    #[tokio::test]
    async fn test_raw_update_targets_related_rows() {
        let db = seeded().await;
        let mut relation = relation();

        let mut values = BTreeMap::new();
        values.insert("label".to_string(), json!("archived"));
        relation.raw_update(&db, values).await.unwrap();

        let rows = db.table_rows("tags").await;
        assert_eq!(rows[0].get("label"), Some(&json!("archived")));
        assert_eq!(rows[1].get("label"), Some(&json!("archived")));
        assert_eq!(rows[2].get("label"), Some(&json!("sql")));
    }
}
