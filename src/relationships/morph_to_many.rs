//! MorphToMany - polymorphic many-to-many relationship
//!
//! A pivot table carries a morph type column next to its keys, so one
//! pivot serves many owning models. The inverse direction flips which
//! side the morph class describes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::backend::Database;
use crate::error::{ModelError, ModelResult};
use crate::model::{ModelDef, Record};
use crate::query::{Mutation, QueryBuilder, WhereCondition};

use super::belongs_to_many::{id_arguments, PIVOT_PREFIX};
use super::{
    assign_many, dictionary, fetch_records, parent_keys, value_key, Relation, RelationValue,
    RelationshipType,
};

/// Polymorphic many-to-many relationship
#[derive(Debug, Clone)]
pub struct MorphToMany {
    parent: Record,
    related: Arc<ModelDef>,
    pivot_table: String,
    morph_type: String,
    foreign_pivot_key: String,
    related_pivot_key: String,
    parent_key: String,
    related_key: String,
    inverse: bool,
    query: QueryBuilder,
}

impl MorphToMany {
    /// Create a new MorphToMany relationship, constrained to its parent.
    ///
    /// When `inverse` is set the relation runs from the plain side to the
    /// morphed side, and the morph class describes the related model
    /// instead of the parent.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent: &Record,
        related: Arc<ModelDef>,
        pivot_table: impl Into<String>,
        morph_type: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
        parent_key: impl Into<String>,
        related_key: impl Into<String>,
        inverse: bool,
    ) -> Self {
        let mut relation = Self {
            parent: parent.clone(),
            query: QueryBuilder::new().from(&related.table),
            related,
            pivot_table: pivot_table.into(),
            morph_type: morph_type.into(),
            foreign_pivot_key: foreign_pivot_key.into(),
            related_pivot_key: related_pivot_key.into(),
            parent_key: parent_key.into(),
            related_key: related_key.into(),
            inverse,
        };
        relation.add_constraints();
        relation
    }

    /// The morph class stored in the pivot type column
    pub fn morph_class(&self) -> &str {
        if self.inverse {
            &self.related.name
        } else {
            self.parent.morph_class()
        }
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
            .where_eq(
                &format!("{}.{}", self.pivot_table, self.morph_type),
                self.morph_class().to_string(),
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
                row.insert(
                    self.morph_type.clone(),
                    Value::String(self.morph_class().to_string()),
                );
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
        let mut wheres = vec![
            WhereCondition::eq(&self.foreign_pivot_key, parent_key),
            WhereCondition::eq(
                &self.morph_type,
                Value::String(self.morph_class().to_string()),
            ),
        ];
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
impl Relation for MorphToMany {
    fn kind(&self) -> RelationshipType {
        RelationshipType::MorphToMany
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

    fn relation() -> MorphToMany {
        MorphToMany::new(
            &post(),
            tag_def(),
            "taggables",
            "taggable_type",
            "taggable_id",
            "tag_id",
            "id",
            "id",
            false,
        )
    }

    async fn seeded() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.insert_rows(
            "tags",
            vec![
                row(&[("id", json!(10)), ("label", json!("rust"))]),
                row(&[("id", json!(11)), ("label", json!("orm"))]),
            ],
        )
        .await;
        db.insert_rows(
            "taggables",
            vec![
                row(&[
                    ("taggable_id", json!(1)),
                    ("tag_id", json!(10)),
                    ("taggable_type", json!("Post")),
                ]),
                row(&[
                    ("taggable_id", json!(1)),
                    ("tag_id", json!(11)),
                    ("taggable_type", json!("Video")),
                ]),
            ],
        )
        .await;
        db
    }

    #[test]
    fn test_constraints_sql() {
        assert_eq!(
            relation().query().to_sql(),
            "SELECT tags.*, taggables.taggable_id AS pivot_taggable_id FROM tags \
             INNER JOIN taggables ON taggables.tag_id = tags.id \
             WHERE taggables.taggable_type = 'Post' AND taggables.taggable_id = 1"
        );
    }

    #[tokio::test]
    async fn test_get_results_honors_morph_class() {
        let db = seeded().await;
        let mut relation = relation();

        let records = relation.get_results(&db).await.unwrap().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_value("label"), json!("rust"));
    }

    #[tokio::test]
    async fn test_attach_stamps_morph_class() {
        let db = seeded().await;
        let mut relation = relation();

        relation.invoke(&db, "attach", &[json!(11)]).await.unwrap();

        let pivot_rows = db.table_rows("taggables").await;
        let stamped = pivot_rows
            .iter()
            .filter(|row| {
                row.get("taggable_type") == Some(&json!("Post"))
                    && row.get("tag_id") == Some(&json!(11))
            })
            .count();
        assert_eq!(stamped, 1);
        assert_eq!(relation.get_results(&db).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_detach_keeps_other_morph_classes() {
        let db = seeded().await;
        let mut relation = relation();

        relation.invoke(&db, "detach", &[]).await.unwrap();

        let pivot_rows = db.table_rows("taggables").await;
        assert_eq!(pivot_rows.len(), 1);
        assert_eq!(pivot_rows[0].get("taggable_type"), Some(&json!("Video")));
    }

    #[test]
    fn test_inverse_flips_morph_class() {
        let tag = Record::new(Arc::new(ModelDef::new("Tag"))).with_attribute("id", json!(10));
        let relation = MorphToMany::new(
            &tag,
            Arc::new(ModelDef::new("Post")),
            "taggables",
            "taggable_type",
            "tag_id",
            "taggable_id",
            "id",
            "id",
            true,
        );

        assert_eq!(relation.morph_class(), "Post");
        assert_eq!(
            relation.query().to_sql(),
            "SELECT posts.*, taggables.tag_id AS pivot_tag_id FROM posts \
             INNER JOIN taggables ON taggables.taggable_id = posts.id \
             WHERE taggables.taggable_type = 'Post' AND taggables.tag_id = 10"
        );
    }
}
