//! HasManyThrough - one-to-many relationship through an intermediate model
//!
//! Related rows are reached by joining the intermediate table and keyed
//! back to the parent via a `through_key` select alias.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::Database;
use crate::error::{ModelError, ModelResult};
use crate::model::{ModelDef, Record};
use crate::query::QueryBuilder;

use super::{
    assign_many, dictionary, parent_keys, value_key, Relation, RelationValue, RelationshipType,
};

/// Alias under which the intermediate foreign key travels with each row
pub(crate) const THROUGH_KEY: &str = "through_key";

/// One-to-many relationship through an intermediate model
#[derive(Debug, Clone)]
pub struct HasManyThrough {
    parent: Record,
    related: Arc<ModelDef>,
    through: Arc<ModelDef>,
    first_key: String,
    second_key: String,
    local_key: String,
    query: QueryBuilder,
}

impl HasManyThrough {
    /// Create a new HasManyThrough relationship, constrained to its parent
    pub fn new(
        parent: &Record,
        related: Arc<ModelDef>,
        through: Arc<ModelDef>,
        first_key: impl Into<String>,
        second_key: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        let mut relation = Self {
            parent: parent.clone(),
            query: QueryBuilder::new().from(&related.table),
            related,
            through,
            first_key: first_key.into(),
            second_key: second_key.into(),
            local_key: local_key.into(),
        };
        relation.add_constraints();
        relation
    }

    /// The intermediate model definition
    pub fn through(&self) -> &Arc<ModelDef> {
        &self.through
    }

    fn base_query(&self) -> QueryBuilder {
        QueryBuilder::new()
            .from(&self.related.table)
            .select(&format!("{}.*", self.related.table))
            .select_as(&self.through.qualify(&self.first_key), THROUGH_KEY)
            .join(
                &self.through.table,
                &self.through.qualify(&self.through.primary_key),
                &self.related.qualify(&self.second_key),
            )
    }
}

#[async_trait]
impl Relation for HasManyThrough {
    fn kind(&self) -> RelationshipType {
        RelationshipType::HasManyThrough
    }

    fn related(&self) -> &Arc<ModelDef> {
        &self.related
    }

    fn query(&self) -> &QueryBuilder {
        &self.query
    }

    fn add_constraints(&mut self) {
        self.query = self.base_query().where_eq(
            &self.through.qualify(&self.first_key),
            self.parent.get_value(&self.local_key),
        );
    }

    fn add_eager_constraints(&mut self, parents: &[Record]) -> ModelResult<()> {
        self.query = self.base_query().where_in(
            &self.through.qualify(&self.first_key),
            parent_keys(parents, &self.local_key),
        );
        Ok(())
    }

    fn match_eager(
        &self,
        parents: &mut [Record],
        results: &[Record],
        name: &str,
    ) -> ModelResult<()> {
        let dictionary = dictionary(results, THROUGH_KEY, &self.related);
        for parent in parents.iter_mut() {
            let key = parent.get_value(&self.local_key);
            if key.is_null() {
                continue;
            }
            if let Some(matched) = dictionary.get(&value_key(&key)) {
                assign_many(parent, name, matched.clone());
            }
        }
        Ok(())
    }

    // Updates through a join are not expressible as a single mutation
    async fn raw_update(
        &mut self,
        _db: &dyn Database,
        _values: BTreeMap<String, Value>,
    ) -> ModelResult<RelationValue> {
        Err(ModelError::unsupported(self.kind().name(), "raw_update"))
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

    fn country() -> Record {
        Record::new(Arc::new(ModelDef::new("Country"))).with_attribute("id", json!(2))
    }

    fn post_def() -> Arc<ModelDef> {
        Arc::new(ModelDef::new("Post"))
    }

    fn user_def() -> Arc<ModelDef> {
        Arc::new(ModelDef::new("User"))
    }

    fn relation() -> HasManyThrough {
        HasManyThrough::new(
            &country(),
            post_def(),
            user_def(),
            "country_id",
            "user_id",
            "id",
        )
    }

    #[test]
    fn test_constraints_sql() {
        assert_eq!(
            relation().query().to_sql(),
            "SELECT posts.*, users.country_id AS through_key FROM posts \
             INNER JOIN users ON users.id = posts.user_id \
             WHERE users.country_id = 2"
        );
    }

    #[tokio::test]
    async fn test_get_results_reaches_through_intermediate() {
        let db = MemoryDatabase::new();
        db.insert_rows(
            "users",
            vec![
                row(&[("id", json!(10)), ("country_id", json!(2))]),
                row(&[("id", json!(11)), ("country_id", json!(3))]),
            ],
        )
        .await;
        db.insert_rows(
            "posts",
            vec![
                row(&[("id", json!(100)), ("user_id", json!(10))]),
                row(&[("id", json!(101)), ("user_id", json!(10))]),
                row(&[("id", json!(102)), ("user_id", json!(11))]),
            ],
        )
        .await;

        let mut relation = relation();
        let records = relation.get_results(&db).await.unwrap().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_value(THROUGH_KEY), json!(2));
    }

    #[tokio::test]
    async fn test_raw_update_is_unsupported() {
        let db = MemoryDatabase::new();
        let mut relation = relation();

        let err = relation
            .raw_update(&db, BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.is_unsupported());

        // touch delegates to raw_update, so it is unsupported as well
        let err = relation.touch(&db).await.unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_match_eager_uses_through_key() {
        let mut parents = vec![
            country(),
            Record::new(Arc::new(ModelDef::new("Country"))).with_attribute("id", json!(3)),
        ];
        let relation = relation();
        let results = vec![
            Record::new(post_def())
                .with_attribute("id", json!(100))
                .with_attribute(THROUGH_KEY, json!(2)),
            Record::new(post_def())
                .with_attribute("id", json!(102))
                .with_attribute(THROUGH_KEY, json!(3)),
        ];

        relation.init_relation(&mut parents, "posts").unwrap();
        relation
            .match_eager(&mut parents, &results, "posts")
            .unwrap();

        assert_eq!(parents[0].relation("posts").unwrap().len(), 1);
        assert_eq!(parents[1].relation("posts").unwrap().len(), 1);
    }
}
