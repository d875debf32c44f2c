//! MorphOne - polymorphic one-to-one relationship
//!
//! Like HasOne, with the owner identified by a morph type column next to
//! the morph id column, so several models can own rows in one table.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::Database;
use crate::error::{ModelError, ModelResult};
use crate::model::{ModelDef, Record, Related};
use crate::query::QueryBuilder;

use super::{
    assign_one, attribute_defaults, dictionary, fetch_records, parent_keys, value_key, Relation,
    RelationValue, RelationshipType,
};

/// Polymorphic one-to-one relationship
#[derive(Debug, Clone)]
pub struct MorphOne {
    parent: Record,
    related: Arc<ModelDef>,
    morph_type: String,
    morph_id: String,
    local_key: String,
    query: QueryBuilder,
    default_attributes: Option<BTreeMap<String, Value>>,
}

impl MorphOne {
    /// Create a new MorphOne relationship, constrained to its parent
    pub fn new(
        parent: &Record,
        related: Arc<ModelDef>,
        morph_type: impl Into<String>,
        morph_id: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        let mut relation = Self {
            parent: parent.clone(),
            query: QueryBuilder::new().from(&related.table),
            related,
            morph_type: morph_type.into(),
            morph_id: morph_id.into(),
            local_key: local_key.into(),
            default_attributes: None,
        };
        relation.add_constraints();
        relation
    }

    /// Return a default record instead of nothing when no row matches
    pub fn with_default(mut self, attributes: BTreeMap<String, Value>) -> Self {
        self.default_attributes = Some(attributes);
        self
    }

    /// The morph class stored in the type column for this parent
    pub fn morph_class(&self) -> &str {
        self.parent.morph_class()
    }

    fn default_record(&self, parent: &Record) -> Option<Record> {
        let attributes = self.default_attributes.as_ref()?;
        let mut record = Record::from_attributes(self.related.clone(), attributes.clone());
        let parent_key = parent.get_value(&self.local_key);
        if !parent_key.is_null() {
            record.set(&self.morph_id, parent_key);
        }
        record.set(&self.morph_type, Value::String(parent.morph_class().to_string()));
        Some(record)
    }

    fn matches_morph_class(&self, record: &Record) -> bool {
        record.get_value(&self.morph_type) == Value::String(self.morph_class().to_string())
    }
}

#[async_trait]
impl Relation for MorphOne {
    fn kind(&self) -> RelationshipType {
        RelationshipType::MorphOne
    }

    fn related(&self) -> &Arc<ModelDef> {
        &self.related
    }

    fn query(&self) -> &QueryBuilder {
        &self.query
    }

    fn add_constraints(&mut self) {
        self.query = QueryBuilder::new()
            .from(&self.related.table)
            .where_eq(
                &self.related.qualify(&self.morph_id),
                self.parent.get_value(&self.local_key),
            )
            .where_eq(
                &self.related.qualify(&self.morph_type),
                self.morph_class().to_string(),
            );
    }

    fn add_eager_constraints(&mut self, parents: &[Record]) -> ModelResult<()> {
        self.query = QueryBuilder::new()
            .from(&self.related.table)
            .where_in(
                &self.related.qualify(&self.morph_id),
                parent_keys(parents, &self.local_key),
            )
            .where_eq(
                &self.related.qualify(&self.morph_type),
                self.morph_class().to_string(),
            );
        Ok(())
    }

    fn init_relation(&self, parents: &mut [Record], name: &str) -> ModelResult<()> {
        for parent in parents.iter_mut() {
            let seed = match self.default_record(parent) {
                Some(record) => Related::One(record),
                None => Related::None,
            };
            parent.set_relation(name, seed);
        }
        Ok(())
    }

    fn match_eager(
        &self,
        parents: &mut [Record],
        results: &[Record],
        name: &str,
    ) -> ModelResult<()> {
        // Merged batches may hold rows of the same table owned by another
        // morph class
        let own: Vec<Record> = results
            .iter()
            .filter(|record| self.matches_morph_class(record))
            .cloned()
            .collect();
        let dictionary = dictionary(&own, &self.morph_id, &self.related);
        for parent in parents.iter_mut() {
            let key = parent.get_value(&self.local_key);
            if key.is_null() {
                continue;
            }
            if let Some(matched) = dictionary
                .get(&value_key(&key))
                .and_then(|records| records.first())
            {
                assign_one(parent, name, matched.clone());
            }
        }
        Ok(())
    }

    async fn get_results(&mut self, db: &dyn Database) -> ModelResult<RelationValue> {
        let query = self.query.clone().limit(1);
        let records = fetch_records(db, &query, &self.related).await?;
        if let Some(record) = records.into_iter().next() {
            return Ok(RelationValue::One(record));
        }
        Ok(match self.default_record(&self.parent) {
            Some(record) => RelationValue::One(record),
            None => RelationValue::Empty,
        })
    }

    async fn invoke(
        &mut self,
        _db: &dyn Database,
        operation: &str,
        args: &[Value],
    ) -> ModelResult<RelationValue> {
        match operation {
            "with_default" => {
                let replacement = self.clone().with_default(attribute_defaults(args));
                Ok(RelationValue::Replacement(Box::new(replacement)))
            }
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

    fn image_def() -> Arc<ModelDef> {
        Arc::new(ModelDef::new("Image"))
    }

    #[test]
    fn test_constraints_sql() {
        let relation = MorphOne::new(&post(), image_def(), "imageable_type", "imageable_id", "id");

        assert_eq!(
            relation.query().to_sql(),
            "SELECT * FROM images WHERE images.imageable_id = 1 \
             AND images.imageable_type = 'Post'"
        );
    }

    #[tokio::test]
    async fn test_get_results_honors_morph_class() {
        let db = MemoryDatabase::new();
        db.insert_rows(
            "images",
            vec![
                row(&[
                    ("id", json!(1)),
                    ("imageable_id", json!(1)),
                    ("imageable_type", json!("Video")),
                ]),
                row(&[
                    ("id", json!(2)),
                    ("imageable_id", json!(1)),
                    ("imageable_type", json!("Post")),
                ]),
            ],
        )
        .await;

        let mut relation =
            MorphOne::new(&post(), image_def(), "imageable_type", "imageable_id", "id");
        let value = relation.get_results(&db).await.unwrap();
        assert_eq!(value.first().unwrap().get_value("id"), json!(2));
    }

    #[test]
    fn test_match_eager_skips_other_morph_classes() {
        let mut parents = vec![post()];
        let relation =
            MorphOne::new(&parents[0], image_def(), "imageable_type", "imageable_id", "id");
        let results = vec![Record::new(image_def())
            .with_attribute("id", json!(9))
            .with_attribute("imageable_id", json!(1))
            .with_attribute("imageable_type", json!("Video"))];

        relation.init_relation(&mut parents, "image").unwrap();
        relation
            .match_eager(&mut parents, &results, "image")
            .unwrap();

        assert_eq!(parents[0].relation("image"), Some(&Related::None));
    }
}
