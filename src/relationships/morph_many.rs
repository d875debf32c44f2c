//! MorphMany - polymorphic one-to-many relationship

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ModelResult;
use crate::model::{ModelDef, Record};
use crate::query::QueryBuilder;

use super::{assign_many, dictionary, parent_keys, value_key, Relation, RelationshipType};

/// Polymorphic one-to-many relationship
#[derive(Debug, Clone)]
pub struct MorphMany {
    parent: Record,
    related: Arc<ModelDef>,
    morph_type: String,
    morph_id: String,
    local_key: String,
    query: QueryBuilder,
}

impl MorphMany {
    /// Create a new MorphMany relationship, constrained to its parent
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
        };
        relation.add_constraints();
        relation
    }

    /// The morph class stored in the type column for this parent
    pub fn morph_class(&self) -> &str {
        self.parent.morph_class()
    }

    fn matches_morph_class(&self, record: &Record) -> bool {
        record.get_value(&self.morph_type) == Value::String(self.morph_class().to_string())
    }
}

#[async_trait]
impl Relation for MorphMany {
    fn kind(&self) -> RelationshipType {
        RelationshipType::MorphMany
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

    fn match_eager(
        &self,
        parents: &mut [Record],
        results: &[Record],
        name: &str,
    ) -> ModelResult<()> {
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
            if let Some(matched) = dictionary.get(&value_key(&key)) {
                assign_many(parent, name, matched.clone());
            }
        }
        Ok(())
    }

    fn into_children(self: Box<Self>) -> Vec<Box<dyn Relation>> {
        vec![self]
    }
}
