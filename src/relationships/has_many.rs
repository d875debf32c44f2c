//! HasMany - one-to-many relationship

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ModelResult;
use crate::model::{ModelDef, Record};
use crate::query::QueryBuilder;

use super::{assign_many, dictionary, parent_keys, value_key, Relation, RelationshipType};

/// One-to-many relationship
#[derive(Debug, Clone)]
pub struct HasMany {
    parent: Record,
    related: Arc<ModelDef>,
    foreign_key: String,
    local_key: String,
    query: QueryBuilder,
}

impl HasMany {
    /// Create a new HasMany relationship, constrained to its parent
    pub fn new(
        parent: &Record,
        related: Arc<ModelDef>,
        foreign_key: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        let mut relation = Self {
            parent: parent.clone(),
            query: QueryBuilder::new().from(&related.table),
            related,
            foreign_key: foreign_key.into(),
            local_key: local_key.into(),
        };
        relation.add_constraints();
        relation
    }

    /// The foreign key on the related table
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// The local key on the parent
    pub fn local_key(&self) -> &str {
        &self.local_key
    }
}

#[async_trait]
impl Relation for HasMany {
    fn kind(&self) -> RelationshipType {
        RelationshipType::HasMany
    }

    fn related(&self) -> &Arc<ModelDef> {
        &self.related
    }

    fn query(&self) -> &QueryBuilder {
        &self.query
    }

    fn add_constraints(&mut self) {
        self.query = QueryBuilder::new().from(&self.related.table).where_eq(
            &self.related.qualify(&self.foreign_key),
            self.parent.get_value(&self.local_key),
        );
    }

    fn add_eager_constraints(&mut self, parents: &[Record]) -> ModelResult<()> {
        self.query = QueryBuilder::new().from(&self.related.table).where_in(
            &self.related.qualify(&self.foreign_key),
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
        let dictionary = dictionary(results, &self.foreign_key, &self.related);
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
