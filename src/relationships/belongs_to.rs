//! BelongsTo - inverse one-to-one or one-to-many relationship
//!
//! The declaring record carries the foreign key and points at its owner.

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

/// Inverse relationship locating the owning record
#[derive(Debug, Clone)]
pub struct BelongsTo {
    parent: Record,
    related: Arc<ModelDef>,
    foreign_key: String,
    owner_key: String,
    query: QueryBuilder,
    default_attributes: Option<BTreeMap<String, Value>>,
}

impl BelongsTo {
    /// Create a new BelongsTo relationship, constrained to its parent
    pub fn new(
        parent: &Record,
        related: Arc<ModelDef>,
        foreign_key: impl Into<String>,
        owner_key: impl Into<String>,
    ) -> Self {
        let mut relation = Self {
            parent: parent.clone(),
            query: QueryBuilder::new().from(&related.table),
            related,
            foreign_key: foreign_key.into(),
            owner_key: owner_key.into(),
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

    /// The foreign key on the declaring record
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// The key on the owning model the foreign key points at
    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    fn default_record(&self) -> Option<Record> {
        let attributes = self.default_attributes.as_ref()?;
        Some(Record::from_attributes(
            self.related.clone(),
            attributes.clone(),
        ))
    }
}

#[async_trait]
impl Relation for BelongsTo {
    fn kind(&self) -> RelationshipType {
        RelationshipType::BelongsTo
    }

    fn related(&self) -> &Arc<ModelDef> {
        &self.related
    }

    fn query(&self) -> &QueryBuilder {
        &self.query
    }

    fn add_constraints(&mut self) {
        self.query = QueryBuilder::new().from(&self.related.table).where_eq(
            &self.related.qualify(&self.owner_key),
            self.parent.get_value(&self.foreign_key),
        );
    }

    fn add_eager_constraints(&mut self, parents: &[Record]) -> ModelResult<()> {
        self.query = QueryBuilder::new().from(&self.related.table).where_in(
            &self.related.qualify(&self.owner_key),
            parent_keys(parents, &self.foreign_key),
        );
        Ok(())
    }

    fn init_relation(&self, parents: &mut [Record], name: &str) -> ModelResult<()> {
        for parent in parents.iter_mut() {
            let seed = match self.default_record() {
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
        let dictionary = dictionary(results, &self.owner_key, &self.related);
        for parent in parents.iter_mut() {
            let key = parent.get_value(&self.foreign_key);
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
        if self.parent.get_value(&self.foreign_key).is_null() {
            return Ok(match self.default_record() {
                Some(record) => RelationValue::One(record),
                None => RelationValue::Empty,
            });
        }
        let query = self.query.clone().limit(1);
        let records = fetch_records(db, &query, &self.related).await?;
        if let Some(record) = records.into_iter().next() {
            return Ok(RelationValue::One(record));
        }
        Ok(match self.default_record() {
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
