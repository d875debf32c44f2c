//! Relationship System - the relation contract and its implementations
//!
//! Eight primitive relation kinds plus `MetaRelation`, an aggregator that
//! presents several relations as one. Every kind implements the same
//! object-safe `Relation` contract, so callers drive lazy loads, eager
//! loads, and mutations without knowing whether a relation is primitive
//! or composite.

mod belongs_to;
mod belongs_to_many;
mod has_many;
mod has_many_through;
mod has_one;
mod meta;
mod morph_many;
mod morph_one;
mod morph_to_many;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::BelongsToMany;
pub use has_many::HasMany;
pub use has_many_through::HasManyThrough;
pub use has_one::HasOne;
pub use meta::MetaRelation;
pub use morph_many::MorphMany;
pub use morph_one::MorphOne;
pub use morph_to_many::MorphToMany;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::backend::Database;
use crate::error::{ModelError, ModelResult};
use crate::model::{ModelDef, Record, Related};
use crate::query::{Mutation, QueryBuilder};

/// Defines the type of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    /// One-to-one relationship
    HasOne,
    /// One-to-many relationship
    HasMany,
    /// Inverse one-to-one or one-to-many relationship
    BelongsTo,
    /// One-to-many relationship through an intermediate model
    HasManyThrough,
    /// Polymorphic one-to-one relationship
    MorphOne,
    /// Polymorphic one-to-many relationship
    MorphMany,
    /// Many-to-many relationship through a pivot table
    BelongsToMany,
    /// Polymorphic many-to-many relationship
    MorphToMany,
    /// Aggregate over several relations
    Meta,
}

impl RelationshipType {
    /// Stable name used in logs and error messages
    pub fn name(self) -> &'static str {
        match self {
            Self::HasOne => "HasOne",
            Self::HasMany => "HasMany",
            Self::BelongsTo => "BelongsTo",
            Self::HasManyThrough => "HasManyThrough",
            Self::MorphOne => "MorphOne",
            Self::MorphMany => "MorphMany",
            Self::BelongsToMany => "BelongsToMany",
            Self::MorphToMany => "MorphToMany",
            Self::Meta => "Meta",
        }
    }

    /// Returns true if this relation type is polymorphic
    pub fn is_polymorphic(self) -> bool {
        matches!(self, Self::MorphOne | Self::MorphMany | Self::MorphToMany)
    }

    /// Returns true if this relation type resolves to a collection
    pub fn is_collection(self) -> bool {
        matches!(
            self,
            Self::HasMany
                | Self::HasManyThrough
                | Self::MorphMany
                | Self::BelongsToMany
                | Self::MorphToMany
                | Self::Meta
        )
    }

    /// Returns true if this relation type goes through a pivot table
    pub fn requires_pivot(self) -> bool {
        matches!(self, Self::BelongsToMany | Self::MorphToMany)
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result unit produced by relation operations
#[derive(Debug)]
pub enum RelationValue {
    /// Nothing produced
    Empty,
    /// A single record
    One(Record),
    /// A record collection
    Many(Vec<Record>),
    /// The relation replaced itself with another relation
    Replacement(Box<dyn Relation>),
}

impl RelationValue {
    /// Flatten into a record collection; `Empty` and `Replacement`
    /// contribute nothing
    pub fn records(self) -> Vec<Record> {
        match self {
            RelationValue::Empty | RelationValue::Replacement(_) => Vec::new(),
            RelationValue::One(record) => vec![record],
            RelationValue::Many(records) => records,
        }
    }

    /// First record, if any
    pub fn first(self) -> Option<Record> {
        self.records().into_iter().next()
    }

    /// Number of records carried
    pub fn len(&self) -> usize {
        match self {
            RelationValue::Empty | RelationValue::Replacement(_) => 0,
            RelationValue::One(_) => 1,
            RelationValue::Many(records) => records.len(),
        }
    }

    /// True when no records are carried
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<RelationValue> for Related {
    fn from(value: RelationValue) -> Self {
        match value {
            RelationValue::Empty | RelationValue::Replacement(_) => Related::None,
            RelationValue::One(record) => Related::One(record),
            RelationValue::Many(records) => Related::Many(records),
        }
    }
}

/// Contract every relation implements.
///
/// Lifecycle: a relation is constructed already constrained to its parent.
/// Eager loading re-constrains it for a batch (`add_eager_constraints`),
/// fetches (`get_eager`), and distributes results (`init_relation` then
/// `match_eager`). `touch`, `raw_update`, and `invoke` form the mutation
/// surface; an operation a kind cannot perform returns the
/// unsupported-operation error, which aggregating relations absorb per
/// member.
#[async_trait]
pub trait Relation: Send + Sync + fmt::Debug {
    /// The relation kind
    fn kind(&self) -> RelationshipType;

    /// Definition of the related model
    fn related(&self) -> &Arc<ModelDef>;

    /// The relation's currently constrained query
    fn query(&self) -> &QueryBuilder;

    /// Re-apply the single-parent constraints, resetting any batch state
    fn add_constraints(&mut self);

    /// Constrain the query for a batch of parents
    fn add_eager_constraints(&mut self, parents: &[Record]) -> ModelResult<()>;

    /// Seed the default relation slot on each parent
    fn init_relation(&self, parents: &mut [Record], name: &str) -> ModelResult<()> {
        let default = if self.kind().is_collection() {
            Related::Many(Vec::new())
        } else {
            Related::None
        };
        for parent in parents.iter_mut() {
            parent.set_relation(name, default.clone());
        }
        Ok(())
    }

    /// Distribute fetched results onto their matching parents.
    ///
    /// Matches accumulate into an existing collection slot, so relations
    /// distributing in sequence (the aggregated case) extend one another
    /// instead of overwriting.
    fn match_eager(&self, parents: &mut [Record], results: &[Record], name: &str)
        -> ModelResult<()>;

    /// Resolve the relation for its parent
    async fn get_results(&mut self, db: &dyn Database) -> ModelResult<RelationValue> {
        if self.kind().is_collection() {
            let records = fetch_records(db, self.query(), self.related()).await?;
            Ok(RelationValue::Many(records))
        } else {
            let query = self.query().clone().limit(1);
            let records = fetch_records(db, &query, self.related()).await?;
            Ok(match records.into_iter().next() {
                Some(record) => RelationValue::One(record),
                None => RelationValue::Empty,
            })
        }
    }

    /// Fetch the batch results for the currently applied eager constraints
    async fn get_eager(&mut self, db: &dyn Database) -> ModelResult<RelationValue> {
        let records = fetch_records(db, self.query(), self.related()).await?;
        Ok(RelationValue::Many(records))
    }

    /// Update the related timestamp column to now
    async fn touch(&mut self, db: &dyn Database) -> ModelResult<RelationValue> {
        let column = match &self.related().updated_at_column {
            Some(column) => column.clone(),
            None => return Err(ModelError::unsupported(self.kind().name(), "touch")),
        };
        let mut values = BTreeMap::new();
        values.insert(column, Value::String(Utc::now().to_rfc3339()));
        self.raw_update(db, values).await
    }

    /// Update all related rows matched by the current constraints.
    ///
    /// The affected count is logged, not returned; the merged result unit
    /// is a record collection.
    async fn raw_update(
        &mut self,
        db: &dyn Database,
        values: BTreeMap<String, Value>,
    ) -> ModelResult<RelationValue> {
        let mutation = Mutation::Update {
            table: self.related().table.clone(),
            values,
            wheres: self.query().wheres().to_vec(),
        };
        let affected = db.execute(&mutation).await?;
        debug!(relation = self.kind().name(), affected, "Raw update applied");
        Ok(RelationValue::Empty)
    }

    /// Optional-capability extension point for operations outside the
    /// core contract (pivot attach/detach, default records). Kinds that
    /// do not recognize an operation return the unsupported error.
    async fn invoke(
        &mut self,
        _db: &dyn Database,
        operation: &str,
        _args: &[Value],
    ) -> ModelResult<RelationValue> {
        Err(ModelError::unsupported(self.kind().name(), operation))
    }

    /// View as an aggregate, when this relation is one
    fn as_meta(&self) -> Option<&MetaRelation> {
        None
    }

    /// Decompose into aggregatable members; primitives yield themselves
    fn into_children(self: Box<Self>) -> Vec<Box<dyn Relation>>;
}

/// Fetch rows for a query and tag them with the related definition
pub(crate) async fn fetch_records(
    db: &dyn Database,
    query: &QueryBuilder,
    related: &Arc<ModelDef>,
) -> ModelResult<Vec<Record>> {
    let rows = db.select(query).await?;
    Ok(rows
        .into_iter()
        .map(|row| Record::from_attributes(related.clone(), row))
        .collect())
}

/// Canonical dictionary key for an attribute value
pub(crate) fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Distinct non-null key values across a batch of parents, in first-seen
/// order
pub(crate) fn parent_keys(parents: &[Record], key: &str) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    let mut keys = Vec::new();
    for parent in parents {
        let value = parent.get_value(key);
        if value.is_null() {
            continue;
        }
        if seen.insert(value_key(&value)) {
            keys.push(value);
        }
    }
    keys
}

/// Group results by a key attribute, keeping only records of the related
/// model (merged batches carry records of several models)
pub(crate) fn dictionary(
    results: &[Record],
    key_attr: &str,
    related: &ModelDef,
) -> BTreeMap<String, Vec<Record>> {
    let mut dictionary: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for record in results {
        if record.definition().as_ref() != related {
            continue;
        }
        let key = record.get_value(key_attr);
        if key.is_null() {
            continue;
        }
        dictionary
            .entry(value_key(&key))
            .or_default()
            .push(record.clone());
    }
    dictionary
}

/// Default-record attributes carried in an extension-operation argument
/// list; the first argument may be an attribute object
pub(crate) fn attribute_defaults(args: &[Value]) -> BTreeMap<String, Value> {
    match args.first() {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Assign a single-record match, extending an existing collection slot.
/// Unmatched parents are never assigned; they keep their seeded slot.
pub(crate) fn assign_one(parent: &mut Record, name: &str, matched: Record) {
    if let Some(Related::Many(items)) = parent.relation_mut(name) {
        items.push(matched);
        return;
    }
    parent.set_relation(name, Related::One(matched));
}

/// Assign a collection match, extending an existing collection slot
pub(crate) fn assign_many(parent: &mut Record, name: &str, matched: Vec<Record>) {
    if let Some(Related::Many(items)) = parent.relation_mut(name) {
        items.extend(matched);
        return;
    }
    parent.set_relation(name, Related::Many(matched));
}
