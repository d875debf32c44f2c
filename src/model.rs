//! Model Layer - runtime model descriptors and attribute-map records
//!
//! Models are described by `ModelDef` values instead of derive macros, and
//! rows materialize as `Record` attribute maps. This keeps the relationship
//! layer open to heterogeneous target types at runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conventions;
use crate::factory::RelationBuilder;
use crate::query::QueryBuilder;

/// Runtime description of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    /// Model name; doubles as the morph class stored in `*_type` columns
    pub name: String,

    /// Backing table name
    pub table: String,

    /// Primary key column, defaults to `id`
    pub primary_key: String,

    /// Timestamp column maintained by `touch`, `None` when the table
    /// carries no timestamps
    pub updated_at_column: Option<String>,
}

impl ModelDef {
    /// Create a definition with conventional defaults
    /// (`Invoice` -> table `invoices`, primary key `id`).
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let table = conventions::table_name(&name);
        Self {
            name,
            table,
            primary_key: "id".to_string(),
            updated_at_column: Some("updated_at".to_string()),
        }
    }

    /// Override the backing table name
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Override the primary key column
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    /// Mark the model as carrying no timestamp columns
    pub fn without_timestamps(mut self) -> Self {
        self.updated_at_column = None;
        self
    }

    /// Conventional foreign key other tables use to reference this model
    /// (`Order` -> `order_id`).
    pub fn foreign_key(&self) -> String {
        conventions::foreign_key(&self.name)
    }

    /// Column qualified with this model's table (`orders.id`)
    pub fn qualify(&self, column: &str) -> String {
        format!("{}.{}", self.table, column)
    }
}

/// A loaded relation slot on a record
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Related {
    /// Loaded, no match
    #[default]
    None,
    /// Loaded, single record
    One(Record),
    /// Loaded, record collection
    Many(Vec<Record>),
}

impl Related {
    /// Number of records in the slot
    pub fn len(&self) -> usize {
        match self {
            Related::None => 0,
            Related::One(_) => 1,
            Related::Many(records) => records.len(),
        }
    }

    /// True when the slot holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Single-record view of the slot
    pub fn as_one(&self) -> Option<&Record> {
        match self {
            Related::One(record) => Some(record),
            _ => None,
        }
    }

    /// Collection view of the slot
    pub fn as_many(&self) -> Option<&[Record]> {
        match self {
            Related::Many(records) => Some(records),
            _ => None,
        }
    }
}

/// A materialized row tagged with its model definition
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    definition: Arc<ModelDef>,
    attributes: BTreeMap<String, Value>,
    relations: BTreeMap<String, Related>,
}

impl Record {
    /// Create an empty record for a model
    pub fn new(definition: Arc<ModelDef>) -> Self {
        Self {
            definition,
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Create a record from a raw attribute map (a fetched row)
    pub fn from_attributes(definition: Arc<ModelDef>, attributes: BTreeMap<String, Value>) -> Self {
        Self {
            definition,
            attributes,
            relations: BTreeMap::new(),
        }
    }

    /// Set an attribute while building a record
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// The model definition this record belongs to
    pub fn definition(&self) -> &Arc<ModelDef> {
        &self.definition
    }

    /// Model name of this record
    pub fn model_name(&self) -> &str {
        &self.definition.name
    }

    /// Backing table of this record
    pub fn table(&self) -> &str {
        &self.definition.table
    }

    /// Morph class stored for this record in polymorphic type columns
    pub fn morph_class(&self) -> &str {
        &self.definition.name
    }

    /// Read an attribute
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Read an attribute, treating a missing one as SQL NULL
    pub fn get_value(&self, key: &str) -> Value {
        self.attributes.get(key).cloned().unwrap_or(Value::Null)
    }

    /// Write an attribute
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Remove an attribute, returning its previous value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// The full attribute map
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Primary key value, if set
    pub fn primary_key(&self) -> Option<&Value> {
        self.attributes.get(&self.definition.primary_key)
    }

    /// Store a loaded relation slot
    pub fn set_relation(&mut self, name: impl Into<String>, value: Related) {
        self.relations.insert(name.into(), value);
    }

    /// Read a loaded relation slot
    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    /// Mutable view of a loaded relation slot
    pub fn relation_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.relations.get_mut(name)
    }

    /// True when the named relation has been loaded (even if empty)
    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// Fresh query scoped to this record's table
    pub fn new_query(&self) -> QueryBuilder {
        QueryBuilder::new().from(&self.definition.table)
    }

    /// Open a relationship declaration named `name` on this record.
    ///
    /// The name is the accessor the relation is registered under; it also
    /// drives key inference for belongs-to declarations.
    pub fn relate<'a>(&'a self, name: &str) -> RelationBuilder<'a> {
        RelationBuilder::new(self, name)
    }
}
