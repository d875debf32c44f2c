//! HasOne - one-to-one relationship
//!
//! A parent owns at most one related record, located by a foreign key on
//! the related table.

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

/// One-to-one relationship
#[derive(Debug, Clone)]
pub struct HasOne {
    parent: Record,
    related: Arc<ModelDef>,
    foreign_key: String,
    local_key: String,
    query: QueryBuilder,
    default_attributes: Option<BTreeMap<String, Value>>,
}

impl HasOne {
    /// Create a new HasOne relationship, constrained to its parent
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

    /// The foreign key on the related table
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// The local key on the parent
    pub fn local_key(&self) -> &str {
        &self.local_key
    }

    fn default_record(&self, parent: &Record) -> Option<Record> {
        let attributes = self.default_attributes.as_ref()?;
        let mut record = Record::from_attributes(self.related.clone(), attributes.clone());
        let parent_key = parent.get_value(&self.local_key);
        if !parent_key.is_null() {
            record.set(&self.foreign_key, parent_key);
        }
        Some(record)
    }
}

#[async_trait]
impl Relation for HasOne {
    fn kind(&self) -> RelationshipType {
        RelationshipType::HasOne
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
        let dictionary = dictionary(results, &self.foreign_key, &self.related);
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

    fn order() -> Record {
        Record::new(Arc::new(ModelDef::new("Order"))).with_attribute("id", json!(7))
    }

    fn invoice_def() -> Arc<ModelDef> {
        Arc::new(ModelDef::new("Invoice"))
    }

    #[test]
    fn test_constraints_sql() {
        let relation = HasOne::new(&order(), invoice_def(), "order_id", "id");

        assert_eq!(
            relation.query().to_sql(),
            "SELECT * FROM invoices WHERE invoices.order_id = 7"
        );
    }

    #[test]
    fn test_eager_constraints_sql() {
        let parents = vec![
            order(),
            Record::new(Arc::new(ModelDef::new("Order"))).with_attribute("id", json!(9)),
        ];
        let mut relation = HasOne::new(&parents[0], invoice_def(), "order_id", "id");
        relation.add_eager_constraints(&parents).unwrap();

        assert_eq!(
            relation.query().to_sql(),
            "SELECT * FROM invoices WHERE invoices.order_id IN (7, 9)"
        );
    }

    #[tokio::test]
    async fn test_get_results_returns_one_or_empty() {
        let db = MemoryDatabase::new();
        db.insert_rows(
            "invoices",
            vec![
                row(&[("id", json!(1)), ("order_id", json!(7))]),
                row(&[("id", json!(2)), ("order_id", json!(8))]),
            ],
        )
        .await;

        let mut relation = HasOne::new(&order(), invoice_def(), "order_id", "id");
        let value = relation.get_results(&db).await.unwrap();
        assert_eq!(value.first().unwrap().get_value("id"), json!(1));

        let missing = Record::new(Arc::new(ModelDef::new("Order"))).with_attribute("id", json!(99));
        let mut relation = HasOne::new(&missing, invoice_def(), "order_id", "id");
        assert!(relation.get_results(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_record_when_no_match() {
        let db = MemoryDatabase::new();
        let mut defaults = BTreeMap::new();
        defaults.insert("status".to_string(), json!("draft"));

        let mut relation =
            HasOne::new(&order(), invoice_def(), "order_id", "id").with_default(defaults);
        let value = relation.get_results(&db).await.unwrap();
        let record = value.first().unwrap();
        assert_eq!(record.get_value("status"), json!("draft"));
        assert_eq!(record.get_value("order_id"), json!(7));
    }

    #[test]
    fn test_match_eager_assigns_first_match() {
        let mut parents = vec![
            order(),
            Record::new(Arc::new(ModelDef::new("Order"))).with_attribute("id", json!(8)),
        ];
        let relation = HasOne::new(&parents[0], invoice_def(), "order_id", "id");
        let results = vec![
            Record::new(invoice_def())
                .with_attribute("id", json!(1))
                .with_attribute("order_id", json!(8)),
            Record::new(invoice_def())
                .with_attribute("id", json!(2))
                .with_attribute("order_id", json!(8)),
        ];

        relation.init_relation(&mut parents, "invoice").unwrap();
        relation
            .match_eager(&mut parents, &results, "invoice")
            .unwrap();

        assert_eq!(parents[0].relation("invoice"), Some(&Related::None));
        let matched = parents[1].relation("invoice").unwrap().as_one().unwrap();
        assert_eq!(matched.get_value("id"), json!(1));
    }

    #[tokio::test]
    async fn test_with_default_invocation_replaces_relation() {
        let db = MemoryDatabase::new();
        let mut relation = HasOne::new(&order(), invoice_def(), "order_id", "id");

        let value = relation
            .invoke(&db, "with_default", &[json!({"status": "draft"})])
            .await
            .unwrap();
        let mut replacement = match value {
            RelationValue::Replacement(relation) => relation,
            other => panic!("expected replacement, got {other:?}"),
        };
        let record = replacement.get_results(&db).await.unwrap().first().unwrap();
        assert_eq!(record.get_value("status"), json!("draft"));

        let err = relation.invoke(&db, "attach", &[]).await.unwrap_err();
        assert!(err.is_unsupported());
    }
}
