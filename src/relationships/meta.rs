//! MetaRelation - several relations presented as one
//!
//! An aggregate holds an ordered list of member relations and forwards
//! every operation to them, merging whatever each member produces into a
//! single collection. A member that does not support an operation is
//! skipped; any other failure aborts the whole operation. A member that
//! answers with a replacement relation is swapped out in place, so later
//! operations run against the replacement.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::backend::Database;
use crate::error::ModelResult;
use crate::model::{ModelDef, Record, Related};
use crate::query::QueryBuilder;

use super::{Relation, RelationValue, RelationshipType};

/// Aggregate over several relations
#[derive(Debug)]
pub struct MetaRelation {
    parent: Record,
    definition: Arc<ModelDef>,
    query: QueryBuilder,
    relations: Vec<Box<dyn Relation>>,
}

impl MetaRelation {
    /// Create an empty aggregate for a parent record.
    ///
    /// The aggregate has no related model of its own; it carries the
    /// parent's definition and an inert query over the parent table.
    pub fn new(parent: &Record) -> Self {
        Self {
            query: parent.new_query(),
            definition: parent.definition().clone(),
            parent: parent.clone(),
            relations: Vec::new(),
        }
    }

    /// Absorb a relation as a member. Aggregates are flattened into
    /// their members, so nesting never forms.
    pub fn merge(mut self, relation: Box<dyn Relation>) -> Self {
        self.relations.extend(relation.into_children());
        self
    }

    /// The member relations, in merge order
    pub fn relations(&self) -> &[Box<dyn Relation>] {
        &self.relations
    }

    /// Number of member relations
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// True when the aggregate has no members
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// The parent record the members were declared on
    pub fn parent(&self) -> &Record {
        &self.parent
    }
}

/// Fold one member's result into the merged collection. Unsupported
/// operations skip the member; replacements overwrite its slot.
fn absorb(
    merged: &mut Vec<Record>,
    slot: &mut Box<dyn Relation>,
    result: ModelResult<RelationValue>,
    operation: &str,
) -> ModelResult<()> {
    match result {
        Ok(RelationValue::Empty) => Ok(()),
        Ok(RelationValue::One(record)) => {
            merged.push(record);
            Ok(())
        }
        Ok(RelationValue::Many(records)) => {
            merged.extend(records);
            Ok(())
        }
        Ok(RelationValue::Replacement(relation)) => {
            *slot = relation;
            Ok(())
        }
        Err(error) if error.is_unsupported() => {
            debug!(operation, %error, "Skipping relation member");
            Ok(())
        }
        Err(error) => Err(error),
    }
}

/// Apply the skip policy to a forwarded bookkeeping call
fn forward(result: ModelResult<()>, operation: &str) -> ModelResult<()> {
    match result {
        Err(error) if error.is_unsupported() => {
            debug!(operation, %error, "Skipping relation member");
            Ok(())
        }
        other => other,
    }
}

#[async_trait]
impl Relation for MetaRelation {
    fn kind(&self) -> RelationshipType {
        RelationshipType::Meta
    }

    fn related(&self) -> &Arc<ModelDef> {
        &self.definition
    }

    fn query(&self) -> &QueryBuilder {
        &self.query
    }

    // Members arrive already constrained from their own construction
    fn add_constraints(&mut self) {}

    fn add_eager_constraints(&mut self, parents: &[Record]) -> ModelResult<()> {
        for relation in self.relations.iter_mut() {
            forward(
                relation.add_eager_constraints(parents),
                "add_eager_constraints",
            )?;
        }
        Ok(())
    }

    fn init_relation(&self, parents: &mut [Record], name: &str) -> ModelResult<()> {
        for relation in &self.relations {
            forward(relation.init_relation(parents, name), "init_relation")?;
        }
        // The merged slot is always a collection, whatever the members
        // seeded
        for parent in parents.iter_mut() {
            parent.set_relation(name, Related::Many(Vec::new()));
        }
        Ok(())
    }

    fn match_eager(
        &self,
        parents: &mut [Record],
        results: &[Record],
        name: &str,
    ) -> ModelResult<()> {
        for relation in &self.relations {
            forward(relation.match_eager(parents, results, name), "match_eager")?;
        }
        Ok(())
    }

    async fn get_results(&mut self, db: &dyn Database) -> ModelResult<RelationValue> {
        let mut merged = Vec::new();
        for slot in self.relations.iter_mut() {
            let result = slot.get_results(db).await;
            absorb(&mut merged, slot, result, "get_results")?;
        }
        Ok(RelationValue::Many(merged))
    }

    async fn get_eager(&mut self, db: &dyn Database) -> ModelResult<RelationValue> {
        let mut merged = Vec::new();
        for slot in self.relations.iter_mut() {
            let result = slot.get_eager(db).await;
            absorb(&mut merged, slot, result, "get_eager")?;
        }
        Ok(RelationValue::Many(merged))
    }

    async fn touch(&mut self, db: &dyn Database) -> ModelResult<RelationValue> {
        let mut merged = Vec::new();
        for slot in self.relations.iter_mut() {
            let result = slot.touch(db).await;
            absorb(&mut merged, slot, result, "touch")?;
        }
        Ok(RelationValue::Many(merged))
    }

    async fn raw_update(
        &mut self,
        db: &dyn Database,
        values: BTreeMap<String, Value>,
    ) -> ModelResult<RelationValue> {
        let mut merged = Vec::new();
        for slot in self.relations.iter_mut() {
            let result = slot.raw_update(db, values.clone()).await;
            absorb(&mut merged, slot, result, "raw_update")?;
        }
        Ok(RelationValue::Many(merged))
    }

    async fn invoke(
        &mut self,
        db: &dyn Database,
        operation: &str,
        args: &[Value],
    ) -> ModelResult<RelationValue> {
        let mut merged = Vec::new();
        for slot in self.relations.iter_mut() {
            let result = slot.invoke(db, operation, args).await;
            absorb(&mut merged, slot, result, operation)?;
        }
        Ok(RelationValue::Many(merged))
    }

    fn as_meta(&self) -> Option<&MetaRelation> {
        Some(self)
    }

    fn into_children(self: Box<Self>) -> Vec<Box<dyn Relation>> {
        self.relations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{row, MemoryDatabase};
    use crate::relationships::{HasMany, HasManyThrough, HasOne};
    use serde_json::json;

    fn order() -> Record {
        Record::new(Arc::new(ModelDef::new("Order"))).with_attribute("id", json!(7))
    }

    fn invoice_def() -> Arc<ModelDef> {
        Arc::new(ModelDef::new("Invoice"))
    }

    fn receipt_def() -> Arc<ModelDef> {
        Arc::new(ModelDef::new("Receipt"))
    }

    fn billing(parent: &Record) -> MetaRelation {
        MetaRelation::new(parent)
            .merge(Box::new(HasOne::new(
                parent,
                invoice_def(),
                "order_id",
                "id",
            )))
            .merge(Box::new(HasMany::new(
                parent,
                receipt_def(),
                "order_id",
                "id",
            )))
    }

    async fn seeded() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.insert_rows(
            "invoices",
            vec![row(&[("id", json!(1)), ("order_id", json!(7))])],
        )
        .await;
        db.insert_rows(
            "receipts",
            vec![
                row(&[("id", json!(21)), ("order_id", json!(7))]),
                row(&[("id", json!(22)), ("order_id", json!(7))]),
            ],
        )
        .await;
        db
    }

    #[test]
    fn test_merge_flattens_aggregates() {
        let parent = order();
        let inner = billing(&parent);
        let outer = MetaRelation::new(&parent).merge(Box::new(inner));

        assert_eq!(outer.len(), 2);
        assert!(outer
            .relations()
            .iter()
            .all(|relation| relation.kind() != RelationshipType::Meta));
    }

    #[tokio::test]
    async fn test_get_results_merges_in_member_order() {
        let db = seeded().await;
        let parent = order();
        let mut relation = billing(&parent);

        let records = relation.get_results(&db).await.unwrap().records();
        let ids: Vec<Value> = records.iter().map(|r| r.get_value("id")).collect();
        assert_eq!(ids, vec![json!(1), json!(21), json!(22)]);
    }

    #[tokio::test]
    async fn test_absent_members_contribute_nothing() {
        let db = MemoryDatabase::new();
        let parent = order();
        let mut relation = billing(&parent);

        let value = relation.get_results(&db).await.unwrap();
        assert_eq!(value.len(), 0);
        assert!(matches!(value, RelationValue::Many(_)));
    }

    #[tokio::test]
    async fn test_unsupported_members_are_skipped() {
        let db = seeded().await;
        let parent = order();
        let mut relation = MetaRelation::new(&parent)
            .merge(Box::new(HasManyThrough::new(
                &parent,
                Arc::new(ModelDef::new("Shipment")),
                Arc::new(ModelDef::new("Warehouse")),
                "order_id",
                "warehouse_id",
                "id",
            )))
            .merge(Box::new(HasMany::new(
                &parent,
                receipt_def(),
                "order_id",
                "id",
            )))
            .merge(Box::new(HasOne::new(
                &parent,
                invoice_def(),
                "order_id",
                "id",
            )));

        // The through member cannot touch; the other two still run
        relation.touch(&db).await.unwrap();

        let receipts = db.table_rows("receipts").await;
        assert!(receipts
            .iter()
            .all(|row| row.contains_key("updated_at")));
        let invoices = db.table_rows("invoices").await;
        assert!(invoices[0].contains_key("updated_at"));
    }

    #[tokio::test]
    async fn test_replacement_swaps_member_in_place() {
        let db = MemoryDatabase::new();
        let parent = order();
        let mut relation = billing(&parent);

        // Only the one-to-one member supports defaults; the other is
        // skipped
        relation
            .invoke(&db, "with_default", &[json!({"status": "draft"})])
            .await
            .unwrap();

        assert_eq!(relation.len(), 2);
        let records = relation.get_results(&db).await.unwrap().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_value("status"), json!("draft"));
        assert_eq!(records[0].model_name(), "Invoice");
    }

    #[tokio::test]
    async fn test_eager_cycle_accumulates_into_collection_slot() {
        let db = seeded().await;
        let mut parents = vec![order()];
        let mut relation = billing(&parents[0]);

        relation.init_relation(&mut parents, "billing").unwrap();
        assert_eq!(
            parents[0].relation("billing"),
            Some(&Related::Many(Vec::new()))
        );

        relation.add_eager_constraints(&parents).unwrap();
        let results = relation.get_eager(&db).await.unwrap().records();
        relation
            .match_eager(&mut parents, &results, "billing")
            .unwrap();

        assert_eq!(parents[0].relation("billing").unwrap().len(), 3);
    }
}
