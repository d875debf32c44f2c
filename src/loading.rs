//! Relation Loading - lazy resolution and batched eager loading
//!
//! The loader drives the relation contract: constrain for the batch,
//! seed default slots, fetch, then distribute results onto their
//! parents. It is unaware whether the relation is primitive or an
//! aggregate.

use tracing::debug;

use crate::backend::Database;
use crate::error::ModelResult;
use crate::model::Record;
use crate::relationships::Relation;

/// Drives relation resolution against a database
pub struct EagerLoader<'a> {
    db: &'a dyn Database,
}

impl<'a> EagerLoader<'a> {
    /// Create a loader over a database handle
    pub fn new(db: &'a dyn Database) -> Self {
        Self { db }
    }

    /// Resolve a relation for one parent and store it under `name`
    pub async fn resolve(
        &self,
        parent: &mut Record,
        name: &str,
        relation: &mut dyn Relation,
    ) -> ModelResult<()> {
        let value = relation.get_results(self.db).await?;
        debug!(
            relation = %relation.kind(),
            name,
            records = value.len(),
            "Resolved relation"
        );
        parent.set_relation(name, value.into());
        Ok(())
    }

    /// Resolve a relation for a batch of parents in one fetch and
    /// distribute the results onto them under `name`
    pub async fn load(
        &self,
        parents: &mut [Record],
        name: &str,
        relation: &mut dyn Relation,
    ) -> ModelResult<()> {
        if parents.is_empty() {
            return Ok(());
        }
        relation.add_eager_constraints(parents)?;
        relation.init_relation(parents, name)?;
        let results = relation.get_eager(self.db).await?.records();
        debug!(
            relation = %relation.kind(),
            name,
            parents = parents.len(),
            results = results.len(),
            "Eager loaded relation"
        );
        relation.match_eager(parents, &results, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{row, MemoryDatabase};
    use crate::factory::RelationFactory;
    use crate::model::{ModelDef, Related};
    use serde_json::json;
    use std::sync::Arc;

    fn orders() -> Vec<Record> {
        let def = Arc::new(ModelDef::new("Order"));
        vec![
            Record::new(def.clone()).with_attribute("id", json!(7)),
            Record::new(def.clone()).with_attribute("id", json!(8)),
            Record::new(def).with_attribute("id", json!(9)),
        ]
    }

    async fn seeded() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.insert_rows(
            "invoices",
            vec![
                row(&[("id", json!(1)), ("order_id", json!(7))]),
                row(&[("id", json!(2)), ("order_id", json!(8))]),
            ],
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

    #[tokio::test]
    async fn test_eager_load_primitive_relation() {
        let db = seeded().await;
        let mut parents = orders();
        let mut relation = parents[0]
            .relate("invoice")
            .has_one(ModelDef::new("Invoice"), None, None)
            .unwrap();

        EagerLoader::new(&db)
            .load(&mut parents, "invoice", relation.as_mut())
            .await
            .unwrap();

        assert_eq!(parents[0].relation("invoice").unwrap().len(), 1);
        assert_eq!(parents[1].relation("invoice").unwrap().len(), 1);
        assert_eq!(parents[2].relation("invoice"), Some(&Related::None));
    }

    #[tokio::test]
    async fn test_eager_load_aggregate_distributes_per_parent() {
        let db = seeded().await;
        let mut parents = orders();
        let mut relation = parents[0]
            .relate("billing")
            .has_one(
                [ModelDef::new("Invoice"), ModelDef::new("Receipt")],
                None,
                None,
            )
            .unwrap();

        EagerLoader::new(&db)
            .load(&mut parents, "billing", relation.as_mut())
            .await
            .unwrap();

        // Order 7 holds an invoice and two receipts were fetched, but the
        // one-to-one member contributes only its first match
        assert_eq!(parents[0].relation("billing").unwrap().len(), 2);
        assert_eq!(parents[1].relation("billing").unwrap().len(), 1);
        assert_eq!(parents[2].relation("billing").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_resolve_stores_lazy_result() {
        let db = seeded().await;
        let mut parents = orders();
        let mut relation = parents[0]
            .relate("invoice")
            .has_one(ModelDef::new("Invoice"), None, None)
            .unwrap();

        let mut parent = parents.remove(0);
        EagerLoader::new(&db)
            .resolve(&mut parent, "invoice", relation.as_mut())
            .await
            .unwrap();

        let invoice = parent.relation("invoice").unwrap().as_one().unwrap();
        assert_eq!(invoice.get_value("id"), json!(1));
    }

    #[tokio::test]
    async fn test_empty_parent_batch_is_a_no_op() {
        let db = MemoryDatabase::new();
        let orders = orders();
        let mut relation = orders[0]
            .relate("invoice")
            .has_one(ModelDef::new("Invoice"), None, None)
            .unwrap();

        let mut parents: Vec<Record> = Vec::new();
        EagerLoader::new(&db)
            .load(&mut parents, "invoice", relation.as_mut())
            .await
            .unwrap();
    }
}
