//! Relation Factory - relationship declaration with single or plural targets
//!
//! `RelationFactory` carries the eight standard declaration methods. Each
//! accepts one target model or an ordered list of them; a single target
//! produces the primitive relation unchanged, a list fans out into one
//! primitive per target folded into a `MetaRelation`. Key parameters
//! default by convention, resolved against the declaring record and the
//! registered relation name.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::warn;

use crate::conventions;
use crate::error::{ModelError, ModelResult};
use crate::model::{ModelDef, Record};
use crate::relationships::{
    BelongsTo, BelongsToMany, HasMany, HasManyThrough, HasOne, MetaRelation, MorphMany, MorphOne,
    MorphToMany, Relation,
};

/// One target model or an ordered list of them
#[derive(Debug, Clone)]
pub enum Targets {
    /// A single target; declaration yields the primitive relation
    One(Arc<ModelDef>),
    /// A target list; declaration yields an aggregate, one member per
    /// target in list order
    Many(Vec<Arc<ModelDef>>),
}

impl Targets {
    fn into_parts(self) -> (Vec<Arc<ModelDef>>, bool) {
        match self {
            Targets::One(def) => (vec![def], true),
            Targets::Many(defs) => (defs, false),
        }
    }
}

impl From<Arc<ModelDef>> for Targets {
    fn from(def: Arc<ModelDef>) -> Self {
        Targets::One(def)
    }
}

impl From<&Arc<ModelDef>> for Targets {
    fn from(def: &Arc<ModelDef>) -> Self {
        Targets::One(def.clone())
    }
}

impl From<ModelDef> for Targets {
    fn from(def: ModelDef) -> Self {
        Targets::One(Arc::new(def))
    }
}

impl From<Vec<Arc<ModelDef>>> for Targets {
    fn from(defs: Vec<Arc<ModelDef>>) -> Self {
        Targets::Many(defs)
    }
}

impl From<Vec<ModelDef>> for Targets {
    fn from(defs: Vec<ModelDef>) -> Self {
        Targets::Many(defs.into_iter().map(Arc::new).collect())
    }
}

impl<const N: usize> From<[Arc<ModelDef>; N]> for Targets {
    fn from(defs: [Arc<ModelDef>; N]) -> Self {
        Targets::Many(defs.to_vec())
    }
}

impl<const N: usize> From<[ModelDef; N]> for Targets {
    fn from(defs: [ModelDef; N]) -> Self {
        Targets::Many(defs.into_iter().map(Arc::new).collect())
    }
}

/// Build one relation per target, folding a plural declaration into an
/// aggregate
fn fan_out<F>(
    parent: &Record,
    targets: Targets,
    operation: &str,
    mut build: F,
) -> ModelResult<Box<dyn Relation>>
where
    F: FnMut(Arc<ModelDef>) -> Box<dyn Relation>,
{
    match targets {
        Targets::One(def) => Ok(build(def)),
        Targets::Many(defs) => {
            if defs.is_empty() {
                return Err(ModelError::Validation(format!(
                    "{} requires at least one target model",
                    operation
                )));
            }
            let mut seen = BTreeSet::new();
            for def in &defs {
                if !seen.insert(def.name.clone()) {
                    // Legal, but the merged results will repeat that model's rows
                    warn!(operation, model = %def.name, "Duplicate target model in declaration");
                }
            }
            let mut meta = MetaRelation::new(parent);
            for def in defs {
                meta = meta.merge(build(def));
            }
            Ok(Box::new(meta))
        }
    }
}

/// Relationship declaration surface for a record.
///
/// Implementors provide the declaring record and the registered relation
/// name; the declaration methods are supplied. The relation name seeds
/// naming conventions (the belongs-to foreign key), so it is resolved
/// once per declaration and shared by every generated member.
pub trait RelationFactory {
    /// The record declaring the relation
    fn parent(&self) -> &Record;

    /// The registered name of the relation being declared
    fn relation_name(&self) -> &str;

    /// Declare a one-to-one relationship
    fn has_one(
        &self,
        targets: impl Into<Targets>,
        foreign_key: Option<&str>,
        local_key: Option<&str>,
    ) -> ModelResult<Box<dyn Relation>> {
        let parent = self.parent();
        let foreign_key = foreign_key
            .map(str::to_string)
            .unwrap_or_else(|| parent.definition().foreign_key());
        let local_key = local_key
            .map(str::to_string)
            .unwrap_or_else(|| parent.definition().primary_key.clone());
        fan_out(parent, targets.into(), "has_one", |related| {
            Box::new(HasOne::new(
                parent,
                related,
                foreign_key.clone(),
                local_key.clone(),
            ))
        })
    }

    /// Declare a one-to-many relationship
    fn has_many(
        &self,
        targets: impl Into<Targets>,
        foreign_key: Option<&str>,
        local_key: Option<&str>,
    ) -> ModelResult<Box<dyn Relation>> {
        let parent = self.parent();
        let foreign_key = foreign_key
            .map(str::to_string)
            .unwrap_or_else(|| parent.definition().foreign_key());
        let local_key = local_key
            .map(str::to_string)
            .unwrap_or_else(|| parent.definition().primary_key.clone());
        fan_out(parent, targets.into(), "has_many", |related| {
            Box::new(HasMany::new(
                parent,
                related,
                foreign_key.clone(),
                local_key.clone(),
            ))
        })
    }

    /// Declare the inverse side of a one-to-one or one-to-many
    /// relationship.
    ///
    /// Without an explicit foreign key, the key is derived from the
    /// relation name (`relation` argument, else the registered name),
    /// resolved before fanning out so every member of a plural
    /// declaration reads the same column.
    fn belongs_to(
        &self,
        targets: impl Into<Targets>,
        foreign_key: Option<&str>,
        owner_key: Option<&str>,
        relation: Option<&str>,
    ) -> ModelResult<Box<dyn Relation>> {
        let parent = self.parent();
        let name = conventions::snake_case(relation.unwrap_or_else(|| self.relation_name()));
        let foreign_key = foreign_key.map(str::to_string);
        let owner_key = owner_key.map(str::to_string);
        fan_out(parent, targets.into(), "belongs_to", move |related| {
            let owner_key = owner_key
                .clone()
                .unwrap_or_else(|| related.primary_key.clone());
            let foreign_key = foreign_key
                .clone()
                .unwrap_or_else(|| format!("{}_{}", name, owner_key));
            Box::new(BelongsTo::new(parent, related, foreign_key, owner_key))
        })
    }

    /// Declare a one-to-many relationship reached through an intermediate
    /// model.
    ///
    /// Both the target and the intermediate accept lists; when either is
    /// plural the aggregate covers the full target-by-intermediate cross
    /// product, targets outermost.
    fn has_many_through(
        &self,
        targets: impl Into<Targets>,
        through: impl Into<Targets>,
        first_key: Option<&str>,
        second_key: Option<&str>,
        local_key: Option<&str>,
    ) -> ModelResult<Box<dyn Relation>> {
        let parent = self.parent();
        let first_key = first_key
            .map(str::to_string)
            .unwrap_or_else(|| parent.definition().foreign_key());
        let local_key = local_key
            .map(str::to_string)
            .unwrap_or_else(|| parent.definition().primary_key.clone());
        let second_key = second_key.map(str::to_string);

        let (related_defs, related_single) = targets.into().into_parts();
        let (through_defs, through_single) = through.into().into_parts();
        if related_defs.is_empty() || through_defs.is_empty() {
            return Err(ModelError::Validation(
                "has_many_through requires at least one target and one intermediate model"
                    .to_string(),
            ));
        }

        let build = |related: &Arc<ModelDef>, through: &Arc<ModelDef>| -> Box<dyn Relation> {
            let second_key = second_key
                .clone()
                .unwrap_or_else(|| through.foreign_key());
            Box::new(HasManyThrough::new(
                parent,
                related.clone(),
                through.clone(),
                first_key.clone(),
                second_key,
                local_key.clone(),
            ))
        };

        if related_single && through_single {
            return Ok(build(&related_defs[0], &through_defs[0]));
        }
        let mut meta = MetaRelation::new(parent);
        for related in &related_defs {
            for through in &through_defs {
                meta = meta.merge(build(related, through));
            }
        }
        Ok(Box::new(meta))
    }

    /// Declare a polymorphic one-to-one relationship
    fn morph_one(
        &self,
        targets: impl Into<Targets>,
        name: &str,
        type_column: Option<&str>,
        id_column: Option<&str>,
        local_key: Option<&str>,
    ) -> ModelResult<Box<dyn Relation>> {
        let parent = self.parent();
        let (default_type, default_id) = conventions::morph_columns(name);
        let morph_type = type_column.map(str::to_string).unwrap_or(default_type);
        let morph_id = id_column.map(str::to_string).unwrap_or(default_id);
        let local_key = local_key
            .map(str::to_string)
            .unwrap_or_else(|| parent.definition().primary_key.clone());
        fan_out(parent, targets.into(), "morph_one", |related| {
            Box::new(MorphOne::new(
                parent,
                related,
                morph_type.clone(),
                morph_id.clone(),
                local_key.clone(),
            ))
        })
    }

    /// Declare a polymorphic one-to-many relationship
    fn morph_many(
        &self,
        targets: impl Into<Targets>,
        name: &str,
        type_column: Option<&str>,
        id_column: Option<&str>,
        local_key: Option<&str>,
    ) -> ModelResult<Box<dyn Relation>> {
        let parent = self.parent();
        let (default_type, default_id) = conventions::morph_columns(name);
        let morph_type = type_column.map(str::to_string).unwrap_or(default_type);
        let morph_id = id_column.map(str::to_string).unwrap_or(default_id);
        let local_key = local_key
            .map(str::to_string)
            .unwrap_or_else(|| parent.definition().primary_key.clone());
        fan_out(parent, targets.into(), "morph_many", |related| {
            Box::new(MorphMany::new(
                parent,
                related,
                morph_type.clone(),
                morph_id.clone(),
                local_key.clone(),
            ))
        })
    }

    /// Declare a many-to-many relationship through a pivot table
    fn belongs_to_many(
        &self,
        targets: impl Into<Targets>,
        table: Option<&str>,
        foreign_pivot_key: Option<&str>,
        related_pivot_key: Option<&str>,
        parent_key: Option<&str>,
        related_key: Option<&str>,
    ) -> ModelResult<Box<dyn Relation>> {
        let parent = self.parent();
        let foreign_pivot_key = foreign_pivot_key
            .map(str::to_string)
            .unwrap_or_else(|| parent.definition().foreign_key());
        let parent_key = parent_key
            .map(str::to_string)
            .unwrap_or_else(|| parent.definition().primary_key.clone());
        let table = table.map(str::to_string);
        let related_pivot_key = related_pivot_key.map(str::to_string);
        let related_key = related_key.map(str::to_string);
        fan_out(parent, targets.into(), "belongs_to_many", move |related| {
            let table = table.clone().unwrap_or_else(|| {
                conventions::pivot_table(parent.model_name(), &related.name)
            });
            let related_pivot_key = related_pivot_key
                .clone()
                .unwrap_or_else(|| related.foreign_key());
            let related_key = related_key
                .clone()
                .unwrap_or_else(|| related.primary_key.clone());
            Box::new(BelongsToMany::new(
                parent,
                related,
                table,
                foreign_pivot_key.clone(),
                related_pivot_key,
                parent_key.clone(),
                related_key,
            ))
        })
    }

    /// Declare a polymorphic many-to-many relationship.
    ///
    /// `inverse` declares from the plain side towards the morphed side,
    /// flipping the pivot key defaults and the morph class.
    #[allow(clippy::too_many_arguments)]
    fn morph_to_many(
        &self,
        targets: impl Into<Targets>,
        name: &str,
        table: Option<&str>,
        foreign_pivot_key: Option<&str>,
        related_pivot_key: Option<&str>,
        parent_key: Option<&str>,
        related_key: Option<&str>,
        inverse: bool,
    ) -> ModelResult<Box<dyn Relation>> {
        let parent = self.parent();
        let (morph_type, morph_id) = conventions::morph_columns(name);
        let table = table
            .map(str::to_string)
            .unwrap_or_else(|| conventions::pluralize(name));
        let foreign_pivot_key = foreign_pivot_key.map(str::to_string).unwrap_or_else(|| {
            if inverse {
                parent.definition().foreign_key()
            } else {
                morph_id.clone()
            }
        });
        let parent_key = parent_key
            .map(str::to_string)
            .unwrap_or_else(|| parent.definition().primary_key.clone());
        let related_pivot_key = related_pivot_key.map(str::to_string);
        let related_key = related_key.map(str::to_string);
        fan_out(parent, targets.into(), "morph_to_many", move |related| {
            let related_pivot_key = related_pivot_key.clone().unwrap_or_else(|| {
                if inverse {
                    morph_id.clone()
                } else {
                    related.foreign_key()
                }
            });
            let related_key = related_key
                .clone()
                .unwrap_or_else(|| related.primary_key.clone());
            Box::new(MorphToMany::new(
                parent,
                related,
                table.clone(),
                morph_type.clone(),
                foreign_pivot_key.clone(),
                related_pivot_key,
                parent_key.clone(),
                related_key,
                inverse,
            ))
        })
    }
}

/// Declaration context for one named relation of a record
#[derive(Debug, Clone)]
pub struct RelationBuilder<'a> {
    parent: &'a Record,
    name: String,
}

impl<'a> RelationBuilder<'a> {
    /// Create a declaration context; the name is the relation's
    /// registered name on the declaring record
    pub fn new(parent: &'a Record, name: &str) -> Self {
        Self {
            parent,
            name: name.to_string(),
        }
    }
}

impl RelationFactory for RelationBuilder<'_> {
    fn parent(&self) -> &Record {
        self.parent
    }

    fn relation_name(&self) -> &str {
        &self.name
    }
}
