//! # manifold-orm: Relationship Fan-Out for Record Models
//!
//! An ORM relationship layer where one declared relationship can target
//! several models at once. Declarations with a single target build the
//! usual primitive relation; declarations with a list of targets build
//! one primitive relation per target and fold them into a `MetaRelation`
//! that speaks the same relation contract, merging member results into
//! one ordered collection.
//!
//! The crate ships the eight standard relation kinds, the aggregate,
//! conventional key inference, an eager loader, and two database
//! backends (PostgreSQL and an in-memory store for tests).

pub mod backend;
pub mod conventions;
pub mod error;
pub mod factory;
pub mod loading;
pub mod model;
pub mod query;
pub mod relationships;

// Re-export core traits and types
pub use backend::{Database, DatabaseConfig, MemoryDatabase, PostgresDatabase, Row};
pub use error::{ModelError, ModelResult, OrmError, OrmResult};
pub use factory::{RelationBuilder, RelationFactory, Targets};
pub use loading::EagerLoader;
pub use model::{ModelDef, Record, Related};
pub use query::{
    JoinClause, Mutation, OrderByClause, OrderDirection, QueryBuilder, QueryOperator,
    SelectColumn, WhereCondition,
};
pub use relationships::{
    BelongsTo, BelongsToMany, HasMany, HasManyThrough, HasOne, MetaRelation, MorphMany, MorphOne,
    MorphToMany, Relation, RelationValue, RelationshipType,
};
