//! Per-persona knowledge graph: entities, relationships, and the store that
//! owns them.

pub mod entity;
pub mod relationship;
pub mod store;

pub use entity::{normalize, Entity, EntityType};
pub use relationship::{Relationship, RelationshipType};
pub use store::{
    content_hash, EntitySearchOptions, FindRelatedOptions, GraphContext, GraphContextOptions,
    GraphStatistics, GraphStore, NewEntity, NewRelationship, RelatedEntity,
};
