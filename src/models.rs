//! Diesel ORM models backing [`crate::schema`]'s four persistence tables.
//!
//! These are the on-disk counterparts of the in-memory types used by
//! [`crate::graph`] and [`crate::arena`]; conversions between the two live
//! on those modules, not here, to keep the persistence layer a pure
//! row/column mapping.

use diesel::prelude::*;

#[derive(Queryable, Identifiable, Insertable, Debug, Selectable, Clone)]
#[diesel(table_name = crate::schema::personas)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Persona {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    /// Serialized `serde_json::Value` — free-form per-persona settings.
    pub config: String,
    pub max_memory_size: i32,
    pub memory_decay_time_ms: i64,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Queryable, Identifiable, Associations, Insertable, Debug, Selectable, Clone)]
#[diesel(belongs_to(Persona, foreign_key = persona_id))]
#[diesel(table_name = crate::schema::vector_metadata)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct VectorMetadataRow {
    pub id: String,
    pub persona_id: Option<String>,
    pub dimensions: i32,
    pub content_type: String,
    pub source: Option<String>,
    /// JSON array of tags.
    pub tags: String,
    /// Serialized `CustomMetadata`.
    pub custom: String,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

#[derive(Queryable, Identifiable, Associations, Insertable, Debug, Selectable, Clone)]
#[diesel(belongs_to(Persona, foreign_key = persona_id))]
#[diesel(table_name = crate::schema::entities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EntityRow {
    pub id: String,
    pub persona_id: String,
    pub vector_id: Option<String>,
    pub entity_type: String,
    pub name: String,
    pub normalized_name: String,
    /// Serialized `serde_json::Map`.
    pub properties: String,
    pub confidence: f32,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Queryable, Identifiable, Associations, Insertable, Debug, Selectable, Clone)]
#[diesel(belongs_to(Persona, foreign_key = persona_id))]
#[diesel(table_name = crate::schema::relationships)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RelationshipRow {
    pub id: String,
    pub persona_id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: String,
    pub strength: f32,
    pub context: Option<String>,
    /// Serialized `RelationshipProperties`.
    pub properties: String,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&crate::graph::Entity> for EntityRow {
    fn from(e: &crate::graph::Entity) -> Self {
        Self {
            id: e.id.clone(),
            persona_id: e.persona_id.clone(),
            vector_id: e.vector_id.clone(),
            entity_type: e.entity_type.as_str().to_string(),
            name: e.name.clone(),
            normalized_name: e.normalized_name.clone(),
            properties: serde_json::to_string(&e.properties).unwrap_or_default(),
            confidence: e.confidence,
            content_hash: e.content_hash.clone(),
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}
