//! Relationship type and deterministic identity.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Mentions,
    Knows,
    WorksWith,
    LocatedAt,
    ImplementedIn,
    Involves,
    Uses,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Mentions => "MENTIONS",
            RelationshipType::Knows => "KNOWS",
            RelationshipType::WorksWith => "WORKS_WITH",
            RelationshipType::LocatedAt => "LOCATED_AT",
            RelationshipType::ImplementedIn => "IMPLEMENTED_IN",
            RelationshipType::Involves => "INVOLVES",
            RelationshipType::Uses => "USES",
        }
    }
}

/// `H(persona_id ‖ source ‖ target ‖ type)`, truncated SHA-256.
pub fn relationship_id(
    persona_id: &str,
    source_entity_id: &str,
    target_entity_id: &str,
    relationship_type: RelationshipType,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(persona_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(source_entity_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(target_entity_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(relationship_type.as_str().as_bytes());
    let digest = hasher.finalize();
    to_hex(&digest[..16])
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub persona_id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: RelationshipType,
    pub strength: f32,
    pub context: Option<String>,
    #[serde(default)]
    pub properties: RelationshipProperties,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipProperties {
    #[serde(default)]
    pub update_count: u32,
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default)]
    pub extra: serde_json::Map<String, JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_id_is_deterministic() {
        let a = relationship_id("p1", "e1", "e2", RelationshipType::Knows);
        let b = relationship_id("p1", "e1", "e2", RelationshipType::Knows);
        assert_eq!(a, b);
        let c = relationship_id("p1", "e2", "e1", RelationshipType::Knows);
        assert_ne!(a, c);
    }
}
