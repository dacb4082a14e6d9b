//! Entity type and deterministic identity.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Concept,
    Event,
    Object,
    Place,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Concept => "CONCEPT",
            EntityType::Event => "EVENT",
            EntityType::Object => "OBJECT",
            EntityType::Place => "PLACE",
        }
    }
}

/// Lowercase, trim, collapse whitespace to `_`, strip non-`[a-z0-9_]`.
pub fn normalize(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_was_space = false;
    for c in lower.chars() {
        if c.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push('_');
            }
            last_was_space = true;
        } else if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim_end_matches('_').to_string()
}

/// `H(persona_id ‖ normalized_name ‖ type)`, truncated SHA-256.
pub fn entity_id(persona_id: &str, normalized_name: &str, entity_type: EntityType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(persona_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalized_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(entity_type.as_str().as_bytes());
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
pub struct Entity {
    pub id: String,
    pub persona_id: String,
    pub vector_id: Option<String>,
    pub entity_type: EntityType,
    pub name: String,
    pub normalized_name: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, JsonValue>,
    pub confidence: f32,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Entity {
    pub fn relationship_count_key(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_strips_punctuation() {
        assert_eq!(normalize("  Alice   Smith! "), "alice_smith");
    }

    #[test]
    fn entity_id_is_deterministic() {
        let a = entity_id("p1", "alice", EntityType::Person);
        let b = entity_id("p1", "alice", EntityType::Person);
        assert_eq!(a, b);
        let c = entity_id("p1", "alice", EntityType::Place);
        assert_ne!(a, c);
    }
}
