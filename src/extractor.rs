//! # Entity extractor
//!
//! Deterministic, regex-based recognizer for `PERSON`/`CONCEPT`/`EVENT`/
//! `OBJECT`/`PLACE` entities plus co-occurrence relationship inference.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::graph::{EntityType, RelationshipType};

const MAX_ENTITIES: usize = 20;
const CO_OCCURRENCE_WINDOW: usize = 200;
const CONTEXT_RADIUS: usize = 100;

#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    pub entity_type: EntityType,
    pub name: String,
    pub confidence: f32,
    pub context: String,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct ExtractedRelationship {
    pub source_name: String,
    pub target_name: String,
    pub relationship_type: RelationshipType,
    pub strength: f32,
    pub context: Option<String>,
}

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "that", "this", "from", "have", "has", "was", "were",
        "are", "you", "your", "our", "their", "his", "her",
    ]
    .into_iter()
    .collect()
});

static TECH_VOCAB: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "database", "algorithm", "machine learning", "neural network", "api", "framework",
        "architecture", "pipeline", "protocol", "compiler", "interpreter", "cache",
    ]
    .into_iter()
    .collect()
});

static DATE_TOKENS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["yesterday", "today", "tomorrow", "last week", "next week", "last month"]
        .into_iter()
        .collect()
});

static ACTION_VERBS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["happened", "scheduled", "occurred", "planned", "held"]
        .into_iter()
        .collect()
});

struct Pattern {
    entity_type: EntityType,
    regex: Regex,
}

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            entity_type: EntityType::Person,
            regex: Regex::new(r"\b([A-Z][a-z]+(?:\s[A-Z][a-z]+){0,2})\b").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Person,
            regex: Regex::new(r"(?i)\b(?:named|called|user named)\s+([A-Za-z]+)").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Person,
            regex: Regex::new(r"\b([a-zA-Z0-9._%+-]+)@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Person,
            regex: Regex::new(r"@(\w+)").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Concept,
            regex: Regex::new(r#""([^"]{3,60})""#).unwrap(),
        },
        Pattern {
            entity_type: EntityType::Concept,
            regex: Regex::new(r"(?i)(?:concept of|theory of)\s+([a-zA-Z][a-zA-Z ]{2,40})").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Event,
            regex: Regex::new(r"(?i)\b(meeting|conference|workshop)\s+(?:about|on|for)\s+([a-zA-Z][a-zA-Z0-9 ]{2,60})").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Event,
            regex: Regex::new(r"(?i)\b([A-Z][a-z]+ \d{1,2},? \d{4})\b").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Object,
            regex: Regex::new(r"\b([\w.-]+\.(?:rs|py|js|ts|json|toml|yaml|yml|md|txt|csv))\b").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Object,
            regex: Regex::new(r"(?i)\busing\s+([A-Za-z][A-Za-z0-9+. -]{1,40})").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Object,
            regex: Regex::new(r"\b([A-Z][A-Za-z]+ (?:app|application|tool|platform|service))\b").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Place,
            regex: Regex::new(r"(?i)\b(?:in|at|from)\s+([A-Z][a-zA-Z]+(?:,\s*[A-Z][a-zA-Z]+)?)").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Place,
            regex: Regex::new(r"\b([A-Z][A-Za-z&]+(?:\s[A-Z][A-Za-z]+)*\s(?:Inc|LLC|Corp|Ltd)\.?)\b").unwrap(),
        },
        Pattern {
            entity_type: EntityType::Place,
            regex: Regex::new(r"https?://([a-zA-Z0-9.-]+)").unwrap(),
        },
    ]
});

fn clean_name(entity_type: EntityType, raw: &str) -> String {
    let trimmed = raw.trim();
    match entity_type {
        EntityType::Person | EntityType::Concept | EntityType::Place => title_case(trimmed),
        EntityType::Object => trimmed.to_string(),
        EntityType::Event => trimmed.to_lowercase(),
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_valid(entity_type: EntityType, name: &str) -> bool {
    let len = name.chars().count();
    if !(2..=100).contains(&len) {
        return false;
    }
    if STOPWORDS.contains(name.to_lowercase().as_str()) {
        return false;
    }
    if name.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    match entity_type {
        EntityType::Person | EntityType::Place => {
            name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
        }
        EntityType::Concept => len >= 3,
        EntityType::Event => len >= 5,
        EntityType::Object => true,
    }
}

fn confidence_for(entity_type: EntityType, name: &str, text: &str) -> f32 {
    let mut c = 0.5f32;
    if name.split_whitespace().count() > 1 {
        c += 0.1;
    }
    let lower = name.to_lowercase();
    if TECH_VOCAB.iter().any(|v| lower.contains(v)) {
        c += 0.2;
    }
    if entity_type == EntityType::Object && lower.contains('.') {
        c += 0.3;
    }
    if entity_type == EntityType::Event && DATE_TOKENS.iter().any(|d| text.to_lowercase().contains(d)) {
        c += 0.2;
    }
    let text_lower = text.to_lowercase();
    if ACTION_VERBS.iter().any(|v| text_lower.contains(v)) {
        c += 0.05;
    }
    c.clamp(0.1, 1.0)
}

/// Run the full extraction pipeline over `text`.
pub fn extract_entities(text: &str) -> Vec<ExtractedEntity> {
    let mut found: Vec<ExtractedEntity> = Vec::new();

    for pattern in PATTERNS.iter() {
        for caps in pattern.regex.captures_iter(text) {
            let Some(m) = caps.get(caps.len() - 1) else { continue };
            let cleaned = clean_name(pattern.entity_type, m.as_str());
            if !is_valid(pattern.entity_type, &cleaned) {
                continue;
            }
            let confidence = confidence_for(pattern.entity_type, &cleaned, text);
            let start = m.start().saturating_sub(CONTEXT_RADIUS);
            let end = (m.end() + CONTEXT_RADIUS).min(text.len());
            let context = safe_slice(text, start, end);
            found.push(ExtractedEntity {
                entity_type: pattern.entity_type,
                name: cleaned,
                confidence,
                context,
                offset: m.start(),
            });
        }
    }

    // Dedup by (type, lowercase name), keeping the highest confidence.
    let mut best: std::collections::HashMap<(EntityType, String), ExtractedEntity> =
        std::collections::HashMap::new();
    for e in found {
        let key = (e.entity_type, e.name.to_lowercase());
        match best.get(&key) {
            Some(existing) if existing.confidence >= e.confidence => {}
            _ => {
                best.insert(key, e);
            }
        }
    }

    let mut out: Vec<ExtractedEntity> = best.into_values().collect();
    out.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    out.truncate(MAX_ENTITIES);
    out
}

fn safe_slice(text: &str, mut start: usize, mut end: usize) -> String {
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].to_string()
}

fn refine_relationship(
    a: &ExtractedEntity,
    b: &ExtractedEntity,
    between: &str,
    distance: usize,
) -> ExtractedRelationship {
    let (mut rel_type, mut strength) = match (a.entity_type, b.entity_type) {
        (EntityType::Person, EntityType::Person) => (RelationshipType::Knows, 0.6),
        (EntityType::Person, EntityType::Concept) => (RelationshipType::WorksWith, 0.7),
        (EntityType::Person, EntityType::Place) => (RelationshipType::LocatedAt, 0.5),
        (EntityType::Concept, EntityType::Object) => (RelationshipType::ImplementedIn, 0.8),
        (EntityType::Event, EntityType::Person) => (RelationshipType::Involves, 0.7),
        _ => (RelationshipType::Mentions, 0.3),
    };

    let lower_between = between.to_lowercase();
    if lower_between.contains(" and ") || lower_between.contains(" with ") {
        strength += 0.1;
    }
    if lower_between.contains(" uses ") || lower_between.contains(" using ") {
        rel_type = RelationshipType::Uses;
        strength += 0.2;
    }
    if lower_between.contains(" works ") || lower_between.contains(" working ") {
        rel_type = RelationshipType::WorksWith;
        strength += 0.1;
    }
    if distance < 50 {
        strength += 0.1;
    }
    if distance < 20 {
        strength += 0.1;
    }

    ExtractedRelationship {
        source_name: a.name.clone(),
        target_name: b.name.clone(),
        relationship_type: rel_type,
        strength: strength.clamp(0.1, 1.0),
        context: Some(between.trim().to_string()).filter(|s| !s.is_empty()),
    }
}

/// Infer co-occurrence relationships between every unordered pair of
/// entities whose closest mentions are within 200 characters.
pub fn infer_relationships(text: &str, entities: &[ExtractedEntity]) -> Vec<ExtractedRelationship> {
    let mut out = Vec::new();
    for i in 0..entities.len() {
        for j in (i + 1)..entities.len() {
            let a = &entities[i];
            let b = &entities[j];
            if a.name.eq_ignore_ascii_case(&b.name) {
                continue;
            }
            let distance = a.offset.abs_diff(b.offset);
            if distance > CO_OCCURRENCE_WINDOW {
                continue;
            }
            let (lo, hi) = if a.offset < b.offset {
                (a.offset, b.offset)
            } else {
                (b.offset, a.offset)
            };
            let between = safe_slice(text, lo.min(text.len()), hi.min(text.len()));
            out.push(refine_relationship(a, b, &between, distance));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_person_and_place() {
        let text = "Alice works at Acme Corp on machine learning.";
        let entities = extract_entities(text);
        assert!(entities.iter().any(|e| e.entity_type == EntityType::Person && e.name == "Alice"));
    }

    #[test]
    fn rejects_lowercase_person() {
        assert!(!is_valid(EntityType::Person, "alice"));
    }

    #[test]
    fn rejects_digits_only() {
        assert!(!is_valid(EntityType::Concept, "12345"));
    }

    #[test]
    fn rejects_out_of_range_length() {
        assert!(!is_valid(EntityType::Concept, "a"));
        let long = "a".repeat(101);
        assert!(!is_valid(EntityType::Concept, &long));
    }

    #[test]
    fn extraction_is_idempotent() {
        let text = "Bob met Carol at Example Inc to discuss the database architecture.";
        let first = extract_entities(text);
        let second = extract_entities(text);
        let names_a: Vec<&str> = first.iter().map(|e| e.name.as_str()).collect();
        let names_b: Vec<&str> = second.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn caps_at_twenty_entities() {
        let mut text = String::new();
        for i in 0..30 {
            text.push_str(&format!("Person{i} Lastname{i}. "));
        }
        let entities = extract_entities(&text);
        assert!(entities.len() <= MAX_ENTITIES);
    }

    #[test]
    fn infers_person_person_relationship_within_window() {
        let text = "Alice Smith and Bob Jones had lunch together.";
        let entities = extract_entities(text);
        let rels = infer_relationships(text, &entities);
        assert!(rels.iter().any(|r| r.relationship_type == RelationshipType::Knows));
    }

    #[test]
    fn distant_entities_yield_no_relationship() {
        let mut text = "Alice Smith ".to_string();
        text.push_str(&"filler ".repeat(60));
        text.push_str("Bob Jones");
        let entities = extract_entities(&text);
        let rels = infer_relationships(&text, &entities);
        assert!(rels.is_empty());
    }
}
