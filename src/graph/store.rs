//! Per-persona knowledge graph store.
//!
//! Each persona gets its own [`PersonaGraph`], guarded by its own
//! `parking_lot::RwLock` inside a `DashMap` keyed by persona id — writers
//! on different personas never contend.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use md5::{Digest, Md5};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{EngineError, NotFoundKind, Result};

use super::entity::{entity_id, normalize, Entity, EntityType};
use super::relationship::{relationship_id, Relationship, RelationshipProperties, RelationshipType};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// MD5 of a canonicalized (sorted-key) JSON document; a fingerprint, not a
/// security boundary.
pub fn content_hash(value: &JsonValue) -> String {
    let canonical = canonicalize(value);
    let mut hasher = Md5::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        JsonValue::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntity {
    pub entity_type: EntityType,
    pub name: String,
    pub vector_id: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, JsonValue>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRelationship {
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: RelationshipType,
    pub strength: f32,
    pub context: Option<String>,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub entities_processed: usize,
    pub entities_failed: usize,
    pub relationships_processed: usize,
    pub relationships_failed: usize,
    pub id_mappings: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct FindRelatedOptions {
    pub max_depth: usize,
    pub limit: usize,
    pub min_strength: f32,
    pub entity_types: Option<HashSet<EntityType>>,
    pub relationship_types: Option<HashSet<RelationshipType>>,
}

#[derive(Debug, Clone)]
pub struct RelatedEntity {
    pub entity: Entity,
    pub depth: usize,
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphContextOptions {
    pub include_relationships: bool,
    pub max_relationships: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub connections: Vec<(String, String, RelationshipType)>,
}

#[derive(Debug, Clone)]
pub struct EntitySearchOptions {
    pub limit: usize,
    pub min_confidence: f32,
    pub entity_type: Option<EntityType>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphStatistics {
    pub total_entities: usize,
    pub total_relationships: usize,
    pub entities_by_type: HashMap<String, (usize, f32)>,
    pub relationships_by_type: HashMap<String, (usize, f32)>,
    pub graph_density: f32,
    pub avg_relationships_per_entity: f32,
    pub complexity: &'static str,
}

/// One persona's entities and relationships. Never accessed directly by
/// callers outside [`GraphStore`] — always behind its own lock.
#[derive(Debug, Default)]
struct PersonaGraph {
    entities: HashMap<String, Entity>,
    relationships: HashMap<String, Relationship>,
    /// Secondary index: `(normalized_name, type) -> entity id`.
    by_name_type: HashMap<(String, EntityType), String>,
    /// Secondary index: `vector_id -> entity ids`.
    by_vector: HashMap<String, HashSet<String>>,
    /// Adjacency for BFS: `entity_id -> relationship ids incident on it`.
    adjacency: HashMap<String, HashSet<String>>,
}

impl PersonaGraph {
    fn link_adjacency(&mut self, rel: &Relationship) {
        self.adjacency
            .entry(rel.source_entity_id.clone())
            .or_default()
            .insert(rel.id.clone());
        self.adjacency
            .entry(rel.target_entity_id.clone())
            .or_default()
            .insert(rel.id.clone());
    }

    fn unlink_adjacency(&mut self, rel: &Relationship) {
        if let Some(set) = self.adjacency.get_mut(&rel.source_entity_id) {
            set.remove(&rel.id);
        }
        if let Some(set) = self.adjacency.get_mut(&rel.target_entity_id) {
            set.remove(&rel.id);
        }
    }
}

/// Per-persona entities/relationships with deterministic ids and
/// UNIQUE-constraint reconciliation.
pub struct GraphStore {
    personas: DashMap<String, Arc<RwLock<PersonaGraph>>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            personas: DashMap::new(),
        }
    }

    fn persona(&self, persona_id: &str) -> Arc<RwLock<PersonaGraph>> {
        self.personas
            .entry(persona_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(PersonaGraph::default())))
            .clone()
    }

    /// Create or merge an entity.
    pub fn create_entity(&self, persona_id: &str, data: NewEntity) -> Result<String> {
        let normalized = normalize(&data.name);
        let id = entity_id(persona_id, &normalized, data.entity_type);
        let graph = self.persona(persona_id);
        let mut guard = graph.write();

        if let Some(existing) = guard.entities.get(&id).cloned() {
            if data.confidence > existing.confidence {
                let mut merged = existing.clone();
                for (k, v) in data.properties.iter() {
                    merged.properties.insert(k.clone(), v.clone());
                }
                merged.confidence = data.confidence;
                if let Some(vid) = data.vector_id {
                    merged.vector_id = Some(vid);
                }
                merged.content_hash = content_hash(&JsonValue::Object(merged.properties.clone()));
                merged.updated_at = now_ms();
                guard.entities.insert(id.clone(), merged);
            }
            return Ok(id);
        }

        // Reconciliation fallback: another writer materialized this identity
        // between our id computation and the insert attempt. Under the
        // per-persona write lock this window cannot actually open, but the
        // secondary index lookup is kept as the documented recovery path.
        if let Some(existing_id) = guard.by_name_type.get(&(normalized.clone(), data.entity_type)) {
            if existing_id != &id {
                tracing::debug!(persona_id, existing_id, computed_id = %id, "entity id reconciliation");
                return Ok(existing_id.clone());
            }
        }

        let now = now_ms();
        let entity = Entity {
            id: id.clone(),
            persona_id: persona_id.to_string(),
            vector_id: data.vector_id.clone(),
            entity_type: data.entity_type,
            name: data.name.clone(),
            normalized_name: normalized.clone(),
            properties: data.properties.clone(),
            confidence: data.confidence,
            content_hash: content_hash(&JsonValue::Object(data.properties)),
            created_at: now,
            updated_at: now,
        };
        guard.by_name_type.insert((normalized, data.entity_type), id.clone());
        if let Some(vid) = &data.vector_id {
            guard.by_vector.entry(vid.clone()).or_default().insert(id.clone());
        }
        guard.entities.insert(id.clone(), entity);
        Ok(id)
    }

    /// Create or strengthen a relationship.
    pub fn create_relationship(&self, persona_id: &str, data: NewRelationship) -> Result<String> {
        let graph = self.persona(persona_id);
        let mut guard = graph.write();

        if !guard.entities.contains_key(&data.source_entity_id)
            || !guard.entities.contains_key(&data.target_entity_id)
        {
            return Err(EngineError::not_found(NotFoundKind::Entity, data.source_entity_id));
        }

        let id = relationship_id(
            persona_id,
            &data.source_entity_id,
            &data.target_entity_id,
            data.relationship_type,
        );

        if let Some(existing) = guard.relationships.get(&id).cloned() {
            let mut merged = existing;
            merged.strength = ((merged.strength + data.strength) / 2.0).min(1.0);
            merged.properties.update_count += 1;
            merged.properties.last_updated = now_ms();
            merged.updated_at = now_ms();
            guard.relationships.insert(id.clone(), merged);
            return Ok(id);
        }

        let now = now_ms();
        let rel = Relationship {
            id: id.clone(),
            persona_id: persona_id.to_string(),
            source_entity_id: data.source_entity_id,
            target_entity_id: data.target_entity_id,
            relationship_type: data.relationship_type,
            strength: data.strength.clamp(0.01, 1.0),
            context: data.context,
            properties: RelationshipProperties {
                update_count: 1,
                last_updated: now,
                extra: serde_json::Map::new(),
            },
            content_hash: content_hash(&JsonValue::String(id.clone())),
            created_at: now,
            updated_at: now,
        };
        guard.link_adjacency(&rel);
        guard.relationships.insert(id.clone(), rel);
        Ok(id)
    }

    /// Process a batch: entities first, building an `original_id ->
    /// canonical_id` map, then relationships rewritten through that map
    ///.
    pub fn process_entities_and_relationships(
        &self,
        persona_id: &str,
        entities: Vec<(String, NewEntity)>,
        relationships: Vec<(String, String, NewRelationship)>,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (original_id, data) in entities {
            match self.create_entity(persona_id, data) {
                Ok(canonical) => {
                    summary.id_mappings.insert(original_id, canonical);
                    summary.entities_processed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, original_id, "entity materialization failed");
                    summary.entities_failed += 1;
                }
            }
        }

        for (source_original, target_original, mut data) in relationships {
            let source = summary.id_mappings.get(&source_original);
            let target = summary.id_mappings.get(&target_original);
            match (source, target) {
                (Some(s), Some(t)) => {
                    data.source_entity_id = s.clone();
                    data.target_entity_id = t.clone();
                    match self.create_relationship(persona_id, data) {
                        Ok(_) => summary.relationships_processed += 1,
                        Err(e) => {
                            tracing::warn!(error = %e, "relationship materialization failed");
                            summary.relationships_failed += 1;
                        }
                    }
                }
                _ => summary.relationships_failed += 1,
            }
        }
        summary
    }

    /// Bounded BFS from `entity_id`.
    pub fn find_related(
        &self,
        persona_id: &str,
        entity_id: &str,
        opts: &FindRelatedOptions,
    ) -> Result<Vec<RelatedEntity>> {
        let max_depth = opts.max_depth.min(5);
        let limit = opts.limit.min(1000);
        let graph = self.persona(persona_id);
        let guard = graph.read();

        if !guard.entities.contains_key(entity_id) {
            return Err(EngineError::not_found(NotFoundKind::Entity, entity_id));
        }

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(entity_id.to_string());
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((entity_id.to_string(), 0));
        let mut out = Vec::new();

        while let Some((current_id, depth)) = queue.pop_front() {
            if depth > 0 {
                if let Some(entity) = guard.entities.get(&current_id) {
                    if let Some(types) = &opts.entity_types {
                        if !types.contains(&entity.entity_type) {
                            continue;
                        }
                    }
                    let incident: Vec<Relationship> = guard
                        .adjacency
                        .get(&current_id)
                        .into_iter()
                        .flatten()
                        .filter_map(|rid| guard.relationships.get(rid))
                        .filter(|r| r.strength >= opts.min_strength)
                        .filter(|r| {
                            opts.relationship_types
                                .as_ref()
                                .map(|types| types.contains(&r.relationship_type))
                                .unwrap_or(true)
                        })
                        .cloned()
                        .collect();
                    out.push(RelatedEntity {
                        entity: entity.clone(),
                        depth,
                        relationships: incident,
                    });
                    if out.len() >= limit {
                        break;
                    }
                }
            }

            if depth >= max_depth {
                continue;
            }
            let mut neighbor_ids: Vec<String> = guard
                .adjacency
                .get(&current_id)
                .into_iter()
                .flatten()
                .filter_map(|rid| guard.relationships.get(rid))
                .filter(|r| r.strength >= opts.min_strength)
                .map(|r| {
                    if r.source_entity_id == current_id {
                        r.target_entity_id.clone()
                    } else {
                        r.source_entity_id.clone()
                    }
                })
                .collect();
            neighbor_ids.sort();
            neighbor_ids.dedup();
            for next in neighbor_ids {
                if visited.insert(next.clone()) {
                    queue.push_back((next, depth + 1));
                }
            }
        }

        Ok(out)
    }

    /// `{entities, relationships, connections}` deduplicated by
    /// `(source, target, type)`.
    pub fn get_graph_context(
        &self,
        persona_id: &str,
        ids: &[String],
        opts: &GraphContextOptions,
    ) -> Result<GraphContext> {
        let graph = self.persona(persona_id);
        let guard = graph.read();
        let mut ctx = GraphContext::default();
        let mut seen_conn: HashSet<(String, String, RelationshipType)> = HashSet::new();
        let mut seen_entity: HashSet<String> = HashSet::new();
        let mut seen_rel: HashSet<String> = HashSet::new();

        for id in ids {
            let entity = guard
                .entities
                .get(id)
                .ok_or_else(|| EngineError::not_found(NotFoundKind::Entity, id.clone()))?;
            if seen_entity.insert(entity.id.clone()) {
                ctx.entities.push(entity.clone());
            }
            if !opts.include_relationships {
                continue;
            }
            let related = self.find_related(
                persona_id,
                id,
                &FindRelatedOptions {
                    max_depth: opts.depth.min(3),
                    limit: opts.max_relationships.max(1),
                    min_strength: 0.0,
                    entity_types: None,
                    relationship_types: None,
                },
            )?;
            for r in related {
                if seen_entity.insert(r.entity.id.clone()) {
                    ctx.entities.push(r.entity.clone());
                }
                for rel in r.relationships {
                    let key = (
                        rel.source_entity_id.clone(),
                        rel.target_entity_id.clone(),
                        rel.relationship_type,
                    );
                    if seen_conn.insert(key.clone()) {
                        ctx.connections.push(key);
                    }
                    if seen_rel.insert(rel.id.clone()) {
                        ctx.relationships.push(rel);
                        if ctx.relationships.len() >= opts.max_relationships.max(1) {
                            break;
                        }
                    }
                }
            }
        }
        Ok(ctx)
    }

    /// Token-based scoring entity search.
    pub fn search(&self, persona_id: &str, query: &str, opts: &EntitySearchOptions) -> Vec<Entity> {
        let graph = self.persona(persona_id);
        let guard = graph.read();
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        let n_terms = terms.len().max(1) as f32;

        let mut scored: Vec<(f32, Entity)> = guard
            .entities
            .values()
            .filter(|e| {
                opts.entity_type
                    .map(|t| t == e.entity_type)
                    .unwrap_or(true)
            })
            .filter_map(|e| {
                let name_lower = e.name.to_lowercase();
                let mut score = 0.0f32;
                if name_lower == query_lower {
                    score = 1.0;
                } else {
                    for term in &terms {
                        if name_lower.contains(term) {
                            score += 0.5 / n_terms;
                        }
                        if name_lower.split(|c: char| !c.is_alphanumeric()).any(|w| w == *term) {
                            score += 0.3 / n_terms;
                        }
                    }
                }
                if score <= 0.0 {
                    return None;
                }
                score *= e.confidence;
                if score < opts.min_confidence {
                    return None;
                }
                Some((score, e.clone()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(opts.limit);
        scored.into_iter().map(|(_, e)| e).collect()
    }

    /// Aggregate statistics across a persona's entities and relationships
    ///.
    pub fn statistics(&self, persona_id: &str) -> GraphStatistics {
        let graph = self.persona(persona_id);
        let guard = graph.read();
        let n = guard.entities.len();
        let e = guard.relationships.len();

        let mut by_type: HashMap<String, (usize, f32)> = HashMap::new();
        for entity in guard.entities.values() {
            let entry = by_type.entry(entity.entity_type.as_str().to_string()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += entity.confidence;
        }
        for v in by_type.values_mut() {
            v.1 /= v.0.max(1) as f32;
        }

        let mut rel_by_type: HashMap<String, (usize, f32)> = HashMap::new();
        for rel in guard.relationships.values() {
            let entry = rel_by_type
                .entry(rel.relationship_type.as_str().to_string())
                .or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += rel.strength;
        }
        for v in rel_by_type.values_mut() {
            v.1 /= v.0.max(1) as f32;
        }

        let density = if n > 1 {
            (2 * e) as f32 / (n * (n - 1)) as f32
        } else {
            0.0
        };
        let avg_rel = if n > 0 { e as f32 / n as f32 } else { 0.0 };
        let complexity = if n < 10 {
            "low"
        } else if n < 50 {
            "medium"
        } else if n < 200 {
            "high"
        } else {
            "very_high"
        };

        GraphStatistics {
            total_entities: n,
            total_relationships: e,
            entities_by_type: by_type,
            relationships_by_type: rel_by_type,
            graph_density: density,
            avg_relationships_per_entity: avg_rel,
            complexity,
        }
    }

    /// Delete low-confidence, zero-relationship entities older than
    /// `max_age_ms`.
    pub fn cleanup_orphans(&self, persona_id: &str, max_age_ms: i64, confidence_threshold: f32) -> usize {
        let graph = self.persona(persona_id);
        let mut guard = graph.write();
        let now = now_ms();
        let cutoff = now - max_age_ms;

        let orphan_ids: Vec<String> = guard
            .entities
            .values()
            .filter(|e| {
                e.created_at < cutoff
                    && e.confidence < confidence_threshold
                    && guard
                        .adjacency
                        .get(&e.id)
                        .map(|s| s.is_empty())
                        .unwrap_or(true)
            })
            .map(|e| e.id.clone())
            .collect();

        for id in &orphan_ids {
            if let Some(entity) = guard.entities.remove(id) {
                guard
                    .by_name_type
                    .remove(&(entity.normalized_name.clone(), entity.entity_type));
                if let Some(vid) = &entity.vector_id {
                    if let Some(set) = guard.by_vector.get_mut(vid) {
                        set.remove(id);
                    }
                }
                guard.adjacency.remove(id);
            }
        }
        orphan_ids.len()
    }

    /// Resolve an entity id by its weak back-reference from a vector id.
    pub fn entities_for_vector(&self, persona_id: &str, vector_id: &str) -> Vec<String> {
        let graph = self.persona(persona_id);
        let guard = graph.read();
        guard
            .by_vector
            .get(vector_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, ty: EntityType) -> NewEntity {
        NewEntity {
            entity_type: ty,
            name: name.to_string(),
            vector_id: None,
            properties: serde_json::Map::new(),
            confidence: 0.7,
        }
    }

    #[test]
    fn create_entity_twice_returns_same_id() {
        let store = GraphStore::new();
        let a = store.create_entity("p1", entity("Alice", EntityType::Person)).unwrap();
        let b = store.create_entity("p1", entity("Alice", EntityType::Person)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn higher_confidence_overwrites_confidence() {
        let store = GraphStore::new();
        let mut first = entity("Alice", EntityType::Person);
        first.confidence = 0.4;
        let id = store.create_entity("p1", first).unwrap();
        let mut second = entity("Alice", EntityType::Person);
        second.confidence = 0.9;
        store.create_entity("p1", second).unwrap();
        let graph = store.persona("p1");
        let guard = graph.read();
        assert_eq!(guard.entities.get(&id).unwrap().confidence, 0.9);
    }

    #[test]
    fn relationship_requires_existing_entities() {
        let store = GraphStore::new();
        let err = store
            .create_relationship(
                "p1",
                NewRelationship {
                    source_entity_id: "missing1".into(),
                    target_entity_id: "missing2".into(),
                    relationship_type: RelationshipType::Knows,
                    strength: 0.5,
                    context: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn find_related_respects_max_depth() {
        let store = GraphStore::new();
        let a = store.create_entity("p1", entity("Alice", EntityType::Person)).unwrap();
        let b = store.create_entity("p1", entity("Bob", EntityType::Person)).unwrap();
        let c = store.create_entity("p1", entity("Carol", EntityType::Person)).unwrap();
        store
            .create_relationship(
                "p1",
                NewRelationship {
                    source_entity_id: a.clone(),
                    target_entity_id: b.clone(),
                    relationship_type: RelationshipType::Knows,
                    strength: 0.6,
                    context: None,
                },
            )
            .unwrap();
        store
            .create_relationship(
                "p1",
                NewRelationship {
                    source_entity_id: b.clone(),
                    target_entity_id: c.clone(),
                    relationship_type: RelationshipType::Knows,
                    strength: 0.6,
                    context: None,
                },
            )
            .unwrap();

        let depth1 = store
            .find_related(
                "p1",
                &a,
                &FindRelatedOptions {
                    max_depth: 1,
                    limit: 100,
                    min_strength: 0.0,
                    entity_types: None,
                    relationship_types: None,
                },
            )
            .unwrap();
        assert_eq!(depth1.len(), 1);
        assert_eq!(depth1[0].entity.id, b);

        let depth2 = store
            .find_related(
                "p1",
                &a,
                &FindRelatedOptions {
                    max_depth: 2,
                    limit: 100,
                    min_strength: 0.0,
                    entity_types: None,
                    relationship_types: None,
                },
            )
            .unwrap();
        assert_eq!(depth2.len(), 2);
    }

    #[test]
    fn statistics_report_density_and_complexity() {
        let store = GraphStore::new();
        let a = store.create_entity("p1", entity("Alice", EntityType::Person)).unwrap();
        let b = store.create_entity("p1", entity("Bob", EntityType::Person)).unwrap();
        store
            .create_relationship(
                "p1",
                NewRelationship {
                    source_entity_id: a,
                    target_entity_id: b,
                    relationship_type: RelationshipType::Knows,
                    strength: 0.6,
                    context: None,
                },
            )
            .unwrap();
        let stats = store.statistics("p1");
        assert_eq!(stats.total_entities, 2);
        assert_eq!(stats.total_relationships, 1);
        assert_eq!(stats.complexity, "low");
    }

    #[test]
    fn cleanup_orphans_removes_low_confidence_isolated_entities() {
        let store = GraphStore::new();
        let mut old = entity("Forgotten", EntityType::Concept);
        old.confidence = 0.2;
        let id = store.create_entity("p1", old).unwrap();
        {
            let graph = store.persona("p1");
            let mut guard = graph.write();
            guard.entities.get_mut(&id).unwrap().created_at = 0;
        }
        let removed = store.cleanup_orphans("p1", 1, 0.5);
        assert_eq!(removed, 1);
        assert!(store.persona("p1").read().entities.is_empty());
    }
}
