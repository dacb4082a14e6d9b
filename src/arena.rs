//! # Vector arena
//!
//! A fixed-size, contiguous `f32` buffer holding every live vector for one
//! [`crate::indexed_store::IndexedStore`]. Slots are handed out from a
//! LIFO free-list or, failing that, by bumping `next_slot` until
//! `max_vectors = floor(memory_budget / (dimensions * 4))` is reached.
//!
//! The arena owns vector bytes exclusively; [`VectorMetadata`] — owned here
//! too — is the only thing other layers (the graph store, in particular)
//! read from it, and only by id.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{EngineError, Result};
use crate::similarity::{self, MagnitudeCache, Metric};

pub type ArenaSlot = usize;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Per-vector record owned by the arena; shared-read by the graph layer via
/// `vector_id` lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub id: String,
    pub dimensions: usize,
    pub persona_id: Option<String>,
    pub content_type: String,
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom: CustomMetadata,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

/// Free-form per-memory fields mirrored into persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomMetadata {
    #[serde(default)]
    pub importance: f32,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub original_content: Option<String>,
    #[serde(default)]
    pub memory_type: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Map<String, JsonValue>,
}

impl CustomMetadata {
    /// Truncate `original_content` to at most 1000 characters.
    pub fn with_truncated_content(mut self) -> Self {
        if let Some(content) = &self.original_content {
            if content.chars().count() > 1000 {
                self.original_content = Some(content.chars().take(1000).collect());
            }
        }
        self
    }
}

/// Equality and range filters applied during `search_linear`.
#[derive(Debug, Clone)]
pub enum FilterValue {
    Eq(JsonValue),
    Lt(JsonValue),
    Lte(JsonValue),
    Gt(JsonValue),
    Gte(JsonValue),
}

#[derive(Debug, Clone, Default)]
pub struct Filters(pub HashMap<String, Vec<FilterValue>>);

impl Filters {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.0
            .entry(field.into())
            .or_default()
            .push(FilterValue::Eq(value.into()));
        self
    }

    pub fn timestamp_range(
        mut self,
        op: &str,
        value: impl Into<JsonValue>,
    ) -> Self {
        let v = value.into();
        let fv = match op {
            "$lt" => FilterValue::Lt(v),
            "$lte" => FilterValue::Lte(v),
            "$gt" => FilterValue::Gt(v),
            "$gte" => FilterValue::Gte(v),
            _ => return self,
        };
        self.0.entry("timestamp".to_string()).or_default().push(fv);
        self
    }

    fn matches(&self, meta: &VectorMetadata) -> bool {
        for (field, constraints) in &self.0 {
            let field_value = field_value(meta, field);
            for c in constraints {
                let ok = match (c, &field_value) {
                    (FilterValue::Eq(v), Some(fv)) => fv == v,
                    (FilterValue::Lt(v), Some(fv)) => compare_num(fv, v).map(|o| o.is_lt()).unwrap_or(false),
                    (FilterValue::Lte(v), Some(fv)) => compare_num(fv, v).map(|o| o.is_le()).unwrap_or(false),
                    (FilterValue::Gt(v), Some(fv)) => compare_num(fv, v).map(|o| o.is_gt()).unwrap_or(false),
                    (FilterValue::Gte(v), Some(fv)) => compare_num(fv, v).map(|o| o.is_ge()).unwrap_or(false),
                    _ => false,
                };
                if !ok {
                    return false;
                }
            }
        }
        true
    }
}

fn compare_num(a: &JsonValue, b: &JsonValue) -> Option<std::cmp::Ordering> {
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

fn field_value(meta: &VectorMetadata, field: &str) -> Option<JsonValue> {
    match field {
        "id" => Some(JsonValue::String(meta.id.clone())),
        "persona_id" => meta.persona_id.clone().map(JsonValue::String),
        "content_type" => Some(JsonValue::String(meta.content_type.clone())),
        "source" => meta.source.clone().map(JsonValue::String),
        "timestamp" | "created_at" => Some(JsonValue::from(meta.created_at)),
        "updated_at" => meta.updated_at.map(JsonValue::from),
        other => meta.custom.extra.get(other).cloned(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: usize,
    pub threshold: Option<f32>,
    pub metric: Metric,
    pub filters: Filters,
    pub include_values: bool,
    pub use_index: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub similarity: f32,
    pub metadata: VectorMetadata,
    pub vector: Option<Vec<f32>>,
}

/// Fixed-capacity contiguous vector store with slot recycling.
pub struct VectorArena {
    dimensions: usize,
    max_vectors: usize,
    buffer: Vec<f32>,
    free_list: Vec<ArenaSlot>,
    next_slot: ArenaSlot,
    id_to_slot: HashMap<String, ArenaSlot>,
    metadata: HashMap<String, VectorMetadata>,
    magnitudes: MagnitudeCache,
}

impl VectorArena {
    pub fn new(dimensions: usize, max_memory_bytes: usize) -> Self {
        let max_vectors = (max_memory_bytes / (dimensions * 4)).max(1);
        Self {
            dimensions,
            max_vectors,
            buffer: vec![0.0; max_vectors * dimensions],
            free_list: Vec::new(),
            next_slot: 0,
            id_to_slot: HashMap::new(),
            metadata: HashMap::new(),
            magnitudes: MagnitudeCache::default(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn max_vectors(&self) -> usize {
        self.max_vectors
    }

    pub fn vector_count(&self) -> usize {
        self.id_to_slot.len()
    }

    fn validate(&self, vec: &[f32]) -> Result<()> {
        if vec.len() != self.dimensions {
            return Err(EngineError::DimensionError {
                expected: self.dimensions,
                actual: vec.len(),
            });
        }
        similarity::validate_finite(vec)
    }

    fn allocate_slot(&mut self) -> Result<ArenaSlot> {
        if let Some(slot) = self.free_list.pop() {
            return Ok(slot);
        }
        if self.next_slot < self.max_vectors {
            let slot = self.next_slot;
            self.next_slot += 1;
            return Ok(slot);
        }
        Err(EngineError::CapacityExceeded {
            max_vectors: self.max_vectors,
        })
    }

    fn slot_range(&self, slot: ArenaSlot) -> std::ops::Range<usize> {
        let start = slot * self.dimensions;
        start..start + self.dimensions
    }

    fn write_slot(&mut self, slot: ArenaSlot, vec: &[f32]) {
        let range = self.slot_range(slot);
        self.buffer[range].copy_from_slice(vec);
    }

    fn read_slot(&self, slot: ArenaSlot) -> &[f32] {
        &self.buffer[self.slot_range(slot)]
    }

    /// Insert a new vector. Fails `DuplicateId` if `id` is already present,
    /// `CapacityExceeded` if the arena is full.
    pub fn insert(&mut self, id: &str, vec: Vec<f32>, mut meta: VectorMetadata) -> Result<ArenaSlot> {
        if self.id_to_slot.contains_key(id) {
            return Err(EngineError::DuplicateId(id.to_string()));
        }
        self.validate(&vec)?;
        let slot = self.allocate_slot()?;
        self.write_slot(slot, &vec);
        meta.id = id.to_string();
        meta.dimensions = self.dimensions;
        meta.created_at = if meta.created_at == 0 { now_ms() } else { meta.created_at };
        self.metadata.insert(id.to_string(), meta);
        self.id_to_slot.insert(id.to_string(), slot);
        Ok(slot)
    }

    /// Insert many vectors, reporting per-item success/error. Partial success
    /// is the normal outcome.
    pub fn batch_insert(
        &mut self,
        items: Vec<(String, Vec<f32>, VectorMetadata)>,
    ) -> Vec<(String, Result<ArenaSlot>)> {
        items
            .into_iter()
            .map(|(id, vec, meta)| {
                let result = self.insert(&id, vec, meta);
                (id, result)
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<Vec<f32>> {
        let slot = *self
            .id_to_slot
            .get(id)
            .ok_or_else(|| EngineError::not_found(crate::error::NotFoundKind::Vector, id))?;
        Ok(self.read_slot(slot).to_vec())
    }

    pub fn get_with_meta(&self, id: &str) -> Result<(Vec<f32>, VectorMetadata)> {
        let vec = self.get(id)?;
        let meta = self
            .metadata
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(crate::error::NotFoundKind::Vector, id))?;
        Ok((vec, meta))
    }

    pub fn get_metadata(&self, id: &str) -> Option<&VectorMetadata> {
        self.metadata.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_to_slot.contains_key(id)
    }

    /// Overwrite the vector/metadata for an existing id in place, invalidating
    /// the magnitude cache entry.
    pub fn update(&mut self, id: &str, vec: Vec<f32>, meta: VectorMetadata) -> Result<()> {
        self.validate(&vec)?;
        let slot = *self
            .id_to_slot
            .get(id)
            .ok_or_else(|| EngineError::not_found(crate::error::NotFoundKind::Vector, id))?;
        self.write_slot(slot, &vec);
        let mut meta = meta;
        meta.id = id.to_string();
        meta.dimensions = self.dimensions;
        meta.updated_at = Some(now_ms());
        if let Some(existing) = self.metadata.get(id) {
            meta.created_at = existing.created_at;
        }
        self.metadata.insert(id.to_string(), meta);
        self.magnitudes.invalidate(id);
        Ok(())
    }

    /// Return the slot to the free-list, zero its bytes, and drop metadata
    ///.
    pub fn delete(&mut self, id: &str) -> Result<()> {
        let slot = self
            .id_to_slot
            .remove(id)
            .ok_or_else(|| EngineError::not_found(crate::error::NotFoundKind::Vector, id))?;
        let range = self.slot_range(slot);
        self.buffer[range].fill(0.0);
        self.free_list.push(slot);
        self.metadata.remove(id);
        self.magnitudes.invalidate(id);
        Ok(())
    }

    /// Linear scan over every live vector, applying filters and ranking by
    /// similarity under the configured metric.
    pub fn search_linear(&mut self, query: &[f32], opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        self.validate(query)?;
        let mut hits: Vec<SearchHit> = Vec::new();
        for (id, slot) in self.id_to_slot.iter() {
            let meta = match self.metadata.get(id) {
                Some(m) => m,
                None => continue,
            };
            if !opts.filters.matches(meta) {
                continue;
            }
            let vec = &self.buffer[slot * self.dimensions..slot * self.dimensions + self.dimensions];
            let sim = similarity::similarity(query, vec, opts.metric)?;
            if let Some(t) = opts.threshold {
                if sim < t {
                    continue;
                }
            }
            hits.push(SearchHit {
                id: id.clone(),
                similarity: sim,
                metadata: meta.clone(),
                vector: if opts.include_values { Some(vec.to_vec()) } else { None },
            });
        }
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(if opts.limit == 0 { hits.len() } else { opts.limit });
        Ok(hits)
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.id_to_slot.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(persona: &str) -> VectorMetadata {
        VectorMetadata {
            id: String::new(),
            dimensions: 0,
            persona_id: Some(persona.to_string()),
            content_type: "fact".into(),
            source: None,
            tags: vec![],
            custom: CustomMetadata::default(),
            created_at: 0,
            updated_at: None,
        }
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let mut arena = VectorArena::new(4, 4 * 4 * 10);
        arena.insert("a", vec![1.0, 2.0, 3.0, 4.0], meta("p1")).unwrap();
        let v = arena.get("a").unwrap();
        assert_eq!(v, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn duplicate_insert_fails() {
        let mut arena = VectorArena::new(2, 2 * 4 * 10);
        arena.insert("a", vec![1.0, 2.0], meta("p1")).unwrap();
        let err = arena.insert("a", vec![3.0, 4.0], meta("p1")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateId(_)));
    }

    #[test]
    fn capacity_exceeded_after_max_vectors() {
        let mut arena = VectorArena::new(1, 1 * 4 * 2); // max_vectors = 2
        arena.insert("a", vec![1.0], meta("p1")).unwrap();
        arena.insert("b", vec![2.0], meta("p1")).unwrap();
        let err = arena.insert("c", vec![3.0], meta("p1")).unwrap_err();
        assert!(matches!(err, EngineError::CapacityExceeded { .. }));
        // prior vectors remain searchable
        assert_eq!(arena.get("a").unwrap(), vec![1.0]);
        assert_eq!(arena.get("b").unwrap(), vec![2.0]);
    }

    #[test]
    fn delete_recycles_slot_and_zeroes() {
        let mut arena = VectorArena::new(2, 2 * 4 * 2);
        arena.insert("a", vec![1.0, 2.0], meta("p1")).unwrap();
        arena.delete("a").unwrap();
        assert!(arena.get("a").is_err());
        arena.insert("b", vec![3.0, 4.0], meta("p1")).unwrap();
        assert_eq!(arena.vector_count(), 1);
    }

    #[test]
    fn update_overwrites_same_slot() {
        let mut arena = VectorArena::new(2, 2 * 4 * 2);
        arena.insert("a", vec![1.0, 2.0], meta("p1")).unwrap();
        arena.update("a", vec![9.0, 9.0], meta("p1")).unwrap();
        assert_eq!(arena.get("a").unwrap(), vec![9.0, 9.0]);
    }

    #[test]
    fn batch_insert_partial_success() {
        let mut arena = VectorArena::new(1, 1 * 4 * 1); // max 1 vector
        let items = vec![
            ("a".to_string(), vec![1.0], meta("p1")),
            ("b".to_string(), vec![2.0], meta("p1")),
        ];
        let results = arena.batch_insert(items);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
    }

    #[test]
    fn search_linear_filters_by_persona() {
        let mut arena = VectorArena::new(2, 2 * 4 * 10);
        arena.insert("a", vec![1.0, 0.0], meta("p1")).unwrap();
        arena.insert("b", vec![0.0, 1.0], meta("p2")).unwrap();
        let opts = SearchOptions {
            limit: 10,
            filters: Filters::new().eq("persona_id", "p1"),
            ..Default::default()
        };
        let hits = arena.search_linear(&[1.0, 0.0], &opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn no_two_live_ids_share_a_slot() {
        let mut arena = VectorArena::new(1, 1 * 4 * 8);
        for i in 0..8 {
            arena.insert(&format!("id{i}"), vec![i as f32], meta("p1")).unwrap();
        }
        arena.delete("id3").unwrap();
        arena.delete("id5").unwrap();
        arena.insert("id_new1", vec![100.0], meta("p1")).unwrap();
        arena.insert("id_new2", vec![101.0], meta("p1")).unwrap();
        let mut slots: Vec<usize> = arena.id_to_slot.values().copied().collect();
        slots.sort();
        slots.dedup();
        assert_eq!(slots.len(), arena.id_to_slot.len());
    }
}
