//! # Hybrid engine
//!
//! Wraps the indexed store: on insert, mirrors memory metadata into the
//! graph store via the extractor; on query, runs ANN then optionally
//! expands by graph proximity and re-ranks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::arena::{Filters, SearchOptions, VectorMetadata};
use crate::embedder::Embedder;
use crate::error::{EngineError, Result};
use crate::extractor;
use crate::feature_flags::{FeatureFlags, ENTITY_EXTRACTION, GRAPH_ENABLED, GRAPH_EXPANSION, HYBRID_SEARCH};
use crate::graph::{EntityType, GraphStore, NewEntity, NewRelationship};
use crate::indexed_store::IndexedStore;
use crate::similarity::Metric;

#[derive(Debug, Clone)]
pub struct HybridSearchOptions {
    pub limit: usize,
    pub threshold: Option<f32>,
    pub use_graph_expansion: bool,
    pub graph_depth: usize,
    pub graph_weight: f32,
    pub memory_types: Option<Vec<String>>,
    pub max_processing_time: Duration,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: None,
            use_graph_expansion: true,
            graph_depth: 2,
            graph_weight: 0.3,
            memory_types: None,
            max_processing_time: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub id: String,
    pub similarity: f32,
    pub metadata: VectorMetadata,
    pub graph_boosted: bool,
    pub graph_expanded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HybridSearchMeta {
    pub count: usize,
    pub avg_similarity: f32,
    pub graph_expanded_results: usize,
    pub expansion_rate: f32,
    pub graph_timeout: bool,
}

pub struct HybridEngine {
    store: IndexedStore,
    graph: GraphStore,
    embedder: Arc<dyn Embedder>,
    flags: FeatureFlags,
}

impl HybridEngine {
    pub fn new(store: IndexedStore, graph: GraphStore, embedder: Arc<dyn Embedder>, flags: FeatureFlags) -> Self {
        Self {
            store,
            graph,
            embedder,
            flags,
        }
    }

    pub fn store(&self) -> &IndexedStore {
        &self.store
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    /// Insert a memory's vector, then — best-effort — mine it for entities
    /// and relationships.
    pub async fn add_memory(&self, id: &str, content: &str, mut meta: VectorMetadata) -> Result<()> {
        meta.custom.original_content = Some(content.to_string());
        meta.custom = meta.custom.with_truncated_content();
        let vector = self.embedder.embed(content).await?;
        self.store.insert(id, vector, meta.clone())?;

        if self.flags.is_enabled(GRAPH_ENABLED) && self.flags.is_enabled(ENTITY_EXTRACTION) {
            if let Some(persona_id) = meta.persona_id.clone() {
                if let Err(e) = self.mine_entities(&persona_id, id, content) {
                    tracing::warn!(error = %e, id, "graph extraction failed, vector storage unaffected");
                }
            }
        }
        Ok(())
    }

    fn mine_entities(&self, persona_id: &str, vector_id: &str, content: &str) -> Result<()> {
        let extracted = extractor::extract_entities(content);
        let inferred = extractor::infer_relationships(content, &extracted);

        let mut by_name: std::collections::HashMap<String, String> = std::collections::HashMap::new();
        let entities: Vec<(String, NewEntity)> = extracted
            .iter()
            .map(|e| {
                let original_id = format!("{}:{}", e.entity_type.as_str(), e.name.to_lowercase());
                by_name.insert(e.name.to_lowercase(), original_id.clone());
                (
                    original_id,
                    NewEntity {
                        entity_type: e.entity_type,
                        name: e.name.clone(),
                        vector_id: Some(vector_id.to_string()),
                        properties: serde_json::Map::new(),
                        confidence: e.confidence,
                    },
                )
            })
            .collect();

        let relationships: Vec<(String, String, NewRelationship)> = inferred
            .into_iter()
            .filter_map(|r| {
                let source = by_name.get(&r.source_name.to_lowercase())?.clone();
                let target = by_name.get(&r.target_name.to_lowercase())?.clone();
                Some((
                    source.clone(),
                    target.clone(),
                    NewRelationship {
                        source_entity_id: source,
                        target_entity_id: target,
                        relationship_type: r.relationship_type,
                        strength: r.strength,
                        context: r.context,
                    },
                ))
            })
            .collect();

        let summary = self
            .graph
            .process_entities_and_relationships(persona_id, entities, relationships);
        tracing::debug!(
            persona_id,
            entities = summary.entities_processed,
            relationships = summary.relationships_processed,
            "graph mining complete"
        );
        Ok(())
    }

    /// ANN search fused with graph-neighborhood expansion and re-ranking.
    pub async fn hybrid_search(
        &self,
        persona_id: &str,
        query: &str,
        opts: &HybridSearchOptions,
    ) -> Result<(Vec<MemoryHit>, HybridSearchMeta)> {
        let query_vector = self.embedder.embed(query).await?;
        let oversample = (opts.limit * 2).max(opts.limit);

        let mut filters = Filters::new().eq("persona_id", persona_id.to_string());
        if let Some(types) = &opts.memory_types {
            if let Some(first) = types.first() {
                filters = filters.eq("content_type", first.clone());
            }
        }

        let search_opts = SearchOptions {
            limit: oversample,
            threshold: opts.threshold,
            metric: Metric::Cosine,
            filters,
            include_values: false,
            use_index: None,
        };

        let vector_hits = self.store.search(&query_vector, &search_opts)?;
        let mut hits: Vec<MemoryHit> = vector_hits
            .into_iter()
            .map(|h| MemoryHit {
                id: h.id,
                similarity: h.similarity,
                metadata: h.metadata,
                graph_boosted: false,
                graph_expanded: false,
            })
            .collect();

        let expand = opts.use_graph_expansion
            && self.flags.is_enabled(HYBRID_SEARCH)
            && self.flags.is_enabled(GRAPH_EXPANSION)
            && self.flags.is_enabled(GRAPH_ENABLED)
            && !hits.is_empty();

        let mut graph_timeout = false;
        if expand {
            let start = Instant::now();
            match self.expand_via_graph(persona_id, &hits, opts, start) {
                Ok(expanded) => hits = expanded,
                Err(EngineError::GraphTimeout) => {
                    graph_timeout = true;
                    tracing::debug!(persona_id, "graph expansion timed out, returning vector-only results");
                }
                Err(e) => {
                    tracing::warn!(error = %e, persona_id, "graph expansion failed, returning vector-only results");
                }
            }
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(opts.limit);

        let count = hits.len();
        let graph_expanded_results = hits.iter().filter(|h| h.graph_expanded).count();
        let avg_similarity = if count > 0 {
            hits.iter().map(|h| h.similarity).sum::<f32>() / count as f32
        } else {
            0.0
        };
        let meta = HybridSearchMeta {
            count,
            avg_similarity,
            graph_expanded_results,
            expansion_rate: if count > 0 {
                graph_expanded_results as f32 / count as f32
            } else {
                0.0
            },
            graph_timeout,
        };
        Ok((hits, meta))
    }

    fn expand_via_graph(
        &self,
        persona_id: &str,
        base_hits: &[MemoryHit],
        opts: &HybridSearchOptions,
        start: Instant,
    ) -> Result<Vec<MemoryHit>> {
        use crate::graph::FindRelatedOptions;

        let mut seed_entity_ids: Vec<String> = Vec::new();
        for hit in base_hits.iter().take(5) {
            if start.elapsed() > opts.max_processing_time {
                return Err(EngineError::GraphTimeout);
            }
            let entity_ids = self.graph.entities_for_vector(persona_id, &hit.id);
            seed_entity_ids.extend(entity_ids.into_iter().take(5));
        }

        let mut by_id: std::collections::HashMap<String, MemoryHit> =
            base_hits.iter().map(|h| (h.id.clone(), h.clone())).collect();
        let existing_ids: HashSet<String> = by_id.keys().cloned().collect();
        let mut graph_vector_ids: HashSet<String> = HashSet::new();

        for seed_id in &seed_entity_ids {
            if start.elapsed() > opts.max_processing_time {
                return Err(EngineError::GraphTimeout);
            }
            let related = self.graph.find_related(
                persona_id,
                seed_id,
                &FindRelatedOptions {
                    max_depth: opts.graph_depth.clamp(1, 5),
                    limit: 10,
                    min_strength: 0.3,
                    entity_types: None::<HashSet<EntityType>>,
                    relationship_types: None,
                },
            );
            let related = match related {
                Ok(r) => r,
                Err(_) => continue,
            };
            for r in related {
                if let Some(vid) = r.entity.vector_id {
                    graph_vector_ids.insert(vid);
                }
            }
        }

        for vid in graph_vector_ids {
            if existing_ids.contains(&vid) {
                if let Some(hit) = by_id.get_mut(&vid) {
                    hit.similarity = (hit.similarity + 0.2 * opts.graph_weight).min(1.0);
                    hit.graph_boosted = true;
                }
            } else if let Ok((_, metadata)) = self.store.get_with_meta(&vid) {
                let base_similarity = 0.5;
                by_id.insert(
                    vid.clone(),
                    MemoryHit {
                        id: vid,
                        similarity: base_similarity * opts.graph_weight,
                        metadata,
                        graph_boosted: false,
                        graph_expanded: true,
                    },
                );
            }
        }

        Ok(by_id.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::CustomMetadata;
    use crate::embedder::FakeEmbedder;
    use crate::hnsw::HnswParams;
    use crate::indexed_store::IndexedStoreConfig;

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

    fn engine() -> HybridEngine {
        let store = IndexedStore::new(IndexedStoreConfig {
            dimensions: 16,
            max_memory_bytes: 16 * 4 * 1000,
            hnsw_params: HnswParams::new(8, 50, 20),
            metric: Metric::Cosine,
            index_threshold: 1000,
        });
        HybridEngine::new(
            store,
            GraphStore::new(),
            Arc::new(FakeEmbedder::new(16)),
            FeatureFlags::default(),
        )
    }

    #[tokio::test]
    async fn add_memory_mines_entities_for_persona_content() {
        let engine = engine();
        engine
            .add_memory(
                "m1",
                "Alice works at Acme Corp on machine learning",
                meta("p1"),
            )
            .await
            .unwrap();
        let stats = engine.graph().statistics("p1");
        assert!(stats.total_entities > 0);
    }

    #[tokio::test]
    async fn hybrid_search_returns_inserted_memory() {
        let engine = engine();
        engine.add_memory("m1", "Rust systems programming", meta("p1")).await.unwrap();
        let (hits, meta) = engine
            .hybrid_search("p1", "Rust systems programming", &HybridSearchOptions::default())
            .await
            .unwrap();
        assert!(hits.iter().any(|h| h.id == "m1"));
        assert_eq!(meta.count, hits.len());
    }

    #[tokio::test]
    async fn hybrid_search_respects_limit() {
        let engine = engine();
        for i in 0..5 {
            engine
                .add_memory(&format!("m{i}"), &format!("note number {i} about rust"), meta("p1"))
                .await
                .unwrap();
        }
        let opts = HybridSearchOptions {
            limit: 2,
            ..Default::default()
        };
        let (hits, _) = engine.hybrid_search("p1", "rust note", &opts).await.unwrap();
        assert!(hits.len() <= 2);
    }
}
