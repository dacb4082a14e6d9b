//! # Persona memory manager
//!
//! A thin policy layer over [`crate::hybrid::HybridEngine`]: per-persona
//! capacity/decay/type-whitelist enforcement, conversation bookkeeping, and
//! startup rehydration.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::arena::{CustomMetadata, VectorMetadata};
use crate::error::{EngineError, NotFoundKind, Result};
use crate::graph::{Entity, EntitySearchOptions, EntityType, GraphContext, GraphContextOptions, GraphStatistics};
use crate::hybrid::{HybridEngine, HybridSearchMeta, HybridSearchOptions, MemoryHit};

pub const CONTENT_TYPES: &[&str] = &["conversation", "fact", "preference", "context", "system"];
const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const HOUR_MS: i64 = 60 * 60 * 1000;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaPolicy {
    #[serde(default = "default_max_memory_size")]
    pub max_memory_size: usize,
    #[serde(default = "default_decay")]
    pub memory_decay_time_ms: i64,
}

fn default_max_memory_size() -> usize {
    1000
}

fn default_decay() -> i64 {
    7 * DAY_MS
}

impl Default for PersonaPolicy {
    fn default() -> Self {
        Self {
            max_memory_size: default_max_memory_size(),
            memory_decay_time_ms: default_decay(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddMemoryOptions {
    pub content_type: Option<String>,
    pub importance: Option<f32>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchMemoriesOptions {
    pub limit: usize,
    pub threshold: f32,
    pub types: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub memory_id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct ConversationResult {
    pub conversation_id: String,
    pub user_memory_id: String,
    pub assistant_memory_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    pub older_than_ms: Option<i64>,
    pub types: Option<Vec<String>>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub affected: usize,
    pub breakdown: HashMap<String, usize>,
    pub processing_time_ms: u64,
}

/// A persisted memory record used to rehydrate the arena at startup.
/// Mirrors what a persistence layer would hand back after reading
/// `vector_metadata`.
#[derive(Debug, Clone)]
pub struct PersistedMemory {
    pub id: String,
    pub persona_id: String,
    pub content: String,
    pub metadata: VectorMetadata,
}

pub struct PersonaMemoryManager {
    engine: HybridEngine,
    policies: RwLock<HashMap<String, PersonaPolicy>>,
    conversations: RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

impl PersonaMemoryManager {
    pub fn new(engine: HybridEngine) -> Self {
        Self {
            engine,
            policies: RwLock::new(HashMap::new()),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &HybridEngine {
        &self.engine
    }

    pub fn set_policy(&self, persona_id: &str, policy: PersonaPolicy) {
        self.policies.write().insert(persona_id.to_string(), policy);
    }

    fn policy_for(&self, persona_id: &str) -> PersonaPolicy {
        self.policies
            .read()
            .get(persona_id)
            .cloned()
            .unwrap_or_default()
    }

    fn validate_content_type(&self, content_type: &str) -> Result<()> {
        if !CONTENT_TYPES.contains(&content_type) {
            return Err(EngineError::InvalidInput(format!(
                "unrecognized content type: {content_type}"
            )));
        }
        Ok(())
    }

    /// Add a memory, enforcing the per-persona capacity policy.
    pub async fn add_memory(
        &self,
        persona_id: &str,
        content: &str,
        opts: AddMemoryOptions,
    ) -> Result<String> {
        if content.is_empty() || content.chars().count() > 10_000 {
            return Err(EngineError::InvalidInput(
                "memory content must be 1..=10000 characters".into(),
            ));
        }
        let content_type = opts.content_type.unwrap_or_else(|| "fact".to_string());
        self.validate_content_type(&content_type)?;

        let policy = self.policy_for(persona_id);
        let current = self.count_for_persona(persona_id);
        if current >= policy.max_memory_size {
            return Err(EngineError::CapacityExceeded {
                max_vectors: policy.max_memory_size,
            });
        }

        let id = format!("mem_{}_{}", persona_id, uuid_like());
        let meta = VectorMetadata {
            id: id.clone(),
            dimensions: 0,
            persona_id: Some(persona_id.to_string()),
            content_type,
            source: None,
            tags: vec![],
            custom: CustomMetadata {
                importance: opts.importance.unwrap_or(0.5),
                context: opts.context,
                original_content: None,
                memory_type: None,
                extra: serde_json::Map::new(),
            },
            created_at: 0,
            updated_at: None,
        };
        self.engine.add_memory(&id, content, meta).await?;
        Ok(id)
    }

    fn count_for_persona(&self, persona_id: &str) -> usize {
        // The arena doesn't index by persona; a real deployment would track
        // this with a counter maintained alongside inserts. Approximated
        // here via a linear scan, acceptable at policy-check cadence.
        let opts = crate::arena::SearchOptions {
            limit: 0,
            threshold: None,
            metric: crate::similarity::Metric::Cosine,
            filters: crate::arena::Filters::new().eq("persona_id", persona_id.to_string()),
            include_values: false,
            use_index: Some(false),
        };
        let dims = self.engine.store().dimensions();
        let zero_query = vec![0.0f32; dims];
        self.engine
            .store()
            .search(&zero_query, &opts)
            .map(|hits| hits.len())
            .unwrap_or(0)
    }

    pub async fn search_memories(
        &self,
        persona_id: &str,
        query: &str,
        opts: SearchMemoriesOptions,
    ) -> Result<Vec<MemoryHit>> {
        let limit = opts.limit.clamp(1, 100);
        let hybrid_opts = HybridSearchOptions {
            limit,
            threshold: Some(opts.threshold),
            use_graph_expansion: false,
            memory_types: opts.types,
            ..Default::default()
        };
        let (hits, _) = self.engine.hybrid_search(persona_id, query, &hybrid_opts).await?;
        Ok(hits)
    }

    pub async fn hybrid_search(
        &self,
        persona_id: &str,
        query: &str,
        mut opts: HybridSearchOptions,
    ) -> Result<(Vec<MemoryHit>, HybridSearchMeta)> {
        opts.limit = opts.limit.clamp(1, 50);
        opts.graph_depth = opts.graph_depth.clamp(1, 5);
        opts.graph_weight = opts.graph_weight.clamp(0.0, 1.0);
        self.engine.hybrid_search(persona_id, query, &opts).await
    }

    /// Two linked memory inserts sharing a `conversation_id`.
    pub async fn add_conversation(
        &self,
        persona_id: &str,
        user_message: &str,
        assistant_response: &str,
        conversation_id: Option<String>,
        context: Option<String>,
    ) -> Result<ConversationResult> {
        if user_message.chars().count() > 5_000 || assistant_response.chars().count() > 5_000 {
            return Err(EngineError::InvalidInput(
                "conversation turns are limited to 5000 characters".into(),
            ));
        }
        let conversation_id = conversation_id.unwrap_or_else(uuid_like);

        let user_memory_id = self
            .add_memory(
                persona_id,
                user_message,
                AddMemoryOptions {
                    content_type: Some("conversation".into()),
                    importance: None,
                    context: context.clone(),
                },
            )
            .await?;
        let assistant_memory_id = self
            .add_memory(
                persona_id,
                assistant_response,
                AddMemoryOptions {
                    content_type: Some("conversation".into()),
                    importance: None,
                    context,
                },
            )
            .await?;

        let mut conversations = self.conversations.write();
        let turns = conversations.entry(conversation_id.clone()).or_default();
        let now = now_ms();
        turns.push(ConversationTurn {
            memory_id: user_memory_id.clone(),
            conversation_id: conversation_id.clone(),
            role: "user".into(),
            content: user_message.to_string(),
            created_at: now,
        });
        turns.push(ConversationTurn {
            memory_id: assistant_memory_id.clone(),
            conversation_id: conversation_id.clone(),
            role: "assistant".into(),
            content: assistant_response.to_string(),
            created_at: now,
        });

        Ok(ConversationResult {
            conversation_id,
            user_memory_id,
            assistant_memory_id,
        })
    }

    pub fn get_conversation_history(
        &self,
        _persona_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let limit = limit.clamp(1, 1000);
        let conversations = self.conversations.read();
        let turns = conversations
            .get(conversation_id)
            .ok_or_else(|| EngineError::not_found(NotFoundKind::Conversation, conversation_id.to_string()))?;
        let mut sorted = turns.clone();
        sorted.sort_by_key(|t| t.created_at);
        sorted.truncate(limit);
        Ok(sorted)
    }

    /// Delete memories matching the filter; `older_than_ms` must be at
    /// least one hour.
    pub fn cleanup_memories(&self, persona_id: &str, opts: CleanupOptions) -> Result<CleanupReport> {
        let start = std::time::Instant::now();
        if let Some(older_than) = opts.older_than_ms {
            if older_than < HOUR_MS {
                return Err(EngineError::InvalidInput(
                    "older_than_ms must be at least 3_600_000 (1 hour)".into(),
                ));
            }
        }
        let policy = self.policy_for(persona_id);
        let cutoff = now_ms() - opts.older_than_ms.unwrap_or(policy.memory_decay_time_ms);

        let dims = self.engine.store().dimensions();
        let zero_query = vec![0.0f32; dims];
        let mut filters = crate::arena::Filters::new()
            .eq("persona_id", persona_id.to_string())
            .timestamp_range("$lt", cutoff);
        if let Some(types) = &opts.types {
            if let Some(first) = types.first() {
                filters = filters.eq("content_type", first.clone());
            }
        }
        let search_opts = crate::arena::SearchOptions {
            limit: 0,
            threshold: None,
            metric: crate::similarity::Metric::Cosine,
            filters,
            include_values: false,
            use_index: Some(false),
        };
        let candidates = self.engine.store().search(&zero_query, &search_opts)?;

        let mut breakdown: HashMap<String, usize> = HashMap::new();
        for hit in &candidates {
            *breakdown.entry(hit.metadata.content_type.clone()).or_insert(0) += 1;
            if !opts.dry_run {
                let _ = self.engine.store().delete(&hit.id);
            }
        }

        Ok(CleanupReport {
            affected: candidates.len(),
            breakdown,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub fn explore_entities(
        &self,
        persona_id: &str,
        query: &str,
        limit: usize,
        entity_type: Option<EntityType>,
        min_confidence: f32,
    ) -> Vec<Entity> {
        self.engine.graph().search(
            persona_id,
            query,
            &EntitySearchOptions {
                limit: limit.clamp(1, 100),
                min_confidence: min_confidence.max(0.0),
                entity_type,
            },
        )
    }

    pub fn get_graph_context(
        &self,
        persona_id: &str,
        entity_ids: &[String],
        opts: GraphContextOptions,
    ) -> Result<GraphContext> {
        if entity_ids.is_empty() || entity_ids.len() > 50 {
            return Err(EngineError::InvalidInput(
                "entity_ids must contain between 1 and 50 ids".into(),
            ));
        }
        self.engine.graph().get_graph_context(persona_id, entity_ids, &opts)
    }

    pub fn get_graph_stats(&self, persona_id: &str) -> GraphStatistics {
        self.engine.graph().statistics(persona_id)
    }

    /// Re-embed and re-insert every persisted memory into the arena and
    /// HNSW at startup; per-memory failures are logged and counted, never
    /// abort startup.
    pub async fn reload_from_persistence(&self, memories: Vec<PersistedMemory>) -> (usize, usize) {
        let mut succeeded = 0;
        let mut failed = 0;
        for memory in memories {
            match self.engine.add_memory(&memory.id, &memory.content, memory.metadata).await {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    tracing::warn!(error = %e, memory_id = %memory.id, "reload failed for memory");
                    failed += 1;
                }
            }
        }
        (succeeded, failed)
    }
}

fn uuid_like() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{nanos:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::FakeEmbedder;
    use crate::feature_flags::FeatureFlags;
    use crate::graph::GraphStore;
    use crate::hnsw::HnswParams;
    use crate::indexed_store::{IndexedStore, IndexedStoreConfig};
    use crate::similarity::Metric;
    use std::sync::Arc;

    fn manager() -> PersonaMemoryManager {
        let store = IndexedStore::new(IndexedStoreConfig {
            dimensions: 16,
            max_memory_bytes: 16 * 4 * 1000,
            hnsw_params: HnswParams::new(8, 50, 20),
            metric: Metric::Cosine,
            index_threshold: 1000,
        });
        let engine = HybridEngine::new(
            store,
            GraphStore::new(),
            Arc::new(FakeEmbedder::new(16)),
            FeatureFlags::default(),
        );
        PersonaMemoryManager::new(engine)
    }

    #[tokio::test]
    async fn cleanup_rejects_short_retention_window() {
        let mgr = manager();
        let err = mgr
            .cleanup_memories(
                "p1",
                CleanupOptions {
                    older_than_ms: Some(3_599_999),
                    types: None,
                    dry_run: true,
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn add_conversation_links_two_memories() {
        let mgr = manager();
        let result = mgr
            .add_conversation("p1", "hello there", "hi, how can I help?", None, None)
            .await
            .unwrap();
        let history = mgr
            .get_conversation_history("p1", &result.conversation_id, 10)
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
    }

    #[tokio::test]
    async fn add_memory_rejects_unknown_content_type() {
        let mgr = manager();
        let err = mgr
            .add_memory(
                "p1",
                "test",
                AddMemoryOptions {
                    content_type: Some("bogus".into()),
                    importance: None,
                    context: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn add_memory_enforces_capacity_policy() {
        let mgr = manager();
        mgr.set_policy(
            "p1",
            PersonaPolicy {
                max_memory_size: 1,
                memory_decay_time_ms: default_decay(),
            },
        );
        mgr.add_memory("p1", "first memory", AddMemoryOptions::default())
            .await
            .unwrap();
        let err = mgr
            .add_memory("p1", "second memory", AddMemoryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CapacityExceeded { .. }));
    }
}
