//! # Indexed store
//!
//! Composes the [`crate::arena::VectorArena`] with the
//! [`crate::hnsw::HnswIndex`], routing searches to HNSW once the corpus is
//! large enough and falling back to the arena's linear scan otherwise.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::arena::{SearchHit, SearchOptions, VectorArena, VectorMetadata};
use crate::error::Result;
use crate::hnsw::{HnswIndex, HnswParams, VectorSource};
use crate::similarity::Metric;

/// Adapter so `HnswIndex` can read vectors straight out of the arena without
/// either side owning the other's data.
struct ArenaSource<'a> {
    arena: &'a VectorArena,
}

impl<'a> VectorSource for ArenaSource<'a> {
    fn vector(&self, id: &str) -> Option<Vec<f32>> {
        self.arena.get(id).ok()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IndexedStoreStats {
    pub linear_fallback: u64,
    pub hnsw_search: u64,
    pub linear_search: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RebuildReport {
    pub indexed: usize,
    pub total: usize,
    pub duration: Duration,
}

pub struct IndexedStoreConfig {
    pub dimensions: usize,
    pub max_memory_bytes: usize,
    pub hnsw_params: HnswParams,
    pub metric: Metric,
    pub index_threshold: usize,
}

/// Composition of arena + HNSW.
pub struct IndexedStore {
    inner: RwLock<Inner>,
    metric: Metric,
    index_threshold: usize,
}

struct Inner {
    arena: VectorArena,
    hnsw: HnswIndex,
    auto_index: bool,
    stats: IndexedStoreStats,
}

impl IndexedStore {
    pub fn new(cfg: IndexedStoreConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                arena: VectorArena::new(cfg.dimensions, cfg.max_memory_bytes),
                hnsw: HnswIndex::new(cfg.hnsw_params, cfg.metric),
                auto_index: true,
                stats: IndexedStoreStats::default(),
            }),
            metric: cfg.metric,
            index_threshold: cfg.index_threshold,
        }
    }

    pub fn stats(&self) -> IndexedStoreStats {
        self.inner.read().stats
    }

    pub fn vector_count(&self) -> usize {
        self.inner.read().arena.vector_count()
    }

    pub fn dimensions(&self) -> usize {
        self.inner.read().arena.dimensions()
    }

    /// Insert one vector, mirroring it into the HNSW graph only when
    /// auto-indexing is enabled.
    pub fn insert(&self, id: &str, vec: Vec<f32>, meta: VectorMetadata) -> Result<()> {
        let mut inner = self.inner.write();
        inner.arena.insert(id, vec, meta)?;
        if inner.auto_index {
            let source = ArenaSource { arena: &inner.arena };
            let hnsw_result = inner.hnsw.insert(id, &source);
            drop(source);
            if let Err(e) = hnsw_result {
                tracing::warn!(error = %e, id, "hnsw insert failed, vector remains linear-searchable only");
            }
        }
        Ok(())
    }

    /// Disable auto-indexing for the duration of a batch insert, then backfill
    /// the HNSW graph with every item that was actually stored.
    pub fn batch_insert(
        &self,
        items: Vec<(String, Vec<f32>, VectorMetadata)>,
    ) -> Vec<(String, Result<()>)> {
        let mut inner = self.inner.write();
        inner.auto_index = false;
        let mut results = Vec::with_capacity(items.len());
        for (id, vec, meta) in items {
            let r = inner.arena.insert(&id, vec, meta).map(|_| ());
            results.push((id, r));
        }
        inner.auto_index = true;
        let successes: Vec<String> = results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(id, _)| id.clone())
            .collect();
        for id in successes {
            let source = ArenaSource { arena: &inner.arena };
            let _ = inner.hnsw.insert(&id, &source);
        }
        results
    }

    pub fn get(&self, id: &str) -> Result<Vec<f32>> {
        self.inner.read().arena.get(id)
    }

    pub fn get_with_meta(&self, id: &str) -> Result<(Vec<f32>, VectorMetadata)> {
        self.inner.read().arena.get_with_meta(id)
    }

    /// Overwrite a vector in place, re-indexing it into the HNSW graph from
    /// scratch since its neighbor set may have shifted.
    pub fn update(&self, id: &str, vec: Vec<f32>, meta: VectorMetadata) -> Result<()> {
        let mut inner = self.inner.write();
        inner.arena.update(id, vec, meta)?;
        let _ = inner.hnsw.remove(id);
        let source = ArenaSource { arena: &inner.arena };
        let _ = inner.hnsw.insert(id, &source);
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let _ = inner.hnsw.remove(id);
        inner.arena.delete(id)
    }

    /// Route to HNSW once the corpus is large enough, unless the caller
    /// forces `use_index: false`; catch HNSW failures and retry linearly,
    /// recording the fallback in statistics.
    pub fn search(&self, query: &[f32], opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let mut inner = self.inner.write();
        let use_hnsw = opts.use_index.unwrap_or(true)
            && inner.hnsw.len() >= self.index_threshold
            && opts.filters.0.is_empty();

        if use_hnsw {
            let source = ArenaSource { arena: &inner.arena };
            let hnsw_result = inner.hnsw.search(&source, query, opts.limit.max(1), None);
            match hnsw_result {
                Ok(hits) => {
                    inner.stats.hnsw_search += 1;
                    let out = hits
                        .into_iter()
                        .filter_map(|h| {
                            let meta = inner.arena.get_metadata(&h.id)?.clone();
                            let sim = match self.metric {
                                Metric::Euclidean => crate::similarity::euclidean_to_similarity(h.distance),
                                _ => 1.0 - h.distance,
                            };
                            if let Some(t) = opts.threshold {
                                if sim < t {
                                    return None;
                                }
                            }
                            Some(SearchHit {
                                id: h.id.clone(),
                                similarity: sim,
                                metadata: meta,
                                vector: if opts.include_values {
                                    inner.arena.get(&h.id).ok()
                                } else {
                                    None
                                },
                            })
                        })
                        .collect();
                    return Ok(out);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "hnsw search failed, falling back to linear scan");
                    inner.stats.linear_fallback += 1;
                }
            }
        }

        inner.stats.linear_search += 1;
        inner.arena.search_linear(query, opts)
    }

    /// Clear and reinsert every present vector into the HNSW graph.
    pub fn rebuild_index(&self) -> RebuildReport {
        let start = Instant::now();
        let mut inner = self.inner.write();
        let ids = inner.arena.all_ids();
        inner.hnsw = HnswIndex::new(HnswParams::default(), self.metric);
        let total = ids.len();
        let mut indexed = 0;
        for id in &ids {
            let source = ArenaSource { arena: &inner.arena };
            if inner.hnsw.insert(id, &source).is_ok() {
                indexed += 1;
            }
        }
        RebuildReport {
            indexed,
            total,
            duration: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::CustomMetadata;

    fn meta() -> VectorMetadata {
        VectorMetadata {
            id: String::new(),
            dimensions: 0,
            persona_id: Some("p1".into()),
            content_type: "fact".into(),
            source: None,
            tags: vec![],
            custom: CustomMetadata::default(),
            created_at: 0,
            updated_at: None,
        }
    }

    fn store(threshold: usize) -> IndexedStore {
        IndexedStore::new(IndexedStoreConfig {
            dimensions: 2,
            max_memory_bytes: 2 * 4 * 1000,
            hnsw_params: HnswParams::new(4, 50, 20),
            metric: Metric::Euclidean,
            index_threshold: threshold,
        })
    }

    #[test]
    fn small_corpus_uses_linear_search() {
        let s = store(100);
        s.insert("a", vec![1.0, 0.0], meta()).unwrap();
        let hits = s
            .search(
                &[1.0, 0.0],
                &SearchOptions {
                    limit: 5,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(s.stats().linear_search, 1);
    }

    #[test]
    fn update_then_search_prefers_updated_vector() {
        let s = store(100);
        s.insert("v1", vec![0.0, 0.0], meta()).unwrap();
        s.update("v1", vec![5.0, 5.0], meta()).unwrap();
        let hits = s
            .search(
                &[5.0, 5.0],
                &SearchOptions {
                    limit: 1,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(hits[0].id, "v1");
        assert!(hits[0].similarity > 0.9);
    }

    #[test]
    fn rebuild_reports_counts() {
        let s = store(1);
        for i in 0..5 {
            s.insert(&format!("id{i}"), vec![i as f32, 0.0], meta()).unwrap();
        }
        let report = s.rebuild_index();
        assert_eq!(report.total, 5);
        assert_eq!(report.indexed, 5);
    }
}
