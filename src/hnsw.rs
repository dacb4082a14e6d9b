//! # HNSW index
//!
//! A layered proximity graph ("Hierarchical Navigable Small World") built
//! directly over vectors held in a [`crate::arena::VectorArena`]. This module
//! only knows about ids and raw `f32` slices — it never touches arena
//! internals, keeping the ownership split clean.

use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::similarity::{self, Metric};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HnswParams {
    pub m: usize,
    pub m0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        let m = 16;
        Self {
            m,
            m0: 2 * m,
            ef_construction: 200,
            ef_search: 50,
        }
    }
}

impl HnswParams {
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            m,
            m0: 2 * m,
            ef_construction: ef_construction.max(m),
            ef_search,
        }
    }

    fn cap_for_layer(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m0
        } else {
            self.m
        }
    }
}

/// One node in the layered graph.
#[derive(Debug, Clone)]
struct HnswNode {
    level: usize,
    /// Per-layer neighbor sets, index 0..=level.
    neighbors: Vec<HashSet<String>>,
}

/// A candidate during `search_layer`, ordered by distance (closer = "greater"
/// for the min-heap via `Reverse`, smaller = farther for eviction).
#[derive(Debug, Clone)]
struct Scored {
    distance: f32,
    id: String,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.id == other.id
    }
}
impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Ties break by lexicographic id order so results are deterministic under
/// identical inputs.
impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Max-heap ordering wrapper (farthest-first) used for the bounded result set.
#[derive(Debug, Clone, PartialEq)]
struct FarthestFirst(Scored);
impl Eq for FarthestFirst {}
impl PartialOrd for FarthestFirst {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for FarthestFirst {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

/// Min-heap ordering wrapper (nearest-first), used for the explore frontier.
#[derive(Debug, Clone, PartialEq)]
struct NearestFirst(Scored);
impl Eq for NearestFirst {}
impl PartialOrd for NearestFirst {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for NearestFirst {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.0.cmp(&self.0)
    }
}

pub trait VectorSource {
    fn vector(&self, id: &str) -> Option<Vec<f32>>;
}

#[derive(Debug, Clone)]
pub struct NeighborHit {
    pub id: String,
    pub distance: f32,
}

/// Layered proximity-graph ANN index.
pub struct HnswIndex {
    params: HnswParams,
    metric: Metric,
    nodes: HashMap<String, HnswNode>,
    entry_point: Option<String>,
}

impl HnswIndex {
    pub fn new(params: HnswParams, metric: Metric) -> Self {
        Self {
            params,
            metric,
            nodes: HashMap::new(),
            entry_point: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point.as_deref()
    }

    fn sample_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let r: f32 = rng.gen_range(f32::EPSILON..1.0);
        let level = (-r.ln() / (2f32).ln()).floor() as usize;
        level.min(16)
    }

    fn dist(&self, source: &impl VectorSource, a: &str, b: &str) -> Result<f32> {
        let va = source
            .vector(a)
            .ok_or_else(|| EngineError::Internal(format!("vector for {a} missing from source")))?;
        let vb = source
            .vector(b)
            .ok_or_else(|| EngineError::Internal(format!("vector for {b} missing from source")))?;
        similarity::distance(&va, &vb, self.metric)
    }

    fn dist_to_query(&self, source: &impl VectorSource, query: &[f32], id: &str) -> Result<f32> {
        let v = source
            .vector(id)
            .ok_or_else(|| EngineError::Internal(format!("vector for {id} missing from source")))?;
        similarity::distance(query, &v, self.metric)
    }

    /// Beam-1 greedy descent from `entry` down to (but not including) `target_layer`.
    fn greedy_descend(
        &self,
        source: &impl VectorSource,
        query: &[f32],
        entry: &str,
        from_layer: usize,
        target_layer: usize,
    ) -> Result<String> {
        let mut current = entry.to_string();
        let mut current_dist = self.dist_to_query(source, query, &current)?;
        let mut layer = from_layer;
        while layer > target_layer {
            let mut improved = true;
            while improved {
                improved = false;
                if let Some(node) = self.nodes.get(&current) {
                    if let Some(neighbors) = node.neighbors.get(layer) {
                        for n in neighbors {
                            let d = self.dist_to_query(source, query, n)?;
                            if d < current_dist || (d == current_dist && n < &current) {
                                current_dist = d;
                                current = n.clone();
                                improved = true;
                            }
                        }
                    }
                }
            }
            layer -= 1;
        }
        Ok(current)
    }

    /// The core exploration routine: maintain a
    /// min-heap frontier and a bounded max-heap of the best `num_closest`
    /// found so far, exploring until the frontier can no longer improve on
    /// the worst accepted result.
    fn search_layer(
        &self,
        source: &impl VectorSource,
        query: &[f32],
        entry_ids: &[String],
        num_closest: usize,
        layer: usize,
    ) -> Result<Vec<Scored>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut candidates: BinaryHeap<NearestFirst> = BinaryHeap::new();
        let mut results: BinaryHeap<FarthestFirst> = BinaryHeap::new();

        for id in entry_ids {
            if visited.insert(id.clone()) {
                let d = self.dist_to_query(source, query, id)?;
                candidates.push(NearestFirst(Scored {
                    distance: d,
                    id: id.clone(),
                }));
                results.push(FarthestFirst(Scored {
                    distance: d,
                    id: id.clone(),
                }));
            }
        }

        while let Some(NearestFirst(nearest)) = candidates.pop() {
            if let Some(FarthestFirst(worst)) = results.peek() {
                if results.len() >= num_closest && nearest.distance > worst.distance {
                    break;
                }
            }
            let neighbors: Vec<String> = self
                .nodes
                .get(&nearest.id)
                .and_then(|n| n.neighbors.get(layer))
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default();

            for neighbor in neighbors {
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                let d = self.dist_to_query(source, query, &neighbor)?;
                let worse_than_worst = results.len() >= num_closest
                    && results
                        .peek()
                        .map(|FarthestFirst(w)| d >= w.distance)
                        .unwrap_or(false);
                if results.len() < num_closest || !worse_than_worst {
                    candidates.push(NearestFirst(Scored {
                        distance: d,
                        id: neighbor.clone(),
                    }));
                    results.push(FarthestFirst(Scored {
                        distance: d,
                        id: neighbor,
                    }));
                    while results.len() > num_closest {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Scored> = results.into_iter().map(|FarthestFirst(s)| s).collect();
        out.sort();
        Ok(out)
    }

    /// Select up to `cap` nearest candidates, keeping ties lexicographic.
    fn select_neighbors(mut candidates: Vec<Scored>, cap: usize) -> Vec<Scored> {
        candidates.sort();
        candidates.truncate(cap);
        candidates
    }

    fn prune_to_cap(&mut self, id: &str, layer: usize, source: &impl VectorSource) -> Result<()> {
        let cap = self.params.cap_for_layer(layer);
        let neighbor_ids: Vec<String> = self
            .nodes
            .get(id)
            .and_then(|n| n.neighbors.get(layer))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        if neighbor_ids.len() <= cap {
            return Ok(());
        }
        let mut scored = Vec::with_capacity(neighbor_ids.len());
        for n in neighbor_ids {
            let d = self.dist(source, id, &n)?;
            scored.push(Scored { distance: d, id: n });
        }
        let kept = Self::select_neighbors(scored, cap);
        let kept_set: HashSet<String> = kept.into_iter().map(|s| s.id).collect();
        let current: HashSet<String> = self
            .nodes
            .get(id)
            .and_then(|n| n.neighbors.get(layer))
            .cloned()
            .unwrap_or_default();
        for dropped in current.difference(&kept_set) {
            self.unlink(id, dropped, layer);
        }
        Ok(())
    }

    fn link(&mut self, a: &str, b: &str, layer: usize) {
        if let Some(node) = self.nodes.get_mut(a) {
            if layer < node.neighbors.len() {
                node.neighbors[layer].insert(b.to_string());
            }
        }
        if let Some(node) = self.nodes.get_mut(b) {
            if layer < node.neighbors.len() {
                node.neighbors[layer].insert(a.to_string());
            }
        }
    }

    fn unlink(&mut self, a: &str, b: &str, layer: usize) {
        if let Some(node) = self.nodes.get_mut(a) {
            if layer < node.neighbors.len() {
                node.neighbors[layer].remove(b);
            }
        }
        if let Some(node) = self.nodes.get_mut(b) {
            if layer < node.neighbors.len() {
                node.neighbors[layer].remove(a);
            }
        }
    }

    /// Insert a new vector id into the graph.
    ///
    /// Any partial bidirectional linking performed before a failure is rolled
    /// back so the graph is never left half-updated.
    pub fn insert(&mut self, id: &str, source: &impl VectorSource) -> Result<()> {
        if self.nodes.contains_key(id) {
            return Err(EngineError::DuplicateId(id.to_string()));
        }
        let query = source
            .vector(id)
            .ok_or_else(|| EngineError::Internal(format!("vector for {id} missing from source")))?;

        let level = self.sample_level();
        let node = HnswNode {
            level,
            neighbors: vec![HashSet::new(); level + 1],
        };

        let entry = match self.entry_point.clone() {
            None => {
                self.nodes.insert(id.to_string(), node);
                self.entry_point = Some(id.to_string());
                return Ok(());
            }
            Some(e) => e,
        };

        self.nodes.insert(id.to_string(), node);

        let linked: std::cell::RefCell<Vec<(String, String, usize)>> = std::cell::RefCell::new(Vec::new());
        let result = (|| -> Result<()> {
            let entry_level = self.nodes.get(&entry).map(|n| n.level).unwrap_or(0);
            let mut current_entry = if entry_level > level {
                self.greedy_descend(source, &query, &entry, entry_level, level)?
            } else {
                entry.clone()
            };

            let start_layer = level.min(entry_level);
            for layer in (0..=start_layer).rev() {
                let candidates = self.search_layer(
                    source,
                    &query,
                    &[current_entry.clone()],
                    self.params.ef_construction,
                    layer,
                )?;
                let cap = self.params.cap_for_layer(layer);
                let chosen = Self::select_neighbors(candidates, cap);
                for c in &chosen {
                    self.link(id, &c.id, layer);
                    linked.borrow_mut().push((id.to_string(), c.id.clone(), layer));
                    self.prune_to_cap(&c.id, layer, source)?;
                }
                if let Some(best) = chosen.first() {
                    current_entry = best.id.clone();
                }
            }
            Ok(())
        })();

        if let Err(e) = result {
            for (a, b, layer) in linked.borrow().iter() {
                self.unlink(a, b, *layer);
            }
            self.nodes.remove(id);
            return Err(e);
        }

        if level > entry_level_of(&self.nodes, &entry) {
            self.entry_point = Some(id.to_string());
        }
        Ok(())
    }

    /// k-NN search.
    pub fn search(
        &self,
        source: &impl VectorSource,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
    ) -> Result<Vec<NeighborHit>> {
        let entry = match &self.entry_point {
            None => return Ok(Vec::new()),
            Some(e) => e.clone(),
        };
        let entry_level = self.nodes.get(&entry).map(|n| n.level).unwrap_or(0);
        let descended = self.greedy_descend(source, query, &entry, entry_level, 1.min(entry_level))?;
        let ef = ef.unwrap_or(self.params.ef_search).max(k);
        let results = self.search_layer(source, query, &[descended], ef, 0)?;
        Ok(results
            .into_iter()
            .take(k)
            .map(|s| NeighborHit {
                id: s.id,
                distance: s.distance,
            })
            .collect())
    }

    /// Remove a node and all incident edges on every layer it lives in,
    /// reselecting the entry point if necessary.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        let node = self
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(crate::error::NotFoundKind::Vector, id))?;
        for (layer, neighbors) in node.neighbors.iter().enumerate() {
            for n in neighbors {
                self.unlink(id, n, layer);
            }
        }
        self.nodes.remove(id);
        if self.entry_point.as_deref() == Some(id) {
            self.entry_point = self
                .nodes
                .iter()
                .max_by_key(|(_, n)| n.level)
                .map(|(id, _)| id.clone());
        }
        Ok(())
    }

    /// Check every structural invariant: symmetric edges, degree caps,
    /// single entry point at the max level. Used by tests.
    #[cfg(test)]
    fn check_invariants(&self) {
        for (id, node) in &self.nodes {
            for (layer, neighbors) in node.neighbors.iter().enumerate() {
                let cap = self.params.cap_for_layer(layer);
                assert!(neighbors.len() <= cap, "node {id} layer {layer} exceeds cap");
                for n in neighbors {
                    let mirrors = self
                        .nodes
                        .get(n)
                        .and_then(|nn| nn.neighbors.get(layer))
                        .map(|s| s.contains(id))
                        .unwrap_or(false);
                    assert!(mirrors, "edge {id}->{n} at layer {layer} not mirrored");
                }
            }
        }
        if let Some(ep) = &self.entry_point {
            let ep_level = self.nodes.get(ep).map(|n| n.level).unwrap_or(0);
            let max_level = self.nodes.values().map(|n| n.level).max().unwrap_or(0);
            assert_eq!(ep_level, max_level, "entry point not at max level");
        }
    }
}

fn entry_level_of(nodes: &HashMap<String, HnswNode>, id: &str) -> usize {
    nodes.get(id).map(|n| n.level).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    struct TestSource(Map<String, Vec<f32>>);
    impl VectorSource for TestSource {
        fn vector(&self, id: &str) -> Option<Vec<f32>> {
            self.0.get(id).cloned()
        }
    }

    fn source_with(n: usize) -> TestSource {
        let mut m = Map::new();
        for i in 0..n {
            m.insert(format!("id{i}"), vec![i as f32, (i * 2) as f32]);
        }
        TestSource(m)
    }

    #[test]
    fn insert_into_empty_establishes_entry_point() {
        let source = source_with(1);
        let mut idx = HnswIndex::new(HnswParams::default(), Metric::Euclidean);
        idx.insert("id0", &source).unwrap();
        assert_eq!(idx.entry_point(), Some("id0"));
    }

    #[test]
    fn duplicate_insert_fails() {
        let source = source_with(1);
        let mut idx = HnswIndex::new(HnswParams::default(), Metric::Euclidean);
        idx.insert("id0", &source).unwrap();
        assert!(idx.insert("id0", &source).is_err());
    }

    #[test]
    fn search_on_empty_graph_is_empty() {
        let source = source_with(0);
        let idx = HnswIndex::new(HnswParams::default(), Metric::Euclidean);
        let hits = idx.search(&source, &[0.0, 0.0], 5, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn insert_many_and_search_finds_nearest() {
        let source = source_with(50);
        let mut idx = HnswIndex::new(HnswParams::new(8, 50, 20), Metric::Euclidean);
        for i in 0..50 {
            idx.insert(&format!("id{i}"), &source).unwrap();
        }
        idx.check_invariants();
        let hits = idx.search(&source, &[10.0, 20.0], 3, None).unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().any(|h| h.id == "id10"));
    }

    #[test]
    fn remove_reselects_entry_point() {
        let source = source_with(5);
        let mut idx = HnswIndex::new(HnswParams::new(4, 50, 20), Metric::Euclidean);
        for i in 0..5 {
            idx.insert(&format!("id{i}"), &source).unwrap();
        }
        let ep = idx.entry_point().unwrap().to_string();
        idx.remove(&ep).unwrap();
        assert!(idx.entry_point().is_some());
        assert_ne!(idx.entry_point().unwrap(), ep);
        idx.check_invariants();
    }

    #[test]
    fn ties_break_lexicographically() {
        let mut m = Map::new();
        m.insert("b".to_string(), vec![1.0, 0.0]);
        m.insert("a".to_string(), vec![1.0, 0.0]);
        m.insert("c".to_string(), vec![1.0, 0.0]);
        let source = TestSource(m);
        let mut idx = HnswIndex::new(HnswParams::new(4, 50, 20), Metric::Euclidean);
        idx.insert("b", &source).unwrap();
        idx.insert("a", &source).unwrap();
        idx.insert("c", &source).unwrap();
        let hits = idx.search(&source, &[1.0, 0.0], 3, None).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
