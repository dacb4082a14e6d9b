//! # Similarity kernel
//!
//! Pure functions over equal-length `f32` slices: cosine, euclidean, and dot
//! similarity, plus a magnitude cache keyed by external vector id. Every
//! function here is allocation-free and `#[inline]`-friendly; callers own the
//! storage.

use std::collections::{HashMap, VecDeque};

use crate::error::{EngineError, Result};

/// The distance/similarity metric an index or arena search is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Euclidean,
    Dot,
}

impl Default for Metric {
    fn default() -> Self {
        Metric::Cosine
    }
}

fn check_dims(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(EngineError::DimensionError {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// Reject vectors containing NaN/Infinity.
pub fn validate_finite(v: &[f32]) -> Result<()> {
    if v.iter().any(|x| !x.is_finite()) {
        return Err(EngineError::InvalidVector(
            "vector contains a non-finite component".into(),
        ));
    }
    Ok(())
}

/// Euclidean magnitude (L2 norm) of a vector.
pub fn magnitude(v: &[f32]) -> f32 {
    dot_unchecked(v, v).sqrt()
}

/// Dot product with 4-lane manual unrolling; an optimization over the naive
/// sum, not part of the observable contract.
fn dot_unchecked(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len();
    let chunks = n / 4;
    let mut acc = [0f32; 4];
    for i in 0..chunks {
        let base = i * 4;
        acc[0] += a[base] * b[base];
        acc[1] += a[base + 1] * b[base + 1];
        acc[2] += a[base + 2] * b[base + 2];
        acc[3] += a[base + 3] * b[base + 3];
    }
    let mut sum = acc[0] + acc[1] + acc[2] + acc[3];
    for i in (chunks * 4)..n {
        sum += a[i] * b[i];
    }
    sum
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a, b)?;
    Ok(dot_unchecked(a, b))
}

/// Cosine similarity. Returns `0.0` if either vector has zero magnitude,
/// rather than dividing by zero.
pub fn cosine(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a, b)?;
    let ma = magnitude(a);
    let mb = magnitude(b);
    if ma == 0.0 || mb == 0.0 {
        return Ok(0.0);
    }
    Ok(dot_unchecked(a, b) / (ma * mb))
}

/// Euclidean distance `sqrt(sum((a_i - b_i)^2))`.
pub fn euclidean(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a, b)?;
    let mut sum = 0f32;
    for i in 0..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    Ok(sum.sqrt())
}

/// Convert a euclidean distance into a `(0, 1]` similarity score for ranking.
pub fn euclidean_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// Compute a similarity score (higher is better) for the configured metric.
pub fn similarity(a: &[f32], b: &[f32], metric: Metric) -> Result<f32> {
    match metric {
        Metric::Cosine => cosine(a, b),
        Metric::Dot => dot(a, b),
        Metric::Euclidean => euclidean(a, b).map(euclidean_to_similarity),
    }
}

/// A native "distance" for the configured metric, used internally by HNSW
/// where smaller-is-closer ordering is required regardless of metric.
pub fn distance(a: &[f32], b: &[f32], metric: Metric) -> Result<f32> {
    match metric {
        Metric::Euclidean => euclidean(a, b),
        Metric::Cosine => cosine(a, b).map(|s| 1.0 - s),
        Metric::Dot => dot(a, b).map(|s| -s),
    }
}

/// Shared cache of vector magnitudes keyed by external id.
///
/// Entries are immutable once inserted until the owning vector is updated or
/// deleted, at which point the caller must invalidate the entry explicitly
/// (see `arena::VectorArena::update`/`delete`). Bounded to
/// `max_entries` (default 10_000); once full, the oldest half
/// (by insertion order) is evicted.
pub struct MagnitudeCache {
    values: HashMap<String, f32>,
    order: VecDeque<String>,
    max_entries: usize,
}

impl MagnitudeCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            values: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    pub fn get_or_insert(&mut self, id: &str, v: &[f32]) -> f32 {
        if let Some(m) = self.values.get(id) {
            return *m;
        }
        let m = magnitude(v);
        self.insert(id, m);
        m
    }

    pub fn insert(&mut self, id: &str, magnitude: f32) {
        if !self.values.contains_key(id) {
            self.order.push_back(id.to_string());
        }
        self.values.insert(id.to_string(), magnitude);
        if self.values.len() > self.max_entries {
            self.evict_oldest_half();
        }
    }

    pub fn invalidate(&mut self, id: &str) {
        self.values.remove(id);
        self.order.retain(|x| x != id);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Evict the oldest half of entries by insertion order, capping cache
    /// growth.
    pub fn evict_oldest_half(&mut self) {
        let to_evict = self.order.len() / 2;
        for _ in 0..to_evict {
            if let Some(id) = self.order.pop_front() {
                self.values.remove(&id);
            }
        }
    }
}

impl Default for MagnitudeCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_self_similarity_is_one() {
        let v = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sim = cosine(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 2.0, 3.0];
        assert_eq!(cosine(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn dimension_mismatch_errors() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!(matches!(
            cosine(&a, &b),
            Err(EngineError::DimensionError { .. })
        ));
    }

    #[test]
    fn non_finite_rejected() {
        let v = vec![1.0, f32::NAN, 3.0];
        assert!(validate_finite(&v).is_err());
    }

    #[test]
    fn euclidean_to_similarity_bounds() {
        assert_eq!(euclidean_to_similarity(0.0), 1.0);
        assert!(euclidean_to_similarity(1e6) > 0.0);
    }

    #[test]
    fn magnitude_cache_evicts_oldest_half() {
        let mut cache = MagnitudeCache::new(4);
        for i in 0..4 {
            cache.insert(&format!("id{i}"), i as f32);
        }
        assert_eq!(cache.len(), 4);
        cache.insert("id4", 4.0);
        assert_eq!(cache.len(), 3);
        assert!(!cache.values.contains_key("id0"));
    }

    #[test]
    fn magnitude_cache_invalidate() {
        let mut cache = MagnitudeCache::new(10);
        cache.insert("a", 1.0);
        cache.invalidate("a");
        assert!(cache.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn cosine_in_range(a in proptest::collection::vec(-100.0f32..100.0, 8), b in proptest::collection::vec(-100.0f32..100.0, 8)) {
            let sim = cosine(&a, &b).unwrap();
            proptest::prop_assert!(sim + 1.0 >= 0.0 && sim + 1.0 <= 2.0001);
        }

        #[test]
        fn cosine_self_is_one_prop(a in proptest::collection::vec(-100.0f32..100.0, 8)) {
            if magnitude(&a) > 1e-6 {
                let sim = cosine(&a, &a).unwrap();
                proptest::prop_assert!((sim - 1.0).abs() < 1e-4);
            }
        }
    }
}
