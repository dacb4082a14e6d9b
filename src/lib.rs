//! # persona_memory_engine (library root)
//!
//! An in-process hybrid vector–graph store for AI persona memory. Each
//! persona accumulates short content items ("memories") that are
//! simultaneously embedded and indexed for approximate-nearest-neighbor
//! search ([`arena`], [`hnsw`], [`indexed_store`]) and mined for named
//! entities and relationships that form a per-persona knowledge graph
//! ([`extractor`], [`graph`]). [`hybrid`] fuses the two at query time;
//! [`persona`] is the thin policy layer callers actually talk to.
//!
//! ## Modules
//! - [`error`] — crate-wide error type
//! - [`similarity`] — cosine/euclidean/dot kernels and the magnitude cache
//! - [`arena`] — fixed-capacity vector storage
//! - [`hnsw`] — approximate nearest-neighbor index
//! - [`indexed_store`] — arena + HNSW composition with linear fallback
//! - [`graph`] — per-persona entity/relationship store
//! - [`extractor`] — deterministic entity/relationship mining
//! - [`embedder`] — the `Embed(text) -> Vector` capability
//! - [`feature_flags`] — runtime-overridable feature flags
//! - [`hybrid`] — ANN search fused with graph expansion
//! - [`persona`] — per-persona policy and the top-level Engine API
//! - [`config`], [`models`], [`schema`] — YAML configuration and Diesel persistence
//! - [`commands`] — CLI command implementations
//!
//! ## Embedding model
//! The default [`embedder::CandleEmbedder`] downloads `all-MiniLM-L6-v2` from
//! HuggingFace Hub on first use and caches it in the standard HuggingFace
//! cache directory. Callers that supply their own [`embedder::Embedder`] never
//! touch the network.

use directories::ProjectDirs;
use std::error::Error;

pub mod arena;
pub mod commands;
pub mod config;
pub mod embedder;
pub mod error;
pub mod extractor;
pub mod feature_flags;
pub mod graph;
pub mod hnsw;
pub mod hybrid;
pub mod indexed_store;
pub mod models;
pub mod persona;
pub mod schema;
pub mod similarity;

/// Return the per-platform configuration directory for this engine.
///
/// Uses [`directories::ProjectDirs`] with the application triple
/// `("com", "awful-sec", "persona-memory")`. The directory is **not**
/// created by this function.
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "awful-sec", "persona-memory")
        .ok_or("unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
