//! # Command-line interface
//!
//! Declarative CLI for the `persona-memory` demonstration binary, built with
//! [`clap`](https://docs.rs/clap). Each subcommand exercises one operation of
//! the engine API directly against a loaded [`crate::config::EngineConfig`].
//!
//! ## Quick examples
//!
//! ```text
//! persona-memory add-memory alice "likes oolong tea over coffee"
//! persona-memory search alice "what does she drink"
//! persona-memory hybrid-search alice "tea preferences" --graph-expansion
//! persona-memory explore-entities alice "tea"
//! persona-memory graph-stats alice
//! persona-memory cleanup alice --older-than-ms 86400000
//! ```

use clap::{Parser, Subcommand};

use crate::graph::EntityType;

/// Top-level CLI parser for the `persona-memory` binary.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "persona-memory - a demonstration CLI over the hybrid vector-graph memory engine.",
    long_about = None,
    propagate_version = true,
    color = clap::ColorChoice::Always
)]
pub struct Cli {
    /// Path to the engine's YAML configuration file.
    #[arg(short, long, env = "PERSONA_MEMORY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// All supported subcommands.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Add a memory for a persona.
    AddMemory {
        persona_id: String,
        content: String,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        importance: Option<f32>,
    },
    /// Vector-only memory search.
    Search {
        persona_id: String,
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 0.0)]
        threshold: f32,
    },
    /// Hybrid vector + graph search.
    HybridSearch {
        persona_id: String,
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        graph_expansion: bool,
        #[arg(long, default_value_t = 2)]
        graph_depth: usize,
        #[arg(long, default_value_t = 0.3)]
        graph_weight: f32,
    },
    /// Search a persona's entity graph by name.
    ExploreEntities {
        persona_id: String,
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f32,
    },
    /// Print a persona's graph statistics.
    GraphStats { persona_id: String },
    /// Delete memories older than a threshold.
    Cleanup {
        persona_id: String,
        #[arg(long)]
        older_than_ms: Option<i64>,
        #[arg(long)]
        dry_run: bool,
    },
}

pub fn parse_entity_type(s: &str) -> Option<EntityType> {
    match s.to_ascii_uppercase().as_str() {
        "PERSON" => Some(EntityType::Person),
        "CONCEPT" => Some(EntityType::Concept),
        "EVENT" => Some(EntityType::Event),
        "OBJECT" => Some(EntityType::Object),
        "PLACE" => Some(EntityType::Place),
        _ => None,
    }
}
