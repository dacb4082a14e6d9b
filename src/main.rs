//! # `persona-memory` binary
//!
//! A demonstration CLI over `persona_memory_engine`: loads an
//! [`persona_memory_engine::config::EngineConfig`] from YAML, assembles the
//! arena/HNSW/graph/embedder stack into a
//! [`persona_memory_engine::hybrid::HybridEngine`], and dispatches one of a
//! handful of subcommands against it. It exists to exercise the engine API
//! end-to-end, not as a production service entry point.

use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use persona_memory_engine::commands::{self, Cli, Commands};
use persona_memory_engine::config;
use persona_memory_engine::embedder::{CandleEmbedder, Embedder, FakeEmbedder};
use persona_memory_engine::feature_flags::FeatureFlags;
use persona_memory_engine::graph::{EntitySearchOptions, GraphStore};
use persona_memory_engine::hybrid::{HybridEngine, HybridSearchOptions};
use persona_memory_engine::indexed_store::{IndexedStore, IndexedStoreConfig};
use persona_memory_engine::persona::{
    AddMemoryOptions, CleanupOptions, PersonaMemoryManager, SearchMemoriesOptions,
};

static TRACING: OnceCell<()> = OnceCell::new();

/// Program entrypoint. Initializes tracing, creates a Tokio runtime, and
/// runs the async [`run`] function.
fn main() -> Result<(), Box<dyn Error>> {
    initialize_tracing();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Initialize global tracing. Safe to call repeatedly.
fn initialize_tracing() {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
}

/// Build the engine stack described by `cfg`.
///
/// Uses [`CandleEmbedder`] when it loads successfully (downloading the
/// model on first use); falls back to [`FakeEmbedder`] otherwise, so the CLI
/// stays usable offline or without network access to HuggingFace Hub.
fn build_manager(cfg: &config::EngineConfig) -> PersonaMemoryManager {
    let embedder: Arc<dyn Embedder> = match CandleEmbedder::load() {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::warn!(error = %e, "falling back to FakeEmbedder, model load failed");
            Arc::new(FakeEmbedder::new(cfg.dimensions))
        }
    };

    let store = IndexedStore::new(IndexedStoreConfig {
        dimensions: cfg.dimensions,
        max_memory_bytes: cfg.max_memory_bytes(),
        hnsw_params: cfg.hnsw.to_params(),
        metric: cfg.distance_metric,
        index_threshold: cfg.index_threshold(),
    });
    let graph = GraphStore::new();
    let flags = FeatureFlags::new(cfg.feature_flags.clone());
    let engine = HybridEngine::new(store, graph, embedder, flags);
    PersonaMemoryManager::new(engine)
}

/// Core async application logic: parses CLI arguments, loads the engine
/// configuration, assembles the engine, and dispatches to the selected
/// subcommand.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    debug!(config = %cli.config, "loading engine configuration");
    let cfg = config::load_config(&cli.config)?;
    info!(db = %cfg.persistence_db_url, "persistence database configured");

    let manager = build_manager(&cfg);

    match cli.command {
        Commands::AddMemory {
            persona_id,
            content,
            content_type,
            importance,
        } => {
            let id = manager
                .add_memory(
                    &persona_id,
                    &content,
                    AddMemoryOptions {
                        content_type,
                        importance,
                        context: None,
                    },
                )
                .await?;
            println!("added memory {id}");
        }
        Commands::Search {
            persona_id,
            query,
            limit,
            threshold,
        } => {
            let hits = manager
                .search_memories(
                    &persona_id,
                    &query,
                    SearchMemoriesOptions {
                        limit,
                        threshold,
                        types: None,
                    },
                )
                .await?;
            for hit in hits {
                println!("{:.4}  {}  {}", hit.similarity, hit.id, hit.metadata.content_type);
            }
        }
        Commands::HybridSearch {
            persona_id,
            query,
            limit,
            graph_expansion,
            graph_depth,
            graph_weight,
        } => {
            let (hits, meta) = manager
                .hybrid_search(
                    &persona_id,
                    &query,
                    HybridSearchOptions {
                        limit,
                        use_graph_expansion: graph_expansion,
                        graph_depth,
                        graph_weight,
                        ..Default::default()
                    },
                )
                .await?;
            for hit in &hits {
                println!(
                    "{:.4}  {}  graph_boosted={} graph_expanded={}",
                    hit.similarity, hit.id, hit.graph_boosted, hit.graph_expanded
                );
            }
            println!(
                "--- {} results, avg_similarity={:.4}, expansion_rate={:.2}, graph_timeout={}",
                meta.count, meta.avg_similarity, meta.expansion_rate, meta.graph_timeout
            );
        }
        Commands::ExploreEntities {
            persona_id,
            query,
            limit,
            entity_type,
            min_confidence,
        } => {
            let entity_type = entity_type.as_deref().and_then(commands::parse_entity_type);
            let entities = manager.engine().graph().search(
                &persona_id,
                &query,
                &EntitySearchOptions {
                    limit,
                    min_confidence,
                    entity_type,
                },
            );
            for entity in entities {
                println!(
                    "{}  {}  {:.2}  {}",
                    entity.id,
                    entity.entity_type.as_str(),
                    entity.confidence,
                    entity.name
                );
            }
        }
        Commands::GraphStats { persona_id } => {
            let stats = manager.get_graph_stats(&persona_id);
            println!(
                "entities={} relationships={} density={:.4} avg_relationships_per_entity={:.2} complexity={}",
                stats.total_entities,
                stats.total_relationships,
                stats.graph_density,
                stats.avg_relationships_per_entity,
                stats.complexity
            );
        }
        Commands::Cleanup {
            persona_id,
            older_than_ms,
            dry_run,
        } => {
            let report = manager.cleanup_memories(
                &persona_id,
                CleanupOptions {
                    older_than_ms,
                    types: None,
                    dry_run,
                },
            )?;
            println!(
                "affected={} processing_time_ms={} breakdown={:?}",
                report.affected, report.processing_time_ms, report.breakdown
            );
        }
    }

    Ok(())
}
