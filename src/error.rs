//! # Engine error types
//!
//! A single crate-wide error enum covering every failure kind the hybrid
//! engine can surface to a caller (see the module docs in `lib.rs` for the
//! overall architecture). Internal-only conditions — most notably a
//! UNIQUE-constraint race in the graph store — are reconciled before they
//! ever reach this type; if reconciliation itself fails it is reported as
//! [`EngineError::Internal`], never as a distinct "race" variant.

use thiserror::Error;

/// The specific kind of record a [`EngineError::NotFound`] failed to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Persona,
    Vector,
    Entity,
    Conversation,
    Memory,
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotFoundKind::Persona => "persona",
            NotFoundKind::Vector => "vector",
            NotFoundKind::Entity => "entity",
            NotFoundKind::Conversation => "conversation",
            NotFoundKind::Memory => "memory",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionError { expected: usize, actual: usize },

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: NotFoundKind, id: String },

    #[error("capacity exceeded: arena holds at most {max_vectors} vectors")]
    CapacityExceeded { max_vectors: usize },

    #[error("graph expansion exceeded its processing budget")]
    GraphTimeout,

    #[error("embedder failure: {0}")]
    EmbedderFailure(#[from] EmbedderError),

    #[error("internal invariant violation: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn not_found(kind: NotFoundKind, id: impl Into<String>) -> Self {
        EngineError::NotFound { kind, id: id.into() }
    }
}

/// Errors surfaced unchanged from the embedder capability.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedder unavailable: {0}")]
    Unavailable(String),

    #[error("embedder rate limited: {0}")]
    RateLimited(String),

    #[error("embedder rejected input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
