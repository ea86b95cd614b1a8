//! Engine-level error type.

use crate::delta::DeltaError;
use crate::tree::{NodeId, TreeError};
use thiserror::Error;
use weft_provider::ProviderError;
use weft_store::StoreError;

/// Errors from the engine and the retrieval services built on the store.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An operation was invoked before `init` created the root node.
    #[error("engine is not initialized")]
    NotInitialized,

    /// A delta failed to apply during undo/redo or navigation. The
    /// engine instance is unusable from this point on.
    #[error("delta apply failed: {0}")]
    DeltaApplyFailed(String),

    /// The engine was poisoned by an earlier delta failure.
    #[error("engine is unusable after an earlier delta failure: {0}")]
    Poisoned(String),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("retry requires a writer node")]
    NotAWriterNode,

    #[error("memory {0} has no stored text to re-embed")]
    MemoryTextMissing(u64),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
