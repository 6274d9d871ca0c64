//! Error types for the lazr IR.

/// Errors from batch construction, graph building, and traversal.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// An arena ran out of index space.
    #[error("instruction or node arena is full")]
    ArenaFull,

    /// Instructions were appended after the dependency graph was built.
    #[error("cannot append instructions after the graph has been built")]
    BuildFrozen,

    /// A user function has a signature the graph builder cannot decode.
    #[error("user function must have one output and at most two inputs (nout={nout}, nin={nin})")]
    MalformedUserFunc { nout: usize, nin: usize },

    /// A node was asked to depend on itself.
    #[error("node [{node}] cannot be linked to itself")]
    SelfCycle { node: usize },

    /// Parent/child back-pointers disagreed during edge rewiring.
    #[error("parent/child links are inconsistent around node [{node}]")]
    GraphCorruption { node: usize },

    /// The scheduler circled its entire work queue without progress.
    #[error("dependency graph contains a cycle ({remaining} nodes unschedulable)")]
    CycleDetected { remaining: usize },

    /// The serialize buffer cannot hold the full instruction stream.
    #[error("output buffer too small: need {needed}, have {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
}
