//! Rendering core: fence-gated buffer reuse
//!
//! ```text
//! Renderer (one per GPU context)
//!     ├── Box<dyn GpuBackend>   buffers, mapping, fences, draws
//!     ├── BufferCache           buffers at rest, grouped by FenceSignal
//!     └── current frame fence   armed at end_frame
//!                 ↑
//!     ParticleLayer / DynamicMesh acquire → upload → draw → release
//! ```
//!
//! A buffer handed to the cache is tagged with the fence of the last frame
//! that drew from it and is only handed out again once that fence reports
//! signaled.

pub mod api;
pub mod backends;
pub mod sync;
pub mod buffer_cache;
pub mod renderer;
pub mod dynamic_mesh;

pub use api::{GpuBackend, GpuFence, Buffer, BufferId, BufferUsage, PrimitiveType, DrawRange};
pub use backends::headless::{HeadlessBackend, HeadlessGpu, DrawRecord};
pub use sync::FenceSignal;
pub use buffer_cache::{BufferCache, CacheStats};
pub use renderer::{Renderer, FrameStats};
pub use dynamic_mesh::DynamicMesh;

/// Errors produced by the buffer cache, the renderer and particle layers
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A buffer or fence could not be created
    ///
    /// Raised when the backend runs out of memory or the execution context
    /// can no longer create synchronization objects. Callers skip the
    /// affected work for one frame and try again.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An allocation operation was given a bad range or a stale handle
    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    /// A particle accessor was indexed outside of its allocation
    #[error("Index {index} out of range (length {len})")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of addressable elements
        len: usize,
    },

    /// A layer with the same name is already registered
    #[error("Duplicate layer name: {0}")]
    DuplicateName(String),

    /// No layer is registered under this name
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    /// Backend-specific failure
    ///
    /// Wraps errors reported by the GPU backend that do not fit the
    /// categories above (unknown buffer ids, device loss).
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
