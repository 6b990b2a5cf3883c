//! Backend abstraction traits for the rendering system
//!
//! This module defines the traits that GPU backends must implement so the
//! buffer cache and the particle layers can allocate memory, upload vertices,
//! submit draws and observe GPU completion without knowing the graphics API.

use serde::{Serialize, Deserialize};
use std::fmt;
use std::time::Duration;

use crate::render::RenderResult;

/// Opaque identifier of a backend buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Update frequency hint given to the backend when a buffer is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferUsage {
    /// Written once, drawn many times
    Static,
    /// Rewritten every few frames
    Dynamic,
}

/// Primitive topology of a draw call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    /// Independent triangles, 3 vertices each
    Triangles,
    /// Triangle strip
    TriangleStrip,
    /// Independent line segments, 2 vertices each
    Lines,
    /// Points, 1 vertex each
    Points,
}

/// Vertex range of a draw call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DrawRange {
    /// Index of the first vertex in the buffer
    pub first_vertex: usize,
    /// Number of vertices drawn
    pub vertex_count: usize,
}

impl DrawRange {
    /// Range starting at vertex 0
    pub fn from_start(vertex_count: usize) -> Self {
        Self {
            first_vertex: 0,
            vertex_count,
        }
    }

    /// Whether the range draws nothing
    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }
}

/// GPU-visible memory block
///
/// A `Buffer` is move-only: at any time it is owned by the
/// [`BufferCache`](crate::render::BufferCache), by the caller that checked it
/// out, or by nobody once it has been handed to
/// [`GpuBackend::destroy_buffer`].
#[derive(Debug, PartialEq, Eq)]
pub struct Buffer {
    id: BufferId,
    capacity: usize,
    usage: BufferUsage,
    mapped: bool,
}

impl Buffer {
    /// Describe a buffer freshly created by a backend
    pub fn new(id: BufferId, capacity: usize, usage: BufferUsage) -> Self {
        Self {
            id,
            capacity,
            usage,
            mapped: false,
        }
    }

    /// Backend identifier
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Size in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Usage hint given at creation
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Whether the buffer is currently mapped for CPU writes
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub(crate) fn set_mapped(&mut self, mapped: bool) {
        self.mapped = mapped;
    }
}

/// Backend completion marker
///
/// Implementations must be monotonic: once `is_signaled` returned `true` it
/// never returns `false` again.
pub trait GpuFence: Send + Sync + fmt::Debug {
    /// Non-blocking completion query
    fn is_signaled(&self) -> bool;

    /// Block until the marker is reached or the timeout expires
    ///
    /// Returns whether the marker was reached.
    fn wait(&self, timeout: Duration) -> bool;
}

/// Main GPU backend trait
///
/// The cache never bypasses this interface: every buffer it hands out was
/// created here and every buffer it drops is destroyed here.
pub trait GpuBackend {
    /// Short backend name used in log messages
    fn name(&self) -> &str;

    /// Create a buffer of exactly `size` bytes
    ///
    /// Fails with [`RenderError::ResourceExhausted`](crate::render::RenderError::ResourceExhausted)
    /// when memory is not available.
    fn create_buffer(&mut self, size: usize, usage: BufferUsage) -> RenderResult<Buffer>;

    /// Release the memory of a buffer
    fn destroy_buffer(&mut self, buffer: Buffer);

    /// Map the whole buffer for CPU writes
    fn map_buffer(&mut self, buffer: &Buffer) -> RenderResult<&mut [u8]>;

    /// Unmap a buffer previously mapped with [`GpuBackend::map_buffer`]
    fn unmap_buffer(&mut self, buffer: &Buffer);

    /// Enqueue a completion marker after everything submitted so far
    fn create_fence(&mut self) -> RenderResult<Box<dyn GpuFence>>;

    /// Submit a non-indexed draw reading vertices from `buffer`
    fn draw(&mut self, primitive: PrimitiveType, buffer: &Buffer, range: DrawRange) -> RenderResult<()>;
}
