//! GPU backend interface
//!
//! The cache and the particle layers only ever talk to the GPU through the
//! [`GpuBackend`] trait defined here.

pub mod render_backend;

pub use render_backend::{GpuBackend, GpuFence, Buffer, BufferId, BufferUsage, PrimitiveType, DrawRange};
