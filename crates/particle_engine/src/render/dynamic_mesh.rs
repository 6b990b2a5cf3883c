//! Per-frame geometry outside of particle layers
//!
//! A [`DynamicMesh`] is a list of elements, each owning a checked-out buffer
//! with its primitive type and vertex range. Clearing the mesh hands every
//! buffer back to the cache under the fence of the last frame that drew it,
//! so rebuilding a mesh every frame recycles the same memory once the GPU
//! is done with it.

use bytemuck::Pod;

use crate::render::api::{Buffer, DrawRange, PrimitiveType};
use crate::render::buffer_cache::BufferCache;
use crate::render::renderer::Renderer;
use crate::render::sync::FenceSignal;
use crate::render::RenderResult;

#[derive(Debug)]
struct MeshElement {
    buffer: Buffer,
    primitive: PrimitiveType,
    range: DrawRange,
}

/// Geometry rebuilt on the CPU and drawn from cached buffers
#[derive(Debug, Default)]
pub struct DynamicMesh {
    elements: Vec<MeshElement>,
    last_rendered_fence: Option<FenceSignal>,
}

impl DynamicMesh {
    /// Create an empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload `vertices` into a cached buffer and append it as a new element
    ///
    /// An empty slice adds nothing.
    pub fn push_vertices<V: Pod>(
        &mut self,
        renderer: &mut Renderer,
        primitive: PrimitiveType,
        vertices: &[V],
    ) -> RenderResult<()> {
        if vertices.is_empty() {
            return Ok(());
        }
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let mut buffer = renderer.acquire_buffer(bytes.len())?;
        if let Err(error) = renderer.upload(&mut buffer, bytes) {
            renderer.cache_mut().release_unused(buffer);
            return Err(error);
        }
        self.elements.push(MeshElement {
            buffer,
            primitive,
            range: DrawRange::from_start(vertices.len()),
        });
        Ok(())
    }

    /// Draw every element, returning the number of draw calls issued
    pub fn render(&mut self, renderer: &mut Renderer) -> usize {
        if self.elements.is_empty() {
            return 0;
        }
        let mut draws = 0;
        for element in &self.elements {
            match renderer.draw(element.primitive, &element.buffer, element.range) {
                Ok(()) => draws += 1,
                Err(error) => log::warn!("Dynamic mesh draw from {} failed: {}", element.buffer.id(), error),
            }
        }
        self.last_rendered_fence = Some(renderer.current_frame_fence());
        draws
    }

    /// Give every buffer back to the cache and empty the mesh
    ///
    /// Buffers are gated on the last frame that rendered the mesh; a mesh
    /// that was never rendered returns them as immediately reusable.
    pub fn clear(&mut self, cache: &mut BufferCache) {
        let fence = self.last_rendered_fence.take();
        for element in self.elements.drain(..) {
            match &fence {
                Some(fence) => cache.release(element.buffer, fence),
                None => cache.release_unused(element.buffer),
            }
        }
    }

    /// Whether the mesh has no element
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Number of elements
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Total number of vertices over all elements
    pub fn vertex_count(&self) -> usize {
        self.elements.iter().map(|element| element.range.vertex_count).sum()
    }
}

impl Drop for DynamicMesh {
    fn drop(&mut self) {
        if !self.elements.is_empty() {
            log::warn!("DynamicMesh dropped with {} buffers, call clear() first", self.elements.len());
        }
    }
}
