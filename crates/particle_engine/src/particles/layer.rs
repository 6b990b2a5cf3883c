//! Particle layers
//!
//! A [`ParticleLayer`] stores the particles of every allocation of one
//! strategy in a single contiguous vector and turns them into one draw call
//! per frame.
//!
//! # Storage
//!
//! ```text
//! particles  [ A A A | B B | C C C C ]      allocations tile the vector
//! vertices   [ A0..A17 | B0..B11 | ... ]    vertices_per_particle each
//!                     ↓ upload
//! Buffer (checked out of the BufferCache) → draw → fence of the frame
//! ```
//!
//! Removing an allocation shifts the blocks above it down, and particles that
//! die during `tick` are compacted out of their allocation. Allocation ids
//! stay valid across both.
//!
//! # Render buffer lifecycle
//!
//! ```text
//! NoBuffer → CheckedOutMapped → CheckedOutSubmitted → Reclaimable → NoBuffer
//!              acquire+upload       draw                 release      fence signaled
//! ```
//!
//! A layer whose vertices did not change keeps drawing from the buffer it
//! already holds. When vertices are regenerated the held buffer goes back to
//! the cache under the fence of the last frame that drew it and a new one is
//! checked out.

use std::any::Any;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Zeroable;
use slotmap::SlotMap;

use crate::core::config::ParticleLayerConfig;
use crate::particles::allocation::{
    sub_range, AllocationId, AllocationKey, ParticleAccessor, ParticleAccessorMut, ParticleAllocation,
};
use crate::particles::strategy::{LayoutFlags, VertexEmissionStrategy};
use crate::render::api::{Buffer, DrawRange};
use crate::render::buffer_cache::BufferCache;
use crate::render::renderer::Renderer;
use crate::render::sync::FenceSignal;
use crate::render::{RenderError, RenderResult};

static NEXT_LAYER_UID: AtomicU64 = AtomicU64::new(1);

/// Where the layer's render buffer currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// The layer holds no buffer and nothing it released is in flight
    NoBuffer,
    /// A buffer holds uploaded vertices that were not drawn yet
    CheckedOutMapped,
    /// The held buffer was drawn and may still be read by the GPU
    CheckedOutSubmitted,
    /// The last buffer was handed back and waits for its fence
    Reclaimable,
}

/// Strategy-independent view of a layer, used by the manager
pub trait ParticleLayerBase: Any {
    /// Layer name
    fn name(&self) -> &str;

    /// Number of live particles over all allocations
    fn particle_count(&self) -> usize;

    /// Number of particles in visible allocations
    fn visible_particle_count(&self) -> usize;

    /// Number of allocations
    fn allocation_count(&self) -> usize;

    /// Vertices emitted per particle
    fn vertices_per_particle(&self) -> usize;

    /// Vertex attributes written by the strategy
    fn layout_flags(&self) -> LayoutFlags;

    /// Whether the layer is drawn
    fn is_visible(&self) -> bool;

    /// Show or hide the layer
    fn set_visible(&mut self, visible: bool);

    /// Whether simulation is suspended
    fn is_paused(&self) -> bool;

    /// Suspend or resume simulation
    fn set_paused(&mut self, paused: bool);

    /// Advance the simulation by `delta_time` seconds
    ///
    /// Returns whether any particle or allocation changed.
    fn tick(&mut self, delta_time: f32) -> bool;

    /// Draw the layer, returning the number of draw calls issued
    fn render(&mut self, renderer: &mut Renderer) -> usize;

    /// Hand the render buffer back to `cache`
    fn release_gpu_resources(&mut self, cache: &mut BufferCache);

    /// Where the render buffer currently is
    fn buffer_state(&self) -> BufferState;

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Particles of one strategy, drawn with a single draw call
pub struct ParticleLayer<S: VertexEmissionStrategy> {
    name: String,
    uid: u64,
    strategy: S,
    config: ParticleLayerConfig,
    particles: Vec<S::Particle>,
    allocations: SlotMap<AllocationKey, ParticleAllocation>,
    vertices: Vec<S::Vertex>,
    visible: bool,
    paused: bool,
    /// Storage changed since the vertices were generated
    dirty: bool,
    has_rendered: bool,
    /// Vertices changed since the held buffer was written
    upload_pending: bool,
    buffer: Option<Buffer>,
    /// Fence of the last frame that drew from `buffer`
    buffer_fence: Option<FenceSignal>,
    /// Fence gating the last buffer handed back to the cache
    reclaim_fence: Option<FenceSignal>,
}

impl<S: VertexEmissionStrategy> ParticleLayer<S> {
    /// Create an empty layer
    pub fn new(name: impl Into<String>, strategy: S, config: ParticleLayerConfig) -> Self {
        let name = name.into();
        log::debug!("Creating particle layer '{}' ({:?})", name, config);
        Self {
            name,
            uid: NEXT_LAYER_UID.fetch_add(1, Ordering::Relaxed),
            strategy,
            config,
            particles: Vec::new(),
            allocations: SlotMap::with_key(),
            vertices: Vec::new(),
            visible: true,
            paused: false,
            dirty: false,
            has_rendered: false,
            upload_pending: true,
            buffer: None,
            buffer_fence: None,
            reclaim_fence: None,
        }
    }

    /// Vertex emission strategy
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Layer flags
    pub fn config(&self) -> ParticleLayerConfig {
        self.config
    }

    /// Change the layer flags
    pub fn set_config(&mut self, config: ParticleLayerConfig) {
        self.config = config;
        self.dirty = true;
    }

    /// Number of vertices generated for the last render
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Append an allocation of `count` default particles
    pub fn spawn(&mut self, count: usize) -> RenderResult<AllocationId> {
        if count == 0 {
            return Err(RenderError::InvalidAllocation(format!(
                "cannot spawn an empty allocation in layer '{}'",
                self.name
            )));
        }
        self.reserve(count)?;

        let start = self.particles.len();
        self.particles.resize_with(start + count, S::Particle::default);
        let key = self.allocations.insert(ParticleAllocation::new(start, count));
        self.dirty = true;

        log::trace!("Layer '{}' spawned {} particles at {}", self.name, count, start);
        Ok(AllocationId { layer: self.uid, key })
    }

    /// Grow an allocation by `count` default particles
    ///
    /// Growing the highest allocation appends in place. Any other allocation
    /// gets its new slots inserted right after its range, relocating the
    /// blocks above it.
    pub fn add_particles(&mut self, id: AllocationId, count: usize) -> RenderResult<()> {
        let old_end = self.record(id)?.range().end;
        if count == 0 {
            return Ok(());
        }
        self.reserve(count)?;

        if old_end != self.particles.len() {
            log::trace!(
                "Layer '{}' relocates {} particles to grow a non-tail allocation",
                self.name,
                self.particles.len() - old_end
            );
        }
        self.particles
            .splice(old_end..old_end, std::iter::repeat_with(S::Particle::default).take(count));

        for (key, record) in self.allocations.iter_mut() {
            if key == id.key {
                record.count += count;
            } else if record.start >= old_end {
                record.start += count;
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Set the number of particles of an allocation
    ///
    /// Shrinking drops the particles at the end of the range. The allocation
    /// survives at size zero.
    pub fn resize_allocation(&mut self, id: AllocationId, new_count: usize) -> RenderResult<()> {
        let record = self.record(id)?;
        let (start, count) = (record.start, record.count);
        if new_count > count {
            return self.add_particles(id, new_count - count);
        }
        if new_count == count {
            return Ok(());
        }

        let removed = count - new_count;
        let old_end = start + count;
        self.particles.drain(start + new_count..old_end);
        for (key, record) in self.allocations.iter_mut() {
            if key == id.key {
                record.count = new_count;
            } else if record.start >= old_end {
                record.start -= removed;
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Free an allocation and its particles
    ///
    /// The hole is filled from the top of the storage: while the highest
    /// allocation fits in what is left of the hole, its block moves down into
    /// it, so removing among equally sized allocations only touches the
    /// removed and the moved particles. A remainder the highest block does
    /// not fit in is closed by shifting the blocks above it. Storage order of
    /// the remaining allocations is not preserved.
    pub fn remove_allocation(&mut self, id: AllocationId) -> RenderResult<()> {
        self.record(id)?;
        let Some(removed) = self.allocations.remove(id.key) else {
            return Err(self.invalid(id));
        };

        let mut hole = removed.range();
        while !hole.is_empty() && hole.end < self.particles.len() {
            let Some((key, top)) = self.top_allocation() else {
                break;
            };
            debug_assert_eq!(top.end, self.particles.len());
            if top.len() > hole.len() {
                break;
            }
            for offset in 0..top.len() {
                self.particles.swap(hole.start + offset, top.start + offset);
            }
            self.particles.truncate(top.start);
            self.allocations[key].start = hole.start;
            log::trace!(
                "Layer '{}' moved {} particles from {} into a freed range",
                self.name,
                top.len(),
                top.start
            );
            hole.start += top.len();
        }

        if !hole.is_empty() {
            self.particles.drain(hole.clone());
            for record in self.allocations.values_mut() {
                if record.start >= hole.end {
                    record.start -= hole.len();
                }
            }
        }
        let len = self.particles.len();
        for record in self.allocations.values_mut() {
            record.start = record.start.min(len);
        }

        self.dirty = true;
        log::trace!("Layer '{}' removed {} particles at {}", self.name, removed.count, removed.start);
        Ok(())
    }

    /// Shrink every allocation to zero particles
    pub fn clear_all_allocations(&mut self) {
        self.particles.clear();
        for record in self.allocations.values_mut() {
            record.start = 0;
            record.count = 0;
        }
        self.dirty = true;
    }

    /// Bookkeeping of an allocation
    pub fn allocation(&self, id: AllocationId) -> RenderResult<&ParticleAllocation> {
        self.record(id)
    }

    /// Whether `id` refers to a live allocation of this layer
    pub fn contains_allocation(&self, id: AllocationId) -> bool {
        self.record(id).is_ok()
    }

    /// Ids of every allocation, in storage order
    pub fn allocation_ids(&self) -> Vec<AllocationId> {
        self.sorted_keys()
            .into_iter()
            .map(|key| AllocationId { layer: self.uid, key })
            .collect()
    }

    /// Suspend or resume the simulation of one allocation
    pub fn set_allocation_paused(&mut self, id: AllocationId, paused: bool) -> RenderResult<()> {
        self.record_mut(id)?.paused = paused;
        Ok(())
    }

    /// Show or hide the particles of one allocation
    pub fn set_allocation_visible(&mut self, id: AllocationId, visible: bool) -> RenderResult<()> {
        let record = self.record_mut(id)?;
        if record.visible != visible {
            record.visible = visible;
            self.dirty = true;
        }
        Ok(())
    }

    /// Remove the allocation during `tick` once all its particles died
    pub fn set_destroy_when_empty(&mut self, id: AllocationId, destroy: bool) -> RenderResult<()> {
        self.record_mut(id)?.destroy_when_empty = destroy;
        Ok(())
    }

    /// Read-only view over every particle of an allocation
    pub fn accessor(&self, id: AllocationId) -> RenderResult<ParticleAccessor<'_, S::Particle>> {
        let count = self.record(id)?.count;
        self.accessor_range(id, 0, count)
    }

    /// Read-only view over `count` particles starting at `offset`
    ///
    /// Ranges exceeding the allocation fail a debug assertion and are
    /// clamped in release builds.
    pub fn accessor_range(
        &self,
        id: AllocationId,
        offset: usize,
        count: usize,
    ) -> RenderResult<ParticleAccessor<'_, S::Particle>> {
        let range = sub_range(self.record(id)?, offset, count);
        Ok(ParticleAccessor::new(&self.particles[range]))
    }

    /// Mutable view over every particle of an allocation
    pub fn accessor_mut(&mut self, id: AllocationId) -> RenderResult<ParticleAccessorMut<'_, S::Particle>> {
        let count = self.record(id)?.count;
        self.accessor_range_mut(id, 0, count)
    }

    /// Mutable view over `count` particles starting at `offset`
    pub fn accessor_range_mut(
        &mut self,
        id: AllocationId,
        offset: usize,
        count: usize,
    ) -> RenderResult<ParticleAccessorMut<'_, S::Particle>> {
        let range = sub_range(self.record(id)?, offset, count);
        self.dirty = true;
        Ok(ParticleAccessorMut::new(&mut self.particles[range]))
    }

    fn invalid(&self, id: AllocationId) -> RenderError {
        invalid_allocation(&self.name, self.uid, id)
    }

    fn record(&self, id: AllocationId) -> RenderResult<&ParticleAllocation> {
        self.allocations
            .get(id.key)
            .filter(|_| id.layer == self.uid)
            .ok_or_else(|| self.invalid(id))
    }

    fn record_mut(&mut self, id: AllocationId) -> RenderResult<&mut ParticleAllocation> {
        let (name, uid) = (&self.name, self.uid);
        self.allocations
            .get_mut(id.key)
            .filter(|_| id.layer == uid)
            .ok_or_else(|| invalid_allocation(name, uid, id))
    }

    fn reserve(&mut self, count: usize) -> RenderResult<()> {
        self.particles.try_reserve(count).map_err(|error| {
            RenderError::ResourceExhausted(format!(
                "layer '{}' cannot grow by {} particles: {}",
                self.name, count, error
            ))
        })
    }

    /// Highest non-empty allocation; its block ends the storage
    fn top_allocation(&self) -> Option<(AllocationKey, Range<usize>)> {
        self.allocations
            .iter()
            .filter(|(_, record)| record.count > 0)
            .max_by_key(|(_, record)| record.start)
            .map(|(key, record)| (key, record.range()))
    }

    fn sorted_keys(&self) -> Vec<AllocationKey> {
        let mut keys: Vec<(usize, AllocationKey)> =
            self.allocations.iter().map(|(key, record)| (record.start, key)).collect();
        keys.sort_by_key(|&(start, _)| start);
        keys.into_iter().map(|(_, key)| key).collect()
    }

    fn needs_regeneration(&self) -> bool {
        !self.has_rendered || self.dirty || (self.config.dynamic_vertices && self.config.dynamic_particles)
    }

    fn regenerate_vertices(&mut self) {
        let per_particle = self.strategy.vertices_per_particle();
        let total = self.visible_particle_count() * per_particle;
        let keys = self.sorted_keys();

        self.vertices.clear();
        self.dirty = false;
        self.has_rendered = true;
        self.upload_pending = true;
        if per_particle == 0 {
            return;
        }
        self.vertices.resize(total, S::Vertex::zeroed());

        let mut chunks = self.vertices.chunks_exact_mut(per_particle);
        for key in keys {
            let record = &self.allocations[key];
            if !record.visible {
                continue;
            }
            for particle in &self.particles[record.range()] {
                if let Some(chunk) = chunks.next() {
                    self.strategy.emit_vertices(particle, chunk);
                }
            }
        }
        log::trace!("Layer '{}' regenerated {} vertices", self.name, total);
    }

    fn release_buffer(&mut self, cache: &mut BufferCache) {
        let Some(buffer) = self.buffer.take() else {
            return;
        };
        match self.buffer_fence.take() {
            Some(fence) => {
                cache.release(buffer, &fence);
                self.reclaim_fence = Some(fence);
            }
            None => {
                cache.release_unused(buffer);
                self.reclaim_fence = None;
            }
        }
        self.upload_pending = true;
    }

    fn skip_frame(&mut self, renderer: &mut Renderer, error: &RenderError) -> usize {
        log::warn!("Skipping particle layer '{}' this frame: {}", self.name, error);
        renderer.record_skipped_layer();
        0
    }
}

fn invalid_allocation(name: &str, uid: u64, id: AllocationId) -> RenderError {
    if id.layer == uid {
        RenderError::InvalidAllocation(format!("stale allocation id in layer '{}'", name))
    } else {
        RenderError::InvalidAllocation(format!("allocation id does not belong to layer '{}'", name))
    }
}

impl<S: VertexEmissionStrategy> ParticleLayerBase for ParticleLayer<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn particle_count(&self) -> usize {
        self.particles.len()
    }

    fn visible_particle_count(&self) -> usize {
        self.allocations
            .values()
            .filter(|record| record.visible)
            .map(|record| record.count)
            .sum()
    }

    fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    fn vertices_per_particle(&self) -> usize {
        self.strategy.vertices_per_particle()
    }

    fn layout_flags(&self) -> LayoutFlags {
        self.strategy.layout_flags()
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn tick(&mut self, delta_time: f32) -> bool {
        if self.paused || !self.config.dynamic_particles {
            return false;
        }

        let mut simulated = false;
        let mut died = 0;
        let mut write = 0;
        for key in self.sorted_keys() {
            let record = &mut self.allocations[key];
            let mut alive = 0;
            for read in record.range() {
                let dead = !record.paused && {
                    simulated = true;
                    self.strategy.update_particle(delta_time, &mut self.particles[read])
                };
                if dead {
                    died += 1;
                    continue;
                }
                if write != read {
                    self.particles.swap(write, read);
                }
                write += 1;
                alive += 1;
            }
            record.start = write - alive;
            record.count = alive;
        }
        self.particles.truncate(write);

        let before = self.allocations.len();
        self.allocations
            .retain(|_, record| !(record.destroy_when_empty && record.count == 0));
        let destroyed = before - self.allocations.len();

        if died > 0 || destroyed > 0 {
            log::debug!(
                "Layer '{}': {} particles died, {} allocations destroyed",
                self.name,
                died,
                destroyed
            );
        }
        let changed = simulated || died > 0 || destroyed > 0;
        if changed {
            self.dirty = true;
        }
        changed
    }

    fn render(&mut self, renderer: &mut Renderer) -> usize {
        if !self.visible {
            self.release_buffer(renderer.cache_mut());
            return 0;
        }
        if self.needs_regeneration() {
            self.regenerate_vertices();
        }
        if self.vertices.is_empty() {
            self.release_buffer(renderer.cache_mut());
            return 0;
        }

        if self.upload_pending || self.buffer.is_none() {
            self.release_buffer(renderer.cache_mut());
            let bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
            let mut buffer = match renderer.acquire_buffer(bytes.len()) {
                Ok(buffer) => buffer,
                Err(error) => return self.skip_frame(renderer, &error),
            };
            if let Err(error) = renderer.upload(&mut buffer, bytes) {
                renderer.cache_mut().release_unused(buffer);
                return self.skip_frame(renderer, &error);
            }
            self.buffer = Some(buffer);
            self.buffer_fence = None;
            self.reclaim_fence = None;
            self.upload_pending = false;
        }

        let Some(buffer) = self.buffer.as_ref() else {
            return 0;
        };
        let range = DrawRange::from_start(self.vertices.len());
        match renderer.draw(self.strategy.primitive_type(), buffer, range) {
            Ok(()) => {
                self.buffer_fence = Some(renderer.current_frame_fence());
                1
            }
            Err(error) => self.skip_frame(renderer, &error),
        }
    }

    fn release_gpu_resources(&mut self, cache: &mut BufferCache) {
        self.release_buffer(cache);
    }

    fn buffer_state(&self) -> BufferState {
        match (&self.buffer, &self.buffer_fence, &self.reclaim_fence) {
            (Some(_), None, _) => BufferState::CheckedOutMapped,
            (Some(_), Some(_), _) => BufferState::CheckedOutSubmitted,
            (None, _, Some(fence)) if !fence.is_signaled() => BufferState::Reclaimable,
            (None, _, _) => BufferState::NoBuffer,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<S: VertexEmissionStrategy> Drop for ParticleLayer<S> {
    fn drop(&mut self) {
        if let Some(buffer) = &self.buffer {
            log::warn!(
                "Particle layer '{}' dropped while holding {}, call release_gpu_resources() first",
                self.name,
                buffer.id()
            );
        }
    }
}
