//! Fence-gated buffer cache
//!
//! Provides reusable GPU buffers to per-frame geometry producers while
//! guaranteeing a buffer is never rewritten by the CPU before the GPU has
//! finished reading its previous contents.
//!
//! # Architecture
//!
//! ```text
//! BufferCache
//!     ├── entry (fence A: signaled)  → [buf 256B, buf 1KB]   reusable
//!     ├── entry (fence B: pending)   → [buf 512B]            in flight
//!     └── entry (fence C: pending)   → [buf 256B, buf 4KB]   in flight
//! ```
//!
//! - [`BufferCache::acquire`] only looks at entries whose fence is signaled
//!   and never blocks.
//! - [`BufferCache::release`] files a buffer under the fence of the last
//!   frame that used it.
//! - Drained entries are pruned, so a fence is dropped as soon as no cached
//!   buffer references it.
//!
//! # Acceptance window
//!
//! A request for `n` bytes accepts a cached buffer whose capacity lies in
//! `n..=n * (1 + reject_pct / 100)`. Exact-size matching churns allocations;
//! unbounded oversize acceptance wastes memory. Among accepted candidates the
//! smallest wins, the oldest release breaking ties.

use std::time::Duration;

use crate::core::config::BufferCacheConfig;
use crate::render::api::{Buffer, GpuBackend};
use crate::render::sync::FenceSignal;
use crate::render::RenderResult;

/// A buffer resting in the cache
#[derive(Debug)]
struct CachedBuffer {
    buffer: Buffer,
    /// Insertion sequence number, lower is older
    sequence: u64,
    /// Cache frame at which the buffer was released
    released_frame: u64,
}

/// Buffers grouped by the fence that gates their reuse
#[derive(Debug)]
struct BufferCacheEntry {
    fence: FenceSignal,
    buffers: Vec<CachedBuffer>,
}

/// Counters describing the cache content and its traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Buffers currently resting in the cache
    pub cached_buffers: usize,
    /// Total capacity of the cached buffers
    pub cached_bytes: usize,
    /// Number of fence entries
    pub entries: usize,
    /// Entries whose fence has not been observed as signaled
    pub pending_entries: usize,
    /// Acquisitions served from the cache
    pub hits: u64,
    /// Acquisitions that created a new buffer
    pub misses: u64,
    /// Buffers destroyed by garbage collection or shutdown
    pub destroyed: u64,
}

/// Pool of reusable GPU buffers gated by fences
///
/// Owned by a single renderer context. Not internally synchronized; callers
/// sharing it across threads must lock externally.
pub struct BufferCache {
    config: BufferCacheConfig,
    entries: Vec<BufferCacheEntry>,
    /// Shared fence for buffers that never reached the GPU
    idle_fence: FenceSignal,
    next_sequence: u64,
    frame: u64,
    hits: u64,
    misses: u64,
    destroyed: u64,
}

impl BufferCache {
    /// Create an empty cache
    pub fn new(config: BufferCacheConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            idle_fence: FenceSignal::signaled(),
            next_sequence: 0,
            frame: 0,
            hits: 0,
            misses: 0,
            destroyed: 0,
        }
    }

    /// Configuration the cache was created with
    pub fn config(&self) -> &BufferCacheConfig {
        &self.config
    }

    /// Check out a buffer of at least `min_size` bytes
    ///
    /// Reuses the smallest signaled buffer within the acceptance window,
    /// otherwise asks the backend for a new buffer of exactly `min_size`
    /// bytes. A zero `min_size` is treated as one byte.
    pub fn acquire(&mut self, backend: &mut dyn GpuBackend, min_size: usize) -> RenderResult<Buffer> {
        let min_size = min_size.max(1);
        let max_size = self.config.max_accepted_capacity(min_size);

        if let Some((entry_index, buffer_index)) = self.find_candidate(min_size, max_size) {
            let entry = &mut self.entries[entry_index];
            let cached = entry.buffers.swap_remove(buffer_index);
            if entry.buffers.is_empty() {
                self.entries.swap_remove(entry_index);
            }
            self.hits += 1;
            log::trace!(
                "Buffer cache hit: {} ({} bytes) for {} bytes",
                cached.buffer.id(),
                cached.buffer.capacity(),
                min_size
            );
            return Ok(cached.buffer);
        }

        let buffer = backend.create_buffer(min_size, self.config.buffer_usage)?;
        self.misses += 1;
        log::trace!("Buffer cache miss: created {} ({} bytes) on {}", buffer.id(), min_size, backend.name());
        Ok(buffer)
    }

    /// Smallest accepted candidate among signaled entries, oldest on ties
    fn find_candidate(&self, min_size: usize, max_size: usize) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize, usize, u64)> = None;

        for (entry_index, entry) in self.entries.iter().enumerate() {
            if !entry.fence.is_signaled() {
                continue;
            }
            for (buffer_index, cached) in entry.buffers.iter().enumerate() {
                let capacity = cached.buffer.capacity();
                if capacity < min_size || capacity > max_size {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((_, _, best_capacity, best_sequence)) => {
                        capacity < best_capacity || (capacity == best_capacity && cached.sequence < best_sequence)
                    }
                };
                if better {
                    best = Some((entry_index, buffer_index, capacity, cached.sequence));
                }
            }
        }
        best.map(|(entry_index, buffer_index, _, _)| (entry_index, buffer_index))
    }

    /// Return a buffer, reusable once `fence` is signaled
    ///
    /// The buffer must be unmapped; releasing a mapped buffer is a
    /// programming error.
    pub fn release(&mut self, buffer: Buffer, fence: &FenceSignal) {
        debug_assert!(!buffer.is_mapped(), "{} released while mapped", buffer.id());
        if buffer.is_mapped() {
            log::warn!("{} released while still mapped", buffer.id());
        }

        let cached = CachedBuffer {
            buffer,
            sequence: self.next_sequence,
            released_frame: self.frame,
        };
        self.next_sequence += 1;
        log::trace!("Buffer cache release: {} gated by fence {}", cached.buffer.id(), fence.id());

        match self.entries.iter_mut().find(|entry| entry.fence.same_marker(fence)) {
            Some(entry) => entry.buffers.push(cached),
            None => self.entries.push(BufferCacheEntry {
                fence: fence.clone(),
                buffers: vec![cached],
            }),
        }
    }

    /// Return a buffer the GPU never read from; immediately reusable
    pub fn release_unused(&mut self, buffer: Buffer) {
        let fence = self.idle_fence.clone();
        self.release(buffer, &fence);
    }

    /// Advance the frame counter used for idle tracking
    pub fn end_frame(&mut self) {
        self.frame += 1;
    }

    /// Destroy signaled buffers left unused for more than `max_idle_frames`
    ///
    /// Returns the number of destroyed buffers.
    pub fn collect_garbage(&mut self, backend: &mut dyn GpuBackend) -> usize {
        let max_idle = self.config.max_idle_frames;
        if max_idle == 0 {
            return 0;
        }

        let frame = self.frame;
        let mut destroyed = 0;
        for entry in &mut self.entries {
            if !entry.fence.is_signaled() {
                continue;
            }
            let mut index = 0;
            while index < entry.buffers.len() {
                if frame.saturating_sub(entry.buffers[index].released_frame) > max_idle {
                    let cached = entry.buffers.swap_remove(index);
                    backend.destroy_buffer(cached.buffer);
                    destroyed += 1;
                } else {
                    index += 1;
                }
            }
        }
        self.entries.retain(|entry| !entry.buffers.is_empty());

        if destroyed > 0 {
            log::debug!("Buffer cache collected {} idle buffers", destroyed);
        }
        self.destroyed += destroyed as u64;
        destroyed
    }

    /// Destroy every buffer whose fence is signaled
    pub fn purge_signaled(&mut self, backend: &mut dyn GpuBackend) -> usize {
        let mut destroyed = 0;
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].fence.is_signaled() {
                let entry = self.entries.swap_remove(index);
                for cached in entry.buffers {
                    backend.destroy_buffer(cached.buffer);
                    destroyed += 1;
                }
            } else {
                index += 1;
            }
        }
        self.destroyed += destroyed as u64;
        destroyed
    }

    /// Wait on every outstanding fence, then destroy all cached buffers
    ///
    /// Buffers whose fence did not signal within `timeout` are destroyed
    /// anyway; the number of such fences is returned.
    pub fn shutdown(&mut self, backend: &mut dyn GpuBackend, timeout: Duration) -> usize {
        let mut timed_out = 0;
        for entry in self.entries.drain(..) {
            if !entry.fence.wait(timeout) {
                log::error!(
                    "Fence {} did not signal within {:?}, destroying {} buffers anyway",
                    entry.fence.id(),
                    timeout,
                    entry.buffers.len()
                );
                timed_out += 1;
            }
            for cached in entry.buffers {
                backend.destroy_buffer(cached.buffer);
                self.destroyed += 1;
            }
        }
        log::debug!("Buffer cache shut down ({} hits, {} misses)", self.hits, self.misses);
        timed_out
    }

    /// Number of buffers resting in the cache
    pub fn len(&self) -> usize {
        self.entries.iter().map(|entry| entry.buffers.len()).sum()
    }

    /// Whether the cache holds no buffer
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the cache counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached_buffers: self.len(),
            cached_bytes: self
                .entries
                .iter()
                .flat_map(|entry| entry.buffers.iter())
                .map(|cached| cached.buffer.capacity())
                .sum(),
            entries: self.entries.len(),
            pending_entries: self.entries.iter().filter(|entry| !entry.fence.is_signaled()).count(),
            hits: self.hits,
            misses: self.misses,
            destroyed: self.destroyed,
        }
    }
}

impl Default for BufferCache {
    fn default() -> Self {
        Self::new(BufferCacheConfig::default())
    }
}

impl Drop for BufferCache {
    fn drop(&mut self) {
        let remaining = self.len();
        if remaining > 0 {
            log::warn!("BufferCache dropped with {} buffers, call shutdown() to release them", remaining);
        }
    }
}
