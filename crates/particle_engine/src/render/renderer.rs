//! Frame-level renderer context
//!
//! The [`Renderer`] owns the GPU backend and the [`BufferCache`] feeding it.
//! Geometry producers (particle layers, dynamic meshes) borrow it for the
//! duration of a frame to acquire buffers, upload vertices and submit draws.
//!
//! # Frame lifecycle
//!
//! ```text
//! begin_frame()
//!     ├── acquire_buffer / upload / draw      (producers)
//!     ├── current_frame_fence()               (lazily created, unarmed)
//!     └── release_buffer(buffer, &fence)      (gated on this frame)
//! end_frame()
//!     ├── arm the frame fence on the backend
//!     └── advance the cache clock, collect idle buffers
//! ```

use std::time::Duration;

use crate::core::config::RendererConfig;
use crate::render::api::{Buffer, DrawRange, GpuBackend, PrimitiveType};
use crate::render::buffer_cache::BufferCache;
use crate::render::sync::FenceSignal;
use crate::render::{RenderError, RenderResult};

/// Counters collected over one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Draw calls submitted to the backend
    pub draw_calls: usize,
    /// Vertices covered by those draw calls
    pub vertices: usize,
    /// Buffers checked out of the cache
    pub buffers_acquired: usize,
    /// Layers that could not be drawn this frame
    pub layers_skipped: usize,
}

/// Renderer context owning the backend and the buffer cache
pub struct Renderer {
    backend: Box<dyn GpuBackend>,
    cache: BufferCache,
    config: RendererConfig,
    frame_index: u64,
    in_frame: bool,
    current_fence: Option<FenceSignal>,
    stats: FrameStats,
    last_stats: FrameStats,
}

impl Renderer {
    /// Create a renderer on top of `backend`
    pub fn new(backend: impl GpuBackend + 'static, config: RendererConfig) -> Self {
        log::info!("Creating renderer on {} backend", backend.name());
        Self {
            backend: Box::new(backend),
            cache: BufferCache::new(config.cache.clone()),
            config,
            frame_index: 0,
            in_frame: false,
            current_fence: None,
            stats: FrameStats::default(),
            last_stats: FrameStats::default(),
        }
    }

    /// Start recording a frame
    pub fn begin_frame(&mut self) {
        if self.in_frame {
            log::warn!("begin_frame called twice without end_frame (frame {})", self.frame_index);
        }
        self.in_frame = true;
        self.stats = FrameStats::default();
    }

    /// Finish the frame and arm its fence
    ///
    /// Fails with [`RenderError::ResourceExhausted`] when the backend cannot
    /// create the fence. Buffers gated on that frame then stay pending until
    /// [`Renderer::shutdown`].
    pub fn end_frame(&mut self) -> RenderResult<()> {
        if !self.in_frame {
            log::warn!("end_frame called without begin_frame (frame {})", self.frame_index);
        }
        self.in_frame = false;

        let armed = match self.current_fence.take() {
            Some(fence) => fence.arm_with(self.backend.as_mut()),
            None => Ok(()),
        };

        self.cache.end_frame();
        self.cache.collect_garbage(self.backend.as_mut());
        self.last_stats = self.stats;
        self.frame_index += 1;

        armed.map_err(|error| {
            log::error!("Failed to arm fence of frame {}: {}", self.frame_index - 1, error);
            error
        })
    }

    /// Fence signaled once the GPU work of the current frame completes
    ///
    /// Every call within a frame returns the same fence.
    pub fn current_frame_fence(&mut self) -> FenceSignal {
        self.current_fence.get_or_insert_with(FenceSignal::deferred).clone()
    }

    /// Check a buffer of at least `min_size` bytes out of the cache
    pub fn acquire_buffer(&mut self, min_size: usize) -> RenderResult<Buffer> {
        let buffer = self.cache.acquire(self.backend.as_mut(), min_size)?;
        self.stats.buffers_acquired += 1;
        Ok(buffer)
    }

    /// Return a buffer to the cache, reusable once `fence` is signaled
    pub fn release_buffer(&mut self, buffer: Buffer, fence: &FenceSignal) {
        self.cache.release(buffer, fence);
    }

    /// Map `buffer` for CPU writes
    ///
    /// The buffer reports [`Buffer::is_mapped`] until [`Renderer::unmap_buffer`]
    /// and must not be released before that.
    pub fn map_buffer(&mut self, buffer: &mut Buffer) -> RenderResult<&mut [u8]> {
        let memory = self.backend.map_buffer(buffer)?;
        buffer.set_mapped(true);
        Ok(memory)
    }

    /// Unmap a buffer mapped with [`Renderer::map_buffer`]
    pub fn unmap_buffer(&mut self, buffer: &mut Buffer) {
        if buffer.is_mapped() {
            self.backend.unmap_buffer(buffer);
            buffer.set_mapped(false);
        }
    }

    /// Copy `bytes` to the start of `buffer`
    ///
    /// The buffer is unmapped again before returning, whatever the outcome.
    pub fn upload(&mut self, buffer: &mut Buffer, bytes: &[u8]) -> RenderResult<()> {
        if bytes.len() > buffer.capacity() {
            return Err(RenderError::Backend(format!(
                "upload of {} bytes into {} of {} bytes",
                bytes.len(),
                buffer.id(),
                buffer.capacity()
            )));
        }

        let memory = self.map_buffer(buffer)?;
        memory[..bytes.len()].copy_from_slice(bytes);
        self.unmap_buffer(buffer);
        Ok(())
    }

    /// Submit a draw call; empty ranges are skipped
    pub fn draw(&mut self, primitive: PrimitiveType, buffer: &Buffer, range: DrawRange) -> RenderResult<()> {
        if range.is_empty() {
            return Ok(());
        }
        self.backend.draw(primitive, buffer, range)?;
        self.stats.draw_calls += 1;
        self.stats.vertices += range.vertex_count;
        Ok(())
    }

    pub(crate) fn record_skipped_layer(&mut self) {
        self.stats.layers_skipped += 1;
    }

    /// Buffer cache
    pub fn cache(&self) -> &BufferCache {
        &self.cache
    }

    /// Mutable buffer cache, to give back buffers outside of a frame
    pub fn cache_mut(&mut self) -> &mut BufferCache {
        &mut self.cache
    }

    /// Underlying backend
    pub fn backend_mut(&mut self) -> &mut dyn GpuBackend {
        self.backend.as_mut()
    }

    /// Renderer configuration
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Number of frames ended so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Whether a frame is being recorded
    pub fn is_in_frame(&self) -> bool {
        self.in_frame
    }

    /// Statistics of the frame being recorded
    pub fn current_stats(&self) -> FrameStats {
        self.stats
    }

    /// Statistics of the last completed frame
    pub fn frame_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// Wait for outstanding GPU work and destroy every cached buffer
    ///
    /// Returns the number of fences that did not signal in time. Also runs
    /// on drop when buffers are still cached.
    pub fn shutdown(&mut self) -> usize {
        if let Some(fence) = self.current_fence.take() {
            // Buffers released during an unfinished frame
            if let Err(error) = fence.arm_with(self.backend.as_mut()) {
                log::error!("Failed to arm fence during shutdown: {}", error);
            }
        }
        let timeout: Duration = self.config.shutdown_timeout();
        let timed_out = self.cache.shutdown(self.backend.as_mut(), timeout);
        if timed_out > 0 {
            log::error!("{} fences timed out during renderer shutdown", timed_out);
        } else {
            log::info!("Renderer shut down after {} frames", self.frame_index);
        }
        timed_out
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if self.cache.is_empty() && self.current_fence.is_none() {
            return;
        }
        log::debug!("Renderer dropped with {} cached buffers", self.cache.len());
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::HeadlessBackend;

    #[test]
    fn test_frame_fence_is_shared_within_a_frame() {
        let (backend, gpu) = HeadlessBackend::new();
        let mut renderer = Renderer::new(backend, RendererConfig::default());

        renderer.begin_frame();
        let first = renderer.current_frame_fence();
        let second = renderer.current_frame_fence();
        assert_eq!(first, second);
        assert!(!first.is_armed());

        renderer.end_frame().unwrap();
        assert!(first.is_armed());
        assert!(!first.is_signaled());

        renderer.begin_frame();
        assert_ne!(renderer.current_frame_fence(), first);
        renderer.end_frame().unwrap();

        gpu.complete_next(1);
        assert!(first.is_signaled());
        renderer.shutdown();
    }

    #[test]
    fn test_frame_without_draws_creates_no_fence() {
        let (backend, gpu) = HeadlessBackend::new();
        let mut renderer = Renderer::new(backend, RendererConfig::default());
        renderer.begin_frame();
        renderer.end_frame().unwrap();
        assert_eq!(gpu.pending_fences(), 0);
        assert_eq!(renderer.frame_index(), 1);
    }

    #[test]
    fn test_upload_and_draw() {
        let (backend, gpu) = HeadlessBackend::new();
        let mut renderer = Renderer::new(backend, RendererConfig::default());

        renderer.begin_frame();
        let mut buffer = renderer.acquire_buffer(4).unwrap();
        renderer.upload(&mut buffer, &[9, 8, 7, 6]).unwrap();
        assert!(!buffer.is_mapped());

        renderer.draw(PrimitiveType::Points, &buffer, DrawRange::from_start(4)).unwrap();
        renderer.draw(PrimitiveType::Points, &buffer, DrawRange::from_start(0)).unwrap();
        let fence = renderer.current_frame_fence();
        renderer.release_buffer(buffer, &fence);
        renderer.end_frame().unwrap();

        let stats = renderer.frame_stats();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.vertices, 4);
        assert_eq!(stats.buffers_acquired, 1);

        let draws = gpu.take_draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].contents, vec![9, 8, 7, 6]);

        gpu.complete_all();
        assert_eq!(renderer.shutdown(), 0);
        assert_eq!(gpu.live_buffers(), 0);
    }

    #[test]
    fn test_oversized_upload_fails_unmapped() {
        let (backend, _gpu) = HeadlessBackend::new();
        let mut renderer = Renderer::new(backend, RendererConfig::default());
        let mut buffer = renderer.acquire_buffer(2).unwrap();

        let result = renderer.upload(&mut buffer, &[1, 2, 3]);
        assert!(matches!(result, Err(RenderError::Backend(_))));
        assert!(!buffer.is_mapped());

        renderer.cache_mut().release_unused(buffer);
        renderer.shutdown();
    }

    #[test]
    fn test_fence_failure_is_reported() {
        let (backend, gpu) = HeadlessBackend::new();
        let mut renderer = Renderer::new(backend, RendererConfig::default());
        gpu.set_fence_failure(true);

        renderer.begin_frame();
        let _fence = renderer.current_frame_fence();
        let result = renderer.end_frame();
        assert!(matches!(result, Err(RenderError::ResourceExhausted(_))));
        assert_eq!(renderer.frame_index(), 1);
    }

    #[test]
    fn test_shutdown_reports_timed_out_fences() {
        let (backend, gpu) = HeadlessBackend::new();
        let config = RendererConfig::default().with_shutdown_timeout(Duration::from_millis(1));
        let mut renderer = Renderer::new(backend, config);

        renderer.begin_frame();
        let buffer = renderer.acquire_buffer(8).unwrap();
        let fence = renderer.current_frame_fence();
        renderer.release_buffer(buffer, &fence);
        renderer.end_frame().unwrap();

        assert_eq!(renderer.shutdown(), 1);
        assert_eq!(gpu.live_buffers(), 0);
    }

    #[test]
    fn test_drop_without_shutdown_destroys_buffers() {
        let (backend, gpu) = HeadlessBackend::new();
        {
            let mut renderer = Renderer::new(backend, RendererConfig::default());
            renderer.begin_frame();
            let buffer = renderer.acquire_buffer(64).unwrap();
            let fence = renderer.current_frame_fence();
            renderer.release_buffer(buffer, &fence);
            renderer.end_frame().unwrap();
            gpu.complete_all();
        }
        assert_eq!(gpu.live_buffers(), 0);
    }

    #[test]
    fn test_drop_arms_fence_of_unfinished_frame() {
        let (backend, gpu) = HeadlessBackend::auto_completing();
        {
            let mut renderer = Renderer::new(backend, RendererConfig::default());
            renderer.begin_frame();
            let buffer = renderer.acquire_buffer(16).unwrap();
            let fence = renderer.current_frame_fence();
            renderer.release_buffer(buffer, &fence);
        }
        assert_eq!(gpu.live_buffers(), 0);
    }

    #[test]
    fn test_drop_after_shutdown_destroys_nothing_twice() {
        let (backend, gpu) = HeadlessBackend::new();
        let mut renderer = Renderer::new(backend, RendererConfig::default());
        let buffer = renderer.acquire_buffer(32).unwrap();
        renderer.cache_mut().release_unused(buffer);

        assert_eq!(renderer.shutdown(), 0);
        assert_eq!(gpu.buffers_destroyed(), 1);
        drop(renderer);
        assert_eq!(gpu.buffers_destroyed(), 1);
    }

    #[test]
    fn test_map_buffer_tracks_mapped_state() {
        let (backend, _gpu) = HeadlessBackend::new();
        let mut renderer = Renderer::new(backend, RendererConfig::default());
        let mut buffer = renderer.acquire_buffer(4).unwrap();

        renderer.map_buffer(&mut buffer).unwrap()[0] = 1;
        assert!(buffer.is_mapped());
        renderer.unmap_buffer(&mut buffer);
        assert!(!buffer.is_mapped());

        renderer.cache_mut().release_unused(buffer);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released while mapped")]
    fn test_releasing_mapped_buffer_asserts() {
        let (backend, _gpu) = HeadlessBackend::new();
        let mut renderer = Renderer::new(backend, RendererConfig::default());
        let mut buffer = renderer.acquire_buffer(4).unwrap();
        renderer.map_buffer(&mut buffer).unwrap();
        renderer.cache_mut().release_unused(buffer);
    }
}
