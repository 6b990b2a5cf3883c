//! In-memory GPU backend
//!
//! `HeadlessBackend` implements [`GpuBackend`] without any graphics API:
//! buffers are plain byte vectors and fences complete only when told to
//! through the [`HeadlessGpu`] controller. The controller plays the role of
//! the GPU timeline, which makes completion order fully deterministic for
//! tests and for the headless demo.
//!
//! ```rust
//! use particle_engine::render::{HeadlessBackend, Renderer};
//! use particle_engine::core::config::RendererConfig;
//!
//! let (backend, gpu) = HeadlessBackend::new();
//! let mut renderer = Renderer::new(backend, RendererConfig::default());
//! renderer.begin_frame();
//! renderer.end_frame().unwrap();
//! gpu.complete_all();
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::render::api::{Buffer, BufferId, BufferUsage, DrawRange, GpuBackend, GpuFence, PrimitiveType};
use crate::render::{RenderError, RenderResult};

/// One draw call observed by the headless backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    /// Primitive topology
    pub primitive: PrimitiveType,
    /// Buffer the vertices were read from
    pub buffer: BufferId,
    /// Vertex range
    pub range: DrawRange,
    /// Bytes of the buffer at submission time
    pub contents: Vec<u8>,
}

/// State shared between the backend and its controller
#[derive(Debug, Default)]
struct GpuTimeline {
    /// Serial of the last fence created
    submitted_serial: u64,
    /// Every fence with a serial up to this one has completed
    completed_serial: u64,
    /// Fences complete as soon as they are created
    auto_complete: bool,
    /// Fence creation fails while set
    fail_fences: bool,
    /// Optional cap on live buffer memory
    memory_limit: Option<usize>,
    live_bytes: usize,
    live_buffers: usize,
    buffers_created: u64,
    buffers_destroyed: u64,
    draws: Vec<DrawRecord>,
}

type SharedTimeline = Arc<(Mutex<GpuTimeline>, Condvar)>;

fn lock(shared: &SharedTimeline) -> MutexGuard<'_, GpuTimeline> {
    shared.0.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory implementation of [`GpuBackend`]
#[derive(Debug)]
pub struct HeadlessBackend {
    next_buffer_id: u64,
    memory: HashMap<BufferId, Vec<u8>>,
    timeline: SharedTimeline,
}

/// Controller standing in for the GPU timeline of a [`HeadlessBackend`]
#[derive(Debug, Clone)]
pub struct HeadlessGpu {
    timeline: SharedTimeline,
}

#[derive(Debug)]
struct HeadlessFence {
    serial: u64,
    timeline: SharedTimeline,
}

impl GpuFence for HeadlessFence {
    fn is_signaled(&self) -> bool {
        lock(&self.timeline).completed_serial >= self.serial
    }

    fn wait(&self, timeout: Duration) -> bool {
        let (mutex, condvar) = &*self.timeline;
        let guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |timeline| timeline.completed_serial < self.serial)
            .unwrap_or_else(PoisonError::into_inner);
        guard.completed_serial >= self.serial
    }
}

impl HeadlessBackend {
    /// Create a backend and the controller driving its fences
    pub fn new() -> (Self, HeadlessGpu) {
        let timeline: SharedTimeline = Arc::new((Mutex::new(GpuTimeline::default()), Condvar::new()));
        let backend = Self {
            next_buffer_id: 1,
            memory: HashMap::new(),
            timeline: timeline.clone(),
        };
        (backend, HeadlessGpu { timeline })
    }

    /// Create a backend whose fences complete immediately
    pub fn auto_completing() -> (Self, HeadlessGpu) {
        let (backend, gpu) = Self::new();
        gpu.set_auto_complete(true);
        (backend, gpu)
    }
}

impl GpuBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_buffer(&mut self, size: usize, usage: BufferUsage) -> RenderResult<Buffer> {
        let mut timeline = lock(&self.timeline);
        if let Some(limit) = timeline.memory_limit {
            if timeline.live_bytes.saturating_add(size) > limit {
                return Err(RenderError::ResourceExhausted(format!(
                    "cannot allocate {} bytes ({} of {} in use)",
                    size, timeline.live_bytes, limit
                )));
            }
        }
        timeline.live_bytes += size;
        timeline.live_buffers += 1;
        timeline.buffers_created += 1;
        drop(timeline);

        let id = BufferId(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.memory.insert(id, vec![0; size]);
        Ok(Buffer::new(id, size, usage))
    }

    fn destroy_buffer(&mut self, buffer: Buffer) {
        if let Some(bytes) = self.memory.remove(&buffer.id()) {
            let mut timeline = lock(&self.timeline);
            timeline.live_bytes -= bytes.len();
            timeline.live_buffers -= 1;
            timeline.buffers_destroyed += 1;
        } else {
            log::warn!("Destroying unknown {}", buffer.id());
        }
    }

    fn map_buffer(&mut self, buffer: &Buffer) -> RenderResult<&mut [u8]> {
        self.memory
            .get_mut(&buffer.id())
            .map(Vec::as_mut_slice)
            .ok_or_else(|| RenderError::Backend(format!("map of unknown {}", buffer.id())))
    }

    fn unmap_buffer(&mut self, _buffer: &Buffer) {}

    fn create_fence(&mut self) -> RenderResult<Box<dyn GpuFence>> {
        let (mutex, condvar) = &*self.timeline;
        let mut timeline = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        if timeline.fail_fences {
            return Err(RenderError::ResourceExhausted("fence creation disabled".to_string()));
        }
        timeline.submitted_serial += 1;
        let serial = timeline.submitted_serial;
        if timeline.auto_complete {
            timeline.completed_serial = serial;
            condvar.notify_all();
        }
        Ok(Box::new(HeadlessFence {
            serial,
            timeline: self.timeline.clone(),
        }))
    }

    fn draw(&mut self, primitive: PrimitiveType, buffer: &Buffer, range: DrawRange) -> RenderResult<()> {
        let contents = self
            .memory
            .get(&buffer.id())
            .cloned()
            .ok_or_else(|| RenderError::Backend(format!("draw from unknown {}", buffer.id())))?;
        lock(&self.timeline).draws.push(DrawRecord {
            primitive,
            buffer: buffer.id(),
            range,
            contents,
        });
        Ok(())
    }
}

impl HeadlessGpu {
    /// Complete every fence submitted so far
    pub fn complete_all(&self) {
        let (mutex, condvar) = &*self.timeline;
        let mut timeline = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        timeline.completed_serial = timeline.submitted_serial;
        condvar.notify_all();
    }

    /// Complete the `count` oldest pending fences, in submission order
    pub fn complete_next(&self, count: u64) {
        let (mutex, condvar) = &*self.timeline;
        let mut timeline = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        timeline.completed_serial = timeline
            .completed_serial
            .saturating_add(count)
            .min(timeline.submitted_serial);
        condvar.notify_all();
    }

    /// Number of fences submitted but not yet completed
    pub fn pending_fences(&self) -> u64 {
        let timeline = lock(&self.timeline);
        timeline.submitted_serial - timeline.completed_serial
    }

    /// Make fences complete as soon as they are created
    pub fn set_auto_complete(&self, enabled: bool) {
        lock(&self.timeline).auto_complete = enabled;
    }

    /// Make fence creation fail
    pub fn set_fence_failure(&self, enabled: bool) {
        lock(&self.timeline).fail_fences = enabled;
    }

    /// Cap the total size of live buffers
    pub fn set_memory_limit(&self, limit: Option<usize>) {
        lock(&self.timeline).memory_limit = limit;
    }

    /// Draw calls recorded since the last [`HeadlessGpu::take_draws`]
    pub fn draws(&self) -> Vec<DrawRecord> {
        lock(&self.timeline).draws.clone()
    }

    /// Drain the recorded draw calls
    pub fn take_draws(&self) -> Vec<DrawRecord> {
        std::mem::take(&mut lock(&self.timeline).draws)
    }

    /// Buffers currently alive in the backend
    pub fn live_buffers(&self) -> usize {
        lock(&self.timeline).live_buffers
    }

    /// Bytes currently allocated
    pub fn live_bytes(&self) -> usize {
        lock(&self.timeline).live_bytes
    }

    /// Buffers created since startup
    pub fn buffers_created(&self) -> u64 {
        lock(&self.timeline).buffers_created
    }

    /// Buffers destroyed since startup
    pub fn buffers_destroyed(&self) -> u64 {
        lock(&self.timeline).buffers_destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fences_complete_in_order() {
        let (mut backend, gpu) = HeadlessBackend::new();
        let first = backend.create_fence().unwrap();
        let second = backend.create_fence().unwrap();
        assert_eq!(gpu.pending_fences(), 2);

        gpu.complete_next(1);
        assert!(first.is_signaled());
        assert!(!second.is_signaled());

        gpu.complete_all();
        assert!(second.is_signaled());
        assert_eq!(gpu.pending_fences(), 0);
    }

    #[test]
    fn test_wait_times_out_on_pending_fence() {
        let (mut backend, _gpu) = HeadlessBackend::new();
        let fence = backend.create_fence().unwrap();
        assert!(!fence.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_wakes_up_on_completion() {
        let (mut backend, gpu) = HeadlessBackend::new();
        let fence = backend.create_fence().unwrap();

        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            gpu.complete_all();
        });
        assert!(fence.wait(Duration::from_secs(5)));
        waker.join().unwrap();
    }

    #[test]
    fn test_memory_limit() {
        let (mut backend, gpu) = HeadlessBackend::new();
        gpu.set_memory_limit(Some(100));

        let buffer = backend.create_buffer(80, BufferUsage::Dynamic).unwrap();
        let result = backend.create_buffer(40, BufferUsage::Dynamic);
        assert!(matches!(result, Err(RenderError::ResourceExhausted(_))));

        backend.destroy_buffer(buffer);
        assert_eq!(gpu.live_bytes(), 0);
        assert!(backend.create_buffer(40, BufferUsage::Dynamic).is_ok());
    }

    #[test]
    fn test_draw_captures_contents() {
        let (mut backend, gpu) = HeadlessBackend::new();
        let buffer = backend.create_buffer(4, BufferUsage::Static).unwrap();
        backend.map_buffer(&buffer).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        backend.unmap_buffer(&buffer);

        backend.draw(PrimitiveType::Points, &buffer, DrawRange::from_start(4)).unwrap();
        let draws = gpu.take_draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].contents, vec![1, 2, 3, 4]);
        assert!(gpu.draws().is_empty());
    }
}
