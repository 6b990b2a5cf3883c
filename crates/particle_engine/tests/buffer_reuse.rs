//! Buffer reuse across frames, driven through the headless backend

use std::time::Duration;

use particle_engine::foundation::logging;
use particle_engine::prelude::*;
use particle_engine::render::GpuFence;

fn setup() -> (Renderer, HeadlessGpu) {
    logging::init_for_tests();
    let (backend, gpu) = HeadlessBackend::new();
    (Renderer::new(backend, RendererConfig::default()), gpu)
}

#[test]
fn test_buffer_never_reused_while_frame_in_flight() {
    let (mut renderer, gpu) = setup();

    renderer.begin_frame();
    let buffer = renderer.acquire_buffer(256).unwrap();
    let first_id = buffer.id();
    let fence = renderer.current_frame_fence();
    renderer.release_buffer(buffer, &fence);
    renderer.end_frame().unwrap();

    // The GPU has not finished frame 0: same size requests get new memory
    for _ in 0..4 {
        renderer.begin_frame();
        let buffer = renderer.acquire_buffer(256).unwrap();
        assert_ne!(buffer.id(), first_id);
        let fence = renderer.current_frame_fence();
        renderer.release_buffer(buffer, &fence);
        renderer.end_frame().unwrap();
    }

    gpu.complete_next(1);
    renderer.begin_frame();
    let buffer = renderer.acquire_buffer(256).unwrap();
    assert_eq!(buffer.id(), first_id);
    renderer.cache_mut().release_unused(buffer);
    renderer.end_frame().unwrap();

    gpu.complete_all();
    assert_eq!(renderer.shutdown(), 0);
    assert_eq!(gpu.live_buffers(), 0);
}

#[test]
fn test_reuse_follows_signal_order_not_submission_order() {
    logging::init_for_tests();
    let (mut backend, _gpu) = HeadlessBackend::new();
    let mut cache = BufferCache::default();

    let early = FenceSignal::deferred();
    let late = FenceSignal::deferred();
    let a = cache.acquire(&mut backend, 64).unwrap();
    let b = cache.acquire(&mut backend, 64).unwrap();
    let (a_id, b_id) = (a.id(), b.id());
    cache.release(a, &early);
    cache.release(b, &late);

    // Only the later submission completed
    late.arm(Box::new(CompletedFence));
    let reused = cache.acquire(&mut backend, 64).unwrap();
    assert_eq!(reused.id(), b_id);
    assert_ne!(reused.id(), a_id);

    cache.release_unused(reused);
    early.arm(Box::new(CompletedFence));
    assert_eq!(cache.shutdown(&mut backend, Duration::ZERO), 0);
}

#[derive(Debug)]
struct CompletedFence;

impl GpuFence for CompletedFence {
    fn is_signaled(&self) -> bool {
        true
    }

    fn wait(&self, _timeout: Duration) -> bool {
        true
    }
}

#[test]
fn test_steady_state_allocates_one_buffer_per_frame_in_flight() {
    let (mut renderer, gpu) = setup();
    let mut mesh = DynamicMesh::new();
    let vertices = [[0.0f32; 4]; 30];

    // GPU lags two frames behind the CPU
    for frame in 0..20u64 {
        renderer.begin_frame();
        mesh.clear(renderer.cache_mut());
        mesh.push_vertices(&mut renderer, PrimitiveType::Triangles, &vertices).unwrap();
        mesh.render(&mut renderer);
        renderer.end_frame().unwrap();
        if frame >= 2 {
            gpu.complete_next(1);
        }
    }
    assert!(gpu.buffers_created() <= 4, "created {}", gpu.buffers_created());
    assert!(renderer.cache().stats().hits >= 16);

    mesh.clear(renderer.cache_mut());
    gpu.complete_all();
    assert_eq!(renderer.shutdown(), 0);
    assert_eq!(gpu.live_buffers(), 0);
}

#[test]
fn test_garbage_collection_bounds_memory() {
    logging::init_for_tests();
    let (backend, gpu) = HeadlessBackend::auto_completing();
    let config = RendererConfig::default().with_cache(BufferCacheConfig::new().with_max_idle_frames(3));
    let mut renderer = Renderer::new(backend, config);

    renderer.begin_frame();
    let sizes = [16, 64, 256, 1024];
    for size in sizes {
        let buffer = renderer.acquire_buffer(size).unwrap();
        let fence = renderer.current_frame_fence();
        renderer.release_buffer(buffer, &fence);
    }
    renderer.end_frame().unwrap();
    assert_eq!(renderer.cache().len(), sizes.len());

    for _ in 0..4 {
        renderer.begin_frame();
        renderer.end_frame().unwrap();
    }
    assert!(renderer.cache().is_empty());
    assert_eq!(gpu.live_buffers(), 0);
}

#[test]
fn test_out_of_memory_is_reported() {
    let (mut renderer, gpu) = setup();
    gpu.set_memory_limit(Some(100));
    let result = renderer.acquire_buffer(200);
    assert!(matches!(result, Err(RenderError::ResourceExhausted(_))));
}

fn render_until_failure(renderer: &mut Renderer, gpu: &HeadlessGpu) -> RenderResult<()> {
    renderer.begin_frame();
    let buffer = renderer.acquire_buffer(64)?;
    let fence = renderer.current_frame_fence();
    renderer.release_buffer(buffer, &fence);
    renderer.end_frame()?;

    gpu.set_memory_limit(Some(64));
    renderer.begin_frame();
    renderer.acquire_buffer(4096)?;
    renderer.end_frame()
}

#[test]
fn test_early_return_still_destroys_buffers() {
    logging::init_for_tests();
    let (backend, gpu) = HeadlessBackend::auto_completing();
    {
        let mut renderer = Renderer::new(backend, RendererConfig::default());
        let result = render_until_failure(&mut renderer, &gpu);
        assert!(matches!(result, Err(RenderError::ResourceExhausted(_))));
    }
    assert_eq!(gpu.buffers_created(), 1);
    assert_eq!(gpu.live_buffers(), 0);
}
