//! # Particle Engine
//!
//! Fence-gated GPU buffer reuse and a particle-layer allocator.
//!
//! ## Features
//!
//! - **Buffer cache**: GPU buffers are recycled once the fence of the last
//!   frame that read them has signaled, never earlier
//! - **Particle layers**: contiguous particle storage per vertex emission
//!   strategy, drawn with one draw call per layer
//! - **Allocations**: emitters own ranges of a layer and access them through
//!   borrow-checked accessors
//! - **Headless backend**: deterministic in-memory GPU for tests and tools
//!
//! ## Quick Start
//!
//! ```rust
//! use particle_engine::prelude::*;
//!
//! let (backend, gpu) = HeadlessBackend::new();
//! let mut renderer = Renderer::new(backend, RendererConfig::default());
//! let mut particles = ParticleManager::default();
//!
//! let layer = particles.add_layer("background", 0, QuadStrategy).unwrap();
//! layer.spawn(4).unwrap();
//!
//! renderer.begin_frame();
//! particles.tick(1.0 / 60.0);
//! assert_eq!(particles.render(&mut renderer), 1);
//! renderer.end_frame().unwrap();
//!
//! gpu.complete_all();
//! particles.release_gpu_resources(renderer.cache_mut());
//! renderer.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

// Core engine modules
pub mod core;
pub mod config;

pub mod foundation;
pub mod render;
pub mod particles;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::config::{BufferCacheConfig, ParticleLayerConfig, RendererConfig},
        foundation::math::{Rect, Vec2, Vec4},
        render::{
            Buffer, BufferCache, BufferUsage, DrawRange, DynamicMesh, FenceSignal, GpuBackend, HeadlessBackend,
            HeadlessGpu, PrimitiveType, RenderError, RenderResult, Renderer,
        },
        particles::{
            AllocationId, AtlasTable, ParticleLayer, ParticleLayerBase, ParticleManager, ParticleSpawner, PointParticle,
            PointStrategy, QuadParticle, QuadStrategy, TextureAtlas, VertexEmissionStrategy,
        },
    };
}
