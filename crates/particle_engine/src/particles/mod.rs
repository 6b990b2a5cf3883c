//! Particle layers and their allocator
//!
//! ```text
//! ParticleManager
//!     └── ParticleLayer<S: VertexEmissionStrategy>   one draw call per frame
//!             ├── particles: Vec<S::Particle>        allocations tile this vector
//!             ├── allocations: SlotMap               AllocationId → range
//!             └── render buffer                      checked out of the BufferCache
//! ```

pub mod strategy;
pub mod allocation;
pub mod layer;
pub mod manager;
pub mod spawner;

pub use strategy::{
    LayoutFlags, PointParticle, PointStrategy, PointVertex, QuadParticle, QuadStrategy, QuadVertex,
    VertexEmissionStrategy,
};
pub use allocation::{AllocationId, ParticleAccessor, ParticleAccessorMut, ParticleAllocation};
pub use layer::{BufferState, ParticleLayer, ParticleLayerBase};
pub use manager::ParticleManager;
pub use spawner::{AtlasTable, ParticleSpawner, TextureAtlas, TexturedParticle};
