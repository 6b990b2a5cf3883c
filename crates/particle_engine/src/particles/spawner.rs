//! Texture atlas lookup and particle spawners
//!
//! Emitters rarely care where their bitmap lives in the atlas: a
//! [`ParticleSpawner`] resolves the texture coordinates once and stamps them
//! on every particle it spawns.

use std::collections::HashMap;

use crate::foundation::math::Rect;
use crate::particles::allocation::AllocationId;
use crate::particles::layer::ParticleLayer;
use crate::particles::strategy::{QuadParticle, VertexEmissionStrategy};
use crate::render::RenderResult;

/// Read-only bitmap name to texture coordinates lookup
pub trait TextureAtlas: Send + Sync {
    /// Texture coordinates of `bitmap`, if the atlas contains it
    fn texcoords(&self, bitmap: &str) -> Option<Rect>;
}

/// In-memory [`TextureAtlas`]
#[derive(Debug, Clone, Default)]
pub struct AtlasTable {
    entries: HashMap<String, Rect>,
}

impl AtlasTable {
    /// Create an empty atlas
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the texture coordinates of a bitmap
    pub fn insert(&mut self, bitmap: impl Into<String>, texcoords: Rect) -> Option<Rect> {
        self.entries.insert(bitmap.into(), texcoords)
    }

    /// Builder form of [`AtlasTable::insert`]
    pub fn with_entry(mut self, bitmap: impl Into<String>, texcoords: Rect) -> Self {
        self.insert(bitmap, texcoords);
        self
    }

    /// Number of registered bitmaps
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no bitmap is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TextureAtlas for AtlasTable {
    fn texcoords(&self, bitmap: &str) -> Option<Rect> {
        self.entries.get(bitmap).copied()
    }
}

/// Particles that carry texture coordinates
pub trait TexturedParticle {
    /// Set the texture coordinates of the particle
    fn set_texcoords(&mut self, texcoords: Rect);
}

impl TexturedParticle for QuadParticle {
    fn set_texcoords(&mut self, texcoords: Rect) {
        self.texcoords = texcoords;
    }
}

/// Resolve a bitmap, falling back to the whole texture
pub fn resolve_texcoords(atlas: Option<&dyn TextureAtlas>, bitmap: &str) -> Rect {
    match atlas.and_then(|atlas| atlas.texcoords(bitmap)) {
        Some(texcoords) => texcoords,
        None => {
            log::warn!("Bitmap '{}' not found in texture atlas, using full texture", bitmap);
            Rect::unit()
        }
    }
}

/// Spawns allocations into one layer with the texture coordinates of one bitmap
pub struct ParticleSpawner<'a, S: VertexEmissionStrategy> {
    layer: &'a mut ParticleLayer<S>,
    texcoords: Rect,
}

impl<'a, S: VertexEmissionStrategy> ParticleSpawner<'a, S> {
    /// Bind `layer` to the coordinates of `bitmap` in `atlas`
    pub fn new(layer: &'a mut ParticleLayer<S>, atlas: Option<&dyn TextureAtlas>, bitmap: &str) -> Self {
        Self {
            layer,
            texcoords: resolve_texcoords(atlas, bitmap),
        }
    }

    /// Texture coordinates stamped on spawned particles
    pub fn texcoords(&self) -> Rect {
        self.texcoords
    }

    /// Target layer
    pub fn layer(&mut self) -> &mut ParticleLayer<S> {
        self.layer
    }

    /// Spawn `count` particles and initialize each with `init(particle, texcoords, index)`
    pub fn spawn_with<F>(&mut self, count: usize, mut init: F) -> RenderResult<AllocationId>
    where
        F: FnMut(&mut S::Particle, Rect, usize),
    {
        let id = self.layer.spawn(count)?;
        let texcoords = self.texcoords;
        let mut particles = self.layer.accessor_mut(id)?;
        for (index, particle) in particles.iter_mut().enumerate() {
            init(particle, texcoords, index);
        }
        Ok(id)
    }
}

impl<S> ParticleSpawner<'_, S>
where
    S: VertexEmissionStrategy,
    S::Particle: TexturedParticle,
{
    /// Spawn `count` default particles mapped to the bitmap
    pub fn spawn(&mut self, count: usize) -> RenderResult<AllocationId> {
        self.spawn_with(count, |particle, texcoords, _| particle.set_texcoords(texcoords))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ParticleLayerConfig;
    use crate::foundation::math::Vec2;
    use crate::particles::strategy::QuadStrategy;

    fn atlas() -> AtlasTable {
        AtlasTable::new().with_entry("spark", Rect::new(Vec2::new(0.5, 0.0), Vec2::new(1.0, 0.5)))
    }

    #[test]
    fn test_spawn_uses_atlas_coordinates() {
        let atlas = atlas();
        let mut layer = ParticleLayer::new("sparks", QuadStrategy, ParticleLayerConfig::default());
        let mut spawner = ParticleSpawner::new(&mut layer, Some(&atlas), "spark");
        let id = spawner.spawn(3).unwrap();

        let particles = layer.accessor(id).unwrap();
        assert_eq!(particles.len(), 3);
        assert!(particles.iter().all(|particle| particle.texcoords.min == Vec2::new(0.5, 0.0)));
    }

    #[test]
    fn test_unknown_bitmap_falls_back_to_full_texture() {
        let atlas = atlas();
        assert_eq!(resolve_texcoords(Some(&atlas), "smoke"), Rect::unit());
        assert_eq!(resolve_texcoords(None, "spark"), Rect::unit());
    }

    #[test]
    fn test_spawn_with_initializer() {
        let atlas = atlas();
        let mut layer = ParticleLayer::new("sparks", QuadStrategy, ParticleLayerConfig::default());
        let id = ParticleSpawner::new(&mut layer, Some(&atlas), "spark")
            .spawn_with(2, |particle, texcoords, index| {
                particle.texcoords = texcoords;
                particle.velocity = Vec2::new(index as f32, 0.0);
            })
            .unwrap();

        let particles = layer.accessor(id).unwrap();
        assert_eq!(particles[1].velocity, Vec2::new(1.0, 0.0));
        assert_eq!(particles[0].texcoords.max, Vec2::new(1.0, 0.5));
    }
}
