//! Particle layer manager
//!
//! Owns every layer of a scene, keyed by name, and drives them in render
//! order.
//!
//! ```text
//! ParticleManager
//!     ├── "background"  order -10   ParticleLayer<QuadStrategy>
//!     ├── "smoke"       order   0   ParticleLayer<QuadStrategy>
//!     └── "sparks"      order   0   ParticleLayer<PointStrategy>   (added after smoke)
//! ```
//!
//! Layers with the same order key keep their insertion order. Layers are
//! stored type-erased as [`ParticleLayerBase`] and downcast back to their
//! concrete [`ParticleLayer`] on typed lookup.

use std::sync::Arc;

use crate::core::config::ParticleLayerConfig;
use crate::particles::layer::{ParticleLayer, ParticleLayerBase};
use crate::particles::spawner::{ParticleSpawner, TextureAtlas};
use crate::particles::strategy::VertexEmissionStrategy;
use crate::render::buffer_cache::BufferCache;
use crate::render::renderer::Renderer;
use crate::render::{RenderError, RenderResult};

struct LayerSlot {
    order: i32,
    insertion: u64,
    layer: Box<dyn ParticleLayerBase>,
}

/// Registry of particle layers, rendered in order
pub struct ParticleManager {
    layers: Vec<LayerSlot>,
    next_insertion: u64,
    default_config: ParticleLayerConfig,
    atlas: Option<Arc<dyn TextureAtlas>>,
}

impl ParticleManager {
    /// Create a manager whose layers default to `default_config`
    pub fn new(default_config: ParticleLayerConfig) -> Self {
        Self {
            layers: Vec::new(),
            next_insertion: 0,
            default_config,
            atlas: None,
        }
    }

    /// Add a layer with the default layer flags
    pub fn add_layer<S: VertexEmissionStrategy>(
        &mut self,
        id: &str,
        order: i32,
        strategy: S,
    ) -> RenderResult<&mut ParticleLayer<S>> {
        let config = self.default_config;
        self.add_layer_with_config(id, order, strategy, config)
    }

    /// Add a layer
    ///
    /// Fails with [`RenderError::DuplicateName`] when `id` is taken.
    pub fn add_layer_with_config<S: VertexEmissionStrategy>(
        &mut self,
        id: &str,
        order: i32,
        strategy: S,
        config: ParticleLayerConfig,
    ) -> RenderResult<&mut ParticleLayer<S>> {
        if self.contains_layer(id) {
            return Err(RenderError::DuplicateName(id.to_string()));
        }

        self.layers.push(LayerSlot {
            order,
            insertion: self.next_insertion,
            layer: Box::new(ParticleLayer::new(id, strategy, config)),
        });
        self.next_insertion += 1;
        self.sort();
        log::debug!("Added particle layer '{}' at order {}", id, order);

        self.layer_mut::<S>(id)
    }

    /// Remove a layer, handing its render buffer back to `cache`
    pub fn remove_layer(&mut self, id: &str, cache: &mut BufferCache) -> RenderResult<()> {
        let index = self.index_of(id)?;
        let mut slot = self.layers.remove(index);
        slot.layer.release_gpu_resources(cache);
        log::debug!("Removed particle layer '{}'", id);
        Ok(())
    }

    /// Whether a layer is registered under `id`
    pub fn contains_layer(&self, id: &str) -> bool {
        self.layers.iter().any(|slot| slot.layer.name() == id)
    }

    /// Typed access to a layer
    pub fn layer<S: VertexEmissionStrategy>(&self, id: &str) -> RenderResult<&ParticleLayer<S>> {
        let index = self.index_of(id)?;
        self.layers[index]
            .layer
            .as_any()
            .downcast_ref::<ParticleLayer<S>>()
            .ok_or_else(|| strategy_mismatch(id))
    }

    /// Mutable typed access to a layer
    pub fn layer_mut<S: VertexEmissionStrategy>(&mut self, id: &str) -> RenderResult<&mut ParticleLayer<S>> {
        let index = self.index_of(id)?;
        self.layers[index]
            .layer
            .as_any_mut()
            .downcast_mut::<ParticleLayer<S>>()
            .ok_or_else(|| strategy_mismatch(id))
    }

    /// Strategy-independent access to a layer
    pub fn layer_base(&self, id: &str) -> RenderResult<&dyn ParticleLayerBase> {
        let index = self.index_of(id)?;
        Ok(&*self.layers[index].layer)
    }

    /// Mutable strategy-independent access to a layer
    pub fn layer_base_mut(&mut self, id: &str) -> RenderResult<&mut dyn ParticleLayerBase> {
        let index = self.index_of(id)?;
        Ok(&mut *self.layers[index].layer)
    }

    /// Move a layer to another order key
    ///
    /// The layer keeps its insertion rank among layers of equal order.
    pub fn set_render_order(&mut self, id: &str, order: i32) -> RenderResult<()> {
        let index = self.index_of(id)?;
        self.layers[index].order = order;
        self.sort();
        Ok(())
    }

    /// Layer ids in render order
    pub fn layer_ids(&self) -> Vec<&str> {
        self.layers.iter().map(|slot| slot.layer.name()).collect()
    }

    /// Number of layers
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Live particles over every layer
    pub fn total_particle_count(&self) -> usize {
        self.layers.iter().map(|slot| slot.layer.particle_count()).sum()
    }

    /// Advance every layer by `delta_time` seconds
    pub fn tick(&mut self, delta_time: f32) {
        for slot in &mut self.layers {
            slot.layer.tick(delta_time);
        }
    }

    /// Draw every layer in order, returning the number of draw calls
    pub fn render(&mut self, renderer: &mut Renderer) -> usize {
        self.layers
            .iter_mut()
            .map(|slot| slot.layer.render(renderer))
            .sum()
    }

    /// Hand the render buffer of every layer back to `cache`
    pub fn release_gpu_resources(&mut self, cache: &mut BufferCache) {
        for slot in &mut self.layers {
            slot.layer.release_gpu_resources(cache);
        }
    }

    /// Share a texture atlas with the spawners created by this manager
    pub fn set_texture_atlas(&mut self, atlas: Arc<dyn TextureAtlas>) {
        self.atlas = Some(atlas);
    }

    /// Texture atlas shared with spawners
    pub fn texture_atlas(&self) -> Option<&Arc<dyn TextureAtlas>> {
        self.atlas.as_ref()
    }

    /// Spawner bound to layer `id` and to `bitmap` in the texture atlas
    pub fn spawner<S: VertexEmissionStrategy>(&mut self, id: &str, bitmap: &str) -> RenderResult<ParticleSpawner<'_, S>> {
        let atlas = self.atlas.clone();
        let layer = self.layer_mut::<S>(id)?;
        Ok(ParticleSpawner::new(layer, atlas.as_deref(), bitmap))
    }

    fn index_of(&self, id: &str) -> RenderResult<usize> {
        self.layers
            .iter()
            .position(|slot| slot.layer.name() == id)
            .ok_or_else(|| RenderError::LayerNotFound(id.to_string()))
    }

    fn sort(&mut self) {
        self.layers.sort_by_key(|slot| (slot.order, slot.insertion));
    }
}

impl Default for ParticleManager {
    fn default() -> Self {
        Self::new(ParticleLayerConfig::default())
    }
}

fn strategy_mismatch(id: &str) -> RenderError {
    RenderError::LayerNotFound(format!("{} (registered with another strategy)", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RendererConfig;
    use crate::foundation::math::{Rect, Vec2};
    use crate::particles::spawner::AtlasTable;
    use crate::particles::strategy::{PointStrategy, QuadStrategy};
    use crate::render::backends::headless::HeadlessBackend;

    #[test]
    fn test_duplicate_layer_name() {
        let mut manager = ParticleManager::default();
        manager.add_layer("fx", 0, QuadStrategy).unwrap();
        let result = manager.add_layer("fx", 1, PointStrategy);
        assert!(matches!(result, Err(RenderError::DuplicateName(name)) if name == "fx"));
        assert_eq!(manager.layer_count(), 1);
    }

    #[test]
    fn test_render_order_ties_keep_insertion_order() {
        let mut manager = ParticleManager::default();
        manager.add_layer("b", 0, QuadStrategy).unwrap();
        manager.add_layer("a", 0, QuadStrategy).unwrap();
        manager.add_layer("back", -5, PointStrategy).unwrap();
        manager.add_layer("front", 10, PointStrategy).unwrap();
        assert_eq!(manager.layer_ids(), vec!["back", "b", "a", "front"]);

        manager.set_render_order("front", -10).unwrap();
        manager.set_render_order("b", 0).unwrap();
        assert_eq!(manager.layer_ids(), vec!["front", "back", "b", "a"]);
    }

    #[test]
    fn test_typed_lookup() {
        let mut manager = ParticleManager::default();
        manager.add_layer("quads", 0, QuadStrategy).unwrap().spawn(2).unwrap();

        assert_eq!(manager.layer::<QuadStrategy>("quads").unwrap().particle_count(), 2);
        assert!(matches!(
            manager.layer::<PointStrategy>("quads"),
            Err(RenderError::LayerNotFound(_))
        ));
        assert!(matches!(
            manager.layer_mut::<QuadStrategy>("missing"),
            Err(RenderError::LayerNotFound(_))
        ));
        assert_eq!(manager.layer_base("quads").unwrap().vertices_per_particle(), 6);
        assert_eq!(manager.total_particle_count(), 2);
    }

    #[test]
    fn test_remove_layer_returns_buffer_to_cache() {
        let (backend, gpu) = HeadlessBackend::new();
        let mut renderer = Renderer::new(backend, RendererConfig::default());
        let mut manager = ParticleManager::default();
        manager.add_layer("fx", 0, PointStrategy).unwrap().spawn(3).unwrap();

        renderer.begin_frame();
        assert_eq!(manager.render(&mut renderer), 1);
        renderer.end_frame().unwrap();

        manager.remove_layer("fx", renderer.cache_mut()).unwrap();
        assert!(!manager.contains_layer("fx"));
        assert_eq!(renderer.cache().len(), 1);
        assert!(matches!(
            manager.remove_layer("fx", renderer.cache_mut()),
            Err(RenderError::LayerNotFound(_))
        ));

        gpu.complete_all();
        renderer.shutdown();
        assert_eq!(gpu.live_buffers(), 0);
    }

    #[test]
    fn test_spawner_uses_shared_atlas() {
        let mut manager = ParticleManager::default();
        let texcoords = Rect::new(Vec2::new(0.0, 0.5), Vec2::new(0.5, 1.0));
        manager.set_texture_atlas(Arc::new(AtlasTable::new().with_entry("smoke", texcoords)));
        manager.add_layer("smoke", 0, QuadStrategy).unwrap();

        let id = manager.spawner::<QuadStrategy>("smoke", "smoke").unwrap().spawn(2).unwrap();
        let layer = manager.layer::<QuadStrategy>("smoke").unwrap();
        assert_eq!(layer.accessor(id).unwrap()[1].texcoords, texcoords);
    }

    #[test]
    fn test_tick_all_layers() {
        let mut manager = ParticleManager::default();
        let layer = manager.add_layer("sparks", 0, PointStrategy).unwrap();
        let id = layer.spawn(2).unwrap();
        layer.accessor_mut(id).unwrap()[0].life = 0.5;

        manager.tick(1.0);
        assert_eq!(manager.total_particle_count(), 1);
    }
}
