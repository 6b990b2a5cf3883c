//! Vertex emission strategies
//!
//! A [`VertexEmissionStrategy`] pairs a particle type with a vertex type at
//! compile time and knows how to turn one particle into a fixed number of
//! vertices. Layers are generic over the strategy, so a layer cannot be fed
//! particles of the wrong kind.
//!
//! Two strategies ship with the engine:
//!
//! | Strategy          | Particle          | Vertices | Primitive   |
//! |-------------------|-------------------|----------|-------------|
//! | [`QuadStrategy`]  | [`QuadParticle`]  | 6        | `Triangles` |
//! | [`PointStrategy`] | [`PointParticle`] | 1        | `Points`    |

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Rect, Vec2, Vec4};
use crate::render::api::PrimitiveType;

bitflags! {
    /// Vertex attributes written by a strategy
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LayoutFlags: u32 {
        /// 2D position
        const POSITION = 1 << 0;
        /// Texture coordinates
        const TEXCOORD = 1 << 1;
        /// RGBA color
        const COLOR = 1 << 2;
        /// Point size
        const SIZE = 1 << 3;
    }
}

/// Compile-time pairing of a particle type with its vertex layout
pub trait VertexEmissionStrategy: 'static {
    /// Per-particle simulation state
    type Particle: Default + 'static;
    /// GPU vertex, uploaded as raw bytes
    type Vertex: Pod;

    /// Number of vertices emitted for every particle, constant per strategy
    fn vertices_per_particle(&self) -> usize;

    /// Topology used to draw the emitted vertices
    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Triangles
    }

    /// Attributes present in [`Self::Vertex`]
    fn layout_flags(&self) -> LayoutFlags;

    /// Write the vertices of `particle`
    ///
    /// `vertices` always holds exactly [`Self::vertices_per_particle`] elements.
    fn emit_vertices(&self, particle: &Self::Particle, vertices: &mut [Self::Vertex]);

    /// Advance `particle` by `delta_time` seconds
    ///
    /// Returns `true` when the particle died and must be removed from its
    /// allocation. The default keeps particles unchanged and alive.
    fn update_particle(&self, delta_time: f32, particle: &mut Self::Particle) -> bool {
        let _ = (delta_time, particle);
        false
    }

    /// Size of one vertex in bytes
    fn vertex_stride(&self) -> usize {
        std::mem::size_of::<Self::Vertex>()
    }
}

/// Textured, colored rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadParticle {
    /// Screen-space rectangle covered by the particle
    pub bounds: Rect,
    /// Texture coordinates mapped onto `bounds`
    pub texcoords: Rect,
    /// RGBA color
    pub color: Vec4,
    /// Displacement per second
    pub velocity: Vec2,
    /// Remaining lifetime in seconds
    pub life: f32,
}

impl Default for QuadParticle {
    fn default() -> Self {
        Self {
            bounds: Rect::unit(),
            texcoords: Rect::unit(),
            color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            velocity: Vec2::zeros(),
            life: f32::INFINITY,
        }
    }
}

/// Vertex emitted by [`QuadStrategy`]
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    /// Position
    pub position: [f32; 2],
    /// Texture coordinates
    pub texcoord: [f32; 2],
    /// RGBA color
    pub color: [f32; 4],
}

/// Two triangles per particle
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadStrategy;

/// Corner order of the two triangles of a quad
const QUAD_CORNERS: [usize; 6] = [0, 1, 2, 0, 2, 3];

impl VertexEmissionStrategy for QuadStrategy {
    type Particle = QuadParticle;
    type Vertex = QuadVertex;

    fn vertices_per_particle(&self) -> usize {
        QUAD_CORNERS.len()
    }

    fn layout_flags(&self) -> LayoutFlags {
        LayoutFlags::POSITION | LayoutFlags::TEXCOORD | LayoutFlags::COLOR
    }

    fn emit_vertices(&self, particle: &QuadParticle, vertices: &mut [QuadVertex]) {
        let positions = particle.bounds.corners();
        let texcoords = particle.texcoords.corners();
        let color = [particle.color.x, particle.color.y, particle.color.z, particle.color.w];

        for (vertex, &corner) in vertices.iter_mut().zip(QUAD_CORNERS.iter()) {
            *vertex = QuadVertex {
                position: [positions[corner].x, positions[corner].y],
                texcoord: [texcoords[corner].x, texcoords[corner].y],
                color,
            };
        }
    }

    fn update_particle(&self, delta_time: f32, particle: &mut QuadParticle) -> bool {
        particle.life -= delta_time;
        if particle.life <= 0.0 {
            return true;
        }
        let offset = particle.velocity * delta_time;
        particle.bounds.min += offset;
        particle.bounds.max += offset;
        false
    }
}

/// Colored point sprite
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointParticle {
    /// Center of the point
    pub position: Vec2,
    /// RGBA color
    pub color: Vec4,
    /// Point size in pixels
    pub size: f32,
    /// Displacement per second
    pub velocity: Vec2,
    /// Remaining lifetime in seconds
    pub life: f32,
}

impl Default for PointParticle {
    fn default() -> Self {
        Self {
            position: Vec2::zeros(),
            color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            size: 1.0,
            velocity: Vec2::zeros(),
            life: f32::INFINITY,
        }
    }
}

/// Vertex emitted by [`PointStrategy`]
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointVertex {
    /// Position
    pub position: [f32; 2],
    /// RGBA color
    pub color: [f32; 4],
    /// Point size
    pub size: f32,
}

/// One point per particle
#[derive(Debug, Clone, Copy, Default)]
pub struct PointStrategy;

impl VertexEmissionStrategy for PointStrategy {
    type Particle = PointParticle;
    type Vertex = PointVertex;

    fn vertices_per_particle(&self) -> usize {
        1
    }

    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::Points
    }

    fn layout_flags(&self) -> LayoutFlags {
        LayoutFlags::POSITION | LayoutFlags::COLOR | LayoutFlags::SIZE
    }

    fn emit_vertices(&self, particle: &PointParticle, vertices: &mut [PointVertex]) {
        vertices[0] = PointVertex {
            position: [particle.position.x, particle.position.y],
            color: [particle.color.x, particle.color.y, particle.color.z, particle.color.w],
            size: particle.size,
        };
    }

    fn update_particle(&self, delta_time: f32, particle: &mut PointParticle) -> bool {
        particle.life -= delta_time;
        if particle.life <= 0.0 {
            return true;
        }
        particle.position += particle.velocity * delta_time;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quad_emits_two_triangles() {
        let strategy = QuadStrategy;
        let particle = QuadParticle {
            bounds: Rect::new(Vec2::new(-1.0, -2.0), Vec2::new(3.0, 4.0)),
            ..QuadParticle::default()
        };
        let mut vertices = vec![QuadVertex::zeroed(); strategy.vertices_per_particle()];
        strategy.emit_vertices(&particle, &mut vertices);

        assert_eq!(vertices.len(), 6);
        assert_eq!(vertices[0].position, [-1.0, -2.0]);
        assert_eq!(vertices[2].position, [3.0, 4.0]);
        assert_eq!(vertices[3], vertices[0]);
        assert_eq!(vertices[4], vertices[2]);
        assert_eq!(vertices[5].position, [-1.0, 4.0]);
        assert_eq!(vertices[5].texcoord, [0.0, 1.0]);
        assert_eq!(vertices[1].color, [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_quad_update_moves_and_expires() {
        let strategy = QuadStrategy;
        let mut particle = QuadParticle {
            velocity: Vec2::new(2.0, 0.0),
            life: 1.0,
            ..QuadParticle::default()
        };

        assert!(!strategy.update_particle(0.25, &mut particle));
        assert_relative_eq!(particle.bounds.min.x, 0.5);
        assert_relative_eq!(particle.bounds.max.x, 1.5);
        assert_relative_eq!(particle.life, 0.75);

        assert!(strategy.update_particle(1.0, &mut particle));
    }

    #[test]
    fn test_default_particles_live_forever() {
        let mut particle = QuadParticle::default();
        assert!(!QuadStrategy.update_particle(1.0e6, &mut particle));
    }

    #[test]
    fn test_point_strategy() {
        let strategy = PointStrategy;
        assert_eq!(strategy.vertices_per_particle(), 1);
        assert_eq!(strategy.primitive_type(), PrimitiveType::Points);
        assert!(strategy.layout_flags().contains(LayoutFlags::SIZE));
        assert!(!strategy.layout_flags().contains(LayoutFlags::TEXCOORD));
        assert_eq!(strategy.vertex_stride(), 28);

        let mut particle = PointParticle {
            velocity: Vec2::new(0.0, -1.0),
            size: 4.0,
            ..PointParticle::default()
        };
        assert!(!strategy.update_particle(0.5, &mut particle));

        let mut vertex = [PointVertex::zeroed()];
        strategy.emit_vertices(&particle, &mut vertex);
        assert_eq!(vertex[0].position, [0.0, -0.5]);
        assert_eq!(vertex[0].size, 4.0);
    }
}
