//! Math utilities and types
//!
//! Provides the small set of vector types used by particles and vertex emission.

pub use nalgebra::{Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type (also used for RGBA colors)
pub type Vec4 = Vector4<f32>;

/// Axis-aligned rectangle, used for texture coordinates and particle bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Bottom-left corner
    pub min: Vec2,
    /// Top-right corner
    pub max: Vec2,
}

impl Rect {
    /// Create a rectangle from its two corners
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Create a rectangle from a center and a half size
    pub fn from_center(center: Vec2, half_size: Vec2) -> Self {
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// The unit square `[0,1]²`
    pub fn unit() -> Self {
        Self::new(Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0))
    }

    /// Width and height of the rectangle
    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    /// Corners in counter-clockwise order starting at bottom-left
    pub fn corners(&self) -> [Vec2; 4] {
        [
            self.min,
            Vec2::new(self.max.x, self.min.y),
            self.max,
            Vec2::new(self.min.x, self.max.y),
        ]
    }
}

impl Default for Rect {
    fn default() -> Self {
        Self::unit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rect_from_center() {
        let rect = Rect::from_center(Vec2::new(1.0, 2.0), Vec2::new(0.5, 1.0));
        assert_relative_eq!(rect.min.x, 0.5);
        assert_relative_eq!(rect.min.y, 1.0);
        assert_relative_eq!(rect.size().x, 1.0);
        assert_relative_eq!(rect.size().y, 2.0);
    }

    #[test]
    fn test_rect_corners_ccw() {
        let corners = Rect::unit().corners();
        assert_eq!(corners[0], Vec2::new(0.0, 0.0));
        assert_eq!(corners[1], Vec2::new(1.0, 0.0));
        assert_eq!(corners[2], Vec2::new(1.0, 1.0));
        assert_eq!(corners[3], Vec2::new(0.0, 1.0));
    }
}
