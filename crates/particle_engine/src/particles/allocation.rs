//! Particle allocations and accessors
//!
//! An allocation is a contiguous range of particle slots inside a layer's
//! storage, owned by one emitter. Callers keep an [`AllocationId`] and reach
//! the particles through an accessor borrowed from the layer:
//!
//! ```text
//! layer storage  [ a a a | b b | c c c c ]
//!                  ^alloc A  ^B    ^alloc C
//!
//! layer.accessor_mut(c)?[1]  →  third slot of C's range
//! ```
//!
//! Accessors borrow the layer, so spawning or removing particles while one is
//! alive is rejected at compile time.

use std::ops::{Index, IndexMut, Range};

use crate::render::{RenderError, RenderResult};

slotmap::new_key_type! {
    /// Slot of an allocation record inside its layer
    pub(crate) struct AllocationKey;
}

/// Handle on an allocation
///
/// Carries the identity of the owning layer, so an id used with another layer
/// or kept after removal is rejected with
/// [`RenderError::InvalidAllocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationId {
    pub(crate) layer: u64,
    pub(crate) key: AllocationKey,
}

/// Bookkeeping of one allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticleAllocation {
    pub(crate) start: usize,
    pub(crate) count: usize,
    pub(crate) paused: bool,
    pub(crate) visible: bool,
    pub(crate) destroy_when_empty: bool,
}

impl ParticleAllocation {
    pub(crate) fn new(start: usize, count: usize) -> Self {
        Self {
            start,
            count,
            paused: false,
            visible: true,
            destroy_when_empty: false,
        }
    }

    /// Offset of the first particle in layer storage
    pub fn start(&self) -> usize {
        self.start
    }

    /// Number of particles
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the allocation holds no particle
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether simulation is suspended for this allocation
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether the particles are drawn
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Whether the allocation is removed once all its particles died
    pub fn destroy_when_empty(&self) -> bool {
        self.destroy_when_empty
    }

    pub(crate) fn range(&self) -> Range<usize> {
        self.start..self.start + self.count
    }
}

/// Resolve an allocation-relative range to layer storage indices
///
/// Out-of-bounds ranges are a caller bug: they fail a debug assertion and are
/// clamped to the allocation in release builds.
pub(crate) fn sub_range(allocation: &ParticleAllocation, offset: usize, count: usize) -> Range<usize> {
    debug_assert!(
        offset.checked_add(count).is_some_and(|end| end <= allocation.count),
        "accessor range {}..{} exceeds allocation of {} particles",
        offset,
        offset.saturating_add(count),
        allocation.count
    );
    let offset = offset.min(allocation.count);
    let count = count.min(allocation.count - offset);
    let start = allocation.start + offset;
    start..start + count
}

/// Read-only view over particles of one allocation
#[derive(Debug)]
pub struct ParticleAccessor<'a, P> {
    particles: &'a [P],
}

impl<'a, P> ParticleAccessor<'a, P> {
    pub(crate) fn new(particles: &'a [P]) -> Self {
        Self { particles }
    }

    /// Number of addressable particles
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Particle at `index`, relative to the view
    pub fn get(&self, index: usize) -> RenderResult<&'a P> {
        self.particles.get(index).ok_or(RenderError::IndexOutOfRange {
            index,
            len: self.particles.len(),
        })
    }

    /// Iterate over the particles
    pub fn iter(&self) -> std::slice::Iter<'a, P> {
        self.particles.iter()
    }

    /// Particles as a slice
    pub fn as_slice(&self) -> &'a [P] {
        self.particles
    }
}

impl<P> Index<usize> for ParticleAccessor<'_, P> {
    type Output = P;

    fn index(&self, index: usize) -> &P {
        &self.particles[index]
    }
}

impl<'a, P> IntoIterator for ParticleAccessor<'a, P> {
    type Item = &'a P;
    type IntoIter = std::slice::Iter<'a, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.particles.iter()
    }
}

/// Mutable view over particles of one allocation
///
/// Creating one marks the owning layer for vertex regeneration.
#[derive(Debug)]
pub struct ParticleAccessorMut<'a, P> {
    particles: &'a mut [P],
}

impl<'a, P> ParticleAccessorMut<'a, P> {
    pub(crate) fn new(particles: &'a mut [P]) -> Self {
        Self { particles }
    }

    /// Number of addressable particles
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Particle at `index`, relative to the view
    pub fn get(&self, index: usize) -> RenderResult<&P> {
        let len = self.particles.len();
        self.particles.get(index).ok_or(RenderError::IndexOutOfRange { index, len })
    }

    /// Mutable particle at `index`, relative to the view
    pub fn get_mut(&mut self, index: usize) -> RenderResult<&mut P> {
        let len = self.particles.len();
        self.particles.get_mut(index).ok_or(RenderError::IndexOutOfRange { index, len })
    }

    /// Iterate over the particles
    pub fn iter(&self) -> std::slice::Iter<'_, P> {
        self.particles.iter()
    }

    /// Iterate mutably over the particles
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, P> {
        self.particles.iter_mut()
    }

    /// Particles as a slice
    pub fn as_slice(&self) -> &[P] {
        self.particles
    }

    /// Particles as a mutable slice
    pub fn as_mut_slice(&mut self) -> &mut [P] {
        self.particles
    }
}

impl<P> Index<usize> for ParticleAccessorMut<'_, P> {
    type Output = P;

    fn index(&self, index: usize) -> &P {
        &self.particles[index]
    }
}

impl<P> IndexMut<usize> for ParticleAccessorMut<'_, P> {
    fn index_mut(&mut self, index: usize) -> &mut P {
        &mut self.particles[index]
    }
}

impl<'a, P> IntoIterator for ParticleAccessorMut<'a, P> {
    type Item = &'a mut P;
    type IntoIter = std::slice::IterMut<'a, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.particles.iter_mut()
    }
}
