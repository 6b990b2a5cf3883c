//! CPU/GPU synchronization through fence signals
//!
//! A [`FenceSignal`] marks a point in the GPU command stream. Every buffer
//! resting in the [`BufferCache`](crate::render::BufferCache) is tagged with
//! one; the cache only recycles buffers whose fence has been observed as
//! signaled.
//!
//! # Deferred fences
//!
//! The renderer hands out the fence of the current frame while the frame is
//! still being recorded, before the backend marker can exist. Such a fence is
//! created with [`FenceSignal::deferred`] and armed with the real marker at
//! the end of the frame. Until then it is pending.
//!
//! ```text
//! begin_frame ─ draw ─ release(buffer, fence) ─ draw ─ end_frame
//!                              │                          │
//!                      fence: unarmed (pending)     arm(backend marker)
//! ```
//!
//! Signaled state is latched: once a query observed completion, the signal
//! never reverts, even if the backend object is queried again.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::render::api::{GpuBackend, GpuFence};
use crate::render::{RenderError, RenderResult};

static NEXT_FENCE_ID: AtomicU64 = AtomicU64::new(1);

struct FenceInner {
    id: u64,
    marker: OnceLock<Box<dyn GpuFence>>,
    signaled: AtomicBool,
}

/// Shared handle on a GPU completion marker
///
/// Cloning is cheap; clones refer to the same marker and compare equal.
#[derive(Clone)]
pub struct FenceSignal {
    inner: Arc<FenceInner>,
}

impl FenceSignal {
    fn with_state(marker: Option<Box<dyn GpuFence>>, signaled: bool) -> Self {
        let cell = OnceLock::new();
        if let Some(marker) = marker {
            // Freshly created cell, cannot already be set
            let _ = cell.set(marker);
        }
        Self {
            inner: Arc::new(FenceInner {
                id: NEXT_FENCE_ID.fetch_add(1, Ordering::Relaxed),
                marker: cell,
                signaled: AtomicBool::new(signaled),
            }),
        }
    }

    /// Enqueue a completion marker at "now" in submission order
    ///
    /// Fails with [`RenderError::ResourceExhausted`] when the backend cannot
    /// create a fence.
    pub fn create(backend: &mut dyn GpuBackend) -> RenderResult<Self> {
        let marker = backend.create_fence().map_err(into_exhausted)?;
        Ok(Self::with_state(Some(marker), false))
    }

    /// Wrap an existing backend marker
    pub fn from_gpu_fence(marker: Box<dyn GpuFence>) -> Self {
        Self::with_state(Some(marker), false)
    }

    /// Fence whose backend marker will be attached later with [`FenceSignal::arm`]
    pub fn deferred() -> Self {
        Self::with_state(None, false)
    }

    /// Fence that is already complete
    ///
    /// Used for buffers that were checked out but never submitted to the GPU.
    pub fn signaled() -> Self {
        Self::with_state(None, true)
    }

    /// Attach the backend marker to a deferred fence
    ///
    /// Returns `false` when the fence already had a marker; the new marker is
    /// dropped in that case.
    pub fn arm(&self, marker: Box<dyn GpuFence>) -> bool {
        self.inner.marker.set(marker).is_ok()
    }

    /// Create the backend marker for a deferred fence
    pub fn arm_with(&self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        if self.is_armed() {
            log::warn!("Fence {} armed twice, keeping the first marker", self.inner.id);
            return Ok(());
        }
        let marker = backend.create_fence().map_err(into_exhausted)?;
        self.arm(marker);
        Ok(())
    }

    /// Whether a backend marker is attached (always true for signaled fences)
    pub fn is_armed(&self) -> bool {
        self.inner.marker.get().is_some() || self.inner.signaled.load(Ordering::Acquire)
    }

    /// Non-blocking, monotonic completion query
    pub fn is_signaled(&self) -> bool {
        if self.inner.signaled.load(Ordering::Acquire) {
            return true;
        }
        match self.inner.marker.get() {
            Some(marker) if marker.is_signaled() => {
                self.inner.signaled.store(true, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// Block up to `timeout` for completion
    ///
    /// A zero timeout is a plain [`FenceSignal::is_signaled`] query. Waiting on
    /// a deferred fence that was never armed cannot succeed and returns
    /// `false` immediately.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_signaled() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        let Some(marker) = self.inner.marker.get() else {
            log::warn!("Waiting on fence {} that was never armed", self.inner.id);
            return false;
        };
        if marker.wait(timeout) {
            self.inner.signaled.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Process-unique identifier, for logging
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether both handles refer to the same marker
    pub fn same_marker(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles on this marker
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl PartialEq for FenceSignal {
    fn eq(&self, other: &Self) -> bool {
        self.same_marker(other)
    }
}

impl Eq for FenceSignal {}

impl fmt::Debug for FenceSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceSignal")
            .field("id", &self.inner.id)
            .field("armed", &self.is_armed())
            .field("signaled", &self.inner.signaled.load(Ordering::Relaxed))
            .finish()
    }
}

fn into_exhausted(error: RenderError) -> RenderError {
    match error {
        RenderError::ResourceExhausted(reason) => RenderError::ResourceExhausted(reason),
        other => RenderError::ResourceExhausted(format!("fence creation failed: {other}")),
    }
}
