//! GPU backend implementations
//!
//! Only the in-memory headless backend ships with the engine; graphics API
//! backends implement [`GpuBackend`](crate::render::api::GpuBackend) in the
//! application.

pub mod headless;
