//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Math types shared by particles and vertex emission
//! - Logging utilities

pub mod math;
pub mod logging;
