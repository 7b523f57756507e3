//! Core types and configuration for the Cadence frame pipeline.
//!
//! This crate provides the backend-neutral vocabulary shared by every
//! other crate in the workspace:
//! - Desktop and output rectangles, viewports, clear colors
//! - Buffer formats, color spaces, feature levels and resource states
//! - Renderer option flags and configuration

pub mod config;
pub mod error;
pub mod geometry;
pub mod types;

pub use config::{RendererConfig, RendererOptions};
pub use error::{Error, Result};
pub use geometry::{Color, Rect, Viewport};
pub use types::{
    BufferFormat, ColorSpace, DeviceLossReason, FeatureLevel, LifecycleEvent, ResourceState,
    ShaderModel,
};

/// Engine-wide constants
pub mod constants {
    /// Smallest supported number of back buffers in a swap chain
    pub const MIN_BACK_BUFFER_COUNT: u32 = 2;
    /// Largest supported number of back buffers in a swap chain
    pub const MAX_BACK_BUFFER_COUNT: u32 = 3;
}
