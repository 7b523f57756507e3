//! Renderer configuration.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_BACK_BUFFER_COUNT, MIN_BACK_BUFFER_COUNT};
use crate::error::{Error, Result};
use crate::geometry::Color;
use crate::types::{BufferFormat, FeatureLevel, ShaderModel};

bitflags! {
    /// Optional renderer behaviors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct RendererOptions: u32 {
        /// Present without waiting for vertical sync when the display supports it.
        const ALLOW_TEARING = 0x1;
        /// Output wide-gamut color when the display supports it.
        const ENABLE_HDR = 0x2;
        /// Depth is cleared to 0.0 and tested with "greater".
        const REVERSE_DEPTH = 0x4;
    }
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self::empty()
    }
}

/// Frame pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Back buffer format. sRGB formats are stored as their UNORM variant and
    /// viewed as sRGB.
    pub back_buffer_format: BufferFormat,
    /// Depth buffer format, `Unknown` disables the depth buffer.
    pub depth_buffer_format: BufferFormat,
    /// Number of back buffers (2 or 3).
    pub back_buffer_count: u32,
    /// Lowest device feature level accepted during adapter selection.
    pub min_feature_level: FeatureLevel,
    /// Lowest shader capability the engine can run with.
    pub min_shader_model: ShaderModel,
    /// Optional behaviors.
    pub options: RendererOptions,
    /// Color the back buffer is cleared to at the start of a frame.
    pub clear_color: Color,
    /// Enable API validation (default: debug builds only).
    pub debug_layer: bool,
    /// Fall back to a software adapter when no hardware adapter qualifies
    /// (default: debug builds only).
    pub allow_software_adapter: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            back_buffer_format: BufferFormat::B8G8R8A8Unorm,
            depth_buffer_format: BufferFormat::D32Float,
            back_buffer_count: 2,
            min_feature_level: FeatureLevel::new(1, 3),
            min_shader_model: ShaderModel::new(6, 0),
            options: RendererOptions::empty(),
            clear_color: Color::CORNFLOWER_BLUE,
            debug_layer: cfg!(debug_assertions),
            allow_software_adapter: cfg!(debug_assertions),
        }
    }
}

impl RendererConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the back buffer format.
    pub fn with_back_buffer_format(mut self, format: BufferFormat) -> Self {
        self.back_buffer_format = format;
        self
    }

    /// Set the depth buffer format (`Unknown` disables depth).
    pub fn with_depth_buffer_format(mut self, format: BufferFormat) -> Self {
        self.depth_buffer_format = format;
        self
    }

    /// Set the number of back buffers.
    pub fn with_back_buffer_count(mut self, count: u32) -> Self {
        self.back_buffer_count = count;
        self
    }

    /// Set the minimum device feature level.
    pub fn with_min_feature_level(mut self, level: FeatureLevel) -> Self {
        self.min_feature_level = level;
        self
    }

    /// Set the minimum shader model.
    pub fn with_min_shader_model(mut self, model: ShaderModel) -> Self {
        self.min_shader_model = model;
        self
    }

    /// Replace the option flags.
    pub fn with_options(mut self, options: RendererOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the clear color.
    pub fn with_clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    /// Enable or disable API validation.
    pub fn with_debug_layer(mut self, enable: bool) -> Self {
        self.debug_layer = enable;
        self
    }

    /// Allow or forbid the software adapter fallback.
    pub fn with_software_adapter(mut self, allow: bool) -> Self {
        self.allow_software_adapter = allow;
        self
    }

    /// Whether a depth buffer is allocated.
    pub fn depth_enabled(&self) -> bool {
        self.depth_buffer_format != BufferFormat::Unknown
    }

    /// Check that every value is within its supported range.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BACK_BUFFER_COUNT..=MAX_BACK_BUFFER_COUNT).contains(&self.back_buffer_count) {
            return Err(Error::InvalidConfig(format!(
                "back buffer count {} is outside {MIN_BACK_BUFFER_COUNT}..={MAX_BACK_BUFFER_COUNT}",
                self.back_buffer_count
            )));
        }

        if self.min_feature_level < FeatureLevel::new(1, 0) {
            return Err(Error::InvalidConfig(format!(
                "minimum feature level {} is below 1.0",
                self.min_feature_level
            )));
        }

        if self.depth_enabled() && !self.depth_buffer_format.is_depth() {
            return Err(Error::InvalidConfig(format!(
                "{:?} is not a depth format",
                self.depth_buffer_format
            )));
        }

        if self.back_buffer_format == BufferFormat::Unknown || self.back_buffer_format.is_depth() {
            return Err(Error::InvalidConfig(format!(
                "{:?} is not a color format",
                self.back_buffer_format
            )));
        }

        Ok(())
    }
}
