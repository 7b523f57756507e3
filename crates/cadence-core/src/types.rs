//! Backend-neutral GPU vocabulary types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel format of a back buffer or depth buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferFormat {
    /// No buffer. As a depth format this disables depth testing.
    Unknown,
    #[default]
    B8G8R8A8Unorm,
    B8G8R8A8UnormSrgb,
    R8G8B8A8Unorm,
    R8G8B8A8UnormSrgb,
    /// 10 bits per color channel, the HDR10 storage format.
    R10G10B10A2Unorm,
    /// Half-float per channel, the linear (scRGB) HDR storage format.
    R16G16B16A16Float,
    D32Float,
    D24UnormS8Uint,
    D16Unorm,
}

impl BufferFormat {
    /// The storage format with any sRGB encoding removed.
    ///
    /// Flip-model presentation rejects sRGB storage formats; the encoding is
    /// reapplied through the render-target view instead.
    pub const fn without_srgb(self) -> Self {
        match self {
            Self::B8G8R8A8UnormSrgb => Self::B8G8R8A8Unorm,
            Self::R8G8B8A8UnormSrgb => Self::R8G8B8A8Unorm,
            other => other,
        }
    }

    pub const fn is_srgb(self) -> bool {
        matches!(self, Self::B8G8R8A8UnormSrgb | Self::R8G8B8A8UnormSrgb)
    }

    pub const fn is_depth(self) -> bool {
        matches!(self, Self::D32Float | Self::D24UnormS8Uint | Self::D16Unorm)
    }

    pub const fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint)
    }
}

/// Color space of the presented image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorSpace {
    /// Standard dynamic range: BT.709 primaries, gamma 2.2.
    #[default]
    Srgb,
    /// HDR10: BT.2020 primaries, ST.2084 (PQ) transfer.
    Hdr10,
    /// scRGB: BT.709 primaries, linear, values above 1.0 allowed.
    ScRgbLinear,
}

impl ColorSpace {
    /// Whether this is a wide-gamut (HDR) space.
    pub const fn is_wide_gamut(self) -> bool {
        !matches!(self, Self::Srgb)
    }
}

/// Graphics API feature level of a device, ordered by capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureLevel {
    pub major: u32,
    pub minor: u32,
}

impl FeatureLevel {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Highest shader capability a device supports, ordered by capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShaderModel {
    pub major: u32,
    pub minor: u32,
}

impl ShaderModel {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ShaderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Usage state of a GPU resource, used for transition barriers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceState {
    /// Owned by the presentation engine.
    #[default]
    Present,
    /// Writable as a color attachment.
    RenderTarget,
    /// Writable as a depth-stencil attachment.
    DepthWrite,
    /// Readable from shaders.
    ShaderResource,
    /// Copy destination.
    CopyDest,
}

/// Why the device stopped working.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceLossReason {
    /// The adapter was physically removed, the driver was upgraded, or the
    /// device hung.
    Removed,
    /// The device was reset, usually because of a badly formed command.
    Reset,
}

impl fmt::Display for DeviceLossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Removed => f.write_str("device removed"),
            Self::Reset => f.write_str("device reset"),
        }
    }
}

/// Window lifecycle notifications forwarded by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Activated,
    Deactivated,
    Suspending,
    Resuming,
}
