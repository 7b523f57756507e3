//! Conversions between engine types and Vulkan enums.

use ash::vk;
use cadence_core::{BufferFormat, ColorSpace, FeatureLevel, ResourceState, ShaderModel};

pub fn format(format: BufferFormat) -> vk::Format {
    match format {
        BufferFormat::Unknown => vk::Format::UNDEFINED,
        BufferFormat::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        BufferFormat::B8G8R8A8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        BufferFormat::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        BufferFormat::R8G8B8A8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        BufferFormat::R10G10B10A2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        BufferFormat::R16G16B16A16Float => vk::Format::R16G16B16A16_SFLOAT,
        BufferFormat::D32Float => vk::Format::D32_SFLOAT,
        BufferFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        BufferFormat::D16Unorm => vk::Format::D16_UNORM,
    }
}

/// The sRGB view format sharing storage with a UNORM format.
pub fn srgb_pair(format: vk::Format) -> Option<vk::Format> {
    match format {
        vk::Format::B8G8R8A8_UNORM => Some(vk::Format::B8G8R8A8_SRGB),
        vk::Format::R8G8B8A8_UNORM => Some(vk::Format::R8G8B8A8_SRGB),
        _ => None,
    }
}

pub fn color_space(color_space: ColorSpace) -> vk::ColorSpaceKHR {
    match color_space {
        ColorSpace::Srgb => vk::ColorSpaceKHR::SRGB_NONLINEAR,
        ColorSpace::Hdr10 => vk::ColorSpaceKHR::HDR10_ST2084_EXT,
        ColorSpace::ScRgbLinear => vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
    }
}

pub fn aspect(format: BufferFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Image layout, pipeline stages and access of a resource state.
pub fn resource_state(
    state: ResourceState,
) -> (vk::ImageLayout, vk::PipelineStageFlags2, vk::AccessFlags2) {
    match state {
        ResourceState::Present => (
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::NONE,
        ),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        ResourceState::DepthWrite => (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        ResourceState::ShaderResource => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
        ),
        ResourceState::CopyDest => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags2::ALL_TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
    }
}

/// Feature level of a packed Vulkan API version.
pub fn feature_level(api_version: u32) -> FeatureLevel {
    FeatureLevel::new(
        vk::api_version_major(api_version),
        vk::api_version_minor(api_version),
    )
}

/// Shader model equivalent of a device's API version.
pub fn shader_model(level: FeatureLevel) -> ShaderModel {
    match (level.major, level.minor) {
        (1, 0) => ShaderModel::new(5, 1),
        (1, 1) => ShaderModel::new(6, 0),
        (1, 2) => ShaderModel::new(6, 5),
        (0, _) => ShaderModel::new(5, 0),
        _ => ShaderModel::new(6, 6),
    }
}
