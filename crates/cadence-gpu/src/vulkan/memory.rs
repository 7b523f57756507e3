//! Images, their memory and views.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use tracing::warn;

use super::device::DeviceShared;
use crate::error::Result;

/// An image, either owned with its allocation or borrowed from a swap chain.
pub struct VulkanTexture {
    shared: Arc<DeviceShared>,
    image: vk::Image,
    allocation: Option<Allocation>,
    owned: bool,
    format: vk::Format,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
    mutable_format: bool,
}

impl VulkanTexture {
    /// An image created by this crate, destroyed and freed on drop.
    pub(crate) fn owned(
        shared: Arc<DeviceShared>,
        image: vk::Image,
        allocation: Allocation,
        format: vk::Format,
        extent: vk::Extent2D,
        aspect: vk::ImageAspectFlags,
    ) -> Self {
        Self {
            shared,
            image,
            allocation: Some(allocation),
            owned: true,
            format,
            extent,
            aspect,
            mutable_format: false,
        }
    }

    /// A swap chain image. The swap chain owns the handle.
    pub(crate) fn swap_chain_image(
        shared: Arc<DeviceShared>,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
        mutable_format: bool,
    ) -> Self {
        Self {
            shared,
            image,
            allocation: None,
            owned: false,
            format,
            extent,
            aspect: vk::ImageAspectFlags::COLOR,
            mutable_format,
        }
    }

    pub fn raw(&self) -> vk::Image {
        self.image
    }

    /// Storage format of the image.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    /// Views may use the sRGB pair of the storage format.
    pub fn mutable_format(&self) -> bool {
        self.mutable_format
    }

    pub(crate) fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }

        if let Some(allocation) = self.allocation.take() {
            if let Some(allocator) = self.shared.allocator.lock().as_mut() {
                if let Err(e) = allocator.free(allocation) {
                    warn!("Failed to free image allocation: {e}");
                }
            }
        }

        // SAFETY: the GPU is idle or lost when textures are released
        unsafe { self.shared.device.destroy_image(self.image, None) };
    }
}

/// A 2D image view used as render target or depth-stencil view.
pub struct VulkanImageView {
    shared: Arc<DeviceShared>,
    view: vk::ImageView,
    image: vk::Image,
    extent: vk::Extent2D,
    aspect: vk::ImageAspectFlags,
}

impl VulkanImageView {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        texture: &VulkanTexture,
        format: vk::Format,
    ) -> Result<Self> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(texture.raw())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(subresource_range(texture.aspect()));

        // SAFETY: the texture belongs to this device
        let view = unsafe { shared.device.create_image_view(&view_info, None)? };

        Ok(Self {
            shared,
            view,
            image: texture.raw(),
            extent: texture.extent(),
            aspect: texture.aspect(),
        })
    }

    pub fn raw(&self) -> vk::ImageView {
        self.view
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }
}

impl Drop for VulkanImageView {
    fn drop(&mut self) {
        // SAFETY: the GPU is idle or lost when views are released
        unsafe { self.shared.device.destroy_image_view(self.view, None) };
    }
}

/// Whole-image subresource range of a single-mip, single-layer image.
pub(crate) fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}
