//! Vulkan backend built on `ash`.
//!
//! The instance is the factory, physical devices are adapters, timeline
//! semaphores are fences and command pools are command allocators. Swap
//! chain images are presented through `VK_KHR_swapchain`.

mod command;
pub mod conv;
mod device;
mod instance;
mod memory;
mod swapchain;

use cadence_core::Rect;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub use command::{VulkanCommandAllocator, VulkanCommandList};
pub use device::{VulkanDevice, VulkanFence, VulkanFenceEvent, VulkanQueue};
pub use instance::{required_instance_extensions, VulkanAdapter, VulkanFactory};
pub use memory::{VulkanImageView, VulkanTexture};
pub use swapchain::{calculate_extent, clamp_image_count, select_present_mode, VulkanSwapChain};

use crate::backend::{Backend, WindowBounds};
use crate::error::Result;

/// A window the Vulkan backend can present to.
pub trait NativeWindow: HasWindowHandle + HasDisplayHandle + WindowBounds {
    /// Desktop rectangles of the monitors the window could be shown on.
    fn monitors(&self) -> Vec<Rect>;
}

/// The Vulkan backend.
#[derive(Debug, Clone)]
pub struct VulkanBackend {
    app_name: String,
}

impl VulkanBackend {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    pub(crate) fn app_name(&self) -> &str {
        &self.app_name
    }
}

impl Backend for VulkanBackend {
    type Window = dyn NativeWindow;
    type Factory = VulkanFactory;
    type Adapter = VulkanAdapter;
    type Device = VulkanDevice;
    type Queue = VulkanQueue;
    type Fence = VulkanFence;
    type FenceEvent = VulkanFenceEvent;
    type CommandAllocator = VulkanCommandAllocator;
    type CommandList = VulkanCommandList;
    type SwapChain = VulkanSwapChain;
    type Texture = VulkanTexture;
    type RenderTargetView = VulkanImageView;
    type DepthStencilView = VulkanImageView;

    fn create_factory(&self, validation: bool) -> Result<VulkanFactory> {
        VulkanFactory::new(self, validation)
    }
}
