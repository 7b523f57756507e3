//! Surface and swapchain.
//!
//! The next image is acquired right after every present and every
//! (re)creation, so the current back-buffer index is always known. The
//! acquire and present semaphores are handed to the queue through
//! [`QueueSync`] and attached to the next submission.

use std::sync::Arc;

use ash::vk;
use cadence_core::ColorSpace;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, warn};

use super::device::{submit_pending, DeviceShared, QueueSync, VulkanDevice, VulkanQueue};
use super::memory::VulkanTexture;
use super::{conv, NativeWindow, VulkanBackend};
use crate::backend::{PresentMode, PresentOutcome, SwapChain, SwapChainDesc};
use crate::error::{GpuError, Result};

/// Select the present mode. Tearing uses IMMEDIATE where the surface offers
/// it; FIFO is always available.
pub fn select_present_mode(available: &[vk::PresentModeKHR], allow_tearing: bool) -> vk::PresentModeKHR {
    if allow_tearing && available.contains(&vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Clamp the requested image count to what the surface allows.
pub fn clamp_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

pub struct VulkanSwapChain {
    device: Arc<DeviceShared>,
    loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    /// Views may reinterpret images with the sRGB pair of `format`.
    mutable_views: bool,
    image_available: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
    next_acquire: usize,
    current: u32,
    /// Takes effect at the next recreation.
    out_of_date: bool,
    queue: vk::Queue,
    sync: Arc<Mutex<QueueSync>>,
}

impl VulkanSwapChain {
    pub(crate) fn new(
        device: &VulkanDevice,
        queue: &VulkanQueue,
        window: &dyn NativeWindow,
        desc: &SwapChainDesc,
    ) -> Result<Self> {
        let shared = device.shared().clone();
        let instance = &shared.instance;

        let display = HasDisplayHandle::display_handle(window)
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = HasWindowHandle::window_handle(window)
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        // SAFETY: the instance was created with the platform surface extensions
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let loader = ash::khr::swapchain::Device::new(&instance.instance, &shared.device);
        let mut swap_chain = Self {
            device: shared.clone(),
            loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format: conv::format(desc.format),
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            mutable_views: false,
            image_available: Vec::new(),
            render_finished: Vec::new(),
            next_acquire: 0,
            current: 0,
            out_of_date: false,
            queue: queue.raw(),
            sync: queue.sync().clone(),
        };

        // SAFETY: the surface was just created for this device's instance
        let supported = unsafe {
            instance.surface_loader.get_physical_device_surface_support(
                shared.physical_device,
                shared.queue_family,
                surface,
            )?
        };
        if !supported {
            return Err(GpuError::SurfaceCreation(
                "queue family cannot present to the surface".to_string(),
            ));
        }

        swap_chain.pick_format()?;
        match swap_chain.build(desc)? {
            PresentOutcome::Presented => Ok(swap_chain),
            PresentOutcome::OutOfDate => Err(GpuError::SwapchainCreation(
                "surface has a zero extent".to_string(),
            )),
        }
    }

    /// Whether the surface can present HDR10 (ST.2084) content.
    pub fn hdr10_supported(&self) -> Result<bool> {
        Ok(self.device.instance.colorspace_ext
            && self
                .surface_formats()?
                .iter()
                .any(|format| format.color_space == vk::ColorSpaceKHR::HDR10_ST2084_EXT))
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        // SAFETY: the surface lives as long as self
        let formats = unsafe {
            self.device
                .instance
                .surface_loader
                .get_physical_device_surface_formats(self.device.physical_device, self.surface)?
        };
        Ok(formats)
    }

    fn capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        // SAFETY: the surface lives as long as self
        let capabilities = unsafe {
            self.device
                .instance
                .surface_loader
                .get_physical_device_surface_capabilities(self.device.physical_device, self.surface)?
        };
        Ok(capabilities)
    }

    /// Keep the requested format when the surface offers it in sRGB,
    /// otherwise fall back to the first format offered.
    fn pick_format(&mut self) -> Result<()> {
        let formats = self.surface_formats()?;
        let wanted = formats.iter().find(|format| {
            format.format == self.format && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        });
        match wanted.or_else(|| formats.first()) {
            Some(format) => {
                if format.format != self.format {
                    warn!(
                        "Surface does not offer {:?}, falling back to {:?}",
                        self.format, format.format
                    );
                }
                self.format = format.format;
                self.color_space = format.color_space;
                Ok(())
            }
            None => Err(GpuError::SwapchainCreation(
                "surface reports no formats".to_string(),
            )),
        }
    }

    /// Create the swapchain, replacing the current one, and acquire the
    /// first image. Returns `OutOfDate` without touching anything when the
    /// surface has no area.
    fn build(&mut self, desc: &SwapChainDesc) -> Result<PresentOutcome> {
        let capabilities = self.capabilities()?;
        if capabilities.max_image_extent.width == 0 || capabilities.max_image_extent.height == 0 {
            return Ok(PresentOutcome::OutOfDate);
        }

        // SAFETY: the surface lives as long as self
        let present_modes = unsafe {
            self.device
                .instance
                .surface_loader
                .get_physical_device_surface_present_modes(self.device.physical_device, self.surface)?
        };
        let present_mode = select_present_mode(&present_modes, desc.allow_tearing);
        let extent = calculate_extent(&capabilities, desc.width, desc.height);
        let image_count = clamp_image_count(&capabilities, desc.buffer_count);

        let srgb_view = conv::srgb_pair(self.format);
        let mutable_views = self.device.mutable_format && srgb_view.is_some();
        let view_formats: Vec<vk::Format> = std::iter::once(self.format).chain(srgb_view).collect();
        let mut format_list = vk::ImageFormatListCreateInfo::default().view_formats(&view_formats);

        let queue_families = [self.device.queue_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format)
            .image_color_space(self.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(self.swapchain);
        if mutable_views {
            create_info = create_info
                .flags(vk::SwapchainCreateFlagsKHR::MUTABLE_FORMAT)
                .push_next(&mut format_list);
        }

        // SAFETY: the surface and old swapchain are valid and idle
        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .map_err(|e| match e {
                vk::Result::ERROR_DEVICE_LOST | vk::Result::ERROR_SURFACE_LOST_KHR => {
                    GpuError::from(e)
                }
                e => GpuError::SwapchainCreation(e.to_string()),
            })?;

        // SAFETY: the swapchain was just created
        let images = match unsafe { self.loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                // SAFETY: no image was handed out
                unsafe { self.loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };
        if images.len() != desc.buffer_count as usize {
            // The surface minimum may exceed the request; every image gets a slot.
            debug!(
                "Surface provided {} images, {} requested",
                images.len(),
                desc.buffer_count
            );
        }

        self.destroy_chain();
        self.swapchain = swapchain;
        self.images = images;
        self.extent = extent;
        self.present_mode = present_mode;
        self.mutable_views = mutable_views;
        self.out_of_date = false;
        self.create_semaphores()?;

        debug!(
            "Swapchain built: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            present_mode,
            self.color_space
        );

        if self.acquire()? {
            Ok(PresentOutcome::Presented)
        } else {
            Ok(PresentOutcome::OutOfDate)
        }
    }

    fn create_semaphores(&mut self) -> Result<()> {
        self.destroy_semaphores();

        let create_info = vk::SemaphoreCreateInfo::default();
        for _ in 0..self.images.len() {
            // SAFETY: the device is valid
            unsafe {
                self.image_available
                    .push(self.device.device.create_semaphore(&create_info, None)?);
                self.render_finished
                    .push(self.device.device.create_semaphore(&create_info, None)?);
            }
        }
        self.next_acquire = 0;
        Ok(())
    }

    fn destroy_semaphores(&mut self) {
        let device = &self.device.device;
        for semaphore in self.image_available.drain(..).chain(self.render_finished.drain(..)) {
            // SAFETY: callers wait for the device to go idle first
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }

    /// Retire the wait of an acquire no submission consumed, then wait for
    /// the device to go idle. Semaphores may be destroyed afterwards.
    fn drain(&self) -> Result<()> {
        submit_pending(&self.device, self.queue, &self.sync, &[])?;
        // SAFETY: the device is valid
        unsafe { self.device.device.device_wait_idle()? };
        Ok(())
    }

    fn destroy_chain(&mut self) {
        if self.swapchain != vk::SwapchainKHR::null() {
            // SAFETY: the swapchain's images are no longer in use
            unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
            self.swapchain = vk::SwapchainKHR::null();
            self.images.clear();
        }
    }

    /// Acquire the next image and queue its semaphores for the next
    /// submission. Returns `false` when the swapchain is out of date.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn acquire(&mut self) -> Result<bool> {
        let semaphore = self.image_available[self.next_acquire];

        // SAFETY: the swapchain and semaphore are valid
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => {
                self.current = index;
                self.next_acquire = (self.next_acquire + 1) % self.image_available.len();

                let mut sync = self.sync.lock();
                sync.waits.push(semaphore);
                sync.signals.push(self.render_finished[index as usize]);

                if suboptimal {
                    self.out_of_date = true;
                }
                Ok(!suboptimal)
            }
            // No image was acquired; the caller must recreate the swapchain.
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.out_of_date = true;
                Ok(false)
            }
            Err(e) => Err(GpuError::from(e)),
        }
    }
}

impl SwapChain<VulkanBackend> for VulkanSwapChain {
    fn resize_buffers(&mut self, desc: &SwapChainDesc) -> Result<PresentOutcome> {
        let capabilities = self.capabilities()?;
        if capabilities.max_image_extent.width == 0 || capabilities.max_image_extent.height == 0 {
            return Ok(PresentOutcome::OutOfDate);
        }

        self.drain()?;
        self.build(desc)
    }

    fn buffer(&self, index: usize) -> Result<VulkanTexture> {
        let image = self.images.get(index).copied().ok_or_else(|| {
            GpuError::InvalidState(format!("swapchain has no image {index}"))
        })?;
        Ok(VulkanTexture::swap_chain_image(
            self.device.clone(),
            image,
            self.format,
            self.extent,
            self.mutable_views,
        ))
    }

    fn buffer_count(&self) -> usize {
        self.images.len()
    }

    fn supports_tearing(&self) -> bool {
        self.present_mode == vk::PresentModeKHR::IMMEDIATE
    }

    fn current_back_buffer_index(&self) -> usize {
        self.current as usize
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn present(&mut self, queue: &VulkanQueue, _mode: PresentMode) -> Result<PresentOutcome> {
        let render_finished = self.render_finished[self.current as usize];

        // Nothing was submitted since the acquire; flush the semaphores.
        if self.sync.lock().signals.contains(&render_finished) {
            queue.submit_pending(&[])?;
        }

        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [self.current];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: all handles are valid and the image was acquired
        let result = unsafe { self.loader.queue_present(self.queue, &present_info) };
        match result {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.out_of_date = true;
                return Ok(PresentOutcome::OutOfDate);
            }
            Err(e) => return Err(GpuError::from(e)),
        }

        if !self.acquire()? || self.out_of_date {
            return Ok(PresentOutcome::OutOfDate);
        }
        Ok(PresentOutcome::Presented)
    }

    fn supports_color_space(&self, color_space: ColorSpace) -> Result<bool> {
        if color_space != ColorSpace::Srgb && !self.device.instance.colorspace_ext {
            return Ok(false);
        }
        let wanted = conv::color_space(color_space);
        Ok(self
            .surface_formats()?
            .iter()
            .any(|format| format.color_space == wanted && format.format == self.format))
    }

    fn set_color_space(&mut self, color_space: ColorSpace) -> Result<()> {
        let color_space = conv::color_space(color_space);
        if color_space != self.color_space {
            debug!("Swapchain color space {:?} -> {:?}", self.color_space, color_space);
            self.color_space = color_space;
            self.out_of_date = true;
        }
        Ok(())
    }
}

impl Drop for VulkanSwapChain {
    fn drop(&mut self) {
        // Back buffers are released before the swapchain.
        if let Err(e) = self.drain() {
            warn!("Failed to drain queue before destroying swapchain: {e}");
        }
        self.destroy_semaphores();
        self.destroy_chain();
        // SAFETY: the swapchain using the surface was destroyed
        unsafe {
            self.device
                .instance
                .surface_loader
                .destroy_surface(self.surface, None)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn tearing_needs_immediate() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(select_present_mode(&modes, true), vk::PresentModeKHR::FIFO);

        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(select_present_mode(&modes, true), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(select_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_count_is_clamped() {
        assert_eq!(clamp_image_count(&capabilities(2, 3), 2), 2);
        assert_eq!(clamp_image_count(&capabilities(3, 8), 2), 3);
        assert_eq!(clamp_image_count(&capabilities(1, 2), 3), 2);
        // Zero max means unbounded.
        assert_eq!(clamp_image_count(&capabilities(2, 0), 3), 3);
    }

    #[test]
    fn undefined_current_extent_clamps_request() {
        let extent = calculate_extent(&capabilities(2, 3), 8000, 600);
        assert_eq!((extent.width, extent.height), (4096, 600));

        let mut fixed = capabilities(2, 3);
        fixed.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = calculate_extent(&fixed, 1024, 768);
        assert_eq!((extent.width, extent.height), (800, 600));
    }
}
