//! Logical device, direct queue and timeline-semaphore fences.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use cadence_core::{BufferFormat, FeatureLevel, ShaderModel};
use gpu_allocator::vulkan::{
    AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use tracing::debug;

use super::command::{VulkanCommandAllocator, VulkanCommandList};
use super::instance::InstanceShared;
use super::memory::{VulkanImageView, VulkanTexture};
use super::{conv, VulkanBackend};
use crate::backend::{DepthBufferDesc, Device, Fence, FenceEvent, Queue};
use crate::error::{GpuError, Result};

/// Device state shared with every object created from it.
pub(crate) struct DeviceShared {
    pub allocator: Mutex<Option<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub api_version: u32,
    /// `VK_KHR_swapchain_mutable_format` is enabled.
    pub mutable_format: bool,
    pub instance: Arc<InstanceShared>,
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        // SAFETY: every child object holds an Arc to this device, so none is
        // alive anymore.
        unsafe {
            let _ = self.device.device_wait_idle();

            // Free all VkDeviceMemory before destroying the device
            self.allocator.lock().take();

            self.device.destroy_device(None);
        }
    }
}

/// First queue family with graphics support.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    // SAFETY: caller guarantees validity
    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .and_then(|index| u32::try_from(index).ok())
}

/// # Safety
/// The instance and physical device must be valid.
unsafe fn supports_extension(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    name: &CStr,
) -> bool {
    // SAFETY: caller guarantees validity
    unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .map(|extensions| {
            extensions
                .iter()
                .any(|props| props.extension_name_as_c_str() == Ok(name))
        })
        .unwrap_or(false)
}

/// Create the logical device with one graphics queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    mutable_format: bool,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority))];

    let mut extension_names = vec![ash::khr::swapchain::NAME.as_ptr()];
    if mutable_format {
        extension_names.push(ash::khr::swapchain_mutable_format::NAME.as_ptr());
        extension_names.push(ash::khr::image_format_list::NAME.as_ptr());
    }

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);
    let mut vulkan_1_2_features =
        vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    // SAFETY: caller guarantees validity, create info outlives the call
    let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };
    Ok(device)
}

/// Whether the features the pipeline relies on are present.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn has_required_features(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> bool {
    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default();
    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features);

    // SAFETY: caller guarantees validity
    unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };

    vulkan_1_3_features.dynamic_rendering == vk::TRUE
        && vulkan_1_3_features.synchronization2 == vk::TRUE
        && vulkan_1_2_features.timeline_semaphore == vk::TRUE
}

/// Trial device creation on `physical_device`.
pub(crate) fn can_create(instance: &InstanceShared, physical_device: vk::PhysicalDevice) -> bool {
    let instance = &instance.instance;

    // SAFETY: the physical device was enumerated from this instance
    unsafe {
        let Some(queue_family) = find_graphics_queue_family(instance, physical_device) else {
            return false;
        };
        if !supports_extension(instance, physical_device, ash::khr::swapchain::NAME)
            || !has_required_features(instance, physical_device)
        {
            return false;
        }

        match create_logical_device(instance, physical_device, queue_family, false) {
            Ok(device) => {
                device.destroy_device(None);
                true
            }
            Err(e) => {
                debug!("Trial device creation failed: {e}");
                false
            }
        }
    }
}

/// Logical device.
pub struct VulkanDevice {
    shared: Arc<DeviceShared>,
    queue: vk::Queue,
}

impl VulkanDevice {
    pub(crate) fn new(
        instance: Arc<InstanceShared>,
        physical_device: vk::PhysicalDevice,
        api_version: u32,
    ) -> Result<Self> {
        // SAFETY: the physical device was enumerated from this instance
        let (device, queue_family, mutable_format) = unsafe {
            let queue_family = find_graphics_queue_family(&instance.instance, physical_device)
                .ok_or(GpuError::NoSuitableAdapter)?;
            let mutable_format = supports_extension(
                &instance.instance,
                physical_device,
                ash::khr::swapchain_mutable_format::NAME,
            );
            let device = create_logical_device(
                &instance.instance,
                physical_device,
                queue_family,
                mutable_format,
            )?;
            (device, queue_family, mutable_format)
        };

        // SAFETY: the queue family was requested at device creation
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                // SAFETY: nothing was created from the device yet
                unsafe { device.destroy_device(None) };
                return Err(GpuError::AllocationFailed(e.to_string()));
            }
        };

        Ok(Self {
            shared: Arc::new(DeviceShared {
                allocator: Mutex::new(Some(allocator)),
                device,
                physical_device,
                queue_family,
                api_version,
                mutable_format,
                instance,
            }),
            queue,
        })
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    /// Get the Vulkan device handle.
    pub fn raw(&self) -> &ash::Device {
        &self.shared.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.shared.physical_device
    }

    pub fn queue_family(&self) -> u32 {
        self.shared.queue_family
    }
}

impl Device<VulkanBackend> for VulkanDevice {
    fn max_feature_level(&self) -> Result<FeatureLevel> {
        // The instance is created for 1.3, capping what the device can expose.
        Ok(conv::feature_level(self.shared.api_version).min(FeatureLevel::new(1, 3)))
    }

    fn highest_shader_model(&self) -> Result<ShaderModel> {
        Ok(conv::shader_model(self.max_feature_level()?))
    }

    fn create_queue(&self) -> Result<VulkanQueue> {
        Ok(VulkanQueue {
            shared: self.shared.clone(),
            queue: self.queue,
            sync: Arc::new(Mutex::new(QueueSync::default())),
        })
    }

    fn create_command_allocator(&self, slot: usize) -> Result<VulkanCommandAllocator> {
        VulkanCommandAllocator::new(self.shared.clone(), slot)
    }

    fn create_command_list(&self, allocator: &VulkanCommandAllocator) -> Result<VulkanCommandList> {
        Ok(VulkanCommandList::new(self.shared.clone(), allocator))
    }

    fn create_fence(&self, initial_value: u64) -> Result<VulkanFence> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        // SAFETY: the device is valid
        let semaphore = unsafe { self.shared.device.create_semaphore(&create_info, None)? };

        Ok(VulkanFence {
            shared: self.shared.clone(),
            semaphore,
        })
    }

    fn create_fence_event(&self) -> Result<VulkanFenceEvent> {
        Ok(VulkanFenceEvent {
            shared: self.shared.clone(),
            armed: None,
        })
    }

    fn create_render_target_view(
        &self,
        texture: &VulkanTexture,
        format: BufferFormat,
    ) -> Result<VulkanImageView> {
        let requested = conv::format(format);
        let view_format = if requested == texture.format() || texture.mutable_format() {
            requested
        } else {
            texture.format()
        };
        VulkanImageView::new(self.shared.clone(), texture, view_format)
    }

    fn create_depth_buffer(&self, desc: &DepthBufferDesc) -> Result<VulkanTexture> {
        let format = conv::format(desc.format);
        let extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let device = &self.shared.device;
        // SAFETY: the device is valid
        let image = unsafe { device.create_image(&create_info, None)? };
        // SAFETY: the image was just created from this device
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = self
            .shared
            .allocator
            .lock()
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
            .and_then(|allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: "depth buffer",
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|e| GpuError::AllocationFailed(e.to_string()))
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: the image is unused
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // Owned from here on, so failure below releases image and memory.
        let texture = VulkanTexture::owned(
            self.shared.clone(),
            image,
            allocation,
            format,
            extent,
            conv::aspect(desc.format),
        );

        // SAFETY: image and memory belong to this device
        unsafe {
            let allocation = texture.allocation().ok_or_else(|| {
                GpuError::InvalidState("depth buffer has no allocation".to_string())
            })?;
            device.bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        Ok(texture)
    }

    fn create_depth_stencil_view(
        &self,
        texture: &VulkanTexture,
        format: BufferFormat,
    ) -> Result<VulkanImageView> {
        VulkanImageView::new(self.shared.clone(), texture, conv::format(format))
    }
}

/// Binary semaphores the next submission must wait on and signal, chained
/// from swap chain image acquisition.
#[derive(Default)]
pub(crate) struct QueueSync {
    pub waits: Vec<vk::Semaphore>,
    pub signals: Vec<vk::Semaphore>,
}

/// The direct (graphics) queue.
pub struct VulkanQueue {
    shared: Arc<DeviceShared>,
    queue: vk::Queue,
    sync: Arc<Mutex<QueueSync>>,
}

impl VulkanQueue {
    pub(crate) fn sync(&self) -> &Arc<Mutex<QueueSync>> {
        &self.sync
    }

    pub fn raw(&self) -> vk::Queue {
        self.queue
    }

    /// Submit `command_buffers` together with every pending acquire wait and
    /// present signal.
    pub(crate) fn submit_pending(&self, command_buffers: &[vk::CommandBuffer]) -> Result<()> {
        submit_pending(&self.shared, self.queue, &self.sync, command_buffers)
    }
}

/// Submit `command_buffers` on `queue`, consuming the semaphores queued in
/// `sync`. With no command buffers this only retires pending acquire waits.
pub(crate) fn submit_pending(
    shared: &DeviceShared,
    queue: vk::Queue,
    sync: &Mutex<QueueSync>,
    command_buffers: &[vk::CommandBuffer],
) -> Result<()> {
    let (waits, signals) = {
        let mut sync = sync.lock();
        (
            std::mem::take(&mut sync.waits),
            std::mem::take(&mut sync.signals),
        )
    };
    if waits.is_empty() && signals.is_empty() && command_buffers.is_empty() {
        return Ok(());
    }

    let wait_infos: Vec<_> = waits
        .iter()
        .map(|&semaphore| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore)
                .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
        })
        .collect();
    let signal_infos: Vec<_> = signals
        .iter()
        .map(|&semaphore| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(semaphore)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        })
        .collect();
    let command_buffer_infos: Vec<_> = command_buffers
        .iter()
        .map(|&buffer| vk::CommandBufferSubmitInfo::default().command_buffer(buffer))
        .collect();

    let submit = vk::SubmitInfo2::default()
        .wait_semaphore_infos(&wait_infos)
        .command_buffer_infos(&command_buffer_infos)
        .signal_semaphore_infos(&signal_infos);

    // SAFETY: all handles belong to this device
    unsafe {
        shared
            .device
            .queue_submit2(queue, &[submit], vk::Fence::null())?;
    }
    Ok(())
}

impl Queue<VulkanBackend> for VulkanQueue {
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn execute(&self, list: &VulkanCommandList) -> Result<()> {
        self.submit_pending(&[list.raw()])
    }

    fn signal(&self, fence: &VulkanFence, value: u64) -> Result<()> {
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(fence.semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit = vk::SubmitInfo2::default().signal_semaphore_infos(&signal_infos);

        // SAFETY: the fence belongs to this device
        unsafe {
            self.shared
                .device
                .queue_submit2(self.queue, &[submit], vk::Fence::null())?;
        }
        Ok(())
    }
}

/// Timeline semaphore.
pub struct VulkanFence {
    shared: Arc<DeviceShared>,
    semaphore: vk::Semaphore,
}

impl Fence<VulkanBackend> for VulkanFence {
    fn completed_value(&self) -> Result<u64> {
        // SAFETY: the semaphore belongs to this device
        let value = unsafe {
            self.shared
                .device
                .get_semaphore_counter_value(self.semaphore)?
        };
        Ok(value)
    }

    fn set_event_on_completion(&self, value: u64, event: &mut VulkanFenceEvent) -> Result<()> {
        event.armed = Some((self.semaphore, value));
        Ok(())
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        // SAFETY: the GPU is idle or lost when fences are released
        unsafe { self.shared.device.destroy_semaphore(self.semaphore, None) };
    }
}

/// Host wait on a timeline value.
pub struct VulkanFenceEvent {
    shared: Arc<DeviceShared>,
    armed: Option<(vk::Semaphore, u64)>,
}

impl FenceEvent for VulkanFenceEvent {
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait(&mut self) -> Result<()> {
        let Some((semaphore, value)) = self.armed.take() else {
            return Ok(());
        };

        let semaphores = [semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        // SAFETY: the semaphore is alive while its fence is
        unsafe { self.shared.device.wait_semaphores(&wait_info, u64::MAX)? };
        Ok(())
    }
}
