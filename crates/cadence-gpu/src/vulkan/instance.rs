//! Vulkan instance, physical devices and the presentation factory.

use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::vk;
use cadence_core::{ColorSpace, FeatureLevel, Rect};
use tracing::{debug, warn};

use super::device::{self, VulkanDevice, VulkanQueue};
use super::swapchain::VulkanSwapChain;
use super::{conv, NativeWindow, VulkanBackend};
use crate::backend::{Adapter, AdapterInfo, Factory, OutputDesc, SwapChainDesc};
use crate::error::{GpuError, Result};

/// Required instance extensions for windowed presentation.
pub fn required_instance_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::surface::NAME,
        #[cfg(target_os = "windows")]
        ash::khr::win32_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::xlib_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::wayland_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::ext::metal_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
    ]
}

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance state shared with every object created from it.
pub(crate) struct InstanceShared {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface_loader: ash::khr::surface::Instance,
    /// `VK_EXT_swapchain_colorspace` is enabled.
    pub colorspace_ext: bool,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        // SAFETY: every child object holds an Arc to this instance, so none is
        // alive anymore.
        unsafe { self.instance.destroy_instance(None) };
    }
}

/// Create a Vulkan 1.3 instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
) -> Result<(ash::Instance, bool)> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;
    let engine_name = c"Cadence";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    // SAFETY: caller guarantees the entry is valid
    let available_extensions = unsafe { entry.enumerate_instance_extension_properties(None)? };
    let colorspace_ext = available_extensions.iter().any(|props| {
        props.extension_name_as_c_str() == Ok(ash::ext::swapchain_colorspace::NAME)
    });

    let mut extensions = required_instance_extensions();
    if colorspace_ext {
        extensions.push(ash::ext::swapchain_colorspace::NAME);
    }
    let extension_names: Vec<*const i8> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let mut layer_names: Vec<*const i8> = Vec::new();
    if enable_validation {
        // SAFETY: caller guarantees the entry is valid
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        let found = available_layers
            .iter()
            .any(|props| props.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
        if found {
            layer_names.push(VALIDATION_LAYER.as_ptr());
        } else {
            warn!("Validation layer {:?} not available", VALIDATION_LAYER);
        }
    }

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    // SAFETY: all pointers in create_info outlive the call
    let instance = unsafe { entry.create_instance(&create_info, None)? };

    Ok((instance, colorspace_ext))
}

/// The Vulkan instance acting as presentation factory.
pub struct VulkanFactory {
    shared: Arc<InstanceShared>,
    /// Monitor layout when the factory was last refreshed.
    monitors: Vec<Rect>,
}

impl VulkanFactory {
    pub(crate) fn new(backend: &VulkanBackend, validation: bool) -> Result<Self> {
        // SAFETY: loading the system Vulkan library
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        // SAFETY: entry was just loaded
        let (instance, colorspace_ext) =
            unsafe { create_instance(&entry, backend.app_name(), validation)? };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        debug!("Vulkan instance created (validation: {validation}, colorspace ext: {colorspace_ext})");

        Ok(Self {
            shared: Arc::new(InstanceShared {
                entry,
                instance,
                surface_loader,
                colorspace_ext,
            }),
            monitors: Vec::new(),
        })
    }
}

impl Factory<VulkanBackend> for VulkanFactory {
    fn supports_tearing(&self) -> bool {
        // IMMEDIATE availability is per surface. The swap chain reports
        // whether it got it and the pipeline drops the option otherwise.
        true
    }

    fn enumerate_adapters(&self) -> Result<Vec<VulkanAdapter>> {
        // SAFETY: the instance is valid for the lifetime of self
        let physical_devices = unsafe { self.shared.instance.enumerate_physical_devices()? };

        Ok(physical_devices
            .into_iter()
            .map(|physical_device| VulkanAdapter::new(self.shared.clone(), physical_device))
            .collect())
    }

    fn software_adapter(&self) -> Result<Option<VulkanAdapter>> {
        Ok(self
            .enumerate_adapters()?
            .into_iter()
            .find(|adapter| adapter.device_type == vk::PhysicalDeviceType::CPU))
    }

    fn try_create_device(&self, adapter: &VulkanAdapter, min_level: FeatureLevel) -> bool {
        if conv::feature_level(adapter.api_version) < min_level {
            return false;
        }
        device::can_create(&self.shared, adapter.physical_device)
    }

    fn create_device(&self, adapter: &VulkanAdapter, min_level: FeatureLevel) -> Result<VulkanDevice> {
        if conv::feature_level(adapter.api_version) < min_level {
            return Err(GpuError::NoSuitableAdapter);
        }
        VulkanDevice::new(self.shared.clone(), adapter.physical_device, adapter.api_version)
    }

    fn create_swap_chain(
        &self,
        device: &VulkanDevice,
        queue: &VulkanQueue,
        window: &dyn NativeWindow,
        desc: &SwapChainDesc,
    ) -> Result<VulkanSwapChain> {
        VulkanSwapChain::new(device, queue, window, desc)
    }

    fn is_current(&self, window: &dyn NativeWindow) -> bool {
        window.monitors() == self.monitors
    }

    fn refresh(&mut self, window: &dyn NativeWindow) -> Result<()> {
        self.monitors = window.monitors();
        debug!("Display topology: {} monitor(s)", self.monitors.len());
        Ok(())
    }

    fn outputs(
        &self,
        window: &dyn NativeWindow,
        swap_chain: &VulkanSwapChain,
    ) -> Result<Vec<OutputDesc>> {
        // The surface reports HDR10 support for whichever display shows it.
        let native_color_space = if swap_chain.hdr10_supported()? {
            ColorSpace::Hdr10
        } else {
            ColorSpace::Srgb
        };

        Ok(window
            .monitors()
            .into_iter()
            .map(|desktop_rect| OutputDesc {
                desktop_rect,
                native_color_space,
            })
            .collect())
    }
}

/// A physical device.
pub struct VulkanAdapter {
    // Keeps the instance alive while the handle is in use.
    _instance: Arc<InstanceShared>,
    physical_device: vk::PhysicalDevice,
    device_type: vk::PhysicalDeviceType,
    api_version: u32,
    name: String,
}

impl VulkanAdapter {
    fn new(instance: Arc<InstanceShared>, physical_device: vk::PhysicalDevice) -> Self {
        // SAFETY: the physical device was enumerated from this instance
        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        };
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            _instance: instance,
            physical_device,
            device_type: properties.device_type,
            api_version: properties.api_version,
            name,
        }
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }
}

impl Adapter for VulkanAdapter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: self.name.clone(),
            software: self.device_type == vk::PhysicalDeviceType::CPU,
        }
    }
}
