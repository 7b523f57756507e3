//! Device acquisition.

use cadence_core::{FeatureLevel, RendererConfig, RendererOptions, ShaderModel};
use tracing::{error, info, warn};

use crate::backend::{Adapter as _, AdapterInfo, Backend, Device as _, Factory as _};
use crate::command::CommandRecorder;
use crate::error::{GpuError, Result};
use crate::sync::FrameFence;

/// Factory, adapter, logical device, the single direct queue, the frame
/// fence and the per-slot command recorders.
pub struct DeviceContext<B: Backend> {
    recorder: CommandRecorder<B>,
    fence: FrameFence<B>,
    queue: B::Queue,
    device: B::Device,
    factory: B::Factory,
    adapter: AdapterInfo,
    feature_level: FeatureLevel,
    shader_model: ShaderModel,
    options: RendererOptions,
}

/// Everything a [`DeviceContext`] owns, for ordered teardown.
pub(crate) struct DeviceParts<B: Backend> {
    pub allocators: Vec<B::CommandAllocator>,
    pub fence: B::Fence,
    pub fence_event: B::FenceEvent,
    pub command_list: B::CommandList,
    pub queue: B::Queue,
    pub device: B::Device,
    pub factory: B::Factory,
}

impl<B: Backend> DeviceContext<B> {
    /// Select an adapter and create every device-dependent object.
    ///
    /// `active_slot` is the back-buffer slot the fence starts counting for.
    pub fn create(backend: &B, config: &RendererConfig, active_slot: usize) -> Result<Self> {
        config.validate()?;

        let factory = backend.create_factory(config.debug_layer)?;

        let mut options = config.options;
        if options.contains(RendererOptions::ALLOW_TEARING) && !factory.supports_tearing() {
            options.remove(RendererOptions::ALLOW_TEARING);
            warn!("Variable refresh rate displays not supported");
        }

        let (adapter, device) = select_adapter::<B>(&factory, config)?;

        let feature_level = device.max_feature_level()?;

        let shader_model = device.highest_shader_model()?;
        if shader_model < config.min_shader_model {
            error!(
                "Shader model {} is required, {} reports {}",
                config.min_shader_model, adapter.name, shader_model
            );
            return Err(GpuError::ShaderModelUnsupported {
                required: config.min_shader_model,
                found: shader_model,
            });
        }

        let queue = device.create_queue()?;

        let slot_count = config.back_buffer_count as usize;
        let recorder = CommandRecorder::new(&device, slot_count)?;
        let fence = FrameFence::new(&device, slot_count, active_slot)?;

        info!(
            "Device created on {} (feature level {}, shader model {})",
            adapter.name, feature_level, shader_model
        );

        Ok(Self {
            recorder,
            fence,
            queue,
            device,
            factory,
            adapter,
            feature_level,
            shader_model,
            options,
        })
    }

    /// Drain the GPU.
    pub fn wait_for_gpu(&mut self, slot: usize) -> Result<()> {
        self.fence.wait_for_gpu(&self.queue, slot)
    }

    /// Advance the fence from `current` to `next`.
    pub fn move_to_next_frame(&mut self, current: usize, next: usize) -> Result<()> {
        self.fence.move_to_next_frame(&self.queue, current, next)
    }

    /// Match the per-slot allocators and fence values to the swap chain's
    /// buffer count. The GPU must be drained first.
    pub fn set_slot_count(&mut self, count: usize) -> Result<()> {
        if count == self.recorder.slot_count() {
            return Ok(());
        }
        info!(
            "Swap chain has {count} buffers, {} configured",
            self.recorder.slot_count()
        );
        self.recorder.set_slot_count(&self.device, count)?;
        self.fence.set_slot_count(count);
        Ok(())
    }

    /// Stop requesting tearing presents.
    pub fn disable_tearing(&mut self) {
        self.options.remove(RendererOptions::ALLOW_TEARING);
    }

    pub fn factory(&self) -> &B::Factory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut B::Factory {
        &mut self.factory
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn queue(&self) -> &B::Queue {
        &self.queue
    }

    pub fn fence(&self) -> &FrameFence<B> {
        &self.fence
    }

    pub fn fence_mut(&mut self) -> &mut FrameFence<B> {
        &mut self.fence
    }

    pub fn recorder(&self) -> &CommandRecorder<B> {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut CommandRecorder<B> {
        &mut self.recorder
    }

    /// The selected adapter.
    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    pub fn shader_model(&self) -> ShaderModel {
        self.shader_model
    }

    /// Options after removing the ones the system can't honor.
    pub fn options(&self) -> RendererOptions {
        self.options
    }

    pub(crate) fn into_parts(self) -> DeviceParts<B> {
        let (allocators, command_list) = self.recorder.into_parts();
        let (fence, fence_event) = self.fence.into_parts();
        DeviceParts {
            allocators,
            fence,
            fence_event,
            command_list,
            queue: self.queue,
            device: self.device,
            factory: self.factory,
        }
    }
}

/// First hardware adapter that can create a device at the minimum feature
/// level, else the software adapter when allowed.
fn select_adapter<B: Backend>(
    factory: &B::Factory,
    config: &RendererConfig,
) -> Result<(AdapterInfo, B::Device)> {
    let min_level = config.min_feature_level;

    for (index, adapter) in factory.enumerate_adapters()?.into_iter().enumerate() {
        let info = adapter.info();
        if info.software {
            continue;
        }

        if factory.try_create_device(&adapter, min_level) {
            info!("Adapter ({index}): {}", info.name);
            let device = factory.create_device(&adapter, min_level)?;
            return Ok((info, device));
        }
    }

    if config.allow_software_adapter {
        if let Some(adapter) = factory.software_adapter()? {
            let info = adapter.info();
            warn!("No hardware adapter qualifies, using software adapter {}", info.name);
            let device = factory.create_device(&adapter, min_level)?;
            return Ok((info, device));
        }
    }

    error!("No adapter supports feature level {min_level}");
    Err(GpuError::NoSuitableAdapter)
}
