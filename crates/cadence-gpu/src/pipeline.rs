//! The frame pipeline: device, swap chain, fences, command recording, color
//! space and recovery wired together.
//!
//! Call order for a window:
//!
//! 1. [`FramePipeline::set_window`]
//! 2. [`FramePipeline::create_device_resources`]
//! 3. [`FramePipeline::create_window_size_dependent_resources`]
//! 4. per frame, [`FramePipeline::render`] (or `prepare`, `clear`, draw,
//!    `present`), and [`FramePipeline::on_window_size_changed`] on resize.
//!
//! All calls happen on one thread. The only blocking points are the fence
//! waits of `wait_for_gpu` and of the frame advance inside `present`.

use std::sync::Arc;

use cadence_core::{
    ColorSpace, DeviceLossReason, FeatureLevel, LifecycleEvent, Rect, RendererConfig,
    RendererOptions, ResourceState, ShaderModel, Viewport,
};
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, Factory as _, PresentMode, PresentOutcome, Queue as _};
use crate::color_space::ColorSpaceNegotiator;
use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::frame::FrameContext;
use crate::recovery::{DeviceNotify, DeviceState, RecoveryController, RecoveryEvent, Teardown};
use crate::swapchain::{BackBufferSlot, DepthBuffer, SwapChainManager};

/// Frame-synchronized rendering pipeline over a [`Backend`].
pub struct FramePipeline<B: Backend> {
    backend: B,
    config: RendererConfig,
    window: Option<Arc<B::Window>>,
    device: Option<DeviceContext<B>>,
    swap_chain: SwapChainManager<B>,
    color_space: ColorSpaceNegotiator,
    recovery: RecoveryController,
    /// The chain reported it no longer matches its surface.
    out_of_date: bool,
}

impl<B: Backend> FramePipeline<B> {
    /// Create an empty pipeline. No GPU object exists until
    /// [`create_device_resources`](Self::create_device_resources).
    pub fn new(backend: B, config: RendererConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            backend,
            config,
            window: None,
            device: None,
            swap_chain: SwapChainManager::new(Rect::from_size(1, 1)),
            color_space: ColorSpaceNegotiator::new(),
            recovery: RecoveryController::new(),
            out_of_date: false,
        })
    }

    /// Attach the window to present to and its initial size.
    pub fn set_window(&mut self, window: Arc<B::Window>, width: u32, height: u32) {
        self.window = Some(window);
        self.swap_chain.set_output(output_rect(width, height));
    }

    /// Register a listener for device loss, restoration and lifecycle events.
    pub fn register_device_notify(&mut self, listener: Box<dyn DeviceNotify>) {
        self.recovery.register(listener);
    }

    /// Select an adapter and create the device, queue, fence and command
    /// recorders.
    pub fn create_device_resources(&mut self) -> Result<()> {
        self.ensure_available()?;
        if self.device.is_some() {
            return Err(GpuError::InvalidState(
                "device resources already created".to_string(),
            ));
        }

        let context = DeviceContext::create(
            &self.backend,
            &self.config,
            self.swap_chain.back_buffer_index(),
        )?;
        self.device = Some(context);
        Ok(())
    }

    /// (Re)create every resource that depends on the output size.
    ///
    /// Device loss during the resize hands over to recovery.
    pub fn create_window_size_dependent_resources(&mut self) -> Result<()> {
        self.ensure_available()?;
        match self.rebuild_window_size_dependent() {
            Err(GpuError::DeviceLost(reason)) => self.handle_device_lost(reason),
            other => other,
        }
    }

    fn rebuild_window_size_dependent(&mut self) -> Result<()> {
        let window = self.window.clone().ok_or(GpuError::NoWindow)?;
        let clear_depth = self.depth_clear_value();
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("device resources not created".to_string()))?;

        let slot = self.swap_chain.back_buffer_index();
        device.wait_for_gpu(slot)?;

        self.swap_chain.release_buffers();
        device.fence_mut().reset_all_to(slot);

        let allow_tearing = device.options().contains(RendererOptions::ALLOW_TEARING);
        let outcome =
            self.swap_chain
                .resize_or_create(device, &window, &self.config, allow_tearing)?;
        self.out_of_date = outcome == PresentOutcome::OutOfDate;

        if let Some(count) = self.swap_chain.buffer_count() {
            device.set_slot_count(count)?;
        }
        if allow_tearing && !self.swap_chain.supports_tearing() {
            warn!("Surface has no tearing present mode, presenting with vsync");
            device.disable_tearing();
        }

        let hdr_enabled = device.options().contains(RendererOptions::ENABLE_HDR);
        self.color_space.update::<B>(
            device.factory_mut(),
            &window,
            self.swap_chain.swap_chain_mut(),
            self.config.back_buffer_format,
            hdr_enabled,
        )?;

        self.swap_chain
            .create_buffers(device, &self.config, clear_depth)
    }

    /// Handle a resize notification from the host.
    ///
    /// Returns whether size-dependent resources were rebuilt; `false` when no
    /// window is attached or the size is unchanged.
    pub fn on_window_size_changed(&mut self, width: u32, height: u32) -> Result<bool> {
        if self.window.is_none() {
            debug!("Ignoring resize, no window attached");
            return Ok(false);
        }

        let output = output_rect(width, height);
        if output == self.swap_chain.output() {
            self.update_color_space()?;
            return Ok(false);
        }

        self.swap_chain.set_output(output);
        if self.device.is_none() {
            return Ok(false);
        }

        self.create_window_size_dependent_resources()?;
        Ok(true)
    }

    /// Open the active slot's command list and transition its back buffer.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn prepare(&mut self, before: ResourceState, after: ResourceState) -> Result<()> {
        self.ensure_available()?;
        let device = self.device.as_mut().ok_or(GpuError::DeviceUnavailable)?;
        let slot = self.swap_chain.back_buffer_index();
        let back_buffer = self
            .swap_chain
            .slot(slot)
            .ok_or_else(|| GpuError::InvalidState("swap chain buffers not created".to_string()))?;

        device
            .recorder_mut()
            .prepare(slot, &back_buffer.texture, before, after)
    }

    /// Bind and clear the active targets and set viewport and scissor.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_available()?;
        let clear_depth = self.depth_clear_value();
        let device = self.device.as_mut().ok_or(GpuError::DeviceUnavailable)?;
        let back_buffer = self
            .swap_chain
            .active_slot()
            .ok_or_else(|| GpuError::InvalidState("swap chain buffers not created".to_string()))?;

        device.recorder_mut().clear(
            &back_buffer.render_target,
            self.swap_chain.depth().map(|depth| &depth.view),
            self.config.clear_color,
            clear_depth,
            &self.swap_chain.viewport(),
            &self.swap_chain.scissor(),
        );
        Ok(())
    }

    /// Submit the frame, present it and advance to the next back buffer.
    ///
    /// A removed or reset device is recovered from before returning; the
    /// frame is dropped.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn present(&mut self, before: ResourceState) -> Result<()> {
        self.ensure_available()?;

        match self.submit_and_present(before) {
            Ok(PresentOutcome::Presented) => {}
            Ok(PresentOutcome::OutOfDate) => self.out_of_date = true,
            Err(GpuError::DeviceLost(reason)) => return self.handle_device_lost(reason),
            Err(e) => return Err(e),
        }

        match self.move_to_next_frame() {
            Err(GpuError::DeviceLost(reason)) => return self.handle_device_lost(reason),
            other => other?,
        }

        if self.out_of_date {
            debug!("Swap chain out of date, rebuilding");
            return self.create_window_size_dependent_resources();
        }

        let stale = match (&self.device, &self.window) {
            (Some(device), Some(window)) => !device.factory().is_current(window),
            _ => false,
        };
        if stale {
            self.update_color_space()?;
        }

        Ok(())
    }

    fn submit_and_present(&mut self, before: ResourceState) -> Result<PresentOutcome> {
        let device = self.device.as_mut().ok_or(GpuError::DeviceUnavailable)?;
        let back_buffer = self
            .swap_chain
            .active_slot()
            .ok_or_else(|| GpuError::InvalidState("swap chain buffers not created".to_string()))?;

        device.recorder_mut().finish(&back_buffer.texture, before)?;
        device.queue().execute(device.recorder().list())?;

        let mode = if device.options().contains(RendererOptions::ALLOW_TEARING) {
            PresentMode::Tearing
        } else {
            PresentMode::VSync
        };
        self.swap_chain.present(device.queue(), mode)
    }

    fn move_to_next_frame(&mut self) -> Result<()> {
        let device = self.device.as_mut().ok_or(GpuError::DeviceUnavailable)?;
        let current = self.swap_chain.back_buffer_index();
        self.swap_chain.advance();
        let next = self.swap_chain.back_buffer_index();
        device.move_to_next_frame(current, next)
    }

    /// Render one frame: `prepare`, `clear`, `draw`, `present`.
    pub fn render<F, E>(&mut self, draw: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&mut FrameContext<'_, B>) -> std::result::Result<(), E>,
        E: From<GpuError>,
    {
        self.prepare(ResourceState::Present, ResourceState::RenderTarget)?;
        self.clear()?;
        {
            let mut frame = self.frame_context()?;
            draw(&mut frame)?;
        }
        self.present(ResourceState::RenderTarget)?;
        Ok(())
    }

    /// Command list and targets of the frame being recorded.
    pub fn frame_context(&mut self) -> Result<FrameContext<'_, B>> {
        let device = self.device.as_mut().ok_or(GpuError::DeviceUnavailable)?;
        let slot = self.swap_chain.back_buffer_index();
        let back_buffer = self
            .swap_chain
            .slot(slot)
            .ok_or_else(|| GpuError::InvalidState("swap chain buffers not created".to_string()))?;

        Ok(FrameContext {
            command_list: device.recorder_mut().list_mut(),
            render_target: &back_buffer.render_target,
            depth_stencil: self.swap_chain.depth().map(|depth| &depth.view),
            viewport: self.swap_chain.viewport(),
            scissor: self.swap_chain.scissor(),
            slot,
        })
    }

    /// Block until the GPU has finished all submitted work.
    pub fn wait_for_gpu(&mut self) -> Result<()> {
        let slot = self.swap_chain.back_buffer_index();
        match self.device.as_mut() {
            Some(device) => device.wait_for_gpu(slot),
            None => Ok(()),
        }
    }

    /// Tear down every GPU object and create them again.
    ///
    /// A failure while recreating is fatal: the pipeline enters
    /// [`DeviceState::Failed`] and every later frame call returns
    /// [`GpuError::DeviceUnavailable`].
    pub fn handle_device_lost(&mut self, reason: DeviceLossReason) -> Result<()> {
        let state = self.recovery.apply(RecoveryEvent::DeviceLost(reason))?;
        if state == DeviceState::Failed {
            self.release_device_resources();
            return Err(GpuError::RecoveryFailed(Box::new(GpuError::DeviceLost(
                reason,
            ))));
        }

        warn!("GPU {reason}, recreating device resources");
        self.recovery.notify_lost();

        self.release_device_resources();
        self.recovery.apply(RecoveryEvent::TornDown)?;

        let rebuilt = self
            .create_device_resources()
            .and_then(|()| self.rebuild_window_size_dependent());

        match rebuilt {
            Ok(()) => {
                self.recovery.apply(RecoveryEvent::Restored)?;
                info!("Device resources restored");
                self.recovery.notify_restored();
                Ok(())
            }
            Err(e) => {
                error!("Failed to recreate device resources: {e}");
                self.recovery.apply(RecoveryEvent::RestoreFailed)?;
                self.release_device_resources();
                Err(GpuError::RecoveryFailed(Box::new(e)))
            }
        }
    }

    /// Re-run color space negotiation for the display under the window.
    ///
    /// Negotiation failures are soft; a lost device is recovered from.
    pub fn update_color_space(&mut self) -> Result<()> {
        match self.negotiate_color_space() {
            Err(GpuError::DeviceLost(reason)) => self.handle_device_lost(reason),
            other => other,
        }
    }

    fn negotiate_color_space(&mut self) -> Result<()> {
        let (Some(device), Some(window)) = (self.device.as_mut(), self.window.clone()) else {
            return Ok(());
        };

        let hdr_enabled = device.options().contains(RendererOptions::ENABLE_HDR);
        self.color_space.update::<B>(
            device.factory_mut(),
            &window,
            self.swap_chain.swap_chain_mut(),
            self.config.back_buffer_format,
            hdr_enabled,
        )
    }

    /// Forward a window lifecycle event to every listener.
    pub fn on_lifecycle(&mut self, event: LifecycleEvent) {
        debug!("Lifecycle: {event:?}");
        self.recovery.forward_lifecycle(event);
    }

    pub fn on_activated(&mut self) {
        self.on_lifecycle(LifecycleEvent::Activated);
    }

    pub fn on_deactivated(&mut self) {
        self.on_lifecycle(LifecycleEvent::Deactivated);
    }

    pub fn on_suspending(&mut self) {
        self.on_lifecycle(LifecycleEvent::Suspending);
    }

    pub fn on_resuming(&mut self) {
        self.on_lifecycle(LifecycleEvent::Resuming);
    }

    /// Release every GPU object in teardown order.
    fn release_device_resources(&mut self) {
        let (slots, depth, swap_chain) = self.swap_chain.take_resources();
        let teardown: Teardown<B> = Teardown {
            device: self.device.take().map(DeviceContext::into_parts),
            slots,
            depth,
            swap_chain,
        };
        teardown.run();
    }

    fn ensure_available(&self) -> Result<()> {
        if self.recovery.state() == DeviceState::Failed {
            return Err(GpuError::DeviceUnavailable);
        }
        Ok(())
    }

    fn depth_clear_value(&self) -> f32 {
        if self.config.options.contains(RendererOptions::REVERSE_DEPTH) {
            0.0
        } else {
            1.0
        }
    }

    /// Output size, anchored at the origin.
    pub fn output_rect(&self) -> Rect {
        self.swap_chain.output()
    }

    pub fn viewport(&self) -> Viewport {
        self.swap_chain.viewport()
    }

    pub fn scissor_rect(&self) -> Rect {
        self.swap_chain.scissor()
    }

    /// Color space currently applied to the swap chain.
    pub fn color_space(&self) -> ColorSpace {
        self.color_space.color_space()
    }

    /// Whether the display under the window natively runs HDR10.
    pub fn is_display_hdr10(&self) -> bool {
        self.color_space.hdr_capable()
    }

    pub fn feature_level(&self) -> Option<FeatureLevel> {
        self.device.as_ref().map(DeviceContext::feature_level)
    }

    pub fn shader_model(&self) -> Option<ShaderModel> {
        self.device.as_ref().map(DeviceContext::shader_model)
    }

    /// Buffers in the swap chain. The surface may require more than
    /// configured; before the chain exists this is the configured count.
    pub fn back_buffer_count(&self) -> u32 {
        self.swap_chain
            .buffer_count()
            .and_then(|count| u32::try_from(count).ok())
            .unwrap_or(self.config.back_buffer_count)
    }

    /// Index of the back buffer being rendered.
    pub fn active_slot(&self) -> usize {
        self.swap_chain.back_buffer_index()
    }

    /// Options in effect; unsupported ones are removed once the device exists.
    pub fn options(&self) -> RendererOptions {
        self.device
            .as_ref()
            .map_or(self.config.options, DeviceContext::options)
    }

    pub fn device_state(&self) -> DeviceState {
        self.recovery.state()
    }

    /// Completed device recoveries.
    pub fn recoveries(&self) -> u32 {
        self.recovery.recoveries()
    }

    /// Fence value recorded for each slot.
    pub fn fence_values(&self) -> Vec<u64> {
        self.device
            .as_ref()
            .map(|device| device.fence().values().to_vec())
            .unwrap_or_default()
    }

    /// Active back buffer and its render-target view.
    pub fn back_buffer(&self) -> Option<&BackBufferSlot<B>> {
        self.swap_chain.active_slot()
    }

    pub fn back_buffers(&self) -> &[BackBufferSlot<B>] {
        self.swap_chain.slots()
    }

    pub fn depth_buffer(&self) -> Option<&DepthBuffer<B>> {
        self.swap_chain.depth()
    }

    /// The device, for owners of GPU content.
    pub fn device_context(&self) -> Option<&DeviceContext<B>> {
        self.device.as_ref()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn window(&self) -> Option<&Arc<B::Window>> {
        self.window.as_ref()
    }
}

impl<B: Backend> Drop for FramePipeline<B> {
    fn drop(&mut self) {
        if self.device.is_some() && self.recovery.state().is_healthy() {
            if let Err(e) = self.wait_for_gpu() {
                warn!("Failed to drain GPU on shutdown: {e}");
            }
        }
        self.release_device_resources();
    }
}

fn output_rect(width: u32, height: u32) -> Rect {
    Rect::from_size(
        i32::try_from(width).unwrap_or(i32::MAX),
        i32::try_from(height).unwrap_or(i32::MAX),
    )
}
