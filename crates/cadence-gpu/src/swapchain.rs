//! Swap chain, back-buffer views and the depth buffer.

use cadence_core::{Rect, RendererConfig, Viewport};
use tracing::{debug, info};

use crate::backend::{
    Backend, DepthBufferDesc, Device as _, Factory as _, PresentMode, PresentOutcome,
    SwapChain as _, SwapChainDesc,
};
use crate::context::DeviceContext;
use crate::error::{GpuError, Result};

/// A presentable image and its render-target view.
pub struct BackBufferSlot<B: Backend> {
    pub texture: B::Texture,
    pub render_target: B::RenderTargetView,
}

/// The single depth buffer shared by every slot.
pub struct DepthBuffer<B: Backend> {
    pub texture: B::Texture,
    pub view: B::DepthStencilView,
}

/// Owns the swap chain, one [`BackBufferSlot`] per buffer and the depth
/// buffer, and tracks the output size.
pub struct SwapChainManager<B: Backend> {
    swap_chain: Option<B::SwapChain>,
    slots: Vec<BackBufferSlot<B>>,
    depth: Option<DepthBuffer<B>>,
    output: Rect,
    viewport: Viewport,
    scissor: Rect,
    back_buffer_index: usize,
}

impl<B: Backend> SwapChainManager<B> {
    pub fn new(output: Rect) -> Self {
        Self {
            swap_chain: None,
            slots: Vec::new(),
            depth: None,
            output,
            viewport: Viewport::default(),
            scissor: Rect::default(),
            back_buffer_index: 0,
        }
    }

    /// Drop every back-buffer view and the depth buffer. The GPU must be idle.
    pub fn release_buffers(&mut self) {
        self.slots.clear();
        self.depth = None;
    }

    /// Resize the existing chain in place, or create it on first use.
    ///
    /// Sizes are clamped to at least one pixel and the storage format never
    /// carries sRGB encoding.
    pub fn resize_or_create(
        &mut self,
        context: &DeviceContext<B>,
        window: &B::Window,
        config: &RendererConfig,
        allow_tearing: bool,
    ) -> Result<PresentOutcome> {
        let (width, height) = self.output.clamped_extent();
        let desc = SwapChainDesc {
            width,
            height,
            format: config.back_buffer_format.without_srgb(),
            buffer_count: config.back_buffer_count,
            allow_tearing,
        };

        if let Some(swap_chain) = self.swap_chain.as_mut() {
            debug!("Resizing swap chain to {width}x{height}");
            return swap_chain.resize_buffers(&desc);
        }

        let factory = context.factory();
        let swap_chain =
            factory.create_swap_chain(context.device(), context.queue(), window, &desc)?;
        factory.disable_fullscreen_shortcut(window)?;

        info!(
            "Swap chain created: {}x{} ({} buffers, {:?})",
            width, height, desc.buffer_count, desc.format
        );

        self.swap_chain = Some(swap_chain);
        Ok(PresentOutcome::Presented)
    }

    /// Fetch every back buffer, create its view, (re)create the depth buffer
    /// and recompute viewport and scissor.
    pub fn create_buffers(
        &mut self,
        context: &DeviceContext<B>,
        config: &RendererConfig,
        clear_depth: f32,
    ) -> Result<()> {
        let swap_chain = self
            .swap_chain
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("swap chain not created".to_string()))?;
        let device = context.device();

        let count = swap_chain.buffer_count();
        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            let texture = swap_chain.buffer(index)?;
            let render_target =
                device.create_render_target_view(&texture, config.back_buffer_format)?;
            slots.push(BackBufferSlot {
                texture,
                render_target,
            });
        }
        self.slots = slots;

        // Not guaranteed to be 0 after a resize.
        self.back_buffer_index = swap_chain.current_back_buffer_index();

        let (width, height) = self.output.clamped_extent();
        if config.depth_enabled() {
            let desc = DepthBufferDesc {
                width,
                height,
                format: config.depth_buffer_format,
                clear_depth,
            };
            let texture = device.create_depth_buffer(&desc)?;
            let view = device.create_depth_stencil_view(&texture, config.depth_buffer_format)?;
            self.depth = Some(DepthBuffer { texture, view });
        }

        self.viewport = Viewport::from_extent(width, height);
        self.scissor = Rect::from_size(
            i32::try_from(width).unwrap_or(i32::MAX),
            i32::try_from(height).unwrap_or(i32::MAX),
        );

        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn present(&mut self, queue: &B::Queue, mode: PresentMode) -> Result<PresentOutcome> {
        self.swap_chain
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("swap chain not created".to_string()))?
            .present(queue, mode)
    }

    /// Pick up the back buffer the swap chain will render into next.
    pub fn advance(&mut self) {
        if let Some(swap_chain) = &self.swap_chain {
            self.back_buffer_index = swap_chain.current_back_buffer_index();
        }
    }

    /// Give up the chain and every buffer for ordered teardown. The output
    /// size and active slot survive.
    pub(crate) fn take_resources(
        &mut self,
    ) -> (
        Vec<BackBufferSlot<B>>,
        Option<DepthBuffer<B>>,
        Option<B::SwapChain>,
    ) {
        (
            std::mem::take(&mut self.slots),
            self.depth.take(),
            self.swap_chain.take(),
        )
    }

    pub fn set_output(&mut self, output: Rect) {
        self.output = output;
    }

    pub fn output(&self) -> Rect {
        self.output
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scissor(&self) -> Rect {
        self.scissor
    }

    pub fn back_buffer_index(&self) -> usize {
        self.back_buffer_index
    }

    pub fn slot(&self, index: usize) -> Option<&BackBufferSlot<B>> {
        self.slots.get(index)
    }

    /// The slot of the back buffer being rendered.
    pub fn active_slot(&self) -> Option<&BackBufferSlot<B>> {
        self.slot(self.back_buffer_index)
    }

    pub fn slots(&self) -> &[BackBufferSlot<B>] {
        &self.slots
    }

    pub fn depth(&self) -> Option<&DepthBuffer<B>> {
        self.depth.as_ref()
    }

    /// Buffers in the chain, which may exceed the configured count.
    pub fn buffer_count(&self) -> Option<usize> {
        self.swap_chain.as_ref().map(|chain| chain.buffer_count())
    }

    /// Whether the chain presents with tearing.
    pub fn supports_tearing(&self) -> bool {
        self.swap_chain
            .as_ref()
            .is_some_and(|chain| chain.supports_tearing())
    }

    pub fn swap_chain(&self) -> Option<&B::SwapChain> {
        self.swap_chain.as_ref()
    }

    pub fn swap_chain_mut(&mut self) -> Option<&mut B::SwapChain> {
        self.swap_chain.as_mut()
    }
}
