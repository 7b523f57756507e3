//! Graphics API seam.
//!
//! The frame pipeline never calls a graphics API directly. Each object it
//! drives (factory, device, queue, fence, swap chain, ...) is an associated
//! type of [`Backend`], and releasing an object is dropping its owning value.
//! Teardown order is therefore expressed purely by drop order.
//!
//! Every call returns [`Result`]; a removed or reset device must be reported
//! as [`GpuError::DeviceLost`](crate::GpuError::DeviceLost) so the pipeline
//! can route it to recovery.

use cadence_core::{
    BufferFormat, Color, ColorSpace, FeatureLevel, Rect, ResourceState, ShaderModel, Viewport,
};

use crate::error::Result;

/// A graphics API implementation.
pub trait Backend: Sized + 'static {
    /// Native window the swap chain presents to.
    type Window: ?Sized + WindowBounds;
    type Factory: Factory<Self>;
    type Adapter: Adapter;
    type Device: Device<Self>;
    type Queue: Queue<Self>;
    type Fence: Fence<Self>;
    /// OS-level wait primitive signalled by a fence.
    type FenceEvent: FenceEvent;
    type CommandAllocator: CommandAllocator;
    type CommandList: CommandList<Self>;
    type SwapChain: SwapChain<Self>;
    type Texture;
    type RenderTargetView;
    type DepthStencilView;

    /// Create the presentation factory (instance).
    fn create_factory(&self, debug: bool) -> Result<Self::Factory>;
}

/// Where a window sits on the desktop.
pub trait WindowBounds {
    /// The window rectangle in desktop coordinates, `None` when it can't be
    /// determined (e.g. on platforms without global window positions).
    fn desktop_rect(&self) -> Option<Rect>;
}

/// Identification of a graphics adapter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    /// Software rasterizer (WARP / CPU device).
    pub software: bool,
}

/// A display output and its native color space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputDesc {
    /// Output rectangle in desktop coordinates.
    pub desktop_rect: Rect,
    pub native_color_space: ColorSpace,
}

/// Swap chain creation and resize parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    /// Storage format, never sRGB.
    pub format: BufferFormat,
    pub buffer_count: u32,
    pub allow_tearing: bool,
}

/// Depth buffer creation parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthBufferDesc {
    pub width: u32,
    pub height: u32,
    pub format: BufferFormat,
    /// Value the buffer is optimized to be cleared to.
    pub clear_depth: f32,
}

/// How a frame is handed to the display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentMode {
    /// Wait for vertical blank (sync interval 1).
    VSync,
    /// Present immediately, tearing allowed (sync interval 0).
    Tearing,
}

/// Result of a successful present or resize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The chain no longer matches its surface and must be rebuilt.
    OutOfDate,
}

/// Presentation factory: enumerates adapters and outputs, creates devices
/// and swap chains.
pub trait Factory<B: Backend> {
    /// Whether tearing presentation is available.
    fn supports_tearing(&self) -> bool;

    /// Adapters in enumeration order.
    fn enumerate_adapters(&self) -> Result<Vec<B::Adapter>>;

    /// The software rasterizer, if one is installed.
    fn software_adapter(&self) -> Result<Option<B::Adapter>>;

    /// Trial device creation: can this adapter create a device at `min_level`?
    fn try_create_device(&self, adapter: &B::Adapter, min_level: FeatureLevel) -> bool;

    fn create_device(&self, adapter: &B::Adapter, min_level: FeatureLevel) -> Result<B::Device>;

    /// Create a windowed, flip-model swap chain for `window`.
    fn create_swap_chain(
        &self,
        device: &B::Device,
        queue: &B::Queue,
        window: &B::Window,
        desc: &SwapChainDesc,
    ) -> Result<B::SwapChain>;

    /// Stop the platform from toggling full screen on its own shortcut.
    fn disable_fullscreen_shortcut(&self, _window: &B::Window) -> Result<()> {
        Ok(())
    }

    /// Whether the factory still reflects the current display topology.
    fn is_current(&self, window: &B::Window) -> bool;

    /// Recreate the factory's view of the display topology.
    fn refresh(&mut self, window: &B::Window) -> Result<()>;

    /// Outputs connected to the adapter driving `swap_chain`.
    fn outputs(&self, window: &B::Window, swap_chain: &B::SwapChain) -> Result<Vec<OutputDesc>>;
}

pub trait Adapter {
    fn info(&self) -> AdapterInfo;
}

/// Logical device.
pub trait Device<B: Backend> {
    /// Highest feature level the device supports.
    fn max_feature_level(&self) -> Result<FeatureLevel>;

    /// Highest shader model the device supports.
    fn highest_shader_model(&self) -> Result<ShaderModel>;

    /// The direct (graphics) command queue.
    fn create_queue(&self) -> Result<B::Queue>;

    fn create_command_allocator(&self, slot: usize) -> Result<B::CommandAllocator>;

    /// Create a command list bound to `allocator`. The list starts closed.
    fn create_command_list(&self, allocator: &B::CommandAllocator) -> Result<B::CommandList>;

    fn create_fence(&self, initial_value: u64) -> Result<B::Fence>;

    fn create_fence_event(&self) -> Result<B::FenceEvent>;

    /// View `texture` as a render target in `format`, which may be the sRGB
    /// variant of the storage format.
    fn create_render_target_view(
        &self,
        texture: &B::Texture,
        format: BufferFormat,
    ) -> Result<B::RenderTargetView>;

    fn create_depth_buffer(&self, desc: &DepthBufferDesc) -> Result<B::Texture>;

    fn create_depth_stencil_view(
        &self,
        texture: &B::Texture,
        format: BufferFormat,
    ) -> Result<B::DepthStencilView>;
}

/// Command submission queue.
pub trait Queue<B: Backend> {
    fn execute(&self, list: &B::CommandList) -> Result<()>;

    /// Set `fence` to `value` once all previously submitted work completes.
    fn signal(&self, fence: &B::Fence, value: u64) -> Result<()>;
}

/// Monotonic GPU completion counter.
pub trait Fence<B: Backend> {
    /// The last value the GPU has reached.
    fn completed_value(&self) -> Result<u64>;

    /// Arm `event` to fire once the fence reaches `value`.
    fn set_event_on_completion(&self, value: u64, event: &mut B::FenceEvent) -> Result<()>;
}

pub trait FenceEvent {
    /// Block until the armed condition is met. No timeout.
    fn wait(&mut self) -> Result<()>;
}

pub trait CommandAllocator {
    /// Reclaim the memory of every list recorded from this allocator.
    ///
    /// The GPU must have finished executing those lists.
    fn reset(&mut self) -> Result<()>;
}

/// Reusable command list.
pub trait CommandList<B: Backend> {
    /// Reopen the list for recording into `allocator`.
    fn reset(&mut self, allocator: &B::CommandAllocator) -> Result<()>;

    /// Resource transition barrier.
    fn transition(&mut self, texture: &B::Texture, before: ResourceState, after: ResourceState);

    fn set_render_targets(
        &mut self,
        render_target: &B::RenderTargetView,
        depth_stencil: Option<&B::DepthStencilView>,
    );

    fn clear_render_target(&mut self, render_target: &B::RenderTargetView, color: Color);

    fn clear_depth(&mut self, depth_stencil: &B::DepthStencilView, depth: f32);

    fn set_viewport(&mut self, viewport: &Viewport);

    fn set_scissor(&mut self, rect: &Rect);

    fn close(&mut self) -> Result<()>;
}

/// Presentable buffer chain.
pub trait SwapChain<B: Backend> {
    /// Resize every buffer in place. All references to the old buffers must
    /// have been released.
    fn resize_buffers(&mut self, desc: &SwapChainDesc) -> Result<PresentOutcome>;

    fn buffer(&self, index: usize) -> Result<B::Texture>;

    /// Number of buffers actually in the chain. May exceed the requested
    /// count when the surface has a higher minimum.
    fn buffer_count(&self) -> usize;

    /// Whether presents may tear. False when tearing was requested but the
    /// surface has no tearing present mode.
    fn supports_tearing(&self) -> bool;

    /// Index of the buffer the next frame renders into.
    fn current_back_buffer_index(&self) -> usize;

    fn present(&mut self, queue: &B::Queue, mode: PresentMode) -> Result<PresentOutcome>;

    fn supports_color_space(&self, color_space: ColorSpace) -> Result<bool>;

    fn set_color_space(&mut self, color_space: ColorSpace) -> Result<()>;
}
