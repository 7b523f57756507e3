//! Frame-synchronized rendering pipeline for the Cadence engine.
//!
//! This crate provides:
//! - Device creation with adapter and capability selection
//! - A fence-paced ring of back buffers with one command allocator per slot
//! - Swap chain creation, resizing and presentation
//! - Color-space negotiation for HDR10 displays
//! - Device-loss recovery with listener notification
//! - A Vulkan backend behind the [`Backend`] seam

pub mod backend;
pub mod color_space;
pub mod command;
pub mod context;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod recovery;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use backend::{
    Adapter, AdapterInfo, Backend, CommandAllocator, CommandList, DepthBufferDesc, Device, Factory,
    Fence, FenceEvent, OutputDesc, PresentMode, PresentOutcome, Queue, SwapChain, SwapChainDesc,
    WindowBounds,
};
pub use color_space::{best_output, select_color_space, ColorSpaceNegotiator};
pub use command::CommandRecorder;
pub use context::DeviceContext;
pub use error::{GpuError, Result};
pub use frame::FrameContext;
pub use pipeline::FramePipeline;
pub use recovery::{DeviceNotify, DeviceState, RecoveryController, RecoveryEvent};
pub use swapchain::{BackBufferSlot, DepthBuffer, SwapChainManager};
pub use sync::FrameFence;
pub use vulkan::{NativeWindow, VulkanBackend};
