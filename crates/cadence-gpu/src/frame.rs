//! Per-frame context handed to content code.

use cadence_core::{Rect, Viewport};

use crate::backend::Backend;

/// The open command list and targets of the frame being rendered.
///
/// The back buffer is in the render-target state, bound, cleared, and the
/// viewport and scissor are set.
pub struct FrameContext<'a, B: Backend> {
    /// Command list recording this frame.
    pub command_list: &'a mut B::CommandList,
    /// View of the active back buffer.
    pub render_target: &'a B::RenderTargetView,
    /// Depth view, `None` when depth is disabled.
    pub depth_stencil: Option<&'a B::DepthStencilView>,
    pub viewport: Viewport,
    pub scissor: Rect,
    /// Active back-buffer slot.
    pub slot: usize,
}
