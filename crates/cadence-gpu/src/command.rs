//! Per-slot command recording.

use cadence_core::{Color, Rect, ResourceState, Viewport};

use crate::backend::{Backend, CommandAllocator as _, CommandList as _, Device as _};
use crate::error::Result;

/// One command allocator per back-buffer slot and a single command list that
/// is reset against the active slot's allocator every frame.
pub struct CommandRecorder<B: Backend> {
    allocators: Vec<B::CommandAllocator>,
    list: B::CommandList,
}

impl<B: Backend> CommandRecorder<B> {
    pub fn new(device: &B::Device, slot_count: usize) -> Result<Self> {
        let allocators = (0..slot_count)
            .map(|slot| device.create_command_allocator(slot))
            .collect::<Result<Vec<_>>>()?;

        let list = device.create_command_list(&allocators[0])?;

        Ok(Self { allocators, list })
    }

    /// Reopen the list for `slot` and move the back buffer into the
    /// render-target state.
    ///
    /// The caller must have waited on the slot's fence value.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn prepare(
        &mut self,
        slot: usize,
        back_buffer: &B::Texture,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<()> {
        let allocator = &mut self.allocators[slot];
        allocator.reset()?;
        self.list.reset(allocator)?;

        if before != after {
            self.list.transition(back_buffer, before, after);
        }

        Ok(())
    }

    /// Bind the targets, clear them and set viewport and scissor.
    #[allow(clippy::too_many_arguments)]
    pub fn clear(
        &mut self,
        render_target: &B::RenderTargetView,
        depth_stencil: Option<&B::DepthStencilView>,
        color: Color,
        depth: f32,
        viewport: &Viewport,
        scissor: &Rect,
    ) {
        self.list.set_render_targets(render_target, depth_stencil);
        self.list.clear_render_target(render_target, color);
        if let Some(view) = depth_stencil {
            self.list.clear_depth(view, depth);
        }
        self.list.set_viewport(viewport);
        self.list.set_scissor(scissor);
    }

    /// Return the back buffer to the present state and close the list.
    pub fn finish(&mut self, back_buffer: &B::Texture, before: ResourceState) -> Result<()> {
        if before != ResourceState::Present {
            self.list.transition(back_buffer, before, ResourceState::Present);
        }
        self.list.close()
    }

    /// Add or drop allocators so there is one per slot. The GPU must be idle.
    pub fn set_slot_count(&mut self, device: &B::Device, count: usize) -> Result<()> {
        self.allocators.truncate(count.max(1));
        for slot in self.allocators.len()..count {
            self.allocators.push(device.create_command_allocator(slot)?);
        }
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        self.allocators.len()
    }

    pub fn list(&self) -> &B::CommandList {
        &self.list
    }

    pub fn list_mut(&mut self) -> &mut B::CommandList {
        &mut self.list
    }

    pub(crate) fn into_parts(self) -> (Vec<B::CommandAllocator>, B::CommandList) {
        (self.allocators, self.list)
    }
}
