//! Frame fence: per-back-buffer GPU completion tracking.

use tracing::trace;

use crate::backend::{Backend, Device as _, Fence as _, FenceEvent as _, Queue as _};
use crate::error::{GpuError, Result};

/// One GPU fence plus the value last submitted for each back-buffer slot.
///
/// A slot's command allocator may only be reused once the fence has reached
/// the value recorded for that slot.
pub struct FrameFence<B: Backend> {
    fence: B::Fence,
    event: B::FenceEvent,
    values: Vec<u64>,
}

impl<B: Backend> FrameFence<B> {
    /// Create the fence at the active slot's current value and the wait
    /// event used to block on it.
    pub fn new(device: &B::Device, slot_count: usize, active_slot: usize) -> Result<Self> {
        let mut values = vec![0; slot_count];
        let fence = device.create_fence(values[active_slot])?;
        values[active_slot] += 1;

        let event = device.create_fence_event().map_err(|e| match e {
            GpuError::WaitHandleCreation(_) => e,
            other => GpuError::WaitHandleCreation(other.to_string()),
        })?;

        Ok(Self {
            fence,
            event,
            values,
        })
    }

    /// Block until the GPU has finished all submitted work.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_for_gpu(&mut self, queue: &B::Queue, slot: usize) -> Result<()> {
        let value = self.values[slot];
        queue.signal(&self.fence, value)?;

        self.fence.set_event_on_completion(value, &mut self.event)?;
        trace!(value, "Waiting for GPU to drain");
        self.event.wait()?;

        self.values[slot] += 1;
        Ok(())
    }

    /// Signal the end of the frame rendered into `current` and wait, only if
    /// needed, until `next` is free for reuse.
    ///
    /// This bounds how far the CPU runs ahead of the GPU to
    /// `slot_count - 1` frames.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn move_to_next_frame(&mut self, queue: &B::Queue, current: usize, next: usize) -> Result<()> {
        let current_value = self.values[current];
        queue.signal(&self.fence, current_value)?;

        let target = self.values[next];
        if self.fence.completed_value()? < target {
            trace!(slot = next, target, "Waiting for back buffer");
            self.fence.set_event_on_completion(target, &mut self.event)?;
            self.event.wait()?;
        }

        self.values[next] = current_value + 1;
        Ok(())
    }

    /// Give every slot the active slot's value. Used after a full drain, when
    /// no slot has outstanding work.
    pub fn reset_all_to(&mut self, slot: usize) {
        let value = self.values[slot];
        self.values.fill(value);
    }

    /// Track `count` slots. Only valid after [`reset_all_to`](Self::reset_all_to),
    /// so new slots start at the shared value.
    pub fn set_slot_count(&mut self, count: usize) {
        let value = self.values.iter().copied().max().unwrap_or(1);
        self.values.resize(count, value);
    }

    /// The value the GPU has reached.
    pub fn completed_value(&self) -> Result<u64> {
        self.fence.completed_value()
    }

    /// Per-slot fence values.
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn fence(&self) -> &B::Fence {
        &self.fence
    }

    pub(crate) fn into_parts(self) -> (B::Fence, B::FenceEvent) {
        (self.fence, self.event)
    }
}
