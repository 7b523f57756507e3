//! Device-loss recovery state machine.
//!
//! ```text
//! Healthy --DeviceLost--> Lost --TornDown--> Recreating --Restored--> Healthy
//!                                                 |
//!                                                 +--RestoreFailed--> Failed
//! ```
//!
//! A loss reported while already recreating is a second failure and ends in
//! `Failed`; recovery is never retried.

use cadence_core::{DeviceLossReason, LifecycleEvent};
use tracing::{debug, error};

use crate::backend::Backend;
use crate::context::DeviceParts;
use crate::error::{GpuError, Result};
use crate::swapchain::{BackBufferSlot, DepthBuffer};

/// Health of the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeviceState {
    #[default]
    Healthy,
    /// A removed or reset result was observed; teardown is pending.
    Lost(DeviceLossReason),
    /// Every GPU object was released and is being created again.
    Recreating,
    /// Recreation failed. The device is unusable for the rest of the process.
    Failed,
}

/// Inputs to [`DeviceState::transition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryEvent {
    DeviceLost(DeviceLossReason),
    TornDown,
    Restored,
    RestoreFailed,
}

impl DeviceState {
    /// The state after `event`, or an error when `event` can't happen in
    /// this state.
    pub fn transition(self, event: RecoveryEvent) -> Result<Self> {
        match (self, event) {
            (Self::Healthy, RecoveryEvent::DeviceLost(reason)) => Ok(Self::Lost(reason)),
            (Self::Lost(_), RecoveryEvent::TornDown) => Ok(Self::Recreating),
            (Self::Recreating, RecoveryEvent::Restored) => Ok(Self::Healthy),
            (Self::Recreating, RecoveryEvent::RestoreFailed | RecoveryEvent::DeviceLost(_)) => {
                Ok(Self::Failed)
            }
            (state, event) => Err(GpuError::InvalidState(format!(
                "{event:?} is not valid while the device is {state:?}"
            ))),
        }
    }

    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Receives device and window lifecycle notifications.
///
/// Implemented by owners of GPU content (textures, pipelines) the frame
/// pipeline doesn't own.
pub trait DeviceNotify {
    /// The device was lost. Release GPU content now; the device objects are
    /// about to be destroyed.
    fn on_device_lost(&mut self) {}

    /// Device objects were recreated. Rebuild GPU content.
    fn on_device_restored(&mut self) {}

    #[allow(unused_variables)]
    fn on_lifecycle(&mut self, event: LifecycleEvent) {}
}

/// Current [`DeviceState`] plus the registered listeners.
#[derive(Default)]
pub struct RecoveryController {
    state: DeviceState,
    listeners: Vec<Box<dyn DeviceNotify>>,
    recoveries: u32,
}

impl RecoveryController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `event` to the state machine.
    pub fn apply(&mut self, event: RecoveryEvent) -> Result<DeviceState> {
        let next = self.state.transition(event)?;
        debug!("Device state {:?} -> {:?}", self.state, next);
        if self.state == DeviceState::Recreating && next == DeviceState::Healthy {
            self.recoveries += 1;
        }
        if next == DeviceState::Failed {
            error!("Device recovery failed, GPU is unavailable");
        }
        self.state = next;
        Ok(next)
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Completed recoveries since creation.
    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    pub fn register(&mut self, listener: Box<dyn DeviceNotify>) {
        self.listeners.push(listener);
    }

    pub fn notify_lost(&mut self) {
        for listener in &mut self.listeners {
            listener.on_device_lost();
        }
    }

    pub fn notify_restored(&mut self) {
        for listener in &mut self.listeners {
            listener.on_device_restored();
        }
    }

    pub fn forward_lifecycle(&mut self, event: LifecycleEvent) {
        for listener in &mut self.listeners {
            listener.on_lifecycle(event);
        }
    }
}

/// Every GPU object of the pipeline, released in a fixed order: later
/// objects may reference earlier ones.
pub(crate) struct Teardown<B: Backend> {
    pub device: Option<DeviceParts<B>>,
    pub slots: Vec<BackBufferSlot<B>>,
    pub depth: Option<DepthBuffer<B>>,
    pub swap_chain: Option<B::SwapChain>,
}

impl<B: Backend> Teardown<B> {
    /// Release everything. The GPU must be idle or lost.
    pub fn run(self) {
        let Self {
            device,
            slots,
            depth,
            swap_chain,
        } = self;

        let Some(parts) = device else {
            drop(slots);
            drop(depth);
            drop(swap_chain);
            return;
        };

        let DeviceParts {
            allocators,
            fence,
            fence_event,
            command_list,
            queue,
            device,
            factory,
        } = parts;

        // Per-slot allocators and back buffers first.
        let mut allocators = allocators.into_iter();
        let mut slots = slots.into_iter();
        loop {
            let allocator = allocators.next();
            let slot = slots.next();
            if allocator.is_none() && slot.is_none() {
                break;
            }
            drop(allocator);
            drop(slot);
        }

        drop(depth);
        drop(fence);
        drop(fence_event);
        drop(command_list);
        drop(swap_chain);
        drop(queue);
        drop(device);
        drop(factory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_recovery_cycle() {
        let state = DeviceState::Healthy
            .transition(RecoveryEvent::DeviceLost(DeviceLossReason::Removed))
            .unwrap();
        assert_eq!(state, DeviceState::Lost(DeviceLossReason::Removed));

        let state = state.transition(RecoveryEvent::TornDown).unwrap();
        assert_eq!(state, DeviceState::Recreating);

        let state = state.transition(RecoveryEvent::Restored).unwrap();
        assert_eq!(state, DeviceState::Healthy);
    }

    #[test]
    fn failure_while_recreating_is_final() {
        assert_eq!(
            DeviceState::Recreating.transition(RecoveryEvent::RestoreFailed),
            Ok(DeviceState::Failed)
        );
        assert_eq!(
            DeviceState::Recreating
                .transition(RecoveryEvent::DeviceLost(DeviceLossReason::Reset)),
            Ok(DeviceState::Failed)
        );
        assert!(DeviceState::Failed
            .transition(RecoveryEvent::DeviceLost(DeviceLossReason::Reset))
            .is_err());
        assert!(DeviceState::Failed.transition(RecoveryEvent::Restored).is_err());
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        assert!(DeviceState::Healthy.transition(RecoveryEvent::TornDown).is_err());
        assert!(DeviceState::Healthy.transition(RecoveryEvent::Restored).is_err());
        assert!(DeviceState::Lost(DeviceLossReason::Reset)
            .transition(RecoveryEvent::Restored)
            .is_err());
        assert!(DeviceState::Lost(DeviceLossReason::Reset)
            .transition(RecoveryEvent::DeviceLost(DeviceLossReason::Removed))
            .is_err());
    }

    #[derive(Default)]
    struct Counter {
        lost: std::rc::Rc<std::cell::Cell<u32>>,
        restored: std::rc::Rc<std::cell::Cell<u32>>,
    }

    impl DeviceNotify for Counter {
        fn on_device_lost(&mut self) {
            self.lost.set(self.lost.get() + 1);
        }

        fn on_device_restored(&mut self) {
            self.restored.set(self.restored.get() + 1);
        }
    }

    #[test]
    fn controller_counts_recoveries_and_notifies() {
        let counter = Counter::default();
        let lost = counter.lost.clone();
        let restored = counter.restored.clone();

        let mut controller = RecoveryController::new();
        controller.register(Box::new(counter));

        controller
            .apply(RecoveryEvent::DeviceLost(DeviceLossReason::Removed))
            .unwrap();
        controller.notify_lost();
        controller.apply(RecoveryEvent::TornDown).unwrap();
        controller.apply(RecoveryEvent::Restored).unwrap();
        controller.notify_restored();

        assert_eq!(controller.state(), DeviceState::Healthy);
        assert_eq!(controller.recoveries(), 1);
        assert_eq!(lost.get(), 1);
        assert_eq!(restored.get(), 1);
    }
}
