//! Device loss, recovery and teardown.

use std::cell::RefCell;
use std::rc::Rc;

use cadence_core::{DeviceLossReason, LifecycleEvent, ResourceState};
use cadence_gpu::{DeviceNotify, DeviceState, GpuError};
use cadence_test::{
    audit, create_pipeline, render_frames, test_config, HandleId, MockBackend, MockPipeline,
};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Notification {
    Lost,
    Restored,
    Lifecycle(LifecycleEvent),
}

#[derive(Clone, Default)]
struct Recorder(Rc<RefCell<Vec<Notification>>>);

impl Recorder {
    fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

impl DeviceNotify for Recorder {
    fn on_device_lost(&mut self) {
        self.0.borrow_mut().push(Notification::Lost);
    }

    fn on_device_restored(&mut self) {
        self.0.borrow_mut().push(Notification::Restored);
    }

    fn on_lifecycle(&mut self, event: LifecycleEvent) {
        self.0.borrow_mut().push(Notification::Lifecycle(event));
    }
}

fn with_recorder(pipeline: &mut MockPipeline) -> Recorder {
    let recorder = Recorder::default();
    pipeline.register_device_notify(Box::new(recorder.clone()));
    recorder
}

/// Every GPU object the pipeline currently holds.
fn held_handles(pipeline: &MockPipeline) -> Vec<HandleId> {
    let mut ids: Vec<HandleId> = pipeline
        .back_buffers()
        .iter()
        .flat_map(|slot| [slot.texture.id(), slot.render_target.id()])
        .collect();
    if let Some(depth) = pipeline.depth_buffer() {
        ids.extend([depth.texture.id(), depth.view.id()]);
    }
    if let Some(context) = pipeline.device_context() {
        ids.extend([
            context.factory().id(),
            context.device().id(),
            context.queue().id(),
            context.fence().fence().id(),
            context.recorder().list().id(),
        ]);
    }
    ids
}

#[test]
fn loss_at_present_recreates_every_handle() {
    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();
    let recorder = with_recorder(&mut pipeline);
    render_frames(&mut pipeline, 1).unwrap();

    let old = held_handles(&pipeline);
    assert!(old.iter().all(|id| backend.is_live(*id)));

    backend.inject_present_loss(DeviceLossReason::Removed);
    render_frames(&mut pipeline, 1).unwrap();

    assert_eq!(pipeline.device_state(), DeviceState::Healthy);
    assert_eq!(pipeline.recoveries(), 1);
    assert_eq!(
        recorder.take(),
        vec![Notification::Lost, Notification::Restored]
    );

    assert!(old.iter().all(|id| !backend.is_live(*id)));
    let new = held_handles(&pipeline);
    assert_eq!(new.len(), old.len());
    assert!(new.iter().all(|id| backend.is_live(*id) && !old.contains(id)));
    assert_eq!(backend.state().devices_created.len(), 2);

    // A full cycle on the new objects.
    backend.take_trace();
    pipeline
        .prepare(ResourceState::Present, ResourceState::RenderTarget)
        .unwrap();
    pipeline.clear().unwrap();
    pipeline.present(ResourceState::RenderTarget).unwrap();
    assert!(backend.take_trace().contains(&"present VSync".to_string()));
    assert_eq!(held_handles(&pipeline), new);
    audit(&backend).unwrap();
}

#[test]
fn loss_at_resize_recovers_at_the_new_size() {
    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();
    let recorder = with_recorder(&mut pipeline);

    backend.inject_resize_loss(DeviceLossReason::Reset);
    assert!(pipeline.on_window_size_changed(1024, 768).unwrap());

    assert_eq!(pipeline.recoveries(), 1);
    assert_eq!(
        recorder.take(),
        vec![Notification::Lost, Notification::Restored]
    );
    let desc = *backend.state().swap_chain_descs.last().unwrap();
    assert_eq!((desc.width, desc.height), (1024, 768));
    assert_eq!(backend.state().resizes, 0);

    render_frames(&mut pipeline, 3).unwrap();
    audit(&backend).unwrap();
}

#[test]
fn failed_recreation_is_final() {
    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();
    let recorder = with_recorder(&mut pipeline);

    backend.inject_present_loss(DeviceLossReason::Reset);
    backend.fail_device_creations(1);
    let err = pipeline
        .render(|_| Ok::<(), GpuError>(()))
        .unwrap_err();

    assert!(matches!(err, GpuError::RecoveryFailed(_)));
    assert!(err.is_fatal());
    assert_eq!(pipeline.device_state(), DeviceState::Failed);
    assert_eq!(recorder.take(), vec![Notification::Lost]);
    assert!(backend.state().live.is_empty());

    assert_eq!(
        pipeline.render(|_| Ok::<(), GpuError>(())),
        Err(GpuError::DeviceUnavailable)
    );
    assert_eq!(
        pipeline.prepare(ResourceState::Present, ResourceState::RenderTarget),
        Err(GpuError::DeviceUnavailable)
    );
    assert_eq!(
        pipeline.create_device_resources(),
        Err(GpuError::DeviceUnavailable)
    );
    assert_eq!(pipeline.recoveries(), 0);
}

#[test]
fn a_loss_reported_by_the_host_is_recovered() {
    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();

    pipeline.handle_device_lost(DeviceLossReason::Removed).unwrap();
    pipeline.handle_device_lost(DeviceLossReason::Reset).unwrap();

    assert_eq!(pipeline.recoveries(), 2);
    assert_eq!(backend.state().devices_created.len(), 3);
    render_frames(&mut pipeline, 2).unwrap();
}

#[test]
fn teardown_releases_in_dependency_order() {
    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();
    render_frames(&mut pipeline, 1).unwrap();
    backend.state_mut().releases.clear();

    drop(pipeline);

    let state = backend.state();
    assert!(state.live.is_empty());
    insta::assert_debug_snapshot!(state.release_kinds(), @r"
    [
        CommandAllocator,
        BackBuffer,
        RenderTargetView,
        CommandAllocator,
        BackBuffer,
        RenderTargetView,
        DepthBuffer,
        DepthStencilView,
        Fence,
        FenceEvent,
        CommandList,
        SwapChain,
        Queue,
        Device,
        Factory,
    ]
    ");
}

#[test]
fn recovery_tears_down_in_the_same_order_as_shutdown() {
    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();
    render_frames(&mut pipeline, 1).unwrap();
    backend.state_mut().releases.clear();

    backend.inject_present_loss(DeviceLossReason::Removed);
    render_frames(&mut pipeline, 1).unwrap();
    let on_loss = backend.state().release_kinds();

    backend.state_mut().releases.clear();
    drop(pipeline);
    let on_drop = backend.state().release_kinds();

    assert_eq!(on_loss, on_drop);
}

#[test]
fn shutdown_drains_the_gpu_first() {
    let backend = MockBackend::with_timing(cadence_test::GpuTiming::Manual);
    let mut pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();
    render_frames(&mut pipeline, 4).unwrap();
    let fence = pipeline.device_context().unwrap().fence().fence().id();

    drop(pipeline);

    let state = backend.state();
    assert_eq!(state.fence_completed(fence), state.signals.last().copied());
}

#[test]
fn lifecycle_events_are_forwarded_verbatim() {
    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();
    let recorder = with_recorder(&mut pipeline);

    pipeline.on_deactivated();
    pipeline.on_suspending();
    pipeline.on_resuming();
    pipeline.on_activated();

    assert_eq!(
        recorder.take(),
        vec![
            Notification::Lifecycle(LifecycleEvent::Deactivated),
            Notification::Lifecycle(LifecycleEvent::Suspending),
            Notification::Lifecycle(LifecycleEvent::Resuming),
            Notification::Lifecycle(LifecycleEvent::Activated),
        ]
    );
}
