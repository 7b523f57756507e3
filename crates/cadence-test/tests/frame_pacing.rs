//! Back-buffer rotation, fence pacing and command recording.

use cadence_core::Color;
use cadence_test::{
    audit, create_pipeline, render_frames, test_config, GpuTiming, HandleKind, MockBackend,
    WaitRecord,
};

#[test]
fn every_slot_has_a_live_render_target() {
    for count in [2, 3] {
        let backend = MockBackend::new();
        let pipeline =
            create_pipeline(&backend, test_config().with_back_buffer_count(count), 800, 600)
                .unwrap();

        assert!(pipeline.active_slot() < count as usize);
        assert_eq!(pipeline.back_buffers().len(), count as usize);
        for slot in pipeline.back_buffers() {
            assert!(backend.is_live(slot.texture.id()));
            assert!(backend.is_live(slot.render_target.id()));
        }
        assert_eq!(
            backend.state().live_count(HandleKind::RenderTargetView),
            count as usize
        );
    }
}

#[test]
fn active_slot_stays_in_range_when_chain_starts_elsewhere() {
    let backend = MockBackend::new();
    let mut pipeline =
        create_pipeline(&backend, test_config().with_back_buffer_count(3), 800, 600).unwrap();

    backend.state_mut().next_index_after_resize = Some(2);
    assert!(pipeline.on_window_size_changed(1024, 768).unwrap());
    assert_eq!(pipeline.active_slot(), 2);

    let slots = render_frames(&mut pipeline, 4).unwrap();
    assert_eq!(slots, vec![2, 0, 1, 2]);
    audit(&backend).unwrap();
}

#[test]
fn slots_rotate_through_the_chain() {
    for count in [2_u32, 3] {
        let backend = MockBackend::new();
        let mut pipeline =
            create_pipeline(&backend, test_config().with_back_buffer_count(count), 800, 600)
                .unwrap();

        let slots = render_frames(&mut pipeline, 6).unwrap();
        let expected: Vec<usize> = (0..6).map(|frame| frame % count as usize).collect();
        assert_eq!(slots, expected);

        let presented: Vec<usize> = backend.state().presents.iter().map(|p| p.buffer).collect();
        assert_eq!(presented, expected);
    }
}

#[test]
fn fence_values_increase_per_slot() {
    for timing in [GpuTiming::Immediate, GpuTiming::Manual] {
        for count in [2_u32, 3] {
            let backend = MockBackend::with_timing(timing);
            let mut pipeline =
                create_pipeline(&backend, test_config().with_back_buffer_count(count), 800, 600)
                    .unwrap();

            let mut history = Vec::new();
            for _ in 0..8 {
                render_frames(&mut pipeline, 1).unwrap();
                history.push(pipeline.fence_values());
            }

            let count = count as usize;
            for frame in count..history.len() {
                for slot in 0..count {
                    assert!(
                        history[frame][slot] > history[frame - count][slot],
                        "{timing:?}, {count} buffers: slot {slot} went from {} to {} \
                         between frames {} and {frame}",
                        history[frame - count][slot],
                        history[frame][slot],
                        frame - count,
                    );
                }
            }
        }
    }
}

#[test]
fn allocators_are_never_reset_while_in_flight() {
    for count in [2_u32, 3] {
        let backend = MockBackend::with_timing(GpuTiming::Manual);
        let mut pipeline =
            create_pipeline(&backend, test_config().with_back_buffer_count(count), 800, 600)
                .unwrap();

        render_frames(&mut pipeline, 10).unwrap();
        audit(&backend).unwrap();

        // The GPU lags as far as the chain allows.
        let completed = pipeline
            .device_context()
            .and_then(|context| backend.state().fence_completed(context.fence().fence().id()))
            .unwrap();
        let highest = *backend.state().signals.last().unwrap();
        assert_eq!(highest - completed, u64::from(count) - 1);
    }
}

#[test]
fn a_slow_gpu_blocks_for_at_most_one_frame() {
    let backend = MockBackend::with_timing(GpuTiming::Manual);
    let mut pipeline =
        create_pipeline(&backend, test_config().with_back_buffer_count(2), 800, 600).unwrap();
    assert_eq!(pipeline.output_rect().width(), 800);
    assert_eq!(pipeline.output_rect().height(), 600);
    backend.state_mut().waits.clear();

    let slots = render_frames(&mut pipeline, 5).unwrap();

    assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    assert_eq!(pipeline.active_slot(), 1);

    let state = backend.state();
    assert!(state.waits.iter().all(|wait| wait.retired <= 1));
    assert_eq!(
        state.waits,
        vec![
            WaitRecord {
                target: 2,
                retired: 1
            },
            WaitRecord {
                target: 3,
                retired: 1
            },
            WaitRecord {
                target: 4,
                retired: 1
            },
            WaitRecord {
                target: 5,
                retired: 1
            },
        ]
    );
    drop(state);

    assert_eq!(pipeline.fence_values(), vec![6, 7]);
    audit(&backend).unwrap();
}

#[test]
fn an_idle_gpu_never_blocks_a_frame() {
    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();
    backend.state_mut().waits.clear();

    render_frames(&mut pipeline, 5).unwrap();

    assert!(backend.state().waits.is_empty());
}

#[test]
fn wait_for_gpu_drains_everything() {
    let backend = MockBackend::with_timing(GpuTiming::Manual);
    let mut pipeline =
        create_pipeline(&backend, test_config().with_back_buffer_count(3), 800, 600).unwrap();
    render_frames(&mut pipeline, 3).unwrap();

    pipeline.wait_for_gpu().unwrap();

    let state = backend.state();
    let fence = pipeline.device_context().unwrap().fence().fence().id();
    assert_eq!(state.fence_completed(fence), state.signals.last().copied());
}

#[test]
fn frame_command_trace() {
    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(
        &backend,
        test_config().with_clear_color(Color::BLACK),
        800,
        600,
    )
    .unwrap();
    backend.take_trace();

    render_frames(&mut pipeline, 1).unwrap();

    insta::assert_snapshot!(backend.take_trace().join("\n"), @r"
    reset slot=0
    transition back_buffer[0] Present -> RenderTarget
    bind back_buffer[0] + depth
    clear back_buffer[0] to (0, 0, 0, 1)
    clear depth to 1
    viewport 800x600 depth 0..1
    scissor 800x600
    transition back_buffer[0] RenderTarget -> Present
    close
    execute slot=0
    present VSync
    signal 2
    ");
}

#[test]
fn manual_prepare_and_present_honor_the_given_states() {
    use cadence_core::ResourceState;

    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();
    backend.take_trace();

    // A frame rendered without any barrier on the way in.
    pipeline
        .prepare(ResourceState::Present, ResourceState::Present)
        .unwrap();
    pipeline.present(ResourceState::Present).unwrap();

    insta::assert_debug_snapshot!(backend.take_trace(), @r#"
    [
        "reset slot=0",
        "close",
        "execute slot=0",
        "present VSync",
        "signal 2",
    ]
    "#);
    audit(&backend).unwrap();
}

#[test]
fn draw_closure_records_into_the_active_slot() {
    use cadence_core::{ResourceState, Viewport};
    use cadence_gpu::{CommandList as _, GpuError};

    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(&backend, test_config(), 640, 480).unwrap();

    render_frames(&mut pipeline, 1).unwrap();
    backend.take_trace();

    pipeline
        .render(|frame| {
            assert_eq!(frame.slot, 1);
            assert_eq!(frame.viewport, Viewport::from_extent(640, 480));
            assert!(frame.depth_stencil.is_some());
            frame.command_list.set_viewport(&Viewport::from_extent(320, 240));
            Ok::<(), GpuError>(())
        })
        .unwrap();

    let trace = backend.take_trace();
    assert_eq!(trace[0], "reset slot=1");
    assert!(trace.contains(&"viewport 320x240 depth 0..1".to_string()));
    assert_eq!(
        backend
            .state()
            .image_state(pipeline.back_buffers()[1].texture.image()),
        Some(ResourceState::Present)
    );
}

#[test]
fn surface_minimum_above_the_configured_count_gets_a_slot_per_image() {
    let backend = MockBackend::with_timing(GpuTiming::Manual);
    backend.state_mut().min_image_count = 3;
    let mut pipeline =
        create_pipeline(&backend, test_config().with_back_buffer_count(2), 800, 600).unwrap();

    assert_eq!(pipeline.back_buffer_count(), 3);
    assert_eq!(pipeline.back_buffers().len(), 3);
    assert_eq!(pipeline.fence_values().len(), 3);
    assert_eq!(
        backend.state().live_count(HandleKind::CommandAllocator),
        3
    );

    let slots = render_frames(&mut pipeline, 6).unwrap();
    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);
    audit(&backend).unwrap();

    // The GPU may now lag by two frames.
    let completed = pipeline
        .device_context()
        .and_then(|context| backend.state().fence_completed(context.fence().fence().id()))
        .unwrap();
    let highest = *backend.state().signals.last().unwrap();
    assert_eq!(highest - completed, 2);
}
