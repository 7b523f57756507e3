//! Color space negotiation through the pipeline.

use cadence_core::{BufferFormat, ColorSpace, Rect, RendererConfig, RendererOptions};
use cadence_gpu::OutputDesc;
use cadence_test::{
    create_pipeline, create_pipeline_with_window, render_frames, test_config, MockBackend,
    MockWindow,
};

fn output(left: i32, right: i32, native_color_space: ColorSpace) -> OutputDesc {
    OutputDesc {
        desktop_rect: Rect::new(left, 0, right, 1080),
        native_color_space,
    }
}

fn hdr_backend(outputs: Vec<OutputDesc>) -> MockBackend {
    let backend = MockBackend::new();
    {
        let mut state = backend.state_mut();
        state.outputs = outputs;
        state.supported_color_spaces =
            vec![ColorSpace::Srgb, ColorSpace::Hdr10, ColorSpace::ScRgbLinear];
    }
    backend
}

fn hdr_config(format: BufferFormat) -> RendererConfig {
    test_config()
        .with_back_buffer_format(format)
        .with_options(RendererOptions::ENABLE_HDR)
}

#[test]
fn hdr10_display_with_ten_bit_buffers_selects_pq() {
    let backend = hdr_backend(vec![output(0, 1920, ColorSpace::Hdr10)]);
    let pipeline =
        create_pipeline(&backend, hdr_config(BufferFormat::R10G10B10A2Unorm), 800, 600).unwrap();

    assert!(pipeline.is_display_hdr10());
    assert_eq!(pipeline.color_space(), ColorSpace::Hdr10);
    assert_eq!(
        backend.state().applied_color_spaces.last(),
        Some(&ColorSpace::Hdr10)
    );
}

#[test]
fn half_float_buffers_select_linear_scrgb() {
    let backend = hdr_backend(vec![output(0, 1920, ColorSpace::Hdr10)]);
    let pipeline =
        create_pipeline(&backend, hdr_config(BufferFormat::R16G16B16A16Float), 800, 600).unwrap();

    assert_eq!(pipeline.color_space(), ColorSpace::ScRgbLinear);
}

#[test]
fn hdr_disabled_stays_standard() {
    let backend = hdr_backend(vec![output(0, 1920, ColorSpace::Hdr10)]);
    let pipeline = create_pipeline(
        &backend,
        test_config().with_back_buffer_format(BufferFormat::R10G10B10A2Unorm),
        800,
        600,
    )
    .unwrap();

    assert!(pipeline.is_display_hdr10());
    assert_eq!(pipeline.color_space(), ColorSpace::Srgb);
}

#[test]
fn unsupported_space_keeps_the_previous_one() {
    let backend = MockBackend::new();
    backend.state_mut().outputs = vec![output(0, 1920, ColorSpace::Hdr10)];

    let mut pipeline =
        create_pipeline(&backend, hdr_config(BufferFormat::R10G10B10A2Unorm), 800, 600).unwrap();

    assert!(pipeline.is_display_hdr10());
    assert_eq!(pipeline.color_space(), ColorSpace::Srgb);
    assert!(backend.state().applied_color_spaces.is_empty());
    render_frames(&mut pipeline, 2).unwrap();
}

#[test]
fn display_with_largest_overlap_decides() {
    let outputs = vec![
        output(0, 1920, ColorSpace::Srgb),
        output(1920, 3840, ColorSpace::Hdr10),
    ];

    // Mostly on the right-hand HDR display.
    let backend = hdr_backend(outputs.clone());
    let pipeline = create_pipeline_with_window(
        &backend,
        hdr_config(BufferFormat::R10G10B10A2Unorm),
        MockWindow::new(Rect::new(1800, 100, 2600, 700)),
        800,
        600,
    )
    .unwrap();
    assert_eq!(pipeline.color_space(), ColorSpace::Hdr10);

    // Mostly on the left-hand SDR display.
    let backend = hdr_backend(outputs);
    let pipeline = create_pipeline_with_window(
        &backend,
        hdr_config(BufferFormat::R10G10B10A2Unorm),
        MockWindow::new(Rect::new(1200, 100, 2000, 700)),
        800,
        600,
    )
    .unwrap();
    assert!(!pipeline.is_display_hdr10());
    assert_eq!(pipeline.color_space(), ColorSpace::Srgb);
}

#[test]
fn window_off_every_display_is_standard() {
    let backend = hdr_backend(vec![output(0, 1920, ColorSpace::Hdr10)]);
    let pipeline = create_pipeline_with_window(
        &backend,
        hdr_config(BufferFormat::R10G10B10A2Unorm),
        MockWindow::new(Rect::new(5000, 0, 5800, 600)),
        800,
        600,
    )
    .unwrap();

    assert!(!pipeline.is_display_hdr10());
    assert_eq!(pipeline.color_space(), ColorSpace::Srgb);
}

#[test]
fn unplaced_window_is_standard() {
    let backend = hdr_backend(vec![output(0, 1920, ColorSpace::Hdr10)]);
    let pipeline = create_pipeline_with_window(
        &backend,
        hdr_config(BufferFormat::R10G10B10A2Unorm),
        MockWindow::unplaced(),
        800,
        600,
    )
    .unwrap();

    assert!(!pipeline.is_display_hdr10());
    assert_eq!(pipeline.color_space(), ColorSpace::Srgb);
}

#[test]
fn display_change_is_picked_up_after_present() {
    let backend = hdr_backend(vec![output(0, 1920, ColorSpace::Srgb)]);
    let mut pipeline =
        create_pipeline(&backend, hdr_config(BufferFormat::R10G10B10A2Unorm), 800, 600).unwrap();
    assert_eq!(pipeline.color_space(), ColorSpace::Srgb);

    {
        let mut state = backend.state_mut();
        state.outputs = vec![output(0, 1920, ColorSpace::Hdr10)];
        state.factory_current = false;
    }
    render_frames(&mut pipeline, 1).unwrap();

    assert_eq!(backend.state().factory_refreshes, 1);
    assert!(pipeline.is_display_hdr10());
    assert_eq!(pipeline.color_space(), ColorSpace::Hdr10);
    assert_eq!(backend.state().resizes, 0);
}

#[test]
fn same_size_notification_renegotiates_without_rebuilding() {
    let backend = hdr_backend(vec![output(0, 1920, ColorSpace::Srgb)]);
    let mut pipeline =
        create_pipeline(&backend, hdr_config(BufferFormat::R10G10B10A2Unorm), 800, 600).unwrap();

    backend.state_mut().outputs = vec![output(0, 1920, ColorSpace::Hdr10)];
    assert!(!pipeline.on_window_size_changed(800, 600).unwrap());

    assert_eq!(pipeline.color_space(), ColorSpace::Hdr10);
    assert_eq!(backend.state().resizes, 0);
}

#[test]
fn color_space_survives_device_recovery() {
    use cadence_core::DeviceLossReason;

    let backend = hdr_backend(vec![output(0, 1920, ColorSpace::Hdr10)]);
    let mut pipeline =
        create_pipeline(&backend, hdr_config(BufferFormat::R10G10B10A2Unorm), 800, 600).unwrap();

    backend.inject_present_loss(DeviceLossReason::Removed);
    render_frames(&mut pipeline, 1).unwrap();

    assert_eq!(pipeline.recoveries(), 1);
    assert_eq!(pipeline.color_space(), ColorSpace::Hdr10);
    assert_eq!(
        backend.state().applied_color_spaces,
        vec![ColorSpace::Hdr10, ColorSpace::Hdr10]
    );
}

#[test]
fn device_lost_during_same_size_renegotiation_is_recovered() {
    use cadence_core::DeviceLossReason;
    use cadence_gpu::DeviceState;

    let backend = hdr_backend(vec![output(0, 1920, ColorSpace::Hdr10)]);
    let mut pipeline =
        create_pipeline(&backend, hdr_config(BufferFormat::R10G10B10A2Unorm), 800, 600).unwrap();

    backend.inject_color_space_loss(DeviceLossReason::Removed);
    assert!(!pipeline.on_window_size_changed(800, 600).unwrap());

    assert_eq!(pipeline.device_state(), DeviceState::Healthy);
    assert_eq!(pipeline.recoveries(), 1);
    assert_eq!(backend.state().devices_created.len(), 2);
    assert_eq!(pipeline.color_space(), ColorSpace::Hdr10);
    render_frames(&mut pipeline, 2).unwrap();
}

#[test]
fn device_lost_while_refreshing_after_present_is_recovered() {
    use cadence_core::DeviceLossReason;
    use cadence_gpu::DeviceState;

    let backend = hdr_backend(vec![output(0, 1920, ColorSpace::Srgb)]);
    let mut pipeline =
        create_pipeline(&backend, hdr_config(BufferFormat::R10G10B10A2Unorm), 800, 600).unwrap();

    backend.state_mut().factory_current = false;
    backend.inject_color_space_loss(DeviceLossReason::Reset);
    render_frames(&mut pipeline, 1).unwrap();

    assert_eq!(pipeline.device_state(), DeviceState::Healthy);
    assert_eq!(pipeline.recoveries(), 1);
    assert_eq!(backend.state().devices_created.len(), 2);

    render_frames(&mut pipeline, 3).unwrap();
    cadence_test::audit(&backend).unwrap();
}
