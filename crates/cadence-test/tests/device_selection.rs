//! Adapter selection, capability checks and option downgrades.

use cadence_core::{FeatureLevel, RendererOptions, ShaderModel};
use cadence_gpu::{FramePipeline, GpuError, PresentMode};
use cadence_test::{create_pipeline, render_frames, test_config, AdapterSpec, MockBackend};

fn level(major: u32, minor: u32) -> FeatureLevel {
    FeatureLevel::new(major, minor)
}

#[test]
fn first_qualifying_hardware_adapter_wins() {
    let backend = MockBackend::new();
    {
        let mut state = backend.state_mut();
        state.adapters = vec![
            AdapterSpec::software("Basic Render Driver", level(1, 3)),
            AdapterSpec::hardware("Old GPU", level(1, 1)),
            AdapterSpec::hardware("Good GPU", level(1, 3)),
            AdapterSpec::hardware("Better GPU", level(1, 3)),
        ];
        state.software_adapter = None;
    }

    let pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();

    let context = pipeline.device_context().unwrap();
    assert_eq!(context.adapter_info().name, "Good GPU");
    assert!(!context.adapter_info().software);
    // Software adapters are skipped without probing; the search stops at
    // the first success.
    assert_eq!(backend.state().trial_devices, vec!["Old GPU", "Good GPU"]);
    assert_eq!(backend.state().devices_created, vec!["Good GPU"]);
}

#[test]
fn software_adapter_is_the_fallback_when_allowed() {
    let backend = MockBackend::new();
    {
        let mut state = backend.state_mut();
        state.adapters = vec![AdapterSpec::hardware("Old GPU", level(1, 1))];
        state.software_adapter = Some(AdapterSpec::software("WARP", level(1, 3)));
    }

    let pipeline =
        create_pipeline(&backend, test_config().with_software_adapter(true), 800, 600).unwrap();

    let info = pipeline.device_context().unwrap().adapter_info().clone();
    assert_eq!(info.name, "WARP");
    assert!(info.software);
}

#[test]
fn no_qualifying_adapter_is_fatal() {
    let backend = MockBackend::new();
    backend.state_mut().adapters = vec![AdapterSpec::hardware("Old GPU", level(1, 1))];

    let mut pipeline = FramePipeline::new(backend.clone(), test_config()).unwrap();
    let err = pipeline.create_device_resources().unwrap_err();

    assert_eq!(err, GpuError::NoSuitableAdapter);
    assert!(err.is_fatal());
    assert!(backend.state().live.is_empty());
}

#[test]
fn minimum_feature_level_is_configurable() {
    let backend = MockBackend::new();
    backend.state_mut().adapters = vec![AdapterSpec::hardware("Old GPU", level(1, 1))];

    let pipeline = create_pipeline(
        &backend,
        test_config().with_min_feature_level(level(1, 1)),
        800,
        600,
    )
    .unwrap();

    assert_eq!(pipeline.feature_level(), Some(level(1, 1)));
}

#[test]
fn insufficient_shader_model_is_fatal() {
    let backend = MockBackend::new();
    backend.state_mut().shader_model = ShaderModel::new(5, 1);

    let mut pipeline = FramePipeline::new(backend.clone(), test_config()).unwrap();
    let err = pipeline.create_device_resources().unwrap_err();

    assert_eq!(
        err,
        GpuError::ShaderModelUnsupported {
            required: ShaderModel::new(6, 0),
            found: ShaderModel::new(5, 1),
        }
    );
    assert!(err.is_fatal());
}

#[test]
fn capabilities_are_reported() {
    let backend = MockBackend::new();
    let pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();

    assert_eq!(pipeline.feature_level(), Some(level(1, 3)));
    assert_eq!(pipeline.shader_model(), Some(ShaderModel::new(6, 6)));
    assert_eq!(pipeline.back_buffer_count(), 2);
}

#[test]
fn wait_handle_failure_is_fatal() {
    let backend = MockBackend::new();
    backend.state_mut().faults.fence_event_failure = true;

    let mut pipeline = FramePipeline::new(backend.clone(), test_config()).unwrap();
    let err = pipeline.create_device_resources().unwrap_err();

    assert!(matches!(err, GpuError::WaitHandleCreation(_)));
    assert!(err.is_fatal());
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let backend = MockBackend::new();
    let result = FramePipeline::new(backend.clone(), test_config().with_back_buffer_count(4));

    assert!(matches!(result, Err(GpuError::Config(_))));
    assert_eq!(backend.state().factories_created, 0);
}

#[test]
fn device_resources_are_created_once() {
    let backend = MockBackend::new();
    let mut pipeline = create_pipeline(&backend, test_config(), 800, 600).unwrap();

    assert!(matches!(
        pipeline.create_device_resources(),
        Err(GpuError::InvalidState(_))
    ));
    assert_eq!(backend.state().devices_created.len(), 1);
}

#[test]
fn tearing_is_dropped_when_unsupported() {
    let backend = MockBackend::new();
    backend.state_mut().tearing_supported = false;

    let mut pipeline = create_pipeline(
        &backend,
        test_config().with_options(RendererOptions::ALLOW_TEARING),
        800,
        600,
    )
    .unwrap();
    render_frames(&mut pipeline, 1).unwrap();

    assert!(!pipeline.options().contains(RendererOptions::ALLOW_TEARING));
    let state = backend.state();
    assert!(!state.swap_chain_descs[0].allow_tearing);
    assert_eq!(state.presents[0].mode, PresentMode::VSync);
}

#[test]
fn tearing_is_used_when_supported() {
    let backend = MockBackend::new();

    let mut pipeline = create_pipeline(
        &backend,
        test_config().with_options(RendererOptions::ALLOW_TEARING),
        800,
        600,
    )
    .unwrap();
    render_frames(&mut pipeline, 1).unwrap();

    assert!(pipeline.options().contains(RendererOptions::ALLOW_TEARING));
    let state = backend.state();
    assert!(state.swap_chain_descs[0].allow_tearing);
    assert_eq!(state.presents[0].mode, PresentMode::Tearing);
}

#[test]
fn tearing_is_dropped_when_the_surface_cannot_tear() {
    let backend = MockBackend::new();
    backend.state_mut().surface_tearing = false;

    let mut pipeline = create_pipeline(
        &backend,
        test_config().with_options(RendererOptions::ALLOW_TEARING),
        800,
        600,
    )
    .unwrap();
    render_frames(&mut pipeline, 1).unwrap();

    assert!(!pipeline.options().contains(RendererOptions::ALLOW_TEARING));
    assert_eq!(backend.state().presents[0].mode, PresentMode::VSync);

    // Later rebuilds stop asking for it.
    assert!(pipeline.on_window_size_changed(1024, 768).unwrap());
    let state = backend.state();
    assert!(!state.swap_chain_descs.last().unwrap().allow_tearing);
}

#[test]
fn feature_level_query_failure_is_reported() {
    let backend = MockBackend::new();
    backend.state_mut().faults.feature_level_query_failure = true;

    let mut pipeline = FramePipeline::new(backend.clone(), test_config()).unwrap();
    let err = pipeline.create_device_resources().unwrap_err();

    assert_eq!(err, GpuError::Other("feature level query failed".to_string()));
    assert_eq!(pipeline.feature_level(), None);
    assert!(backend.state().live.is_empty());
}
