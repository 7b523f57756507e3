//! Test support for the Cadence frame pipeline.
//!
//! Provides [`MockBackend`], a deterministic in-memory GPU with scriptable
//! timing and fault injection, and helpers to stand up a pipeline on it.

pub mod mock;

use std::sync::Arc;

use cadence_core::{Rect, RendererConfig};
use cadence_gpu::{FramePipeline, GpuError};
use thiserror::Error;

pub use mock::{
    AdapterSpec, AllocatorViolation, BarrierViolation, Faults, GpuTiming, HandleId, HandleKind,
    ImageId, MockBackend, MockState, MockWindow, PresentRecord, WaitRecord,
};

#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("Audit failed: {0}")]
    Audit(String),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Pipeline over the mock backend.
pub type MockPipeline = FramePipeline<MockBackend>;

/// Where test windows sit on the desktop unless a test moves them.
pub const DEFAULT_WINDOW_ORIGIN: (i32, i32) = (100, 100);

/// A window of `width` x `height` at [`DEFAULT_WINDOW_ORIGIN`].
pub fn window(width: u32, height: u32) -> MockWindow {
    let (x, y) = DEFAULT_WINDOW_ORIGIN;
    let width = i32::try_from(width).unwrap_or(i32::MAX);
    let height = i32::try_from(height).unwrap_or(i32::MAX);
    MockWindow::new(Rect::new(x, y, x + width, y + height))
}

/// Create a pipeline on `backend`, attach a `width` x `height` window and
/// create device and size-dependent resources.
pub fn create_pipeline(
    backend: &MockBackend,
    config: RendererConfig,
    width: u32,
    height: u32,
) -> Result<MockPipeline> {
    create_pipeline_with_window(backend, config, window(width, height), width, height)
}

pub fn create_pipeline_with_window(
    backend: &MockBackend,
    config: RendererConfig,
    window: MockWindow,
    width: u32,
    height: u32,
) -> Result<MockPipeline> {
    let mut pipeline = FramePipeline::new(backend.clone(), config)?;
    pipeline.set_window(Arc::new(window), width, height);
    pipeline.create_device_resources()?;
    pipeline.create_window_size_dependent_resources()?;
    Ok(pipeline)
}

/// Render `count` empty frames and return the slot each one used.
pub fn render_frames(pipeline: &mut MockPipeline, count: usize) -> Result<Vec<usize>> {
    let mut slots = Vec::with_capacity(count);
    for _ in 0..count {
        slots.push(pipeline.active_slot());
        pipeline.render(|_| Ok::<(), GpuError>(()))?;
    }
    Ok(slots)
}

/// Fail when the backend recorded an unsafe allocator reset or a barrier
/// from the wrong state.
pub fn audit(backend: &MockBackend) -> Result<()> {
    let state = backend.state();
    if !state.allocator_violations.is_empty() {
        return Err(TestError::Audit(format!(
            "allocators reset while in use: {:?}",
            state.allocator_violations
        )));
    }
    if !state.barrier_violations.is_empty() {
        return Err(TestError::Audit(format!(
            "barriers from the wrong state: {:?}",
            state.barrier_violations
        )));
    }
    Ok(())
}

/// Debug-build defaults without validation and software fallback, so tests
/// behave the same in every profile.
pub fn test_config() -> RendererConfig {
    RendererConfig::new()
        .with_debug_layer(false)
        .with_software_adapter(false)
}
