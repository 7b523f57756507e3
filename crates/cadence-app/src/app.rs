//! `CadenceApp` trait definition.

use cadence_gpu::{FrameContext, FramePipeline, VulkanBackend};
use winit::event::WindowEvent;

use crate::timer::StepTimer;

/// The pipeline driven by the runner.
pub type Pipeline = FramePipeline<VulkanBackend>;

/// The frame handed to [`CadenceApp::render`].
pub type Frame<'a> = FrameContext<'a, VulkanBackend>;

/// Trait for Cadence applications.
///
/// The framework owns the window and the frame pipeline. Each frame the
/// back buffer is transitioned, bound and cleared before `render` is called,
/// and presented afterwards.
pub trait CadenceApp: Sized {
    /// Initialize the application.
    ///
    /// Called once, after device and window-size dependent resources exist.
    fn init(pipeline: &mut Pipeline) -> anyhow::Result<Self>;

    /// Update application state. Called by the step timer, possibly several
    /// times per frame with a fixed time step, or not at all.
    fn update(&mut self, timer: &StepTimer);

    /// Record this frame's commands.
    fn render(&mut self, frame: &mut Frame<'_>) -> anyhow::Result<()>;

    /// The window size changed and size-dependent resources were rebuilt.
    #[allow(unused_variables)]
    fn on_resize(&mut self, pipeline: &mut Pipeline, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// The device was lost. Drop GPU content.
    fn on_device_lost(&mut self) {}

    /// Device objects were recreated after a loss. Recreate GPU content.
    #[allow(unused_variables)]
    fn on_device_restored(&mut self, pipeline: &mut Pipeline) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events. Return `true` to stop further processing.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Called before shutdown with the GPU idle.
    #[allow(unused_variables)]
    fn cleanup(&mut self, pipeline: &mut Pipeline) {}
}
