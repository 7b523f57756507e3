//! Event loop host that drives a [`FramePipeline`](cadence_gpu::FramePipeline).

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use cadence_core::RendererConfig;
use cadence_gpu::{DeviceNotify, GpuError, NativeWindow, VulkanBackend};
use cadence_platform::{HostWindow, PlatformConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use crate::app::{CadenceApp, Pipeline};
use crate::timer::StepTimer;

/// Window and renderer settings for [`run_app`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial client width.
    pub width: u32,
    /// Initial client height.
    pub height: u32,
    pub renderer: RendererConfig,
    /// Seconds per update with a fixed time step, `None` for a variable step.
    pub fixed_time_step: Option<f64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Cadence".to_string(),
            width: 1280,
            height: 720,
            renderer: RendererConfig::default(),
            fixed_time_step: None,
        }
    }
}

impl AppConfig {
    /// Default settings with the given window title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Initial client area size in physical pixels.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_renderer(mut self, renderer: RendererConfig) -> Self {
        self.renderer = renderer;
        self
    }

    /// Update `updates_per_second` times per second regardless of frame rate.
    pub fn with_fixed_time_step(mut self, updates_per_second: u32) -> Self {
        self.fixed_time_step = Some(1.0 / f64::from(updates_per_second.max(1)));
        self
    }
}

/// Run a [`CadenceApp`] with the given configuration.
///
/// Installs the log subscriber, then creates the window, the Vulkan backend
/// and the pipeline on the first resume. Returns when the window closes.
pub fn run_app<A: CadenceApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(title = %config.title, "Starting event loop");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
    };

    event_loop.run_app(&mut runner)?;
    Ok(())
}

/// Device notifications collected during a pipeline call, dispatched to the
/// app once the call returns.
#[derive(Default)]
struct DeviceEvents {
    lost: Cell<bool>,
    restored: Cell<bool>,
}

struct DeviceEventListener(Rc<DeviceEvents>);

impl DeviceNotify for DeviceEventListener {
    fn on_device_lost(&mut self) {
        self.0.lost.set(true);
    }

    fn on_device_restored(&mut self) {
        self.0.restored.set(true);
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: CadenceApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
}

/// Everything that exists once the window is up.
struct AppState<A: CadenceApp> {
    // Dropped in declaration order: content, then the pipeline, then the window.
    app: A,
    pipeline: Pipeline,
    window: HostWindow,
    timer: StepTimer,
    device_events: Rc<DeviceEvents>,
}

impl<A: CadenceApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(state) = &mut self.state {
            state.pipeline.on_resuming();
            return;
        }

        info!("Creating window and device resources");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Frame pipeline ready");
            }
            Err(e) => {
                error!("Startup failed: {e}");
                event_loop.exit();
            }
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &mut self.state {
            state.pipeline.on_suspending();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Content gets first refusal.
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.render_frame() {
                        error!("Frame failed: {e}");
                        if is_fatal(&e) {
                            event_loop.exit();
                        }
                    }
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size.width, size.height) {
                        error!("Rebuilding window-size resources failed: {e}");
                        if is_fatal(&e) {
                            event_loop.exit();
                        }
                    }
                }
            }
            WindowEvent::Focused(focused) => {
                if let Some(state) = &mut self.state {
                    if focused {
                        state.pipeline.on_activated();
                    } else {
                        state.pipeline.on_deactivated();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

fn is_fatal(error: &anyhow::Error) -> bool {
    error.downcast_ref::<GpuError>().is_some_and(GpuError::is_fatal)
}

impl<A: CadenceApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window = HostWindow::create(
            event_loop,
            &PlatformConfig {
                title: self.config.title.clone(),
                width: self.config.width,
                height: self.config.height,
                resizable: true,
            },
        )?;
        let (width, height) = window.inner_size();

        let mut pipeline = Pipeline::new(
            VulkanBackend::new(self.config.title.clone()),
            self.config.renderer.clone(),
        )?;

        let device_events = Rc::new(DeviceEvents::default());
        pipeline.register_device_notify(Box::new(DeviceEventListener(device_events.clone())));

        let native: Arc<dyn NativeWindow> = Arc::new(window.clone());
        pipeline.set_window(native, width, height);
        pipeline.create_device_resources()?;
        pipeline.create_window_size_dependent_resources()?;

        if let (Some(level), Some(model)) = (pipeline.feature_level(), pipeline.shader_model()) {
            info!("Feature level {level}, shader model {model}");
        }

        let app = A::init(&mut pipeline)?;

        let mut timer = StepTimer::new();
        if let Some(step) = self.config.fixed_time_step {
            timer.set_fixed_time_step(true);
            timer.set_target_elapsed_seconds(step);
        }

        Ok(AppState {
            window,
            pipeline,
            app,
            timer,
            device_events,
        })
    }
}

impl<A: CadenceApp> AppState<A> {
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let app = &mut self.app;
        self.timer.tick(|timer| app.update(timer));

        // Nothing to show before the first update or while minimized.
        let (width, height) = self.window.inner_size();
        if self.timer.frame_count() == 0 || width == 0 || height == 0 {
            return Ok(());
        }

        let app = &mut self.app;
        let result = self.pipeline.render(|frame| app.render(frame));
        self.dispatch_device_events()?;
        result
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        let rebuilt = self.pipeline.on_window_size_changed(width, height);
        self.dispatch_device_events()?;

        if rebuilt? {
            self.app.on_resize(&mut self.pipeline, width, height)?;
            info!("Output resized to {width}x{height}");
        }
        Ok(())
    }

    fn dispatch_device_events(&mut self) -> anyhow::Result<()> {
        if self.device_events.lost.take() {
            self.app.on_device_lost();
        }
        if self.device_events.restored.take() {
            self.app.on_device_restored(&mut self.pipeline)?;
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        info!("Draining GPU before shutdown");
        if let Err(e) = self.pipeline.wait_for_gpu() {
            error!("GPU drain failed: {e}");
        }

        // GPU is idle; content may now drop its own objects.
        self.app.cleanup(&mut self.pipeline);

        info!(
            "Cleanup complete after {} updates ({} fps)",
            self.timer.frame_count(),
            self.timer.frames_per_second()
        );
    }
}
