//! Viewer application: clears the back buffer to a slowly cycling color.

use cadence_app::{CadenceApp, Frame, Pipeline, StepTimer};
use cadence_core::{Color, RendererConfig, RendererOptions};
use cadence_gpu::CommandList as _;
use tracing::info;

/// Seconds for one full trip around the color wheel.
const CYCLE_SECONDS: f64 = 12.0;

/// Configuration from the command line.
#[derive(Debug, Clone, Default)]
pub struct ViewerParams {
    pub options: RendererOptions,
    pub back_buffer_count: Option<u32>,
    pub fixed_step: Option<u32>,
}

impl ViewerParams {
    /// Parse viewer parameters from command line arguments.
    pub fn from_args() -> Self {
        let mut params = Self::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--tearing" => params.options |= RendererOptions::ALLOW_TEARING,
                "--hdr" => params.options |= RendererOptions::ENABLE_HDR,
                "--reverse-depth" => params.options |= RendererOptions::REVERSE_DEPTH,
                "--buffers" => {
                    if let Some(v) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                        params.back_buffer_count = Some(v);
                        i += 1;
                    }
                }
                "--fixed-step" => {
                    if let Some(v) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                        params.fixed_step = Some(v);
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        params
    }

    pub fn renderer_config(&self) -> RendererConfig {
        let config = RendererConfig::default().with_options(self.options);
        match self.back_buffer_count {
            Some(count) => config.with_back_buffer_count(count),
            None => config,
        }
    }
}

/// Hue in [0, 1) to an opaque RGB color at full saturation and value.
#[allow(clippy::cast_possible_truncation)]
fn hue_to_color(hue: f64) -> Color {
    let h = hue.rem_euclid(1.0) * 6.0;
    let x = (1.0 - (h % 2.0 - 1.0).abs()) as f32;
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    Color::new(r * 0.5, g * 0.5, b * 0.5, 1.0)
}

pub struct Viewer {
    color: Color,
    last_fps: u32,
}

impl CadenceApp for Viewer {
    fn init(pipeline: &mut Pipeline) -> anyhow::Result<Self> {
        info!(
            "Rendering {:?} with {} back buffers, options {:?}",
            pipeline.color_space(),
            pipeline.back_buffer_count(),
            pipeline.options()
        );
        Ok(Self {
            color: pipeline.config().clear_color,
            last_fps: 0,
        })
    }

    fn update(&mut self, timer: &StepTimer) {
        self.color = hue_to_color(timer.total_seconds() / CYCLE_SECONDS);

        let fps = timer.frames_per_second();
        if fps != self.last_fps {
            self.last_fps = fps;
            tracing::debug!("{fps} fps");
        }
    }

    fn render(&mut self, frame: &mut Frame<'_>) -> anyhow::Result<()> {
        // The pipeline already cleared to the configured color.
        frame
            .command_list
            .clear_render_target(frame.render_target, self.color);
        Ok(())
    }

    fn on_device_restored(&mut self, pipeline: &mut Pipeline) -> anyhow::Result<()> {
        info!("Device restored ({} recoveries)", pipeline.recoveries());
        Ok(())
    }
}
