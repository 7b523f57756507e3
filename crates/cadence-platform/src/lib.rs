//! Platform abstraction for the Cadence engine.
//!
//! Adapts a winit window to the native-window interface the renderer
//! presents to.

use std::sync::Arc;

use cadence_core::Rect;
use cadence_gpu::{NativeWindow, WindowBounds};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use thiserror::Error;
use tracing::debug;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event_loop::ActiveEventLoop;
use winit::monitor::MonitorHandle;
use winit::window::Window;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
    #[error("Event loop error: {0}")]
    EventLoop(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Platform configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            title: "Cadence".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// Desktop rectangle from a position and a size.
pub fn desktop_rect(position: PhysicalPosition<i32>, size: PhysicalSize<u32>) -> Rect {
    let width = i32::try_from(size.width).unwrap_or(i32::MAX);
    let height = i32::try_from(size.height).unwrap_or(i32::MAX);
    Rect::new(
        position.x,
        position.y,
        position.x.saturating_add(width),
        position.y.saturating_add(height),
    )
}

fn monitor_rect(monitor: &MonitorHandle) -> Rect {
    desktop_rect(monitor.position(), monitor.size())
}

/// A winit window the renderer can present to.
#[derive(Clone)]
pub struct HostWindow {
    window: Arc<Window>,
}

impl HostWindow {
    /// Create a window on the running event loop.
    pub fn create(event_loop: &ActiveEventLoop, config: &PlatformConfig) -> Result<Self> {
        let attributes = Window::default_attributes()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let window = event_loop
            .create_window(attributes)
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;

        debug!("Window created: {}x{}", config.width, config.height);
        Ok(Self::new(Arc::new(window)))
    }

    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Current client area size in physical pixels.
    pub fn inner_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl HasWindowHandle for HostWindow {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for HostWindow {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl WindowBounds for HostWindow {
    fn desktop_rect(&self) -> Option<Rect> {
        // Wayland has no global window positions.
        let position = self.window.outer_position().ok()?;
        Some(desktop_rect(position, self.window.outer_size()))
    }
}

impl NativeWindow for HostWindow {
    fn monitors(&self) -> Vec<Rect> {
        self.window.available_monitors().map(|m| monitor_rect(&m)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_rect_spans_position_and_size() {
        let rect = desktop_rect(PhysicalPosition::new(-1920, 0), PhysicalSize::new(1920, 1080));
        assert_eq!(rect, Rect::new(-1920, 0, 0, 1080));
    }

    #[test]
    fn desktop_rect_saturates() {
        let rect = desktop_rect(PhysicalPosition::new(i32::MAX - 10, 0), PhysicalSize::new(100, 1));
        assert_eq!(rect.right, i32::MAX);
    }
}
