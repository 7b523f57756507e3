//! Application framework for the Cadence engine.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Window creation
//! - Frame pipeline initialization and resize handling
//! - Variable or fixed time step updates
//! - Focus and suspend notifications
//!
//! # Example
//!
//! ```no_run
//! use cadence_app::{run_app, AppConfig, CadenceApp, Frame, Pipeline, StepTimer};
//!
//! struct MyApp;
//!
//! impl CadenceApp for MyApp {
//!     fn init(_pipeline: &mut Pipeline) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _timer: &StepTimer) {}
//!
//!     fn render(&mut self, _frame: &mut Frame<'_>) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::new("My App"))
//! }
//! ```

mod app;
mod runner;
pub mod timer;

pub use app::{CadenceApp, Frame, Pipeline};
pub use runner::{run_app, AppConfig};
pub use timer::StepTimer;

// Re-export commonly used types for convenience
pub use cadence_core::{Color, RendererConfig, RendererOptions};
pub use winit::event::WindowEvent;
