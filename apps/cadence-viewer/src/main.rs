//! Cadence demo viewer
//!
//! Opens a window and clears it every frame, cycling the clear color.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p cadence-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--tearing`: Allow tearing (variable refresh rate displays)
//! - `--hdr`: Enable HDR10 output when the display supports it
//! - `--reverse-depth`: Clear depth to 0.0 instead of 1.0
//! - `--buffers <N>`: Back buffer count, 2 or 3 (default: 2)
//! - `--fixed-step <HZ>`: Update at a fixed rate
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use cadence_app::{run_app, AppConfig};

use crate::app::{Viewer, ViewerParams};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    // Check for help flag before starting the app
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let params = ViewerParams::from_args();
    let mut config = AppConfig::new("Cadence Viewer")
        .with_size(WIDTH, HEIGHT)
        .with_renderer(params.renderer_config());
    if let Some(rate) = params.fixed_step {
        config = config.with_fixed_time_step(rate);
    }

    run_app::<Viewer>(config)
}

fn print_help() {
    eprintln!(
        "Cadence Viewer

USAGE:
    cargo run -p cadence-viewer -- [OPTIONS]

OPTIONS:
    --tearing               Allow tearing (variable refresh rate displays)
    --hdr                   Enable HDR10 output when the display supports it
    --reverse-depth         Clear depth to 0.0 instead of 1.0
    --buffers <N>           Back buffer count, 2 or 3 (default: 2)
    --fixed-step <HZ>       Update at a fixed rate
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
