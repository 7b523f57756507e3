//! Output color space negotiation.
//!
//! The swap chain's color space follows the display the window overlaps
//! most. A wide-gamut space is only chosen when HDR output is enabled, the
//! display natively runs HDR10 and the back buffer format can carry it.
//! Failing to apply a space is never fatal: the previous one is kept.

use cadence_core::{BufferFormat, ColorSpace, Rect};
use tracing::{debug, info, warn};

use crate::backend::{Backend, Factory as _, OutputDesc, SwapChain as _, WindowBounds as _};
use crate::error::{GpuError, Result};

/// Index of the output with the largest overlap with `window`.
///
/// Outputs that don't overlap at all never win; ties keep the first found.
pub fn best_output(window: &Rect, outputs: &[OutputDesc]) -> Option<usize> {
    let mut best = None;
    let mut best_area = 0;

    for (index, output) in outputs.iter().enumerate() {
        let area = window.intersection_area(&output.desktop_rect);
        if area > best_area {
            best_area = area;
            best = Some(index);
        }
    }

    best
}

/// The swap chain color space for a display and back buffer format.
pub const fn select_color_space(
    display_is_hdr10: bool,
    hdr_enabled: bool,
    format: BufferFormat,
) -> ColorSpace {
    if !(display_is_hdr10 && hdr_enabled) {
        return ColorSpace::Srgb;
    }

    match format {
        BufferFormat::R10G10B10A2Unorm => ColorSpace::Hdr10,
        BufferFormat::R16G16B16A16Float => ColorSpace::ScRgbLinear,
        _ => ColorSpace::Srgb,
    }
}

/// Negotiated color space and whether the current display is HDR10.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColorSpaceNegotiator {
    color_space: ColorSpace,
    hdr_capable: bool,
}

impl ColorSpaceNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-inspect the display under the window and apply the best supported
    /// color space to `swap_chain`.
    ///
    /// Only device loss is propagated; everything else is logged and the
    /// previous color space kept.
    pub fn update<B: Backend>(
        &mut self,
        factory: &mut B::Factory,
        window: &B::Window,
        swap_chain: Option<&mut B::SwapChain>,
        format: BufferFormat,
        hdr_enabled: bool,
    ) -> Result<()> {
        if !factory.is_current(window) {
            debug!("Display topology changed, refreshing factory");
            if let Err(e) = factory.refresh(window) {
                warn!("Failed to refresh factory: {e}");
            }
        }

        let Some(swap_chain) = swap_chain else {
            self.hdr_capable = false;
            return Ok(());
        };

        self.hdr_capable = display_is_hdr10::<B>(factory, window, swap_chain);

        let selected = select_color_space(self.hdr_capable, hdr_enabled, format);
        match soft(swap_chain.supports_color_space(selected))? {
            Some(true) => {
                if soft(swap_chain.set_color_space(selected))?.is_some() {
                    if selected != self.color_space {
                        info!("Color space set to {selected:?}");
                    }
                    self.color_space = selected;
                }
            }
            Some(false) => {
                warn!("Color space {selected:?} not supported, keeping {:?}", self.color_space);
            }
            None => {}
        }

        Ok(())
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Whether the display under the window natively runs HDR10.
    pub fn hdr_capable(&self) -> bool {
        self.hdr_capable
    }
}

fn display_is_hdr10<B: Backend>(
    factory: &B::Factory,
    window: &B::Window,
    swap_chain: &B::SwapChain,
) -> bool {
    let Some(window_rect) = window.desktop_rect() else {
        return false;
    };

    let outputs = match factory.outputs(window, swap_chain) {
        Ok(outputs) => outputs,
        Err(e) => {
            warn!("Failed to enumerate outputs: {e}");
            return false;
        }
    };

    best_output(&window_rect, &outputs)
        .is_some_and(|index| outputs[index].native_color_space == ColorSpace::Hdr10)
}

/// Turn a soft failure into `None`, keeping device loss as an error.
fn soft<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e @ GpuError::DeviceLost(_)) => Err(e),
        Err(e) => {
            warn!("Color space negotiation failed: {e}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(left: i32, right: i32, native_color_space: ColorSpace) -> OutputDesc {
        OutputDesc {
            desktop_rect: Rect::new(left, 0, right, 1080),
            native_color_space,
        }
    }

    #[test]
    fn largest_overlap_wins() {
        let outputs = [
            output(0, 1920, ColorSpace::Srgb),
            output(1920, 3840, ColorSpace::Hdr10),
        ];
        let window = Rect::new(1800, 100, 2600, 700);
        assert_eq!(best_output(&window, &outputs), Some(1));
    }

    #[test]
    fn zero_overlap_never_wins() {
        let outputs = [output(0, 1920, ColorSpace::Hdr10)];
        let window = Rect::new(5000, 0, 5800, 600);
        assert_eq!(best_output(&window, &outputs), None);
    }

    #[test]
    fn ties_keep_first() {
        let outputs = [
            output(0, 1920, ColorSpace::Srgb),
            output(1920, 3840, ColorSpace::Hdr10),
        ];
        let window = Rect::new(1520, 0, 2320, 600);
        assert_eq!(best_output(&window, &outputs), Some(0));
    }

    #[test]
    fn hdr10_display_with_ten_bit_format() {
        assert_eq!(
            select_color_space(true, true, BufferFormat::R10G10B10A2Unorm),
            ColorSpace::Hdr10
        );
        assert_eq!(
            select_color_space(true, true, BufferFormat::R16G16B16A16Float),
            ColorSpace::ScRgbLinear
        );
        assert_eq!(
            select_color_space(true, true, BufferFormat::B8G8R8A8Unorm),
            ColorSpace::Srgb
        );
    }

    #[test]
    fn hdr_disabled_is_always_srgb() {
        for format in [
            BufferFormat::R10G10B10A2Unorm,
            BufferFormat::R16G16B16A16Float,
            BufferFormat::B8G8R8A8Unorm,
        ] {
            assert_eq!(select_color_space(true, false, format), ColorSpace::Srgb);
            assert_eq!(select_color_space(false, true, format), ColorSpace::Srgb);
        }
    }
}
