//! Rectangles, viewports and colors.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Integer rectangle in pixels, edges exclusive on the right and bottom.
///
/// Used both for the output size (always anchored at the origin) and for
/// desktop coordinates of windows and displays, which may be negative on
/// multi-monitor layouts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// Create a rectangle from its edges.
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Create a rectangle anchored at the origin.
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Width in pixels (may be negative for degenerate rectangles).
    #[inline]
    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    /// Height in pixels (may be negative for degenerate rectangles).
    #[inline]
    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Width and height clamped to at least one pixel.
    ///
    /// Swap chains and depth buffers can't be zero sized, which is what a
    /// minimized window reports.
    pub fn clamped_extent(&self) -> (u32, u32) {
        let width = u32::try_from(self.width()).unwrap_or(0).max(1);
        let height = u32::try_from(self.height()).unwrap_or(0).max(1);
        (width, height)
    }

    /// Area of the overlap between two rectangles, zero when they are disjoint.
    pub fn intersection_area(&self, other: &Self) -> i64 {
        let overlap_x = i64::from(self.right.min(other.right)) - i64::from(self.left.max(other.left));
        let overlap_y =
            i64::from(self.bottom.min(other.bottom)) - i64::from(self.top.max(other.top));
        overlap_x.max(0) * overlap_y.max(0)
    }
}

/// Rasterizer viewport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-output viewport with the standard [0, 1] depth range.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_extent(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Linear RGBA color.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const CORNFLOWER_BLUE: Self = Self::new(0.392_156_9, 0.584_313_75, 0.929_411_8, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Components as an array, in RGBA order.
    pub fn to_array(self) -> [f32; 4] {
        bytemuck::cast(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_of_overlapping_rects() {
        let window = Rect::new(100, 100, 500, 400);
        let display = Rect::new(0, 0, 300, 1080);
        assert_eq!(window.intersection_area(&display), 200 * 300);
    }

    #[test]
    fn disjoint_rects_never_go_negative() {
        let window = Rect::new(0, 0, 100, 100);
        let display = Rect::new(1920, 0, 3840, 1080);
        assert_eq!(window.intersection_area(&display), 0);
        assert_eq!(display.intersection_area(&window), 0);
    }

    #[test]
    fn negative_desktop_coordinates() {
        let window = Rect::new(-200, 0, 200, 100);
        let left_display = Rect::new(-1920, 0, 0, 1080);
        assert_eq!(window.intersection_area(&left_display), 200 * 100);
    }

    #[test]
    fn extent_is_clamped_to_one_pixel() {
        assert_eq!(Rect::from_size(0, 0).clamped_extent(), (1, 1));
        assert_eq!(Rect::from_size(-5, 20).clamped_extent(), (1, 20));
        assert_eq!(Rect::from_size(800, 600).clamped_extent(), (800, 600));
    }

    #[test]
    fn color_array_layout() {
        assert_eq!(Color::new(0.1, 0.2, 0.3, 0.4).to_array(), [0.1, 0.2, 0.3, 0.4]);
    }
}
