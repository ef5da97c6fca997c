//! Screen geometry in logical display coordinates.

use serde::{Deserialize, Serialize};

/// A rectangle describing the client's logical desktop.
///
/// The width and height bound the absolute pointer range of the virtual
/// device; `x`/`y` are the top-left corner of the desktop in compositor
/// coordinates (almost always `0, 0` for a single output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenShape {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_width() -> u32 {
    1920
}
fn default_height() -> u32 {
    1080
}

impl Default for ScreenShape {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: default_width(),
            height: default_height(),
        }
    }
}

impl ScreenShape {
    /// Creates a shape anchored at `(x, y)`.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Returns the centre point of the rectangle.
    pub fn center(&self) -> (i32, i32) {
        let half_w = i32::try_from(self.width / 2).unwrap_or(i32::MAX);
        let half_h = i32::try_from(self.height / 2).unwrap_or(i32::MAX);
        (self.x.saturating_add(half_w), self.y.saturating_add(half_h))
    }
}
