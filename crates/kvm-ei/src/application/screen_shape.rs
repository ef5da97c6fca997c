//! ScreenShapeSource: supplies the logical desktop rectangle.
//!
//! The controller needs the desktop size exactly once per device, to configure
//! the absolute pointer range when the device is created.  Resolving the real
//! multi-output layout requires a Wayland `xdg-output` roundtrip, which is not
//! part of this crate; callers plug in whatever source they have.

use crate::domain::geometry::ScreenShape;

/// Trait for resolving the logical screen rectangle.
#[cfg_attr(test, mockall::automock)]
pub trait ScreenShapeSource: Send + Sync {
    /// Returns the current desktop rectangle.
    fn shape(&self) -> ScreenShape;
}

/// A shape source that always returns the rectangle it was built with.
///
/// This is the geometry strategy used by the binary: the rectangle comes from
/// the `[screen]` section of the configuration file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedScreenShape {
    shape: ScreenShape,
}

impl FixedScreenShape {
    /// Creates a source returning `shape`.
    pub fn new(shape: ScreenShape) -> Self {
        Self { shape }
    }
}

impl ScreenShapeSource for FixedScreenShape {
    fn shape(&self) -> ScreenShape {
        self.shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fixed_shape_is_1080p() {
        let source = FixedScreenShape::default();
        assert_eq!(source.shape(), ScreenShape::new(0, 0, 1920, 1080));
    }

    #[test]
    fn test_fixed_shape_returns_configured_rectangle() {
        // Arrange
        let configured = ScreenShape::new(0, 0, 2560, 1440);

        // Act
        let source = FixedScreenShape::new(configured);

        // Assert
        assert_eq!(source.shape(), configured);
    }
}
