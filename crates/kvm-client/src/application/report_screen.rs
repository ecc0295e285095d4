//! Screen reporting: describes the local screen to the server.

use kvm_core::protocol::messages::ScreenInfo;
use kvm_core::ScreenBackend;

/// Builds the `DINF` payload from the screen's shape and cursor position.
///
/// Coordinates outside the 16-bit wire range are saturated.
pub fn screen_info(screen: &dyn ScreenBackend) -> ScreenInfo {
    let shape = screen.shape();
    let (cursor_x, cursor_y) = screen.cursor_position();
    ScreenInfo {
        x: to_wire(shape.x),
        y: to_wire(shape.y),
        width: to_wire(shape.width),
        height: to_wire(shape.height),
        warp_zone: 0,
        cursor_x: to_wire(cursor_x),
        cursor_y: to_wire(cursor_y),
    }
}

/// Detects whether the screen's geometry changed since `old` was sent.
/// Cursor movement alone is not a change.
pub fn screen_info_changed(old: &ScreenInfo, new: &ScreenInfo) -> bool {
    (old.x, old.y, old.width, old.height) != (new.x, new.y, new.width, new.height)
}

fn to_wire(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvm_core::screen::HeadlessScreen;
    use kvm_core::ScreenShape;

    #[test]
    fn test_screen_info_reports_shape_and_centered_cursor() {
        // Arrange
        let screen = HeadlessScreen::new(ScreenShape::new(0, 0, 1280, 1024));

        // Act
        let info = screen_info(&screen);

        // Assert
        assert_eq!((info.width, info.height), (1280, 1024));
        assert_eq!((info.cursor_x, info.cursor_y), (640, 512));
    }

    #[test]
    fn test_oversized_screen_is_saturated() {
        let screen = HeadlessScreen::new(ScreenShape::new(0, 0, 40_000, 1080));
        assert_eq!(screen_info(&screen).width, i16::MAX);
    }

    #[test]
    fn test_screen_info_changed_ignores_cursor() {
        // Arrange
        let a = screen_info(&HeadlessScreen::new(ScreenShape::new(0, 0, 1920, 1080)));
        let mut b = a;
        b.cursor_x += 10;

        // Act / Assert
        assert!(!screen_info_changed(&a, &b));
    }

    #[test]
    fn test_screen_info_changed_detects_resolution_change() {
        let a = screen_info(&HeadlessScreen::new(ScreenShape::new(0, 0, 1920, 1080)));
        let b = screen_info(&HeadlessScreen::new(ScreenShape::new(0, 0, 2560, 1440)));
        assert!(screen_info_changed(&a, &b));
    }
}
