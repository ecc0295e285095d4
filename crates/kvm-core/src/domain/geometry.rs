//! Screen rectangles and the pixel ↔ edge-fraction mapping.
//!
//! Switching works on *fractions* along a border rather than pixels, so that
//! screens of different resolutions can sit next to each other.  A cursor at
//! row `y` of a screen `sh` pixels high crosses its left or right edge at
//! `t = (y - sy + 0.5) / sh`; the destination turns `t` back into a row of its
//! own height.

use serde::{Deserialize, Serialize};

use crate::domain::topology::Direction;
use crate::protocol::messages::ScreenInfo;

/// Position and size of one screen in its own coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScreenShape {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Corners of a screen, as a bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Corners(pub u8);

impl Corners {
    pub const NONE: Corners = Corners(0);
    pub const TOP_LEFT: Corners = Corners(0x01);
    pub const TOP_RIGHT: Corners = Corners(0x02);
    pub const BOTTOM_LEFT: Corners = Corners(0x04);
    pub const BOTTOM_RIGHT: Corners = Corners(0x08);
    pub const ALL: Corners = Corners(0x0F);

    pub fn contains(self, other: Corners) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Corners) -> bool {
        self.0 & other.0 != 0
    }

    /// Parses a corner name as written in configuration files.
    pub fn from_name(name: &str) -> Option<Corners> {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "topleft" => Some(Corners::TOP_LEFT),
            "topright" => Some(Corners::TOP_RIGHT),
            "bottomleft" => Some(Corners::BOTTOM_LEFT),
            "bottomright" => Some(Corners::BOTTOM_RIGHT),
            "all" => Some(Corners::ALL),
            "none" => Some(Corners::NONE),
            _ => None,
        }
    }
}

impl std::ops::BitOr for Corners {
    type Output = Corners;

    fn bitor(self, rhs: Corners) -> Corners {
        Corners(self.0 | rhs.0)
    }
}

impl ScreenShape {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Pulls a point back inside the screen.
    pub fn clamp(&self, x: i32, y: i32) -> (i32, i32) {
        (
            x.clamp(self.x, (self.right() - 1).max(self.x)),
            y.clamp(self.y, (self.bottom() - 1).max(self.y)),
        )
    }

    /// The edge a point lies on or beyond, given a jump zone of `zone`
    /// pixels.  Left and right win over top and bottom.
    pub fn edge_at(&self, x: i32, y: i32, zone: i32) -> Option<Direction> {
        let zone = zone.max(0);
        if x < self.x + zone {
            Some(Direction::Left)
        } else if x >= self.right() - zone {
            Some(Direction::Right)
        } else if y < self.y + zone {
            Some(Direction::Top)
        } else if y >= self.bottom() - zone {
            Some(Direction::Bottom)
        } else {
            None
        }
    }

    /// The corner a point is in, if within `size` pixels of two edges.
    pub fn corner_at(&self, x: i32, y: i32, size: i32) -> Corners {
        let left = x < self.x + size;
        let right = x >= self.right() - size;
        let top = y < self.y + size;
        let bottom = y >= self.bottom() - size;
        match (left, right, top, bottom) {
            (true, _, true, _) => Corners::TOP_LEFT,
            (_, true, true, _) => Corners::TOP_RIGHT,
            (true, _, _, true) => Corners::BOTTOM_LEFT,
            (_, true, _, true) => Corners::BOTTOM_RIGHT,
            _ => Corners::NONE,
        }
    }

    /// Fraction along the border crossed in `direction`.
    pub fn fraction_at(&self, direction: Direction, x: i32, y: i32) -> f64 {
        let (pos, start, len) = if direction.is_horizontal() {
            (y, self.y, self.height)
        } else {
            (x, self.x, self.width)
        };
        let t = (f64::from(pos - start) + 0.5) / f64::from(len.max(1));
        t.clamp(0.0, 1.0 - f64::EPSILON)
    }

    /// Pixel on the border crossed in `direction` at fraction `t`.  The
    /// point is placed `inset` pixels inside the entry edge, which is the
    /// edge *opposite* `direction` (moving right enters on the left).
    pub fn entry_point(&self, direction: Direction, t: f64, inset: i32) -> (i32, i32) {
        let inset = inset.max(0);
        let along = |start: i32, len: i32| {
            let offset = (t * f64::from(len)) as i32;
            start + offset.clamp(0, (len - 1).max(0))
        };
        let (x, y) = match direction {
            Direction::Right => (self.x + inset, along(self.y, self.height)),
            Direction::Left => (self.right() - 1 - inset, along(self.y, self.height)),
            Direction::Bottom => (along(self.x, self.width), self.y + inset),
            Direction::Top => (along(self.x, self.width), self.bottom() - 1 - inset),
        };
        self.clamp(x, y)
    }
}

impl From<ScreenInfo> for ScreenShape {
    fn from(info: ScreenInfo) -> Self {
        ScreenShape::new(
            i32::from(info.x),
            i32::from(info.y),
            i32::from(info.width),
            i32::from(info.height),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HD: ScreenShape = ScreenShape::new(0, 0, 1920, 1080);

    #[test]
    fn test_edge_at_detects_each_side() {
        assert_eq!(HD.edge_at(0, 500, 1), Some(Direction::Left));
        assert_eq!(HD.edge_at(1919, 500, 1), Some(Direction::Right));
        assert_eq!(HD.edge_at(900, 0, 1), Some(Direction::Top));
        assert_eq!(HD.edge_at(900, 1079, 1), Some(Direction::Bottom));
        assert_eq!(HD.edge_at(900, 500, 1), None);
    }

    #[test]
    fn test_corner_at_requires_both_edges() {
        assert_eq!(HD.corner_at(3, 3, 10), Corners::TOP_LEFT);
        assert_eq!(HD.corner_at(1915, 1075, 10), Corners::BOTTOM_RIGHT);
        assert_eq!(HD.corner_at(3, 500, 10), Corners::NONE);
    }

    #[test]
    fn test_fraction_and_entry_point_mirror_between_sizes() {
        // Arrange – cursor halfway down a 1080p screen's right edge
        let small = ScreenShape::new(0, 0, 1280, 720);

        // Act
        let t = HD.fraction_at(Direction::Right, 1919, 540);
        let (x, y) = small.entry_point(Direction::Right, t, 0);

        // Assert – enters the left edge halfway down
        assert!((t - 0.5).abs() < 0.001);
        assert_eq!((x, y), (0, 360));
    }

    #[test]
    fn test_entry_point_respects_inset_and_offset_origin() {
        let shape = ScreenShape::new(100, 50, 800, 600);
        assert_eq!(shape.entry_point(Direction::Left, 0.0, 2), (897, 50));
        assert_eq!(shape.entry_point(Direction::Top, 0.5, 0), (500, 649));
    }

    #[test]
    fn test_clamp_keeps_point_inside() {
        assert_eq!(HD.clamp(-5, 2000), (0, 1079));
    }

    #[test]
    fn test_shape_from_screen_info() {
        let info = ScreenInfo {
            x: 10,
            y: 20,
            width: 1280,
            height: 800,
            ..ScreenInfo::default()
        };
        assert_eq!(ScreenShape::from(info), ScreenShape::new(10, 20, 1280, 800));
    }

    #[test]
    fn test_corner_names_parse() {
        assert_eq!(Corners::from_name("top-left"), Some(Corners::TOP_LEFT));
        assert_eq!(Corners::from_name("BottomRight"), Some(Corners::BOTTOM_RIGHT));
        assert_eq!(Corners::from_name("middle"), None);
    }
}
