//! Screen topology: which screen lies beyond which border.
//!
//! # How links work (for beginners)
//!
//! Each screen has four borders.  A *link* says "leaving screen A through its
//! right border lands on screen B".  A link may cover only part of a border
//! (a *cell edge*), written as a half-open interval of fractions `[start, end)`
//! along that border, so one tall screen can have two short neighbours on the
//! same side:
//!
//! ```text
//!  ┌────────┐┌──────┐
//!  │        ││  B   │   A right [0.0, 0.5) → B
//!  │   A    │└──────┘
//!  │        │┌──────┐
//!  │        ││  C   │   A right [0.5, 1.0) → C
//!  └────────┘└──────┘
//! ```
//!
//! Links are one-way.  `A right → B` says nothing about `B left`; a
//! configuration that wants symmetric movement writes both links.  The graph
//! is built once from configuration and is read-only afterwards.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Names and directions ──────────────────────────────────────────────────────

/// Unique name of a screen.  Compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreenName(String);

impl ScreenName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScreenName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScreenName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ScreenName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl PartialEq<str> for ScreenName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// A border of a screen, and the direction of travel across it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Top,
    Bottom,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Top,
        Direction::Bottom,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::Top => Direction::Bottom,
            Direction::Bottom => Direction::Top,
        }
    }

    /// `true` for left and right, whose fractions run along the height.
    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }

    pub fn from_name(name: &str) -> Option<Direction> {
        match name.to_ascii_lowercase().as_str() {
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            "top" | "up" => Some(Direction::Top),
            "bottom" | "down" => Some(Direction::Bottom),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Top => "top",
            Direction::Bottom => "bottom",
        })
    }
}

// ── Intervals ─────────────────────────────────────────────────────────────────

/// A half-open range `[start, end)` of fractions along a border.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    start: f64,
    end: f64,
}

impl Interval {
    pub const FULL: Interval = Interval {
        start: 0.0,
        end: 1.0,
    };

    /// # Errors
    ///
    /// [`TopologyError::InvalidInterval`] unless `0 <= start < end <= 1`.
    pub fn new(start: f64, end: f64) -> Result<Self, TopologyError> {
        if !(0.0..1.0).contains(&start) || end <= start || end > 1.0 {
            return Err(TopologyError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// Builds an interval from whole percentages, as written in configuration.
    ///
    /// # Errors
    ///
    /// Same as [`Interval::new`].
    pub fn from_percent(start: u8, end: u8) -> Result<Self, TopologyError> {
        Self::new(f64::from(start) / 100.0, f64::from(end) / 100.0)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Maps `t` inside `self` to the same relative position inside `target`.
    pub fn map_to(&self, target: &Interval, t: f64) -> f64 {
        target.start + (t - self.start) / self.len() * target.len()
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::FULL
    }
}

// ── Graph ─────────────────────────────────────────────────────────────────────

/// Errors raised while building a [`TopologyGraph`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TopologyError {
    #[error("screen {0} is defined twice")]
    DuplicateScreen(ScreenName),

    #[error("link refers to unknown screen {0}")]
    UnknownScreen(ScreenName),

    #[error("invalid edge interval [{start}, {end})")]
    InvalidInterval { start: f64, end: f64 },

    #[error("{screen} {direction} already has a link covering that part of the edge")]
    OverlappingLink {
        screen: ScreenName,
        direction: Direction,
    },
}

/// One link out of a screen border.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub source: Interval,
    pub target: ScreenName,
    pub target_interval: Interval,
}

/// Result of [`TopologyGraph::resolve_neighbor`].
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub screen: ScreenName,
    /// Fraction along the destination's entry border.
    pub t: f64,
}

/// Screens and the links between their borders.
#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    /// Screens in configuration order.
    screens: Vec<ScreenName>,
    links: HashMap<(ScreenName, Direction), Vec<Link>>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// [`TopologyError::DuplicateScreen`] if `name` is already present.
    pub fn add_screen(&mut self, name: impl Into<ScreenName>) -> Result<(), TopologyError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(TopologyError::DuplicateScreen(name));
        }
        self.screens.push(name);
        Ok(())
    }

    /// Links part of `from`'s `direction` border to part of `to`'s opposite
    /// border.
    ///
    /// # Errors
    ///
    /// - [`TopologyError::UnknownScreen`] if either screen is missing,
    /// - [`TopologyError::OverlappingLink`] if `source` overlaps an existing
    ///   link on the same border.
    pub fn link(
        &mut self,
        from: &ScreenName,
        direction: Direction,
        source: Interval,
        to: &ScreenName,
        target_interval: Interval,
    ) -> Result<(), TopologyError> {
        for name in [from, to] {
            if !self.contains(name) {
                return Err(TopologyError::UnknownScreen(name.clone()));
            }
        }
        let links = self.links.entry((from.clone(), direction)).or_default();
        if links.iter().any(|l| l.source.overlaps(&source)) {
            return Err(TopologyError::OverlappingLink {
                screen: from.clone(),
                direction,
            });
        }
        links.push(Link {
            source,
            target: to.clone(),
            target_interval,
        });
        Ok(())
    }

    /// Links the whole `direction` border of `from` to the whole opposite
    /// border of `to`.
    ///
    /// # Errors
    ///
    /// Same as [`TopologyGraph::link`].
    pub fn link_full(
        &mut self,
        from: &ScreenName,
        direction: Direction,
        to: &ScreenName,
    ) -> Result<(), TopologyError> {
        self.link(from, direction, Interval::FULL, to, Interval::FULL)
    }

    pub fn contains(&self, name: &ScreenName) -> bool {
        self.screens.contains(name)
    }

    /// Screens in configuration order.
    pub fn screens(&self) -> impl Iterator<Item = &ScreenName> {
        self.screens.iter()
    }

    pub fn len(&self) -> usize {
        self.screens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.screens.is_empty()
    }

    /// `true` if any link leaves `screen` through `direction`.
    pub fn has_neighbor(&self, screen: &ScreenName, direction: Direction) -> bool {
        self.links
            .get(&(screen.clone(), direction))
            .is_some_and(|links| !links.is_empty())
    }

    /// The screen beyond `direction` of `screen` at fraction `t`, and the
    /// fraction at which the cursor enters it.
    pub fn resolve_neighbor(
        &self,
        screen: &ScreenName,
        direction: Direction,
        t: f64,
    ) -> Option<Neighbor> {
        let links = self.links.get(&(screen.clone(), direction))?;
        let link = links.iter().find(|l| l.source.contains(t))?;
        Some(Neighbor {
            screen: link.target.clone(),
            t: link.source.map_to(&link.target_interval, t),
        })
    }

    /// Like [`TopologyGraph::resolve_neighbor`], but skips screens for which
    /// `usable` is `false` by continuing from the skipped screen.  Stops on a
    /// cycle.
    pub fn resolve_usable_neighbor(
        &self,
        screen: &ScreenName,
        direction: Direction,
        t: f64,
        mut usable: impl FnMut(&ScreenName) -> bool,
    ) -> Option<Neighbor> {
        let mut current = self.resolve_neighbor(screen, direction, t)?;
        let mut visited = vec![screen.clone()];
        loop {
            if usable(&current.screen) {
                return Some(current);
            }
            if visited.contains(&current.screen) {
                return None;
            }
            visited.push(current.screen.clone());
            current = self.resolve_neighbor(&current.screen, direction, current.t)?;
        }
    }

    /// The screen after `screen` in configuration order, wrapping around,
    /// among screens for which `usable` is `true`.
    pub fn next_screen(
        &self,
        screen: &ScreenName,
        mut usable: impl FnMut(&ScreenName) -> bool,
    ) -> Option<&ScreenName> {
        let start = self.screens.iter().position(|s| s == screen)?;
        (1..self.screens.len())
            .map(|offset| &self.screens[(start + offset) % self.screens.len()])
            .find(|s| usable(s))
    }
}
