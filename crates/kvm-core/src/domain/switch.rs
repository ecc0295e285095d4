//! Edge-switch decisions.
//!
//! When the cursor hits a border that has a neighbour, the server does not
//! always switch right away.  [`SwitchPolicy`] applies the user's options in
//! this order:
//!
//! 1. no neighbour, dead corner, cursor locked, or required modifiers
//!    missing: no switch, and any half-finished double tap or wait is reset;
//! 2. double tap: the first tap arms, a second tap on the same border within
//!    the delay switches.  The cursor must leave the tap zone between taps;
//! 3. switch delay: the first hit starts a wait, the switch happens when the
//!    wait expires unless the cursor moved away from the border first.
//!
//! The policy holds only timestamps.  It never starts timers itself; when it
//! returns [`SwitchDecision::Wait`] the caller schedules one and calls
//! [`SwitchPolicy::wait_expired`] when it fires.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::geometry::{Corners, ScreenShape};
use crate::domain::topology::{Direction, ScreenName};
use crate::keymap::ModifierMask;

/// Default width of the double-tap zone in pixels.
pub const DEFAULT_TAP_ZONE: i32 = 3;

/// User options that shape edge switching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOptions {
    pub switch_delay: Option<Duration>,
    pub double_tap: Option<Duration>,
    pub tap_zone: i32,
    pub dead_corners: Corners,
    pub corner_size: i32,
    pub needs_shift: bool,
    pub needs_control: bool,
    pub needs_alt: bool,
}

impl Default for SwitchOptions {
    fn default() -> Self {
        Self {
            switch_delay: None,
            double_tap: None,
            tap_zone: DEFAULT_TAP_ZONE,
            dead_corners: Corners::NONE,
            corner_size: 0,
            needs_shift: false,
            needs_control: false,
            needs_alt: false,
        }
    }
}

impl SwitchOptions {
    fn required_modifiers(&self) -> ModifierMask {
        let mut mask = ModifierMask::NONE;
        if self.needs_shift {
            mask |= ModifierMask::SHIFT;
        }
        if self.needs_control {
            mask |= ModifierMask::CONTROL;
        }
        if self.needs_alt {
            mask |= ModifierMask::ALT;
        }
        mask
    }
}

/// The cursor hit a border of the active screen.
#[derive(Debug, Clone, Copy)]
pub struct EdgeHit<'a> {
    pub direction: Direction,
    /// Screen beyond the border, `None` when there is none.
    pub target: Option<&'a ScreenName>,
    /// Cursor position on the active screen.
    pub x: i32,
    pub y: i32,
    pub shape: ScreenShape,
    pub modifiers: ModifierMask,
    pub locked: bool,
}

/// Why a switch was refused outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    NoNeighbor,
    DeadCorner,
    Locked,
    ModifiersRequired,
}

/// What the caller should do about an [`EdgeHit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchDecision {
    /// Switch now.
    Switch,
    /// Start a timer for this long and call [`SwitchPolicy::wait_expired`].
    Wait(Duration),
    /// Not yet (first tap, or a wait already running).
    Hold,
    /// No switch, and nothing pending.
    Blocked(Blocked),
}

/// A switch the policy is waiting to complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSwitch {
    pub direction: Direction,
    pub target: ScreenName,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy)]
struct Tap {
    started: Instant,
    armed: bool,
}

/// Double-tap and switch-delay state for the active screen.
#[derive(Debug, Default)]
pub struct SwitchPolicy {
    options: SwitchOptions,
    pending: Option<PendingSwitch>,
    tap: Option<Tap>,
    wait_started: Option<Instant>,
}

impl SwitchPolicy {
    pub fn new(options: SwitchOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &SwitchOptions {
        &self.options
    }

    pub fn pending(&self) -> Option<&PendingSwitch> {
        self.pending.as_ref()
    }

    pub fn is_waiting(&self) -> bool {
        self.wait_started.is_some()
    }

    /// Decides what to do about a border hit.
    pub fn evaluate(&mut self, hit: EdgeHit<'_>, now: Instant) -> SwitchDecision {
        let Some(target) = hit.target else {
            return self.block(Blocked::NoNeighbor);
        };
        let corner = hit
            .shape
            .corner_at(hit.x, hit.y, self.options.corner_size);
        if self.options.dead_corners.intersects(corner) {
            return self.block(Blocked::DeadCorner);
        }
        if hit.locked {
            return self.block(Blocked::Locked);
        }
        let required = self.options.required_modifiers();
        if !hit.modifiers.contains(required) && !required.is_empty() {
            return self.block(Blocked::ModifiersRequired);
        }

        let new_direction = self
            .pending
            .as_ref()
            .map_or(true, |p| p.direction != hit.direction);
        if new_direction {
            self.tap = None;
            self.wait_started = None;
        }
        self.pending = Some(PendingSwitch {
            direction: hit.direction,
            target: target.clone(),
            x: hit.x,
            y: hit.y,
        });

        if let Some(delay) = self.options.double_tap {
            let second_tap = self
                .tap
                .is_some_and(|tap| tap.armed && now.saturating_duration_since(tap.started) <= delay);
            if !second_tap {
                debug!(direction = %hit.direction, "waiting for second tap");
                self.tap = Some(Tap {
                    started: now,
                    armed: false,
                });
                return SwitchDecision::Hold;
            }
            return self.allow();
        }

        if let Some(delay) = self.options.switch_delay {
            if self.wait_started.is_none() {
                self.wait_started = Some(now);
                return SwitchDecision::Wait(delay);
            }
            return SwitchDecision::Hold;
        }

        self.allow()
    }

    /// The cursor moved without hitting a border.  Cancels a pending wait and
    /// arms the double tap once the cursor is clear of the tap zone.
    pub fn no_switch(&mut self, x: i32, y: i32, shape: ScreenShape, jump_zone: i32, now: Instant) {
        self.wait_started = None;
        let Some(tap) = self.tap.as_mut() else {
            self.pending = None;
            return;
        };
        let delay = self.options.double_tap.unwrap_or_default();
        if now.saturating_duration_since(tap.started) > delay {
            self.reset();
            return;
        }
        let zone = jump_zone.max(self.options.tap_zone);
        let inner = ScreenShape::new(
            shape.x + zone,
            shape.y + zone,
            shape.width - 2 * zone,
            shape.height - 2 * zone,
        );
        if !tap.armed && inner.contains(x, y) {
            tap.armed = true;
        }
    }

    /// The switch-delay timer fired.  Returns the switch to perform if the
    /// cursor stayed on the border.
    pub fn wait_expired(&mut self) -> Option<PendingSwitch> {
        self.wait_started.take()?;
        let pending = self.pending.take();
        self.reset();
        pending
    }

    /// Forgets any pending switch, e.g. after the active screen changed.
    pub fn reset(&mut self) {
        self.pending = None;
        self.tap = None;
        self.wait_started = None;
    }

    fn block(&mut self, reason: Blocked) -> SwitchDecision {
        debug!(?reason, "switch blocked");
        self.reset();
        SwitchDecision::Blocked(reason)
    }

    fn allow(&mut self) -> SwitchDecision {
        self.reset();
        SwitchDecision::Switch
    }
}
