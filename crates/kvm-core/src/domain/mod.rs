//! Pure switching logic: topology, switch policy and input rules.
//!
//! # Why a separate "domain" module? (for beginners)
//!
//! The code here decides *what* should happen when the cursor reaches a
//! border or a hotkey is pressed, and nothing else:
//!
//! - no sockets, no timers, no OS calls; time comes in as an `Instant`
//!   argument and positions as plain integers;
//! - every type can be built in a unit test with a few lines;
//! - the orchestrators in `kvm-server` and `kvm-client` feed it events and
//!   carry out the decisions it returns.
//!
//! Keeping the rules of the product apart from the machinery that runs them
//! makes both easier to test.

pub mod geometry;
pub mod rules;
pub mod switch;
pub mod topology;

pub use geometry::{Corners, ScreenShape};
pub use rules::{Action, Condition, Evaluation, Rule, RuleEngine, RuleInput, Toggle};
pub use switch::{Blocked, EdgeHit, PendingSwitch, SwitchDecision, SwitchOptions, SwitchPolicy};
pub use topology::{Direction, Interval, Neighbor, ScreenName, TopologyError, TopologyGraph};
