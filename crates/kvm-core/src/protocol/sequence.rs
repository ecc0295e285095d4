//! Enter sequence numbers.
//!
//! # What is the enter sequence number? (for beginners)
//!
//! Every time the server moves the cursor onto a screen it bumps a counter and
//! sends the new value in `CINN`.  Clipboard messages from that screen echo the
//! value back.  When the server receives a clipboard grab carrying an old
//! number, it knows the message was sent before a later switch and can ignore
//! it: the user has already moved on.
//!
//! The counter lives inside the single-threaded orchestrator, so a plain
//! `u32` behind `&mut self` is enough; no atomics are needed.

/// Monotonically increasing counter for `CINN` sequence numbers.
///
/// Wraps from `u32::MAX` back to 0 without panicking.
///
/// # Examples
///
/// ```rust
/// use kvm_core::protocol::EnterSequence;
///
/// let mut seq = EnterSequence::new();
/// assert_eq!(seq.current(), 0);
/// assert_eq!(seq.advance(), 1);
/// assert!(seq.is_current(1));
/// ```
#[derive(Debug, Clone, Default)]
pub struct EnterSequence {
    value: u32,
}

impl EnterSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter and returns the new value.
    pub fn advance(&mut self) -> u32 {
        self.value = self.value.wrapping_add(1);
        self.value
    }

    /// The value sent in the most recent `CINN`.
    pub fn current(&self) -> u32 {
        self.value
    }

    /// Records a value received from the server (client side).
    pub fn observe(&mut self, value: u32) {
        self.value = value;
    }

    /// Returns `true` when `value` belongs to the latest enter.
    pub fn is_current(&self, value: u32) -> bool {
        self.value == value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_starts_at_zero() {
        let seq = EnterSequence::new();
        assert_eq!(seq.current(), 0);
    }

    #[test]
    fn test_advance_increments_monotonically() {
        // Arrange
        let mut seq = EnterSequence::new();

        // Act
        let values: Vec<u32> = (0..100).map(|_| seq.advance()).collect();

        // Assert
        for window in values.windows(2) {
            assert!(window[1] > window[0], "values must be increasing");
        }
    }

    #[test]
    fn test_advance_wraps_at_u32_max() {
        // Arrange – one step before overflow
        let mut seq = EnterSequence { value: u32::MAX };

        // Act
        let after_wrap = seq.advance();

        // Assert
        assert_eq!(after_wrap, 0, "counter must wrap to 0 after u32::MAX");
    }

    #[test]
    fn test_stale_values_are_not_current() {
        let mut seq = EnterSequence::new();
        let old = seq.advance();
        seq.advance();
        assert!(!seq.is_current(old));
    }

    #[test]
    fn test_observe_adopts_server_value() {
        let mut seq = EnterSequence::new();
        seq.observe(42);
        assert!(seq.is_current(42));
    }
}
