//! Key generators for auto-increment object stores.

use crate::error::{CoreError, CoreResult};

/// Produces increasing integer keys.
///
/// The first generated key is 1. Explicit numeric keys at or above the
/// current value push the generator forward so later generated keys never
/// collide with them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyGenerator {
    current: f64,
    max: f64,
}

impl KeyGenerator {
    /// Creates a generator that has not produced any key yet.
    #[must_use]
    pub fn new(max: u64) -> Self {
        Self::with_current(0.0, max)
    }

    /// Creates a generator whose last produced key was `current`.
    #[must_use]
    pub fn with_current(current: f64, max: u64) -> Self {
        Self {
            current,
            max: max as f64,
        }
    }

    /// The last produced (or bumped-to) value.
    #[must_use]
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Produces the next key.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintError` once the maximum has been reached.
    pub fn next_key(&mut self) -> CoreResult<f64> {
        if self.current >= self.max {
            return Err(CoreError::constraint("key generator exhausted"));
        }
        self.current += 1.0;
        Ok(self.current)
    }

    /// Accounts for an explicitly supplied numeric key. Returns true if the
    /// generator moved.
    pub fn set_if_larger(&mut self, key: f64) -> bool {
        let floor = key.floor().min(self.max);
        if floor > self.current {
            self.current = floor;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_GENERATED_KEY;

    #[test]
    fn starts_at_one() {
        let mut generator = KeyGenerator::new(DEFAULT_MAX_GENERATED_KEY);
        assert_eq!(generator.next_key().unwrap(), 1.0);
        assert_eq!(generator.next_key().unwrap(), 2.0);
    }

    #[test]
    fn explicit_keys_bump_the_generator() {
        let mut generator = KeyGenerator::new(DEFAULT_MAX_GENERATED_KEY);
        assert!(generator.set_if_larger(10.5));
        assert_eq!(generator.next_key().unwrap(), 11.0);
        assert!(!generator.set_if_larger(3.0));
        assert_eq!(generator.next_key().unwrap(), 12.0);
    }

    #[test]
    fn negative_keys_do_not_move_it() {
        let mut generator = KeyGenerator::new(DEFAULT_MAX_GENERATED_KEY);
        assert!(!generator.set_if_larger(-4.0));
        assert_eq!(generator.next_key().unwrap(), 1.0);
    }

    #[test]
    fn exhaustion_is_a_constraint_error() {
        let mut generator = KeyGenerator::new(2);
        generator.next_key().unwrap();
        generator.next_key().unwrap();
        assert_eq!(generator.next_key().unwrap_err().name(), "ConstraintError");
    }

    #[test]
    fn huge_explicit_keys_exhaust_it() {
        let mut generator = KeyGenerator::new(100);
        generator.set_if_larger(f64::INFINITY);
        assert_eq!(generator.current(), 100.0);
        assert!(generator.next_key().is_err());
    }
}
