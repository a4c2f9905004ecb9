//! Size change reporting.
//!
//! Children never hold a reference to the aggregate that owns them. When a
//! child's size changes, the mutating call returns a [`SizeChange`] and the
//! owner propagates it.

/// Anything that occupies bytes in the output image.
pub trait SizeProvider {
    /// Current size in bytes. May force a lazy encoding.
    fn size(&mut self) -> u64;
}

/// A size transition from `previous` to `current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeChange {
    pub previous: u64,
    pub current: u64,
}

impl SizeChange {
    pub fn new(previous: u64, current: u64) -> Self {
        Self { previous, current }
    }

    /// Returns a change only if the sizes differ.
    pub fn between(previous: u64, current: u64) -> Option<Self> {
        (previous != current).then(|| Self::new(previous, current))
    }

    /// `current - previous` with wrap-around, so shrinking works when added
    /// back with `wrapping_add`.
    pub fn delta(&self) -> u64 {
        self.current.wrapping_sub(self.previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_delta() {
        let change = SizeChange::new(2, 5);
        assert_eq!(change.delta(), 3);
        assert_eq!(102u64.wrapping_add(change.delta()), 105);
    }

    #[test]
    fn shrink_delta_wraps() {
        let change = SizeChange::new(5, 2);
        assert_eq!(105u64.wrapping_add(change.delta()), 102);
    }

    #[test]
    fn between_equal_sizes_is_none() {
        assert_eq!(SizeChange::between(4, 4), None);
        assert_eq!(SizeChange::between(4, 6), Some(SizeChange::new(4, 6)));
    }
}
