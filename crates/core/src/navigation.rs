//! Index arithmetic over a fixed-size question sequence.
//!
//! Moves saturate at the ends; nothing here wraps or fails.

/// Cursor over `total` questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Navigation {
    current: usize,
    total: usize,
}

impl Navigation {
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self { current: 0, total }
    }

    #[must_use]
    pub fn current(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn is_first(&self) -> bool {
        self.current == 0
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.current + 1 >= self.total
    }

    /// Clamp any index into `[0, total - 1]` (0 for an empty sequence).
    #[must_use]
    pub fn clamp(&self, index: i64) -> usize {
        let last = self.total.saturating_sub(1);
        if index <= 0 {
            return 0;
        }
        usize::try_from(index).map_or(last, |i| i.min(last))
    }

    pub fn go_to(&mut self, index: i64) -> usize {
        self.current = self.clamp(index);
        self.current
    }

    pub fn next(&mut self) -> usize {
        if !self.is_last() {
            self.current += 1;
        }
        self.current
    }

    pub fn previous(&mut self) -> usize {
        self.current = self.current.saturating_sub(1);
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn go_to_clamps_far_past_end() {
        let mut nav = Navigation::new(10);
        assert_eq!(nav.go_to(999), 9);
        assert_eq!(nav.go_to(999), 9);
        assert_eq!(nav.current(), 9);
    }

    #[test]
    fn go_to_clamps_negative_and_extremes() {
        let mut nav = Navigation::new(10);
        for index in [i64::MIN, -1, 0, 3, 9, 10, i64::MAX] {
            let landed = nav.go_to(index);
            assert!(landed < 10, "index {index} landed on {landed}");
        }
        assert_eq!(nav.go_to(-5), 0);
        assert_eq!(nav.go_to(i64::MAX), 9);
    }

    #[test]
    fn next_and_previous_saturate() {
        let mut nav = Navigation::new(3);
        assert_eq!(nav.previous(), 0);
        assert_eq!(nav.next(), 1);
        assert_eq!(nav.next(), 2);
        assert_eq!(nav.next(), 2);
        assert!(nav.is_last());
        assert_eq!(nav.previous(), 1);
    }

    #[test]
    fn empty_sequence_stays_at_zero() {
        let mut nav = Navigation::new(0);
        assert_eq!(nav.go_to(4), 0);
        assert_eq!(nav.next(), 0);
        assert_eq!(nav.previous(), 0);
    }
}
