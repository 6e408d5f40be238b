/// How a failed attempt should be handled by the send loop
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorClass {
    /// The link is busy or transitioning; sleep the retry interval, then
    /// retry
    WaitAndRetry,
    /// Backpressure only; retry immediately without sleeping
    NotReady,
    /// Report to the caller now, no further attempts
    Terminal,
}

/// Bounded retry budget for one logical request
///
/// `send` makes at most the configured number of attempts; exhausting the
/// budget without a terminal error is reported as a generic send failure.
#[derive(Debug)]
pub struct AttemptBudget {
    limit: u8,
    used: u8,
}

impl AttemptBudget {
    /// Create a budget of `limit` attempts
    pub fn new(limit: u8) -> Self {
        Self { limit, used: 0 }
    }

    /// Claim the next attempt; `false` once the budget is spent
    pub fn begin(&mut self) -> bool {
        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }

    /// Number of attempts made so far
    pub fn used(&self) -> u8 {
        self.used
    }

    /// Configured attempt limit
    pub fn limit(&self) -> u8 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_allows_exactly_the_limit() {
        let mut budget = AttemptBudget::new(3);
        assert!(budget.begin());
        assert!(budget.begin());
        assert!(budget.begin());
        assert!(!budget.begin());
        assert!(!budget.begin());
        assert_eq!(budget.used(), 3);
    }

    #[test]
    fn zero_budget_never_starts() {
        let mut budget = AttemptBudget::new(0);
        assert!(!budget.begin());
    }
}
