//! Host-controlled staleness switch

/// Coarse-grained recompute switch.
///
/// The pipeline never inspects table contents to decide staleness; the host
/// flips this flag when its inputs change and clears it after a satisfactory
/// run. It starts stale so the first session always precomputes. Kept as a
/// standalone object so the decision is observable and testable in
/// isolation.
#[derive(Debug, Clone)]
pub struct Staleness {
    stale: bool,
}

impl Default for Staleness {
    fn default() -> Self {
        Self { stale: true }
    }
}

impl Staleness {
    /// A stale policy: the first `needs_update` query returns true.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the tables must be recomputed before use.
    pub fn needs_update(&self) -> bool {
        self.stale
    }

    /// Host acknowledgement of a satisfactory run; suppresses recomputation
    /// until the next [`Staleness::invalidate`].
    pub fn mark_clean(&mut self) {
        self.stale = false;
    }

    /// Marks the tables stale, e.g. after a parameter change.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_stale() {
        assert!(Staleness::new().needs_update());
    }

    #[test]
    fn clean_then_invalidate() {
        let mut staleness = Staleness::new();
        staleness.mark_clean();
        assert!(!staleness.needs_update());

        staleness.invalidate();
        assert!(staleness.needs_update());
    }
}
