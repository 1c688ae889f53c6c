//! Readiness predicates for a search's discovered article set.
//!
//! Pure over a snapshot, recomputed after every resolution event. An early
//! check against stale state simply defers to the next trigger.

use commonplace_common::ItemStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchReadiness {
    pub discovered: usize,
    pub pending: usize,
    pub complete: usize,
    pub failed: usize,
    /// Complete articles that already have at least one derived insight.
    pub complete_with_insights: usize,
}

impl SearchReadiness {
    /// Tally a snapshot of (article status, derived insight count) pairs.
    pub fn tally(articles: &[(ItemStatus, usize)]) -> Self {
        let mut r = Self {
            discovered: articles.len(),
            ..Self::default()
        };
        for (status, insights) in articles {
            match status {
                ItemStatus::Pending => r.pending += 1,
                ItemStatus::Failed => r.failed += 1,
                ItemStatus::Complete => {
                    r.complete += 1;
                    if *insights > 0 {
                        r.complete_with_insights += 1;
                    }
                }
            }
        }
        r
    }

    pub fn all_discovered_resolved(&self) -> bool {
        self.discovered > 0 && self.pending == 0
    }

    pub fn has_viable_content(&self) -> bool {
        self.complete_with_insights > 0
    }

    pub fn all_failed(&self) -> bool {
        self.all_discovered_resolved() && self.complete == 0
    }

    pub fn ready_to_summarize(&self) -> bool {
        self.all_discovered_resolved() && (self.has_viable_content() || self.all_failed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ItemStatus::*;

    #[test]
    fn mixed_outcomes_are_ready_once_resolved() {
        let r = SearchReadiness::tally(&[(Complete, 3), (Complete, 1), (Failed, 0)]);
        assert!(r.all_discovered_resolved());
        assert!(r.has_viable_content());
        assert!(!r.all_failed());
        assert!(r.ready_to_summarize());
    }

    #[test]
    fn all_failed_is_ready_for_the_failure_path() {
        let r = SearchReadiness::tally(&[(Failed, 0), (Failed, 0)]);
        assert!(r.all_failed());
        assert!(r.ready_to_summarize());
        assert!(!r.has_viable_content());
    }

    #[test]
    fn any_pending_blocks_readiness() {
        let r = SearchReadiness::tally(&[(Complete, 2), (Pending, 0)]);
        assert!(!r.all_discovered_resolved());
        assert!(!r.ready_to_summarize());
    }

    #[test]
    fn complete_without_insights_is_not_yet_viable() {
        let r = SearchReadiness::tally(&[(Complete, 0), (Failed, 0)]);
        assert!(r.all_discovered_resolved());
        assert!(!r.has_viable_content());
        assert!(!r.all_failed());
        assert!(!r.ready_to_summarize());
    }

    #[test]
    fn empty_discovered_set_is_never_ready() {
        let r = SearchReadiness::tally(&[]);
        assert!(!r.all_discovered_resolved());
        assert!(!r.ready_to_summarize());
    }
}
