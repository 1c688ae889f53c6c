//! Merge adjudication: embedding distance gate, title-similarity gate, then
//! a confirmatory oracle call. The oracle fails closed.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use commonplace_common::{Item, ItemKind, SamenessJudge};

use crate::similarity::title_similarity;

const ARTICLE_DISTANCE_THRESHOLD: f32 = 0.30;
const INSIGHT_DISTANCE_THRESHOLD: f32 = 0.25;

const TITLE_SIMILARITY_BASE: f32 = 0.7;
const TITLE_SIMILARITY_RELAXED: f32 = 0.5;
/// Below this embedding distance the texts agree strongly enough that
/// title phrasing differences stop mattering.
const TITLE_RELAX_DISTANCE: f32 = 0.05;

/// Per-kind merge thresholds. Articles run the full gauntlet (distance,
/// title gate, oracle); insights merge on distance alone.
#[derive(Debug, Clone, Copy)]
pub struct MergePolicy {
    pub kind: ItemKind,
    pub distance_threshold: f32,
    pub title_gate: bool,
    pub consult_oracle: bool,
}

impl MergePolicy {
    pub fn article() -> Self {
        Self {
            kind: ItemKind::Article,
            distance_threshold: ARTICLE_DISTANCE_THRESHOLD,
            title_gate: true,
            consult_oracle: true,
        }
    }

    pub fn insight() -> Self {
        Self {
            kind: ItemKind::Insight,
            distance_threshold: INSIGHT_DISTANCE_THRESHOLD,
            title_gate: false,
            consult_oracle: false,
        }
    }

    pub fn for_kind(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Article => Self::article(),
            ItemKind::Insight => Self::insight(),
        }
    }

    fn required_title_similarity(&self, distance: f32) -> f32 {
        if distance < TITLE_RELAX_DISTANCE {
            TITLE_SIMILARITY_RELAXED
        } else {
            TITLE_SIMILARITY_BASE
        }
    }
}

/// Decides whether two same-kind items describe the same underlying work.
pub struct MergeAdjudicator {
    policy: MergePolicy,
    judge: Arc<dyn SamenessJudge>,
}

impl MergeAdjudicator {
    pub fn new(policy: MergePolicy, judge: Arc<dyn SamenessJudge>) -> Self {
        Self { policy, judge }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Full adjudication for a candidate at the given embedding distance.
    /// The oracle is only consulted once both cheap gates pass; an oracle
    /// failure counts as "not the same".
    pub async fn is_match(&self, item: &Item, candidate: &Item, distance: f32) -> Result<bool> {
        if distance >= self.policy.distance_threshold {
            return Ok(false);
        }

        if self.policy.title_gate {
            let title_sim = title_similarity(&item.title, &candidate.title);
            let required = self.policy.required_title_similarity(distance);
            if title_sim < required {
                debug!(
                    item = %item.id,
                    candidate = %candidate.id,
                    title_sim,
                    required,
                    "Title gate rejected merge candidate"
                );
                return Ok(false);
            }
        }

        if !self.policy.consult_oracle {
            return Ok(true);
        }

        match self.judge.judge(item, candidate).await {
            Ok(verdict) => {
                debug!(
                    item = %item.id,
                    candidate = %candidate.id,
                    same = verdict.same,
                    reason = %verdict.reason,
                    "Sameness verdict"
                );
                Ok(verdict.same)
            }
            Err(e) => {
                warn!(
                    item = %item.id,
                    candidate = %candidate.id,
                    error = %e,
                    "Sameness oracle failed; treating as distinct"
                );
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use commonplace_common::SamenessVerdict;

    struct FixedJudge {
        same: bool,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FixedJudge {
        fn answering(same: bool) -> Self {
            Self {
                same,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                same: true,
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SamenessJudge for FixedJudge {
        async fn judge(&self, _a: &Item, _b: &Item) -> Result<SamenessVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("oracle unavailable");
            }
            Ok(SamenessVerdict {
                same: self.same,
                reason: "test".to_string(),
            })
        }
    }

    fn item(title: &str) -> Item {
        Item::new(ItemKind::Article, title)
    }

    #[tokio::test]
    async fn distance_gate_skips_oracle() {
        let judge = Arc::new(FixedJudge::answering(true));
        let adj = MergeAdjudicator::new(MergePolicy::article(), judge.clone());

        let matched = adj
            .is_match(&item("same title"), &item("same title"), 0.31)
            .await
            .unwrap();

        assert!(!matched);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn distance_at_threshold_is_rejected() {
        let judge = Arc::new(FixedJudge::answering(true));
        let adj = MergeAdjudicator::new(MergePolicy::article(), judge.clone());

        let matched = adj
            .is_match(&item("same title"), &item("same title"), 0.30)
            .await
            .unwrap();
        assert!(!matched);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);

        let insight = MergeAdjudicator::new(MergePolicy::insight(), judge);
        assert!(!insight
            .is_match(&item("an idea"), &item("an idea"), 0.25)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn title_gate_skips_oracle() {
        let judge = Arc::new(FixedJudge::answering(true));
        let adj = MergeAdjudicator::new(MergePolicy::article(), judge.clone());

        let matched = adj
            .is_match(
                &item("scaling laws for language models"),
                &item("a field guide to mushrooms"),
                0.10,
            )
            .await
            .unwrap();

        assert!(!matched);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn title_gate_relaxes_at_tiny_distance() {
        let judge = Arc::new(FixedJudge::answering(true));
        let adj = MergeAdjudicator::new(MergePolicy::article(), judge.clone());

        // edit distance 4 over length 10: similarity 0.6, between the
        // relaxed gate (0.5) and the base gate (0.7)
        let a = item("aaaaaaaaaa");
        let b = item("aaaaaabbbb");
        let sim = crate::similarity::title_similarity(&a.title, &b.title);
        assert!((sim - 0.6).abs() < 1e-6);

        assert!(!adj.is_match(&a, &b, 0.10).await.unwrap());
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);

        assert!(adj.is_match(&a, &b, 0.01).await.unwrap());
        assert_eq!(judge.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oracle_no_is_final() {
        let judge = Arc::new(FixedJudge::answering(false));
        let adj = MergeAdjudicator::new(MergePolicy::article(), judge.clone());

        let matched = adj
            .is_match(&item("same title"), &item("same title"), 0.05)
            .await
            .unwrap();

        assert!(!matched);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oracle_failure_means_distinct() {
        let judge = Arc::new(FixedJudge::failing());
        let adj = MergeAdjudicator::new(MergePolicy::article(), judge);

        let matched = adj
            .is_match(&item("same title"), &item("same title"), 0.05)
            .await
            .unwrap();

        assert!(!matched);
    }

    #[tokio::test]
    async fn insights_merge_on_distance_alone() {
        let judge = Arc::new(FixedJudge::answering(false));
        let adj = MergeAdjudicator::new(MergePolicy::insight(), judge.clone());

        let matched = adj
            .is_match(
                &item("one phrasing of an idea"),
                &item("an entirely different phrasing"),
                0.20,
            )
            .await
            .unwrap();

        assert!(matched);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);

        assert!(!adj
            .is_match(&item("a"), &item("b"), 0.26)
            .await
            .unwrap());
    }
}
