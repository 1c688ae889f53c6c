//! Hierarchy maintenance: absorbing a new item into the flat parent/child
//! structure and regenerating a parent's canonical metadata after its
//! membership changes.
//!
//! Absorption is optimistic. All LLM and embedding calls happen outside the
//! store's compare-and-set writes; a lost race restarts the whole attempt
//! against fresh state, bounded by `MAX_ABSORB_ATTEMPTS`.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use uuid::Uuid;

use commonplace_common::{
    CanonicalSynthesizer, CommonplaceError, Item, ItemKind, ItemStatus, JobQueue, SamenessJudge,
    SourceRef, Stage, TextEmbedder,
};

use crate::adjudicator::{MergeAdjudicator, MergePolicy};
use crate::store::{AdoptOutcome, ItemStore, Neighbor, SearchStore};

const CANDIDATE_LIMIT: usize = 5;
const MAX_ABSORB_ATTEMPTS: usize = 3;

/// What absorbing an item into the hierarchy did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsorbOutcome {
    /// The item is already a child or carries no embedding.
    Skipped,
    NoMatch,
    JoinedParent(Uuid),
    SynthesizedParent(Uuid),
}

pub struct HierarchyManager {
    store: Arc<dyn ItemStore>,
    searches: Arc<dyn SearchStore>,
    judge: Arc<dyn SamenessJudge>,
    synthesizer: Arc<dyn CanonicalSynthesizer>,
    embedder: Arc<dyn TextEmbedder>,
    queue: Arc<dyn JobQueue>,
}

impl HierarchyManager {
    pub fn new(
        store: Arc<dyn ItemStore>,
        searches: Arc<dyn SearchStore>,
        judge: Arc<dyn SamenessJudge>,
        synthesizer: Arc<dyn CanonicalSynthesizer>,
        embedder: Arc<dyn TextEmbedder>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            store,
            searches,
            judge,
            synthesizer,
            embedder,
            queue,
        }
    }

    /// Try to merge `item` with an existing same-kind parent or peer.
    ///
    /// Match order follows proximity: existing parents first, then
    /// standalone peers. Insights never match insights of the same source
    /// article.
    pub async fn absorb(&self, item: &Item) -> Result<AbsorbOutcome> {
        let Some(embedding) = item.embedding.clone() else {
            return Ok(AbsorbOutcome::Skipped);
        };

        let exclude_article = match item.kind {
            ItemKind::Insight => item.article_id,
            ItemKind::Article => None,
        };
        let adjudicator =
            MergeAdjudicator::new(MergePolicy::for_kind(item.kind), self.judge.clone());

        'attempts: for attempt in 0..MAX_ABSORB_ATTEMPTS {
            let current = self
                .store
                .get(item.id)
                .await?
                .ok_or_else(|| CommonplaceError::Store(format!("item {} missing", item.id)))?;
            if current.is_child() || !self.store.children_of(item.id).await?.is_empty() {
                return Ok(AbsorbOutcome::Skipped);
            }

            let parents = self
                .store
                .nearest_parents(item.kind, &embedding, item.id, exclude_article, CANDIDATE_LIMIT)
                .await?;
            for candidate in self.within_threshold(&adjudicator, parents) {
                if adjudicator
                    .is_match(item, &candidate.item, candidate.distance)
                    .await?
                {
                    match self.store.adopt(item.id, candidate.item.id).await? {
                        AdoptOutcome::Linked => {
                            info!(
                                item = %item.id,
                                parent = %candidate.item.id,
                                "Item joined existing parent"
                            );
                            // the link is committed; a transient synthesis or
                            // embedding failure must not leave the parent
                            // stale, so the retry goes through the queue
                            if let Err(e) = self.regenerate_metadata(candidate.item.id).await {
                                warn!(
                                    parent = %candidate.item.id,
                                    error = %e,
                                    "Regeneration failed after link; queuing retry"
                                );
                                self.queue
                                    .enqueue(Stage::RegenerateParent, candidate.item.id, None)
                                    .await?;
                            }
                            return Ok(AbsorbOutcome::JoinedParent(candidate.item.id));
                        }
                        AdoptOutcome::LostRace => {
                            warn!(item = %item.id, attempt, "Lost adoption race; retrying");
                            continue 'attempts;
                        }
                    }
                }
            }

            let peers = self
                .store
                .nearest_peers(item.kind, &embedding, item.id, exclude_article, CANDIDATE_LIMIT)
                .await?;
            for candidate in self.within_threshold(&adjudicator, peers) {
                if adjudicator
                    .is_match(item, &candidate.item, candidate.distance)
                    .await?
                {
                    let parent = self.build_parent(item, &candidate.item).await?;
                    match self
                        .store
                        .create_parent(parent, item.id, candidate.item.id)
                        .await?
                    {
                        Some(parent) => {
                            info!(
                                item = %item.id,
                                peer = %candidate.item.id,
                                parent = %parent.id,
                                "Synthesized new parent for matched peers"
                            );
                            self.queue
                                .enqueue(Stage::DeriveSearches, parent.id, None)
                                .await?;
                            return Ok(AbsorbOutcome::SynthesizedParent(parent.id));
                        }
                        None => {
                            warn!(item = %item.id, attempt, "Lost parent-creation race; retrying");
                            continue 'attempts;
                        }
                    }
                }
            }

            return Ok(AbsorbOutcome::NoMatch);
        }

        Err(CommonplaceError::HierarchyConflict(format!(
            "absorb for item {} exhausted {MAX_ABSORB_ATTEMPTS} attempts",
            item.id
        ))
        .into())
    }

    fn within_threshold(
        &self,
        adjudicator: &MergeAdjudicator,
        neighbors: Vec<Neighbor>,
    ) -> impl Iterator<Item = Neighbor> {
        let threshold = adjudicator.policy().distance_threshold;
        neighbors.into_iter().filter(move |n| n.distance < threshold)
    }

    async fn build_parent(&self, a: &Item, b: &Item) -> Result<Item> {
        let fields = self
            .synthesizer
            .synthesize(a.kind, &[a.clone(), b.clone()])
            .await?;
        let embedding = self.embedder.embed(&fields.summary).await?;

        let mut parent = Item::new(a.kind, fields.title);
        parent.status = ItemStatus::Complete;
        parent.summary = fields.summary;
        parent.snippet = fields.snippet;
        parent.image_url = fields
            .image_url
            .or_else(|| a.image_url.clone())
            .or_else(|| b.image_url.clone());
        parent.embedding = Some(embedding);
        Ok(parent)
    }

    /// Re-synthesize a parent's canonical fields from its current children,
    /// re-embed it, and retire searches derived from the stale metadata.
    /// Safe to run repeatedly.
    pub async fn regenerate_metadata(&self, parent_id: Uuid) -> Result<()> {
        let Some(mut parent) = self.store.get(parent_id).await? else {
            return Err(CommonplaceError::Store(format!("parent {parent_id} missing")).into());
        };
        let children = self.store.children_of(parent_id).await?;
        if children.is_empty() {
            return Ok(());
        }

        let fields = self.synthesizer.synthesize(parent.kind, &children).await?;
        parent.title = fields.title;
        parent.summary = fields.summary;
        parent.snippet = fields.snippet;
        parent.image_url = fields
            .image_url
            .or(parent.image_url)
            .or_else(|| children.iter().find_map(|c| c.image_url.clone()));
        parent.embedding = Some(self.embedder.embed(&parent.summary).await?);
        self.store.update(&parent).await?;

        let source = SourceRef::for_item(&parent);
        let retired = self.searches.delete_pending_for_source(source).await?;
        if retired > 0 {
            info!(parent = %parent_id, retired, "Retired stale pending searches");
        }
        self.queue
            .enqueue(Stage::DeriveSearches, parent_id, None)
            .await?;

        Ok(())
    }
}
