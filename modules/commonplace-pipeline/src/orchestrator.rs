//! Stage dispatch and the shared readiness plumbing.
//!
//! Every stage is keyed by an id, delivered at least once, and guarded by
//! status checks so duplicate delivery is harmless. The per-stage handlers
//! live in the `ingest`, `insights`, `search`, and `summarize` modules.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};
use uuid::Uuid;

use commonplace_common::{CommonplaceError, FailureReason, ItemStatus, SearchStatus, Stage};

use crate::deps::PipelineDeps;
use crate::readiness::SearchReadiness;

pub struct Orchestrator {
    pub(crate) deps: Arc<PipelineDeps>,
}

impl Orchestrator {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    pub async fn dispatch(&self, stage: Stage, id: Uuid) -> Result<()> {
        info!(stage = %stage, %id, "Running pipeline stage");
        match stage {
            Stage::IngestArticle => self.ingest_article(id).await,
            Stage::DeriveInsights => self.derive_insights(id).await,
            Stage::DeriveSearches => self.derive_searches(id).await,
            Stage::RunSearch => self.run_search(id).await,
            Stage::SummarizeSearch => self.summarize_search(id).await,
            Stage::RegenerateParent => self.deps.hierarchy.regenerate_metadata(id).await,
        }
    }

    /// Last-resort handling once a stage has exhausted its deliveries:
    /// record a terminal failure so dependent searches are not starved.
    pub async fn abandon(&self, stage: Stage, id: Uuid, error: &anyhow::Error) -> Result<()> {
        match stage {
            Stage::IngestArticle => {
                let Some(mut article) = self.deps.items.get(id).await? else {
                    return Ok(());
                };
                if article.status.is_terminal() {
                    return Ok(());
                }
                article.status = ItemStatus::Failed;
                article.failure = Some(match error.downcast_ref::<CommonplaceError>() {
                    Some(CommonplaceError::Crawl(_)) => FailureReason::Network,
                    _ => FailureReason::Unknown,
                });
                self.deps.items.update(&article).await?;
                self.notify_searches_for_article(id).await?;
            }
            Stage::RunSearch | Stage::SummarizeSearch => {
                self.deps
                    .searches
                    .advance_status(id, SearchStatus::Failed)
                    .await?;
            }
            // derivation and regeneration leave completed items in place
            Stage::DeriveInsights | Stage::DeriveSearches | Stage::RegenerateParent => {}
        }
        Ok(())
    }

    /// Snapshot readiness for one search from its discovered articles.
    pub(crate) async fn readiness_for(&self, search_id: Uuid) -> Result<SearchReadiness> {
        let articles = self.deps.searches.discovered_articles(search_id).await?;
        let mut snapshot = Vec::with_capacity(articles.len());
        for article in &articles {
            let insights = self.deps.items.insights_of_article(article.id).await?;
            snapshot.push((article.status, insights.len()));
        }
        Ok(SearchReadiness::tally(&snapshot))
    }

    /// Re-check every in-flight search that discovered this article and
    /// queue summarization for any that just became ready.
    pub(crate) async fn notify_searches_for_article(&self, article_id: Uuid) -> Result<()> {
        for unit in self.deps.searches.searches_containing(article_id).await? {
            if unit.status != SearchStatus::Searching {
                continue;
            }
            let readiness = self.readiness_for(unit.id).await?;
            if readiness.ready_to_summarize() {
                debug!(search = %unit.id, "Search became ready to summarize");
                self.deps
                    .queue
                    .enqueue(Stage::SummarizeSearch, unit.id, None)
                    .await?;
            }
        }
        Ok(())
    }
}
