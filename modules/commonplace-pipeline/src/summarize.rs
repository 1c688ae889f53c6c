//! Search summarization: once every discovered article has resolved,
//! synthesize an answer from the complete articles, their insights, and
//! nearby library content.

use anyhow::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use commonplace_common::{ItemStatus, SearchStatus, SearchUnit, SourceRef, Stage};

use crate::orchestrator::Orchestrator;

/// Insights rolled into the digest per article.
const MAX_INSIGHTS_PER_ARTICLE: usize = 5;

/// Related library items added as context.
const MAX_RELATED_ITEMS: usize = 5;

/// Follow-up searches spawned from a completed summary.
const MAX_FOLLOWUP_SEARCHES: usize = 2;

impl Orchestrator {
    pub(crate) async fn summarize_search(&self, id: Uuid) -> Result<()> {
        let Some(mut unit) = self.deps.searches.get(id).await? else {
            warn!(%id, "Summarize requested for unknown search");
            return Ok(());
        };
        if unit.status.is_terminal() {
            debug!(%id, status = %unit.status, "Search already resolved; skipping summarize");
            return Ok(());
        }

        let readiness = self.readiness_for(id).await?;
        if !readiness.ready_to_summarize() {
            debug!(%id, ?readiness, "Search not ready; awaiting next trigger");
            return Ok(());
        }

        if readiness.all_failed() {
            info!(%id, "Every discovered article failed; failing search");
            self.deps
                .searches
                .advance_status(id, SearchStatus::Failed)
                .await?;
            return Ok(());
        }

        let digest_input = self.build_digest_input(&unit).await?;
        let digest = self.deps.analyst.digest_search(&digest_input).await?;

        unit.summary = Some(digest.summary.clone());
        unit.snippet = digest.snippet;
        unit.embedding = Some(self.deps.embedder.embed(&digest.summary).await?);
        self.deps.searches.update(&unit).await?;
        self.deps
            .searches
            .advance_status(id, SearchStatus::Complete)
            .await?;
        info!(%id, "Search summarized");

        // follow-ups carry the original provenance; top-level searches
        // chain through a Search source
        let followup_source = unit.source.or(Some(SourceRef::Search(id)));
        for query in digest
            .followup_queries
            .into_iter()
            .take(MAX_FOLLOWUP_SEARCHES)
        {
            let followup = self
                .deps
                .searches
                .insert(SearchUnit::new(query, followup_source))
                .await?;
            self.deps
                .queue
                .enqueue(Stage::RunSearch, followup.id, None)
                .await?;
        }
        Ok(())
    }

    async fn build_digest_input(&self, unit: &SearchUnit) -> Result<String> {
        let articles = self.deps.searches.discovered_articles(unit.id).await?;

        let mut input = format!("Research question: {}\n\n", unit.query);
        for article in articles.iter().filter(|a| a.status == ItemStatus::Complete) {
            input.push_str(&format!("## {}\n{}\n", article.title, article.summary));
            for insight in self
                .deps
                .items
                .insights_of_article(article.id)
                .await?
                .into_iter()
                .take(MAX_INSIGHTS_PER_ARTICLE)
            {
                input.push_str(&format!("- {}: {}\n", insight.title, insight.summary));
            }
            input.push('\n');
        }

        if let Some(embedding) = &unit.search_query_embedding {
            let exclude: Vec<Uuid> = articles.iter().map(|a| a.id).collect();
            let related = self
                .deps
                .related
                .related(embedding, &exclude, MAX_RELATED_ITEMS)
                .await?;
            if !related.is_empty() {
                input.push_str("Already in the library:\n");
                for neighbor in related {
                    input.push_str(&format!(
                        "- {}: {}\n",
                        neighbor.item.title, neighbor.item.summary
                    ));
                }
            }
        }

        Ok(input)
    }
}
