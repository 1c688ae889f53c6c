//! Insight derivation: extract key ideas from a completed article, absorb
//! each into the insight hierarchy, and record the research questions they
//! raise.

use anyhow::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use commonplace_common::{Item, ItemKind, ItemStatus, SearchUnit, SourceRef};

use crate::orchestrator::Orchestrator;

/// Research questions recorded per insight.
const MAX_QUERIES_PER_INSIGHT: usize = 2;

impl Orchestrator {
    pub(crate) async fn derive_insights(&self, id: Uuid) -> Result<()> {
        let Some(article) = self.deps.items.get(id).await? else {
            warn!(%id, "Insight derivation requested for unknown article");
            return Ok(());
        };
        if article.kind != ItemKind::Article {
            warn!(%id, kind = %article.kind, "Insight derivation only applies to articles");
            return Ok(());
        }
        if article.status != ItemStatus::Complete {
            debug!(%id, status = %article.status, "Article not complete; skipping insights");
            return Ok(());
        }

        if self.deps.items.insights_of_article(id).await?.is_empty() {
            let text = article.text.as_deref().unwrap_or(&article.summary);
            let drafts = self.deps.analyst.extract_insights(text).await?;
            info!(%id, count = drafts.len(), "Extracted insights");

            // all embeddings up front: a transient embedding failure aborts
            // before any insight is inserted, so the retry sees an empty set
            // and re-derives the full batch
            let bodies: Vec<String> = drafts.iter().map(|d| d.body.clone()).collect();
            let embeddings = self.deps.embedder.embed_batch(&bodies).await?;

            let mut inserted = Vec::with_capacity(drafts.len());
            for (draft, embedding) in drafts.into_iter().zip(embeddings) {
                let mut insight = Item::new(ItemKind::Insight, draft.title);
                insight.summary = draft.body;
                insight.snippet = draft.snippet;
                insight.article_id = Some(id);
                insight.embedding = Some(embedding);
                insight.status = ItemStatus::Complete;
                let insight = self.deps.items.insert(insight).await?;

                // recorded as pending research threads; run on demand
                for query in draft.queries.into_iter().take(MAX_QUERIES_PER_INSIGHT) {
                    self.deps
                        .searches
                        .insert(SearchUnit::new(query, Some(SourceRef::Insight(insight.id))))
                        .await?;
                }
                inserted.push(insight);
            }

            // merging is best-effort: a standalone insight still merges when
            // a later peer's absorb finds it
            for insight in &inserted {
                if let Err(e) = self.deps.hierarchy.absorb(insight).await {
                    warn!(insight = %insight.id, error = %e, "Insight absorb failed; leaving standalone");
                }
            }
        } else {
            debug!(%id, "Insights already derived; skipping extraction");
        }

        // searches waiting on this article's insights may be ready now
        self.notify_searches_for_article(id).await?;
        Ok(())
    }
}
