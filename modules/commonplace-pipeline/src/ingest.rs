//! Article ingestion: crawl, classify, summarize, embed, absorb.

use anyhow::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use commonplace_common::{
    CommonplaceError, ContentClass, FailureReason, ItemStatus, Stage,
};
use commonplace_library::AbsorbOutcome;

use crate::orchestrator::Orchestrator;

/// A followed full-text page must beat the abstract by this factor to
/// replace it.
const FULL_TEXT_MIN_GAIN: usize = 2;

impl Orchestrator {
    pub(crate) async fn ingest_article(&self, id: Uuid) -> Result<()> {
        let Some(mut article) = self.deps.items.get(id).await? else {
            warn!(%id, "Ingest requested for unknown article");
            return Ok(());
        };
        if article.status.is_terminal() {
            debug!(%id, status = %article.status, "Article already resolved; skipping ingest");
            return Ok(());
        }
        let url = article
            .url
            .clone()
            .ok_or_else(|| CommonplaceError::Validation(format!("article {id} has no url")))?;

        // transient crawl errors propagate so the retry re-enters the stage
        let page = self
            .deps
            .crawler
            .crawl(&url)
            .await
            .map_err(|e| CommonplaceError::Crawl(format!("{url}: {e}")))?;

        if page.text.trim().is_empty() {
            info!(%id, "Crawled page has no text");
            article.status = ItemStatus::Failed;
            article.failure = Some(FailureReason::Unusable);
            self.deps.items.update(&article).await?;
            self.notify_searches_for_article(id).await?;
            return Ok(());
        }

        let evaluation = self.deps.analyst.evaluate_content(&url, &page.text).await?;

        if evaluation.class.is_unusable() {
            info!(%id, class = %evaluation.class, "Article content is unreachable");
            article.content_class = Some(evaluation.class);
            article.status = ItemStatus::Failed;
            article.failure = Some(FailureReason::AccessDenied);
            self.deps.items.update(&article).await?;
            // failed still counts as resolved for dependent searches
            self.notify_searches_for_article(id).await?;
            return Ok(());
        }

        let mut text = page.text;
        let mut image_url = page.image_url;
        let mut class = evaluation.class;

        // abstracts that link to the full text are worth one extra fetch
        if class == ContentClass::Abstract {
            if let Some(full_url) = &evaluation.full_text_url {
                match self.deps.crawler.crawl(full_url).await {
                    Ok(full_page) if full_page.text.len() >= text.len() * FULL_TEXT_MIN_GAIN => {
                        debug!(%id, full_url, "Followed abstract to full text");
                        text = full_page.text;
                        image_url = full_page.image_url.or(image_url);
                        class = if evaluation.is_academic_paper {
                            ContentClass::Paper
                        } else {
                            ContentClass::Full
                        };
                    }
                    Ok(_) => {
                        debug!(%id, full_url, "Full-text page no longer than abstract; keeping abstract");
                    }
                    Err(e) => {
                        warn!(%id, full_url, error = %e, "Full-text follow failed; keeping abstract");
                    }
                }
            }
        }

        let metadata = self.deps.analyst.extract_metadata(&url, &text).await?;
        if let Some(title) = metadata.title {
            article.title = title;
        }
        article.author = metadata.author.or(article.author.take());
        article.published_at = metadata.published_at.or(article.published_at);
        article.summary = self.deps.analyst.summarize_article(&text).await?;
        article.text = Some(text);
        article.image_url = image_url.or(article.image_url.take());
        article.content_class = Some(class);
        article.embedding = Some(self.deps.embedder.embed(&article.summary).await?);
        article.status = ItemStatus::Complete;
        self.deps.items.update(&article).await?;

        // the article is already committed; a failed absorb must not cost
        // the downstream enqueues, and a later peer's absorb can still
        // merge this item
        let outcome = match self.deps.hierarchy.absorb(&article).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%id, error = %e, "Absorb failed; leaving article standalone");
                AbsorbOutcome::NoMatch
            }
        };
        info!(%id, ?outcome, "Article ingested");

        self.deps.queue.enqueue(Stage::DeriveInsights, id, None).await?;
        // a child's follow-up searches flow from its parent's regeneration
        let became_child = matches!(
            outcome,
            AbsorbOutcome::JoinedParent(_) | AbsorbOutcome::SynthesizedParent(_)
        );
        if !became_child {
            self.deps.queue.enqueue(Stage::DeriveSearches, id, None).await?;
        }

        self.notify_searches_for_article(id).await?;
        Ok(())
    }
}
