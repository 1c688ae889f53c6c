//! Search derivation and execution.

use anyhow::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use commonplace_common::{
    Item, ItemStatus, Origin, SearchStatus, SearchUnit, SourceRef, Stage,
};

use crate::orchestrator::Orchestrator;

/// Follow-up searches derived per source item.
const MAX_SEARCHES_PER_SOURCE: usize = 2;

/// Raw web results offered to the result selector.
const SEARCH_CANDIDATES: usize = 10;

/// Selected results actually ingested per search.
const MAX_SELECTED_RESULTS: usize = 3;

impl Orchestrator {
    /// Derive follow-up research questions for a completed item and start a
    /// search for each.
    pub(crate) async fn derive_searches(&self, id: Uuid) -> Result<()> {
        let Some(item) = self.deps.items.get(id).await? else {
            warn!(%id, "Search derivation requested for unknown item");
            return Ok(());
        };
        if item.status != ItemStatus::Complete {
            debug!(%id, status = %item.status, "Item not complete; skipping search derivation");
            return Ok(());
        }

        let source = SourceRef::for_item(&item);
        if !self.deps.searches.searches_for_source(source).await?.is_empty() {
            debug!(%id, "Searches already derived for source; skipping");
            return Ok(());
        }

        let context = format!("{}\n\n{}", item.title, item.summary);
        let queries = self
            .deps
            .analyst
            .derive_research_queries(&context, MAX_SEARCHES_PER_SOURCE)
            .await?;

        for query in queries.into_iter().take(MAX_SEARCHES_PER_SOURCE) {
            let unit = self
                .deps
                .searches
                .insert(SearchUnit::new(query, Some(source)))
                .await?;
            self.deps.queue.enqueue(Stage::RunSearch, unit.id, None).await?;
            info!(%id, search = %unit.id, "Derived follow-up search");
        }
        Ok(())
    }

    /// Execute a search: derive the machine query, hit the web, select the
    /// best results, and register them as discovered articles.
    pub(crate) async fn run_search(&self, id: Uuid) -> Result<()> {
        let Some(mut unit) = self.deps.searches.get(id).await? else {
            warn!(%id, "Run requested for unknown search");
            return Ok(());
        };
        if unit.status.is_terminal() {
            debug!(%id, status = %unit.status, "Search already resolved; skipping run");
            return Ok(());
        }
        self.deps
            .searches
            .advance_status(id, SearchStatus::Searching)
            .await?;
        unit.status = SearchStatus::Searching;

        if unit.search_query.is_none() {
            let machine_query = self.deps.analyst.derive_search_query(&unit.query).await?;
            let embedding = self.deps.embedder.embed(&machine_query).await?;
            unit.search_query = Some(machine_query);
            unit.search_query_embedding = Some(embedding);
            self.deps.searches.update(&unit).await?;
        }
        let machine_query = unit.search_query.clone().unwrap_or_else(|| unit.query.clone());

        let mut hits = self.deps.web.search(&machine_query).await?;
        hits.truncate(SEARCH_CANDIDATES);

        let context = self.source_context(unit.source).await?;
        let selected = self
            .deps
            .analyst
            .select_results(&unit.query, &context, &hits)
            .await?;

        let mut discovered = 0usize;
        for hit in selected.into_iter().take(MAX_SELECTED_RESULTS) {
            let article = match self.deps.items.get_by_url(&hit.url).await? {
                Some(existing) => existing,
                None => {
                    self.deps
                        .items
                        .insert(Item::new_article(hit.url, hit.title, Origin::Discovered))
                        .await?
                }
            };
            self.deps.searches.add_membership(id, article.id).await?;
            discovered += 1;

            if article.status == ItemStatus::Pending {
                self.deps
                    .queue
                    .enqueue(Stage::IngestArticle, article.id, None)
                    .await?;
            }
        }

        if discovered == 0 {
            info!(%id, "Search selected no results; failing");
            self.deps
                .searches
                .advance_status(id, SearchStatus::Failed)
                .await?;
            return Ok(());
        }

        info!(%id, discovered, "Search discovered articles");

        // already-complete discoveries can make the search instantly ready
        if self.readiness_for(id).await?.ready_to_summarize() {
            self.deps
                .queue
                .enqueue(Stage::SummarizeSearch, id, None)
                .await?;
        }
        Ok(())
    }

    /// Summary of whatever spawned the search, for result selection.
    async fn source_context(&self, source: Option<SourceRef>) -> Result<String> {
        let Some(source) = source else {
            return Ok(String::new());
        };
        match source {
            SourceRef::Article(id) | SourceRef::Insight(id) => {
                Ok(match self.deps.items.get(id).await? {
                    Some(item) => format!("{}\n{}", item.title, item.summary),
                    None => String::new(),
                })
            }
            SourceRef::Search(id) => Ok(match self.deps.searches.get(id).await? {
                Some(parent) => parent.summary.unwrap_or(parent.query),
                None => String::new(),
            }),
        }
    }
}
