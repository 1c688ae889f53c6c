//! Collaborator traits for everything outside the core: embeddings, the
//! sameness oracle, canonical synthesis, content analysis, web search,
//! crawling, and the background-job scheduler.
//!
//! Live implementations sit in the llm-client/exa-client consumers; tests
//! substitute deterministic fakes.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{ContentClass, Item, ItemKind, Stage};

/// Dyn-compatible embedding service. May fail transiently.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Verdict from the external "same underlying work" oracle.
#[derive(Debug, Clone)]
pub struct SamenessVerdict {
    pub same: bool,
    pub reason: String,
}

/// One stateless confirmatory call comparing two same-kind items.
/// Failures are the caller's problem; the adjudicator fails closed.
#[async_trait]
pub trait SamenessJudge: Send + Sync {
    async fn judge(&self, a: &Item, b: &Item) -> Result<SamenessVerdict>;
}

/// Canonical fields synthesized for a merged parent from its children.
#[derive(Debug, Clone)]
pub struct CanonicalFields {
    pub title: String,
    pub summary: String,
    pub snippet: Option<String>,
    pub image_url: Option<String>,
}

#[async_trait]
pub trait CanonicalSynthesizer: Send + Sync {
    async fn synthesize(&self, kind: ItemKind, children: &[Item]) -> Result<CanonicalFields>;
}

// --- Content analysis ---

#[derive(Debug, Clone)]
pub struct ContentEvaluation {
    pub class: ContentClass,
    pub is_academic_paper: bool,
    /// For abstracts: a "full text" / PDF / DOI link worth following.
    pub full_text_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ArticleMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct InsightDraft {
    pub title: String,
    pub body: String,
    pub snippet: Option<String>,
    /// Research questions this insight suggests exploring.
    pub queries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SearchDigest {
    pub summary: String,
    pub snippet: Option<String>,
    pub followup_queries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub text: String,
    pub image_url: Option<String>,
}

/// The LLM-backed analysis calls the pipeline stages depend on.
#[async_trait]
pub trait ContentAnalyst: Send + Sync {
    /// Classify scraped content (full/partial/abstract/paywall/...).
    async fn evaluate_content(&self, url: &str, text: &str) -> Result<ContentEvaluation>;

    /// Extract title/author/date from article text.
    async fn extract_metadata(&self, url: &str, text: &str) -> Result<ArticleMetadata>;

    /// Distill the article's key idea into a 200-300 character summary.
    async fn summarize_article(&self, text: &str) -> Result<String>;

    /// Extract key insights with supporting snippets and follow-up queries.
    async fn extract_insights(&self, text: &str) -> Result<Vec<InsightDraft>>;

    /// Derive a concise machine search query from a research context.
    async fn derive_search_query(&self, context: &str) -> Result<String>;

    /// Derive up to `count` research questions to explore a topic further.
    async fn derive_research_queries(&self, context: &str, count: usize) -> Result<Vec<String>>;

    /// Select the 1-3 candidate results that best answer the question.
    async fn select_results(
        &self,
        query: &str,
        context: &str,
        candidates: &[SearchHit],
    ) -> Result<Vec<SearchHit>>;

    /// Synthesize search results into a summary/snippet/follow-up digest.
    async fn digest_search(&self, content: &str) -> Result<SearchDigest>;
}

/// Web search provider.
#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// Content fetcher for a single URL.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(&self, url: &str) -> Result<CrawledPage>;
}

/// Asynchronous work scheduler with at-least-once delivery. Handlers must
/// tolerate duplicate delivery via status guards.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, stage: Stage, id: Uuid, delay: Option<Duration>) -> Result<()>;
}
