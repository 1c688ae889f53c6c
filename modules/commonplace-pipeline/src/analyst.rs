//! Live collaborator implementations: the LLM content analyst and the Exa
//! search/crawl adapters.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::warn;

use commonplace_common::{
    ArticleMetadata, ContentAnalyst, ContentClass, ContentEvaluation, CrawledPage, Crawler,
    InsightDraft, SearchDigest, SearchHit, WebSearcher,
};
use exa_client::ExaClient;
use llm_client::LlmClient;

pub struct LlmContentAnalyst {
    client: LlmClient,
}

impl LlmContentAnalyst {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

const EVALUATE_SYSTEM: &str = "You classify scraped web page text. Decide whether it is the full \
content, an academic paper, a partial rendering, an abstract with the body elsewhere, a video or \
podcast page, a paywall stub, or a bot-blocked error page. For abstracts, report any full-text, \
PDF, or DOI link present in the text.";

#[derive(Debug, Deserialize, JsonSchema)]
struct EvaluationAnswer {
    /// One of: full, paper, partial, abstract, video, podcast, paywall, blocked.
    content_class: String,
    is_academic_paper: bool,
    full_text_url: Option<String>,
}

const METADATA_SYSTEM: &str = "You extract bibliographic metadata from article text: the real \
title, the author's name if stated, and the publication date as an RFC 3339 timestamp. Leave \
fields null rather than guessing.";

#[derive(Debug, Deserialize, JsonSchema)]
struct MetadataAnswer {
    title: Option<String>,
    author: Option<String>,
    /// RFC 3339, e.g. 2024-06-01T00:00:00Z.
    published_at: Option<String>,
}

const SUMMARIZE_SYSTEM: &str = "You distill an article into its key idea in 200-300 characters. \
State what the work claims or shows, not that the article discusses it.";

#[derive(Debug, Deserialize, JsonSchema)]
struct SummaryAnswer {
    summary: String,
}

const INSIGHTS_SYSTEM: &str = "You extract the distinct substantive insights from an article: \
concrete claims, findings, or arguments worth remembering on their own. For each, give a short \
title, a 200-300 character body in your own words, an optional supporting quote, and up to two \
research questions it raises.";

#[derive(Debug, Deserialize, JsonSchema)]
struct InsightAnswer {
    title: String,
    body: String,
    snippet: Option<String>,
    queries: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct InsightsAnswer {
    insights: Vec<InsightAnswer>,
}

const MACHINE_QUERY_SYSTEM: &str = "You turn a research question into one concise web search \
query: the key terms only, no filler words.";

#[derive(Debug, Deserialize, JsonSchema)]
struct MachineQueryAnswer {
    query: String,
}

const RESEARCH_QUERIES_SYSTEM: &str = "You read a piece of content and propose the most valuable \
follow-up research questions: specific, answerable by finding further articles, and not already \
answered by the content itself.";

#[derive(Debug, Deserialize, JsonSchema)]
struct ResearchQueriesAnswer {
    queries: Vec<String>,
}

const SELECT_SYSTEM: &str = "You pick the 1-3 search results most likely to substantively answer \
a research question. Prefer primary sources and diverse perspectives; skip duplicates, link farms, \
and results that merely mention the topic.";

#[derive(Debug, Deserialize, JsonSchema)]
struct SelectionAnswer {
    /// URLs of the chosen results, best first.
    urls: Vec<String>,
}

const DIGEST_SYSTEM: &str = "You synthesize research findings into an answer to a question. \
Produce a few-paragraph summary of what the sources established, a one-sentence snippet, and up \
to two follow-up questions the findings leave open.";

#[derive(Debug, Deserialize, JsonSchema)]
struct DigestAnswer {
    summary: String,
    snippet: Option<String>,
    followup_queries: Vec<String>,
}

#[async_trait]
impl ContentAnalyst for LlmContentAnalyst {
    async fn evaluate_content(&self, url: &str, text: &str) -> Result<ContentEvaluation> {
        let prompt = format!("URL: {url}\n\nPage text:\n{text}");
        let answer: EvaluationAnswer = self.client.extract(EVALUATE_SYSTEM, &prompt).await?;
        Ok(ContentEvaluation {
            class: ContentClass::from_str_loose(&answer.content_class),
            is_academic_paper: answer.is_academic_paper,
            full_text_url: answer.full_text_url,
        })
    }

    async fn extract_metadata(&self, url: &str, text: &str) -> Result<ArticleMetadata> {
        let prompt = format!("URL: {url}\n\nArticle text:\n{text}");
        let answer: MetadataAnswer = self.client.extract(METADATA_SYSTEM, &prompt).await?;

        let published_at = answer.published_at.and_then(|raw| {
            match DateTime::parse_from_rfc3339(&raw) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(e) => {
                    warn!(raw, error = %e, "Unparseable publication date");
                    None
                }
            }
        });

        Ok(ArticleMetadata {
            title: answer.title,
            author: answer.author,
            published_at,
        })
    }

    async fn summarize_article(&self, text: &str) -> Result<String> {
        let answer: SummaryAnswer = self.client.extract(SUMMARIZE_SYSTEM, text).await?;
        Ok(answer.summary)
    }

    async fn extract_insights(&self, text: &str) -> Result<Vec<InsightDraft>> {
        let answer: InsightsAnswer = self.client.extract(INSIGHTS_SYSTEM, text).await?;
        Ok(answer
            .insights
            .into_iter()
            .map(|i| InsightDraft {
                title: i.title,
                body: i.body,
                snippet: i.snippet,
                queries: i.queries,
            })
            .collect())
    }

    async fn derive_search_query(&self, context: &str) -> Result<String> {
        let answer: MachineQueryAnswer =
            self.client.extract(MACHINE_QUERY_SYSTEM, context).await?;
        Ok(answer.query)
    }

    async fn derive_research_queries(&self, context: &str, count: usize) -> Result<Vec<String>> {
        let prompt = format!("Propose up to {count} research questions for:\n\n{context}");
        let answer: ResearchQueriesAnswer =
            self.client.extract(RESEARCH_QUERIES_SYSTEM, &prompt).await?;
        Ok(answer.queries.into_iter().take(count).collect())
    }

    async fn select_results(
        &self,
        query: &str,
        context: &str,
        candidates: &[SearchHit],
    ) -> Result<Vec<SearchHit>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut prompt = format!("Research question: {query}\n");
        if !context.is_empty() {
            prompt.push_str(&format!("Context:\n{context}\n"));
        }
        prompt.push_str("\nCandidates:\n");
        for hit in candidates {
            prompt.push_str(&format!(
                "- {} ({})\n",
                hit.title.as_deref().unwrap_or("untitled"),
                hit.url
            ));
        }

        let answer: SelectionAnswer = self.client.extract(SELECT_SYSTEM, &prompt).await?;
        Ok(answer
            .urls
            .iter()
            .filter_map(|url| candidates.iter().find(|h| &h.url == url).cloned())
            .collect())
    }

    async fn digest_search(&self, content: &str) -> Result<SearchDigest> {
        let answer: DigestAnswer = self.client.extract(DIGEST_SYSTEM, content).await?;
        Ok(SearchDigest {
            summary: answer.summary,
            snippet: answer.snippet,
            followup_queries: answer.followup_queries,
        })
    }
}

// --- Exa adapters ---

const WEB_RESULTS: usize = 10;

pub struct ExaSearcher {
    client: ExaClient,
}

impl ExaSearcher {
    pub fn new(client: ExaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebSearcher for ExaSearcher {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let results = self.client.search(query, WEB_RESULTS).await?;
        Ok(results
            .into_iter()
            .map(|r| SearchHit {
                url: r.url,
                title: r.title,
            })
            .collect())
    }
}

pub struct ExaCrawler {
    client: ExaClient,
}

impl ExaCrawler {
    pub fn new(client: ExaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Crawler for ExaCrawler {
    async fn crawl(&self, url: &str) -> Result<CrawledPage> {
        let result = self
            .client
            .contents(url)
            .await?
            .ok_or_else(|| anyhow!("no content returned for {url}"))?;
        let text = result
            .text
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow!("empty page text for {url}"))?;
        Ok(CrawledPage {
            text,
            image_url: result.image,
        })
    }
}
