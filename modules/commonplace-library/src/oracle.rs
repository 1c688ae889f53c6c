//! LLM-backed implementations of the embedding, sameness, and synthesis
//! collaborators.

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use commonplace_common::{
    CanonicalFields, CanonicalSynthesizer, Item, ItemKind, SamenessJudge, SamenessVerdict,
    TextEmbedder,
};
use llm_client::LlmClient;

pub struct LlmEmbedder {
    client: LlmClient,
}

impl LlmEmbedder {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TextEmbedder for LlmEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.client.embed_batch(texts).await
    }
}

// --- Sameness ---

const SAMENESS_SYSTEM: &str = "You compare two pieces of content from a research library and decide \
whether they describe the same underlying work or idea. Different sources covering the same paper, \
announcement, or event count as the same. Content that is merely about a similar topic does not.";

#[derive(Debug, Deserialize, JsonSchema)]
struct SamenessAnswer {
    /// Whether the two entries describe the same underlying work or idea.
    same_thing: bool,
    /// One sentence explaining the decision.
    reason: String,
}

pub struct LlmSamenessJudge {
    client: LlmClient,
}

impl LlmSamenessJudge {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }

    fn describe(item: &Item) -> String {
        let mut out = format!("Title: {}\n", item.title);
        if let Some(url) = &item.url {
            out.push_str(&format!("URL: {url}\n"));
        }
        out.push_str(&format!("Summary: {}\n", item.summary));
        out
    }
}

#[async_trait]
impl SamenessJudge for LlmSamenessJudge {
    async fn judge(&self, a: &Item, b: &Item) -> Result<SamenessVerdict> {
        let prompt = format!(
            "Entry A:\n{}\nEntry B:\n{}\nAre these the same underlying work?",
            Self::describe(a),
            Self::describe(b)
        );

        let answer: SamenessAnswer = self.client.extract(SAMENESS_SYSTEM, &prompt).await?;
        Ok(SamenessVerdict {
            same: answer.same_thing,
            reason: answer.reason,
        })
    }
}

// --- Canonical synthesis ---

const ARTICLE_SYNTHESIS_SYSTEM: &str = "You write the canonical entry for a group of articles that \
all cover the same underlying work. Produce a neutral title that names the work itself rather than \
any one outlet's headline, a 200-300 character summary of the work, and a one-sentence snippet.";

const INSIGHT_SYNTHESIS_SYSTEM: &str = "You write the canonical entry for a group of insights that \
all express the same underlying idea. Produce a title stating the idea, a 200-300 character summary \
that captures what every variant agrees on, and a one-sentence snippet.";

#[derive(Debug, Deserialize, JsonSchema)]
struct CanonicalAnswer {
    title: String,
    summary: String,
    snippet: Option<String>,
}

pub struct LlmCanonicalSynthesizer {
    client: LlmClient,
}

impl LlmCanonicalSynthesizer {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CanonicalSynthesizer for LlmCanonicalSynthesizer {
    async fn synthesize(&self, kind: ItemKind, children: &[Item]) -> Result<CanonicalFields> {
        let system = match kind {
            ItemKind::Article => ARTICLE_SYNTHESIS_SYSTEM,
            ItemKind::Insight => INSIGHT_SYNTHESIS_SYSTEM,
        };

        let mut prompt = String::new();
        for (i, child) in children.iter().enumerate() {
            prompt.push_str(&format!(
                "Entry {}:\nTitle: {}\nSummary: {}\n\n",
                i + 1,
                child.title,
                child.summary
            ));
        }
        prompt.push_str("Write the canonical entry for this group.");

        let answer: CanonicalAnswer = self.client.extract(system, &prompt).await?;
        Ok(CanonicalFields {
            title: answer.title,
            summary: answer.summary,
            snippet: answer.snippet,
            image_url: None,
        })
    }
}
