//! End-to-end pipeline flows over the in-memory store with deterministic
//! collaborators. Jobs are drained synchronously so each test controls the
//! full cascade.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use commonplace_common::{
    ArticleMetadata, CanonicalFields, CanonicalSynthesizer, ContentAnalyst, ContentClass,
    ContentEvaluation, CrawledPage, Crawler, FailureReason, InsightDraft, Item, ItemKind,
    ItemStatus, JobQueue, Origin, SamenessJudge, SamenessVerdict, SearchDigest, SearchHit,
    SearchStatus, SearchUnit, SourceRef, Stage, TextEmbedder, WebSearcher,
};
use commonplace_library::store::{ItemStore, MemoryStore, SearchStore};
use commonplace_library::{HierarchyManager, SimilarItems};
use commonplace_pipeline::queue::{run_worker, Job, TokioQueue};
use commonplace_pipeline::{Orchestrator, PipelineDeps};
use tokio::sync::mpsc::UnboundedReceiver;

const EMBED_DIM: usize = 32;

/// Each distinct text gets its own orthogonal one-hot embedding, so only
/// identical texts ever look mergeable.
#[derive(Default)]
struct OneHotEmbedder {
    assigned: Mutex<HashMap<String, usize>>,
}

impl OneHotEmbedder {
    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut assigned = self.assigned.lock().unwrap();
        let next = assigned.len();
        let index = *assigned.entry(text.to_string()).or_insert(next);
        assert!(index < EMBED_DIM, "test exceeded embedding capacity");
        let mut v = vec![0.0; EMBED_DIM];
        v[index] = 1.0;
        v
    }
}

#[async_trait]
impl TextEmbedder for OneHotEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Same summary means same work.
struct SummaryJudge;

#[async_trait]
impl SamenessJudge for SummaryJudge {
    async fn judge(&self, a: &Item, b: &Item) -> Result<SamenessVerdict> {
        Ok(SamenessVerdict {
            same: a.summary == b.summary,
            reason: "summary comparison".to_string(),
        })
    }
}

struct JoiningSynthesizer;

#[async_trait]
impl CanonicalSynthesizer for JoiningSynthesizer {
    async fn synthesize(&self, _kind: ItemKind, children: &[Item]) -> Result<CanonicalFields> {
        Ok(CanonicalFields {
            title: children[0].title.clone(),
            summary: format!("Canonical over {} entries", children.len()),
            snippet: None,
            image_url: None,
        })
    }
}

/// Fails exactly once when armed, then behaves like `JoiningSynthesizer`.
#[derive(Default)]
struct FlakySynthesizer {
    failing: Mutex<bool>,
}

impl FlakySynthesizer {
    fn fail_next(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

#[async_trait]
impl CanonicalSynthesizer for FlakySynthesizer {
    async fn synthesize(&self, kind: ItemKind, children: &[Item]) -> Result<CanonicalFields> {
        if std::mem::take(&mut *self.failing.lock().unwrap()) {
            anyhow::bail!("synthesizer unavailable");
        }
        JoiningSynthesizer.synthesize(kind, children).await
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

#[derive(Default)]
struct ScriptedAnalyst {
    followups: Vec<String>,
}

#[async_trait]
impl ContentAnalyst for ScriptedAnalyst {
    async fn evaluate_content(&self, url: &str, _text: &str) -> Result<ContentEvaluation> {
        if url.contains("paywall") {
            return Ok(ContentEvaluation {
                class: ContentClass::Paywall,
                is_academic_paper: false,
                full_text_url: None,
            });
        }
        if url.contains("abstract") {
            return Ok(ContentEvaluation {
                class: ContentClass::Abstract,
                is_academic_paper: true,
                full_text_url: Some(format!("{url}/fulltext")),
            });
        }
        Ok(ContentEvaluation {
            class: ContentClass::Full,
            is_academic_paper: false,
            full_text_url: None,
        })
    }

    async fn extract_metadata(&self, _url: &str, text: &str) -> Result<ArticleMetadata> {
        Ok(ArticleMetadata {
            title: Some(first_line(text).to_string()),
            author: None,
            published_at: None,
        })
    }

    async fn summarize_article(&self, text: &str) -> Result<String> {
        Ok(format!("Summary of {}", first_line(text)))
    }

    async fn extract_insights(&self, text: &str) -> Result<Vec<InsightDraft>> {
        Ok(vec![InsightDraft {
            title: format!("Key idea of {}", first_line(text)),
            body: format!("Idea body for {}", first_line(text)),
            snippet: None,
            queries: vec![format!("open question from {}", first_line(text))],
        }])
    }

    async fn derive_search_query(&self, context: &str) -> Result<String> {
        Ok(format!("kw {}", first_line(context)))
    }

    async fn derive_research_queries(&self, context: &str, count: usize) -> Result<Vec<String>> {
        Ok((0..count)
            .map(|i| format!("question {i} on {}", first_line(context)))
            .collect())
    }

    async fn select_results(
        &self,
        _query: &str,
        _context: &str,
        candidates: &[SearchHit],
    ) -> Result<Vec<SearchHit>> {
        Ok(candidates.to_vec())
    }

    async fn digest_search(&self, content: &str) -> Result<SearchDigest> {
        Ok(SearchDigest {
            summary: format!("Digest of {}", first_line(content)),
            snippet: Some("digest snippet".to_string()),
            followup_queries: self.followups.clone(),
        })
    }
}

#[derive(Default)]
struct ScriptedCrawler {
    pages: Mutex<HashMap<String, String>>,
}

impl ScriptedCrawler {
    fn set_page(&self, url: &str, text: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), text.to_string());
    }
}

#[async_trait]
impl Crawler for ScriptedCrawler {
    async fn crawl(&self, url: &str) -> Result<CrawledPage> {
        let text = self
            .pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| format!("Page at {url}\nbody text"));
        Ok(CrawledPage {
            text,
            image_url: None,
        })
    }
}

#[derive(Default)]
struct ScriptedSearcher {
    hits: Mutex<HashMap<String, Vec<SearchHit>>>,
}

impl ScriptedSearcher {
    fn set_hits(&self, query_prefix: &str, urls: &[&str]) {
        self.hits.lock().unwrap().insert(
            query_prefix.to_string(),
            urls.iter()
                .map(|u| SearchHit {
                    url: u.to_string(),
                    title: Some(format!("Hit {u}")),
                })
                .collect(),
        );
    }
}

#[async_trait]
impl WebSearcher for ScriptedSearcher {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let hits = self.hits.lock().unwrap();
        Ok(hits
            .iter()
            .find(|(prefix, _)| query.starts_with(prefix.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct DrainQueue {
    jobs: Mutex<VecDeque<(Stage, Uuid)>>,
}

impl DrainQueue {
    fn pop(&self) -> Option<(Stage, Uuid)> {
        self.jobs.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl JobQueue for DrainQueue {
    async fn enqueue(&self, stage: Stage, id: Uuid, _delay: Option<Duration>) -> Result<()> {
        self.jobs.lock().unwrap().push_back((stage, id));
        Ok(())
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    crawler: Arc<ScriptedCrawler>,
    searcher: Arc<ScriptedSearcher>,
    queue: Arc<DrainQueue>,
    orchestrator: Orchestrator,
}

impl Fixture {
    fn new() -> Self {
        Self::with_followups(Vec::new())
    }

    fn with_followups(followups: Vec<String>) -> Self {
        Self::build(followups, Arc::new(JoiningSynthesizer))
    }

    fn with_synthesizer(synthesizer: Arc<dyn CanonicalSynthesizer>) -> Self {
        Self::build(Vec::new(), synthesizer)
    }

    fn build(followups: Vec<String>, synthesizer: Arc<dyn CanonicalSynthesizer>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let crawler = Arc::new(ScriptedCrawler::default());
        let searcher = Arc::new(ScriptedSearcher::default());
        let queue = Arc::new(DrainQueue::default());
        let embedder = Arc::new(OneHotEmbedder::default());

        let hierarchy = Arc::new(HierarchyManager::new(
            store.clone(),
            store.clone(),
            Arc::new(SummaryJudge),
            synthesizer,
            embedder.clone(),
            queue.clone(),
        ));
        let related = Arc::new(SimilarItems::new(store.clone()));

        let deps = Arc::new(PipelineDeps {
            items: store.clone(),
            searches: store.clone(),
            embedder,
            analyst: Arc::new(ScriptedAnalyst { followups }),
            web: searcher.clone(),
            crawler: crawler.clone(),
            queue: queue.clone(),
            hierarchy,
            related,
        });

        Self {
            store,
            crawler,
            searcher,
            queue,
            orchestrator: Orchestrator::new(deps),
        }
    }

    /// Run queued stages to quiescence, dropping failures; redelivery is
    /// exercised separately through the worker loop.
    async fn drain(&self) {
        while let Some((stage, id)) = self.queue.pop() {
            let _ = self.orchestrator.dispatch(stage, id).await;
        }
    }

    async fn add_article(&self, url: &str) -> Item {
        ItemStore::insert(
            &*self.store,
            Item::new_article(url, None, Origin::Manual),
        )
        .await
        .unwrap()
    }

    async fn item(&self, id: Uuid) -> Item {
        ItemStore::get(&*self.store, id).await.unwrap().unwrap()
    }

    async fn search(&self, id: Uuid) -> SearchUnit {
        SearchStore::get(&*self.store, id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn ingest_completes_article_and_derives_downstream_work() {
    let f = Fixture::new();
    let article = f.add_article("https://example.com/post").await;
    f.crawler
        .set_page("https://example.com/post", "Neural Scaling\nfull article text");

    f.orchestrator
        .dispatch(Stage::IngestArticle, article.id)
        .await
        .unwrap();
    f.drain().await;

    let article = f.item(article.id).await;
    assert_eq!(article.status, ItemStatus::Complete);
    assert_eq!(article.title, "Neural Scaling");
    assert_eq!(article.summary, "Summary of Neural Scaling");
    assert_eq!(article.content_class, Some(ContentClass::Full));
    assert!(article.embedding.is_some());

    // one insight, complete and embedded, owned by the article
    let insights = f.store.insights_of_article(article.id).await.unwrap();
    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].status, ItemStatus::Complete);
    assert!(insights[0].embedding.is_some());

    // insight research threads recorded but not started
    let insight_searches = f
        .store
        .searches_for_source(SourceRef::Insight(insights[0].id))
        .await
        .unwrap();
    assert_eq!(insight_searches.len(), 1);
    assert_eq!(insight_searches[0].status, SearchStatus::Pending);

    // article follow-up searches ran (and failed: no web hits configured)
    let article_searches = f
        .store
        .searches_for_source(SourceRef::Article(article.id))
        .await
        .unwrap();
    assert_eq!(article_searches.len(), 2);
    for unit in article_searches {
        assert_eq!(unit.status, SearchStatus::Failed);
        assert!(unit.search_query.is_some());
    }
}

#[tokio::test]
async fn paywalled_article_fails_with_reason_and_no_downstream_work() {
    let f = Fixture::new();
    let article = f.add_article("https://example.com/paywall/story").await;

    f.orchestrator
        .dispatch(Stage::IngestArticle, article.id)
        .await
        .unwrap();
    f.drain().await;

    let article = f.item(article.id).await;
    assert_eq!(article.status, ItemStatus::Failed);
    assert_eq!(article.failure, Some(FailureReason::AccessDenied));
    assert_eq!(article.content_class, Some(ContentClass::Paywall));
    assert!(article.embedding.is_none());

    assert!(f.store.insights_of_article(article.id).await.unwrap().is_empty());
    assert!(f
        .store
        .searches_for_source(SourceRef::Article(article.id))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn abstract_follows_link_to_full_text() {
    let f = Fixture::new();
    let article = f.add_article("https://journals.test/abstract/42").await;
    f.crawler
        .set_page("https://journals.test/abstract/42", "Paper Title\nshort abstract");
    f.crawler.set_page(
        "https://journals.test/abstract/42/fulltext",
        "Paper Title\nthe complete body of the paper, much longer than the abstract text",
    );

    f.orchestrator
        .dispatch(Stage::IngestArticle, article.id)
        .await
        .unwrap();
    f.drain().await;

    let article = f.item(article.id).await;
    assert_eq!(article.status, ItemStatus::Complete);
    assert_eq!(article.content_class, Some(ContentClass::Paper));
    assert!(article
        .text
        .as_deref()
        .unwrap()
        .contains("complete body of the paper"));
}

#[tokio::test]
async fn search_discovers_ingests_and_summarizes() {
    let f = Fixture::new();
    let unit = SearchStore::insert(
        &*f.store,
        SearchUnit::new("what is known about neural scaling", None),
    )
    .await
    .unwrap();
    f.searcher.set_hits(
        "kw ",
        &["https://a.test/one", "https://b.test/two"],
    );
    f.crawler.set_page("https://a.test/one", "Result One\nbody one");
    f.crawler.set_page("https://b.test/two", "Result Two\nbody two");

    f.orchestrator
        .dispatch(Stage::RunSearch, unit.id)
        .await
        .unwrap();
    f.drain().await;

    let unit = f.search(unit.id).await;
    assert_eq!(unit.status, SearchStatus::Complete);
    assert!(unit.summary.as_deref().unwrap().starts_with("Digest of"));
    assert!(unit.embedding.is_some());
    assert!(unit.search_query_embedding.is_some());

    let discovered = f.store.discovered_articles(unit.id).await.unwrap();
    assert_eq!(discovered.len(), 2);
    for article in &discovered {
        assert_eq!(article.status, ItemStatus::Complete);
        assert_eq!(article.origin, Origin::Discovered);
    }
}

#[tokio::test]
async fn search_fails_when_every_discovered_article_fails() {
    let f = Fixture::new();
    let unit = SearchStore::insert(&*f.store, SearchUnit::new("paywalled topic", None))
        .await
        .unwrap();
    f.searcher.set_hits(
        "kw ",
        &[
            "https://a.test/paywall/one",
            "https://b.test/paywall/two",
        ],
    );

    f.orchestrator
        .dispatch(Stage::RunSearch, unit.id)
        .await
        .unwrap();
    f.drain().await;

    let unit = f.search(unit.id).await;
    assert_eq!(unit.status, SearchStatus::Failed);
    assert!(unit.summary.is_none());
}

#[tokio::test]
async fn search_with_no_selected_results_fails_immediately() {
    let f = Fixture::new();
    let unit = SearchStore::insert(&*f.store, SearchUnit::new("nothing findable", None))
        .await
        .unwrap();

    f.orchestrator
        .dispatch(Stage::RunSearch, unit.id)
        .await
        .unwrap();

    let unit = f.search(unit.id).await;
    assert_eq!(unit.status, SearchStatus::Failed);
}

#[tokio::test]
async fn followups_inherit_provenance() {
    let f = Fixture::with_followups(vec!["deeper question".to_string()]);
    let source = SourceRef::Article(Uuid::new_v4());
    let unit = SearchStore::insert(
        &*f.store,
        SearchUnit::new("seed question", Some(source)),
    )
    .await
    .unwrap();
    // only the seed query finds anything; the follow-up comes up empty
    f.searcher.set_hits("kw seed", &["https://a.test/one"]);
    f.crawler.set_page("https://a.test/one", "Result One\nbody one");

    f.orchestrator
        .dispatch(Stage::RunSearch, unit.id)
        .await
        .unwrap();
    f.drain().await;

    assert_eq!(f.search(unit.id).await.status, SearchStatus::Complete);

    let inherited = f.store.searches_for_source(source).await.unwrap();
    let followup = inherited
        .iter()
        .find(|u| u.query == "deeper question")
        .expect("follow-up search created");
    // ran (and failed: no hits for the follow-up question)
    assert_eq!(followup.status, SearchStatus::Failed);
}

#[tokio::test]
async fn duplicate_articles_merge_under_a_synthesized_parent() {
    let f = Fixture::new();
    let a = f.add_article("https://mirror-one.test/story").await;
    let b = f.add_article("https://mirror-two.test/story").await;
    // same content behind both urls
    f.crawler
        .set_page("https://mirror-one.test/story", "The Same Work\nidentical body");
    f.crawler
        .set_page("https://mirror-two.test/story", "The Same Work\nidentical body");

    f.orchestrator
        .dispatch(Stage::IngestArticle, a.id)
        .await
        .unwrap();
    f.orchestrator
        .dispatch(Stage::IngestArticle, b.id)
        .await
        .unwrap();
    f.drain().await;

    let b = f.item(b.id).await;
    let parent_id = b.parent_id.expect("duplicate was absorbed");
    let parent = f.item(parent_id).await;
    assert!(parent.parent_id.is_none());
    assert!(parent.embedding.is_some());

    let children = f.store.children_of(parent_id).await.unwrap();
    assert_eq!(children.len(), 2);
    assert!(children.iter().any(|c| c.id == a.id));
}

#[tokio::test]
async fn downstream_work_survives_a_failed_absorb() {
    let synthesizer = Arc::new(FlakySynthesizer::default());
    let f = Fixture::with_synthesizer(synthesizer.clone());
    let a = f.add_article("https://mirror-one.test/story").await;
    let b = f.add_article("https://mirror-two.test/story").await;
    f.crawler
        .set_page("https://mirror-one.test/story", "The Same Work\nidentical body");
    f.crawler
        .set_page("https://mirror-two.test/story", "The Same Work\nidentical body");

    f.orchestrator
        .dispatch(Stage::IngestArticle, a.id)
        .await
        .unwrap();
    f.drain().await;

    // parent synthesis fails while the duplicate is absorbed
    synthesizer.fail_next();
    f.orchestrator
        .dispatch(Stage::IngestArticle, b.id)
        .await
        .unwrap();
    f.drain().await;

    // the merge was lost this round but the article completed standalone
    let b = f.item(b.id).await;
    assert_eq!(b.status, ItemStatus::Complete);
    assert!(b.parent_id.is_none());

    // derivation still happened
    assert_eq!(f.store.insights_of_article(b.id).await.unwrap().len(), 1);
    assert_eq!(
        f.store
            .searches_for_source(SourceRef::Article(b.id))
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn insight_research_threads_survive_a_failed_absorb() {
    let synthesizer = Arc::new(FlakySynthesizer::default());
    let f = Fixture::with_synthesizer(synthesizer.clone());
    let a = f.add_article("https://mirror-one.test/story").await;
    let b = f.add_article("https://mirror-two.test/story").await;
    f.crawler
        .set_page("https://mirror-one.test/story", "The Same Work\nidentical body");
    f.crawler
        .set_page("https://mirror-two.test/story", "The Same Work\nidentical body");

    f.orchestrator
        .dispatch(Stage::IngestArticle, a.id)
        .await
        .unwrap();
    f.orchestrator
        .dispatch(Stage::DeriveInsights, a.id)
        .await
        .unwrap();
    f.orchestrator
        .dispatch(Stage::IngestArticle, b.id)
        .await
        .unwrap();

    // the duplicate insight fails to merge with its peer from the first
    // article
    synthesizer.fail_next();
    f.orchestrator
        .dispatch(Stage::DeriveInsights, b.id)
        .await
        .unwrap();

    let insights = f.store.insights_of_article(b.id).await.unwrap();
    assert_eq!(insights.len(), 1);
    assert!(insights[0].parent_id.is_none());

    // the research thread was recorded before the absorb pass
    let threads = f
        .store
        .searches_for_source(SourceRef::Insight(insights[0].id))
        .await
        .unwrap();
    assert_eq!(threads.len(), 1);
}

/// Fails the configured number of crawls before serving pages.
struct FlakyCrawler {
    failures_left: Mutex<u32>,
    inner: ScriptedCrawler,
}

impl FlakyCrawler {
    fn failing(times: u32) -> Self {
        Self {
            failures_left: Mutex::new(times),
            inner: ScriptedCrawler::default(),
        }
    }
}

#[async_trait]
impl Crawler for FlakyCrawler {
    async fn crawl(&self, url: &str) -> Result<CrawledPage> {
        {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                anyhow::bail!("connection reset");
            }
        }
        self.inner.crawl(url).await
    }
}

fn worker_fixture(
    crawler: Arc<FlakyCrawler>,
) -> (
    Arc<MemoryStore>,
    Arc<TokioQueue>,
    UnboundedReceiver<Job>,
    Arc<Orchestrator>,
) {
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(OneHotEmbedder::default());
    let (queue, rx) = TokioQueue::channel();
    let queue = Arc::new(queue);

    let hierarchy = Arc::new(HierarchyManager::new(
        store.clone(),
        store.clone(),
        Arc::new(SummaryJudge),
        Arc::new(JoiningSynthesizer),
        embedder.clone(),
        queue.clone(),
    ));
    let related = Arc::new(SimilarItems::new(store.clone()));
    let deps = Arc::new(PipelineDeps {
        items: store.clone(),
        searches: store.clone(),
        embedder,
        analyst: Arc::new(ScriptedAnalyst::default()),
        web: Arc::new(ScriptedSearcher::default()),
        crawler,
        queue: queue.clone(),
        hierarchy,
        related,
    });
    let orchestrator = Arc::new(Orchestrator::new(deps));
    (store, queue, rx, orchestrator)
}

async fn await_terminal(store: &MemoryStore, id: Uuid) -> Item {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let item = ItemStore::get(store, id).await.unwrap().unwrap();
            if item.status.is_terminal() {
                return item;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("article should reach a terminal status")
}

#[tokio::test(start_paused = true)]
async fn worker_redelivers_after_transient_failures() {
    let crawler = Arc::new(FlakyCrawler::failing(2));
    crawler
        .inner
        .set_page("https://example.com/flaky", "Flaky Article\nbody");
    let (store, queue, rx, orchestrator) = worker_fixture(crawler);
    let article = ItemStore::insert(
        &*store,
        Item::new_article("https://example.com/flaky", None, Origin::Manual),
    )
    .await
    .unwrap();
    queue
        .enqueue(Stage::IngestArticle, article.id, None)
        .await
        .unwrap();

    let worker = tokio::spawn(run_worker(orchestrator, queue.clone(), rx));
    let settled = await_terminal(&store, article.id).await;
    worker.abort();

    assert_eq!(settled.status, ItemStatus::Complete);
    assert_eq!(settled.title, "Flaky Article");
}

#[tokio::test(start_paused = true)]
async fn worker_abandons_unreachable_articles_as_network_failures() {
    let crawler = Arc::new(FlakyCrawler::failing(u32::MAX));
    let (store, queue, rx, orchestrator) = worker_fixture(crawler);
    let article = ItemStore::insert(
        &*store,
        Item::new_article("https://example.com/down", None, Origin::Manual),
    )
    .await
    .unwrap();
    queue
        .enqueue(Stage::IngestArticle, article.id, None)
        .await
        .unwrap();

    let worker = tokio::spawn(run_worker(orchestrator, queue.clone(), rx));
    let settled = await_terminal(&store, article.id).await;
    worker.abort();

    assert_eq!(settled.status, ItemStatus::Failed);
    assert_eq!(settled.failure, Some(FailureReason::Network));
}

#[tokio::test]
async fn stages_are_idempotent_under_redelivery() {
    let f = Fixture::new();
    let article = f.add_article("https://example.com/idem").await;
    f.crawler
        .set_page("https://example.com/idem", "Idempotent Article\nbody");

    f.orchestrator
        .dispatch(Stage::IngestArticle, article.id)
        .await
        .unwrap();
    f.drain().await;

    let insights_before = f.store.insights_of_article(article.id).await.unwrap();
    let searches_before = f
        .store
        .searches_for_source(SourceRef::Article(article.id))
        .await
        .unwrap();
    let article_before = f.item(article.id).await;

    // redeliver everything
    f.orchestrator
        .dispatch(Stage::IngestArticle, article.id)
        .await
        .unwrap();
    f.orchestrator
        .dispatch(Stage::DeriveInsights, article.id)
        .await
        .unwrap();
    f.orchestrator
        .dispatch(Stage::DeriveSearches, article.id)
        .await
        .unwrap();
    f.drain().await;

    let insights_after = f.store.insights_of_article(article.id).await.unwrap();
    let searches_after = f
        .store
        .searches_for_source(SourceRef::Article(article.id))
        .await
        .unwrap();
    assert_eq!(insights_before.len(), insights_after.len());
    assert_eq!(searches_before.len(), searches_after.len());
    assert_eq!(article_before.summary, f.item(article.id).await.summary);
}
