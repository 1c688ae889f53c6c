use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Item Kinds ---

/// The two content kinds in the library. An Article is a top-level ingested
/// work; an Insight is derived from exactly one Article. Kinds never merge
/// with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Article,
    Insight,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Article => write!(f, "article"),
            ItemKind::Insight => write!(f, "insight"),
        }
    }
}

// --- Lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Complete,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Complete | ItemStatus::Failed)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Complete => write!(f, "complete"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Categorized reason recorded on a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Network,
    AccessDenied,
    Unusable,
    Unknown,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Network => write!(f, "network"),
            FailureReason::AccessDenied => write!(f, "access_denied"),
            FailureReason::Unusable => write!(f, "unusable"),
            FailureReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// What the crawler + classifier concluded about a fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Full,
    Paper,
    Partial,
    Abstract,
    Video,
    Podcast,
    Paywall,
    Blocked,
}

impl ContentClass {
    /// Paywalled and blocked pages can never yield usable content.
    pub fn is_unusable(&self) -> bool {
        matches!(self, ContentClass::Paywall | ContentClass::Blocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Paper => "paper",
            Self::Partial => "partial",
            Self::Abstract => "abstract",
            Self::Video => "video",
            Self::Podcast => "podcast",
            Self::Paywall => "paywall",
            Self::Blocked => "blocked",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "paper" => Self::Paper,
            "partial" => Self::Partial,
            "abstract" => Self::Abstract,
            "video" => Self::Video,
            "podcast" => Self::Podcast,
            "paywall" => Self::Paywall,
            "blocked" => Self::Blocked,
            _ => Self::Full,
        }
    }
}

impl std::fmt::Display for ContentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an article entered the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[default]
    Manual,
    Discovered,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Manual => write!(f, "manual"),
            Origin::Discovered => write!(f, "discovered"),
        }
    }
}

// --- Content Item ---

/// A content item: either an Article or an Insight, including synthesized
/// cluster parents of either kind.
///
/// Hierarchy invariant: depth <= 1. A node with a parent has no children and
/// a node with children has no parent. Stores enforce this at link time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub kind: ItemKind,
    pub slug: String,
    pub status: ItemStatus,
    pub title: String,
    /// Canonical text: the summary for articles, the body for insights.
    pub summary: String,
    pub snippet: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    /// Raw crawled text. Articles only; absent until ingestion completes.
    pub text: Option<String>,
    pub content_class: Option<ContentClass>,
    /// Absent until the summarize stage completes.
    pub embedding: Option<Vec<f32>>,
    /// Same-kind parent. Mutually exclusive with having children.
    pub parent_id: Option<Uuid>,
    /// Owning source article for insights. Cleared on synthesized parents;
    /// children keep their original value.
    pub article_id: Option<Uuid>,
    pub origin: Origin,
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn new(kind: ItemKind, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            slug: String::new(),
            status: ItemStatus::Pending,
            title: title.into(),
            summary: String::new(),
            snippet: None,
            author: None,
            published_at: None,
            url: None,
            image_url: None,
            text: None,
            content_class: None,
            embedding: None,
            parent_id: None,
            article_id: None,
            origin: Origin::Manual,
            failure: None,
            created_at: Utc::now(),
        }
    }

    pub fn new_article(url: impl Into<String>, title: Option<String>, origin: Origin) -> Self {
        let url = url.into();
        let mut item = Self::new(ItemKind::Article, title.unwrap_or_else(|| url.clone()));
        item.url = Some(url);
        item.origin = origin;
        item
    }

    pub fn is_child(&self) -> bool {
        self.parent_id.is_some()
    }

    /// The text the item's embedding is derived from.
    pub fn embeddable_text(&self) -> &str {
        &self.summary
    }
}

// --- Search Units ---

/// Search lifecycle. Transitions are monotonic: a unit never regresses
/// toward Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Pending,
    Searching,
    Complete,
    Failed,
}

impl SearchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SearchStatus::Complete | SearchStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            SearchStatus::Pending => 0,
            SearchStatus::Searching => 1,
            SearchStatus::Complete => 2,
            SearchStatus::Failed => 2,
        }
    }

    /// Whether a transition to `next` moves forward in the lifecycle.
    pub fn can_advance_to(&self, next: SearchStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchStatus::Pending => write!(f, "pending"),
            SearchStatus::Searching => write!(f, "searching"),
            SearchStatus::Complete => write!(f, "complete"),
            SearchStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Tagged reference to the item that spawned a search. None means a
/// top-level user query. Consumers must match exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SourceRef {
    Article(Uuid),
    Insight(Uuid),
    Search(Uuid),
}

impl SourceRef {
    pub fn id(&self) -> Uuid {
        match self {
            SourceRef::Article(id) => *id,
            SourceRef::Insight(id) => *id,
            SourceRef::Search(id) => *id,
        }
    }

    pub fn for_item(item: &Item) -> Self {
        match item.kind {
            ItemKind::Article => SourceRef::Article(item.id),
            ItemKind::Insight => SourceRef::Insight(item.id),
        }
    }
}

/// One "find more content for this question" request with its own lifecycle
/// and a many-to-many set of discovered articles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchUnit {
    pub id: Uuid,
    pub slug: String,
    /// The free-text research question.
    pub query: String,
    /// LLM-derived machine query used against the web search provider.
    pub search_query: Option<String>,
    /// Embedding of the machine query, used to rank related library items.
    pub search_query_embedding: Option<Vec<f32>>,
    pub summary: Option<String>,
    pub snippet: Option<String>,
    /// Embedding of the completed summary.
    pub embedding: Option<Vec<f32>>,
    pub source: Option<SourceRef>,
    pub status: SearchStatus,
    pub created_at: DateTime<Utc>,
}

impl SearchUnit {
    pub fn new(query: impl Into<String>, source: Option<SourceRef>) -> Self {
        Self {
            id: Uuid::new_v4(),
            slug: String::new(),
            query: query.into(),
            search_query: None,
            search_query_embedding: None,
            summary: None,
            snippet: None,
            embedding: None,
            source,
            status: SearchStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

// --- Pipeline Stages ---

/// Pipeline stages, keyed by content id, delivered at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IngestArticle,
    DeriveInsights,
    DeriveSearches,
    RunSearch,
    SummarizeSearch,
    RegenerateParent,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::IngestArticle => "ingest_article",
            Stage::DeriveInsights => "derive_insights",
            Stage::DeriveSearches => "derive_searches",
            Stage::RunSearch => "run_search",
            Stage::SummarizeSearch => "summarize_search",
            Stage::RegenerateParent => "regenerate_parent",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_status_never_regresses() {
        assert!(SearchStatus::Pending.can_advance_to(SearchStatus::Searching));
        assert!(SearchStatus::Searching.can_advance_to(SearchStatus::Complete));
        assert!(SearchStatus::Searching.can_advance_to(SearchStatus::Failed));
        assert!(!SearchStatus::Searching.can_advance_to(SearchStatus::Pending));
        assert!(!SearchStatus::Complete.can_advance_to(SearchStatus::Searching));
        assert!(!SearchStatus::Failed.can_advance_to(SearchStatus::Complete));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ItemStatus::Pending.is_terminal());
        assert!(ItemStatus::Complete.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
    }

    #[test]
    fn source_ref_serializes_tagged() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(SourceRef::Insight(id)).unwrap();
        assert_eq!(json["kind"], "insight");
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn unusable_content_classes() {
        assert!(ContentClass::Paywall.is_unusable());
        assert!(ContentClass::Blocked.is_unusable());
        assert!(!ContentClass::Abstract.is_unusable());
        assert!(!ContentClass::Full.is_unusable());
    }

    #[test]
    fn new_article_defaults() {
        let a = Item::new_article("https://example.com/post", None, Origin::Discovered);
        assert_eq!(a.kind, ItemKind::Article);
        assert_eq!(a.status, ItemStatus::Pending);
        assert_eq!(a.title, "https://example.com/post");
        assert!(a.embedding.is_none());
        assert!(a.parent_id.is_none());
    }
}
