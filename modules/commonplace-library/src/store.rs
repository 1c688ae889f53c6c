//! Persistence traits for content items and search units.
//!
//! Two implementations: an in-memory store for tests and a Postgres store
//! for production. Nearest-neighbor queries are computed over candidate
//! embeddings in-process.

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use commonplace_common::{Item, ItemKind, SearchStatus, SearchUnit, SourceRef};

/// A candidate item with its cosine distance from a query embedding.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub item: Item,
    pub distance: f32,
}

/// Result of a compare-and-set hierarchy link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdoptOutcome {
    Linked,
    /// The child or parent changed hierarchy position since it was read.
    LostRace,
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert an item, deriving a unique slug from its title if none is set.
    async fn insert(&self, item: Item) -> Result<Item>;

    async fn get(&self, id: Uuid) -> Result<Option<Item>>;

    async fn get_by_url(&self, url: &str) -> Result<Option<Item>>;

    async fn update(&self, item: &Item) -> Result<()>;

    async fn children_of(&self, parent_id: Uuid) -> Result<Vec<Item>>;

    async fn insights_of_article(&self, article_id: Uuid) -> Result<Vec<Item>>;

    /// Complete same-kind items that have children, nearest first.
    async fn nearest_parents(
        &self,
        kind: ItemKind,
        embedding: &[f32],
        exclude: Uuid,
        exclude_article: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Neighbor>>;

    /// Complete same-kind items with neither parent nor children, nearest
    /// first.
    async fn nearest_peers(
        &self,
        kind: ItemKind,
        embedding: &[f32],
        exclude: Uuid,
        exclude_article: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Neighbor>>;

    /// Complete items of any kind, nearest first.
    async fn nearest_complete(
        &self,
        embedding: &[f32],
        exclude: &[Uuid],
        limit: usize,
    ) -> Result<Vec<Neighbor>>;

    /// Atomically link `child_id` under `parent_id`. Loses the race when the
    /// child has gained a parent or children since it was read, or the
    /// parent has itself become a child. Search units sourced from the child
    /// are re-pointed at the parent in the same transaction.
    async fn adopt(&self, child_id: Uuid, parent_id: Uuid) -> Result<AdoptOutcome>;

    /// Atomically insert `parent` and link both children under it, with the
    /// same source re-pointing as [`adopt`](ItemStore::adopt). Returns None
    /// when either child was concurrently linked or gained children.
    async fn create_parent(
        &self,
        parent: Item,
        child_a: Uuid,
        child_b: Uuid,
    ) -> Result<Option<Item>>;
}

#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Insert a search unit, deriving a unique slug from its query if none
    /// is set.
    async fn insert(&self, unit: SearchUnit) -> Result<SearchUnit>;

    async fn get(&self, id: Uuid) -> Result<Option<SearchUnit>>;

    async fn update(&self, unit: &SearchUnit) -> Result<()>;

    /// Monotonic status transition. Returns false (and leaves the unit
    /// untouched) when the stored status cannot advance to `next`.
    async fn advance_status(&self, id: Uuid, next: SearchStatus) -> Result<bool>;

    /// Idempotent search-to-article membership. Returns false when the pair
    /// already exists.
    async fn add_membership(&self, search_id: Uuid, article_id: Uuid) -> Result<bool>;

    async fn discovered_articles(&self, search_id: Uuid) -> Result<Vec<Item>>;

    async fn searches_containing(&self, article_id: Uuid) -> Result<Vec<SearchUnit>>;

    async fn searches_for_source(&self, source: SourceRef) -> Result<Vec<SearchUnit>>;

    /// Remove not-yet-started searches spawned by `source`. Returns the
    /// number deleted.
    async fn delete_pending_for_source(&self, source: SourceRef) -> Result<u64>;
}
