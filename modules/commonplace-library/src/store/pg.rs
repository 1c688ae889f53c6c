//! Postgres store. Enum columns are stored as text; embeddings as float4
//! arrays. Nearest-neighbor ranking happens in-process over candidate rows
//! fetched with the structural filters applied in SQL.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use commonplace_common::slug::{slugify, with_suffix};
use commonplace_common::{
    ContentClass, FailureReason, Item, ItemKind, ItemStatus, Origin, SearchStatus, SearchUnit,
    SourceRef,
};

use crate::similarity::cosine_distance;
use crate::store::{AdoptOutcome, ItemStore, Neighbor, SearchStore};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS items (
                id UUID PRIMARY KEY,
                kind TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                title TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                snippet TEXT,
                author TEXT,
                published_at TIMESTAMPTZ,
                url TEXT,
                image_url TEXT,
                text TEXT,
                content_class TEXT,
                embedding FLOAT4[],
                parent_id UUID REFERENCES items(id),
                article_id UUID,
                origin TEXT NOT NULL DEFAULT 'manual',
                failure TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS searches (
                id UUID PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                query TEXT NOT NULL,
                search_query TEXT,
                search_query_embedding FLOAT4[],
                summary TEXT,
                snippet TEXT,
                embedding FLOAT4[],
                source_kind TEXT,
                source_id UUID,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS search_articles (
                search_id UUID NOT NULL REFERENCES searches(id) ON DELETE CASCADE,
                article_id UUID NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                PRIMARY KEY (search_id, article_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_items_url ON items(url)",
            "CREATE INDEX IF NOT EXISTS idx_items_parent ON items(parent_id)",
            "CREATE INDEX IF NOT EXISTS idx_items_article ON items(article_id)",
            "CREATE INDEX IF NOT EXISTS idx_searches_source ON searches(source_kind, source_id)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        Ok(())
    }
}

// --- Row mapping ---

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    kind: String,
    slug: String,
    status: String,
    title: String,
    summary: String,
    snippet: Option<String>,
    author: Option<String>,
    published_at: Option<DateTime<Utc>>,
    url: Option<String>,
    image_url: Option<String>,
    text: Option<String>,
    content_class: Option<String>,
    embedding: Option<Vec<f32>>,
    parent_id: Option<Uuid>,
    article_id: Option<Uuid>,
    origin: String,
    failure: Option<String>,
    created_at: DateTime<Utc>,
}

fn parse_kind(s: &str) -> Result<ItemKind> {
    match s {
        "article" => Ok(ItemKind::Article),
        "insight" => Ok(ItemKind::Insight),
        other => Err(anyhow!("unknown item kind: {other}")),
    }
}

fn parse_item_status(s: &str) -> Result<ItemStatus> {
    match s {
        "pending" => Ok(ItemStatus::Pending),
        "complete" => Ok(ItemStatus::Complete),
        "failed" => Ok(ItemStatus::Failed),
        other => Err(anyhow!("unknown item status: {other}")),
    }
}

fn parse_search_status(s: &str) -> Result<SearchStatus> {
    match s {
        "pending" => Ok(SearchStatus::Pending),
        "searching" => Ok(SearchStatus::Searching),
        "complete" => Ok(SearchStatus::Complete),
        "failed" => Ok(SearchStatus::Failed),
        other => Err(anyhow!("unknown search status: {other}")),
    }
}

fn parse_failure(s: &str) -> FailureReason {
    match s {
        "network" => FailureReason::Network,
        "access_denied" => FailureReason::AccessDenied,
        "unusable" => FailureReason::Unusable,
        _ => FailureReason::Unknown,
    }
}

fn parse_origin(s: &str) -> Origin {
    match s {
        "discovered" => Origin::Discovered,
        _ => Origin::Manual,
    }
}

impl TryFrom<ItemRow> for Item {
    type Error = anyhow::Error;

    fn try_from(row: ItemRow) -> Result<Self> {
        Ok(Item {
            id: row.id,
            kind: parse_kind(&row.kind)?,
            slug: row.slug,
            status: parse_item_status(&row.status)?,
            title: row.title,
            summary: row.summary,
            snippet: row.snippet,
            author: row.author,
            published_at: row.published_at,
            url: row.url,
            image_url: row.image_url,
            text: row.text,
            content_class: row.content_class.as_deref().map(ContentClass::from_str_loose),
            embedding: row.embedding,
            parent_id: row.parent_id,
            article_id: row.article_id,
            origin: parse_origin(&row.origin),
            failure: row.failure.as_deref().map(parse_failure),
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SearchRow {
    id: Uuid,
    slug: String,
    query: String,
    search_query: Option<String>,
    search_query_embedding: Option<Vec<f32>>,
    summary: Option<String>,
    snippet: Option<String>,
    embedding: Option<Vec<f32>>,
    source_kind: Option<String>,
    source_id: Option<Uuid>,
    status: String,
    created_at: DateTime<Utc>,
}

fn parse_source(kind: Option<&str>, id: Option<Uuid>) -> Result<Option<SourceRef>> {
    match (kind, id) {
        (None, None) => Ok(None),
        (Some("article"), Some(id)) => Ok(Some(SourceRef::Article(id))),
        (Some("insight"), Some(id)) => Ok(Some(SourceRef::Insight(id))),
        (Some("search"), Some(id)) => Ok(Some(SourceRef::Search(id))),
        (kind, id) => Err(anyhow!("malformed search source: {kind:?}/{id:?}")),
    }
}

fn source_parts(source: Option<SourceRef>) -> (Option<&'static str>, Option<Uuid>) {
    match source {
        None => (None, None),
        Some(SourceRef::Article(id)) => (Some("article"), Some(id)),
        Some(SourceRef::Insight(id)) => (Some("insight"), Some(id)),
        Some(SourceRef::Search(id)) => (Some("search"), Some(id)),
    }
}

impl TryFrom<SearchRow> for SearchUnit {
    type Error = anyhow::Error;

    fn try_from(row: SearchRow) -> Result<Self> {
        Ok(SearchUnit {
            id: row.id,
            slug: row.slug,
            query: row.query,
            search_query: row.search_query,
            search_query_embedding: row.search_query_embedding,
            summary: row.summary,
            snippet: row.snippet,
            embedding: row.embedding,
            source: parse_source(row.source_kind.as_deref(), row.source_id)?,
            status: parse_search_status(&row.status)?,
            created_at: row.created_at,
        })
    }
}

fn rows_to_items(rows: Vec<ItemRow>) -> Result<Vec<Item>> {
    rows.into_iter().map(Item::try_from).collect()
}

fn rank_neighbors(items: Vec<Item>, embedding: &[f32], limit: usize) -> Vec<Neighbor> {
    let mut neighbors: Vec<Neighbor> = items
        .into_iter()
        .filter_map(|item| {
            let e = item.embedding.clone()?;
            let distance = cosine_distance(embedding, &e);
            Some(Neighbor { item, distance })
        })
        .collect();
    neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    neighbors.truncate(limit);
    neighbors
}

// Two-row hierarchy updates lock rows in id order to avoid deadlocks.
async fn lock_hierarchy_state(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
) -> Result<Vec<(Uuid, Option<Uuid>, bool)>> {
    let mut ordered: Vec<Uuid> = ids.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut out = Vec::with_capacity(ordered.len());
    for id in ordered {
        let row: Option<(Option<Uuid>,)> =
            sqlx::query_as("SELECT parent_id FROM items WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;
        let parent_id = row.ok_or_else(|| anyhow!("item {id} not found"))?.0;

        let (has_children,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM items WHERE parent_id = $1)")
                .bind(id)
                .fetch_one(&mut **tx)
                .await?;

        out.push((id, parent_id, has_children));
    }
    Ok(out)
}

// searches spawned by an absorbed child follow it to the parent
async fn repoint_sources(
    tx: &mut Transaction<'_, Postgres>,
    from: Uuid,
    to: Uuid,
) -> Result<()> {
    sqlx::query(
        "UPDATE searches SET source_id = $2
         WHERE source_id = $1 AND source_kind IN ('article', 'insight')",
    )
    .bind(from)
    .bind(to)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn insert_item_query(slug: &str, item: &Item) -> sqlx::query::Query<'static, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        "INSERT INTO items (id, kind, slug, status, title, summary, snippet, author,
            published_at, url, image_url, text, content_class, embedding, parent_id,
            article_id, origin, failure, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
            $16, $17, $18, $19)
         ON CONFLICT (slug) DO NOTHING",
    )
    .bind(item.id)
    .bind(item.kind.to_string())
    .bind(slug.to_string())
    .bind(item.status.to_string())
    .bind(item.title.clone())
    .bind(item.summary.clone())
    .bind(item.snippet.clone())
    .bind(item.author.clone())
    .bind(item.published_at)
    .bind(item.url.clone())
    .bind(item.image_url.clone())
    .bind(item.text.clone())
    .bind(item.content_class.map(|c| c.to_string()))
    .bind(item.embedding.clone())
    .bind(item.parent_id)
    .bind(item.article_id)
    .bind(item.origin.to_string())
    .bind(item.failure.map(|f| f.to_string()))
    .bind(item.created_at)
}

#[async_trait]
impl ItemStore for PgStore {
    async fn insert(&self, mut item: Item) -> Result<Item> {
        let fallback = item.id.simple().to_string();
        let base = if item.slug.is_empty() {
            slugify(&item.title).unwrap_or_else(|| fallback[..8].to_string())
        } else {
            item.slug.clone()
        };

        // slug collisions surface as zero affected rows; retry with a suffix
        let mut slug = base.clone();
        loop {
            let result = insert_item_query(&slug, &item).execute(&self.pool).await?;
            if result.rows_affected() == 1 {
                item.slug = slug;
                return Ok(item);
            }
            slug = with_suffix(&base);
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Item>> {
        let row: Option<ItemRow> = sqlx::query_as("SELECT * FROM items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Item::try_from).transpose()
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<Item>> {
        let row: Option<ItemRow> =
            sqlx::query_as("SELECT * FROM items WHERE url = $1 ORDER BY created_at LIMIT 1")
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Item::try_from).transpose()
    }

    async fn update(&self, item: &Item) -> Result<()> {
        let result = sqlx::query(
            "UPDATE items SET status = $2, title = $3, summary = $4, snippet = $5,
                author = $6, published_at = $7, url = $8, image_url = $9, text = $10,
                content_class = $11, embedding = $12, parent_id = $13, article_id = $14,
                failure = $15
             WHERE id = $1",
        )
        .bind(item.id)
        .bind(item.status.to_string())
        .bind(&item.title)
        .bind(&item.summary)
        .bind(&item.snippet)
        .bind(&item.author)
        .bind(item.published_at)
        .bind(&item.url)
        .bind(&item.image_url)
        .bind(&item.text)
        .bind(item.content_class.map(|c| c.to_string()))
        .bind(&item.embedding)
        .bind(item.parent_id)
        .bind(item.article_id)
        .bind(item.failure.map(|f| f.to_string()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("item {} not found", item.id));
        }
        Ok(())
    }

    async fn children_of(&self, parent_id: Uuid) -> Result<Vec<Item>> {
        let rows: Vec<ItemRow> =
            sqlx::query_as("SELECT * FROM items WHERE parent_id = $1 ORDER BY created_at")
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?;
        rows_to_items(rows)
    }

    async fn insights_of_article(&self, article_id: Uuid) -> Result<Vec<Item>> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT * FROM items WHERE kind = 'insight' AND article_id = $1 ORDER BY created_at",
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await?;
        rows_to_items(rows)
    }

    async fn nearest_parents(
        &self,
        kind: ItemKind,
        embedding: &[f32],
        exclude: Uuid,
        exclude_article: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT * FROM items
             WHERE kind = $1 AND status = 'complete' AND embedding IS NOT NULL
               AND parent_id IS NULL AND id != $2
               AND EXISTS(SELECT 1 FROM items c WHERE c.parent_id = items.id)
               AND ($3::uuid IS NULL OR article_id IS DISTINCT FROM $3)
             ORDER BY created_at",
        )
        .bind(kind.to_string())
        .bind(exclude)
        .bind(exclude_article)
        .fetch_all(&self.pool)
        .await?;

        Ok(rank_neighbors(rows_to_items(rows)?, embedding, limit))
    }

    async fn nearest_peers(
        &self,
        kind: ItemKind,
        embedding: &[f32],
        exclude: Uuid,
        exclude_article: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT * FROM items
             WHERE kind = $1 AND status = 'complete' AND embedding IS NOT NULL
               AND parent_id IS NULL AND id != $2
               AND NOT EXISTS(SELECT 1 FROM items c WHERE c.parent_id = items.id)
               AND ($3::uuid IS NULL OR article_id IS DISTINCT FROM $3)
             ORDER BY created_at",
        )
        .bind(kind.to_string())
        .bind(exclude)
        .bind(exclude_article)
        .fetch_all(&self.pool)
        .await?;

        Ok(rank_neighbors(rows_to_items(rows)?, embedding, limit))
    }

    async fn nearest_complete(
        &self,
        embedding: &[f32],
        exclude: &[Uuid],
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT * FROM items
             WHERE status = 'complete' AND embedding IS NOT NULL
               AND id != ALL($1)
             ORDER BY created_at",
        )
        .bind(exclude)
        .fetch_all(&self.pool)
        .await?;

        Ok(rank_neighbors(rows_to_items(rows)?, embedding, limit))
    }

    async fn adopt(&self, child_id: Uuid, parent_id: Uuid) -> Result<AdoptOutcome> {
        let mut tx = self.pool.begin().await?;

        let state = lock_hierarchy_state(&mut tx, &[child_id, parent_id]).await?;
        let child_free = state
            .iter()
            .any(|(id, parent, kids)| *id == child_id && parent.is_none() && !kids);
        let parent_is_root = state
            .iter()
            .any(|(id, parent, _)| *id == parent_id && parent.is_none());

        if !child_free || !parent_is_root {
            tx.rollback().await?;
            return Ok(AdoptOutcome::LostRace);
        }

        sqlx::query("UPDATE items SET parent_id = $2 WHERE id = $1")
            .bind(child_id)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;
        repoint_sources(&mut tx, child_id, parent_id).await?;

        tx.commit().await?;
        Ok(AdoptOutcome::Linked)
    }

    async fn create_parent(
        &self,
        mut parent: Item,
        child_a: Uuid,
        child_b: Uuid,
    ) -> Result<Option<Item>> {
        let mut tx = self.pool.begin().await?;

        let state = lock_hierarchy_state(&mut tx, &[child_a, child_b]).await?;
        let all_free = state.iter().all(|(_, parent, kids)| parent.is_none() && !kids);

        if !all_free {
            tx.rollback().await?;
            return Ok(None);
        }

        let fallback = parent.id.simple().to_string();
        let base = if parent.slug.is_empty() {
            slugify(&parent.title).unwrap_or_else(|| fallback[..8].to_string())
        } else {
            parent.slug.clone()
        };

        let mut slug = base.clone();
        loop {
            let result = insert_item_query(&slug, &parent).execute(&mut *tx).await?;
            if result.rows_affected() == 1 {
                parent.slug = slug;
                break;
            }
            slug = with_suffix(&base);
        }

        sqlx::query("UPDATE items SET parent_id = $1 WHERE id = $2 OR id = $3")
            .bind(parent.id)
            .bind(child_a)
            .bind(child_b)
            .execute(&mut *tx)
            .await?;
        repoint_sources(&mut tx, child_a, parent.id).await?;
        repoint_sources(&mut tx, child_b, parent.id).await?;

        tx.commit().await?;
        Ok(Some(parent))
    }
}

#[async_trait]
impl SearchStore for PgStore {
    async fn insert(&self, mut unit: SearchUnit) -> Result<SearchUnit> {
        let fallback = unit.id.simple().to_string();
        let base = if unit.slug.is_empty() {
            slugify(&unit.query).unwrap_or_else(|| fallback[..8].to_string())
        } else {
            unit.slug.clone()
        };
        let (source_kind, source_id) = source_parts(unit.source);

        let mut slug = base.clone();
        loop {
            let result = sqlx::query(
                "INSERT INTO searches (id, slug, query, search_query, search_query_embedding,
                    summary, snippet, embedding, source_kind, source_id, status, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                 ON CONFLICT (slug) DO NOTHING",
            )
            .bind(unit.id)
            .bind(&slug)
            .bind(&unit.query)
            .bind(&unit.search_query)
            .bind(&unit.search_query_embedding)
            .bind(&unit.summary)
            .bind(&unit.snippet)
            .bind(&unit.embedding)
            .bind(source_kind)
            .bind(source_id)
            .bind(unit.status.to_string())
            .bind(unit.created_at)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                unit.slug = slug;
                return Ok(unit);
            }
            slug = with_suffix(&base);
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<SearchUnit>> {
        let row: Option<SearchRow> = sqlx::query_as("SELECT * FROM searches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SearchUnit::try_from).transpose()
    }

    async fn update(&self, unit: &SearchUnit) -> Result<()> {
        let result = sqlx::query(
            "UPDATE searches SET query = $2, search_query = $3, search_query_embedding = $4,
                summary = $5, snippet = $6, embedding = $7, status = $8
             WHERE id = $1",
        )
        .bind(unit.id)
        .bind(&unit.query)
        .bind(&unit.search_query)
        .bind(&unit.search_query_embedding)
        .bind(&unit.summary)
        .bind(&unit.snippet)
        .bind(&unit.embedding)
        .bind(unit.status.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("search {} not found", unit.id));
        }
        Ok(())
    }

    async fn advance_status(&self, id: Uuid, next: SearchStatus) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM searches WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let current = parse_search_status(&row.ok_or_else(|| anyhow!("search {id} not found"))?.0)?;

        if !current.can_advance_to(next) {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE searches SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(next.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn add_membership(&self, search_id: Uuid, article_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO search_articles (search_id, article_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(search_id)
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn discovered_articles(&self, search_id: Uuid) -> Result<Vec<Item>> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT i.* FROM items i
             JOIN search_articles sa ON sa.article_id = i.id
             WHERE sa.search_id = $1
             ORDER BY i.created_at",
        )
        .bind(search_id)
        .fetch_all(&self.pool)
        .await?;
        rows_to_items(rows)
    }

    async fn searches_containing(&self, article_id: Uuid) -> Result<Vec<SearchUnit>> {
        let rows: Vec<SearchRow> = sqlx::query_as(
            "SELECT s.* FROM searches s
             JOIN search_articles sa ON sa.search_id = s.id
             WHERE sa.article_id = $1
             ORDER BY s.created_at",
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SearchUnit::try_from).collect()
    }

    async fn searches_for_source(&self, source: SourceRef) -> Result<Vec<SearchUnit>> {
        let (source_kind, source_id) = source_parts(Some(source));
        let rows: Vec<SearchRow> = sqlx::query_as(
            "SELECT * FROM searches WHERE source_kind = $1 AND source_id = $2 ORDER BY created_at",
        )
        .bind(source_kind)
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SearchUnit::try_from).collect()
    }

    async fn delete_pending_for_source(&self, source: SourceRef) -> Result<u64> {
        let (source_kind, source_id) = source_parts(Some(source));
        let result = sqlx::query(
            "DELETE FROM searches
             WHERE source_kind = $1 AND source_id = $2 AND status = 'pending'",
        )
        .bind(source_kind)
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
