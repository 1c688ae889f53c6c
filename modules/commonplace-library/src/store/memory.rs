//! In-memory store used by unit and integration tests. Insertion order is
//! preserved so nearest-neighbor ties rank deterministically.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use commonplace_common::slug::{slugify, with_suffix};
use commonplace_common::{Item, ItemKind, ItemStatus, SearchStatus, SearchUnit, SourceRef};

use crate::similarity::cosine_distance;
use crate::store::{AdoptOutcome, ItemStore, Neighbor, SearchStore};

#[derive(Default)]
struct Inner {
    items: Vec<Item>,
    searches: Vec<SearchUnit>,
    memberships: Vec<(Uuid, Uuid)>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unique_slug(taken: impl Fn(&str) -> bool, base: &str, fallback: &str) -> String {
    let base = slugify(base).unwrap_or_else(|| fallback.to_string());
    if !taken(&base) {
        return base;
    }
    loop {
        let candidate = with_suffix(&base);
        if !taken(&candidate) {
            return candidate;
        }
    }
}

fn rank_neighbors(candidates: Vec<(Item, f32)>, limit: usize) -> Vec<Neighbor> {
    let mut neighbors: Vec<Neighbor> = candidates
        .into_iter()
        .map(|(item, distance)| Neighbor { item, distance })
        .collect();
    // stable sort keeps insertion order among equal distances
    neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    neighbors.truncate(limit);
    neighbors
}

impl Inner {
    fn item(&self, id: Uuid) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    fn item_mut(&mut self, id: Uuid) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    fn has_children(&self, id: Uuid) -> bool {
        self.items.iter().any(|i| i.parent_id == Some(id))
    }

    // searches spawned by an absorbed child follow it to the parent
    fn repoint_sources(&mut self, from: Uuid, to: Uuid) {
        for unit in &mut self.searches {
            unit.source = match unit.source {
                Some(SourceRef::Article(id)) if id == from => Some(SourceRef::Article(to)),
                Some(SourceRef::Insight(id)) if id == from => Some(SourceRef::Insight(to)),
                other => other,
            };
        }
    }

    fn scan(
        &self,
        kind: ItemKind,
        embedding: &[f32],
        exclude: Uuid,
        exclude_article: Option<Uuid>,
        want_parents: bool,
    ) -> Vec<(Item, f32)> {
        self.items
            .iter()
            .filter(|i| i.kind == kind && i.id != exclude && i.status == ItemStatus::Complete)
            .filter(|i| i.parent_id.is_none())
            .filter(|i| self.has_children(i.id) == want_parents)
            .filter(|i| match exclude_article {
                Some(article_id) => i.article_id != Some(article_id),
                None => true,
            })
            .filter_map(|i| {
                let e = i.embedding.as_ref()?;
                Some((i.clone(), cosine_distance(embedding, e)))
            })
            .collect()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert(&self, mut item: Item) -> Result<Item> {
        let mut inner = self.inner.lock().unwrap();
        if item.slug.is_empty() {
            let fallback = item.id.simple().to_string();
            item.slug = unique_slug(
                |s| inner.items.iter().any(|i| i.slug == s),
                &item.title,
                &fallback[..8],
            );
        }
        inner.items.push(item.clone());
        Ok(item)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Item>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.item(id).cloned())
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<Item>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .items
            .iter()
            .find(|i| i.url.as_deref() == Some(url))
            .cloned())
    }

    async fn update(&self, item: &Item) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.item_mut(item.id) {
            Some(existing) => {
                *existing = item.clone();
                Ok(())
            }
            None => anyhow::bail!("item {} not found", item.id),
        }
    }

    async fn children_of(&self, parent_id: Uuid) -> Result<Vec<Item>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .items
            .iter()
            .filter(|i| i.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn insights_of_article(&self, article_id: Uuid) -> Result<Vec<Item>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .items
            .iter()
            .filter(|i| i.kind == ItemKind::Insight && i.article_id == Some(article_id))
            .cloned()
            .collect())
    }

    async fn nearest_parents(
        &self,
        kind: ItemKind,
        embedding: &[f32],
        exclude: Uuid,
        exclude_article: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let inner = self.inner.lock().unwrap();
        let candidates = inner.scan(kind, embedding, exclude, exclude_article, true);
        Ok(rank_neighbors(candidates, limit))
    }

    async fn nearest_peers(
        &self,
        kind: ItemKind,
        embedding: &[f32],
        exclude: Uuid,
        exclude_article: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let inner = self.inner.lock().unwrap();
        let candidates = inner.scan(kind, embedding, exclude, exclude_article, false);
        Ok(rank_neighbors(candidates, limit))
    }

    async fn nearest_complete(
        &self,
        embedding: &[f32],
        exclude: &[Uuid],
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let inner = self.inner.lock().unwrap();
        let candidates = inner
            .items
            .iter()
            .filter(|i| i.status == ItemStatus::Complete && !exclude.contains(&i.id))
            .filter_map(|i| {
                let e = i.embedding.as_ref()?;
                Some((i.clone(), cosine_distance(embedding, e)))
            })
            .collect();
        Ok(rank_neighbors(candidates, limit))
    }

    async fn adopt(&self, child_id: Uuid, parent_id: Uuid) -> Result<AdoptOutcome> {
        let mut inner = self.inner.lock().unwrap();

        let parent_is_child = match inner.item(parent_id) {
            Some(p) => p.parent_id.is_some(),
            None => anyhow::bail!("parent {} not found", parent_id),
        };
        let child_ok = match inner.item(child_id) {
            Some(c) => c.parent_id.is_none() && !inner.has_children(child_id),
            None => anyhow::bail!("child {} not found", child_id),
        };

        if parent_is_child || !child_ok {
            return Ok(AdoptOutcome::LostRace);
        }

        inner.item_mut(child_id).unwrap().parent_id = Some(parent_id);
        inner.repoint_sources(child_id, parent_id);
        Ok(AdoptOutcome::Linked)
    }

    async fn create_parent(
        &self,
        mut parent: Item,
        child_a: Uuid,
        child_b: Uuid,
    ) -> Result<Option<Item>> {
        let mut inner = self.inner.lock().unwrap();

        for id in [child_a, child_b] {
            let free = match inner.item(id) {
                Some(c) => c.parent_id.is_none() && !inner.has_children(id),
                None => anyhow::bail!("child {} not found", id),
            };
            if !free {
                return Ok(None);
            }
        }

        if parent.slug.is_empty() {
            let fallback = parent.id.simple().to_string();
            parent.slug = unique_slug(
                |s| inner.items.iter().any(|i| i.slug == s),
                &parent.title,
                &fallback[..8],
            );
        }

        let parent_id = parent.id;
        inner.items.push(parent.clone());
        inner.item_mut(child_a).unwrap().parent_id = Some(parent_id);
        inner.item_mut(child_b).unwrap().parent_id = Some(parent_id);
        inner.repoint_sources(child_a, parent_id);
        inner.repoint_sources(child_b, parent_id);
        Ok(Some(parent))
    }
}

#[async_trait]
impl SearchStore for MemoryStore {
    async fn insert(&self, mut unit: SearchUnit) -> Result<SearchUnit> {
        let mut inner = self.inner.lock().unwrap();
        if unit.slug.is_empty() {
            let fallback = unit.id.simple().to_string();
            unit.slug = unique_slug(
                |s| inner.searches.iter().any(|u| u.slug == s),
                &unit.query,
                &fallback[..8],
            );
        }
        inner.searches.push(unit.clone());
        Ok(unit)
    }

    async fn get(&self, id: Uuid) -> Result<Option<SearchUnit>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.searches.iter().find(|u| u.id == id).cloned())
    }

    async fn update(&self, unit: &SearchUnit) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.searches.iter_mut().find(|u| u.id == unit.id) {
            Some(existing) => {
                *existing = unit.clone();
                Ok(())
            }
            None => anyhow::bail!("search {} not found", unit.id),
        }
    }

    async fn advance_status(&self, id: Uuid, next: SearchStatus) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.searches.iter_mut().find(|u| u.id == id) {
            Some(unit) => {
                if unit.status.can_advance_to(next) {
                    unit.status = next;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            None => anyhow::bail!("search {} not found", id),
        }
    }

    async fn add_membership(&self, search_id: Uuid, article_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.memberships.contains(&(search_id, article_id)) {
            return Ok(false);
        }
        inner.memberships.push((search_id, article_id));
        Ok(true)
    }

    async fn discovered_articles(&self, search_id: Uuid) -> Result<Vec<Item>> {
        let inner = self.inner.lock().unwrap();
        let ids: Vec<Uuid> = inner
            .memberships
            .iter()
            .filter(|(s, _)| *s == search_id)
            .map(|(_, a)| *a)
            .collect();
        Ok(ids.iter().filter_map(|id| inner.item(*id).cloned()).collect())
    }

    async fn searches_containing(&self, article_id: Uuid) -> Result<Vec<SearchUnit>> {
        let inner = self.inner.lock().unwrap();
        let ids: Vec<Uuid> = inner
            .memberships
            .iter()
            .filter(|(_, a)| *a == article_id)
            .map(|(s, _)| *s)
            .collect();
        Ok(inner
            .searches
            .iter()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn searches_for_source(&self, source: SourceRef) -> Result<Vec<SearchUnit>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .searches
            .iter()
            .filter(|u| u.source == Some(source))
            .cloned()
            .collect())
    }

    async fn delete_pending_for_source(&self, source: SourceRef) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.searches.len();
        inner
            .searches
            .retain(|u| !(u.source == Some(source) && u.status == SearchStatus::Pending));
        Ok((before - inner.searches.len()) as u64)
    }
}
