//! Cross-kind "related content" lookup for surfacing library context.

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use commonplace_common::Item;

use crate::store::{ItemStore, Neighbor};

/// Items further than this are not worth surfacing as related.
pub const RELATED_DISTANCE_THRESHOLD: f32 = 0.5;

pub struct SimilarItems {
    store: Arc<dyn ItemStore>,
}

impl SimilarItems {
    pub fn new(store: Arc<dyn ItemStore>) -> Self {
        Self { store }
    }

    /// Complete items of any kind near an embedding, closest first, capped
    /// by the relatedness threshold.
    pub async fn related(
        &self,
        embedding: &[f32],
        exclude: &[Uuid],
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let neighbors = self.store.nearest_complete(embedding, exclude, limit).await?;
        Ok(neighbors
            .into_iter()
            .filter(|n| n.distance <= RELATED_DISTANCE_THRESHOLD)
            .collect())
    }

    /// Related items for an item, excluding itself and its immediate family.
    pub async fn related_to(&self, item: &Item, limit: usize) -> Result<Vec<Neighbor>> {
        let Some(embedding) = &item.embedding else {
            return Ok(Vec::new());
        };

        let mut exclude = vec![item.id];
        if let Some(parent_id) = item.parent_id {
            exclude.push(parent_id);
        }
        for child in self.store.children_of(item.id).await? {
            exclude.push(child.id);
        }

        self.related(embedding, &exclude, limit).await
    }
}
