//! Shared collaborator container for the pipeline stages.

use std::sync::Arc;

use commonplace_common::{ContentAnalyst, Crawler, JobQueue, TextEmbedder, WebSearcher};
use commonplace_library::store::{ItemStore, SearchStore};
use commonplace_library::{HierarchyManager, SimilarItems};

/// Everything a stage handler needs. Built once at startup with live
/// collaborators; tests assemble one from fakes.
pub struct PipelineDeps {
    pub items: Arc<dyn ItemStore>,
    pub searches: Arc<dyn SearchStore>,
    pub embedder: Arc<dyn TextEmbedder>,
    pub analyst: Arc<dyn ContentAnalyst>,
    pub web: Arc<dyn WebSearcher>,
    pub crawler: Arc<dyn Crawler>,
    pub queue: Arc<dyn JobQueue>,
    pub hierarchy: Arc<HierarchyManager>,
    pub related: Arc<SimilarItems>,
}
