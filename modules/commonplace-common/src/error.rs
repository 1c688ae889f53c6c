use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommonplaceError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Sameness oracle error: {0}")]
    Oracle(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Crawl error: {0}")]
    Crawl(String),

    #[error("Web search error: {0}")]
    WebSearch(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Hierarchy conflict: {0}")]
    HierarchyConflict(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
