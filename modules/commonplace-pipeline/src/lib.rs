pub mod analyst;
pub mod deps;
pub mod ingest;
pub mod insights;
pub mod orchestrator;
pub mod queue;
pub mod readiness;
pub mod search;
pub mod summarize;

pub use deps::PipelineDeps;
pub use orchestrator::Orchestrator;
pub use queue::TokioQueue;
pub use readiness::SearchReadiness;
