pub mod adjudicator;
pub mod hierarchy;
pub mod oracle;
pub mod related;
pub mod similarity;
pub mod store;

pub use adjudicator::{MergeAdjudicator, MergePolicy};
pub use hierarchy::{AbsorbOutcome, HierarchyManager};
pub use related::SimilarItems;
pub use store::{AdoptOutcome, ItemStore, Neighbor, SearchStore};
