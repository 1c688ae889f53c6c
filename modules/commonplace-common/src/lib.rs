pub mod types;
pub mod deps;
pub mod config;
pub mod error;
pub mod slug;

pub use types::*;
pub use deps::*;
pub use config::Config;
pub use error::CommonplaceError;
