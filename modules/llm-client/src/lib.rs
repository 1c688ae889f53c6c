pub mod client;
pub mod schema;
pub mod types;

pub use client::LlmClient;
