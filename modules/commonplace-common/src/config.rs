use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // AI providers
    pub openrouter_api_key: String,
    pub chat_model: String,
    pub embedding_model: String,

    // Search / crawling
    pub exa_api_key: String,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            openrouter_api_key: required_env("OPENROUTER_API_KEY"),
            chat_model: env::var("CHAT_MODEL")
                .unwrap_or_else(|_| "google/gemini-2.5-flash".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "openai/text-embedding-3-small".to_string()),
            exa_api_key: required_env("EXA_API_KEY"),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
