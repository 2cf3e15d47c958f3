use serde::{Deserialize, Serialize};

pub const DEFAULT_PENDING_PREFIX: &str = "TEMP-";
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_DATABASE_NAME: &str = "events-app-db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix of synthesized placeholder ids.
    pub pending_prefix: String,
    /// Entities requested per page on refresh and pagination.
    pub page_size: usize,
    /// Base name of the on-disk cache, when one is used.
    pub database_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_prefix: DEFAULT_PENDING_PREFIX.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            database_name: DEFAULT_DATABASE_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn database_file(&self) -> String {
        format!("{}.sqlite", self.database_name)
    }
}

/// Where `Engine::fetch_entity` reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Cache only; never touches the transport.
    ReturnCacheDataDontFetch,
    /// Always fetch, writing the result through to the cache.
    #[default]
    FetchIgnoringCacheData,
    /// Cached record if present, otherwise fetch.
    ReturnCacheDataElseFetch,
}
