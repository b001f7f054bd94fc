use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cloud_provider::{Kind, ProviderCredential};
use crate::resources::RegionInfo;

/// One named connection: the (driver, credential, region) binding callers
/// select per request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub provider: Kind,
    pub credential: ProviderCredential,
    pub region: RegionInfo,
}

/// Boundary to the persisted configuration store. The engine only ever
/// reads it, keyed by connection name; whoever owns the store decides how
/// records are persisted.
pub trait ConnectionCatalog: Send + Sync {
    fn get(&self, connection_name: &str) -> Option<ConnectionConfig>;
}

/// In-memory catalog, enough for embedding and tests.
#[derive(Default)]
pub struct StaticCatalog {
    entries: HashMap<String, ConnectionConfig>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        StaticCatalog::default()
    }

    pub fn with_connection(mut self, connection_name: &str, config: ConnectionConfig) -> Self {
        self.entries.insert(connection_name.to_string(), config);
        self
    }
}

impl ConnectionCatalog for StaticCatalog {
    fn get(&self, connection_name: &str) -> Option<ConnectionConfig> {
        self.entries.get(connection_name).cloned()
    }
}
