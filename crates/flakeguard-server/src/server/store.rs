use flakeguard::{CoordinationStore, MemoryStore, StoreError};

use crate::server::{
    config::{ServerConfig, StoreKind},
    consul::ConsulStore,
};

/// The coordination store selected at startup.
#[derive(Clone, Debug)]
pub enum Store {
    Consul(ConsulStore),
    Memory(MemoryStore),
}

impl Store {
    /// # Errors
    ///
    /// If the Consul HTTP client cannot be built.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        Ok(match config.store {
            StoreKind::Consul => Self::Consul(ConsulStore::new(
                &config.consul_addr,
                config.consul_token.clone(),
            )?),
            StoreKind::Memory => Self::Memory(MemoryStore::new()),
        })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Consul(consul) => format!("consul at {}", consul.base_url()),
            Self::Memory(_) => "memory (no restart protection)".to_owned(),
        }
    }
}

impl CoordinationStore for Store {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Self::Consul(store) => store.get(key).await,
            Self::Memory(store) => store.get(key).await,
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        match self {
            Self::Consul(store) => store.put(key, value).await,
            Self::Memory(store) => store.put(key, value).await,
        }
    }
}
