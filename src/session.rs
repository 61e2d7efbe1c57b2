#![forbid(unsafe_code)]

//! One store per process, constructed at start-up and handed to the views.

use std::sync::Arc;

use crate::config::{self, Config, CorruptPolicy};
use crate::error::StoreError;
use crate::storage::{FileStore, KeyValueStore};
use crate::task::store::TaskStore;

#[derive(Debug)]
pub struct Session {
    pub cfg: Config,
    pub store: TaskStore,
}

impl Session {
    /// Opens the on-disk store and loads it. `data_dir` overrides the config.
    pub async fn open(cfg: Config, data_dir: Option<&str>) -> anyhow::Result<Self> {
        let dir = match data_dir {
            Some(d) => config::expand_path(d)?,
            None => cfg.data_dir()?,
        };
        log::debug!("using data dir {}", dir.display());
        let session = Self::with_backend(cfg, Arc::new(FileStore::new(dir)));
        session.reload().await?;
        Ok(session)
    }

    /// Builds a session without loading anything.
    #[must_use]
    pub fn with_backend(cfg: Config, backend: Arc<dyn KeyValueStore>) -> Self {
        let store = TaskStore::new(backend, cfg.store_options());
        Self { cfg, store }
    }

    /// Reloads from storage, applying `storage.on_corrupt` to undecodable data.
    pub async fn reload(&self) -> Result<(), StoreError> {
        match self.store.load_tasks().await {
            Err(e) if e.is_corrupt() && self.cfg.storage.on_corrupt == CorruptPolicy::Empty => {
                log::warn!("{e}; continuing with an empty list");
                self.store.discard_in_memory();
                Ok(())
            }
            other => other,
        }
    }
}
