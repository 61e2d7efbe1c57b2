#![forbid(unsafe_code)]

//! The in-memory task collection and its persistence cycle.
//!
//! Every mutation rewrites the whole collection under one backend key. The
//! collection is published through a `watch` channel so views re-render after
//! each successful load or mutation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};

use crate::error::StoreError;
use crate::storage::KeyValueStore;
use crate::task::model::{Task, TaskCounts, TaskFilter};

pub const DEFAULT_KEY: &str = "TASKS";

/// When memory is updated relative to the durable write.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WriteOrder {
    /// Mutate memory, then persist. A failed persist leaves memory ahead of storage.
    #[default]
    Optimistic,
    /// Persist the staged collection first; memory changes only on success.
    WriteFirst,
}

/// How the store treats duplicate ids on add and unknown ids on update/delete.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IdPolicy {
    /// Accept duplicates; unknown ids are silent no-ops that still persist.
    #[default]
    Lenient,
    /// Reject with `DuplicateId` / `NotFound` before touching memory or storage.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub key: String,
    pub write_order: WriteOrder,
    pub id_policy: IdPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_owned(),
            write_order: WriteOrder::default(),
            id_policy: IdPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
enum Mutation {
    Add(Task),
    Update(Task),
    Delete(String),
}

impl Mutation {
    fn apply(&self, tasks: &mut Vec<Task>) {
        match self {
            Mutation::Add(task) => tasks.push(task.clone()),
            Mutation::Update(task) => {
                for slot in tasks.iter_mut().filter(|t| t.id == task.id) {
                    slot.clone_from(task);
                }
            }
            Mutation::Delete(id) => tasks.retain(|t| &t.id != id),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Mutation::Add(_) => "add",
            Mutation::Update(_) => "update",
            Mutation::Delete(_) => "delete",
        }
    }

    fn id(&self) -> &str {
        match self {
            Mutation::Add(task) | Mutation::Update(task) => &task.id,
            Mutation::Delete(id) => id,
        }
    }
}

pub struct TaskStore {
    backend: Arc<dyn KeyValueStore>,
    options: StoreOptions,
    tasks: watch::Sender<Vec<Task>>,
    /// Held from staging to publish in write-first mode.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("options", &self.options)
            .field("len", &self.tasks.borrow().len())
            .finish_non_exhaustive()
    }
}

impl TaskStore {
    /// Starts empty; call [`TaskStore::load_tasks`] to read what is persisted.
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueStore>, options: StoreOptions) -> Self {
        Self {
            backend,
            options,
            tasks: watch::Sender::new(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Read access to the current collection. Do not hold across an `.await`.
    #[must_use]
    pub fn tasks(&self) -> watch::Ref<'_, Vec<Task>> {
        self.tasks.borrow()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.borrow().clone()
    }

    /// Notified after every successful load or mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<Task>> {
        self.tasks.subscribe()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.borrow().iter().find(|t| t.id == id).cloned()
    }

    #[must_use]
    pub fn filtered(&self, filter: TaskFilter) -> Vec<Task> {
        filter.apply(&self.tasks.borrow())
    }

    #[must_use]
    pub fn counts(&self) -> TaskCounts {
        TaskCounts::of(&self.tasks.borrow())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Replaces the collection with whatever is stored under the key.
    ///
    /// An absent key yields an empty collection. A blob that does not decode
    /// yields [`StoreError::Corrupt`] and leaves memory untouched, as does a
    /// backend failure.
    pub async fn load_tasks(&self) -> Result<(), StoreError> {
        let key = self.options.key.as_str();
        let tasks = match self.backend.get(key).await? {
            None => Vec::new(),
            Some(bytes) => serde_json::from_slice::<Vec<Task>>(&bytes).map_err(|source| {
                StoreError::Corrupt {
                    key: key.to_owned(),
                    source,
                }
            })?,
        };
        log::debug!("loaded {} tasks from '{key}'", tasks.len());
        self.tasks.send_replace(tasks);
        Ok(())
    }

    /// Empties the in-memory collection without writing anything.
    ///
    /// For callers that choose to carry on after a corrupt load; the stored
    /// blob is only replaced by the next mutation.
    pub fn discard_in_memory(&self) {
        self.tasks.send_replace(Vec::new());
    }

    pub async fn add_task(&self, task: Task) -> Result<(), StoreError> {
        self.mutate(Mutation::Add(task)).await
    }

    /// Overwrites every field of the task with a matching id. No merge.
    pub async fn update_task(&self, task: Task) -> Result<(), StoreError> {
        self.mutate(Mutation::Update(task)).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        self.mutate(Mutation::Delete(id.to_owned())).await
    }

    async fn mutate(&self, mutation: Mutation) -> Result<(), StoreError> {
        match self.options.write_order {
            WriteOrder::Optimistic => {
                self.check_policy(&mutation)?;
                // Memory and encoding happen before the first suspension point,
                // so a following call already sees this change.
                self.tasks.send_modify(|tasks| mutation.apply(tasks));
                let bytes = encode(&self.tasks.borrow())?;
                if let Err(e) = self.persist(&bytes).await {
                    log::warn!(
                        "{} of task {} kept in memory but not persisted: {e}",
                        mutation.name(),
                        mutation.id()
                    );
                    return Err(e);
                }
            }
            WriteOrder::WriteFirst => {
                // Staging from a snapshot taken by another pending write
                // would drop that write from memory on publish.
                let _guard = self.write_lock.lock().await;
                self.check_policy(&mutation)?;
                let mut staged = self.tasks.borrow().clone();
                mutation.apply(&mut staged);
                let bytes = encode(&staged)?;
                self.persist(&bytes).await?;
                self.tasks.send_replace(staged);
            }
        }

        log::debug!("{} task {}", mutation.name(), mutation.id());
        Ok(())
    }

    fn check_policy(&self, mutation: &Mutation) -> Result<(), StoreError> {
        let exists = self.tasks.borrow().iter().any(|t| t.id == mutation.id());
        match (mutation, exists) {
            (Mutation::Add(task), true) => {
                if self.options.id_policy == IdPolicy::Strict {
                    return Err(StoreError::DuplicateId(task.id.clone()));
                }
                log::debug!("adding task with duplicate id {}", task.id);
            }
            (Mutation::Update(_) | Mutation::Delete(_), false) => {
                if self.options.id_policy == IdPolicy::Strict {
                    return Err(StoreError::NotFound(mutation.id().to_owned()));
                }
                log::debug!("{} of unknown task {}", mutation.name(), mutation.id());
            }
            _ => {}
        }
        Ok(())
    }

    async fn persist(&self, bytes: &[u8]) -> Result<(), StoreError> {
        self.backend.set(&self.options.key, bytes).await?;
        log::debug!(
            "persisted {} bytes under '{}'",
            bytes.len(),
            self.options.key
        );
        Ok(())
    }
}

fn encode(tasks: &[Task]) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(tasks).map_err(StoreError::Encode)
}
