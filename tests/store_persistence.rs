use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use taskdeck::error::{StorageError, StoreError};
use taskdeck::storage::{FileStore, KeyValueStore, MemoryStore};
use taskdeck::task::{StoreOptions, Task, TaskStore, WriteOrder};

/// Reads succeed; writes fail while `broken` is set.
#[derive(Debug, Default)]
struct FlakyStore {
    inner: MemoryStore,
    broken: AtomicBool,
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("disk full".to_owned()));
        }
        self.inner.set(key, value).await
    }
}

/// Gives other tasks a turn before every write lands.
#[derive(Debug, Default)]
struct YieldingStore {
    inner: MemoryStore,
}

#[async_trait]
impl KeyValueStore for YieldingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.inner.set(key, value).await
    }
}

fn file_store(dir: &std::path::Path) -> TaskStore {
    TaskStore::new(
        Arc::new(FileStore::new(dir.to_path_buf())),
        StoreOptions::default(),
    )
}

#[tokio::test]
async fn tasks_survive_a_restart() {
    let td = tempfile::tempdir().expect("tempdir");

    let first = file_store(td.path());
    first.load_tasks().await.expect("initial load");
    assert!(first.is_empty());

    let milk = Task::new("Buy milk").with_due_date("2030-05-01T00:00:00Z");
    let dog = Task::new("Walk the dog").with_description("around the park");
    first.add_task(milk.clone()).await.expect("add");
    first.add_task(dog.clone()).await.expect("add");
    first
        .update_task(dog.clone().completed(true))
        .await
        .expect("update");

    let second = file_store(td.path());
    second.load_tasks().await.expect("reload");
    let tasks = second.snapshot();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0], milk);
    assert_eq!(tasks[1].description.as_deref(), Some("around the park"));
    assert!(tasks[1].completed);

    second.delete_task(&milk.id).await.expect("delete");
    let third = file_store(td.path());
    third.load_tasks().await.expect("reload");
    assert_eq!(third.snapshot(), vec![dog.completed(true)]);
}

#[tokio::test]
async fn stored_blob_uses_camel_case_and_omits_absent_fields() {
    let td = tempfile::tempdir().expect("tempdir");
    let store = file_store(td.path());
    store
        .add_task(Task::new("Plain"))
        .await
        .expect("add plain");
    store
        .add_task(Task::new("Dated").with_due_date("2030-01-02T00:00:00Z"))
        .await
        .expect("add dated");

    let raw = std::fs::read_to_string(td.path().join("TASKS.json")).expect("read blob");
    let json: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    let items = json.as_array().expect("array");
    assert!(items[0].get("description").is_none());
    assert!(items[0].get("dueDate").is_none());
    assert_eq!(items[0]["completed"], false);
    assert_eq!(items[1]["dueDate"], "2030-01-02T00:00:00Z");
}

#[tokio::test]
async fn optimistic_write_keeps_memory_ahead_of_a_failed_persist() {
    let backend = Arc::new(FlakyStore::default());
    let store = TaskStore::new(backend.clone(), StoreOptions::default());
    store.add_task(Task::new("saved")).await.expect("add");

    backend.broken.store(true, Ordering::SeqCst);
    let err = store
        .add_task(Task::new("unsaved"))
        .await
        .expect_err("write fails");
    assert!(matches!(err, StoreError::Storage(StorageError::Unavailable(_))));
    assert_eq!(store.len(), 2);

    // Storage still holds the last good write.
    backend.broken.store(false, Ordering::SeqCst);
    store.load_tasks().await.expect("reload");
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn write_first_leaves_memory_untouched_on_failure() {
    let backend = Arc::new(FlakyStore::default());
    let options = StoreOptions {
        write_order: WriteOrder::WriteFirst,
        ..StoreOptions::default()
    };
    let store = TaskStore::new(backend.clone(), options);
    let keep = Task::new("keep");
    store.add_task(keep.clone()).await.expect("add");

    backend.broken.store(true, Ordering::SeqCst);
    assert!(store.delete_task(&keep.id).await.is_err());
    assert!(store.add_task(Task::new("lost")).await.is_err());
    assert_eq!(store.snapshot(), vec![keep]);
}

#[tokio::test]
async fn generated_ids_are_unique() {
    let store = TaskStore::new(Arc::new(MemoryStore::new()), StoreOptions::default());
    for i in 0..200 {
        store
            .add_task(Task::new(format!("task {i}")))
            .await
            .expect("add");
    }
    let ids: HashSet<String> = store.snapshot().into_iter().map(|t| t.id).collect();
    assert_eq!(ids.len(), 200);
}

#[tokio::test]
async fn concurrent_adds_are_all_kept() {
    let store = Arc::new(TaskStore::new(
        Arc::new(MemoryStore::new()),
        StoreOptions::default(),
    ));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.add_task(Task::new(format!("t{i}"))).await })
        })
        .collect();
    for h in handles {
        h.await.expect("join").expect("add");
    }

    assert_eq!(store.len(), 16);
}

#[tokio::test]
async fn overlapping_write_first_adds_are_all_kept() {
    let backend = Arc::new(YieldingStore::default());
    let options = StoreOptions {
        write_order: WriteOrder::WriteFirst,
        ..StoreOptions::default()
    };
    let store = TaskStore::new(backend.clone(), options);

    let (a, b) = (Task::new("first"), Task::new("second"));
    let (ra, rb) = tokio::join!(store.add_task(a.clone()), store.add_task(b.clone()));
    ra.expect("add first");
    rb.expect("add second");
    assert_eq!(store.snapshot(), vec![a.clone(), b.clone()]);

    // The later write carried both tasks.
    store.load_tasks().await.expect("reload");
    assert_eq!(store.snapshot(), vec![a, b]);
}
