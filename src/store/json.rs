//! File-backed JSON store.
//!
//! One file per collection under a data directory: `tasks.json`,
//! `settings.json`, `references.json`, `logs.json`. Every mutation loads
//! the whole collection, changes it in memory and rewrites the file
//! through a temp-file rename, holding that collection's mutex for the
//! full cycle. Reads go straight to the file and therefore only ever see
//! a committed snapshot.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::sync::Mutex;

use crate::audit::AuditEntry;
use crate::error::{Error, StorageError};
use crate::references::{ReferenceBook, ReferenceItem, ReferenceKind};
use crate::settings::Settings;
use crate::store::traits::{AuditStore, ReferenceStore, SettingsStore, TaskStore};
use crate::tasks::model::{Task, TaskStatus};

/// One JSON-file collection with its writer lock.
struct Collection<T> {
    name: &'static str,
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Default + Send,
{
    fn new(dir: &Path, name: &'static str, file: &str) -> Self {
        Self {
            name,
            path: dir.join(file),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Load the committed snapshot. A missing file is an empty collection.
    async fn load(&self) -> Result<T, StorageError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => {
                return Err(StorageError::Io {
                    collection: self.name,
                    source: e,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
            collection: self.name,
            source: e,
        })
    }

    /// Rewrite the whole collection atomically (temp file + rename).
    async fn persist(&self, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Corrupt {
            collection: self.name,
            source: e,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        let io_err = |e| StorageError::Io {
            collection: self.name,
            source: e,
        };
        fs::write(&tmp, &json).await.map_err(io_err)?;
        fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }

    /// Run one exclusive load → mutate → rewrite cycle.
    async fn update<R>(&self, mutate: impl FnOnce(&mut T) -> R + Send) -> Result<R, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut value = self.load().await?;
        let result = mutate(&mut value);
        self.persist(&value).await?;
        Ok(result)
    }
}

/// JSON store over all four collections.
pub struct JsonStore {
    dir: PathBuf,
    tasks: Collection<Vec<Task>>,
    settings: Collection<Option<Settings>>,
    references: Collection<Option<ReferenceBook>>,
    logs: Collection<Vec<AuditEntry>>,
}

impl JsonStore {
    /// Open a store rooted at `dir` (created if missing) and make sure
    /// the seeded collections exist: default settings are written on
    /// first run and empty reference catalogs are backfilled.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| StorageError::Io {
            collection: "store",
            source: e,
        })?;

        let store = Self {
            tasks: Collection::new(&dir, "tasks", "tasks.json"),
            settings: Collection::new(&dir, "settings", "settings.json"),
            references: Collection::new(&dir, "references", "references.json"),
            logs: Collection::new(&dir, "logs", "logs.json"),
            dir,
        };

        store
            .settings
            .update(|slot| {
                if slot.is_none() {
                    *slot = Some(Settings::default());
                }
            })
            .await?;

        let backfilled = store
            .references
            .update(|slot| match slot {
                Some(book) => book.backfill_missing(),
                None => {
                    *slot = Some(ReferenceBook::seeded());
                    true
                }
            })
            .await?;
        if backfilled {
            tracing::info!("Reference catalogs seeded with default values");
        }

        tracing::info!(dir = %store.dir.display(), "JSON store initialised");
        Ok(store)
    }

    /// Data directory this store writes to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Verify the data directory is writable.
    pub async fn health_check(&self) -> Result<(), StorageError> {
        let probe = self.dir.join("health_check.tmp");
        let io_err = |e| StorageError::Io {
            collection: "store",
            source: e,
        };
        fs::write(&probe, b"ok").await.map_err(io_err)?;
        fs::remove_file(&probe).await.map_err(io_err)?;
        Ok(())
    }
}

fn sorted_by_position(mut tasks: Vec<Task>) -> Vec<Task> {
    // Stable: ties keep insertion order.
    tasks.sort_by_key(|t| t.position);
    tasks
}

#[async_trait]
impl TaskStore for JsonStore {
    async fn save(&self, task: &Task) -> Result<Task, StorageError> {
        let mut task = task.clone();
        self.tasks
            .update(move |tasks| {
                task.touch();
                match tasks.iter_mut().find(|t| t.id == task.id) {
                    Some(existing) => *existing = task.clone(),
                    None => {
                        let max = tasks.iter().map(|t| t.position).max().unwrap_or(0);
                        task.position = max + 1;
                        tasks.push(task.clone());
                    }
                }
                task
            })
            .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Task>, StorageError> {
        Ok(self.tasks.load().await?.into_iter().find(|t| t.id == id))
    }

    async fn get_all(&self) -> Result<Vec<Task>, StorageError> {
        Ok(sorted_by_position(self.tasks.load().await?))
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.tasks
            .update(|tasks| tasks.retain(|t| t.id != id))
            .await
    }

    async fn update_positions(
        &self,
        positions: &HashMap<String, i64>,
    ) -> Result<(), StorageError> {
        self.tasks
            .update(|tasks| {
                for task in tasks.iter_mut() {
                    if let Some(&position) = positions.get(&task.id) {
                        task.position = position;
                        task.touch();
                    }
                }
            })
            .await
    }

    async fn get_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StorageError> {
        let mut tasks = self.get_all().await?;
        tasks.retain(|t| t.status == status);
        Ok(tasks)
    }

    async fn get_active_in_order(&self) -> Result<Vec<Task>, StorageError> {
        let mut tasks = self.get_all().await?;
        tasks.retain(|t| t.active);
        Ok(tasks)
    }
}

#[async_trait]
impl SettingsStore for JsonStore {
    async fn get(&self) -> Result<Settings, StorageError> {
        Ok(self.settings.load().await?.unwrap_or_default())
    }

    async fn save(&self, settings: &Settings) -> Result<(), StorageError> {
        let settings = settings.clone();
        self.settings
            .update(move |slot| *slot = Some(settings))
            .await
    }
}

#[async_trait]
impl ReferenceStore for JsonStore {
    async fn get(&self) -> Result<ReferenceBook, StorageError> {
        Ok(self.references.load().await?.unwrap_or_default())
    }

    async fn save(&self, book: &ReferenceBook) -> Result<(), StorageError> {
        let book = book.clone();
        self.references.update(move |slot| *slot = Some(book)).await
    }

    async fn add_item(
        &self,
        kind: ReferenceKind,
        value: &str,
        description: &str,
    ) -> crate::error::Result<ReferenceItem> {
        let outcome = self
            .references
            .update(|slot| {
                slot.get_or_insert_with(ReferenceBook::seeded)
                    .add_item(kind, value, description)
            })
            .await
            .map_err(Error::Storage)?;
        outcome.map_err(Error::Validation)
    }

    async fn remove_item(&self, kind: ReferenceKind, item_id: &str) -> Result<bool, StorageError> {
        self.references
            .update(|slot| {
                slot.as_mut()
                    .map(|book| book.remove_item(kind, item_id))
                    .unwrap_or(false)
            })
            .await
    }
}

#[async_trait]
impl AuditStore for JsonStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        let entry = entry.clone();
        self.logs.update(move |logs| logs.push(entry)).await
    }

    async fn recent(&self, count: usize) -> Result<Vec<AuditEntry>, StorageError> {
        let mut logs = self.logs.load().await?;
        logs.sort_by_key(|e| e.timestamp);
        let skip = logs.len().saturating_sub(count);
        Ok(logs.split_off(skip))
    }

    async fn for_task(&self, task_id: &str) -> Result<Vec<AuditEntry>, StorageError> {
        let mut logs = self.logs.load().await?;
        logs.retain(|e| e.task_id == task_id);
        logs.sort_by_key(|e| e.timestamp);
        Ok(logs)
    }
}
