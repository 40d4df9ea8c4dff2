use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Users,
    ClassInstances,
    Bookings,
    Equipment,
    ClassTypes,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::ClassInstances => "class_instances",
            EntityKind::Bookings => "bookings",
            EntityKind::Equipment => "equipment",
            EntityKind::ClassTypes => "class_types",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed {kind} collection: {source}")]
    Serde {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("{kind} changed concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        kind: EntityKind,
        expected: u64,
        found: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Raw key-value persistence. Each entity kind is stored as one JSON
/// array together with a version counter; `save` is a conditional write.
pub trait Backend: Send + Sync {
    fn load(&self, kind: EntityKind) -> Result<Versioned<Value>, StoreError>;

    /// Replaces the collection when its stored version still equals
    /// `expected`, returning the new version.
    fn save(&self, kind: EntityKind, expected: u64, value: Value) -> Result<u64, StoreError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryBackend {
    collections: Mutex<HashMap<EntityKind, Versioned<Value>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn load(&self, kind: EntityKind) -> Result<Versioned<Value>, StoreError> {
        let collections = lock(&self.collections);
        Ok(collections.get(&kind).cloned().unwrap_or(Versioned {
            version: 0,
            value: Value::Array(Vec::new()),
        }))
    }

    fn save(&self, kind: EntityKind, expected: u64, value: Value) -> Result<u64, StoreError> {
        let mut collections = lock(&self.collections);
        let found = collections.get(&kind).map_or(0, |v| v.version);
        if found != expected {
            return Err(StoreError::VersionConflict {
                kind,
                expected,
                found,
            });
        }
        let version = found + 1;
        collections.insert(kind, Versioned { version, value });
        Ok(version)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u64,
    items: Value,
}

/// Stores every entity kind as `<data_dir>/<kind>.json`.
pub struct FileBackend {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path(&self, kind: EntityKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.as_str()))
    }

    fn read(&self, kind: EntityKind) -> Result<Envelope, StoreError> {
        let path = self.path(kind);
        if !path.exists() {
            return Ok(Envelope {
                version: 0,
                items: Value::Array(Vec::new()),
            });
        }
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|source| StoreError::Serde { kind, source })
    }
}

impl Backend for FileBackend {
    fn load(&self, kind: EntityKind) -> Result<Versioned<Value>, StoreError> {
        let envelope = self.read(kind)?;
        Ok(Versioned {
            version: envelope.version,
            value: envelope.items,
        })
    }

    fn save(&self, kind: EntityKind, expected: u64, value: Value) -> Result<u64, StoreError> {
        let _guard = lock(&self.write_lock);
        let found = self.read(kind)?.version;
        if found != expected {
            return Err(StoreError::VersionConflict {
                kind,
                expected,
                found,
            });
        }
        let envelope = Envelope {
            version: found + 1,
            items: value,
        };
        let body = serde_json::to_vec_pretty(&envelope)
            .map_err(|source| StoreError::Serde { kind, source })?;
        let path = self.path(kind);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        Ok(envelope.version)
    }
}

/// Emitted after every successful save so observers can re-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: EntityKind,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub version: u64,
    pub items: Vec<T>,
}

/// Outcome of a transaction body: write the collection back or leave it.
pub enum Step<R> {
    Commit(R),
    Skip(R),
}

#[derive(Clone)]
pub struct Repository {
    backend: Arc<dyn Backend>,
    changes: broadcast::Sender<ChangeEvent>,
    max_attempts: u32,
}

impl Repository {
    pub fn new(backend: Arc<dyn Backend>, max_attempts: u32) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            backend,
            changes,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), 5)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    pub fn load_all<T: DeserializeOwned>(&self, kind: EntityKind) -> Result<Snapshot<T>, StoreError> {
        let Versioned { version, value } = self.backend.load(kind)?;
        let items = serde_json::from_value(value).map_err(|source| StoreError::Serde { kind, source })?;
        Ok(Snapshot { version, items })
    }

    pub fn save_all<T: Serialize>(
        &self,
        kind: EntityKind,
        expected: u64,
        items: &[T],
    ) -> Result<u64, StoreError> {
        let value = serde_json::to_value(items).map_err(|source| StoreError::Serde { kind, source })?;
        let version = self.backend.save(kind, expected, value)?;
        // no receivers is fine
        let _ = self.changes.send(ChangeEvent { kind, version });
        Ok(version)
    }

    /// Read the latest collection, run `body` on it and write it back only
    /// if nobody else saved in between, retrying on a version conflict.
    /// `body` may run several times and must not have outside effects.
    pub fn transact<T, R, E, F>(&self, kind: EntityKind, mut body: F) -> Result<R, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StoreError>,
        F: FnMut(&mut Vec<T>) -> Result<Step<R>, E>,
    {
        let mut attempt = 1;
        loop {
            let Snapshot { version, mut items } = self.load_all::<T>(kind)?;
            let result = match body(&mut items)? {
                Step::Skip(result) => return Ok(result),
                Step::Commit(result) => result,
            };
            match self.save_all(kind, version, &items) {
                Ok(_) => return Ok(result),
                Err(StoreError::VersionConflict { found, .. }) if attempt < self.max_attempts => {
                    debug!(%kind, attempt, expected = version, found, "write conflict, retrying");
                    attempt += 1;
                }
                Err(err) => {
                    warn!(%kind, attempt, error = %err, "write failed");
                    return Err(err.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    #[test]
    fn test_missing_collection_is_empty() {
        let repo = Repository::in_memory();
        let snapshot = repo.load_all::<Item>(EntityKind::Users).unwrap();
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.items.is_empty());
    }

    #[test]
    fn test_stale_save_is_rejected() {
        let repo = Repository::in_memory();
        repo.save_all(EntityKind::Users, 0, &[Item { id: 1 }]).unwrap();
        let err = repo
            .save_all(EntityKind::Users, 0, &[Item { id: 2 }])
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 0,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_save_emits_change_event() {
        let repo = Repository::in_memory();
        let mut rx = repo.subscribe();
        repo.save_all(EntityKind::Bookings, 0, &[Item { id: 7 }]).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            ChangeEvent {
                kind: EntityKind::Bookings,
                version: 1
            }
        );
    }

    #[test]
    fn test_transact_retries_after_concurrent_write() {
        let repo = Repository::in_memory();
        let mut interfered = false;
        let result: Result<usize, StoreError> =
            repo.transact(EntityKind::Equipment, |items: &mut Vec<Item>| {
                if !interfered {
                    interfered = true;
                    // another writer sneaks in between read and write
                    repo.save_all(EntityKind::Equipment, 0, &[Item { id: 1 }])?;
                }
                items.push(Item { id: 2 });
                Ok(Step::Commit(items.len()))
            });
        assert_eq!(result.unwrap(), 2);
        let snapshot = repo.load_all::<Item>(EntityKind::Equipment).unwrap();
        assert_eq!(snapshot.items, vec![Item { id: 1 }, Item { id: 2 }]);
        assert_eq!(snapshot.version, 2);
    }

    #[test]
    fn test_skip_does_not_write() {
        let repo = Repository::in_memory();
        let mut rx = repo.subscribe();
        let result: Result<(), StoreError> =
            repo.transact(EntityKind::Users, |_items: &mut Vec<Item>| Ok(Step::Skip(())));
        result.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(repo.load_all::<Item>(EntityKind::Users).unwrap().version, 0);
    }

    #[test]
    fn test_file_backend_persists_between_opens() {
        let dir = std::env::temp_dir().join(format!("studio-store-{}", uuid::Uuid::new_v4()));
        {
            let backend = FileBackend::open(&dir).unwrap();
            let repo = Repository::new(Arc::new(backend), 3);
            repo.save_all(EntityKind::ClassTypes, 0, &[Item { id: 3 }]).unwrap();
        }
        let backend = FileBackend::open(&dir).unwrap();
        let repo = Repository::new(Arc::new(backend), 3);
        let snapshot = repo.load_all::<Item>(EntityKind::ClassTypes).unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.items, vec![Item { id: 3 }]);
        assert!(matches!(
            repo.save_all(EntityKind::ClassTypes, 0, &[Item { id: 4 }]),
            Err(StoreError::VersionConflict { .. })
        ));
        fs::remove_dir_all(dir).unwrap();
    }
}
