//! Generic keyed record tables.
//!
//! The conversation core only needs key lookup and a full scan, so a
//! table is a tiny async trait with an in-memory and a file-backed backend.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// A record stored in a [`Table`]
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Entity name used in errors and logs
    const ENTITY: &'static str;

    fn id(&self) -> &str;
}

/// Keyed record store
#[async_trait]
pub trait Table<T: Record>: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    async fn add(&self, record: T) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<T>>;

    /// Insert or replace the whole record
    async fn put(&self, record: T) -> Result<()>;

    /// Remove a record; removing a missing id is a no-op
    async fn delete(&self, id: &str) -> Result<()>;

    /// Every stored record, in no particular order
    async fn to_array(&self) -> Result<Vec<T>>;
}

/// In-process table, lost on exit
pub struct MemoryTable<T> {
    records: Mutex<HashMap<String, T>>,
}

impl<T> Default for MemoryTable<T> {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> MemoryTable<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T: Record> Table<T> for MemoryTable<T> {
    async fn add(&self, record: T) -> Result<()> {
        let mut records = self.records.lock();
        if records.contains_key(record.id()) {
            return Err(Error::AlreadyExists {
                entity: T::ENTITY,
                id: record.id().to_string(),
            });
        }
        records.insert(record.id().to_string(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.records.lock().get(id).cloned())
    }

    async fn put(&self, record: T) -> Result<()> {
        self.records
            .lock()
            .insert(record.id().to_string(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.lock().remove(id);
        Ok(())
    }

    async fn to_array(&self) -> Result<Vec<T>> {
        Ok(self.records.lock().values().cloned().collect())
    }
}

/// File-backed table: one `<id>.json` document per record in a directory
pub struct JsonTable<T> {
    dir: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> JsonTable<T> {
    /// Open (creating if needed) the table directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!("Opened {} table at {}", T::ENTITY, dir.display());
        Ok(Self {
            dir,
            _record: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty()
            || id.starts_with('.')
            || id.contains(['/', '\\'])
            || id.contains("..")
        {
            return Err(Error::Other(format!("Invalid {} id: {:?}", T::ENTITY, id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    async fn read(&self, path: &Path) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temp file so readers never see a torn record
    async fn write(&self, record: &T) -> Result<()> {
        let path = self.record_path(record.id())?;
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", record.id(), uuid::Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Record> Table<T> for JsonTable<T> {
    async fn add(&self, record: T) -> Result<()> {
        let path = self.record_path(record.id())?;
        if tokio::fs::try_exists(&path).await? {
            return Err(Error::AlreadyExists {
                entity: T::ENTITY,
                id: record.id().to_string(),
            });
        }
        self.write(&record).await
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        let path = self.record_path(id)?;
        self.read(&path).await
    }

    async fn put(&self, record: T) -> Result<()> {
        self.write(&record).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.record_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn to_array(&self) -> Result<Vec<T>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().and_then(|s| s.to_str()) == Some("json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Skipping unreadable {} at {}: {}", T::ENTITY, path.display(), e);
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl Record for Note {
        const ENTITY: &'static str = "note";

        fn id(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str, body: &str) -> Note {
        Note {
            id: id.into(),
            body: body.into(),
        }
    }

    async fn exercise(table: &dyn Table<Note>) {
        table.add(note("a", "one")).await.unwrap();
        assert!(matches!(
            table.add(note("a", "dup")).await,
            Err(Error::AlreadyExists { entity: "note", .. })
        ));
        assert_eq!(table.get("a").await.unwrap(), Some(note("a", "one")));
        assert_eq!(table.get("missing").await.unwrap(), None);

        table.put(note("a", "two")).await.unwrap();
        table.put(note("b", "three")).await.unwrap();
        assert_eq!(table.get("a").await.unwrap().unwrap().body, "two");

        let mut all = table.to_array().await.unwrap();
        all.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(all, vec![note("a", "two"), note("b", "three")]);

        table.delete("a").await.unwrap();
        table.delete("a").await.unwrap();
        assert_eq!(table.get("a").await.unwrap(), None);
        assert_eq!(table.to_array().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_table() {
        exercise(&MemoryTable::<Note>::new()).await;
    }

    #[tokio::test]
    async fn test_json_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = JsonTable::<Note>::open(dir.path().join("notes")).await.unwrap();
        exercise(&table).await;
    }

    #[tokio::test]
    async fn test_json_table_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let table = JsonTable::<Note>::open(dir.path()).await.unwrap();
            table.put(note("kept", "body")).await.unwrap();
        }
        let table = JsonTable::<Note>::open(dir.path()).await.unwrap();
        assert_eq!(table.get("kept").await.unwrap(), Some(note("kept", "body")));
    }

    #[tokio::test]
    async fn test_json_table_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let table = JsonTable::<Note>::open(dir.path()).await.unwrap();
        table.put(note("good", "ok")).await.unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"ignored").unwrap();
        assert_eq!(table.to_array().await.unwrap(), vec![note("good", "ok")]);
    }

    #[tokio::test]
    async fn test_json_table_rejects_path_ids() {
        let dir = tempfile::tempdir().unwrap();
        let table = JsonTable::<Note>::open(dir.path()).await.unwrap();
        assert!(table.put(note("../escape", "x")).await.is_err());
        assert!(table.get("a/b").await.is_err());
    }
}
