//! Append-only measurement store with exact-match lookup.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::{EcoError, EcoResult, Fingerprint, NewRecord, StoredRecord};

/// The only operations the aggregator needs from persistence. Duplicates are allowed;
/// readers always take the most recently inserted match.
pub trait CacheStore: Send + Sync {
    fn lookup(&self, fingerprint: &Fingerprint) -> EcoResult<Option<StoredRecord>>;

    fn insert(&self, record: NewRecord<'_>) -> EcoResult<u64>;

    /// All records, newest first.
    fn list_all(&self) -> EcoResult<Vec<StoredRecord>>;
}

fn latest_match(records: &[StoredRecord], fingerprint: &Fingerprint) -> Option<StoredRecord> {
    records.iter().rev().find(|r| r.matches(fingerprint)).cloned()
}

fn lock<T>(mutex: &Mutex<T>) -> EcoResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| EcoError::Store("store lock poisoned".to_string()))
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn lookup(&self, fingerprint: &Fingerprint) -> EcoResult<Option<StoredRecord>> {
        Ok(latest_match(&lock(&self.records)?, fingerprint))
    }

    fn insert(&self, record: NewRecord<'_>) -> EcoResult<u64> {
        let mut records = lock(&self.records)?;
        let id = records.len() as u64 + 1;
        records.push(StoredRecord::from_new(id, &record));
        Ok(id)
    }

    fn list_all(&self) -> EcoResult<Vec<StoredRecord>> {
        let records = lock(&self.records)?;
        Ok(records.iter().rev().cloned().collect())
    }
}

/// One JSON object per line, in insertion order. The file is created on first insert.
///
/// Lines that fail to parse (a torn append after a crash, a hand edit) are skipped with a
/// warning so one bad line never takes the whole history down. Inserts hold an exclusive
/// advisory lock on `<path>.lock` while they pick the next id and append, so separate
/// processes sharing one store never hand out the same id.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn exclusive_file_lock(&self) -> EcoResult<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        file.lock()?;
        Ok(file)
    }

    /// Readers only wait on a lock file some writer already created.
    fn shared_file_lock(&self) -> EcoResult<Option<File>> {
        match File::open(self.lock_path()) {
            Ok(file) => {
                file.lock_shared()?;
                Ok(Some(file))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn read_content(&self) -> EcoResult<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(s),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn parse_records(&self, content: &str) -> Vec<StoredRecord> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(idx, line)| match serde_json::from_str::<StoredRecord>(line) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!(
                        "skipping corrupt record at {}:{}: {err}",
                        self.path.display(),
                        idx + 1
                    );
                    None
                }
            })
            .collect()
    }

    fn read_all(&self) -> EcoResult<Vec<StoredRecord>> {
        let _file_lock = self.shared_file_lock()?;
        Ok(self.parse_records(&self.read_content()?))
    }
}

impl CacheStore for JsonlStore {
    fn lookup(&self, fingerprint: &Fingerprint) -> EcoResult<Option<StoredRecord>> {
        let _guard = lock(&self.write_lock)?;
        Ok(latest_match(&self.read_all()?, fingerprint))
    }

    fn insert(&self, record: NewRecord<'_>) -> EcoResult<u64> {
        let _guard = lock(&self.write_lock)?;
        let _file_lock = self.exclusive_file_lock()?;
        let content = self.read_content()?;
        let id = self
            .parse_records(&content)
            .iter()
            .map(|r| r.id)
            .max()
            .unwrap_or(0)
            + 1;
        let stored = StoredRecord::from_new(id, &record);

        let mut line = Vec::new();
        // A torn last line must not swallow the new record.
        if !content.is_empty() && !content.ends_with('\n') {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, &stored)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(id)
    }

    fn list_all(&self) -> EcoResult<Vec<StoredRecord>> {
        let _guard = lock(&self.write_lock)?;
        let mut records = self.read_all()?;
        records.reverse();
        Ok(records)
    }
}
