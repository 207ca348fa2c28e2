use super::{validate_content_id, ItemIndex, KeyRecord, KeyStore, NewKeyRecord, Result, StorageError};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use zeroize::Zeroize;

const RECORD_EXT: &str = ".json";
const TEMP_MARKER: &str = ".json.tmp-";
// Leaves room for the temp suffix under the usual 255 byte name limit
const MAX_FILE_NAME: usize = 200;

/// One JSON document per content id under a single directory.
///
/// Writes go to a temp file that is synced and renamed over the record, so a
/// crash leaves either the old or the new document. Mutations run on the
/// blocking pool and finish even if the calling future is dropped.
#[derive(Clone)]
pub struct FileKeyStore {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    index: RwLock<ItemIndex>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    sync_dir: fn(&Path) -> io::Result<()>,
}

impl FileKeyStore {
    /// Open (or create) the key directory, drop leftover temp files and
    /// rebuild the item index from the records on disk.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;

        let inner = Inner {
            root,
            index: RwLock::new(ItemIndex::default()),
            locks: DashMap::new(),
            sync_dir: fsync_dir,
        };
        inner.recover()?;

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn put(&self, record: NewKeyRecord) -> Result<KeyRecord> {
        self.run(move |inner| inner.put(record)).await
    }

    async fn get_full(&self, content_id: &str) -> Result<KeyRecord> {
        let content_id = content_id.to_string();
        self.run(move |inner| inner.read_record(&content_id)).await
    }

    async fn set_item_id(&self, content_id: &str, item_id: u64) -> Result<KeyRecord> {
        let content_id = content_id.to_string();
        self.run(move |inner| inner.set_item_id(&content_id, item_id)).await
    }

    async fn delete(&self, content_id: &str) -> Result<bool> {
        let content_id = content_id.to_string();
        self.run(move |inner| inner.delete(&content_id)).await
    }

    async fn exists(&self, content_id: &str) -> Result<bool> {
        let content_id = content_id.to_string();
        self.run(move |inner| match inner.record_path(&content_id) {
            Some(path) => path.try_exists().map_err(|e| io_error(&path, e)),
            None => Ok(false),
        })
        .await
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        self.run(|inner| inner.list_ids()).await
    }

    async fn find_by_item_id(&self, item_id: u64) -> Result<KeyRecord> {
        self.run(move |inner| inner.find_by_item_id(item_id)).await
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

impl Inner {
    fn record_path(&self, content_id: &str) -> Option<PathBuf> {
        if validate_content_id(content_id).is_err() {
            return None;
        }
        let name = format!("{}{}", urlencoding::encode(content_id), RECORD_EXT);
        if name.len() > MAX_FILE_NAME {
            return None;
        }
        Some(self.root.join(name))
    }

    /// Run `op` under the per-record lock. The lock entry is dropped again
    /// once no other caller holds it, so ids that never get stored leave
    /// nothing behind.
    fn with_record_lock<T>(&self, content_id: &str, op: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = Arc::clone(self.locks.entry(content_id.to_string()).or_default().value());
        let result = {
            let _guard = lock.lock();
            op()
        };
        drop(lock);
        self.locks
            .remove_if(content_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// The rename has already landed when this runs; a failed directory sync
    /// only weakens durability of the new entry and is not reported upward.
    fn sync_root(&self) {
        if let Err(e) = (self.sync_dir)(&self.root) {
            error!("Could not sync key directory {:?}: {}", self.root, e);
        }
    }

    fn recover(&self) -> Result<()> {
        let mut names = self.dir_entries()?;
        // deterministic winner if two files claim the same item
        names.sort();

        let mut index = self.index.write();
        let mut loaded = 0usize;
        for name in names {
            let path = self.root.join(&name);
            if is_temp_name(&name) {
                match fs::remove_file(&path) {
                    Ok(()) => warn!("Removed interrupted key write {:?}", path),
                    Err(e) => warn!("Could not remove temp file {:?}: {}", path, e),
                }
                continue;
            }
            let Some(content_id) = content_id_from_name(&name) else {
                continue;
            };
            let record = match self.read_record(&content_id) {
                Ok(record) => record,
                Err(e) => {
                    error!("Skipping unreadable key record {}: {}", content_id, e);
                    continue;
                }
            };
            loaded += 1;
            if let Some(item_id) = record.item_id {
                match index.claim(item_id, &content_id) {
                    Ok(_) => index.commit(&content_id, Some(item_id)),
                    Err(e) => warn!("Ignoring item binding of {}: {}", content_id, e),
                }
            }
        }

        info!(
            "Key store at {:?} opened with {} records, {} bound to items",
            self.root,
            loaded,
            index.len()
        );
        Ok(())
    }

    fn dir_entries(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_error(&self.root, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root, e))?;
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => debug!("Ignoring non UTF-8 file name {:?}", name),
            }
        }
        Ok(names)
    }

    fn read_record(&self, content_id: &str) -> Result<KeyRecord> {
        let path = self
            .record_path(content_id)
            .ok_or_else(|| StorageError::NotFound(content_id.to_string()))?;

        let mut raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(content_id.to_string()))
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        let parsed = serde_json::from_slice::<KeyRecord>(&raw);
        raw.zeroize();

        let record = parsed.map_err(|e| StorageError::Corrupt {
            content_id: content_id.to_string(),
            reason: e.to_string(),
        })?;
        if record.content_id != content_id {
            return Err(StorageError::Corrupt {
                content_id: content_id.to_string(),
                reason: format!("document belongs to {}", record.content_id),
            });
        }
        Ok(record)
    }

    fn write_record(&self, record: &KeyRecord) -> Result<()> {
        let path = self
            .record_path(&record.content_id)
            .ok_or_else(|| StorageError::InvalidContentId(record.content_id.clone()))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StorageError::InvalidContentId(record.content_id.clone()))?;
        let tmp = self
            .root
            .join(format!("{}.tmp-{}", file_name, Uuid::new_v4().simple()));

        let mut body = serde_json::to_vec_pretty(record).map_err(|e| StorageError::Corrupt {
            content_id: record.content_id.clone(),
            reason: e.to_string(),
        })?;
        let written = write_atomically(&tmp, &path, &body);
        body.zeroize();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(io_error(&path, e));
        }
        self.sync_root();
        Ok(())
    }

    fn put(&self, new: NewKeyRecord) -> Result<KeyRecord> {
        validate_content_id(&new.content_id)?;
        if self.record_path(&new.content_id).is_none() {
            return Err(StorageError::InvalidContentId(format!(
                "content id too long ({} bytes)",
                new.content_id.len()
            )));
        }

        let content_id = new.content_id.clone();
        self.with_record_lock(&content_id, || self.put_locked(new))
    }

    fn put_locked(&self, new: NewKeyRecord) -> Result<KeyRecord> {
        let record = new.into_record(Utc::now());
        let claimed = match record.item_id {
            Some(item_id) => self.index.write().claim(item_id, &record.content_id)?,
            None => false,
        };

        if let Err(e) = self.write_record(&record) {
            if let (true, Some(item_id)) = (claimed, record.item_id) {
                self.index.write().abandon(item_id, &record.content_id);
            }
            return Err(e);
        }
        self.index.write().commit(&record.content_id, record.item_id);

        info!("Stored key record for content {}", record.content_id);
        Ok(record)
    }

    fn set_item_id(&self, content_id: &str, item_id: u64) -> Result<KeyRecord> {
        self.with_record_lock(content_id, || self.set_item_id_locked(content_id, item_id))
    }

    fn set_item_id_locked(&self, content_id: &str, item_id: u64) -> Result<KeyRecord> {
        let mut record = self.read_record(content_id)?;
        let claimed = self.index.write().claim(item_id, content_id)?;

        record.item_id = Some(item_id);
        record.updated_at = Some(Utc::now());
        if let Err(e) = self.write_record(&record) {
            if claimed {
                self.index.write().abandon(item_id, content_id);
            }
            return Err(e);
        }
        self.index.write().commit(content_id, Some(item_id));

        info!("Bound content {} to marketplace item {}", content_id, item_id);
        Ok(record)
    }

    fn delete(&self, content_id: &str) -> Result<bool> {
        let Some(path) = self.record_path(content_id) else {
            return Ok(false);
        };

        let removed = self.with_record_lock(content_id, || {
            let removed = match fs::remove_file(&path) {
                Ok(()) => true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => false,
                Err(e) => return Err(io_error(&path, e)),
            };
            if removed {
                self.sync_root();
            }
            self.index.write().remove(content_id);
            Ok(removed)
        })?;

        if removed {
            info!("Deleted key record for content {}", content_id);
        }
        Ok(removed)
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .dir_entries()?
            .iter()
            .filter(|name| !is_temp_name(name))
            .filter_map(|name| content_id_from_name(name))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn find_by_item_id(&self, item_id: u64) -> Result<KeyRecord> {
        let content_id = self
            .index
            .read()
            .lookup(item_id)
            .ok_or(StorageError::ItemNotFound(item_id))?;

        match self.read_record(&content_id) {
            Ok(record) if record.item_id == Some(item_id) => Ok(record),
            Ok(_) => Err(StorageError::ItemNotFound(item_id)),
            Err(e) if e.is_not_found() => Err(StorageError::ItemNotFound(item_id)),
            Err(e) => Err(e),
        }
    }
}

fn io_error(path: &Path, source: io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_temp_name(name: &str) -> bool {
    !name.ends_with(RECORD_EXT) && name.contains(TEMP_MARKER)
}

fn content_id_from_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(RECORD_EXT)?;
    match urlencoding::decode(stem) {
        Ok(id) if !id.is_empty() => Some(id.into_owned()),
        _ => {
            debug!("Ignoring foreign file {} in key directory", name);
            None
        }
    }
}

fn write_atomically(tmp: &Path, target: &Path, body: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(tmp)?;
    file.write_all(body)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp, target)
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
