//! Directory-backed store: one pretty-printed JSON file per document.
//!
//! ```text
//! <root>/
//! ├── pick/<patch>/<batch>/C-<class>.json
//! ├── pick/<patch>/<batch>/T-<class>.json
//! └── win/<patch>/<batch>/...
//! ```
//!
//! Writers in other processes are serialized through an advisory lock on
//! `<root>/.lock`, held for the whole check-then-write of [`DocumentStore::put_all`].

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::{DocumentStore, StoreError, check_unique, check_version};
use crate::document::{BatchPrefix, DocumentKey, Ledger, MatrixDocument};

const DOCUMENT_EXTENSION: &str = "json";
const LOCK_FILE: &str = ".lock";

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| io_error(&root, source))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Exclusive cross-process lock, released when the handle drops.
    fn lock_root(&self) -> Result<File, StoreError> {
        let path = self.root.join(LOCK_FILE);
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| io_error(&path, source))?;
        file.lock().map_err(|source| io_error(&path, source))?;
        Ok(file)
    }

    fn patch_dir(&self, ledger: Ledger, patch_version: &str) -> Result<PathBuf, StoreError> {
        let safe = !patch_version.is_empty()
            && patch_version != "."
            && patch_version != ".."
            && patch_version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !safe {
            return Err(StoreError::InvalidPatchVersion {
                patch_version: patch_version.to_string(),
            });
        }
        Ok(self.root.join(ledger.as_str()).join(patch_version))
    }

    fn batch_dir(&self, prefix: &BatchPrefix) -> Result<PathBuf, StoreError> {
        Ok(self
            .patch_dir(prefix.ledger, &prefix.patch_version)?
            .join(prefix.batch.to_string()))
    }

    fn document_path(&self, key: &DocumentKey) -> Result<PathBuf, StoreError> {
        Ok(self.batch_dir(&key.batch_prefix())?.join(format!(
            "{}-{}.{DOCUMENT_EXTENSION}",
            key.kind, key.class_code
        )))
    }

    fn read(path: &Path) -> Result<Option<MatrixDocument>, StoreError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(path, source)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Json {
                path: path.to_path_buf(),
                source,
            })
    }

    fn write(path: &Path, document: &MatrixDocument) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }
        let json = serde_json::to_string_pretty(document).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json).map_err(|source| io_error(&staging, source))?;
        fs::rename(&staging, path).map_err(|source| io_error(path, source))
    }
}

impl DocumentStore for FileStore {
    fn get(&self, key: &DocumentKey) -> Result<Option<MatrixDocument>, StoreError> {
        Self::read(&self.document_path(key)?)
    }

    fn put_all(&self, documents: Vec<MatrixDocument>) -> Result<Vec<u64>, StoreError> {
        check_unique(&documents)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _root_lock = self.lock_root()?;

        let mut staged = Vec::with_capacity(documents.len());
        for document in documents {
            let path = self.document_path(&document.key)?;
            let current = Self::read(&path)?.and_then(|existing| existing.version);
            let version = check_version(&document, current)?;
            staged.push((path, document, version));
        }

        let mut versions = Vec::with_capacity(staged.len());
        for (path, mut document, version) in staged {
            document.version = Some(version);
            Self::write(&path, &document)?;
            log::debug!("stored {} v{version} at {}", document.key, path.display());
            versions.push(version);
        }
        Ok(versions)
    }

    fn find_batch(&self, prefix: &BatchPrefix) -> Result<Vec<MatrixDocument>, StoreError> {
        let dir = self.batch_dir(prefix)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&dir, source)),
        };

        let mut documents = Vec::new();
        for entry in entries {
            let path = entry.map_err(|source| io_error(&dir, source))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            if let Some(document) = Self::read(&path)?
                && prefix.contains(&document.key)
            {
                documents.push(document);
            }
        }
        documents.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(documents)
    }

    fn latest_batch(
        &self,
        ledger: Ledger,
        patch_version: &str,
    ) -> Result<Option<u32>, StoreError> {
        let dir = self.patch_dir(ledger, patch_version)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(&dir, source)),
        };

        let mut latest = None;
        for entry in entries {
            let entry = entry.map_err(|source| io_error(&dir, source))?;
            let Some(batch) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            if latest.is_some_and(|known| known >= batch) {
                continue;
            }
            if has_documents(&entry.path())? {
                latest = Some(batch);
            }
        }
        Ok(latest)
    }
}

fn has_documents(dir: &Path) -> Result<bool, StoreError> {
    let entries = fs::read_dir(dir).map_err(|source| io_error(dir, source))?;
    for entry in entries {
        let path = entry.map_err(|source| io_error(dir, source))?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(DOCUMENT_EXTENSION) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
