// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Object stores backed by a local directory. */

use {
    crate::{
        error::{IndexError, Result},
        store::{ObjectEntry, ObjectHead, ObjectStore, ObjectVersion, NULL_VERSION_ID},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    futures::AsyncRead,
    std::{
        collections::HashMap,
        io::Write,
        path::{Path, PathBuf},
        pin::Pin,
    },
};

/// Directory under the root holding object metadata as JSON documents.
pub const METADATA_DIR: &str = ".metadata";

/// An [ObjectStore] where keys are paths relative to a root directory.
///
/// The directory has no versioning: every key has a single version, identified
/// as [NULL_VERSION_ID]. Fingerprints are MD5 digests of file content.
#[derive(Clone, Debug)]
pub struct FilesystemObjectStore {
    root_dir: PathBuf,
    name: String,
}

impl FilesystemObjectStore {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// No validation of the passed path is performed. The directory does not need to exist.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let root_dir = path.as_ref().to_path_buf();

        Self {
            name: format!("{}", root_dir.display()),
            root_dir,
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key.trim_start_matches('/'))
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root_dir
            .join(METADATA_DIR)
            .join(format!("{}.json", key.trim_start_matches('/')))
    }

    fn read_metadata(&self, key: &str) -> Result<HashMap<String, String>> {
        let path = self.metadata_path(key);

        match std::fs::read(&path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(IndexError::IoPath(format!("{}", path.display()), e)),
        }
    }

    fn fingerprint_path(path: &Path) -> Result<String> {
        Ok(crate::io::digest_path(path)?.md5.digest_hex())
    }

    fn walk(&self, dir: &Path, prefix: &str, entries: &mut Vec<ObjectEntry>) -> Result<()> {
        let iter = match std::fs::read_dir(dir) {
            Ok(iter) => iter,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(IndexError::IoPath(format!("{}", dir.display()), e)),
        };

        for entry in iter {
            let entry = entry.map_err(|e| IndexError::IoPath(format!("{}", dir.display()), e))?;
            let path = entry.path();

            let rel = path.strip_prefix(&self.root_dir).map_err(|_| {
                IndexError::Store(format!("{}", path.display()), "outside store root".into())
            })?;
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if key == METADATA_DIR {
                continue;
            }

            let file_type = entry
                .file_type()
                .map_err(|e| IndexError::IoPath(format!("{}", path.display()), e))?;

            if file_type.is_dir() {
                // Only descend into directories that can hold matching keys.
                let dir_key = format!("{}/", key);
                if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                    self.walk(&path, prefix, entries)?;
                }
            } else if file_type.is_file() && key.starts_with(prefix) {
                let size = entry
                    .metadata()
                    .map_err(|e| IndexError::IoPath(format!("{}", path.display()), e))?
                    .len();

                entries.push(ObjectEntry {
                    fingerprint: Self::fingerprint_path(&path)?,
                    key,
                    size,
                });
            }
        }

        Ok(())
    }
}

/// Write a file atomically by persisting a sibling temporary file over it.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| IndexError::Store(format!("{}", path.display()), "no parent".into()))?;

    std::fs::create_dir_all(parent)
        .map_err(|e| IndexError::IoPath(format!("{}", parent.display()), e))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| IndexError::IoPath(format!("{}", parent.display()), e))?;
    temp.write_all(data)
        .map_err(|e| IndexError::IoPath(format!("{}", temp.path().display()), e))?;
    temp.persist(path)
        .map_err(|e| IndexError::IoPath(format!("{}", path.display()), e.error))?;

    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IndexError::IoPath(format!("{}", path.display()), e)),
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    fn bucket(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let path = self.object_path(key);

        let f = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IndexError::StoreNotFound(key.to_string())
            } else {
                IndexError::IoPath(format!("{}", path.display()), e)
            }
        })?;

        Ok(Box::pin(futures::io::AllowStdIo::new(f)))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>> {
        let path = self.object_path(key);

        if !path.is_file() {
            return Ok(None);
        }

        Ok(Some(ObjectHead {
            fingerprint: Some(Self::fingerprint_path(&path)?),
            metadata: self.read_metadata(key)?,
        }))
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let metadata_path = self.metadata_path(key);

        if metadata.is_empty() {
            remove_if_exists(&metadata_path)?;
        } else {
            write_atomic(&metadata_path, &serde_json::to_vec(&metadata)?)?;
        }

        write_atomic(&self.object_path(key), &body)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let mut entries = vec![];
        self.walk(&self.root_dir, prefix, &mut entries)?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(entries)
    }

    async fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>> {
        let path = self.object_path(key);

        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(vec![]),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(IndexError::IoPath(format!("{}", path.display()), e)),
        };

        let modified = metadata
            .modified()
            .map_err(|e| IndexError::IoPath(format!("{}", path.display()), e))?;

        Ok(vec![ObjectVersion {
            version_id: NULL_VERSION_ID.to_string(),
            last_modified: DateTime::<Utc>::from(modified),
            is_delete_marker: false,
        }])
    }

    async fn delete_versions(&self, key: &str, version_ids: &[String]) -> Result<()> {
        if version_ids.iter().any(|id| id == NULL_VERSION_ID) {
            remove_if_exists(&self.object_path(key))?;
            remove_if_exists(&self.metadata_path(key))?;
        }

        Ok(())
    }
}
