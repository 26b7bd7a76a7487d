// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Object store primitives.

Packages, cached package records, and published indices all live in an object
store. [ObjectStore] abstracts the handful of operations needed from it.
Implementations exist for S3 ([s3::S3ObjectStore]), a local directory
([filesystem::FilesystemObjectStore]), and process memory
([memory::MemoryObjectStore]).

Missing objects are always reported explicitly: [ObjectStore::get()] fails with
[IndexError::StoreNotFound] and [ObjectStore::head()] returns [None]. No other
error is ever interpreted as absence.
*/

use {
    crate::error::{IndexError, Result},
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    futures::{AsyncRead, AsyncReadExt},
    std::{collections::HashMap, pin::Pin},
};

pub mod filesystem;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

/// Version identifier used by stores without object versioning.
pub const NULL_VERSION_ID: &str = "null";

/// An object discovered by listing a store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectEntry {
    /// Full key of the object.
    pub key: String,
    /// Opaque strong hash of the current object content (an entity tag).
    pub fingerprint: String,
    /// Size of the object in bytes.
    pub size: u64,
}

impl ObjectEntry {
    /// The final path component of the key.
    pub fn basename(&self) -> &str {
        basename(&self.key)
    }
}

/// Metadata about a single object.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ObjectHead {
    /// Content fingerprint, if the store reports one.
    pub fingerprint: Option<String>,
    /// User metadata attached when the object was written.
    pub metadata: HashMap<String, String>,
}

/// A historical version (or delete marker) of a key in a versioned store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectVersion {
    /// Store assigned version identifier.
    pub version_id: String,
    /// When this version was created.
    pub last_modified: DateTime<Utc>,
    /// Whether this entry is a delete marker rather than content.
    pub is_delete_marker: bool,
}

/// The final path component of an object key.
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// The key of a file within a namespace.
///
/// The empty namespace is the root of the store.
pub fn namespace_key(namespace: &str, name: &str) -> String {
    let namespace = namespace.trim_matches('/');

    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", namespace, name)
    }
}

/// The namespace holding a key: everything before the final `/`.
pub fn key_namespace(key: &str) -> &str {
    key.rsplit_once('/').map(|(ns, _)| ns).unwrap_or("")
}

/// Interface to an object store holding a Debian repository.
///
/// Every instance is bound to a single bucket (or equivalent) and is passed
/// explicitly to the components that need it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket this store is bound to.
    ///
    /// Used to decide whether a storage notification concerns this repository.
    fn bucket(&self) -> &str;

    /// Get the content of an object as an async reader.
    ///
    /// Fails with [IndexError::StoreNotFound] if the key does not exist.
    async fn get(&self, key: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>>;

    /// Obtain metadata of an object, or [None] if it does not exist.
    async fn head(&self, key: &str) -> Result<Option<ObjectHead>>;

    /// Write an object, replacing any existing content.
    ///
    /// Writes are whole-object: readers never observe partially written content.
    async fn put(&self, key: &str, body: Vec<u8>, metadata: HashMap<String, String>)
        -> Result<()>;

    /// List all objects whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>>;

    /// List all historical versions and delete markers of exactly `key`.
    async fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>>;

    /// Permanently delete the given versions of `key` in a single batch.
    async fn delete_versions(&self, key: &str, version_ids: &[String]) -> Result<()>;

    /// Like [Self::get()] but resolves a missing key to [None].
    async fn get_optional(&self, key: &str) -> Result<Option<Pin<Box<dyn AsyncRead + Send>>>> {
        match self.get(key).await {
            Ok(reader) => Ok(Some(reader)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get the full content of an object, or [None] if it does not exist.
    async fn get_bytes_optional(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(mut reader) = self.get_optional(key).await? {
            let mut data = vec![];
            reader
                .read_to_end(&mut data)
                .await
                .map_err(|e| IndexError::IoPath(key.to_string(), e))?;

            Ok(Some(data))
        } else {
            Ok(None)
        }
    }
}

/// Obtain an [ObjectStore] from a string URL or filesystem path.
///
/// Recognized forms:
///
/// * `s3://bucket` - an S3 bucket (requires the `s3` feature).
/// * `file:///path` or a bare path - a local directory.
/// * `memory://name` - an empty in-process store. Mostly useful for testing.
pub fn store_from_str(s: &str, region: Option<&str>) -> Result<Box<dyn ObjectStore>> {
    // Regions only apply to S3.
    #[cfg(not(feature = "s3"))]
    let _ = region;

    if s.contains("://") {
        let url = url::Url::parse(s)?;

        match url.scheme() {
            "file" => Ok(Box::new(filesystem::FilesystemObjectStore::new(
                url.to_file_path()
                    .map_err(|_| IndexError::UnsupportedRepositoryUrl(s.to_string()))?,
            ))),
            "memory" => Ok(Box::new(memory::MemoryObjectStore::new(
                url.host_str().unwrap_or("memory"),
            ))),
            #[cfg(feature = "s3")]
            "s3" => {
                let bucket = url
                    .host_str()
                    .ok_or_else(|| IndexError::UnsupportedRepositoryUrl(s.to_string()))?;

                if !url.path().trim_matches('/').is_empty() {
                    return Err(IndexError::UnsupportedRepositoryUrl(format!(
                        "{} (key prefixes are expressed as namespaces, not in the URL)",
                        s
                    )));
                }

                let region = match region {
                    Some(name) => name
                        .parse::<rusoto_core::Region>()
                        .map_err(|e| IndexError::InvalidRegion(format!("{}: {}", name, e)))?,
                    None => rusoto_core::Region::default(),
                };

                Ok(Box::new(s3::S3ObjectStore::new(region, bucket)))
            }
            _ => Err(IndexError::UnsupportedRepositoryUrl(s.to_string())),
        }
    } else {
        Ok(Box::new(filesystem::FilesystemObjectStore::new(s)))
    }
}
