// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! An object store held in process memory.

Every operation is recorded, which makes this store the instrument of choice
for asserting what a component did (or didn't) touch. It can also behave like
a versioned bucket, retaining every write and delete as a distinct version with
timestamps from a deterministic logical clock.
*/

use {
    crate::{
        error::{IndexError, Result},
        store::{ObjectEntry, ObjectHead, ObjectStore, ObjectVersion, NULL_VERSION_ID},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    futures::AsyncRead,
    md5::Digest,
    std::{
        collections::{BTreeMap, HashMap},
        pin::Pin,
        sync::{Mutex, MutexGuard},
        time::Duration,
    },
};

/// Timestamp of the first write to a [MemoryObjectStore].
const CLOCK_EPOCH_SECONDS: u64 = 1_600_000_000;

/// A store operation recorded by [MemoryObjectStore].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoreOperation {
    Get(String),
    Head(String),
    Put(String),
    List(String),
    ListVersions(String),
    DeleteVersions(String, Vec<String>),
}

impl StoreOperation {
    /// Whether this operation mutates the store.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Put(_) | Self::DeleteVersions(_, _))
    }

    /// The key or prefix this operation acted on.
    pub fn key(&self) -> &str {
        match self {
            Self::Get(key)
            | Self::Head(key)
            | Self::Put(key)
            | Self::List(key)
            | Self::ListVersions(key)
            | Self::DeleteVersions(key, _) => key,
        }
    }
}

#[derive(Clone, Debug)]
struct MemoryVersion {
    version_id: String,
    last_modified: DateTime<Utc>,
    /// Content and metadata. [None] for delete markers.
    content: Option<(Vec<u8>, HashMap<String, String>)>,
}

#[derive(Default)]
struct MemoryState {
    /// Versions of each key, oldest first.
    objects: BTreeMap<String, Vec<MemoryVersion>>,
    clock: u64,
    next_version: u64,
    operations: Vec<StoreOperation>,
}

impl MemoryState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;

        DateTime::<Utc>::from(
            std::time::UNIX_EPOCH + Duration::from_secs(CLOCK_EPOCH_SECONDS + self.clock),
        )
    }

    fn version_id(&mut self, versioned: bool) -> String {
        if versioned {
            self.next_version += 1;
            format!("v{:06}", self.next_version)
        } else {
            NULL_VERSION_ID.to_string()
        }
    }

    fn current(&self, key: &str) -> Option<&(Vec<u8>, HashMap<String, String>)> {
        self.objects
            .get(key)
            .and_then(|versions| versions.last())
            .and_then(|version| version.content.as_ref())
    }
}

fn fingerprint(data: &[u8]) -> String {
    hex::encode(md5::Md5::digest(data))
}

/// An [ObjectStore] backed by process memory.
pub struct MemoryObjectStore {
    bucket: String,
    versioned: bool,
    state: Mutex<MemoryState>,
}

impl MemoryObjectStore {
    /// Construct an empty, unversioned store.
    pub fn new(bucket: impl ToString) -> Self {
        Self {
            bucket: bucket.to_string(),
            versioned: false,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Construct an empty store that retains every version of every key.
    pub fn versioned(bucket: impl ToString) -> Self {
        Self {
            versioned: true,
            ..Self::new(bucket)
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock can only come from a failing test.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_version(
        &self,
        key: &str,
        content: Option<(Vec<u8>, HashMap<String, String>)>,
        last_modified: Option<DateTime<Utc>>,
    ) {
        let mut state = self.lock();

        let ticked = state.tick();
        let version = MemoryVersion {
            version_id: state.version_id(self.versioned),
            last_modified: last_modified.unwrap_or(ticked),
            content,
        };

        if self.versioned {
            state
                .objects
                .entry(key.to_string())
                .or_default()
                .push(version);
        } else if version.content.is_some() {
            state.objects.insert(key.to_string(), vec![version]);
        } else {
            state.objects.remove(key);
        }
    }

    /// Write an object without recording the operation.
    ///
    /// Use this to seed fixtures.
    pub fn insert(&self, key: &str, body: impl Into<Vec<u8>>) {
        self.write_version(key, Some((body.into(), HashMap::new())), None);
    }

    /// Like [Self::insert()] but with an explicit modification time.
    pub fn insert_at(&self, key: &str, body: impl Into<Vec<u8>>, last_modified: DateTime<Utc>) {
        self.write_version(
            key,
            Some((body.into(), HashMap::new())),
            Some(last_modified),
        );
    }

    /// Delete an object without recording the operation.
    ///
    /// Versioned stores gain a delete marker. Unversioned stores drop the key.
    pub fn remove(&self, key: &str) {
        self.write_version(key, None, None);
    }

    /// Obtain the current content of a key, without recording the operation.
    pub fn content(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().current(key).map(|(data, _)| data.clone())
    }

    /// Obtain the current metadata of a key, without recording the operation.
    pub fn metadata(&self, key: &str) -> Option<HashMap<String, String>> {
        self.lock().current(key).map(|(_, metadata)| metadata.clone())
    }

    /// Number of retained versions and delete markers of a key.
    pub fn version_count(&self, key: &str) -> usize {
        self.lock().objects.get(key).map(|v| v.len()).unwrap_or(0)
    }

    /// All operations performed through the [ObjectStore] interface so far.
    pub fn operations(&self) -> Vec<StoreOperation> {
        self.lock().operations.clone()
    }

    /// Forget recorded operations.
    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Number of recorded writes against a key.
    pub fn writes_to(&self, key: &str) -> usize {
        self.lock()
            .operations
            .iter()
            .filter(|op| op.is_write() && op.key() == key)
            .count()
    }

    /// Number of recorded reads of the full content of a key.
    pub fn gets_of(&self, key: &str) -> usize {
        self.lock()
            .operations
            .iter()
            .filter(|op| matches!(op, StoreOperation::Get(k) if k == key))
            .count()
    }

    fn record(&self, operation: StoreOperation) {
        self.lock().operations.push(operation);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, key: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        self.record(StoreOperation::Get(key.to_string()));

        match self.content(key) {
            Some(data) => Ok(Box::pin(futures::io::Cursor::new(data))),
            None => Err(IndexError::StoreNotFound(key.to_string())),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>> {
        self.record(StoreOperation::Head(key.to_string()));

        Ok(self.lock().current(key).map(|(data, metadata)| ObjectHead {
            fingerprint: Some(fingerprint(data)),
            metadata: metadata.clone(),
        }))
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.record(StoreOperation::Put(key.to_string()));
        self.write_version(key, Some((body, metadata)), None);

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        self.record(StoreOperation::List(prefix.to_string()));

        let state = self.lock();

        Ok(state
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .filter_map(|key| {
                state.current(key).map(|(data, _)| ObjectEntry {
                    key: key.clone(),
                    fingerprint: fingerprint(data),
                    size: data.len() as u64,
                })
            })
            .collect())
    }

    async fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>> {
        self.record(StoreOperation::ListVersions(key.to_string()));

        // Newest first, like S3.
        Ok(self
            .lock()
            .objects
            .get(key)
            .map(|versions| {
                versions
                    .iter()
                    .rev()
                    .map(|v| ObjectVersion {
                        version_id: v.version_id.clone(),
                        last_modified: v.last_modified,
                        is_delete_marker: v.content.is_none(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_versions(&self, key: &str, version_ids: &[String]) -> Result<()> {
        self.record(StoreOperation::DeleteVersions(
            key.to_string(),
            version_ids.to_vec(),
        ));

        let mut state = self.lock();

        if let Some(versions) = state.objects.get_mut(key) {
            versions.retain(|v| !version_ids.contains(&v.version_id));

            if versions.is_empty() {
                state.objects.remove(key);
            }
        }

        Ok(())
    }
}
