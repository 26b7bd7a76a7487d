// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Pruning of package versions in versioned object stores.

Overwriting a package in place changes its content but not the set of package
file names, so it is invisible to the index fingerprint. In a versioned store,
every key is instead pruned back to its oldest version: the first upload of a
package file wins and later writes (and deletes) of the same key are undone.
*/

use {
    crate::{
        error::Result,
        store::{ObjectStore, ObjectVersion},
    },
    log::{debug, info},
};

/// Split versions of a key into the one to keep and the ones to delete.
///
/// The oldest version is kept. For equal timestamps real versions sort before
/// delete markers and otherwise the input order is preserved. Returns [None]
/// when there is nothing to prune.
pub fn surplus_versions(
    mut versions: Vec<ObjectVersion>,
) -> Option<(ObjectVersion, Vec<ObjectVersion>)> {
    if versions.len() < 2 {
        return None;
    }

    versions.sort_by_key(|v| (v.last_modified, v.is_delete_marker));
    let keep = versions.remove(0);

    Some((keep, versions))
}

/// Prunes keys in a versioned [ObjectStore] to their oldest version.
pub struct VersionReconciler<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> VersionReconciler<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// Delete every version and delete marker of `key` except the oldest version.
    ///
    /// Returns whether anything was deleted. Keys with fewer than two versions are
    /// left alone, which is always the case in stores without versioning.
    pub async fn reconcile(&self, key: &str) -> Result<bool> {
        let versions = self.store.list_versions(key).await?;
        debug!("{} has {} versions", key, versions.len());

        let (keep, delete) = match surplus_versions(versions) {
            Some(split) => split,
            None => return Ok(false),
        };

        info!(
            "keeping version {} of {}; deleting {} newer versions",
            keep.version_id,
            key,
            delete.len()
        );

        let ids = delete.into_iter().map(|v| v.version_id).collect::<Vec<_>>();
        self.store.delete_versions(key, &ids).await?;

        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::store::memory::{MemoryObjectStore, StoreOperation},
        chrono::{TimeZone, Utc},
    };

    fn version(id: &str, seconds: i64, is_delete_marker: bool) -> ObjectVersion {
        ObjectVersion {
            version_id: id.into(),
            last_modified: Utc.timestamp_opt(seconds, 0).unwrap(),
            is_delete_marker,
        }
    }

    #[test]
    fn split_versions() {
        assert!(surplus_versions(vec![]).is_none());
        assert!(surplus_versions(vec![version("a", 1, false)]).is_none());

        let (keep, delete) = surplus_versions(vec![
            version("new", 30, false),
            version("old", 10, false),
            version("marker", 20, true),
        ])
        .unwrap();
        assert_eq!(keep.version_id, "old");
        assert_eq!(
            delete.iter().map(|v| v.version_id.as_str()).collect::<Vec<_>>(),
            vec!["marker", "new"]
        );
    }

    #[test]
    fn ties() {
        let (keep, delete) = surplus_versions(vec![
            version("marker", 10, true),
            version("first", 10, false),
            version("second", 10, false),
        ])
        .unwrap();

        assert_eq!(keep.version_id, "first");
        assert_eq!(
            delete.iter().map(|v| v.version_id.as_str()).collect::<Vec<_>>(),
            vec!["second", "marker"]
        );
    }

    #[tokio::test]
    async fn single_version_untouched() -> Result<()> {
        let store = MemoryObjectStore::versioned("repo");
        store.insert("pool/a.deb", "one");

        assert!(!VersionReconciler::new(&store).reconcile("pool/a.deb").await?);
        assert!(store.operations().iter().all(|op| !op.is_write()));
        assert_eq!(store.version_count("pool/a.deb"), 1);

        Ok(())
    }

    #[tokio::test]
    async fn three_versions_keep_oldest() -> Result<()> {
        let store = MemoryObjectStore::versioned("repo");
        store.insert_at("pool/a.deb", "second", Utc.timestamp_opt(2_000, 0).unwrap());
        store.insert_at("pool/a.deb", "first", Utc.timestamp_opt(1_000, 0).unwrap());
        store.insert_at("pool/a.deb", "third", Utc.timestamp_opt(3_000, 0).unwrap());

        assert!(VersionReconciler::new(&store).reconcile("pool/a.deb").await?);

        assert_eq!(store.version_count("pool/a.deb"), 1);
        assert_eq!(store.content("pool/a.deb"), Some(b"first".to_vec()));

        // A single batch deleting the two newer versions.
        let deletes = store
            .operations()
            .into_iter()
            .filter(|op| matches!(op, StoreOperation::DeleteVersions(_, _)))
            .collect::<Vec<_>>();
        assert_eq!(deletes.len(), 1);
        match &deletes[0] {
            StoreOperation::DeleteVersions(key, ids) => {
                assert_eq!(key, "pool/a.deb");
                assert_eq!(ids.len(), 2);
            }
            op => panic!("unexpected operation: {:?}", op),
        }

        Ok(())
    }

    #[tokio::test]
    async fn delete_marker_removed() -> Result<()> {
        let store = MemoryObjectStore::versioned("repo");
        store.insert("pool/a.deb", "one");
        store.remove("pool/a.deb");
        assert_eq!(store.content("pool/a.deb"), None);

        assert!(VersionReconciler::new(&store).reconcile("pool/a.deb").await?);
        assert_eq!(store.content("pool/a.deb"), Some(b"one".to_vec()));

        Ok(())
    }

    #[tokio::test]
    async fn unversioned_store() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("pool/a.deb", "one");
        store.insert("pool/a.deb", "two");

        assert!(!VersionReconciler::new(&store).reconcile("pool/a.deb").await?);

        Ok(())
    }
}
