// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content addressed cache of package records.

Producing a [PackageRecord] requires downloading the whole package file, so
records are cached in the object store under the content fingerprint of the
package. A cache entry is the record text without its `Filename` field, which
makes the entry valid for any key holding the same bytes.

Only successfully built records are cached. A package that can't be parsed is
retried on every access.
*/

use {
    crate::{
        config::RepositoryConfig,
        deb::reader::resolve_control_stanza,
        error::{IndexError, Result},
        record::PackageRecord,
        store::{namespace_key, ObjectEntry, ObjectStore},
    },
    futures::io::AllowStdIo,
    log::{debug, info},
    std::{
        collections::HashMap,
        io::Write,
        path::{Path, PathBuf},
    },
};

/// Build the [PackageRecord] of a package file on the local filesystem.
pub fn build_record_from_path(path: impl AsRef<Path>) -> Result<PackageRecord> {
    let path = path.as_ref();

    let fh = std::fs::File::open(path)
        .map_err(|e| IndexError::IoPath(format!("{}", path.display()), e))?;
    let stanza = resolve_control_stanza(std::io::BufReader::new(fh))?;

    PackageRecord::from_path(stanza, path)
}

/// Package records cached in an [ObjectStore], keyed by package content fingerprint.
pub struct ControlDataCache<'a> {
    store: &'a dyn ObjectStore,
    prefix: String,
    /// Directory downloaded packages are staged in. [None] for the system default.
    staging_dir: Option<PathBuf>,
}

impl<'a> ControlDataCache<'a> {
    /// Construct an instance storing entries under a key prefix.
    pub fn new(store: &'a dyn ObjectStore, prefix: impl ToString) -> Self {
        Self {
            store,
            prefix: prefix.to_string().trim_matches('/').to_string(),
            staging_dir: None,
        }
    }

    /// Set the directory that packages are downloaded into while records are built.
    pub fn set_staging_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.staging_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Construct an instance using the cache prefix of a [RepositoryConfig].
    pub fn from_config(store: &'a dyn ObjectStore, config: &RepositoryConfig) -> Self {
        Self::new(store, &config.control_data_cache_prefix)
    }

    /// The key of the cache entry for a content fingerprint.
    pub fn cache_key(&self, fingerprint: &str) -> String {
        namespace_key(&self.prefix, fingerprint)
    }

    /// Look up a cached record, without building it.
    pub async fn lookup(&self, fingerprint: &str) -> Result<Option<String>> {
        match self
            .store
            .get_bytes_optional(&self.cache_key(fingerprint))
            .await?
        {
            Some(data) => Ok(Some(String::from_utf8(data).map_err(|e| {
                IndexError::Store(self.cache_key(fingerprint), format!("{}", e))
            })?)),
            None => Ok(None),
        }
    }

    /// Obtain the record text of a package, building and caching it on first access.
    pub async fn get_or_build(&self, entry: &ObjectEntry) -> Result<String> {
        if let Some(record) = self.lookup(&entry.fingerprint).await? {
            debug!("cache hit for {} ({})", entry.key, entry.fingerprint);
            return Ok(record);
        }

        info!("creating cached control data for {}", entry.key);
        let record = self.build(&entry.key).await?.to_string();

        self.store
            .put(
                &self.cache_key(&entry.fingerprint),
                record.clone().into_bytes(),
                HashMap::new(),
            )
            .await?;

        Ok(record)
    }

    /// Like [Self::get_or_build()] for a key whose fingerprint is not yet known.
    ///
    /// Returns [None] if the key does not exist.
    pub async fn get_or_build_key(&self, key: &str) -> Result<Option<String>> {
        let fingerprint = match self.store.head(key).await? {
            Some(head) => head.fingerprint,
            None => return Ok(None),
        };

        let fingerprint = fingerprint.ok_or_else(|| {
            IndexError::Store(key.to_string(), "store reported no fingerprint".into())
        })?;

        Ok(Some(
            self.get_or_build(&ObjectEntry {
                key: key.to_string(),
                fingerprint,
                size: 0,
            })
            .await?,
        ))
    }

    /// Download a package to a temporary file and build its record.
    ///
    /// The temporary file is removed when this returns, whatever the outcome.
    async fn build(&self, key: &str) -> Result<PackageRecord> {
        let mut reader = self.store.get(key).await?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("package-").suffix(".deb");

        let mut temp = match &self.staging_dir {
            Some(dir) => builder
                .tempfile_in(dir)
                .map_err(|e| IndexError::IoPath(format!("{}", dir.display()), e))?,
            None => builder.tempfile()?,
        };
        {
            let mut writer = AllowStdIo::new(temp.as_file_mut());
            futures::io::copy(&mut reader, &mut writer)
                .await
                .map_err(|e| IndexError::IoPath(key.to_string(), e))?;
        }
        temp.flush()?;

        build_record_from_path(temp.path())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{store::memory::MemoryObjectStore, testutil::deb_bytes},
    };

    #[tokio::test]
    async fn get_or_build_idempotent() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("dists/stable/foo_1.0_amd64.deb", deb_bytes("foo", "1.0")?);

        let entry = store.list("dists/stable/").await?.remove(0);
        let cache = ControlDataCache::new(&store, "control-data-cache");

        let first = cache.get_or_build(&entry).await?;
        assert!(first.starts_with("Package: foo\nVersion: 1.0\n"));
        assert!(!first.contains("\nHomepage:"));
        assert!(first.contains("\n Homepage: not a field\n"));
        assert!(!first.contains("Filename"));
        assert_eq!(
            store.content(&cache.cache_key(&entry.fingerprint)),
            Some(first.clone().into_bytes())
        );

        store.clear_operations();
        let second = cache.get_or_build(&entry).await?;
        assert_eq!(first, second);
        assert_eq!(store.gets_of(&entry.key), 0);
        assert!(store.operations().iter().all(|op| !op.is_write()));

        Ok(())
    }

    #[tokio::test]
    async fn malformed_not_cached() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("pool/bad.deb", "not an archive");

        let entry = store.list("pool/").await?.remove(0);
        let cache = ControlDataCache::new(&store, "/control-data-cache/");
        assert_eq!(
            cache.cache_key(&entry.fingerprint),
            format!("control-data-cache/{}", entry.fingerprint)
        );

        for _ in 0..2 {
            let err = cache.get_or_build(&entry).await.unwrap_err();
            assert!(err.is_malformed_package());
        }

        assert_eq!(store.gets_of("pool/bad.deb"), 2);
        assert!(store.operations().iter().all(|op| !op.is_write()));

        Ok(())
    }

    fn staged_files(dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(std::fs::read_dir(dir)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<_>>>()?)
    }

    #[tokio::test]
    async fn staged_download_removed_after_build() -> Result<()> {
        let td = tempfile::tempdir()?;

        let store = MemoryObjectStore::new("repo");
        store.insert("pool/a.deb", deb_bytes("a", "1")?);

        let entry = store.list("pool/").await?.remove(0);
        let cache = ControlDataCache::new(&store, "cache").set_staging_dir(td.path());

        let record = cache.get_or_build(&entry).await?;
        assert!(record.starts_with("Package: a
"));
        assert!(staged_files(td.path())?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn staged_download_removed_after_failure() -> Result<()> {
        let td = tempfile::tempdir()?;

        let store = MemoryObjectStore::new("repo");
        store.insert("pool/empty.deb", "!<arch>\n");
        store.insert("pool/garbage.deb", "not an archive");

        let cache = ControlDataCache::new(&store, "cache").set_staging_dir(td.path());

        for entry in store.list("pool/").await? {
            let err = cache.get_or_build(&entry).await.unwrap_err();
            assert!(err.is_malformed_package(), "{:?}", err);
            if entry.key == "pool/garbage.deb" {
                assert!(matches!(err, IndexError::DebMalformedArchive(_)));
            }
            assert!(staged_files(td.path())?.is_empty());
        }

        let missing = td.path().join("missing");
        let entry = store.list("pool/").await?.remove(0);
        assert!(matches!(
            ControlDataCache::new(&store, "cache")
                .set_staging_dir(&missing)
                .get_or_build(&entry)
                .await,
            Err(IndexError::IoPath(_, _))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn cached_text_returned_verbatim() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("pool/a.deb", deb_bytes("a", "1")?);

        let entry = store.list("pool/").await?.remove(0);
        let cache = ControlDataCache::new(&store, "cache");
        store.insert(&cache.cache_key(&entry.fingerprint), "Package: cached");

        assert_eq!(cache.get_or_build(&entry).await?, "Package: cached");
        assert_eq!(store.gets_of("pool/a.deb"), 0);

        Ok(())
    }

    #[tokio::test]
    async fn by_key() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("pool/a.deb", deb_bytes("a", "1")?);

        let cache = ControlDataCache::new(&store, "cache");
        assert!(cache.get_or_build_key("pool/missing.deb").await?.is_none());

        let record = cache.get_or_build_key("pool/a.deb").await?.unwrap();
        let entry = store.list("pool/").await?.remove(0);
        assert_eq!(cache.lookup(&entry.fingerprint).await?, Some(record));

        Ok(())
    }

    #[test]
    fn local_package_record() -> Result<()> {
        let data = deb_bytes("foo", "1.0")?;

        let mut fh = tempfile::NamedTempFile::new()?;
        fh.write_all(&data)?;
        fh.flush()?;

        let record = build_record_from_path(fh.path())?;
        assert_eq!(record.size(), data.len() as u64);
        assert_eq!(record.stanza().field_str("Package"), Some("foo"));

        Ok(())
    }
}
