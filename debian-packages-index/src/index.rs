// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Building `Packages` indices.

A namespace is a key prefix in the object store. Every package file under it is
described by one entry of the namespace's index, stored at
`<namespace>/Packages` by default. Indices are always rebuilt wholesale from the
current set of package files.

Each published index carries an [IndexFingerprint] in its object metadata. When
the fingerprint of the current package set matches the published one, a rebuild
does nothing at all.
*/

use {
    crate::{
        cache::ControlDataCache,
        config::{FingerprintMode, RepositoryConfig},
        error::Result,
        record::with_filename,
        store::{namespace_key, ObjectEntry, ObjectStore},
    },
    futures::StreamExt,
    log::{debug, info, warn},
    md5::Digest,
    std::collections::HashMap,
};

/// A digest summarizing the set of packages an index was built from.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct IndexFingerprint(String);

impl IndexFingerprint {
    /// Compute the fingerprint of a set of package file names.
    ///
    /// This is the hex MD5 of the sorted names joined by newlines. Order of input
    /// does not matter.
    pub fn from_filenames<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut names = names.into_iter().collect::<Vec<_>>();
        names.sort_unstable();

        Self(hex::encode(md5::Md5::digest(names.join("\n").as_bytes())))
    }

    /// Compute the fingerprint of listed packages according to a [FingerprintMode].
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = &'a ObjectEntry>,
        mode: FingerprintMode,
    ) -> Self {
        match mode {
            FingerprintMode::Filenames => {
                Self::from_filenames(entries.into_iter().map(|entry| entry.basename()))
            }
            FingerprintMode::FilenamesAndContent => {
                let lines = entries
                    .into_iter()
                    .map(|entry| format!("{} {}", entry.basename(), entry.fingerprint))
                    .collect::<Vec<_>>();

                Self::from_filenames(lines.iter().map(|s| s.as_str()))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IndexFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of [PackagesIndexBuilder::rebuild()].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RebuildOutcome {
    /// The namespace holds no packages. Nothing was written.
    EmptyNamespace,

    /// Every package failed to parse. Nothing was written.
    NoValidPackages { excluded: Vec<String> },

    /// The published index already describes the current packages. Nothing was written.
    UpToDate { fingerprint: IndexFingerprint },

    /// A new index was written.
    Published {
        key: String,
        fingerprint: IndexFingerprint,
        packages: usize,
        excluded: Vec<String>,
    },
}

impl std::fmt::Display for RebuildOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyNamespace => write!(f, "no packages; index not written"),
            Self::NoValidPackages { excluded } => write!(
                f,
                "no indexable packages ({} excluded); index not written",
                excluded.len()
            ),
            Self::UpToDate { fingerprint } => {
                write!(f, "index up to date (fingerprint {})", fingerprint)
            }
            Self::Published {
                key,
                fingerprint,
                packages,
                excluded,
            } => write!(
                f,
                "published {} with {} packages (fingerprint {}; {} excluded)",
                key,
                packages,
                fingerprint,
                excluded.len()
            ),
        }
    }
}

/// Rebuilds `Packages` indices of namespaces in an [ObjectStore].
pub struct PackagesIndexBuilder<'a> {
    store: &'a dyn ObjectStore,
    config: &'a RepositoryConfig,
}

impl<'a> PackagesIndexBuilder<'a> {
    pub fn new(store: &'a dyn ObjectStore, config: &'a RepositoryConfig) -> Self {
        Self { store, config }
    }

    /// The key of the index of a namespace.
    pub fn index_key(&self, namespace: &str) -> String {
        namespace_key(namespace, &self.config.index_file_name)
    }

    /// List package files in a namespace.
    ///
    /// The root of the store is not a namespace and never holds packages, so
    /// packages outside of any namespace are never indexed.
    pub async fn package_entries(&self, namespace: &str) -> Result<Vec<ObjectEntry>> {
        if namespace.trim_matches('/').is_empty() {
            debug!("root of the store is not a package namespace");
            return Ok(vec![]);
        }

        let prefix = namespace_key(namespace, "");

        Ok(self
            .store
            .list(&prefix)
            .await?
            .into_iter()
            .filter(|entry| self.config.is_package_key(&entry.key))
            .collect())
    }

    /// The fingerprint recorded on the currently published index, if any.
    pub async fn published_fingerprint(&self, namespace: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .head(&self.index_key(namespace))
            .await?
            .and_then(|head| {
                head.metadata
                    .get(&self.config.fingerprint_metadata_key)
                    .cloned()
            }))
    }

    /// Rebuild the index of a namespace if its package set changed.
    pub async fn rebuild(&self, namespace: &str) -> Result<RebuildOutcome> {
        let namespace = namespace.trim_matches('/');
        info!("rebuilding package index of namespace {:?}", namespace);

        let entries = self.package_entries(namespace).await?;
        if entries.is_empty() {
            info!("not building empty package index");
            return Ok(RebuildOutcome::EmptyNamespace);
        }

        let published = self.published_fingerprint(namespace).await?;
        let candidate = IndexFingerprint::from_entries(&entries, self.config.fingerprint_mode);
        debug!(
            "candidate fingerprint {}, published fingerprint {:?}",
            candidate, published
        );

        if published.as_deref() == Some(candidate.as_str()) {
            info!("package index already up to date");
            return Ok(RebuildOutcome::UpToDate {
                fingerprint: candidate,
            });
        }

        let cache = ControlDataCache::from_config(self.store, self.config);

        let mut fs = futures::stream::iter(entries.iter().map(|entry| {
            let cache = &cache;
            async move { (entry, cache.get_or_build(entry).await) }
        }))
        .buffer_unordered(self.config.max_parallel_io.max(1));

        let mut records = vec![];
        let mut included = vec![];
        let mut excluded = vec![];

        while let Some((entry, res)) = fs.next().await {
            match res {
                Ok(record) => {
                    debug!("indexed {}", entry.key);
                    records.push(with_filename(&record, &entry.key));
                    included.push(entry);
                }
                Err(e) if self.config.isolate_package_failures && e.is_malformed_package() => {
                    warn!("excluding {} from package index: {}", entry.key, e);
                    excluded.push(entry.key.clone());
                }
                Err(e) => return Err(e),
            }
        }

        excluded.sort();

        if records.is_empty() {
            warn!("no package in namespace {:?} could be indexed", namespace);
            return Ok(RebuildOutcome::NoValidPackages { excluded });
        }

        // Fingerprint what was actually indexed so excluded packages get retried.
        let fingerprint = if excluded.is_empty() {
            candidate
        } else {
            let fingerprint =
                IndexFingerprint::from_entries(included, self.config.fingerprint_mode);

            if published.as_deref() == Some(fingerprint.as_str()) {
                info!("package index already up to date");
                return Ok(RebuildOutcome::UpToDate { fingerprint });
            }

            fingerprint
        };

        records.sort();
        let packages = records.len();

        let key = self.index_key(namespace);
        info!("writing package index {}", key);
        self.store
            .put(
                &key,
                records.join("\n").into_bytes(),
                HashMap::from([(
                    self.config.fingerprint_metadata_key.clone(),
                    fingerprint.to_string(),
                )]),
            )
            .await?;

        info!("done rebuilding package index {}", key);

        Ok(RebuildOutcome::Published {
            key,
            fingerprint,
            packages,
            excluded,
        })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{error::IndexError, store::memory::MemoryObjectStore, testutil::deb_bytes},
    };

    fn config() -> RepositoryConfig {
        RepositoryConfig::new("memory://repo")
    }

    #[test]
    fn fingerprint_of_filenames() {
        let fp = IndexFingerprint::from_filenames(["b.deb", "a.deb"]);

        assert_eq!(
            fp.as_str(),
            hex::encode(md5::Md5::digest(b"a.deb\nb.deb")).as_str()
        );
        assert_eq!(fp, IndexFingerprint::from_filenames(["a.deb", "b.deb"]));
        assert_ne!(fp, IndexFingerprint::from_filenames(["a.deb"]));
    }

    #[test]
    fn fingerprint_modes() {
        let entry = |fingerprint: &str| ObjectEntry {
            key: "dists/stable/a.deb".into(),
            fingerprint: fingerprint.into(),
            size: 1,
        };

        let first = [entry("one")];
        let second = [entry("two")];

        assert_eq!(
            IndexFingerprint::from_entries(&first, FingerprintMode::Filenames),
            IndexFingerprint::from_filenames(["a.deb"])
        );
        assert_eq!(
            IndexFingerprint::from_entries(&first, FingerprintMode::Filenames),
            IndexFingerprint::from_entries(&second, FingerprintMode::Filenames)
        );
        assert_ne!(
            IndexFingerprint::from_entries(&first, FingerprintMode::FilenamesAndContent),
            IndexFingerprint::from_entries(&second, FingerprintMode::FilenamesAndContent)
        );
    }

    #[tokio::test]
    async fn root_is_not_a_namespace() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("dists/stable/a.deb", deb_bytes("a", "1.0")?);
        store.insert("dists/testing/c.deb", deb_bytes("c", "1.0")?);
        store.insert("b.deb", deb_bytes("b", "1.0")?);

        let config = config();
        let builder = PackagesIndexBuilder::new(&store, &config);

        for namespace in ["", "/"] {
            assert!(builder.package_entries(namespace).await?.is_empty());
            assert_eq!(
                builder.rebuild(namespace).await?,
                RebuildOutcome::EmptyNamespace
            );
        }

        assert!(store.content("Packages").is_none());
        assert!(store.operations().iter().all(|op| !op.is_write()));

        Ok(())
    }

    #[tokio::test]
    async fn rebuild_twice_writes_once() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("dists/stable/b.deb", deb_bytes("b", "2.0")?);
        store.insert("dists/stable/a.deb", deb_bytes("a", "1.0")?);
        store.insert("dists/stable/README", "not a package");

        let config = config();
        let builder = PackagesIndexBuilder::new(&store, &config);

        let outcome = builder.rebuild("dists/stable").await?;
        let fingerprint = IndexFingerprint::from_filenames(["a.deb", "b.deb"]);
        assert_eq!(
            outcome,
            RebuildOutcome::Published {
                key: "dists/stable/Packages".into(),
                fingerprint: fingerprint.clone(),
                packages: 2,
                excluded: vec![],
            }
        );
        assert_eq!(
            store.metadata("dists/stable/Packages"),
            Some(HashMap::from([(
                "packages-hash".to_string(),
                fingerprint.to_string()
            )]))
        );

        let index = String::from_utf8(store.content("dists/stable/Packages").unwrap())
            .map_err(|e| IndexError::Store("index".into(), e.to_string()))?;
        let entries = index.split("\n\n").collect::<Vec<_>>();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].starts_with("Package: a\n"));
        assert!(entries[0].ends_with("\nFilename: dists/stable/a.deb"));
        assert!(entries[1].starts_with("Package: b\n"));
        assert!(entries[1].ends_with("\nFilename: dists/stable/b.deb\n"));

        store.clear_operations();
        assert_eq!(
            builder.rebuild("dists/stable").await?,
            RebuildOutcome::UpToDate { fingerprint }
        );
        assert_eq!(store.writes_to("dists/stable/Packages"), 0);
        assert!(store.operations().iter().all(|op| !op.is_write()));

        Ok(())
    }

    #[tokio::test]
    async fn empty_namespace() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("dists/other/a.deb", deb_bytes("a", "1.0")?);

        let config = config();
        let builder = PackagesIndexBuilder::new(&store, &config);

        assert_eq!(
            builder.rebuild("dists/stable").await?,
            RebuildOutcome::EmptyNamespace
        );
        assert!(store.operations().iter().all(|op| !op.is_write()));

        Ok(())
    }

    #[tokio::test]
    async fn new_package_triggers_rebuild() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("pool/a.deb", deb_bytes("a", "1.0")?);

        let config = config();
        let builder = PackagesIndexBuilder::new(&store, &config);
        builder.rebuild("pool").await?;

        store.insert("pool/c.deb", deb_bytes("c", "1.0")?);
        store.clear_operations();

        match builder.rebuild("/pool/").await? {
            RebuildOutcome::Published { packages, .. } => assert_eq!(packages, 2),
            outcome => panic!("unexpected outcome: {:?}", outcome),
        }

        // Only the new package was downloaded.
        assert_eq!(store.gets_of("pool/a.deb"), 0);
        assert_eq!(store.gets_of("pool/c.deb"), 1);

        Ok(())
    }

    #[tokio::test]
    async fn malformed_package_isolated() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("pool/a.deb", deb_bytes("a", "1.0")?);
        store.insert("pool/broken.deb", "garbage");

        let config = config();
        let builder = PackagesIndexBuilder::new(&store, &config);

        let outcome = builder.rebuild("pool").await?;
        let fingerprint = IndexFingerprint::from_filenames(["a.deb"]);
        assert_eq!(
            outcome,
            RebuildOutcome::Published {
                key: "pool/Packages".into(),
                fingerprint: fingerprint.clone(),
                packages: 1,
                excluded: vec!["pool/broken.deb".into()],
            }
        );

        // The broken package is retried but the index is not rewritten.
        store.clear_operations();
        assert_eq!(
            builder.rebuild("pool").await?,
            RebuildOutcome::UpToDate { fingerprint }
        );
        assert_eq!(store.gets_of("pool/broken.deb"), 1);
        assert_eq!(store.writes_to("pool/Packages"), 0);

        Ok(())
    }

    #[tokio::test]
    async fn malformed_package_fatal_without_isolation() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("pool/a.deb", deb_bytes("a", "1.0")?);
        store.insert("pool/broken.deb", "garbage");

        let mut config = config();
        config.isolate_package_failures = false;
        let builder = PackagesIndexBuilder::new(&store, &config);

        assert!(builder.rebuild("pool").await.unwrap_err().is_malformed_package());
        assert_eq!(store.writes_to("pool/Packages"), 0);

        Ok(())
    }

    #[tokio::test]
    async fn only_malformed_packages() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("pool/broken.deb", "garbage");

        let config = config();
        let builder = PackagesIndexBuilder::new(&store, &config);

        assert_eq!(
            builder.rebuild("pool").await?,
            RebuildOutcome::NoValidPackages {
                excluded: vec!["pool/broken.deb".into()]
            }
        );
        assert_eq!(store.writes_to("pool/Packages"), 0);

        Ok(())
    }

    #[tokio::test]
    async fn content_mode_sees_overwrites() -> Result<()> {
        let store = MemoryObjectStore::new("repo");
        store.insert("pool/a.deb", deb_bytes("a", "1.0")?);

        let mut config = config();
        config.fingerprint_mode = FingerprintMode::FilenamesAndContent;
        let builder = PackagesIndexBuilder::new(&store, &config);
        builder.rebuild("pool").await?;

        store.insert("pool/a.deb", deb_bytes("a", "1.1")?);
        assert!(matches!(
            builder.rebuild("pool").await?,
            RebuildOutcome::Published { .. }
        ));

        let index = store.content("pool/Packages").unwrap();
        assert!(String::from_utf8_lossy(&index).contains("Version: 1.1\n"));

        Ok(())
    }
}
