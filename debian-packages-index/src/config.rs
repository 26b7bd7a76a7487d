// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository configuration. */

use {
    crate::{
        error::{IndexError, Result},
        store::{store_from_str, ObjectStore},
    },
    serde::{Deserialize, Serialize},
    std::path::Path,
};

/// Environment variable holding the name of the S3 bucket of the repository.
pub const ENV_BUCKET_NAME: &str = "APT_REPO_BUCKET_NAME";

/// Environment variable holding the key prefix of cached package records.
pub const ENV_CONTROL_DATA_CACHE_PREFIX: &str = "CONTROL_DATA_CACHE_PREFIX";

/// What goes into the fingerprint guarding index rebuilds.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FingerprintMode {
    /// Only the sorted package file names.
    ///
    /// Overwriting a package in place does not change the fingerprint. Pair this
    /// with version reconciliation.
    Filenames,

    /// File names plus each package's content fingerprint.
    FilenamesAndContent,
}

impl Default for FingerprintMode {
    fn default() -> Self {
        Self::Filenames
    }
}

fn default_control_data_cache_prefix() -> String {
    "control-data-cache".to_string()
}

fn default_index_file_name() -> String {
    "Packages".to_string()
}

fn default_package_extension() -> String {
    ".deb".to_string()
}

fn default_fingerprint_metadata_key() -> String {
    "packages-hash".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_parallel_io() -> usize {
    4
}

/// Describes a repository whose `Packages` indices are maintained.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// URL or path of the object store holding the repository.
    pub repository_url: String,

    /// AWS region of an S3 repository.
    ///
    /// If not defined, the region is resolved from the environment.
    pub region: Option<String>,

    /// Key prefix under which package records are cached by content fingerprint.
    #[serde(default = "default_control_data_cache_prefix")]
    pub control_data_cache_prefix: String,

    /// File name of the index within each namespace.
    #[serde(default = "default_index_file_name")]
    pub index_file_name: String,

    /// Suffix identifying package files.
    #[serde(default = "default_package_extension")]
    pub package_extension: String,

    /// Name of the index object metadata holding the index fingerprint.
    #[serde(default = "default_fingerprint_metadata_key")]
    pub fingerprint_metadata_key: String,

    #[serde(default)]
    pub fingerprint_mode: FingerprintMode,

    /// Whether a malformed package is left out of the index instead of failing the rebuild.
    #[serde(default = "default_true")]
    pub isolate_package_failures: bool,

    /// Whether package notifications prune extra versions of the package key.
    #[serde(default = "default_true")]
    pub reconcile_versions: bool,

    /// Maximum number of package records resolved concurrently.
    #[serde(default = "default_max_parallel_io")]
    pub max_parallel_io: usize,
}

impl RepositoryConfig {
    /// Construct an instance with default settings for the given repository.
    pub fn new(repository_url: impl ToString) -> Self {
        Self {
            repository_url: repository_url.to_string(),
            region: None,
            control_data_cache_prefix: default_control_data_cache_prefix(),
            index_file_name: default_index_file_name(),
            package_extension: default_package_extension(),
            fingerprint_metadata_key: default_fingerprint_metadata_key(),
            fingerprint_mode: FingerprintMode::default(),
            isolate_package_failures: true,
            reconcile_versions: true,
            max_parallel_io: default_max_parallel_io(),
        }
    }

    /// Parse an instance from YAML.
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    /// Parse an instance from a YAML file.
    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let f = std::fs::File::open(path)
            .map_err(|e| IndexError::IoPath(format!("{}", path.display()), e))?;

        Self::from_reader(f)
    }

    /// Apply overrides from variables resolved through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bucket) = lookup(ENV_BUCKET_NAME).filter(|s| !s.is_empty()) {
            self.repository_url = format!("s3://{}", bucket);
        }

        if let Some(prefix) = lookup(ENV_CONTROL_DATA_CACHE_PREFIX).filter(|s| !s.is_empty()) {
            self.control_data_cache_prefix = prefix;
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env_overrides(|name| std::env::var(name).ok())
    }

    /// Obtain the [ObjectStore] this configuration describes.
    pub fn object_store(&self) -> Result<Box<dyn ObjectStore>> {
        store_from_str(&self.repository_url, self.region.as_deref())
    }

    /// Whether a key names a package file.
    pub fn is_package_key(&self, key: &str) -> bool {
        key.ends_with(&self.package_extension)
    }

    /// Whether a key names an index file.
    pub fn is_index_key(&self, key: &str) -> bool {
        crate::store::basename(key) == self.index_file_name
    }
}
