// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("JSON error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0:?}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("malformed .deb archive: {0}")]
    DebMalformedArchive(String),

    #[error(".deb archive has no control archive member (looked for {0})")]
    DebControlArchiveMissing(String),

    #[error("unknown compression in deb archive member: {0}")]
    DebUnknownCompression(String),

    #[error("control file not found in control archive")]
    ControlFileMissing,

    #[error("control file is not valid UTF-8: {0}")]
    ControlNotUtf8(#[from] std::string::FromUtf8Error),

    #[error("object not found: {0}")]
    StoreNotFound(String),

    #[error("object store error on key {0}: {1}")]
    Store(String, String),

    #[error("invalid timestamp from object store: {0}")]
    StoreTimestamp(String),

    #[error("invalid AWS region: {0}")]
    InvalidRegion(String),

    #[error("unsupported repository URL: {0}")]
    UnsupportedRepositoryUrl(String),

    #[error("malformed trigger event: {0}")]
    EventMalformed(String),
}

impl IndexError {
    /// Whether this error means the package content itself could not be understood.
    ///
    /// These errors are never cached. Retrying on the same bytes will produce the same
    /// error.
    pub fn is_malformed_package(&self) -> bool {
        matches!(
            self,
            Self::DebMalformedArchive(_)
                | Self::DebControlArchiveMissing(_)
                | Self::DebUnknownCompression(_)
                | Self::ControlFileMissing
                | Self::ControlNotUtf8(_)
        )
    }

    /// Whether this error represents a missing object in the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::StoreNotFound(_))
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, IndexError>;
