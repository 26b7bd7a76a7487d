// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers for computing package content digests. */

use {
    crate::error::{IndexError, Result},
    digest::Digest,
    std::{fmt::Formatter, io::Read, path::Path},
};

/// Size of chunks read when digesting files.
pub const DIGEST_CHUNK_SIZE: usize = 1024 * 1024;

/// Checksum flavors recorded in `Packages` indices.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ChecksumType {
    /// MD5.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
}

impl ChecksumType {
    /// Emit variants in the order they appear in package records.
    pub fn record_order() -> impl Iterator<Item = ChecksumType> {
        [Self::Md5, Self::Sha1, Self::Sha256].into_iter()
    }

    /// Name of the control field in package records holding this checksum.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }
}

/// Represents a content digest.
#[derive(Clone, Eq, PartialEq)]
pub enum ContentDigest {
    /// An MD5 digest.
    Md5(Vec<u8>),
    /// A SHA-1 digest.
    Sha1(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    /// Obtain the [ChecksumType] for this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Md5(_) => ChecksumType::Md5,
            Self::Sha1(_) => ChecksumType::Sha1,
            Self::Sha256(_) => ChecksumType::Sha256,
        }
    }
}

/// Holds multiple flavors of content digests of the same content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultiContentDigest {
    pub md5: ContentDigest,
    pub sha1: ContentDigest,
    pub sha256: ContentDigest,
}

impl MultiContentDigest {
    /// Obtain the [ContentDigest] for a given [ChecksumType].
    pub fn digest_from_checksum(&self, checksum: ChecksumType) -> &ContentDigest {
        match checksum {
            ChecksumType::Md5 => &self.md5,
            ChecksumType::Sha1 => &self.sha1,
            ChecksumType::Sha256 => &self.sha256,
        }
    }

    /// Obtain an iterator of [ContentDigest] in package record order.
    pub fn iter_digests(&self) -> impl Iterator<Item = &ContentDigest> + '_ {
        ChecksumType::record_order().map(|checksum| self.digest_from_checksum(checksum))
    }
}

/// A content digester that simultaneously computes multiple digest types.
#[derive(Default)]
pub struct MultiDigester {
    md5: md5::Md5,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
    bytes: u64,
}

impl MultiDigester {
    /// Write content into the digesters.
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes fed into the digesters so far.
    pub fn bytes_digested(&self) -> u64 {
        self.bytes
    }

    /// Finish digesting content.
    ///
    /// Consumes the instance and returns a [MultiContentDigest] holding all the digests.
    pub fn finish(self) -> MultiContentDigest {
        MultiContentDigest {
            md5: ContentDigest::Md5(self.md5.finalize().to_vec()),
            sha1: ContentDigest::Sha1(self.sha1.finalize().to_vec()),
            sha256: ContentDigest::Sha256(self.sha256.finalize().to_vec()),
        }
    }
}

/// Digest all content of a reader in a single pass.
///
/// Content is consumed in [DIGEST_CHUNK_SIZE] chunks and every digester sees every
/// chunk. Returns the digests and the number of bytes read.
pub fn digest_reader(mut reader: impl Read) -> std::io::Result<(MultiContentDigest, u64)> {
    let mut digester = MultiDigester::default();
    let mut buffer = vec![0u8; DIGEST_CHUNK_SIZE];

    loop {
        let size = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(size) => size,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        digester.update(&buffer[0..size]);
    }

    let bytes = digester.bytes_digested();

    Ok((digester.finish(), bytes))
}

/// Compute the MD5, SHA-1, and SHA-256 digests of a file in one pass.
pub fn digest_path(path: impl AsRef<Path>) -> Result<MultiContentDigest> {
    let path = path.as_ref();

    let fh = std::fs::File::open(path)
        .map_err(|e| IndexError::IoPath(format!("{}", path.display()), e))?;

    let (digests, _) =
        digest_reader(fh).map_err(|e| IndexError::IoPath(format!("{}", path.display()), e))?;

    Ok(digests)
}
