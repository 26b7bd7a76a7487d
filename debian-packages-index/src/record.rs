// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package records as they appear in `Packages` indices. */

use {
    crate::{
        control::ControlStanza,
        error::{IndexError, Result},
        io::{digest_path, MultiContentDigest},
    },
    std::path::Path,
};

/// A binary package's control stanza extended with size and checksums.
///
/// The text form is the control stanza lines followed by `Size`, `MD5sum`,
/// `SHA1`, and `SHA256`, in that order. The `Filename` field is not part of the
/// record: it depends on where the package lives, not on what it contains.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageRecord {
    stanza: ControlStanza,
    size: u64,
    digests: MultiContentDigest,
}

impl PackageRecord {
    /// Construct an instance from its parts.
    pub fn new(stanza: ControlStanza, size: u64, digests: MultiContentDigest) -> Self {
        Self {
            stanza,
            size,
            digests,
        }
    }

    /// Build a record for a package file on the local filesystem.
    ///
    /// The size comes from filesystem metadata and the digests from reading the file.
    pub fn from_path(stanza: ControlStanza, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let size = std::fs::metadata(path)
            .map_err(|e| IndexError::IoPath(format!("{}", path.display()), e))?
            .len();
        let digests = digest_path(path)?;

        Ok(Self::new(stanza, size, digests))
    }

    /// The normalized control stanza.
    pub fn stanza(&self) -> &ControlStanza {
        &self.stanza
    }

    /// Size in bytes of the package file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Content digests of the package file.
    pub fn digests(&self) -> &MultiContentDigest {
        &self.digests
    }

    /// Render the record followed by a `Filename` field.
    ///
    /// This is the form entries take in a `Packages` index.
    pub fn to_index_entry(&self, filename: &str) -> String {
        with_filename(&self.to_string(), filename)
    }
}

impl std::fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in self.stanza.iter_lines() {
            writeln!(f, "{}", line)?;
        }

        write!(f, "Size: {}", self.size)?;

        for digest in self.digests.iter_digests() {
            write!(
                f,
                "\n{}: {}",
                digest.checksum_type().field_name(),
                digest.digest_hex()
            )?;
        }

        Ok(())
    }
}

/// Append a `Filename` field to rendered record text.
///
/// Works on the textual form so cached records can be used without reparsing.
/// The result ends with a newline, which is what separates entries by a blank
/// line once an index joins them.
pub fn with_filename(record: &str, filename: &str) -> String {
    format!("{}\nFilename: {}\n", record, filename)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::io::{digest_reader, ContentDigest},
        std::io::Write,
    };

    #[test]
    fn record_layout() {
        let record = PackageRecord::new(
            ControlStanza::normalize("Package: foo\nVersion: 1.0\nHomepage:\n"),
            1024,
            MultiContentDigest {
                md5: ContentDigest::Md5(vec![0xaa]),
                sha1: ContentDigest::Sha1(vec![0xbb]),
                sha256: ContentDigest::Sha256(vec![0xcc]),
            },
        );

        assert_eq!(
            record.to_string(),
            "Package: foo\nVersion: 1.0\nSize: 1024\nMD5sum: aa\nSHA1: bb\nSHA256: cc"
        );
        assert_eq!(
            record.to_index_entry("dists/stable/foo_1.0_amd64.deb"),
            "Package: foo\nVersion: 1.0\nSize: 1024\nMD5sum: aa\nSHA1: bb\nSHA256: cc\n\
             Filename: dists/stable/foo_1.0_amd64.deb\n"
        );
    }

    #[test]
    fn scenario_text_form() {
        let record = "Package: foo\nVersion: 1.0\nSize: 1024\nMD5sum: m\nSHA1: s1\nSHA256: s256";

        assert_eq!(
            with_filename(record, "dists/stable/foo_1.0_amd64.deb").trim_end(),
            "Package: foo\nVersion: 1.0\nSize: 1024\nMD5sum: m\nSHA1: s1\nSHA256: s256\n\
             Filename: dists/stable/foo_1.0_amd64.deb"
        );
    }

    #[test]
    fn from_path_is_pure() -> Result<()> {
        let data = vec![7u8; 1024];

        let mut fh = tempfile::NamedTempFile::new()?;
        fh.write_all(&data)?;
        fh.flush()?;

        let stanza = ControlStanza::normalize("Package: foo\nVersion: 1.0");
        let first = PackageRecord::from_path(stanza.clone(), fh.path())?;
        let second = PackageRecord::from_path(stanza, fh.path())?;

        assert_eq!(first, second);
        assert_eq!(first.size(), 1024);
        assert_eq!(first.digests(), &digest_reader(std::io::Cursor::new(&data))?.0);
        assert!(first
            .to_string()
            .starts_with("Package: foo\nVersion: 1.0\nSize: 1024\nMD5sum: "));

        Ok(())
    }
}
