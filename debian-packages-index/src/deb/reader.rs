// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! .deb file reading functionality.

A .deb binary package file is an ar archive with 3 entries:

1. `debian-binary` holding the version of the binary package format.
2. `control.tar[.<ext>]` holding package metadata.
3. `data.tar[.<ext>]` holding file content.

Only the `control` file inside `control.tar` is of interest here.
*/

use {
    crate::{
        control::ControlStanza,
        deb::DebCompression,
        error::{IndexError, Result},
    },
    std::io::{Cursor, Read},
};

/// Names of the control archive member we accept, in order of preference.
///
/// Member naming isn't fixed across package builders. If an archive somehow
/// carries more than one of these, the earliest listed wins.
pub const CONTROL_ARCHIVE_MEMBERS: &[&str] = &[
    "control.tar.gz",
    "control.tar.xz",
    "control.tar.zst",
    "control.tar",
];

/// Paths under which the `control` file is found inside `control.tar`.
pub const CONTROL_FILE_PATHS: &[&[u8]] = &[b"control", b"./control"];

/// Convert an error raised while walking the outer ar container.
///
/// Structural problems become [IndexError::DebMalformedArchive]. Anything else is
/// a genuine I/O failure on the underlying reader.
fn ar_error(e: std::io::Error) -> IndexError {
    match e.kind() {
        std::io::ErrorKind::InvalidData
        | std::io::ErrorKind::InvalidInput
        | std::io::ErrorKind::UnexpectedEof => {
            IndexError::DebMalformedArchive(format!("ar: {}", e))
        }
        _ => IndexError::Io(e),
    }
}

/// A raw member of the outer ar archive holding the control archive.
#[derive(Clone, Debug)]
pub struct ControlArchiveMember {
    /// The ar member name. e.g. `control.tar.xz`.
    pub name: String,
    /// Compression format, derived from the member name.
    pub compression: DebCompression,
    /// Raw (still compressed) member content.
    pub data: Vec<u8>,
}

impl ControlArchiveMember {
    /// Open the member as a tar archive, decompressing as necessary.
    pub fn archive(self) -> Result<tar::Archive<Box<dyn Read + Send>>> {
        Ok(tar::Archive::new(
            self.compression.decompress_reader(Cursor::new(self.data))?,
        ))
    }
}

/// Locate the control archive member in a .deb archive.
///
/// The whole ar archive is walked so the preferred name can win over members
/// appearing earlier. Content of other members is skipped without buffering.
pub fn find_control_archive(reader: impl Read) -> Result<ControlArchiveMember> {
    let mut archive = ar::Archive::new(reader);

    let mut candidates = vec![];
    let mut unsupported = None;

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.map_err(ar_error)?;

        // Member names should be ASCII, so converting to strings feels reasonably safe.
        let name = String::from_utf8_lossy(entry.header().identifier()).to_string();

        if CONTROL_ARCHIVE_MEMBERS.contains(&name.as_str()) {
            let mut data = vec![];
            entry.read_to_end(&mut data).map_err(ar_error)?;
            candidates.push((name, data));
        } else {
            if name.starts_with("control.tar") {
                unsupported.get_or_insert_with(|| name.clone());
            }
            std::io::copy(&mut entry, &mut std::io::sink()).map_err(ar_error)?;
        }
    }

    for wanted in CONTROL_ARCHIVE_MEMBERS {
        if let Some(pos) = candidates.iter().position(|(name, _)| name == wanted) {
            let (name, data) = candidates.swap_remove(pos);
            let compression =
                DebCompression::from_extension(name.trim_start_matches("control.tar"))?;

            return Ok(ControlArchiveMember {
                name,
                compression,
                data,
            });
        }
    }

    if let Some(name) = unsupported {
        Err(IndexError::DebUnknownCompression(name))
    } else {
        Err(IndexError::DebControlArchiveMissing(
            CONTROL_ARCHIVE_MEMBERS.join(", "),
        ))
    }
}

/// Read the raw text of the `control` file from a `control.tar` archive.
///
/// The content is decoded as UTF-8 and surrounding whitespace is trimmed.
pub fn read_control_file<R: Read>(archive: &mut tar::Archive<R>) -> Result<String> {
    let entries = archive
        .entries()
        .map_err(|e| IndexError::DebMalformedArchive(format!("control tar: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| IndexError::DebMalformedArchive(format!("control tar: {}", e)))?;

        let path = entry.path_bytes().into_owned();
        if !CONTROL_FILE_PATHS.contains(&path.as_slice()) {
            continue;
        }

        let mut data = vec![];
        entry
            .read_to_end(&mut data)
            .map_err(|e| IndexError::DebMalformedArchive(format!("control file: {}", e)))?;

        return Ok(String::from_utf8(data)?.trim().to_string());
    }

    Err(IndexError::ControlFileMissing)
}

/// Resolve the raw `control` file text from a .deb archive.
pub fn resolve_control_text(reader: impl Read) -> Result<String> {
    let member = find_control_archive(reader)?;
    let mut archive = member.archive()?;

    read_control_file(&mut archive)
}

/// Resolve the normalized control stanza from a .deb archive.
pub fn resolve_control_stanza(reader: impl Read) -> Result<ControlStanza> {
    Ok(ControlStanza::normalize(&resolve_control_text(reader)?))
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::deb::builder::{write_deb_tar, DebBuilder},
        std::{collections::BTreeMap, path::PathBuf},
    };

    const CONTROL: &str = "Package: foo\nVersion: 1.0\nHomepage:\nArchitecture: amd64\n";

    fn build(compression: DebCompression) -> Result<Vec<u8>> {
        let mut buffer = vec![];
        DebBuilder::new(CONTROL)
            .set_compression(compression)
            .install_file("usr/bin/foo", b"#!/bin/sh\n".to_vec(), true)?
            .write(&mut buffer)?;

        Ok(buffer)
    }

    /// Assemble an ar archive from raw members.
    fn ar_archive(members: &[(&str, &[u8])]) -> Result<Vec<u8>> {
        let mut buffer = vec![];
        {
            let mut builder = ar::Builder::new(&mut buffer);
            for (name, data) in members {
                let header = ar::Header::new(name.as_bytes().to_vec(), data.len() as _);
                builder.append(&header, *data)?;
            }
        }

        Ok(buffer)
    }

    /// A plain tar archive with a single file at the literal path given.
    fn tar_with_file(path: &str, data: &[u8]) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(vec![]);
        let mut header = tar::Header::new_gnu();
        header.set_path(path)?;
        header.set_size(data.len() as _);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, data)?;

        Ok(builder.into_inner()?)
    }

    #[test]
    fn all_compressions() -> Result<()> {
        for compression in [
            DebCompression::Uncompressed,
            DebCompression::Gzip,
            DebCompression::Xz(6),
            DebCompression::Zstandard(3),
        ] {
            let deb = build(compression)?;

            let member = find_control_archive(Cursor::new(&deb))?;
            assert_eq!(member.compression, compression);
            assert_eq!(
                member.name,
                format!("control.tar{}", compression.extension())
            );

            let stanza = resolve_control_stanza(Cursor::new(&deb))?;
            assert_eq!(
                stanza.to_string(),
                "Package: foo\nVersion: 1.0\nArchitecture: amd64"
            );
        }

        Ok(())
    }

    #[test]
    fn raw_text_is_trimmed_but_not_normalized() -> Result<()> {
        let deb = build(DebCompression::Gzip)?;

        assert_eq!(
            resolve_control_text(Cursor::new(deb))?,
            "Package: foo\nVersion: 1.0\nHomepage:\nArchitecture: amd64"
        );

        Ok(())
    }

    #[test]
    fn bare_control_path() -> Result<()> {
        let control_tar = tar_with_file("control", b"Package: bare\n")?;
        let deb = ar_archive(&[
            ("debian-binary", &b"2.0\n"[..]),
            ("control.tar", control_tar.as_slice()),
        ])?;

        assert_eq!(resolve_control_text(Cursor::new(deb))?, "Package: bare");

        Ok(())
    }

    #[test]
    fn preferred_member_wins() -> Result<()> {
        let plain = tar_with_file("./control", b"Package: plain\n")?;
        let gz = DebCompression::Gzip
            .compress(&mut Cursor::new(tar_with_file("./control", b"Package: gz\n")?))?;

        let deb = ar_archive(&[
            ("debian-binary", &b"2.0\n"[..]),
            ("control.tar", plain.as_slice()),
            ("control.tar.gz", gz.as_slice()),
        ])?;

        assert_eq!(resolve_control_text(Cursor::new(deb))?, "Package: gz");

        Ok(())
    }

    #[test]
    fn missing_control_file() -> Result<()> {
        let mut files = BTreeMap::new();
        files.insert(PathBuf::from("postinst"), (b"#!/bin/sh\n".to_vec(), true));
        let mut control_tar = vec![];
        write_deb_tar(&mut control_tar, &files, 0)?;

        let deb = ar_archive(&[
            ("debian-binary", &b"2.0\n"[..]),
            ("control.tar", control_tar.as_slice()),
        ])?;

        let err = resolve_control_text(Cursor::new(deb)).unwrap_err();
        assert!(matches!(err, IndexError::ControlFileMissing));
        assert!(err.is_malformed_package());

        Ok(())
    }

    #[test]
    fn missing_control_archive() -> Result<()> {
        let deb = ar_archive(&[("debian-binary", &b"2.0\n"[..]), ("data.tar", &b""[..])])?;

        assert!(matches!(
            find_control_archive(Cursor::new(deb)),
            Err(IndexError::DebControlArchiveMissing(_))
        ));

        Ok(())
    }

    #[test]
    fn unknown_control_compression() -> Result<()> {
        let deb = ar_archive(&[("debian-binary", &b"2.0\n"[..]), ("control.tar.lz4", &b"xx"[..])])?;

        assert!(matches!(
            find_control_archive(Cursor::new(deb)),
            Err(IndexError::DebUnknownCompression(name)) if name == "control.tar.lz4"
        ));

        Ok(())
    }

    #[test]
    fn not_an_ar_archive() {
        let err = resolve_control_text(Cursor::new(b"this is not a deb file".to_vec()))
            .unwrap_err();

        assert!(err.is_malformed_package(), "{:?}", err);
    }

    #[test]
    fn non_utf8_control() -> Result<()> {
        let control_tar = tar_with_file("./control", b"Package: \xff\xfe\n")?;
        let deb = ar_archive(&[
            ("debian-binary", &b"2.0\n"[..]),
            ("control.tar", control_tar.as_slice()),
        ])?;

        assert!(matches!(
            resolve_control_text(Cursor::new(deb)),
            Err(IndexError::ControlNotUtf8(_))
        ));

        Ok(())
    }
}
