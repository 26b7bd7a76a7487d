// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Create .deb package files.

This is a deliberately small writer: enough to produce packages that look like
what `dpkg-deb` emits so indexing can be exercised end to end.
*/

use {
    crate::{deb::DebCompression, error::Result},
    md5::Digest,
    std::{
        collections::{BTreeMap, BTreeSet},
        io::Write,
        path::{Path, PathBuf},
        time::SystemTime,
    },
};

/// Files keyed by relative path. Values are content and whether the file is executable.
pub type TarFiles = BTreeMap<PathBuf, (Vec<u8>, bool)>;

fn unix_seconds(time: Option<SystemTime>) -> u64 {
    time.unwrap_or_else(SystemTime::now)
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A builder for a `.deb` package file.
pub struct DebBuilder {
    control: String,
    compression: DebCompression,
    extra_control_files: TarFiles,
    install_files: TarFiles,
    mtime: Option<SystemTime>,
}

impl DebBuilder {
    /// Construct a new instance from the text of the `control` file.
    pub fn new(control: impl ToString) -> Self {
        Self {
            control: control.to_string(),
            compression: DebCompression::Gzip,
            extra_control_files: TarFiles::new(),
            install_files: TarFiles::new(),
            mtime: None,
        }
    }

    /// Set the compression format to use for the inner tar archives.
    pub fn set_compression(mut self, compression: DebCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the modified time to use on archive members.
    ///
    /// If not called, the current time will be used.
    pub fn set_mtime(mut self, time: Option<SystemTime>) -> Self {
        self.mtime = time;
        self
    }

    /// Add an extra file (e.g. a maintainer script) to the `control.tar` archive.
    pub fn extra_control_tar_file(
        mut self,
        path: impl AsRef<Path>,
        data: Vec<u8>,
        executable: bool,
    ) -> Self {
        self.extra_control_files
            .insert(path.as_ref().to_path_buf(), (data, executable));
        self
    }

    /// Register a file to be installed by this package.
    ///
    /// Filenames should be relative to the filesystem root. e.g. `usr/bin/myapp`.
    pub fn install_file(
        mut self,
        path: impl AsRef<Path>,
        data: Vec<u8>,
        executable: bool,
    ) -> Result<Self> {
        let path = path.as_ref();

        if path.is_absolute() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("install path must be relative: {}", path.display()),
            )
            .into());
        }

        self.install_files
            .insert(path.to_path_buf(), (data, executable));

        Ok(self)
    }

    fn md5sums(&self) -> Vec<u8> {
        let mut res = vec![];

        for (path, (data, _)) in &self.install_files {
            let digest = md5::Md5::digest(data);
            res.extend(format!("{}  {}\n", hex::encode(digest), path.display()).into_bytes());
        }

        res
    }

    fn append_member(
        &self,
        builder: &mut ar::Builder<impl Write>,
        name: String,
        data: &[u8],
    ) -> Result<()> {
        let mut header = ar::Header::new(name.into_bytes(), data.len() as _);
        header.set_mode(0o644);
        header.set_mtime(unix_seconds(self.mtime));
        header.set_uid(0);
        header.set_gid(0);
        builder.append(&header, data)?;

        Ok(())
    }

    /// Write `.deb` file content to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut ar_builder = ar::Builder::new(writer);

        self.append_member(&mut ar_builder, "debian-binary".into(), b"2.0\n")?;

        let mut control_files = self.extra_control_files.clone();
        control_files.insert(
            PathBuf::from("control"),
            (self.control.clone().into_bytes(), false),
        );
        control_files.insert(PathBuf::from("md5sums"), (self.md5sums(), false));

        let mut control_tar = vec![];
        write_deb_tar(&mut control_tar, &control_files, unix_seconds(self.mtime))?;
        let control_tar = self
            .compression
            .compress(&mut std::io::Cursor::new(control_tar))?;
        self.append_member(
            &mut ar_builder,
            format!("control.tar{}", self.compression.extension()),
            &control_tar,
        )?;

        let mut data_tar = vec![];
        write_deb_tar(&mut data_tar, &self.install_files, unix_seconds(self.mtime))?;
        let data_tar = self
            .compression
            .compress(&mut std::io::Cursor::new(data_tar))?;
        self.append_member(
            &mut ar_builder,
            format!("data.tar{}", self.compression.extension()),
            &data_tar,
        )?;

        Ok(())
    }
}

fn new_tar_header(mtime: u64) -> Result<tar::Header> {
    let mut header = tar::Header::new_gnu();
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    header.set_mtime(mtime);

    Ok(header)
}

/// Store a `./` prefixed name in the header.
///
/// `Header::set_path()` normalizes away a leading `./`, which archives in the wild
/// carry. So the raw name field is written directly.
fn set_dot_path(header: &mut tar::Header, path: &Path, is_directory: bool) -> Result<()> {
    let value = format!(
        "./{}{}",
        path.display(),
        if is_directory { "/" } else { "" }
    );
    let value = value.as_bytes();

    let name = &mut header.as_old_mut().name;
    if value.len() > name.len() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path too long for tar header: {}", path.display()),
        )
        .into());
    }

    name[..value.len()].copy_from_slice(value);

    Ok(())
}

/// Write a tar archive suitable for inclusion in a `.deb` archive.
pub fn write_deb_tar<W: Write>(writer: W, files: &TarFiles, mtime: u64) -> Result<()> {
    let mut builder = tar::Builder::new(writer);

    let mut header = new_tar_header(mtime)?;
    header.set_path(Path::new("./"))?;
    header.set_mode(0o755);
    header.set_size(0);
    header.set_cksum();
    builder.append(&header, std::io::empty())?;

    let directories = files
        .keys()
        .flat_map(|path| path.ancestors().skip(1))
        .filter(|p| !p.as_os_str().is_empty())
        .collect::<BTreeSet<_>>();

    for directory in directories {
        let mut header = new_tar_header(mtime)?;
        set_dot_path(&mut header, directory, true)?;
        header.set_mode(0o755);
        header.set_size(0);
        header.set_entry_type(tar::EntryType::Directory);
        header.set_cksum();
        builder.append(&header, std::io::empty())?;
    }

    // BTreeMap iteration is sorted, so archive content is deterministic.
    for (path, (data, executable)) in files {
        let mut header = new_tar_header(mtime)?;
        set_dot_path(&mut header, path, false)?;
        header.set_mode(if *executable { 0o755 } else { 0o644 });
        header.set_size(data.len() as _);
        header.set_cksum();
        builder.append(&header, data.as_slice())?;
    }

    builder.finish()?;

    Ok(())
}
