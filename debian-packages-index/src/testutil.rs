// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        deb::{builder::DebBuilder, DebCompression},
        error::Result,
    },
    std::time::SystemTime,
};

/// Produce the bytes of a small, reproducible `.deb` file.
pub fn deb_bytes(package: &str, version: &str) -> Result<Vec<u8>> {
    let control = format!(
        "Package: {}\nVersion: {}\nArchitecture: amd64\nHomepage:\n\
         Description: test package\n A longer description.\n .\n Homepage: not a field\n",
        package, version
    );

    let mut data = vec![];
    DebBuilder::new(control)
        .set_compression(DebCompression::Zstandard(3))
        .set_mtime(Some(SystemTime::UNIX_EPOCH))
        .install_file(
            format!("usr/share/doc/{}/README", package),
            format!("{} {}\n", package, version).into_bytes(),
            false,
        )?
        .write(&mut data)?;

    Ok(data)
}
