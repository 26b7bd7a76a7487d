// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Maintain Debian `Packages` indices for `.deb` files held in an object store.

A Debian repository served straight out of an object store (like an S3 bucket)
needs a `Packages` index next to its `.deb` files describing every package. This
crate keeps those indices in sync with the package files as they come and go.

The canonical home of this crate is <https://github.com/indygreg/PyOxidizer>. Please file issues
and pull requests there.

# A Tour of Functionality

Object stores are abstracted by the [store::ObjectStore] trait. Implementations
exist for S3 (behind the `s3` feature), local directories, and process memory.
[store::store_from_str()] resolves a store from a URL.

Reading a `.deb` file is handled by the [deb::reader] module, which locates the
`control` file inside the nested `control.tar` archive. [control::ControlStanza]
normalizes its text by dropping fields without a value. [io::digest_path()]
computes the MD5, SHA-1, and SHA-256 of a file in one pass, and
[record::PackageRecord] combines all of the above into the text of an index entry.

Building records requires downloading whole packages, so records are cached in
the store by package content fingerprint via [cache::ControlDataCache].
[index::PackagesIndexBuilder] rebuilds the index of a *namespace* (a key prefix)
when its set of packages changed. In versioned buckets,
[reconcile::VersionReconciler] prunes overwritten package keys back to their
first version.

Finally, [event::EventRouter] ties everything together by dispatching JSON
invocation events (explicit rebuild requests and S3 event notifications) to the
components above. All behavior is tunable via [config::RepositoryConfig].

# Crate Features

The optional and enabled-by-default `s3` feature provides an S3 backed object store
via the `rusoto_s3` crate.
*/

pub mod cache;
pub mod config;
pub mod control;
pub mod deb;
pub mod error;
pub mod event;
pub mod index;
pub mod io;
pub mod reconcile;
pub mod record;
pub mod store;

#[cfg(test)]
mod testutil;
