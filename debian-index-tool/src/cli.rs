// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_packages_index::{
        cache::{build_record_from_path, ControlDataCache},
        config::{RepositoryConfig, ENV_BUCKET_NAME},
        error::IndexError,
        event::{EventOutcome, EventRouter, InvocationEvent},
        index::PackagesIndexBuilder,
        reconcile::VersionReconciler,
        store::ObjectStore,
    },
    log::LevelFilter,
    std::io::Read,
    thiserror::Error,
};

const URLS_ABOUT: &str = "\
Repository URLs

Various commands accept a URL describing the location of the repository. Here
is how they work.

If a value contains `://`, it will be parsed as a URL. Otherwise it will be
interpreted as a local filesystem path.

The following URL schemes (the part before the `://` in a URL) are recognized:

file://
   A local filesystem path. The path component of the URL is interpreted as
   a filesystem path.

   Object metadata (such as index fingerprints) is stored as JSON files under
   a `.metadata` directory at the root. Directories have no object versioning,
   so version reconciliation never deletes anything.

memory://
   An empty repository held in process memory. Contents are lost when the
   process exits. Only useful for testing.

s3://
   An S3 bucket.

   URLs of the form `s3://bucket` anchor the repository at the root of the S3
   bucket. Namespaces (key prefixes holding packages) are given to individual
   commands.

   The AWS client will be resolved using configuration files and environment
   variables as is typical for AWS clients. For example, it looks in
   `~/.aws/config` and in `AWS_*` environment variables.

If no repository is given via `--config` or `--repository-url`, the
`APT_REPO_BUCKET_NAME` environment variable names an S3 bucket to use.
";

const CONFIG_ABOUT: &str = "\
# YAML Configuration

A YAML file passed via `--config` configures the repository. It can have the
following keys:

repository_url (required) (string)
   The URL or path of the repository. See `dit urls`.

region (optional) (string)
   AWS region of an S3 repository.

control_data_cache_prefix (optional) (string)
   Key prefix of cached package records. Defaults to `control-data-cache`.

index_file_name (optional) (string)
   File name of the index in each namespace. Defaults to `Packages`.

package_extension (optional) (string)
   Suffix of package files. Defaults to `.deb`.

fingerprint_metadata_key (optional) (string)
   Index metadata holding the package set fingerprint. Defaults to
   `packages-hash`.

fingerprint_mode (optional) (string)
   `filenames` (the default) or `filenames-and-content`.

isolate_package_failures (optional) (bool)
   Whether malformed packages are left out of the index rather than failing
   the rebuild. Defaults to true.

reconcile_versions (optional) (bool)
   Whether package notifications prune package keys to their first version.
   Defaults to true.

max_parallel_io (optional) (integer)
   Maximum number of package records resolved concurrently. Defaults to 4.

The `APT_REPO_BUCKET_NAME` and `CONTROL_DATA_CACHE_PREFIX` environment
variables override `repository_url` and `control_data_cache_prefix`.
Command line arguments override everything else.
";

const HANDLE_EVENT_ABOUT: &str = "\
Handle an invocation event.

The event is a JSON document. It is either an explicit request of the form

   {\"action\": \"rebuild_package_index\", \"prefix\": \"dists/stable\"}

or an S3 event notification with a `Records` array. Each record is handled
in order:

* A change to an index file rebuilds the index of its namespace.
* A new package file gets its package record cached.
* A change to a package file prunes extra versions of the key. If nothing was
  pruned, the index of the package's namespace is rebuilt.
";

const REBUILD_INDEX_ABOUT: &str = "\
Rebuild the Packages index of a namespace.

Every key under `<prefix>/` ending in the package extension is a package file
of the namespace. The index is written to `<prefix>/Packages`. The root of the
repository is not a namespace, so packages outside of any prefix are never
indexed.

The index carries a fingerprint of the package file names it was built from.
If the current package files have the same fingerprint, nothing is written.
Package records come from a cache keyed by package content, so only packages
new to the repository are downloaded.
";

#[derive(Debug, Error)]
pub enum DitError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0:?}")]
    Index(#[from] IndexError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0:?}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("no repository defined; use --config, --repository-url, or {0}")]
    NoRepository(&'static str),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, DitError>;

fn command() -> Command<'static> {
    let app = Command::new("Debian Index Tool")
        .version("0.1")
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Keep Debian Packages indices in sync with an object store")
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .global(true)
                .allow_invalid_utf8(true)
                .help("Path to a YAML file defining the repository configuration")
                .long_help(CONFIG_ABOUT),
        )
        .arg(
            Arg::new("repository-url")
                .long("repository-url")
                .takes_value(true)
                .global(true)
                .help("URL or path of the repository"),
        )
        .arg(
            Arg::new("max-parallel-io")
                .long("max-parallel-io")
                .takes_value(true)
                .global(true)
                .help("Maximum number of parallel I/O operations to perform"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("handle-event")
            .about("Handle a JSON invocation event")
            .long_about(HANDLE_EVENT_ABOUT)
            .arg(
                Arg::new("event")
                    .long("event")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Path to a file holding the event, or - for stdin"),
            ),
    );

    let app = app.subcommand(
        Command::new("rebuild-index")
            .about("Rebuild the Packages index of a namespace if its packages changed")
            .long_about(REBUILD_INDEX_ABOUT)
            .arg(
                Arg::new("prefix")
                    .long("prefix")
                    .takes_value(true)
                    .required(true)
                    .help("Namespace (key prefix) holding package files"),
            ),
    );

    let app = app.subcommand(
        Command::new("reconcile-versions")
            .about("Prune a package key to its first version")
            .arg(
                Arg::new("key")
                    .long("key")
                    .takes_value(true)
                    .required(true)
                    .help("Key of the package file"),
            ),
    );

    let app = app.subcommand(
        Command::new("warm-cache")
            .about("Ensure the cached package record of a package file exists")
            .arg(
                Arg::new("key")
                    .long("key")
                    .takes_value(true)
                    .required(true)
                    .help("Key of the package file"),
            ),
    );

    let app = app.subcommand(
        Command::new("package-record")
            .about("Print the package record of a local .deb file")
            .arg(
                Arg::new("path")
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Path of the .deb file"),
            ),
    );

    app.subcommand(Command::new("urls").about("Print documentation about repository URLs"))
}

pub async fn run_cli() -> Result<()> {
    let mut app = command();
    let matches = app.clone().get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("handle-event", args)) => command_handle_event(args).await,
        Some(("rebuild-index", args)) => command_rebuild_index(args).await,
        Some(("reconcile-versions", args)) => command_reconcile_versions(args).await,
        Some(("warm-cache", args)) => command_warm_cache(args).await,
        Some(("package-record", args)) => command_package_record(args),
        Some(("urls", _)) => {
            println!("{}", URLS_ABOUT);
            Ok(())
        }
        Some((command, _)) => Err(DitError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

/// Resolve the repository configuration from a file, the environment, and arguments.
fn resolve_config(args: &ArgMatches) -> Result<RepositoryConfig> {
    let mut config = if let Some(path) = args.value_of_os("config") {
        RepositoryConfig::from_yaml_path(path)?
    } else {
        RepositoryConfig::new("")
    };

    config.apply_process_env();

    if let Some(url) = args.value_of("repository-url") {
        config.repository_url = url.to_string();
    }

    if args.is_present("max-parallel-io") {
        config.max_parallel_io = args.value_of_t::<usize>("max-parallel-io")?;
    }

    if config.repository_url.is_empty() {
        return Err(DitError::NoRepository(ENV_BUCKET_NAME));
    }

    Ok(config)
}

fn open_repository(args: &ArgMatches) -> Result<(RepositoryConfig, Box<dyn ObjectStore>)> {
    let config = resolve_config(args)?;
    let store = config.object_store()?;

    Ok((config, store))
}

fn print_outcomes(outcomes: &[EventOutcome]) {
    for outcome in outcomes {
        println!("{}", outcome);
    }
}

async fn command_handle_event(args: &ArgMatches) -> Result<()> {
    let (config, store) = open_repository(args)?;

    let path = args
        .value_of_os("event")
        .expect("event argument is required");

    let data = if path == std::ffi::OsStr::new("-") {
        let mut data = vec![];
        std::io::stdin().read_to_end(&mut data)?;
        data
    } else {
        std::fs::read(path)?
    };

    let event: InvocationEvent = serde_json::from_slice(&data)?;

    let outcomes = EventRouter::new(store.as_ref(), &config)
        .handle_event(&event)
        .await?;
    print_outcomes(&outcomes);

    Ok(())
}

async fn command_rebuild_index(args: &ArgMatches) -> Result<()> {
    let (config, store) = open_repository(args)?;

    let prefix = args.value_of("prefix").expect("prefix argument is required");

    let outcome = PackagesIndexBuilder::new(store.as_ref(), &config)
        .rebuild(prefix)
        .await?;
    println!("{}", outcome);

    Ok(())
}

async fn command_reconcile_versions(args: &ArgMatches) -> Result<()> {
    let (_, store) = open_repository(args)?;

    let key = args.value_of("key").expect("key argument is required");

    if VersionReconciler::new(store.as_ref()).reconcile(key).await? {
        println!("deleted surplus versions of {}", key);
    } else {
        println!("nothing to reconcile for {}", key);
    }

    Ok(())
}

async fn command_warm_cache(args: &ArgMatches) -> Result<()> {
    let (config, store) = open_repository(args)?;

    let key = args.value_of("key").expect("key argument is required");

    let cache = ControlDataCache::from_config(store.as_ref(), &config);
    match cache.get_or_build_key(key).await? {
        Some(record) => println!("{}", record),
        None => return Err(IndexError::StoreNotFound(key.to_string()).into()),
    }

    Ok(())
}

fn command_package_record(args: &ArgMatches) -> Result<()> {
    let path = args.value_of_os("path").expect("path argument is required");

    println!("{}", build_record_from_path(path)?);

    Ok(())
}
