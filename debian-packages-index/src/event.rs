// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Routing of invocation events.

An invocation is driven by a single JSON event. Two shapes are understood:

* An explicit request: `{"action": "rebuild_package_index", "prefix": "dists/stable"}`.
* An S3 event notification, carrying one or more `Records`, each naming an event
  type, a bucket, and an object key.

Notifications are routed by key:

* A change to an index file rebuilds the index of its namespace.
* Creation of a package file pre-warms the [ControlDataCache] for it.
* Any change to a package file first reconciles versions of the key. If that
  deleted nothing, the index of the package's namespace is rebuilt.

Everything else is ignored.
*/

use {
    crate::{
        cache::ControlDataCache,
        config::RepositoryConfig,
        error::{IndexError, Result},
        index::{PackagesIndexBuilder, RebuildOutcome},
        reconcile::VersionReconciler,
        store::{key_namespace, ObjectStore},
    },
    log::{info, warn},
    serde::Deserialize,
};

/// Value of `action` requesting an index rebuild.
pub const ACTION_REBUILD_PACKAGE_INDEX: &str = "rebuild_package_index";

/// Prefix of notification event names signaling a new object.
pub const EVENT_OBJECT_CREATED_PREFIX: &str = "ObjectCreated";

/// The JSON document an invocation receives.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InvocationEvent {
    pub action: Option<String>,
    pub prefix: Option<String>,
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NotificationRecord {
    #[serde(rename = "eventName")]
    pub event_name: String,
    pub s3: NotificationEntity,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NotificationEntity {
    pub bucket: NotificationBucket,
    pub object: NotificationObject,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NotificationBucket {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NotificationObject {
    /// Key as sent in notifications: URL encoded, with `+` for spaces.
    pub key: String,
}

/// Decode an object key as it appears in a notification.
pub fn decode_notification_key(raw: &str) -> Result<String> {
    let plus_decoded = raw.replace('+', " ");

    percent_encoding::percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|e| IndexError::EventMalformed(format!("object key {}: {}", raw, e)))
}

/// A classified unit of work from an event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Trigger {
    /// An explicit request to rebuild the index of a namespace.
    RebuildRequest { namespace: String },

    /// A storage notification about an object.
    Notification {
        bucket: String,
        key: String,
        event_name: String,
    },

    /// Anything else.
    Unrecognized { description: String },
}

impl InvocationEvent {
    /// Parse an event from JSON.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Classify this event into triggers, in the order they should be handled.
    pub fn triggers(&self) -> Result<Vec<Trigger>> {
        match self.action.as_deref() {
            Some(ACTION_REBUILD_PACKAGE_INDEX) => {
                let prefix = self.prefix.as_deref().ok_or_else(|| {
                    IndexError::EventMalformed(format!(
                        "{} requires a prefix",
                        ACTION_REBUILD_PACKAGE_INDEX
                    ))
                })?;

                Ok(vec![Trigger::RebuildRequest {
                    namespace: prefix.trim_matches('/').to_string(),
                }])
            }
            Some(action) => Ok(vec![Trigger::Unrecognized {
                description: format!("unknown action {}", action),
            }]),
            None if self.records.is_empty() => Ok(vec![Trigger::Unrecognized {
                description: "event has neither action nor records".into(),
            }]),
            None => self
                .records
                .iter()
                .map(|record| -> Result<Trigger> {
                    Ok(Trigger::Notification {
                        bucket: record.s3.bucket.name.clone(),
                        key: decode_notification_key(&record.s3.object.key)?,
                        event_name: record.event_name.clone(),
                    })
                })
                .collect(),
        }
    }
}

/// What handling an event did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EventOutcome {
    /// The index of a namespace was rebuilt (or found up to date).
    Rebuilt {
        namespace: String,
        outcome: RebuildOutcome,
    },

    /// The cached record of a package exists.
    CacheWarmed { key: String },

    /// The record of a package could not be built.
    CacheWarmFailed { key: String, error: String },

    /// Surplus versions of a package key were deleted.
    Reconciled { key: String },

    /// Nothing was done.
    Ignored { reason: String },
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rebuilt { namespace, outcome } => write!(f, "{:?}: {}", namespace, outcome),
            Self::CacheWarmed { key } => write!(f, "cached record of {} exists", key),
            Self::CacheWarmFailed { key, error } => {
                write!(f, "unable to build record of {}: {}", key, error)
            }
            Self::Reconciled { key } => write!(f, "deleted surplus versions of {}", key),
            Self::Ignored { reason } => write!(f, "ignored: {}", reason),
        }
    }
}

/// Dispatches invocation events to the components maintaining a repository.
pub struct EventRouter<'a> {
    store: &'a dyn ObjectStore,
    config: &'a RepositoryConfig,
}

impl<'a> EventRouter<'a> {
    pub fn new(store: &'a dyn ObjectStore, config: &'a RepositoryConfig) -> Self {
        Self { store, config }
    }

    /// Handle an event given as JSON.
    pub async fn handle_json(&self, data: &[u8]) -> Result<Vec<EventOutcome>> {
        self.handle_event(&InvocationEvent::from_json(data)?).await
    }

    /// Handle every trigger of an event, in order.
    ///
    /// Stops at the first fatal error.
    pub async fn handle_event(&self, event: &InvocationEvent) -> Result<Vec<EventOutcome>> {
        let mut outcomes = vec![];

        for trigger in event.triggers()? {
            outcomes.extend(self.handle_trigger(&trigger).await?);
        }

        Ok(outcomes)
    }

    pub async fn handle_trigger(&self, trigger: &Trigger) -> Result<Vec<EventOutcome>> {
        match trigger {
            Trigger::RebuildRequest { namespace } => Ok(vec![self.rebuild(namespace).await?]),
            Trigger::Notification {
                bucket,
                key,
                event_name,
            } => self.handle_notification(bucket, key, event_name).await,
            Trigger::Unrecognized { description } => {
                warn!("ignoring event: {}", description);
                Ok(vec![EventOutcome::Ignored {
                    reason: description.clone(),
                }])
            }
        }
    }

    async fn handle_notification(
        &self,
        bucket: &str,
        key: &str,
        event_name: &str,
    ) -> Result<Vec<EventOutcome>> {
        info!("{} notification for {}/{}", event_name, bucket, key);

        if bucket != self.store.bucket() {
            return Ok(vec![ignored(format!(
                "bucket {} is not the repository bucket",
                bucket
            ))]);
        }

        // Rebuilding after index changes repairs manual edits.
        if self.config.is_index_key(key) {
            return Ok(vec![self.rebuild(key_namespace(key)).await?]);
        }

        if !self.config.is_package_key(key) {
            return Ok(vec![ignored(format!("{} is not a package file", key))]);
        }

        let mut outcomes = vec![];

        if event_name.starts_with(EVENT_OBJECT_CREATED_PREFIX) {
            outcomes.push(self.warm_cache(key).await?);
        }

        let reconciled = self.config.reconcile_versions
            && VersionReconciler::new(self.store).reconcile(key).await?;

        if reconciled {
            outcomes.push(EventOutcome::Reconciled {
                key: key.to_string(),
            });
        } else {
            outcomes.push(self.rebuild(key_namespace(key)).await?);
        }

        Ok(outcomes)
    }

    /// Ensure the cached record of a package exists.
    ///
    /// Malformed packages are reported in the outcome rather than as an error.
    pub async fn warm_cache(&self, key: &str) -> Result<EventOutcome> {
        info!("ensuring cached control data exists for {}", key);

        match ControlDataCache::from_config(self.store, self.config)
            .get_or_build_key(key)
            .await
        {
            Ok(Some(_)) => Ok(EventOutcome::CacheWarmed {
                key: key.to_string(),
            }),
            Ok(None) => Ok(ignored(format!("{} no longer exists", key))),
            Err(e) if e.is_malformed_package() => {
                warn!("unable to build package record of {}: {}", key, e);
                Ok(EventOutcome::CacheWarmFailed {
                    key: key.to_string(),
                    error: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn rebuild(&self, namespace: &str) -> Result<EventOutcome> {
        let outcome = PackagesIndexBuilder::new(self.store, self.config)
            .rebuild(namespace)
            .await?;

        Ok(EventOutcome::Rebuilt {
            namespace: namespace.trim_matches('/').to_string(),
            outcome,
        })
    }
}

fn ignored(reason: String) -> EventOutcome {
    info!("ignoring notification: {}", reason);
    EventOutcome::Ignored { reason }
}
