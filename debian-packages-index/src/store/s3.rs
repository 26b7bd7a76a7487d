// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Object stores backed by S3. */

use {
    crate::{
        error::{IndexError, Result},
        store::{ObjectEntry, ObjectHead, ObjectStore, ObjectVersion},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    futures::{AsyncRead, TryStreamExt},
    log::debug,
    rusoto_core::{ByteStream, Client, Region, RusotoError},
    rusoto_s3::{
        Delete, DeleteObjectsRequest, GetObjectError, GetObjectRequest, HeadObjectError,
        HeadObjectRequest, ListObjectVersionsRequest, ListObjectsV2Request, ObjectIdentifier,
        PutObjectRequest, S3Client, S3,
    },
    std::{collections::HashMap, pin::Pin},
};

/// Maximum number of keys S3 accepts in a single `DeleteObjects` request.
const DELETE_BATCH_SIZE: usize = 1000;

fn s3_error<E: std::fmt::Debug>(key: &str, e: E) -> IndexError {
    IndexError::Store(key.to_string(), format!("S3 error: {:?}", e))
}

fn is_not_found_status<E>(e: &RusotoError<E>) -> bool {
    matches!(e, RusotoError::Unknown(response) if response.status.as_u16() == 404)
}

fn parse_timestamp(value: Option<String>) -> Result<DateTime<Utc>> {
    let value = value.ok_or_else(|| IndexError::StoreTimestamp("missing".into()))?;

    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| IndexError::StoreTimestamp(format!("{}: {}", value, e)))
}

/// Entity tags come back quoted.
fn trim_etag(etag: String) -> String {
    etag.trim_matches('"').to_string()
}

/// An [ObjectStore] bound to an S3 bucket.
///
/// Fingerprints are S3 entity tags.
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new store bound to a named bucket.
    ///
    /// This will construct a default AWS [Client].
    pub fn new(region: Region, bucket: impl ToString) -> Self {
        Self {
            client: S3Client::new(region),
            bucket: bucket.to_string(),
        }
    }

    /// Create a new store bound to a named bucket with an AWS [Client].
    ///
    /// This is like [Self::new()] except the caller can pass in the AWS [Client] to use.
    pub fn new_with_client(client: Client, region: Region, bucket: impl ToString) -> Self {
        Self {
            client: S3Client::new_with_client(client, region),
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, key: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let req = GetObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        };

        match self.client.get_object(req).await {
            Ok(output) => {
                let body = output
                    .body
                    .ok_or_else(|| IndexError::Store(key.to_string(), "no body".into()))?;

                // ByteStream's inherent into_async_read() yields a tokio reader.
                Ok(Box::pin(TryStreamExt::into_async_read(body)))
            }
            Err(RusotoError::Service(GetObjectError::NoSuchKey(_))) => {
                Err(IndexError::StoreNotFound(key.to_string()))
            }
            Err(e) if is_not_found_status(&e) => Err(IndexError::StoreNotFound(key.to_string())),
            Err(e) => Err(s3_error(key, e)),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>> {
        let req = HeadObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            ..Default::default()
        };

        match self.client.head_object(req).await {
            Ok(output) => Ok(Some(ObjectHead {
                fingerprint: output.e_tag.map(trim_etag),
                metadata: output.metadata.unwrap_or_default(),
            })),
            Err(RusotoError::Service(HeadObjectError::NoSuchKey(_))) => Ok(None),
            Err(e) if is_not_found_status(&e) => Ok(None),
            Err(e) => Err(s3_error(key, e)),
        }
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let content_length = body.len() as i64;
        let stream = futures::stream::once(async { Ok(bytes::Bytes::from(body)) });

        let req = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            body: Some(ByteStream::new(stream)),
            content_length: Some(content_length),
            metadata: if metadata.is_empty() {
                None
            } else {
                Some(metadata)
            },
            ..Default::default()
        };

        self.client
            .put_object(req)
            .await
            .map_err(|e| s3_error(key, e))?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let mut entries = vec![];
        let mut continuation_token = None;

        loop {
            let req = ListObjectsV2Request {
                bucket: self.bucket.clone(),
                prefix: Some(prefix.to_string()),
                continuation_token: continuation_token.take(),
                ..Default::default()
            };

            let output = self
                .client
                .list_objects_v2(req)
                .await
                .map_err(|e| s3_error(prefix, e))?;

            for object in output.contents.unwrap_or_default() {
                if let (Some(key), Some(etag)) = (object.key, object.e_tag) {
                    entries.push(ObjectEntry {
                        key,
                        fingerprint: trim_etag(etag),
                        size: object.size.unwrap_or(0) as u64,
                    });
                }
            }

            match (output.is_truncated, output.next_continuation_token) {
                (Some(true), Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        debug!("listed {} objects under {}", entries.len(), prefix);

        Ok(entries)
    }

    async fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>> {
        let mut versions = vec![];
        let mut key_marker = None;
        let mut version_id_marker = None;

        loop {
            let req = ListObjectVersionsRequest {
                bucket: self.bucket.clone(),
                prefix: Some(key.to_string()),
                key_marker: key_marker.take(),
                version_id_marker: version_id_marker.take(),
                ..Default::default()
            };

            let output = self
                .client
                .list_object_versions(req)
                .await
                .map_err(|e| s3_error(key, e))?;

            // The prefix also matches longer keys. Only the exact key is wanted.
            for version in output.versions.unwrap_or_default() {
                if version.key.as_deref() == Some(key) {
                    if let Some(version_id) = version.version_id {
                        versions.push(ObjectVersion {
                            version_id,
                            last_modified: parse_timestamp(version.last_modified)?,
                            is_delete_marker: false,
                        });
                    }
                }
            }

            for marker in output.delete_markers.unwrap_or_default() {
                if marker.key.as_deref() == Some(key) {
                    if let Some(version_id) = marker.version_id {
                        versions.push(ObjectVersion {
                            version_id,
                            last_modified: parse_timestamp(marker.last_modified)?,
                            is_delete_marker: true,
                        });
                    }
                }
            }

            if output.is_truncated == Some(true) {
                key_marker = output.next_key_marker;
                version_id_marker = output.next_version_id_marker;

                if key_marker.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(versions)
    }

    async fn delete_versions(&self, key: &str, version_ids: &[String]) -> Result<()> {
        for chunk in version_ids.chunks(DELETE_BATCH_SIZE) {
            let req = DeleteObjectsRequest {
                bucket: self.bucket.clone(),
                delete: Delete {
                    objects: chunk
                        .iter()
                        .map(|version_id| ObjectIdentifier {
                            key: key.to_string(),
                            version_id: Some(version_id.clone()),
                        })
                        .collect(),
                    quiet: Some(true),
                },
                ..Default::default()
            };

            let output = self
                .client
                .delete_objects(req)
                .await
                .map_err(|e| s3_error(key, e))?;

            if let Some(errors) = output.errors {
                if !errors.is_empty() {
                    return Err(s3_error(key, errors));
                }
            }
        }

        Ok(())
    }
}
