//! [`ObjectClient`] over the AWS SDK.
//!
//! SDK-level retries are disabled; [`RetryPolicy`](crate::RetryPolicy) owns
//! retrying so every backend sees the same behavior.

use super::client::{
    BatchDeleteError, CopyRequest, ListPage, ListRequest, ObjectClient, ObjectHead, ObjectSummary,
    ObjectWrite, WriteOutput,
};
use crate::traits::{ByteStream, StorageError, StorageResult};
use crate::types::Visibility;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, MetadataDirective, ObjectCannedAcl,
    ObjectIdentifier, Permission, StorageClass,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::Duration;
use tokio_util::io::ReaderStream;

const ALL_USERS_GROUP: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

/// S3 client bound to one bucket
#[derive(Clone, Debug)]
pub struct AwsObjectClient {
    client: Client,
    bucket: String,
}

impl AwsObjectClient {
    /// Build a client for `bucket`.
    ///
    /// # Arguments
    /// * `region` - Signing region
    /// * `endpoint` - Custom endpoint for S3-compatible providers; switches to
    ///   path-style addressing
    /// * `credentials` - Explicit key pair; the default provider chain is used when absent
    pub async fn connect(
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        credentials: Option<(&str, &str)>,
    ) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .retry_config(RetryConfig::disabled());

        if let Some((access_key_id, secret_access_key)) = credentials {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "stowage-static",
            ));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        AwsObjectClient {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Map an SDK failure onto the crate's transient/permanent error split.
fn classify<E>(err: SdkError<E, HttpResponse>, key: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = DisplayErrorContext(&err).to_string();

    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Network(message)
        }
        SdkError::ServiceError(service) => {
            let code = service.err().code();
            match (status, code) {
                (_, Some("NoSuchKey" | "NotFound" | "NoSuchUpload")) | (Some(404), _) => {
                    StorageError::NotFound(key.to_string())
                }
                (Some(401 | 403), _) => StorageError::Auth(message),
                (Some(status), _) => StorageError::Http { status, message },
                (None, _) => StorageError::BackendError(message),
            }
        }
        _ => StorageError::BackendError(message),
    }
}

fn to_chrono(value: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<DateTime<Utc>> {
    value.and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
}

fn canned_acl(visibility: Visibility) -> ObjectCannedAcl {
    match visibility {
        Visibility::Public => ObjectCannedAcl::PublicRead,
        Visibility::Private => ObjectCannedAcl::Private,
    }
}

#[async_trait]
impl ObjectClient for AwsObjectClient {
    async fn put_object(&self, write: &ObjectWrite, body: Bytes) -> StorageResult<WriteOutput> {
        let metadata = (!write.metadata.is_empty()).then(|| write.metadata.clone());
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&write.key)
            .body(AwsByteStream::from(body))
            .content_type(&write.content_type)
            .set_cache_control(write.cache_control.clone())
            .set_content_disposition(write.content_disposition.clone())
            .set_metadata(metadata)
            .set_acl(write.visibility.map(canned_acl))
            .set_storage_class(write.storage_class.as_deref().map(StorageClass::from))
            .send()
            .await
            .map_err(|e| classify(e, &write.key))?;

        Ok(WriteOutput {
            etag: output.e_tag().map(String::from),
            version_id: output.version_id().map(String::from),
        })
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Network(format!("Failed to read body of {}: {}", key, e)))?;

        Ok(data.into_bytes())
    }

    async fn get_object_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        let stream = ReaderStream::new(response.body.into_async_read())
            .map(|result| result.map_err(|e| StorageError::DownloadFailed(e.to_string())));

        Ok(Box::pin(stream))
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectHead> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        Ok(ObjectHead {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            content_type: output.content_type().map(String::from),
            etag: output.e_tag().map(String::from),
            version_id: output.version_id().map(String::from),
            last_modified: to_chrono(output.last_modified()),
            storage_class: output.storage_class().map(|c| c.as_str().to_string()),
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> StorageResult<Vec<BatchDeleteError>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let identifiers = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| classify(e, &keys[0]))?;

        Ok(output
            .errors()
            .iter()
            .map(|e| BatchDeleteError {
                key: e.key().unwrap_or_default().to_string(),
                message: e
                    .message()
                    .or(e.code())
                    .unwrap_or("Unknown error")
                    .to_string(),
            })
            .collect())
    }

    async fn copy_object(&self, request: &CopyRequest) -> StorageResult<WriteOutput> {
        // URL-encode the copy source per AWS S3 API requirements
        let copy_source = format!("{}/{}", self.bucket, urlencoding::encode(&request.source));

        let builder = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source)
            .key(&request.destination);
        let builder = match &request.replace {
            Some(write) => builder
                .metadata_directive(MetadataDirective::Replace)
                .content_type(&write.content_type)
                .set_cache_control(write.cache_control.clone())
                .set_content_disposition(write.content_disposition.clone())
                .set_metadata((!write.metadata.is_empty()).then(|| write.metadata.clone()))
                .set_acl(write.visibility.map(canned_acl))
                .set_storage_class(
                    request
                        .storage_class
                        .as_deref()
                        .or(write.storage_class.as_deref())
                        .map(StorageClass::from),
                ),
            None => builder
                .metadata_directive(MetadataDirective::Copy)
                .set_storage_class(request.storage_class.as_deref().map(StorageClass::from)),
        };

        let output = builder
            .send()
            .await
            .map_err(|e| classify(e, &request.source))?;

        Ok(WriteOutput {
            etag: output
                .copy_object_result()
                .and_then(|r| r.e_tag())
                .map(String::from),
            version_id: output.version_id().map(String::from),
        })
    }

    async fn list_objects(&self, request: &ListRequest) -> StorageResult<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter.clone())
            .set_continuation_token(request.continuation_token.clone())
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(|e| classify(e, &request.prefix))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectSummary {
                    key: object.key()?.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: to_chrono(object.last_modified()),
                    etag: object.e_tag().map(String::from),
                    storage_class: object.storage_class().map(|c| c.as_str().to_string()),
                })
            })
            .collect();

        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(String::from))
            .collect();

        Ok(ListPage {
            objects,
            common_prefixes,
            next_token: output.next_continuation_token().map(String::from),
        })
    }

    async fn create_multipart_upload(&self, write: &ObjectWrite) -> StorageResult<String> {
        let metadata = (!write.metadata.is_empty()).then(|| write.metadata.clone());
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&write.key)
            .content_type(&write.content_type)
            .set_cache_control(write.cache_control.clone())
            .set_content_disposition(write.content_disposition.clone())
            .set_metadata(metadata)
            .set_acl(write.visibility.map(canned_acl))
            .set_storage_class(write.storage_class.as_deref().map(StorageClass::from))
            .send()
            .await
            .map_err(|e| classify(e, &write.key))?;

        output.upload_id().map(String::from).ok_or_else(|| {
            StorageError::UploadFailed("No upload ID returned from S3".to_string())
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<String> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(AwsByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        output.e_tag().map(String::from).ok_or_else(|| {
            StorageError::UploadFailed(format!("No ETag returned for part {}", part_number))
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[(i32, String)],
    ) -> StorageResult<WriteOutput> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|(number, etag)| {
                        CompletedPart::builder()
                            .part_number(*number)
                            .e_tag(etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        Ok(WriteOutput {
            etag: output.e_tag().map(String::from),
            version_id: output.version_id().map(String::from),
        })
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| classify(e, key))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| classify(e, key))?;

        Ok(presigned.uri().to_string())
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(String::from))
            .presigned(presigning_config)
            .await
            .map_err(|e| classify(e, key))?;

        Ok(presigned.uri().to_string())
    }

    async fn get_visibility(&self, key: &str) -> StorageResult<Visibility> {
        let output = self
            .client
            .get_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        let public = output.grants().iter().any(|grant| {
            let everyone = grant
                .grantee()
                .and_then(|g| g.uri())
                .map(|uri| uri == ALL_USERS_GROUP)
                .unwrap_or(false);
            let readable = matches!(
                grant.permission(),
                Some(Permission::Read) | Some(Permission::FullControl)
            );
            everyone && readable
        });

        Ok(if public {
            Visibility::Public
        } else {
            Visibility::Private
        })
    }

    async fn set_visibility(&self, key: &str, visibility: Visibility) -> StorageResult<()> {
        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .acl(canned_acl(visibility))
            .send()
            .await
            .map_err(|e| classify(e, key))?;
        Ok(())
    }
}
