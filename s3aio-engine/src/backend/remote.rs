//! S3 backend.
//!
//! The AWS SDK is async; this backend owns a private Tokio runtime and
//! blocks on it, so its methods can be called from worker-pool threads.
//! Do not call it from inside another Tokio runtime.

use std::future::Future;
use std::sync::Arc;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use s3aio_core::*;
use crate::backend::{Backend, Session};

/// Most keys a single DeleteObjects request accepts
const DELETE_BATCH: usize = 1000;

/// Most keys a single ListObjectsV2 page returns
const LIST_PAGE: usize = 1000;

#[derive(Clone)]
pub struct RemoteBackend {
    runtime: Arc<Runtime>,
    sdk_config: SdkConfig,
    force_path_style: bool,
    client: Client,
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("region", &self.sdk_config.region())
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

impl RemoteBackend {
    /// Load the default AWS configuration (credentials chain included)
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let runtime = build_runtime()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = runtime.block_on(loader.load());

        info!(
            "Remote backend ready (region: {:?}, endpoint: {:?})",
            sdk_config.region(),
            config.endpoint_url
        );
        Ok(Self::with_runtime(Arc::new(runtime), sdk_config, config.force_path_style))
    }

    /// Use an already assembled SDK configuration
    pub fn from_sdk_config(sdk_config: SdkConfig, force_path_style: bool) -> Result<Self> {
        let runtime = build_runtime()?;
        Ok(Self::with_runtime(Arc::new(runtime), sdk_config, force_path_style))
    }

    fn with_runtime(runtime: Arc<Runtime>, sdk_config: SdkConfig, force_path_style: bool) -> Self {
        let client = build_client(&sdk_config, force_path_style);
        RemoteBackend {
            runtime,
            sdk_config,
            force_path_style,
            client,
        }
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn head_object_length(&self, location: &StorageLocation) -> Result<Option<u64>> {
        let result = self.block_on(
            self.client
                .head_object()
                .bucket(location.bucket())
                .key(location.key())
                .send(),
        );

        match result {
            Ok(output) => Ok(Some(output.content_length().unwrap_or(0).max(0) as u64)),
            Err(err) if status_of(&err) == Some(404) => Ok(None),
            Err(err) => Err(sdk_error("head object", location, err)),
        }
    }
}

impl Backend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn with_session(&self, session: Session) -> Result<Arc<dyn Backend>> {
        match session {
            Session::Shared => Ok(Arc::new(self.clone())),
            Session::Fresh => Ok(Arc::new(Self::with_runtime(
                self.runtime.clone(),
                self.sdk_config.clone(),
                self.force_path_style,
            ))),
        }
    }

    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        validate_bucket(bucket)?;
        match self.block_on(self.client.head_bucket().bucket(bucket).send()) {
            Ok(_) => Ok(true),
            Err(err) if status_of(&err) == Some(404) => Ok(false),
            Err(err) => Err(sdk_error("head bucket", bucket, err)),
        }
    }

    fn object_exists(&self, location: &StorageLocation) -> Result<bool> {
        Ok(self.head_object_length(location)?.is_some())
    }

    fn list_buckets(&self) -> Result<Vec<String>> {
        let output = self
            .block_on(self.client.list_buckets().send())
            .map_err(|err| sdk_error("list buckets", "", err))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect())
    }

    fn list_objects(&self, bucket: &str, prefix: &str, max_keys: usize) -> Result<Vec<String>> {
        validate_bucket(bucket)?;
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        while keys.len() < max_keys {
            let page_size = (max_keys - keys.len()).min(LIST_PAGE) as i32;
            let output = self
                .block_on(
                    self.client
                        .list_objects_v2()
                        .bucket(bucket)
                        .prefix(prefix)
                        .max_keys(page_size)
                        .set_continuation_token(token.take())
                        .send(),
                )
                .map_err(|err| sdk_error("list objects", bucket, err))?;

            keys.extend(output.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            match (output.is_truncated(), output.next_continuation_token()) {
                (Some(true), Some(next)) => token = Some(next.to_string()),
                _ => break,
            }
        }

        keys.truncate(max_keys);
        Ok(keys)
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<String>> {
        validate_bucket(bucket)?;
        let mut deleted = Vec::new();

        for batch in keys.chunks(DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| S3IoError::Internal(e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| S3IoError::Internal(e.to_string()))?;

            let output = self
                .block_on(self.client.delete_objects().bucket(bucket).delete(delete).send())
                .map_err(|err| sdk_error("delete objects", bucket, err))?;

            for failure in output.errors() {
                warn!(
                    "Failed to delete {}/{}: {}",
                    bucket,
                    failure.key().unwrap_or_default(),
                    failure.message().unwrap_or_default()
                );
            }
            deleted.extend(output.deleted().iter().filter_map(|d| d.key().map(str::to_string)));
        }

        Ok(deleted)
    }

    fn put_object(&self, location: &StorageLocation, data: &[u8]) -> Result<()> {
        self.block_on(
            self.client
                .put_object()
                .bucket(location.bucket())
                .key(location.key())
                .body(ByteStream::from(data.to_vec()))
                .send(),
        )
        .map_err(|err| sdk_error("put object", location, err))?;
        Ok(())
    }

    fn get_object(&self, location: &StorageLocation) -> Result<Option<Vec<u8>>> {
        self.block_on(async {
            let result = self
                .client
                .get_object()
                .bucket(location.bucket())
                .key(location.key())
                .send()
                .await;

            let output = match result {
                Ok(output) => output,
                Err(err) if is_missing_key(&err) => return Ok(None),
                Err(err) => return Err(sdk_error("get object", location, err)),
            };

            let bytes = output
                .body
                .collect()
                .await
                .map_err(|e| S3IoError::storage(format!("read body {}: {}", location, e)))?;
            Ok(Some(bytes.into_bytes().to_vec()))
        })
    }

    fn get_object_range(&self, location: &StorageLocation, start: u64, end: u64) -> Result<Vec<u8>> {
        if start > end {
            return Err(S3IoError::InvalidRange { start, end });
        }
        if start == end {
            // Nothing to fetch, but a missing object is still an error
            return match self.head_object_length(location)? {
                Some(_) => Ok(Vec::new()),
                None => Err(not_found(location)),
            };
        }

        self.block_on(async {
            let result = self
                .client
                .get_object()
                .bucket(location.bucket())
                .key(location.key())
                .range(format!("bytes={}-{}", start, end - 1))
                .send()
                .await;

            let output = match result {
                Ok(output) => output,
                Err(err) if is_missing_key(&err) => return Err(not_found(location)),
                // Range starts past the end of the object
                Err(err) if status_of(&err) == Some(416) => return Ok(Vec::new()),
                Err(err) => return Err(sdk_error("get object range", location, err)),
            };

            let bytes = output
                .body
                .collect()
                .await
                .map_err(|e| S3IoError::storage(format!("read body {}: {}", location, e)))?;
            Ok(bytes.into_bytes().to_vec())
        })
    }

    fn object_size(&self, location: &StorageLocation) -> Result<Option<u64>> {
        self.head_object_length(location)
    }

    fn supports_multipart(&self) -> bool {
        true
    }

    fn create_multipart(&self, location: &StorageLocation) -> Result<String> {
        let output = self
            .block_on(
                self.client
                    .create_multipart_upload()
                    .bucket(location.bucket())
                    .key(location.key())
                    .send(),
            )
            .map_err(|err| sdk_error("create multipart upload", location, err))?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| S3IoError::Multipart(format!("no upload id returned for {}", location)))?;
        debug!("Initiated multipart upload {} for {}", upload_id, location);
        Ok(upload_id.to_string())
    }

    fn upload_part(
        &self,
        location: &StorageLocation,
        upload_id: &str,
        part_number: u32,
        data: &[u8],
    ) -> Result<CompletedPart> {
        let output = self
            .block_on(
                self.client
                    .upload_part()
                    .bucket(location.bucket())
                    .key(location.key())
                    .upload_id(upload_id)
                    .part_number(part_number as i32)
                    .body(ByteStream::from(data.to_vec()))
                    .send(),
            )
            .map_err(|err| sdk_error("upload part", location, err))?;

        let e_tag = output.e_tag().ok_or_else(|| {
            S3IoError::Multipart(format!("no ETag returned for part {} of {}", part_number, location))
        })?;
        Ok(CompletedPart {
            part_number,
            e_tag: e_tag.to_string(),
        })
    }

    fn complete_multipart(
        &self,
        location: &StorageLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<MultipartResponse> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        aws_sdk_s3::types::CompletedPart::builder()
                            .part_number(p.part_number as i32)
                            .e_tag(&p.e_tag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        let output = self
            .block_on(
                self.client
                    .complete_multipart_upload()
                    .bucket(location.bucket())
                    .key(location.key())
                    .upload_id(upload_id)
                    .multipart_upload(completed)
                    .send(),
            )
            .map_err(|err| sdk_error("complete multipart upload", location, err))?;

        Ok(MultipartResponse {
            bucket: location.bucket().to_string(),
            key: location.key().to_string(),
            upload_id: upload_id.to_string(),
            e_tag: output.e_tag().map(str::to_string),
            parts: parts.to_vec(),
        })
    }

    fn abort_multipart(&self, location: &StorageLocation, upload_id: &str) -> Result<()> {
        self.block_on(
            self.client
                .abort_multipart_upload()
                .bucket(location.bucket())
                .key(location.key())
                .upload_id(upload_id)
                .send(),
        )
        .map_err(|err| sdk_error("abort multipart upload", location, err))?;
        Ok(())
    }
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("s3aio-io")
        .build()
        .map_err(S3IoError::Io)
}

fn build_client(sdk_config: &SdkConfig, force_path_style: bool) -> Client {
    let config = aws_sdk_s3::config::Builder::from(sdk_config)
        .force_path_style(force_path_style)
        .build();
    Client::from_conf(config)
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|r| r.status().as_u16())
}

fn is_missing_key(err: &SdkError<aws_sdk_s3::operation::get_object::GetObjectError, HttpResponse>) -> bool {
    status_of(err) == Some(404) || err.as_service_error().map(|e| e.is_no_such_key()).unwrap_or(false)
}

fn not_found(location: &StorageLocation) -> S3IoError {
    S3IoError::NotFound {
        bucket: location.bucket().to_string(),
        key: location.key().to_string(),
    }
}

fn sdk_error<E>(op: &str, target: impl std::fmt::Display, err: SdkError<E, HttpResponse>) -> S3IoError
where
    E: std::error::Error + Send + Sync + 'static,
{
    S3IoError::Storage {
        code: status_of(&err),
        message: format!("{} {}: {}", op, target, DisplayErrorContext(err)),
    }
}
