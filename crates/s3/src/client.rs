//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the BackendClient trait from xfer-core.
//! A client is bound to one bucket; keys passed in are bucket-relative.

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use jiff::Timestamp;
use xfer_core::credentials::{ACCESS_KEY_ID, DEFAULT_REGION, ENDPOINT_URL, SECRET_ACCESS_KEY, SESSION_TOKEN};
use xfer_core::{
    BackendClient, ByteStream, Credentials, Error, ListPage, ObjectDescriptor, ObjectSink,
    OperationKind, Result, Scheme,
};

/// Smallest part size S3 accepts for all but the last part
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;
const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// S3 client wrapper
pub struct S3Client {
    inner: aws_sdk_s3::Client,
    bucket: String,
    part_size: usize,
}

impl S3Client {
    /// Create a client for `bucket` from resolved S3 credentials
    pub async fn new(bucket: &str, credentials: &Credentials) -> Result<Self> {
        if credentials.backend() != Scheme::S3 {
            return Err(Error::Config(format!(
                "{} credentials cannot be used for S3",
                credentials.backend()
            )));
        }

        let access_key = credentials.required(ACCESS_KEY_ID)?;
        let secret_key = credentials.required(SECRET_ACCESS_KEY)?;
        let region = credentials.required(DEFAULT_REGION)?;

        // Build credentials provider
        let provider = aws_credential_types::Credentials::new(
            access_key,
            secret_key,
            credentials.get(SESSION_TOKEN).map(str::to_string),
            None, // expiry
            "xfer-static-credentials",
        );

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(provider)
            .region(aws_config::Region::new(region.to_string()));

        let endpoint = credentials.get(ENDPOINT_URL);
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let config = loader.load().await;

        // Custom endpoints (MinIO, RustFS, ...) generally need path-style addressing
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(endpoint.is_some())
            .build();

        tracing::debug!(bucket, region, endpoint = ?endpoint, "Created S3 client");

        Ok(Self::from_sdk(aws_sdk_s3::Client::from_conf(s3_config), bucket))
    }

    /// Wrap an already configured SDK client
    pub fn from_sdk(inner: aws_sdk_s3::Client, bucket: &str) -> Self {
        Self {
            inner,
            bucket: bucket.to_string(),
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Multipart part size, at least 5 MiB
    pub fn with_part_size(mut self, bytes: usize) -> Self {
        self.part_size = bytes.max(MIN_PART_SIZE);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }
}

/// Format AWS SDK error into a detailed error message
fn format_sdk_error<E: std::fmt::Display>(error: &SdkError<E, HttpResponse>) -> String {
    match error {
        SdkError::ServiceError(service_err) => {
            let err = service_err.err();
            let meta = service_err.raw();
            let mut msg = format!("Service error: {}", err);
            // Try to extract additional error information from headers
            if let Some(code) = meta.headers().get("x-amz-error-code") {
                msg.push_str(&format!(" (code: {})", code));
            }
            msg
        }
        SdkError::ConstructionFailure(err) => {
            format!("Request construction failed: {:?}", err)
        }
        SdkError::TimeoutError(_) => "Request timeout".to_string(),
        SdkError::DispatchFailure(err) => {
            format!("Network dispatch error: {:?}", err)
        }
        SdkError::ResponseError(err) => {
            format!("Response error: {:?}", err)
        }
        _ => error.to_string(),
    }
}

/// Map an SDK error onto the xfer error taxonomy
///
/// `what` names the object or bucket the request was about.
fn classify<E>(what: &str, error: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let status = error.raw_response().map(|r| r.status().as_u16());
    let code = error.code().map(str::to_string);
    let message = format_sdk_error(&error);

    match (&error, code.as_deref(), status) {
        (SdkError::TimeoutError(_) | SdkError::DispatchFailure(_), _, _) => {
            Error::Network(format!("{what}: {message}"))
        }
        (
            _,
            Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken"),
            _,
        )
        | (_, _, Some(401 | 403)) => Error::Auth(format!("{what}: {message}")),
        (_, Some("NoSuchKey" | "NoSuchBucket" | "NotFound"), _) | (_, _, Some(404)) => {
            Error::NotFound(what.to_string())
        }
        (_, Some("SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable"), _) => {
            Error::Network(format!("{what}: {message}"))
        }
        (_, _, Some(s)) if s == 429 || s >= 500 => Error::Network(format!("{what}: {message}")),
        (SdkError::ResponseError(_), _, _) => Error::Network(format!("{what}: {message}")),
        _ => Error::General(format!("{what}: {message}")),
    }
}

fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn to_timestamp(dt: &aws_smithy_types::DateTime) -> Option<Timestamp> {
    Timestamp::from_second(dt.secs()).ok()
}

fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[async_trait]
impl BackendClient for S3Client {
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        let mut request = self.inner.list_objects_v2().bucket(&self.bucket);

        if !prefix.is_empty() {
            request = request.prefix(prefix);
        }

        if let Some(token) = continuation_token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify(&format!("s3://{}/{prefix}", self.bucket), e))?;

        let objects = response
            .contents()
            .iter()
            .map(|object| ObjectDescriptor {
                key: object.key().unwrap_or_default().to_string(),
                size: object.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                etag: object.e_tag().map(trim_etag),
                last_modified: object.last_modified().and_then(to_timestamp),
            })
            .collect();

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_token,
        })
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectDescriptor>> {
        let result = self
            .inner
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                return match classify(&format!("s3://{}/{key}", self.bucket), e) {
                    Error::NotFound(_) => Ok(None),
                    other => Err(other),
                };
            }
        };

        Ok(Some(ObjectDescriptor {
            key: key.to_string(),
            size: response
                .content_length()
                .and_then(|s| u64::try_from(s).ok())
                .unwrap_or(0),
            etag: response.e_tag().map(trim_etag),
            last_modified: response.last_modified().and_then(to_timestamp),
        }))
    }

    async fn open_read(&self, key: &str, offset: u64) -> Result<ByteStream> {
        let mut request = self.inner.get_object().bucket(&self.bucket).key(key);

        if offset > 0 {
            request = request.range(format!("bytes={offset}-"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            // Resuming exactly at the end of the object
            Err(e) if offset > 0 && e.code() == Some("InvalidRange") => {
                return Ok(futures::stream::empty().boxed());
            }
            Err(e) => return Err(classify(&format!("s3://{}/{key}", self.bucket), e)),
        };

        let stream = futures::stream::unfold(response.body, |mut body| async move {
            body.next()
                .await
                .map(|chunk| (chunk.map_err(|e| Error::Network(e.to_string())), body))
        });

        Ok(stream.boxed())
    }

    async fn open_write(&self, key: &str, offset: u64) -> Result<Box<dyn ObjectSink>> {
        if offset > 0 {
            return Err(Error::UnsupportedOperation {
                backend: Scheme::S3,
                operation: OperationKind::ResumableWrite,
            });
        }

        Ok(Box::new(S3Sink {
            client: self.inner.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            content_type: content_type_for(key),
            part_size: self.part_size,
            buffer: BytesMut::new(),
            upload: None,
            written: 0,
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(&format!("s3://{}/{key}", self.bucket), e))?;

        Ok(())
    }
}

struct MultipartUpload {
    upload_id: String,
    parts: Vec<CompletedPart>,
}

/// Buffers writes and uploads them as one PUT or a multipart upload
///
/// Objects that fit in a single part go up with `put_object` on finish.
/// Larger ones start a multipart upload once the first part fills.
struct S3Sink {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
    content_type: String,
    part_size: usize,
    buffer: BytesMut,
    upload: Option<MultipartUpload>,
    written: u64,
}

impl S3Sink {
    fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    async fn upload_part(&mut self, data: Bytes) -> Result<()> {
        let upload_id = match &self.upload {
            Some(upload) => upload.upload_id.clone(),
            None => {
                let response = self
                    .client
                    .create_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&self.key)
                    .content_type(&self.content_type)
                    .send()
                    .await
                    .map_err(|e| classify(&self.location(), e))?;
                let upload_id = response
                    .upload_id()
                    .ok_or_else(|| Error::General(format!("{}: no upload id returned", self.location())))?
                    .to_string();
                tracing::debug!(key = %self.key, upload_id, "Started multipart upload");
                self.upload = Some(MultipartUpload {
                    upload_id: upload_id.clone(),
                    parts: Vec::new(),
                });
                upload_id
            }
        };

        let done = self.upload.as_ref().map_or(0, |u| u.parts.len());
        let part_number =
            i32::try_from(done + 1).map_err(|_| Error::General("too many parts".into()))?;

        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload_id)
            .part_number(part_number)
            .body(aws_sdk_s3::primitives::ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify(&self.location(), e))?;

        if let Some(upload) = self.upload.as_mut() {
            upload.parts.push(
                CompletedPart::builder()
                    .set_e_tag(response.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
        }
        Ok(())
    }

    /// Upload the buffered tail and complete the multipart upload
    async fn complete(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let last = std::mem::take(&mut self.buffer).freeze();
            self.upload_part(last).await?;
        }

        let Some(upload) = self.upload.as_ref() else {
            return Ok(());
        };

        let parts = upload.parts.len();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(upload.parts.clone()))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify(&self.location(), e))?;

        self.upload = None;
        tracing::debug!(key = %self.key, parts, bytes = self.written, "Completed multipart upload");
        Ok(())
    }

    async fn abort_upload(&mut self) -> Result<()> {
        let Some(upload) = self.upload.take() else {
            return Ok(());
        };

        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload.upload_id)
            .send()
            .await
            .map_err(|e| classify(&self.location(), e))?;

        tracing::debug!(key = %self.key, upload_id = %upload.upload_id, "Aborted multipart upload");
        Ok(())
    }
}

#[async_trait]
impl ObjectSink for S3Sink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.written += chunk.len() as u64;
        self.buffer.extend_from_slice(&chunk);

        while self.buffer.len() >= self.part_size {
            let part = self.buffer.split_to(self.part_size).freeze();
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64> {
        if self.upload.is_none() {
            let body = std::mem::take(&mut self.buffer).freeze();
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .content_type(&self.content_type)
                .body(aws_sdk_s3::primitives::ByteStream::from(body))
                .send()
                .await
                .map_err(|e| classify(&self.location(), e))?;
            return Ok(self.written);
        }

        // The caller cannot abort a consumed sink, so clean up here
        if let Err(e) = self.complete().await {
            if let Err(abort_err) = self.abort_upload().await {
                tracing::warn!(key = %self.key, error = %abort_err, "Failed to abort multipart upload");
            }
            return Err(e);
        }
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.abort_upload().await
    }
}
