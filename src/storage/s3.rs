use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::instrument;

use super::{CompletedPart, MultipartUpload, ObjectMeta, ObjectStore, PartInfo, StorageResult};
use crate::error::StorageError;

/// Service error codes S3 returns for conditions worth retrying.
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "InternalError",
    "ServiceUnavailable",
    "Throttling",
];

/// S3 (or S3-compatible) object store.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Classify an SDK error as transient or permanent.
///
/// A 404 becomes [`StorageError::NotFound`] for `target`, or
/// [`StorageError::UploadNotFound`] when S3 reports `NoSuchUpload`.
fn classify_sdk_error<E>(operation: &'static str, target: &str, err: SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Transient { operation, message }
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let code = service.err().code().unwrap_or_default();

            if code == "NoSuchUpload" {
                return StorageError::UploadNotFound(target.to_string());
            }
            if status == 404 || code == "NoSuchKey" || code == "NotFound" {
                return StorageError::NotFound(target.to_string());
            }
            if status == 429 || status >= 500 || TRANSIENT_CODES.contains(&code) {
                StorageError::Transient { operation, message }
            } else {
                StorageError::Permanent { operation, message }
            }
        }
        _ => StorageError::Permanent { operation, message },
    }
}

fn body_error(operation: &'static str, err: impl std::fmt::Display) -> StorageError {
    StorageError::Transient {
        operation,
        message: err.to_string(),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn begin_multipart(&self, key: &str) -> StorageResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error("begin_multipart", key, e))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Permanent {
                operation: "begin_multipart",
                message: "S3 returned no upload id".to_string(),
            })
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .part_number(part_number as i32)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify_sdk_error("upload_part", &upload.upload_id, e))?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Permanent {
                operation: "upload_part",
                message: format!("S3 returned no ETag for part {}", part_number),
            })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list_parts(&self, upload: &MultipartUpload) -> StorageResult<Vec<PartInfo>> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_parts()
                .bucket(&self.bucket)
                .key(&upload.key)
                .upload_id(&upload.upload_id);
            if let Some(m) = &marker {
                request = request.part_number_marker(m);
            }

            let output = request
                .send()
                .await
                .map_err(|e| classify_sdk_error("list_parts", &upload.upload_id, e))?;

            for part in output.parts() {
                if let (Some(number), Some(tag)) = (part.part_number(), part.e_tag()) {
                    parts.push(PartInfo {
                        part_number: number as u32,
                        tag: tag.to_string(),
                        size: part.size().unwrap_or(0) as u64,
                    });
                }
            }

            match (output.is_truncated(), output.next_part_number_marker()) {
                (Some(true), Some(next)) => marker = Some(next.to_string()),
                _ => break,
            }
        }

        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    #[instrument(skip(self, parts), fields(backend = "s3", parts = parts.len()))]
    async fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        let completed = parts
            .iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .e_tag(&p.tag)
                    .part_number(p.part_number as i32)
                    .build()
            })
            .collect::<Vec<_>>();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| classify_sdk_error("complete_multipart", &upload.upload_id, e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn abort_multipart(&self, upload: &MultipartUpload) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error("abort_multipart", &upload.upload_id, e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error("head", key, e))?;

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0) as u64,
        })
    }

    async fn get_range(&self, key: &str, offset: u64, len: u64) -> StorageResult<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }

        // Range header is inclusive on both ends
        let range = format!("bytes={}-{}", offset, offset + len - 1);

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(range)
            .send()
            .await
            .map_err(|e| classify_sdk_error("get_range", key, e))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| body_error("get_range", e))?
            .into_bytes();

        Ok(data)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match classify_sdk_error("delete", key, e) {
                StorageError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services generally need path-style addressing
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}
