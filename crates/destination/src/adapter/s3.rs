//! S3-compatible object storage destination.
//!
//! Works with AWS S3, Cloudflare R2, Backblaze B2, Tigris, MinIO and anything
//! else speaking the S3 API.
//!
//! # Credentials
//!
//! Credentials come from the destination's settings (`key_id`,
//! `key_secret`), never from the environment or `~/.aws`. Settings are passed
//! per upload, so the client is built per upload too.

use crate::adapter::DestinationAdapter;
use crate::error::{ErrorKind, Result};
use crate::key::{content_key, normalize_prefix};
use crate::models::{DestinationId, UploadReceipt, ValidationReport};
use crate::progress::ProgressReporter;
use crate::settings::{optional_str, required_str};
use crate::source::{extension, read_source};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, http::HttpResponse, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
};
use exn::ResultExt;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Concurrent `PutObject` requests allowed per adapter.
const DEFAULT_CONCURRENT_REQUESTS: usize = 8;
const TOTAL_STEPS: u32 = 3;

/// S3-compatible destination.
///
/// # Settings
/// - `bucket`, `region`, `key_id`, `key_secret` (required)
/// - `endpoint` (optional): custom endpoint for non-AWS services, e.g.
///   `https://<account>.r2.cloudflarestorage.com`
/// - `prefix` (optional): key prefix (acts as virtual directory)
/// - `public_url` (optional): base URL objects are publicly served from.
///   Without it the link is built from the endpoint (path style) or the AWS
///   virtual-hosted URL.
///
/// # Examples
///
/// ```no_run
/// use fanout_destination::adapter::{DestinationAdapter, S3Adapter};
/// use fanout_destination::ProgressReporter;
/// use serde_json::json;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let adapter = S3Adapter::new("r2");
/// let settings = json!({
///     "bucket": "screenshots",
///     "region": "auto",
///     "endpoint": "https://abc123.r2.cloudflarestorage.com",
///     "key_id": "access_key_id",
///     "key_secret": "secret_access_key",
///     "public_url": "https://img.example.com",
/// });
/// let progress = ProgressReporter::detached(adapter.id().clone());
/// let receipt = adapter.upload(Path::new("/tmp/cat.png"), Some(&settings), &progress).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Adapter {
    id: DestinationId,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Adapter {
    pub fn new(id: impl Into<DestinationId>) -> Self {
        Self {
            id: id.into(),
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        }
    }

    fn client(settings: Option<&Value>) -> Result<Client> {
        let credentials = Credentials::new(
            required_str(settings, "key_id")?,
            required_str(settings, "key_secret")?,
            None,
            None,
            "fanout-settings",
        );
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(required_str(settings, "region")?.to_string()))
            // 1 initial + 3 retries, exponential backoff
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services (R2, B2, MinIO...)
            .force_path_style(true);
        if let Some(endpoint_url) = optional_str(settings, "endpoint") {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Client::from_conf(config_builder.build()))
    }

    fn object_key(settings: Option<&Value>, contents: &[u8], file: &Path) -> Result<String> {
        let prefix = optional_str(settings, "prefix").map(normalize_prefix).transpose()?;
        Ok(content_key(prefix.as_deref(), contents, extension(file).as_deref()))
    }

    fn public_url(settings: Option<&Value>, bucket: &str, key: &str) -> Result<String> {
        if let Some(base) = optional_str(settings, "public_url") {
            return Ok(format!("{}/{}", base.trim_end_matches('/'), key));
        }
        if let Some(endpoint) = optional_str(settings, "endpoint") {
            return Ok(format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key));
        }
        let region = required_str(settings, "region")?;
        Ok(format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"))
    }

    fn classify<E: std::error::Error + 'static>(err: &SdkError<E, HttpResponse>) -> ErrorKind {
        let message = DisplayErrorContext(err).to_string();
        match err {
            SdkError::TimeoutError(_) => ErrorKind::Timeout,
            SdkError::DispatchFailure(_) => ErrorKind::Network(message),
            SdkError::ConstructionFailure(_) => ErrorKind::Config(message),
            _ => match err.raw_response().map(|response| response.status().as_u16()) {
                Some(401 | 403) => ErrorKind::Auth(message),
                Some(status) => ErrorKind::RejectedWithStatus { status, message },
                None => ErrorKind::Storage(message),
            },
        }
    }
}

#[async_trait]
impl DestinationAdapter for S3Adapter {
    fn id(&self) -> &DestinationId {
        &self.id
    }

    fn required_fields(&self) -> &[&'static str] {
        &["bucket", "region", "key_id", "key_secret"]
    }

    fn validate(&self, settings: Option<&Value>) -> ValidationReport {
        let mut errors = Vec::new();
        for field in ["endpoint", "public_url"] {
            if let Some(url) = optional_str(settings, field)
                && !(url.starts_with("http://") || url.starts_with("https://"))
            {
                errors.push(format!("`{field}` must be an http(s) URL, got `{url}`"));
            }
        }
        if let Some(prefix) = optional_str(settings, "prefix")
            && let Err(err) = normalize_prefix(prefix)
        {
            errors.push(format!("`prefix` is invalid: {}", &*err));
        }
        ValidationReport::invalid(errors)
    }

    async fn upload(
        &self,
        file: &Path,
        settings: Option<&Value>,
        progress: &ProgressReporter,
    ) -> Result<UploadReceipt> {
        let bucket = required_str(settings, "bucket")?;
        let client = Self::client(settings)?;

        progress.step(1, TOTAL_STEPS, 0, "reading file");
        let contents = read_source(file).await?;
        let key = Self::object_key(settings, &contents, file)?;
        let size = contents.len() as u64;
        let content_type = mime_guess::from_path(file).first_or_octet_stream();

        progress.step(2, TOTAL_STEPS, 10, "waiting for connection slot");
        let _permit = self
            .rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::Storage("S3 request limiter closed".to_string()))?;

        progress.step(3, TOTAL_STEPS, 33, "uploading");
        tracing::debug!(destination = %self.id, bucket, key = %key, size, "Uploading object");
        client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .content_type(content_type.essence_str())
            .content_length(size as i64)
            .body(ByteStream::from(contents))
            .send()
            .await
            .map_err(|err| Self::classify(&err))?;
        progress.percent(100);

        let url = Self::public_url(settings, bucket, &key)?;
        Ok(UploadReceipt::new(url, size).with_key(key))
    }
}
