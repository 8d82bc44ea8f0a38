use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    presigning::PresigningConfig,
    Client,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::config::S3Config;

/// Storage provider name the gateway knows how to sign for.
pub const SUPPORTED_PROVIDER: &str = "s3";

const FILENAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// How the browser should treat the object behind a signed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Force a download under the given file name.
    Attachment { filename: String },
    /// Render in the browser, optionally overriding the response content type.
    Inline { content_type: Option<String> },
}

impl Disposition {
    pub fn header_value(&self) -> String {
        match self {
            Self::Attachment { filename } => format!(
                "attachment; filename=\"{}\"",
                utf8_percent_encode(filename, FILENAME)
            ),
            Self::Inline { .. } => "inline".to_string(),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            Self::Inline { content_type } => content_type.as_deref(),
            Self::Attachment { .. } => None,
        }
    }
}

/// Object store seam: mints time-boxed read URLs, never streams bytes.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn presign_get(
        &self,
        key: &str,
        ttl: Duration,
        disposition: &Disposition,
    ) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub async fn new(cfg: &S3Config) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
        })
    }
}

#[async_trait]
impl StorageClient for Storage {
    async fn presign_get(
        &self,
        key: &str,
        ttl: Duration,
        disposition: &Disposition,
    ) -> anyhow::Result<String> {
        let mut req = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .response_content_disposition(disposition.header_value());
        if let Some(ct) = disposition.content_type() {
            req = req.response_content_type(ct);
        }
        let presigned = req
            .presigned(PresigningConfig::expires_in(ttl).context("presigning config")?)
            .await
            .context("s3 presign_get")?;
        Ok(presigned.uri().to_string())
    }
}
