//! S3-compatible payload store.
//!
//! Compatible with AWS S3, MinIO, R2, etc. Errors are classified through the
//! SDK's typed service errors, not response text. Payloads are immutable
//! once written, so repeated puts of the same key are harmless.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Builder, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;

use super::backend::{StorageBackend, StorageError, StorageResult};

/// S3 storage backend configuration
#[derive(Clone, Debug)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// Optional prefix for all keys
    pub prefix: Option<String>,
    /// AWS region
    pub region: String,
    /// Custom endpoint URL (for MinIO, R2, LocalStack, etc.)
    pub endpoint: Option<String>,
    /// Force path-style URLs (required for MinIO/LocalStack)
    pub force_path_style: bool,
}

impl S3Config {
    /// Create config for AWS S3
    pub fn aws(bucket: String, region: String) -> Self {
        Self {
            bucket,
            prefix: None,
            region,
            endpoint: None,
            force_path_style: false,
        }
    }

    /// Create config for MinIO or other S3-compatible storage
    pub fn compatible(bucket: String, region: String, endpoint: String) -> Self {
        Self {
            bucket,
            prefix: None,
            region,
            endpoint: Some(endpoint),
            force_path_style: true,
        }
    }

    /// Set a key prefix
    pub fn with_prefix(mut self, prefix: String) -> Self {
        self.prefix = Some(prefix);
        self
    }

    fn client_builder(&self) -> Builder {
        let mut builder = Builder::new()
            .region(Region::new(self.region.clone()))
            .force_path_style(self.force_path_style);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        builder
    }
}

/// S3-compatible payload store
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3Storage {
    /// Create a new S3 payload store with credentials from the environment
    pub async fn new(config: S3Config) -> Self {
        let mut builder = config.client_builder();

        let sdk_config = aws_config::load_from_env().await;
        if let Some(creds) = sdk_config.credentials_provider() {
            builder = builder.credentials_provider(creds);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            prefix: config.prefix,
        }
    }

    /// Create an S3 payload store with explicit credentials (for testing)
    pub async fn with_credentials(config: S3Config, access_key: &str, secret_key: &str) -> Self {
        let creds = Credentials::new(access_key, secret_key, None, None, "static");
        let builder = config.client_builder().credentials_provider(creds);

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            prefix: config.prefix,
        }
    }

    /// Bucket key for a payload: `[prefix]namespace/key`
    fn object_key(&self, namespace: &str, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{namespace}/{key}"),
            None => format!("{namespace}/{key}"),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn get(&self, namespace: &str, key: &str) -> StorageResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(namespace, key))
            .send()
            .await
            .map_err(|err| {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    StorageError::NotFound(format!("{namespace}/{key}"))
                } else {
                    StorageError::Other(service_err.to_string())
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Other(err.to_string()))?;
        Ok(body.into_bytes())
    }

    async fn put(&self, namespace: &str, key: &str, data: Bytes) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(namespace, key))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| StorageError::Other(err.into_service_error().to_string()))?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> StorageResult<()> {
        // S3 DeleteObject succeeds for absent keys, matching the local
        // backend's no-op semantics.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(namespace, key))
            .send()
            .await
            .map_err(|err| StorageError::Other(err.into_service_error().to_string()))?;
        Ok(())
    }

    async fn exists(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(namespace, key))
            .send()
            .await;

        match head {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::Other(service_err.to_string()))
                }
            }
        }
    }
}
