//! S3 client implementation.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use tracing::{debug, info};
use url::Url;

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, ObjectStore, Visibility};

/// Lifetime of presigned URLs handed out for private objects.
const PRESIGN_TTL: Duration = Duration::from_secs(3600);

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint (R2, MinIO). `None` targets AWS S3.
    pub endpoint_url: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub region: String,
    /// Base URL for public objects, e.g. a CDN domain.
    pub public_base_url: Option<String>,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let endpoint_url = non_empty_var("S3_ENDPOINT_URL");
        let public_base_url = non_empty_var("S3_PUBLIC_BASE_URL");

        for url in endpoint_url.iter().chain(public_base_url.iter()) {
            Url::parse(url)
                .map_err(|e| StorageError::config_error(format!("Invalid URL '{}': {}", url, e)))?;
        }

        Ok(Self {
            endpoint_url,
            access_key_id: std::env::var("S3_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("S3_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("S3_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("S3_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("S3_BUCKET_NAME not set"))?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-west-2".to_string()),
            public_base_url,
        })
    }

    /// Public URL of an object, assuming it was stored with `PublicRead`.
    pub fn public_url(&self, key: &str) -> String {
        let encoded = encode_key(key);
        if let Some(base) = &self.public_base_url {
            format!("{}/{}", base.trim_end_matches('/'), encoded)
        } else if let Some(endpoint) = &self.endpoint_url {
            format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket_name, encoded)
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket_name, self.region, encoded
            )
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// S3-compatible storage client.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    config: S3Config,
}

impl S3Client {
    /// Create a new client from configuration.
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "pixq",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!(
            "Initialized S3 client for bucket {} ({})",
            config.bucket_name,
            config.endpoint_url.as_deref().unwrap_or("aws")
        );

        Self {
            client: Client::from_conf(builder.build()),
            config,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(S3Config::from_env()?))
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket_name
    }

    /// Generate a presigned GET URL.
    pub async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.config.bucket_name)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        debug!("Downloading {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|s| s.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StorageError::not_found(key)
                } else {
                    StorageError::download_failed(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        visibility: Visibility,
    ) -> StorageResult<String> {
        validate_key(key)?;
        debug!("Uploading {} bytes to {}", data.len(), key);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type);

        if visibility == Visibility::PublicRead {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {}", key);

        match visibility {
            Visibility::PublicRead => Ok(self.config.public_url(key)),
            Visibility::Private => self.presign_get(key, PRESIGN_TTL).await,
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket_name)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .map(|s| s.is_not_found())
                    .unwrap_or(false);
                if missing {
                    Ok(false)
                } else {
                    Err(StorageError::AwsSdk(e.to_string()))
                }
            }
        }
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket_name)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("S3 connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn config(endpoint: Option<&str>, public: Option<&str>) -> S3Config {
        S3Config {
            endpoint_url: endpoint.map(String::from),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            bucket_name: "pixq".to_string(),
            region: "us-west-2".to_string(),
            public_base_url: public.map(String::from),
        }
    }

    #[test]
    fn test_public_url_aws() {
        let cfg = config(None, None);
        assert_eq!(
            cfg.public_url("outputs/img/job.png"),
            "https://pixq.s3.us-west-2.amazonaws.com/outputs/img/job.png"
        );
    }

    #[test]
    fn test_public_url_custom_endpoint() {
        let cfg = config(Some("http://localhost:9000/"), None);
        assert_eq!(cfg.public_url("a/b.png"), "http://localhost:9000/pixq/a/b.png");
    }

    #[test]
    fn test_public_url_prefers_base_and_encodes_segments() {
        let cfg = config(Some("http://localhost:9000"), Some("https://cdn.example.com"));
        assert_eq!(
            cfg.public_url("images/my photo.png"),
            "https://cdn.example.com/images/my%20photo.png"
        );
    }

    #[test]
    #[serial]
    fn test_from_env_defaults_and_required() {
        std::env::remove_var("S3_ACCESS_KEY_ID");
        assert!(S3Config::from_env().is_err());

        std::env::set_var("S3_ACCESS_KEY_ID", "id");
        std::env::set_var("S3_SECRET_ACCESS_KEY", "secret");
        std::env::set_var("S3_BUCKET_NAME", "bucket");
        std::env::remove_var("S3_REGION");
        std::env::set_var("S3_ENDPOINT_URL", "");
        std::env::remove_var("S3_PUBLIC_BASE_URL");

        let cfg = S3Config::from_env().unwrap();
        assert_eq!(cfg.region, "us-west-2");
        assert!(cfg.endpoint_url.is_none());

        std::env::set_var("S3_ENDPOINT_URL", "not a url");
        assert!(S3Config::from_env().is_err());

        for var in [
            "S3_ACCESS_KEY_ID",
            "S3_SECRET_ACCESS_KEY",
            "S3_BUCKET_NAME",
            "S3_ENDPOINT_URL",
        ] {
            std::env::remove_var(var);
        }
    }
}
