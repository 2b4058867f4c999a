use async_trait::async_trait;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{AppConfig, ImageBackend};

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// Content-addressed blob storage for uploaded images. Keys are SHA-256 hex
/// digests, so saving the same bytes twice reports `Duplicate`.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError>;
    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError>;
}

fn sniff_mime(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into())
}

fn shard(hash: &str) -> Result<&str, ImageStoreError> {
    if hash.len() < 2 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ImageStoreError::NotFound);
    }
    Ok(&hash[0..2])
}

// ---------------- Filesystem implementation (local development) ----------------
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, hash: &str) -> Result<PathBuf, ImageStoreError> {
        Ok(self.root.join(shard(hash)?).join(hash))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, hash: &str, _mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        let path = self.path_for(hash)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ImageStoreError::Duplicate);
        }
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ImageStoreError::Other(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            error!("fs image write failed hash={hash} path={} err={e}", path.display());
            ImageStoreError::Other(e.to_string())
        })
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let path = self.path_for(hash)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ImageStoreError::NotFound,
            _ => ImageStoreError::Other(e.to_string()),
        })?;
        let mime = sniff_mime(&bytes);
        Ok((bytes, mime))
    }
}

// ---------------- S3 Implementation (MinIO compatible) ----------------
pub struct S3ImageStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
}

impl S3ImageStore {
    pub async fn new(cfg: &crate::config::S3Config) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let endpoint = cfg
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;
        let bucket = cfg.bucket.clone();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(cfg.region.clone()));
        loader = loader.endpoint_url(endpoint);
        if let (Some(access), Some(secret)) = (cfg.access_key.clone(), cfg.secret_key.clone()) {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // path-style addressing: MinIO/local endpoints have no wildcard DNS
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("Initialized S3/MinIO client (path-style addressing enabled)");

        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            warn!("head_bucket failed for '{bucket}' (will attempt create): {e:?}");
            let mut attempt = 0u32;
            let max_attempts = 8;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e2) if attempt >= max_attempts => {
                        error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e2:?}");
                        return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e2}"));
                    }
                    Err(e2) => {
                        let backoff_ms = 200 * attempt.pow(2); // quadratic backoff
                        warn!("create_bucket attempt {attempt} failed for '{bucket}': {e2:?} (retrying in {backoff_ms}ms)");
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms as u64)).await;
                    }
                }
            }
        }

        Ok(Self {
            bucket,
            client,
            prefix: "post-images".into(),
        })
    }

    fn key_for(&self, hash: &str) -> Result<String, ImageStoreError> {
        Ok(format!("{}/{}/{}", self.prefix, shard(hash)?, hash))
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        let key = self.key_for(hash)?;
        if self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .is_ok()
        {
            return Err(ImageStoreError::Duplicate);
        }
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime);
        if let Err(e) = put.send().await {
            error!(
                "put_object failed hash={hash} key={key} bucket={} err={:?}",
                self.bucket, e
            );
            let hint = if e.to_string().contains("NoSuchBucket") {
                " (bucket missing or not yet propagated)"
            } else if e.to_string().contains("AccessDenied") {
                " (check S3_ACCESS_KEY/S3_SECRET_KEY permissions)"
            } else {
                ""
            };
            return Err(ImageStoreError::Other(format!("{e}{hint}")));
        }
        Ok(())
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let key = self.key_for(hash)?;
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|_| ImageStoreError::NotFound)?;
        let stored_mime = obj.content_type().map(str::to_string);
        let data = obj
            .body
            .collect()
            .await
            .map_err(|e| ImageStoreError::Other(e.to_string()))?;
        let bytes = data.into_bytes().to_vec();
        let mime = stored_mime.unwrap_or_else(|| sniff_mime(&bytes));
        Ok((bytes, mime))
    }
}

/// Builds the configured backend.
pub async fn build_image_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ImageStore>> {
    match cfg.image_backend {
        ImageBackend::Fs => {
            let root = cfg.data_dir.join("images");
            info!("Using filesystem image store at '{}'", root.display());
            Ok(Arc::new(FsImageStore::new(root)))
        }
        ImageBackend::S3 => Ok(Arc::new(S3ImageStore::new(&cfg.s3).await?)),
    }
}
