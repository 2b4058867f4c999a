use std::path::PathBuf;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024; // 10 MB

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageBackend {
    Fs,
    S3,
}

#[derive(Clone, Debug)]
pub struct S3Config {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

/// Process configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub image_backend: ImageBackend,
    pub max_upload_bytes: usize,
    pub frontend_url: Option<String>,
    pub s3: S3Config,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| get(name).filter(|v| !v.trim().is_empty());
        let image_backend = match non_empty("BLOG_IMAGE_STORE").as_deref().map(str::to_ascii_lowercase) {
            Some(v) if v == "s3" => ImageBackend::S3,
            _ => ImageBackend::Fs,
        };
        Self {
            host: non_empty("BLOG_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: non_empty("BLOG_PORT").and_then(|v| v.parse().ok()).unwrap_or(8080),
            data_dir: non_empty("BLOG_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data")),
            image_backend,
            max_upload_bytes: non_empty("BLOG_MAX_UPLOAD_BYTES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            frontend_url: non_empty("FRONTEND_URL"),
            s3: S3Config {
                bucket: non_empty("S3_BUCKET").unwrap_or_else(|| "blog-images".into()),
                endpoint: non_empty("S3_ENDPOINT"),
                region: non_empty("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
                access_key: non_empty("S3_ACCESS_KEY"),
                secret_key: non_empty("S3_SECRET_KEY"),
            },
        }
    }
}
