use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Upload cap: uploads are buffered in memory while the multipart body is parsed.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub auth: AuthConfig,
    pub mail: MailConfig,
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub uploads: UploadConfig,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// How long an emailed one-time token can be redeemed
    pub token_ttl_seconds: u64,
    /// Sessions older than this are deleted when presented
    pub session_max_age_seconds: u64,
    /// Lifetime of pre-signed preview URLs
    pub preview_url_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub enum MailBackend {
    Http,
    Log,
    Smtp,
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpTls {
    /// Plain connection upgraded with STARTTLS (usually port 587)
    StartTls,
    /// TLS from the first byte (usually port 465)
    Tls,
    /// Unencrypted. Local relays and tests only.
    None,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub backend: MailBackend,
    /// Login links point here: `{frontend_url}/login#token=...`.
    /// Its origin is also the only one allowed by CORS.
    pub frontend_url: String,
    pub from: String,
    /// Endpoint of the HTTP mail relay (required when backend is http)
    pub relay_url: Option<String>,
    /// SMTP server host (required when backend is smtp)
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_tls: SmtpTls,
    /// Upper bound on one delivery attempt, connection included
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Local,
    S3,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Bucket holding every blob, keyed by file id
    pub bucket: String,
    /// Directory for local storage backend
    pub local_storage_path: String,
    /// Externally reachable base URL of this service, used in local pre-signed URLs
    pub public_url: String,
    /// HMAC secret for local pre-signed URLs. Random per process when unset.
    pub local_signing_secret: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
    /// How often interrupted uploads are reconciled
    pub sweep_interval_seconds: u64,
    /// Pending uploads older than this are considered abandoned
    pub stale_after_seconds: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: 5 * 60,
            session_max_age_seconds: 7 * 24 * 60 * 60,
            preview_url_ttl_seconds: 60,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            backend: MailBackend::Log,
            frontend_url: "http://localhost:3000".to_string(),
            from: "Drive <no-reply@localhost>".to_string(),
            relay_url: None,
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_tls: SmtpTls::StartTls,
            timeout_seconds: 10,
            connect_timeout_seconds: 5,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            bucket: "drive".to_string(),
            local_storage_path: "./files".to_string(),
            public_url: "http://localhost:8080".to_string(),
            local_signing_secret: None,
            s3_endpoint: None,
            s3_region: "us-east-1".to_string(),
            s3_access_key: None,
            s3_secret_key: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            sweep_interval_seconds: 5 * 60,
            stale_after_seconds: 60 * 60,
        }
    }
}

impl MailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_seconds as i64)
    }

    pub fn session_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_max_age_seconds as i64)
    }

    pub fn preview_url_ttl(&self) -> Duration {
        Duration::from_secs(self.preview_url_ttl_seconds)
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let node_defaults = NodeConfig::default();
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or(node_defaults.bind_address);
        let data_dir = std::env::var("DATA_DIR").unwrap_or(node_defaults.data_dir);

        let test_mode = std::env::var("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let auth_defaults = AuthConfig::default();
        let auth = AuthConfig {
            token_ttl_seconds: env_u64("TOKEN_TTL_SECONDS", auth_defaults.token_ttl_seconds),
            session_max_age_seconds: env_u64(
                "SESSION_MAX_AGE_SECONDS",
                auth_defaults.session_max_age_seconds,
            ),
            preview_url_ttl_seconds: env_u64(
                "PREVIEW_URL_TTL_SECONDS",
                auth_defaults.preview_url_ttl_seconds,
            ),
        };

        let upload_defaults = UploadConfig::default();
        let uploads = UploadConfig {
            max_upload_size: env_u64("MAX_UPLOAD_SIZE", upload_defaults.max_upload_size),
            sweep_interval_seconds: env_u64(
                "UPLOAD_SWEEP_INTERVAL_SECONDS",
                upload_defaults.sweep_interval_seconds,
            ),
            stale_after_seconds: env_u64(
                "STALE_UPLOAD_AGE_SECONDS",
                upload_defaults.stale_after_seconds,
            ),
        };

        let storage_backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "s3" | "minio" => StorageBackend::S3,
            _ => StorageBackend::Local,
        };

        let storage_defaults = StorageConfig::default();
        let storage = StorageConfig {
            backend: storage_backend,
            bucket: std::env::var("STORAGE_BUCKET").unwrap_or(storage_defaults.bucket),
            local_storage_path: std::env::var("LOCAL_STORAGE_PATH")
                .unwrap_or(storage_defaults.local_storage_path),
            public_url: std::env::var("PUBLIC_URL").unwrap_or(storage_defaults.public_url),
            local_signing_secret: std::env::var("LOCAL_SIGNING_SECRET").ok(),
            s3_endpoint: std::env::var("S3_ENDPOINT").ok(),
            s3_region: std::env::var("S3_REGION").unwrap_or(storage_defaults.s3_region),
            s3_access_key: std::env::var("S3_ACCESS_KEY").ok(),
            s3_secret_key: std::env::var("S3_SECRET_KEY").ok(),
        };

        let mail_backend = match std::env::var("MAIL_BACKEND")
            .unwrap_or_else(|_| "log".to_string())
            .to_lowercase()
            .as_str()
        {
            "http" => MailBackend::Http,
            "smtp" => MailBackend::Smtp,
            _ => MailBackend::Log,
        };

        let smtp_tls = match std::env::var("SMTP_TLS")
            .unwrap_or_else(|_| "starttls".to_string())
            .to_lowercase()
            .as_str()
        {
            "tls" | "implicit" => SmtpTls::Tls,
            "none" | "off" => SmtpTls::None,
            _ => SmtpTls::StartTls,
        };

        let mail_defaults = MailConfig::default();
        let mail = MailConfig {
            backend: mail_backend,
            frontend_url: std::env::var("FRONTEND_URL").unwrap_or(mail_defaults.frontend_url),
            from: std::env::var("MAIL_FROM").unwrap_or(mail_defaults.from),
            relay_url: std::env::var("MAIL_RELAY_URL").ok(),
            smtp_host: std::env::var("SMTP_HOST").ok(),
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(mail_defaults.smtp_port),
            smtp_username: std::env::var("SMTP_USERNAME").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
            smtp_tls,
            timeout_seconds: env_u64("MAIL_TIMEOUT_SECONDS", mail_defaults.timeout_seconds),
            connect_timeout_seconds: env_u64(
                "MAIL_CONNECT_TIMEOUT_SECONDS",
                mail_defaults.connect_timeout_seconds,
            ),
        };

        let config = Config {
            auth,
            mail,
            node: NodeConfig {
                bind_address,
                data_dir,
            },
            storage,
            uploads,
            test_mode,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.bucket.is_empty() {
            return Err(ConfigError::ValidationError(
                "STORAGE_BUCKET cannot be empty".to_string(),
            ));
        }

        if matches!(self.storage.backend, StorageBackend::S3)
            && (self.storage.s3_endpoint.is_none()
                || self.storage.s3_access_key.is_none()
                || self.storage.s3_secret_key.is_none())
        {
            return Err(ConfigError::ValidationError(
                "S3_ENDPOINT, S3_ACCESS_KEY and S3_SECRET_KEY are required when STORAGE_BACKEND=s3"
                    .to_string(),
            ));
        }

        if matches!(self.mail.backend, MailBackend::Http) && self.mail.relay_url.is_none() {
            return Err(ConfigError::ValidationError(
                "MAIL_RELAY_URL is required when MAIL_BACKEND=http".to_string(),
            ));
        }

        if matches!(self.mail.backend, MailBackend::Smtp) && self.mail.smtp_host.is_none() {
            return Err(ConfigError::ValidationError(
                "SMTP_HOST is required when MAIL_BACKEND=smtp".to_string(),
            ));
        }

        if self.mail.smtp_username.is_some() != self.mail.smtp_password.is_some() {
            return Err(ConfigError::ValidationError(
                "SMTP_USERNAME and SMTP_PASSWORD must be set together".to_string(),
            ));
        }

        if self.mail.timeout_seconds == 0 || self.mail.connect_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "MAIL_TIMEOUT_SECONDS and MAIL_CONNECT_TIMEOUT_SECONDS must be greater than 0"
                    .to_string(),
            ));
        }

        if self.uploads.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.auth.token_ttl_seconds == 0 || self.auth.session_max_age_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "TOKEN_TTL_SECONDS and SESSION_MAX_AGE_SECONDS must be greater than 0".to_string(),
            ));
        }

        if matches!(self.storage.backend, StorageBackend::Local)
            && self.storage.local_signing_secret.is_none()
        {
            tracing::warn!(
                "LOCAL_SIGNING_SECRET is not set. Preview URLs will stop working on restart \
                 and cannot be shared between instances."
            );
        }

        Ok(())
    }
}
