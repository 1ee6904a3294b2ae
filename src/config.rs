//! Environment-driven configuration.
//!
//! All settings come from `PAIRGATE_*` environment variables (a `.env` file is
//! honored via `dotenvy` in the binary). The working storage backend and the
//! archive destinations are both selected here; everything downstream is
//! written against the adapter trait and never inspects the backend kind.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::connection::ReconnectPolicy;
use crate::error::ConfigError;

/// Storage backend kinds selectable by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-memory map; working state only survives the process.
    Memory,
    /// Blobs as files under a root directory.
    Fs,
    /// Named objects in an S3-compatible bucket.
    S3,
    /// Rows in a PostgreSQL table keyed by a session identifier field.
    #[cfg(feature = "postgres")]
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "fs" | "file" | "filesystem" => Ok(Self::Fs),
            "s3" => Ok(Self::S3),
            #[cfg(feature = "postgres")]
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Fs => write!(f, "fs"),
            Self::S3 => write!(f, "s3"),
            #[cfg(feature = "postgres")]
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

/// Connection settings for the S3-compatible backend.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Endpoint base URL, e.g. `https://s3.us-east-1.amazonaws.com` or a
    /// MinIO address.
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Key prefix prepended to every object written by this service.
    pub key_prefix: String,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP boundary binds to.
    pub bind_addr: SocketAddr,
    /// Backend for per-attempt working session state.
    pub storage_backend: StorageBackend,
    /// Root directory for the `fs` working backend.
    pub data_dir: PathBuf,
    /// Root directory for the `fs` archive destination.
    pub archive_dir: PathBuf,
    /// Long-term archive destinations, in configured order.
    pub archive_backends: Vec<StorageBackend>,
    /// PostgreSQL connection string (required when the backend is `postgres`).
    pub database_url: Option<String>,
    /// S3 settings (required when any selected backend is `s3`).
    pub s3: Option<S3Config>,
    /// Prefix prepended to every minted session identifier.
    pub session_prefix: String,
    /// Delay applied before pairing-code issuance and before upload so
    /// trailing credential updates from the client can land.
    pub settle_delay: Duration,
    /// Backoff policy for transient reconnects.
    pub reconnect: ReconnectPolicy,
    /// Optional media URL sent alongside the link confirmation message.
    pub welcome_media_url: Option<String>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = parse_var("PAIRGATE_BIND", "127.0.0.1:3000")?;
        let storage_backend: StorageBackend = env_var("PAIRGATE_STORAGE")
            .as_deref()
            .unwrap_or("memory")
            .parse()?;
        let archive_backends = parse_backend_list(
            env_var("PAIRGATE_ARCHIVE").as_deref().unwrap_or("fs"),
        )?;

        let database_url = env_var("PAIRGATE_DATABASE_URL");
        #[cfg(feature = "postgres")]
        {
            let wants_postgres = storage_backend == StorageBackend::Postgres
                || archive_backends.contains(&StorageBackend::Postgres);
            if wants_postgres && database_url.is_none() {
                return Err(ConfigError::MissingEnvVar(
                    "PAIRGATE_DATABASE_URL".to_string(),
                ));
            }
        }

        let wants_s3 = storage_backend == StorageBackend::S3
            || archive_backends.contains(&StorageBackend::S3);
        let s3 = if wants_s3 { Some(s3_from_env()?) } else { None };

        let settle_delay =
            Duration::from_millis(parse_var("PAIRGATE_SETTLE_DELAY_MS", "4000")?);

        let mut reconnect = ReconnectPolicy::default();
        if let Some(v) = env_var("PAIRGATE_RECONNECT_MAX_ATTEMPTS") {
            reconnect.max_attempts = parse_value("PAIRGATE_RECONNECT_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = env_var("PAIRGATE_RECONNECT_BASE_DELAY_MS") {
            reconnect.base_delay_ms = parse_value("PAIRGATE_RECONNECT_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = env_var("PAIRGATE_RECONNECT_MAX_DELAY_MS") {
            reconnect.max_delay_ms = parse_value("PAIRGATE_RECONNECT_MAX_DELAY_MS", &v)?;
        }

        Ok(Self {
            bind_addr,
            storage_backend,
            data_dir: env_var("PAIRGATE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            archive_dir: env_var("PAIRGATE_ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./archives")),
            archive_backends,
            database_url,
            s3,
            session_prefix: env_var("PAIRGATE_SESSION_PREFIX")
                .unwrap_or_else(|| "PAIRGATE~".to_string()),
            settle_delay,
            reconnect,
            welcome_media_url: env_var("PAIRGATE_WELCOME_MEDIA_URL"),
        })
    }
}

/// Read an environment variable, treating empty values as unset.
fn env_var(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Read and parse an environment variable with a default.
fn parse_var<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env_var(key).unwrap_or_else(|| default.to_string());
    parse_value(key, &raw)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parse a comma-separated list of backend names.
fn parse_backend_list(raw: &str) -> Result<Vec<StorageBackend>, ConfigError> {
    let mut backends = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let backend = part.parse()?;
        if !backends.contains(&backend) {
            backends.push(backend);
        }
    }
    Ok(backends)
}

fn s3_from_env() -> Result<S3Config, ConfigError> {
    let require = |key: &str| {
        env_var(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    };
    Ok(S3Config {
        endpoint: require("PAIRGATE_S3_ENDPOINT")?,
        region: env_var("PAIRGATE_S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        bucket: require("PAIRGATE_S3_BUCKET")?,
        access_key_id: require("PAIRGATE_S3_ACCESS_KEY_ID")?,
        secret_access_key: require("PAIRGATE_S3_SECRET_ACCESS_KEY")?,
        key_prefix: env_var("PAIRGATE_S3_PREFIX").unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!(
            "memory".parse::<StorageBackend>().unwrap(),
            StorageBackend::Memory
        );
        assert_eq!("FS".parse::<StorageBackend>().unwrap(), StorageBackend::Fs);
        assert_eq!("s3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert!("mongo".parse::<StorageBackend>().is_err());
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_backend_from_str_postgres() {
        assert_eq!(
            "postgresql".parse::<StorageBackend>().unwrap(),
            StorageBackend::Postgres
        );
    }

    #[test]
    fn test_parse_backend_list_dedupes_and_trims() {
        let backends = parse_backend_list(" fs , s3, fs ").unwrap();
        assert_eq!(backends, vec![StorageBackend::Fs, StorageBackend::S3]);
    }

    #[test]
    fn test_parse_backend_list_rejects_unknown() {
        assert!(parse_backend_list("fs,redis").is_err());
    }

    #[test]
    fn test_parse_backend_list_empty_is_empty() {
        assert!(parse_backend_list("").unwrap().is_empty());
    }
}
