//! Configuration types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, StashError, StashResult};
use crate::key::DEFAULT_DELIMITER;

/// Partition names reserved by the embedded store's bookkeeping.
pub const RESERVED_PARTITIONS: &[&str] = &["offsets", "feed"];

/// Top-level configuration for a stash deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    /// Separator between identifier and the rest of every key.
    pub key_delimiter: char,
    pub embedded: EmbeddedConfig,
    pub remote: RemoteConfig,
}

/// Local LMDB environment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedConfig {
    /// Directory holding the LMDB environment.
    pub path: PathBuf,
    /// Maximum environment size in megabytes.
    pub map_size_mb: usize,
    /// Maximum number of named sub-databases. Each partition uses two, plus
    /// the shared offsets and feed databases.
    pub max_partitions: u32,
    pub data_partition: String,
    /// Append a feed entry for every write.
    pub build_feed: bool,
    /// Keys fetched per read transaction during prefix scans.
    pub scan_page_size: usize,
    /// Base URL under which a local dashboard serves stored values.
    pub public_base_url: Option<Url>,
}

/// Which durable tier, if any, backs the embedded store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteConfig {
    /// Embedded store only.
    #[default]
    None,
    /// In-process object store. Contents vanish with the process.
    Memory,
    /// Object store rooted at a local directory.
    FileSystem {
        path: PathBuf,
        #[serde(default)]
        public_base_url: Option<Url>,
    },
    /// Amazon S3 or an S3-compatible endpoint.
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        /// Objects are publicly readable at `https://{bucket}/{key}`.
        #[serde(default)]
        public: bool,
        #[serde(default)]
        cors_enabled: bool,
    },
    /// A second LMDB environment used as the backup tier.
    LocalBackup { path: PathBuf },
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            key_delimiter: DEFAULT_DELIMITER,
            embedded: EmbeddedConfig::default(),
            remote: RemoteConfig::None,
        }
    }
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".stash"),
            map_size_mb: 1024,
            max_partitions: 64,
            data_partition: "data".to_string(),
            build_feed: true,
            scan_page_size: 256,
            public_base_url: None,
        }
    }
}

impl StashConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(document: &str) -> StashResult<Self> {
        let config: Self = toml::from_str(document).map_err(|e| ConfigError::InvalidValue {
            field: "toml".to_string(),
            value: format!("{} bytes", document.len()),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `STASH_*` environment variables, falling back to defaults.
    ///
    /// The result is not validated; call [`validate`](Self::validate).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let embedded_defaults = defaults.embedded;

        let embedded = EmbeddedConfig {
            path: env_var("STASH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(embedded_defaults.path),
            map_size_mb: env_parse("STASH_MAP_SIZE_MB").unwrap_or(embedded_defaults.map_size_mb),
            max_partitions: env_parse("STASH_MAX_PARTITIONS")
                .unwrap_or(embedded_defaults.max_partitions),
            data_partition: env_var("STASH_DATA_PARTITION")
                .unwrap_or(embedded_defaults.data_partition),
            build_feed: env_parse("STASH_BUILD_FEED").unwrap_or(embedded_defaults.build_feed),
            scan_page_size: env_parse("STASH_SCAN_PAGE_SIZE")
                .unwrap_or(embedded_defaults.scan_page_size),
            public_base_url: env_parse("STASH_PUBLIC_BASE_URL")
                .or(embedded_defaults.public_base_url),
        };

        let remote = match env_var("STASH_REMOTE").as_deref() {
            Some("memory") => RemoteConfig::Memory,
            Some("fs") | Some("filesystem") => RemoteConfig::FileSystem {
                path: env_var("STASH_REMOTE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(".stash-remote")),
                public_base_url: env_parse("STASH_REMOTE_PUBLIC_BASE_URL"),
            },
            Some("s3") => RemoteConfig::S3 {
                bucket: env_var("STASH_S3_BUCKET").unwrap_or_default(),
                region: env_var("STASH_S3_REGION"),
                endpoint: env_var("STASH_S3_ENDPOINT"),
                public: env_parse("STASH_S3_PUBLIC").unwrap_or(false),
                cors_enabled: env_parse("STASH_S3_CORS").unwrap_or(false),
            },
            Some("local") => RemoteConfig::LocalBackup {
                path: env_var("STASH_REMOTE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(".stash-backup")),
            },
            _ => defaults.remote,
        };

        Self {
            key_delimiter: env_parse("STASH_KEY_DELIMITER").unwrap_or(defaults.key_delimiter),
            embedded,
            remote,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StashResult<()> {
        if !self.key_delimiter.is_ascii_punctuation() || self.key_delimiter == '/' {
            return Err(invalid(
                "key_delimiter",
                self.key_delimiter,
                "key_delimiter must be ASCII punctuation other than '/'",
            ));
        }

        let embedded = &self.embedded;
        if embedded.map_size_mb == 0 {
            return Err(invalid(
                "embedded.map_size_mb",
                embedded.map_size_mb,
                "map_size_mb must be greater than 0",
            ));
        }
        if embedded.max_partitions < 4 {
            return Err(invalid(
                "embedded.max_partitions",
                embedded.max_partitions,
                "max_partitions must be at least 4 (data, content types, offsets, feed)",
            ));
        }
        if embedded.scan_page_size == 0 {
            return Err(invalid(
                "embedded.scan_page_size",
                embedded.scan_page_size,
                "scan_page_size must be greater than 0",
            ));
        }
        check_partition_name(&embedded.data_partition)?;

        match &self.remote {
            RemoteConfig::S3 {
                bucket,
                public,
                cors_enabled,
                ..
            } => {
                if bucket.is_empty() {
                    return Err(ConfigError::MissingRequired {
                        field: "remote.bucket".to_string(),
                    }
                    .into());
                }
                if *cors_enabled && !*public {
                    return Err(ConfigError::IncompatibleOptions {
                        option_a: "remote.cors_enabled = true".to_string(),
                        option_b: "remote.public = false".to_string(),
                    }
                    .into());
                }
            }
            RemoteConfig::LocalBackup { path } | RemoteConfig::FileSystem { path, .. } => {
                if path == &embedded.path {
                    return Err(ConfigError::IncompatibleOptions {
                        option_a: format!("embedded.path = {}", embedded.path.display()),
                        option_b: format!("remote.path = {}", path.display()),
                    }
                    .into());
                }
            }
            RemoteConfig::None | RemoteConfig::Memory => {}
        }

        Ok(())
    }
}

/// Reject identifiers containing the key delimiter.
pub fn check_identifier(identifier: &str, delimiter: char) -> StashResult<()> {
    if identifier.is_empty() {
        return Err(invalid("identifier", "", "identifier must not be empty"));
    }
    if identifier.contains(delimiter) {
        return Err(ConfigError::DelimiterCollision {
            identifier: identifier.to_string(),
            delimiter,
        }
        .into());
    }
    Ok(())
}

/// Reject empty or reserved partition names.
pub fn check_partition_name(name: &str) -> StashResult<()> {
    if name.is_empty() || RESERVED_PARTITIONS.contains(&name) || name.contains(':') {
        return Err(invalid(
            "partition",
            name,
            "partition names must be non-empty, contain no ':' and not be 'offsets' or 'feed'",
        ));
    }
    Ok(())
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> StashError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(StashConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_toml_str_s3() {
        let config = StashConfig::from_toml_str(
            r#"
            key_delimiter = ":"

            [embedded]
            path = "/var/lib/stash"
            build_feed = false

            [remote]
            kind = "s3"
            bucket = "results.example.com"
            public = true
            "#,
        )
        .expect("valid config should parse");
        assert_eq!(config.key_delimiter, ':');
        assert!(!config.embedded.build_feed);
        assert_eq!(config.embedded.scan_page_size, 256);
        match config.remote {
            RemoteConfig::S3 { bucket, public, .. } => {
                assert_eq!(bucket, "results.example.com");
                assert!(public);
            }
            other => panic!("expected S3 remote, got {:?}", other),
        }
    }

    #[test]
    fn test_from_toml_str_rejects_bad_delimiter() {
        let err = StashConfig::from_toml_str("key_delimiter = \"a\"")
            .expect_err("alphanumeric delimiter must be rejected");
        assert!(format!("{}", err).contains("key_delimiter"));
    }

    #[test]
    fn test_s3_requires_bucket() {
        let config = StashConfig {
            remote: RemoteConfig::S3 {
                bucket: String::new(),
                region: None,
                endpoint: None,
                public: false,
                cors_enabled: false,
            },
            ..Default::default()
        };
        let err = config.validate().expect_err("empty bucket must be rejected");
        assert!(matches!(
            err,
            StashError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_cors_requires_public() {
        let config = StashConfig {
            remote: RemoteConfig::S3 {
                bucket: "b".to_string(),
                region: None,
                endpoint: None,
                public: false,
                cors_enabled: true,
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StashError::Config(ConfigError::IncompatibleOptions { .. }))
        ));
    }

    #[test]
    fn test_backup_path_must_differ() {
        let config = StashConfig {
            remote: RemoteConfig::LocalBackup {
                path: PathBuf::from(".stash"),
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_check_identifier() {
        assert!(check_identifier("abc123", '_').is_ok());
        assert!(matches!(
            check_identifier("make_bigger", '_'),
            Err(StashError::Config(ConfigError::DelimiterCollision { .. }))
        ));
        assert!(check_identifier("", '_').is_err());
    }

    #[test]
    fn test_check_partition_name() {
        assert!(check_partition_name("words").is_ok());
        assert!(check_partition_name("feed").is_err());
        assert!(check_partition_name("offsets").is_err());
        assert!(check_partition_name("a:b").is_err());
    }
}
