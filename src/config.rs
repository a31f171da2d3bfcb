use crate::services::{
    keys::{DEFAULT_KEY_PREFIX, KeyPolicy},
    scratch::ScratchDir,
    upload_service::{RegionSource, UploadServiceConfig},
    validation::{DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_MAX_UPLOAD_BYTES, UploadPolicy},
};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{collections::BTreeSet, env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendKind {
    S3,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyPolicyKind {
    Raw,
    Unique,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RegionSourceKind {
    Lookup,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecentUploadsKind {
    Off,
    Memory,
    Sqlite,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub region: String,
    pub storage_backend: StorageBackendKind,
    pub local_storage_dir: String,
    pub s3_endpoint: Option<String>,
    pub allowed_extensions: BTreeSet<String>,
    /// `None` disables the size check.
    pub max_upload_bytes: Option<u64>,
    pub key_policy: KeyPolicy,
    pub scratch_dir: Option<String>,
    pub public_read: bool,
    pub region_source: RegionSourceKind,
    pub presign_expiry: Duration,
    pub forward_timeout: Duration,
    pub recent_uploads: RecentUploadsKind,
    pub database_url: String,
    pub cors_origins: Vec<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Validates file uploads and forwards them to S3")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_RELAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_RELAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Destination bucket (overrides UPLOAD_RELAY_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides UPLOAD_RELAY_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Storage backend (overrides UPLOAD_RELAY_STORAGE_BACKEND)
    #[arg(long, value_enum)]
    pub storage_backend: Option<StorageBackendKind>,

    /// Root directory for the local backend (overrides UPLOAD_RELAY_LOCAL_STORAGE_DIR)
    #[arg(long)]
    pub local_storage_dir: Option<String>,

    /// Custom S3-compatible endpoint (overrides UPLOAD_RELAY_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Comma-separated extension allow-list (overrides UPLOAD_RELAY_ALLOWED_EXTENSIONS)
    #[arg(long)]
    pub allowed_extensions: Option<String>,

    /// Size ceiling in bytes, 0 disables (overrides UPLOAD_RELAY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Key construction policy (overrides UPLOAD_RELAY_KEY_POLICY)
    #[arg(long, value_enum)]
    pub key_policy: Option<KeyPolicyKind>,

    /// Key prefix for the unique policy (overrides UPLOAD_RELAY_KEY_PREFIX)
    #[arg(long)]
    pub key_prefix: Option<String>,

    /// Write uploads here before forwarding (overrides UPLOAD_RELAY_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<String>,

    /// Store objects with a public-read ACL (overrides UPLOAD_RELAY_PUBLIC_READ)
    #[arg(long)]
    pub public_read: Option<bool>,

    /// Where public URLs get their region (overrides UPLOAD_RELAY_REGION_SOURCE)
    #[arg(long, value_enum)]
    pub region_source: Option<RegionSourceKind>,

    /// Presigned URL lifetime in seconds (overrides UPLOAD_RELAY_PRESIGN_EXPIRY_SECS)
    #[arg(long)]
    pub presign_expiry_secs: Option<u64>,

    /// Storage call timeout in seconds (overrides UPLOAD_RELAY_FORWARD_TIMEOUT_SECS)
    #[arg(long)]
    pub forward_timeout_secs: Option<u64>,

    /// Recent-uploads log (overrides UPLOAD_RELAY_RECENT_UPLOADS)
    #[arg(long, value_enum)]
    pub recent_uploads: Option<RecentUploadsKind>,

    /// Database URL (overrides UPLOAD_RELAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Comma-separated CORS origins, `*` for any (overrides UPLOAD_RELAY_CORS_ORIGINS)
    #[arg(long)]
    pub cors_origins: Option<String>,

    /// Run migrations and exit (the SQLite log also applies them at startup)
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        Self::from_sources(args, |name| env::var(name).ok())
    }

    /// Merge CLI args over values from `lookup`, then defaults.
    pub fn from_sources(
        args: Args,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, bool)> {
        let env = EnvSource { lookup: &lookup };

        let bucket = args
            .bucket
            .or_else(|| env.string("UPLOAD_RELAY_BUCKET"))
            .filter(|bucket| !bucket.trim().is_empty())
            .context("UPLOAD_RELAY_BUCKET (or --bucket) must be set")?;

        let allowed_extensions = parse_extensions(
            &args
                .allowed_extensions
                .or_else(|| env.string("UPLOAD_RELAY_ALLOWED_EXTENSIONS"))
                .unwrap_or_else(|| DEFAULT_ALLOWED_EXTENSIONS.join(",")),
        )?;

        let max_upload_bytes = match args.max_upload_bytes {
            Some(value) => value,
            None => env.parsed("UPLOAD_RELAY_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        };

        let key_policy_kind = match args.key_policy {
            Some(kind) => kind,
            None => env.value_enum("UPLOAD_RELAY_KEY_POLICY", KeyPolicyKind::Unique)?,
        };
        let key_prefix = args
            .key_prefix
            .or_else(|| env.string("UPLOAD_RELAY_KEY_PREFIX"))
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
        let key_policy = match key_policy_kind {
            KeyPolicyKind::Raw => KeyPolicy::Raw,
            KeyPolicyKind::Flat => KeyPolicy::Flat,
            KeyPolicyKind::Unique => KeyPolicy::unique_with_prefix(&key_prefix)
                .with_context(|| format!("invalid key prefix `{}`", key_prefix))?,
        };

        // --- Merge ---
        let cfg = Self {
            host: args
                .host
                .or_else(|| env.string("UPLOAD_RELAY_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: match args.port {
                Some(port) => port,
                None => env.parsed("UPLOAD_RELAY_PORT", 5000)?,
            },
            bucket,
            region: args
                .region
                .or_else(|| env.string("UPLOAD_RELAY_REGION"))
                .unwrap_or_else(|| "us-east-1".into()),
            storage_backend: match args.storage_backend {
                Some(kind) => kind,
                None => env.value_enum("UPLOAD_RELAY_STORAGE_BACKEND", StorageBackendKind::S3)?,
            },
            local_storage_dir: args
                .local_storage_dir
                .or_else(|| env.string("UPLOAD_RELAY_LOCAL_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            s3_endpoint: args
                .s3_endpoint
                .or_else(|| env.string("UPLOAD_RELAY_S3_ENDPOINT")),
            allowed_extensions,
            max_upload_bytes: (max_upload_bytes > 0).then_some(max_upload_bytes),
            key_policy,
            scratch_dir: args
                .scratch_dir
                .or_else(|| env.string("UPLOAD_RELAY_SCRATCH_DIR")),
            public_read: match args.public_read {
                Some(flag) => flag,
                None => env.parsed("UPLOAD_RELAY_PUBLIC_READ", false)?,
            },
            region_source: match args.region_source {
                Some(kind) => kind,
                None => env.value_enum("UPLOAD_RELAY_REGION_SOURCE", RegionSourceKind::Lookup)?,
            },
            presign_expiry: Duration::from_secs(match args.presign_expiry_secs {
                Some(secs) => secs,
                None => env.parsed("UPLOAD_RELAY_PRESIGN_EXPIRY_SECS", 3600)?,
            }),
            forward_timeout: Duration::from_secs(match args.forward_timeout_secs {
                Some(secs) => secs,
                None => env.parsed("UPLOAD_RELAY_FORWARD_TIMEOUT_SECS", 30)?,
            }),
            recent_uploads: match args.recent_uploads {
                Some(kind) => kind,
                None => env.value_enum("UPLOAD_RELAY_RECENT_UPLOADS", RecentUploadsKind::Sqlite)?,
            },
            database_url: args
                .database_url
                .or_else(|| env.string("UPLOAD_RELAY_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/upload_relay.db".into()),
            cors_origins: args
                .cors_origins
                .or_else(|| env.string("UPLOAD_RELAY_CORS_ORIGINS"))
                .unwrap_or_else(|| "*".into())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
        };

        if cfg.forward_timeout.is_zero() {
            bail!("UPLOAD_RELAY_FORWARD_TIMEOUT_SECS must be greater than zero");
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Pipeline settings derived from this configuration.
    pub fn upload_service_config(&self) -> UploadServiceConfig {
        UploadServiceConfig {
            bucket: self.bucket.clone(),
            policy: UploadPolicy {
                allowed_extensions: self.allowed_extensions.clone(),
                max_upload_bytes: self.max_upload_bytes,
            },
            key_policy: self.key_policy.clone(),
            scratch: self.scratch_dir.as_ref().map(|dir| ScratchDir::new(PathBuf::from(dir))),
            public_read: self.public_read,
            region_source: match self.region_source {
                RegionSourceKind::Lookup => RegionSource::Lookup,
                RegionSourceKind::Static => RegionSource::Static(self.region.clone()),
            },
            presign_expiry: self.presign_expiry,
            forward_timeout: self.forward_timeout,
        }
    }
}

/// Split a comma-separated allow-list into lower-case extensions.
pub fn parse_extensions(raw: &str) -> Result<BTreeSet<String>> {
    let extensions: BTreeSet<String> = raw
        .split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect();
    if extensions.is_empty() {
        bail!("allowed extensions list is empty");
    }
    if let Some(bad) = extensions.iter().find(|ext| ext.contains(['.', '/', '\\'])) {
        bail!("invalid extension `{}` in allow-list", bad);
    }
    Ok(extensions)
}

struct EnvSource<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }

    fn parsed<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.string(name) {
            Some(value) => value
                .trim()
                .parse::<T>()
                .map_err(|err| anyhow::anyhow!("{}", err))
                .with_context(|| format!("parsing {} value `{}`", name, value)),
            None => Ok(default),
        }
    }

    fn value_enum<T: ValueEnum>(&self, name: &str, default: T) -> Result<T> {
        match self.string(name) {
            Some(value) => T::from_str(value.trim(), true)
                .map_err(|err| anyhow::anyhow!("{}", err))
                .with_context(|| format!("parsing {} value `{}`", name, value)),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)], args: Args) -> Result<(AppConfig, bool)> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_sources(args, |name| vars.get(name).cloned())
    }

    #[test]
    fn missing_bucket_is_fatal() {
        let err = load(&[], Args::default()).unwrap_err();
        assert!(err.to_string().contains("UPLOAD_RELAY_BUCKET"));

        assert!(load(&[("UPLOAD_RELAY_BUCKET", "  ")], Args::default()).is_err());
    }

    #[test]
    fn defaults_apply() {
        let (cfg, migrate) = load(&[("UPLOAD_RELAY_BUCKET", "mybucket")], Args::default()).unwrap();
        assert!(!migrate);
        assert_eq!(cfg.addr(), "0.0.0.0:5000");
        assert_eq!(cfg.max_upload_bytes, Some(5 * 1024 * 1024));
        assert_eq!(cfg.key_policy, KeyPolicy::default());
        assert_eq!(cfg.storage_backend, StorageBackendKind::S3);
        assert_eq!(cfg.recent_uploads, RecentUploadsKind::Sqlite);
        assert!(!cfg.public_read);
        assert!(cfg.scratch_dir.is_none());
        assert_eq!(cfg.cors_origins, vec!["*"]);
        assert_eq!(
            cfg.allowed_extensions.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["gif", "jpeg", "jpg", "png"]
        );
    }

    #[test]
    fn cli_overrides_env() {
        let args = Args {
            bucket: Some("from-cli".into()),
            port: Some(8080),
            key_policy: Some(KeyPolicyKind::Raw),
            ..Args::default()
        };
        let (cfg, _) = load(
            &[
                ("UPLOAD_RELAY_BUCKET", "from-env"),
                ("UPLOAD_RELAY_PORT", "9000"),
                ("UPLOAD_RELAY_KEY_POLICY", "flat"),
            ],
            args,
        )
        .unwrap();
        assert_eq!(cfg.bucket, "from-cli");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.key_policy, KeyPolicy::Raw);
    }

    #[test]
    fn env_values_are_parsed() {
        let (cfg, _) = load(
            &[
                ("UPLOAD_RELAY_BUCKET", "mybucket"),
                ("UPLOAD_RELAY_MAX_UPLOAD_BYTES", "0"),
                ("UPLOAD_RELAY_KEY_POLICY", "Unique"),
                ("UPLOAD_RELAY_KEY_PREFIX", "media/images"),
                ("UPLOAD_RELAY_PUBLIC_READ", "true"),
                ("UPLOAD_RELAY_REGION_SOURCE", "static"),
                ("UPLOAD_RELAY_REGION", "eu-central-1"),
                ("UPLOAD_RELAY_SCRATCH_DIR", "/tmp/uploads"),
                ("UPLOAD_RELAY_CORS_ORIGINS", "https://a.example, https://b.example"),
            ],
            Args::default(),
        )
        .unwrap();
        assert_eq!(cfg.max_upload_bytes, None);
        assert_eq!(
            cfg.key_policy,
            KeyPolicy::Unique {
                prefix: "media/images/".into()
            }
        );
        assert_eq!(cfg.cors_origins.len(), 2);

        let service = cfg.upload_service_config();
        assert!(service.public_read);
        assert_eq!(service.region_source, RegionSource::Static("eu-central-1".into()));
        assert!(service.scratch.is_some());
        assert!(service.policy.max_upload_bytes.is_none());
    }

    #[test]
    fn bad_values_are_reported() {
        for (name, value) in [
            ("UPLOAD_RELAY_PORT", "not-a-port"),
            ("UPLOAD_RELAY_KEY_POLICY", "random"),
            ("UPLOAD_RELAY_KEY_PREFIX", "../escape"),
            ("UPLOAD_RELAY_FORWARD_TIMEOUT_SECS", "0"),
            ("UPLOAD_RELAY_ALLOWED_EXTENSIONS", " , "),
        ] {
            let result = load(&[("UPLOAD_RELAY_BUCKET", "b"), (name, value)], Args::default());
            assert!(result.is_err(), "{name}={value} should fail");
        }
    }

    #[test]
    fn extension_list_is_normalized() {
        let exts = parse_extensions(".PNG, jpg ,,webp").unwrap();
        assert_eq!(
            exts.into_iter().collect::<Vec<_>>(),
            vec!["jpg", "png", "webp"]
        );
        assert!(parse_extensions("tar.gz").is_err());
    }
}
