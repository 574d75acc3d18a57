use crate::{
    client::orchestrator::DEFAULT_MAX_SESSION_AGE_DAYS,
    models::upload::UploadKind,
    services::upload_service::{DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PRESIGN_EXPIRY, UploadPolicy},
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "RESUMABLE_UPLOAD";

/// Command-line interface. Every server/client option can also come from a
/// `RESUMABLE_UPLOAD_*` environment variable; flags win over the environment.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable multipart uploads to S3-compatible storage")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the presign/complete API
    Serve(ServeArgs),
    /// Upload a file, resuming a previous attempt for the same target if possible
    Upload(UploadArgs),
    /// Abort the in-flight multipart upload for a target
    Abort(AbortArgs),
    /// Create the local session database and exit
    Migrate(ClientArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Host to bind to (overrides RESUMABLE_UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RESUMABLE_UPLOAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// `s3` or `local` (overrides RESUMABLE_UPLOAD_STORE)
    #[arg(long)]
    pub store: Option<StoreKind>,

    /// S3-compatible endpoint, e.g. https://s3.us-west-004.backblazeb2.com
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    #[arg(long)]
    pub s3_region: Option<String>,

    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Base URL objects are publicly served from
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// First segment of every object key
    #[arg(long)]
    pub key_domain: Option<String>,

    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Comma-separated origins allowed to call the API, or `*`
    #[arg(long, value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ClientArgs {
    /// Upload API base URL (overrides RESUMABLE_UPLOAD_API_URL)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Session database URL (overrides RESUMABLE_UPLOAD_SESSION_DB)
    #[arg(long)]
    pub session_db: Option<String>,

    /// Days after which a stored session is restarted rather than resumed
    #[arg(long)]
    pub max_session_age_days: Option<i64>,
}

#[derive(clap::Args, Debug)]
pub struct TargetArgs {
    /// Owner address (0x-prefixed)
    #[arg(long)]
    pub owner: String,

    /// Context id, e.g. the export id; `/` separates nested ids
    #[arg(long)]
    pub context_id: String,

    /// `video` or `thumbnail`
    #[arg(long)]
    pub kind: UploadKind,
}

#[derive(clap::Args, Debug)]
pub struct UploadArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Override the content type guessed from the file extension
    #[arg(long)]
    pub content_type: Option<String>,

    pub file: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct AbortArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    S3,
    Local,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(StoreKind::S3),
            "local" => Ok(StoreKind::Local),
            other => Err(format!("unknown store `{}` (expected s3 or local)", other)),
        }
    }
}

/// Connection settings for an S3-compatible store.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub public_base_url: Option<String>,
}

/// Server configuration: CLI args merged over environment over defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    pub s3: S3Config,
    pub public_base_url: Option<String>,
    pub key_domain: String,
    pub max_upload_bytes: u64,
    pub presign_expiry: Duration,
    pub cors_origins: Vec<String>,
}

/// Client configuration for the `upload`/`abort`/`migrate` commands.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub session_db: String,
    pub max_session_age: chrono::Duration,
}

fn env_key(name: &str) -> String {
    format!("{}_{}", ENV_PREFIX, name)
}

fn env_string(name: &str) -> Option<String> {
    env::var(env_key(name)).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = env_key(name);
    match env::var(&key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

impl ServerConfig {
    pub fn from_env_and_args(args: ServeArgs) -> Result<Self> {
        let host = args
            .host
            .or_else(|| env_string("HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match args.port {
            Some(port) => port,
            None => env_parse::<u16>("PORT")?.unwrap_or(3000),
        };
        let store = match args.store {
            Some(store) => store,
            None => env_parse::<StoreKind>("STORE")?.unwrap_or(StoreKind::S3),
        };
        let public_base_url = args.public_base_url.or_else(|| env_string("PUBLIC_BASE_URL"));

        let s3 = S3Config {
            endpoint: args.s3_endpoint.or_else(|| env_string("S3_ENDPOINT")),
            region: args
                .s3_region
                .or_else(|| env_string("S3_REGION"))
                .unwrap_or_else(|| "us-west-004".into()),
            bucket: args
                .s3_bucket
                .or_else(|| env_string("S3_BUCKET"))
                .unwrap_or_default(),
            // Credentials are only read from the environment.
            access_key: env_string("S3_ACCESS_KEY"),
            secret_key: env_string("S3_SECRET_KEY"),
            public_base_url: public_base_url.clone(),
        };

        let max_upload_bytes = match args.max_upload_bytes {
            Some(max) => max,
            None => env_parse::<u64>("MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };
        let presign_expiry = env_parse::<u64>("PRESIGN_EXPIRY_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PRESIGN_EXPIRY);
        let cors_origins = args
            .cors_origins
            .or_else(|| {
                env_string("CORS_ORIGINS")
                    .map(|v| v.split(',').map(|o| o.trim().to_string()).collect())
            })
            .unwrap_or_else(|| vec!["*".to_string()]);

        let cfg = Self {
            host,
            port,
            store,
            s3,
            public_base_url,
            key_domain: args
                .key_domain
                .or_else(|| env_string("KEY_DOMAIN"))
                .unwrap_or_else(|| "uploads".into()),
            max_upload_bytes,
            presign_expiry,
            cors_origins,
        };

        if cfg.store == StoreKind::S3 && cfg.s3.bucket.is_empty() {
            anyhow::bail!("an S3 bucket is required (--s3-bucket or {})", env_key("S3_BUCKET"));
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address the local store embeds in its presigned and public URLs.
    pub fn local_base_url(&self) -> String {
        self.public_base_url.clone().unwrap_or_else(|| {
            let host = match self.host.as_str() {
                "0.0.0.0" | "::" => "127.0.0.1",
                other => other,
            };
            format!("http://{}:{}", host, self.port)
        })
    }

    pub fn policy(&self) -> UploadPolicy {
        UploadPolicy {
            key_domain: self.key_domain.clone(),
            max_upload_bytes: self.max_upload_bytes,
            presign_expiry: self.presign_expiry,
        }
    }
}

impl ClientConfig {
    pub fn from_env_and_args(args: ClientArgs) -> Result<Self> {
        let max_session_age_days = match args.max_session_age_days {
            Some(days) => days,
            None => env_parse::<i64>("MAX_SESSION_AGE_DAYS")?
                .unwrap_or(DEFAULT_MAX_SESSION_AGE_DAYS),
        };
        if max_session_age_days < 1 {
            anyhow::bail!("session age limit must be at least one day");
        }

        Ok(Self {
            api_url: args
                .api_url
                .or_else(|| env_string("API_URL"))
                .unwrap_or_else(|| "http://127.0.0.1:3000".into()),
            session_db: args
                .session_db
                .or_else(|| env_string("SESSION_DB"))
                .unwrap_or_else(|| "sqlite://./data/sessions.db".into()),
            max_session_age: chrono::Duration::days(max_session_age_days),
        })
    }
}
