use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    Authentication, BasicAuthentication, NoAuthentication, SigV4Authentication, SigV4Signer,
};
use crate::client::HttpParams;
use crate::pool::{PoolConfig, Scheme, SchemeRegistry, SocketFactory, TcpOptions};

/// Client settings that stay fixed for the facade's lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Wrap clients in the decompressing decorator
    #[serde(default = "default_gzip")]
    pub gzip: bool,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_gzip() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    HttpParams::default().user_agent
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            gzip: default_gzip(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Pool settings carried across restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSection {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
}

fn default_idle_timeout() -> u64 {
    90
}

fn default_max_idle_per_host() -> usize {
    1024
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            max_idle_per_host: default_max_idle_per_host(),
        }
    }
}

/// One transport scheme and its socket options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemeSection {
    pub name: String,

    pub default_port: u16,

    #[serde(default)]
    pub tls: bool,

    /// Skip TLS certificate verification (like curl --insecure)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// TCP keep-alive in seconds (0 = disabled)
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_keepalive() -> u64 {
    90
}

fn default_nodelay() -> bool {
    true
}

impl SchemeSection {
    fn to_scheme(&self) -> Scheme {
        let tcp = TcpOptions {
            connect_timeout: Some(Duration::from_secs(self.connect_timeout_secs)),
            keepalive: (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs)),
            nodelay: self.nodelay,
        };
        let factory = if self.tls {
            SocketFactory::Tls {
                tcp,
                accept_invalid_certs: self.accept_invalid_certs,
            }
        } else {
            SocketFactory::Plain(tcp)
        };
        Scheme::new(self.name.clone(), self.default_port, factory)
    }
}

/// Authentication applied to every client the facade builds
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthSection {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Sigv4 {
        access_key: String,
        secret_key: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default = "default_service")]
        service: String,
    },
}

impl std::fmt::Debug for AuthSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthSection::None => f.write_str("None"),
            AuthSection::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            AuthSection::Sigv4 {
                access_key,
                region,
                service,
                ..
            } => f
                .debug_struct("Sigv4")
                .field("access_key", access_key)
                .field("region", region)
                .field("service", service)
                .finish_non_exhaustive(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_service() -> String {
    "s3".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientSection,

    #[serde(default)]
    pub pool: PoolSection,

    /// Supported schemes; empty means http on 80 and https on 443
    #[serde(default)]
    pub schemes: Vec<SchemeSection>,

    #[serde(default)]
    pub auth: AuthSection,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn http_params(&self) -> HttpParams {
        HttpParams {
            request_timeout: Duration::from_secs(self.client.request_timeout_secs),
            user_agent: self.client.user_agent.clone(),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            idle_timeout: Duration::from_secs(self.pool.idle_timeout_secs),
            max_idle_per_host: self.pool.max_idle_per_host,
        }
    }

    pub fn scheme_registry(&self) -> SchemeRegistry {
        if self.schemes.is_empty() {
            SchemeRegistry::with_defaults()
        } else {
            self.schemes.iter().map(SchemeSection::to_scheme).collect()
        }
    }

    pub fn authentication(&self) -> Result<Arc<dyn Authentication>> {
        let auth: Arc<dyn Authentication> = match &self.auth {
            AuthSection::None => Arc::new(NoAuthentication),
            AuthSection::Basic { username, password } => {
                if username.is_empty() {
                    anyhow::bail!("Basic authentication requires a username");
                }
                Arc::new(BasicAuthentication::new(username.clone(), password))
            }
            AuthSection::Sigv4 {
                access_key,
                secret_key,
                region,
                service,
            } => Arc::new(SigV4Authentication::new(SigV4Signer::new(
                access_key.clone(),
                secret_key,
                Some(region.clone()),
                service.clone(),
            ))),
        };
        Ok(auth)
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config = serde_yaml::from_str(&content)
        .context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables
///
/// - RHTTP_GZIP (true/1 to enable, default true)
/// - RHTTP_REQUEST_TIMEOUT (seconds)
/// - RHTTP_USER_AGENT
/// - RHTTP_BASIC_USER / RHTTP_BASIC_PASSWORD
/// - AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY / AWS_REGION / RHTTP_SIGV4_SERVICE
///
/// Basic credentials take precedence over AWS credentials.
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let mut config = Config::new();

    if let Ok(gzip) = std::env::var("RHTTP_GZIP") {
        config.client.gzip = gzip == "true" || gzip == "1";
    }

    if let Ok(timeout) = std::env::var("RHTTP_REQUEST_TIMEOUT") {
        config.client.request_timeout_secs = timeout
            .parse()
            .context(format!("Invalid RHTTP_REQUEST_TIMEOUT: {}", timeout))?;
    }

    if let Ok(agent) = std::env::var("RHTTP_USER_AGENT") {
        config.client.user_agent = agent;
    }

    if let Ok(username) = std::env::var("RHTTP_BASIC_USER") {
        let password = std::env::var("RHTTP_BASIC_PASSWORD")
            .context("RHTTP_BASIC_USER is set but RHTTP_BASIC_PASSWORD is not")?;
        config.auth = AuthSection::Basic { username, password };
    } else if let Ok(access_key) = std::env::var("AWS_ACCESS_KEY_ID") {
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_ACCESS_KEY_ID is set but AWS_SECRET_ACCESS_KEY is not")?;
        config.auth = AuthSection::Sigv4 {
            access_key,
            secret_key,
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| default_region()),
            service: std::env::var("RHTTP_SIGV4_SERVICE").unwrap_or_else(|_| default_service()),
        };
    }

    Ok(config)
}

/// Load configuration from a YAML file, or from the environment when no
/// path is given
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    match config_path {
        Some(path) => load_from_yaml(path),
        None => load_from_env(),
    }
}
