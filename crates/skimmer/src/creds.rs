//! Credential resolution for the object store.
//!
//! The core never branches on credential *types* at call time. Each source
//! of credentials is its own provider, the set of providers is fixed at
//! configuration time, and callers only see the [`ResolveCredentials`]
//! capability. Resolution failure is fatal to the retrieval that asked.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Resolved credentials handed to the object store and forwarded to every
/// record callback.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

/// The one capability the rest of the crate knows about.
#[async_trait]
pub trait ResolveCredentials: std::fmt::Debug + Send + Sync {
    async fn resolve(&self) -> Result<Credentials>;
}

/// Explicit credentials straight from configuration.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    credentials: Credentials,
}

impl StaticProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl ResolveCredentials for StaticProvider {
    async fn resolve(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Credentials from the process environment.
///
/// Reads `{prefix}_ACCESS_KEY_ID`, `{prefix}_SECRET_ACCESS_KEY` and the
/// optional `{prefix}_SESSION_TOKEN`. The default prefix is `AWS`, matching
/// what serverless hosts export.
#[derive(Debug, Clone)]
pub struct EnvProvider {
    prefix: String,
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::with_prefix("AWS")
    }
}

impl EnvProvider {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn var(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }
}

#[async_trait]
impl ResolveCredentials for EnvProvider {
    async fn resolve(&self) -> Result<Credentials> {
        let access_key_id = std::env::var(self.var("ACCESS_KEY_ID"))
            .with_context(|| format!("{} is not set", self.var("ACCESS_KEY_ID")))?;
        let secret_access_key = std::env::var(self.var("SECRET_ACCESS_KEY"))
            .with_context(|| format!("{} is not set", self.var("SECRET_ACCESS_KEY")))?;
        let session_token = std::env::var(self.var("SESSION_TOKEN")).ok();
        Ok(Credentials {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Ordered list of providers; the first one that resolves wins.
#[derive(Debug, Clone)]
pub struct ChainProvider {
    links: Vec<ProviderBackend>,
}

impl ChainProvider {
    pub fn new(links: Vec<ProviderBackend>) -> Self {
        Self { links }
    }
}

#[async_trait]
impl ResolveCredentials for ChainProvider {
    async fn resolve(&self) -> Result<Credentials> {
        for link in &self.links {
            match link.resolve().await {
                Ok(credentials) => return Ok(credentials),
                Err(err) => debug!(provider = ?link, "provider did not resolve: {err:#}"),
            }
        }
        bail!(
            "none of the {} configured credential providers resolved",
            self.links.len()
        )
    }
}

/// Concrete provider dispatch, mirroring the backend enums elsewhere in the
/// crate: callers hold one of these and never care which source is inside.
#[derive(Debug, Clone)]
pub enum ProviderBackend {
    Static(StaticProvider),
    Env(EnvProvider),
    Chain(ChainProvider),
}

#[async_trait]
impl ResolveCredentials for ProviderBackend {
    async fn resolve(&self) -> Result<Credentials> {
        match self {
            ProviderBackend::Static(p) => p.resolve().await,
            ProviderBackend::Env(p) => p.resolve().await,
            ProviderBackend::Chain(p) => p.resolve().await,
        }
    }
}

/// Declarative provider selection for the config file.
///
/// ```toml
/// credentials = "env"
/// # or
/// [credentials.static]
/// access_key_id = "AKIA..."
/// secret_access_key = "..."
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialsConfig {
    Static(Credentials),
    Env,
    Chain(Vec<CredentialsConfig>),
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        CredentialsConfig::Env
    }
}

impl CredentialsConfig {
    pub fn build(&self) -> ProviderBackend {
        match self {
            CredentialsConfig::Static(credentials) => {
                ProviderBackend::Static(StaticProvider::new(credentials.clone()))
            }
            CredentialsConfig::Env => ProviderBackend::Env(EnvProvider::default()),
            CredentialsConfig::Chain(links) => ProviderBackend::Chain(ChainProvider::new(
                links.iter().map(CredentialsConfig::build).collect(),
            )),
        }
    }
}
