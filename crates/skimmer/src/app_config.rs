//! Application configuration.
//!
//! Env vars are the base layer (every `SKIMMER_*` variable is considered),
//! an optional TOML file is merged on top and wins on conflicts. Section
//! structs live with the modules they configure; this file only assembles
//! them.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::creds::CredentialsConfig;
use crate::search::SearchConfig;
use crate::store::HttpStoreConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Object store the log objects are read from.
    pub store: HttpStoreConfig,
    /// Search index records are written to.
    pub search: SearchConfig,
    /// How store credentials are resolved. Defaults to the process
    /// environment.
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Load configuration from the environment plus an optional TOML file.
///
/// - `None` → env vars only.
/// - `Some(path)` → env vars and the file, merged; the file wins.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "loading configuration: {:?}",
        config_file_name.unwrap_or(Path::new("<env only>"))
    );

    let config = Figment::new().merge(Env::prefixed("SKIMMER_"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    config
        .extract()
        .context("configuration is incomplete or unparseable")
}
