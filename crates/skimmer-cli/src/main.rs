//! skimmer-cli — thin front end over the library: set up logging, load
//! config, ingest one log object, report how it went.
//!
//! Usage: `skimmer-cli <container> <key> [Array|Lines] [config-path]`

use anyhow::{Context, Result};
use skimmer::dispatch::{LogFormat, LogReference};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (Some(container), Some(key)) = (args.get(1), args.get(2)) else {
        eprintln!("usage: skimmer-cli <container> <key> [Array|Lines] [config-path]");
        std::process::exit(2);
    };
    let format = match args.get(3) {
        Some(name) => serde_json::from_value::<LogFormat>(serde_json::Value::String(
            name.to_string(),
        ))
        .with_context(|| format!("'{name}' is not a recognized log format"))?,
        None => LogFormat::default(),
    };

    // Config file is optional; env vars alone can carry the whole config.
    let path_arg = args.get(4).map(String::as_str).unwrap_or("skimmer.toml");
    let config_file = std::path::Path::new(path_arg);
    let config_file = match config_file.try_exists().with_context(|| {
        format!(
            "could not check whether the configuration file exists; \
             if you are using a relative path, try an absolute one: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None,
    };

    let app_config = skimmer::app_config::load_config(config_file)
        .context("could not load the configuration; check the file and the SKIMMER_* env vars")?;

    let reference = LogReference {
        container: container.to_string(),
        key: key.to_string(),
        format,
    };
    let result = skimmer::run(app_config, reference).await;

    if let Err(err) = result {
        error!("error: {}", err);
        let mut looks_like_connection_trouble = false;
        for cause in err.chain().skip(1) {
            error!("cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                looks_like_connection_trouble = true;
            }
        }
        if looks_like_connection_trouble {
            error!(
                "hint: a backing service looks unreachable. Check that the \
                 object store and the search index are running and that the \
                 configured endpoints point at them."
            );
        }
        std::process::exit(1);
    }

    Ok(())
}
