use std::path::PathBuf;

use crate::cli::ConfigCommands;
use crate::commands::common::Context;
use crate::config_file::{is_http_url, normalize_text_option, CliConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, context: &Context) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            endpoint,
            health_url,
            database,
        } => {
            let config = merge_config(context.config.clone(), endpoint, health_url, database)?;
            config
                .save_to_path(&context.config_path)
                .map_err(CliError::Config)?;
            println!("Saved config to {}", context.config_path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let settings = context
                .config
                .effective_settings()
                .map_err(CliError::Config)?;
            let effective = CliConfig {
                db_path: Some(context.db_path.clone()),
                sync: settings,
                ..context.config.clone()
            };
            println!("# {}", context.config_path.display());
            println!("{}", serde_json::to_string_pretty(&effective)?);
            Ok(())
        }
    }
}

/// Overlay explicit `config init` values on an existing config.
pub fn merge_config(
    mut config: CliConfig,
    endpoint: Option<String>,
    health_url: Option<String>,
    database: Option<PathBuf>,
) -> Result<CliConfig, CliError> {
    if let Some(endpoint) = normalize_text_option(endpoint) {
        config.endpoint = Some(require_http_url("endpoint", endpoint)?);
    }
    if let Some(health_url) = normalize_text_option(health_url) {
        config.health_url = Some(require_http_url("health URL", health_url)?);
    }
    if database.is_some() {
        config.db_path = database;
    }
    config.version = config.version.max(1);
    Ok(config)
}

fn require_http_url(label: &str, value: String) -> Result<String, CliError> {
    if is_http_url(&value) {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(CliError::Config(format!(
            "{label} must include http:// or https://"
        )))
    }
}
