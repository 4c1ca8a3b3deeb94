use colored::Colorize;

use nodemark::config::Config;
use nodemark::{NodemarkError, Result};

use crate::cli::{Cli, ConfigCommands};

pub async fn run(cli: &Cli, command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => show(cli).await,
        ConfigCommands::Get { key } => get(cli, key).await,
        ConfigCommands::Set { key, value } => set(cli, key, value).await,
        ConfigCommands::Path => path(cli).await,
    }
}

async fn show(cli: &Cli) -> Result<()> {
    let config = Config::load()?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        let toml_str = toml::to_string_pretty(&config)
            .map_err(|e| NodemarkError::ConfigError(e.to_string()))?;
        println!("{}", toml_str);
    }

    Ok(())
}

fn get_key(config: &Config, key: &str) -> Result<Option<String>> {
    let value = match key {
        "browser.default_profile" => Some(config.browser.default_profile.clone()),
        "browser.protocol_version" => Some(config.browser.protocol_version.to_string()),
        "session.enable_dom_on_attach" => Some(config.session.enable_dom_on_attach.to_string()),
        "session.operation_timeout_ms" => {
            config.session.operation_timeout_ms.map(|ms| ms.to_string())
        }
        _ => {
            return Err(NodemarkError::ConfigError(format!(
                "Unknown config key: {}",
                key
            )))
        }
    };
    Ok(value)
}

fn set_key(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "browser.default_profile" => config.browser.default_profile = value.to_string(),
        "browser.protocol_version" => config.browser.protocol_version = value.parse()?,
        "session.enable_dom_on_attach" => {
            config.session.enable_dom_on_attach = value.parse().map_err(|_| {
                NodemarkError::ConfigError("enable_dom_on_attach must be true or false".to_string())
            })?
        }
        "session.operation_timeout_ms" => {
            config.session.operation_timeout_ms = match value.trim() {
                "" | "none" => None,
                ms => Some(ms.parse().map_err(|_| {
                    NodemarkError::ConfigError(
                        "operation_timeout_ms must be a number of milliseconds or 'none'"
                            .to_string(),
                    )
                })?),
            }
        }
        _ => {
            return Err(NodemarkError::ConfigError(format!(
                "Unknown config key: {}",
                key
            )))
        }
    }
    Ok(())
}

async fn get(cli: &Cli, key: &str) -> Result<()> {
    let config = Config::load()?;
    let value = get_key(&config, key)?;

    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "key": key,
                "value": value
            })
        );
    } else {
        match value {
            Some(v) => println!("{}", v),
            None => println!("{}", "(not set)".dimmed()),
        }
    }

    Ok(())
}

async fn set(_cli: &Cli, key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?;
    set_key(&mut config, key, value)?;
    config.save()?;
    println!("{} Set {} = {}", "✓".green(), key, value);

    Ok(())
}

async fn path(cli: &Cli) -> Result<()> {
    let path = Config::config_path();

    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "path": path.display().to_string()
            })
        );
    } else {
        println!("{}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips_known_keys() {
        let mut config = Config::default();
        set_key(&mut config, "session.operation_timeout_ms", "1500").unwrap();
        set_key(&mut config, "browser.protocol_version", "1.2").unwrap();
        set_key(&mut config, "session.enable_dom_on_attach", "false").unwrap();

        assert_eq!(
            get_key(&config, "session.operation_timeout_ms").unwrap().as_deref(),
            Some("1500")
        );
        assert_eq!(
            get_key(&config, "browser.protocol_version").unwrap().as_deref(),
            Some("1.2")
        );
        assert!(!config.session.enable_dom_on_attach);

        set_key(&mut config, "session.operation_timeout_ms", "none").unwrap();
        assert_eq!(get_key(&config, "session.operation_timeout_ms").unwrap(), None);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        let mut config = Config::default();
        assert!(matches!(
            set_key(&mut config, "api.key", "x"),
            Err(NodemarkError::ConfigError(_))
        ));
        assert!(matches!(
            set_key(&mut config, "session.enable_dom_on_attach", "maybe"),
            Err(NodemarkError::ConfigError(_))
        ));
        assert!(matches!(
            set_key(&mut config, "browser.protocol_version", "latest"),
            Err(NodemarkError::ConfigError(_))
        ));
        assert!(get_key(&config, "nope").is_err());
    }
}
