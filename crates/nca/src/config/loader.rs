use std::collections::HashMap;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Reads, parses and validates a bash-style settings file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let values = parse_settings(content)?;
    let config = Config::from_values(&values)?;
    config.validate()?;
    Ok(config)
}

/// Parses `KEY=value` lines. Blank lines and `#` comments are skipped, an
/// optional leading `export` is allowed, and one layer of matching single
/// or double quotes is stripped from the value.
pub fn parse_settings(content: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut values = HashMap::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();

        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Parse {
                line: idx + 1,
                content: raw.to_string(),
            });
        };

        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::Parse {
                line: idx + 1,
                content: raw.to_string(),
            });
        }

        values.insert(key.to_string(), unquote(value.trim()).to_string());
    }

    Ok(values)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
