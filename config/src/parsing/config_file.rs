//! Parsing logic for a separate TOML config file

use std::fs;

use clap::Parser;
use toml::{Value, map::Map};

use crate::{AgoraConfig, Cli, parsing::parse_config_from_args, validation::validate_config};

/// The CLI argument name for the config file
const CONFIG_FILE_ARG: &str = "--config-file";

/// Parse args from the config file named by `--config-file`, if any
pub(crate) fn config_file_args(cli_args: &[String]) -> Result<Vec<String>, String> {
    let Some(index) = cli_args.iter().position(|arg| arg == CONFIG_FILE_ARG) else {
        return Ok(vec![]);
    };
    let path = cli_args
        .get(index + 1)
        .ok_or_else(|| format!("{CONFIG_FILE_ARG} requires a path"))?;
    read_config_file(path)
}

/// Parse a config entirely from a file
pub fn parse_config_from_file(path: &str) -> Result<AgoraConfig, String> {
    let mut file_args = read_config_file(path)?;
    file_args.insert(0, "dummy-program-name".to_string());
    let cli = Cli::try_parse_from(file_args).map_err(|e| e.to_string())?;
    let config = parse_config_from_args(cli)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse a config file
fn read_config_file(path: &str) -> Result<Vec<String>, String> {
    let file_contents = fs::read_to_string(path).map_err(|err| err.to_string())?;
    let config_kv_pairs: Map<_, _> =
        toml::from_str(&file_contents).map_err(|err| err.to_string())?;

    let mut config_file_args: Vec<String> = Vec::with_capacity(config_kv_pairs.len());
    for (toml_key, value) in config_kv_pairs.iter() {
        let cli_arg = format!("--{toml_key}");
        let cli_values = toml_value_to_args(cli_arg, value)?;
        config_file_args.extend(cli_values);
    }

    Ok(config_file_args)
}

// ----------------
// | TOML Parsing |
// ----------------

/// Parse a toml value into a string that is CLI compatible
fn toml_value_to_args(cli_arg: String, val: &Value) -> Result<Vec<String>, String> {
    let value_str = toml_value_to_string(val)?;
    Ok(vec![cli_arg, value_str])
}

/// Helper method to convert a toml value to a string, tables and arrays are
/// not supported
fn toml_value_to_string(val: &Value) -> Result<String, String> {
    Ok(match val {
        Value::String(val) => val.clone(),
        Value::Integer(val) => val.to_string(),
        Value::Float(val) => val.to_string(),
        Value::Boolean(val) => val.to_string(),
        _ => {
            return Err(format!("unsupported value {val}"));
        },
    })
}
