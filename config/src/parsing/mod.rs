//! Parsing logic for the offer book config

use std::env;

use clap::Parser;
use util::logging::parse_level_filter;

use crate::{AgoraConfig, Cli, parsing::config_file::config_file_args, validation::validate_config};

pub mod config_file;

/// Parses command line args into the config
///
/// Config file args are placed *before* the command line args so that clap
/// gives precedence to the flags passed explicitly
pub fn parse_command_line_args() -> Result<AgoraConfig, String> {
    let mut command_line_args = env::args_os()
        .map(|val| val.into_string().map_err(|arg| format!("non UTF-8 argument {arg:?}")))
        .collect::<Result<Vec<_>, _>>()?;
    if command_line_args.is_empty() {
        return Err("missing program name".to_string());
    }
    let config_file_args = config_file_args(&command_line_args)?;

    // The program name stays first
    let mut full_args = vec![command_line_args.remove(0)];
    full_args.extend(config_file_args);
    full_args.extend(command_line_args);

    let cli = Cli::try_parse_from(full_args).map_err(|e| e.to_string())?;
    let config = parse_config_from_args(cli)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse the config from a set of command line arguments
pub fn parse_config_from_args(cli_args: Cli) -> Result<AgoraConfig, String> {
    Ok(AgoraConfig {
        dust_sats: cli_args.dust_sats,
        fee_per_kb: cli_args.fee_per_kb,
        script_integer_bits: cli_args.script_integer_bits,
        min_atom_scale_factor: cli_args.min_atom_scale_factor,
        min_price_integer: cli_args.min_price_integer,
        min_scale_ratio: cli_args.min_scale_ratio,
        history_page_size: cli_args.history_page_size,
        log_level: parse_level_filter(&cli_args.log_level)?,
    })
}

#[cfg(test)]
mod tests {
    use util::logging::LevelFilter;

    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["agora"]);
        assert_eq!(parse_config_from_args(cli).unwrap(), AgoraConfig::default());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "agora",
            "--dust-sats",
            "1000",
            "--script-integer-bits",
            "64",
            "--log-level",
            "debug",
        ]);
        let config = parse_config_from_args(cli).unwrap();
        assert_eq!(config.dust_sats, 1000);
        assert_eq!(config.script_integer_bits, 64);
        assert_eq!(config.log_level, LevelFilter::DEBUG);
        assert_eq!(config.fee_per_kb, 1000);

        let cli = Cli::parse_from(["agora", "--log-level", "loud"]);
        assert!(parse_config_from_args(cli).is_err());
    }
}
