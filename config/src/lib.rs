//! Configuration of the agora offer book
//!
//! Values come from command line flags, optionally layered over a TOML config
//! file whose keys are the flag names without the leading dashes

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

mod cli;
pub mod parsing;
mod validation;

pub use cli::{AgoraConfig, Cli};
pub use parsing::{
    config_file::parse_config_from_file, parse_command_line_args, parse_config_from_args,
};
pub use validation::validate_config;
