//! Command-line interface handling for the universe node.
//!
//! This module provides command-line argument parsing using the `clap`
//! builder API. Every flag except `--config` overrides a setting of the
//! configuration file.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the token secret
    pub jwt_secret: Option<String>,
    /// Optional override for the spawn world id
    pub spawn_world: Option<String>,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    /// Parses an explicit argument list, for tests and embedding.
    pub fn parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&Self::command().try_get_matches_from(args)?))
    }

    fn command() -> Command {
        Command::new("Universe Node")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Multi-user 3D world server speaking the posbus protocol")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("config.toml"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Bind address (e.g., 0.0.0.0:4000)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("jwt-secret")
                    .long("jwt-secret")
                    .value_name("SECRET")
                    .help("Secret handshake tokens are signed with (HS256)"),
            )
            .arg(
                Arg::new("spawn-world")
                    .long("spawn-world")
                    .value_name("UUID")
                    .help("World new connections are spawned into"),
            )
    }

    fn from_matches(matches: &clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            jwt_secret: matches.get_one::<String>("jwt-secret").cloned(),
            spawn_world: matches.get_one::<String>("spawn-world").cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_flags() {
        let args = CliArgs::parse_from(["universe_node"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert!(args.bind_address.is_none());
        assert!(args.jwt_secret.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn test_overrides_are_captured() {
        let args = CliArgs::parse_from([
            "universe_node",
            "--config",
            "prod.toml",
            "--bind",
            "0.0.0.0:4000",
            "--log-level",
            "debug",
            "--json-logs",
            "--jwt-secret",
            "s3cret",
            "--spawn-world",
            "d83670c7-a120-47a4-892d-f9ec75604f74",
        ])
        .unwrap();
        assert_eq!(args.config_path, PathBuf::from("prod.toml"));
        assert_eq!(args.bind_address.as_deref(), Some("0.0.0.0:4000"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.jwt_secret.as_deref(), Some("s3cret"));
        assert!(args.spawn_world.is_some());
    }

    #[test]
    fn test_unknown_flag_is_an_error() {
        assert!(CliArgs::parse_from(["universe_node", "--plugins", "x"]).is_err());
    }
}
