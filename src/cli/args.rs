use crate::config::{AppConfig, Driver};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Serve money transfers between accounts over HTTP
#[derive(Parser, Debug)]
#[command(name = "transfer-engine")]
#[command(about = "Serve money transfers between accounts over HTTP", long_about = None)]
pub struct CliArgs {
    /// TOML configuration file
    #[arg(
        long = "config",
        value_name = "PATH",
        help = "Path to a TOML config file (default: built-in defaults)"
    )]
    pub config: Option<PathBuf>,

    /// Listen address, overrides `server.bind`
    #[arg(long = "bind", value_name = "ADDR", help = "Address to listen on, e.g. 127.0.0.1:8080")]
    pub bind: Option<SocketAddr>,

    /// Storage backend, overrides `database.driver`
    #[arg(
        long = "driver",
        value_name = "DRIVER",
        help = "Storage backend: 'postgres' or 'memory'"
    )]
    pub driver: Option<Driver>,

    /// Seed file, overrides `database.seed_file`
    #[arg(long = "seed", value_name = "CSV", help = "CSV file with id,amount rows to seed accounts from")]
    pub seed: Option<PathBuf>,

    /// Debug logging
    #[arg(long = "debug", help = "Log at debug level unless RUST_LOG is set")]
    pub debug: bool,
}

impl CliArgs {
    /// Apply command-line overrides on top of a loaded configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration from the file or the defaults
    ///
    /// # Returns
    ///
    /// The configuration with every flag that was given applied.
    pub fn apply_overrides(&self, mut config: AppConfig) -> AppConfig {
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(driver) = self.driver {
            config.database.driver = driver;
        }
        if let Some(seed) = &self.seed {
            config.database.seed_file = Some(seed.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::defaults(&["program"], None, false)]
    #[case::config(&["program", "--config", "ledger.toml"], Some("ledger.toml"), false)]
    #[case::debug(&["program", "--debug"], None, true)]
    fn test_flag_parsing(
        #[case] args: &[&str],
        #[case] config: Option<&str>,
        #[case] debug: bool,
    ) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.config, config.map(PathBuf::from));
        assert_eq!(parsed.debug, debug);
    }

    #[rstest]
    #[case::memory(&["program", "--driver", "memory"], Driver::Memory)]
    #[case::postgres(&["program", "--driver", "postgres"], Driver::Postgres)]
    #[case::not_given(&["program"], Driver::Postgres)]
    fn test_driver_override(#[case] args: &[&str], #[case] expected: Driver) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        let config = parsed.apply_overrides(AppConfig::default());
        assert_eq!(config.database.driver, expected);
    }

    #[test]
    fn test_all_overrides() {
        let parsed = CliArgs::try_parse_from([
            "program",
            "--bind",
            "0.0.0.0:9090",
            "--driver",
            "memory",
            "--seed",
            "accounts.csv",
        ])
        .unwrap();
        let config = parsed.apply_overrides(AppConfig::default());

        assert_eq!(config.server.bind, "0.0.0.0:9090".parse().unwrap());
        assert_eq!(config.database.driver, Driver::Memory);
        assert_eq!(config.database.seed_file, Some(PathBuf::from("accounts.csv")));
        assert_eq!(config.pool, AppConfig::default().pool);
    }

    // Error handling tests
    #[rstest]
    #[case::invalid_driver(&["program", "--driver", "oracle"])]
    #[case::invalid_bind(&["program", "--bind", "localhost"])]
    #[case::positional(&["program", "input.csv"])]
    fn test_parsing_errors(#[case] args: &[&str]) {
        let result = CliArgs::try_parse_from(args);
        assert!(result.is_err());
    }
}
