use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::hub::EchoPolicy;
use crate::state::Keepalive;

/// Command-line flags. Unset flags leave the lower layers untouched.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "jungle-relay", version, about = "Jungle presence and chat relay")]
pub struct Cli {
    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./jungle.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Who receives a copy of a direct message besides the target user
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_echo: Option<EchoPolicy>,

    /// Seconds between server pings
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    /// Seconds a client has to answer a ping
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,
}

/// Resolved relay configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub direct_echo: EchoPolicy,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,

    /// Set from `--generate-config`; never read from files or env.
    #[serde(skip)]
    pub generate_config: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            direct_echo: EchoPolicy::AllInstances,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            generate_config: false,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (JUNGLE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Cli::parse();
        let mut config: Config = Self::figment(&cli).extract()?;
        config.generate_config = cli.generate_config;
        Ok(config)
    }

    pub fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("JUNGLE_"))
            .merge(Serialized::defaults(cli))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Intervals are clamped to at least one second.
    pub fn keepalive(&self) -> Keepalive {
        Keepalive {
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Jungle Relay Configuration
# Place this file at ./jungle.toml or specify with --config <path>
# All settings can be overridden via environment variables (JUNGLE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Who gets a copy of a direct message besides the target user:
#   "all-instances" - every connection of the sending user (default)
#   "originator"    - only the connection the message was sent on
# direct_echo = "all-instances"

# Keepalive: ping every N seconds, close if no pong within M seconds
# ping_interval_secs = 30
# pong_timeout_secs = 10
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn cli(args: &[&str]) -> Cli {
        let argv = std::iter::once("jungle-relay").chain(args.iter().copied());
        Cli::parse_from(argv)
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        Jail::expect_with(|_jail| {
            let config: Config = Config::figment(&cli(&[])).extract()?;
            assert_eq!(config, Config::default());
            assert_eq!(config.listen_addr(), "0.0.0.0:8080");
            Ok(())
        });
    }

    #[test]
    fn test_layered_precedence() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "jungle.toml",
                r#"
                port = 9000
                bind_address = "127.0.0.1"
                direct_echo = "originator"
                ping_interval_secs = 15
                "#,
            )?;
            jail.set_env("JUNGLE_PORT", 9100);
            jail.set_env("JUNGLE_PING_INTERVAL_SECS", 20);

            let config: Config = Config::figment(&cli(&[
                "--config",
                "jungle.toml",
                "--ping-interval-secs",
                "5",
            ]))
            .extract()?;

            // TOML over defaults
            assert_eq!(config.bind_address, "127.0.0.1");
            assert_eq!(config.direct_echo, EchoPolicy::Originator);
            // env over TOML
            assert_eq!(config.port, 9100);
            // CLI over env
            assert_eq!(config.ping_interval_secs, 5);
            // untouched
            assert_eq!(config.pong_timeout_secs, 10);
            assert!(!config.json_logs);
            Ok(())
        });
    }

    #[test]
    fn test_cli_echo_policy_and_flags() {
        Jail::expect_with(|_jail| {
            let config: Config = Config::figment(&cli(&[
                "--direct-echo",
                "originator",
                "--json-logs",
                "--port",
                "7000",
            ]))
            .extract()?;
            assert_eq!(config.direct_echo, EchoPolicy::Originator);
            assert!(config.json_logs);
            assert_eq!(config.port, 7000);
            Ok(())
        });
    }

    #[test]
    fn test_env_echo_policy() {
        Jail::expect_with(|jail| {
            jail.set_env("JUNGLE_DIRECT_ECHO", "all-instances");
            let config: Config = Config::figment(&cli(&[])).extract()?;
            assert_eq!(config.direct_echo, EchoPolicy::AllInstances);
            Ok(())
        });
    }

    #[test]
    fn test_template_is_valid_toml_with_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("jungle.toml", &generate_config_template())?;
            let config: Config =
                Config::figment(&cli(&["--config", "jungle.toml"])).extract()?;
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_keepalive_is_clamped() {
        let config = Config {
            ping_interval_secs: 0,
            pong_timeout_secs: 0,
            ..Config::default()
        };
        let keepalive = config.keepalive();
        assert_eq!(keepalive.ping_interval, Duration::from_secs(1));
        assert_eq!(keepalive.pong_timeout, Duration::from_secs(1));
    }
}
