use crate::types::{Address, ClientConfig, ConfigError, ServiceEnvironment};
use config::{Config, Environment, File, FileFormat};
use log::{info, warn};
use std::path::Path;

const DEFAULTS: &str = r#"
[network]
chain_id = 80002
network_name = "Polygon Amoy"
rpc_url = "http://127.0.0.1:8545"

[contracts]
order_book_address = ""

[chain]
confirmation_timeout_secs = 120
poll_interval_ms = 1000
request_timeout_secs = 30

[order_service]
environment = "development"
request_timeout_secs = 30

[order_service.base_url]
development = "http://localhost:3000/api"
production = ""

[order_service.endpoints]
limit_order = "/limitOrder"
cancel_order = "/cancelOrder"
order_book = "/orderBook"
initiate_withdrawal = "/initiateWithdrawal"

[coordinator]
read_retry_attempts = 3
read_retry_delay_ms = 500

[logging]
level = "info"
"#;

const DEFAULT_PATHS: [&str; 2] = ["./p2p-escrow.toml", "./config.toml"];

/// Command-line overrides, applied last
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<String>,
    pub rpc_url: Option<String>,
    pub order_service_url: Option<String>,
    pub environment: Option<String>,
    pub log_level: Option<String>,
}

/// Configuration builder: defaults, then file, then environment, then CLI
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Load configuration from all sources and validate it.
    pub fn load(cli_args: &CliArgs) -> Result<ClientConfig, ConfigError> {
        let mut builder = ConfigBuilder::new();

        builder.load_defaults()?;

        match &cli_args.config_file {
            Some(path) => builder.load_file(path)?,
            None => builder.try_load_default_files()?,
        }

        builder.load_environment()?;
        builder.apply_cli_overrides(cli_args)?;

        let config: ClientConfig = builder.config.try_deserialize()?;
        validate_config(&config)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    fn load_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            .build()?;
        Ok(())
    }

    fn load_file(&mut self, path: &str) -> Result<(), ConfigError> {
        if !Path::new(path).exists() {
            return Err(ConfigError::Invalid(format!("Config file not found: {}", path)));
        }

        info!("Loading configuration from: {}", path);
        self.config = Config::builder()
            .add_source(self.config.clone())
            .add_source(File::with_name(path))
            .build()?;
        Ok(())
    }

    fn try_load_default_files(&mut self) -> Result<(), ConfigError> {
        for path in DEFAULT_PATHS {
            if Path::new(path).exists() {
                return self.load_file(path);
            }
        }

        warn!("No config file found, using defaults and environment variables");
        Ok(())
    }

    /// `P2P_ESCROW__ORDER_SERVICE__ENVIRONMENT=production` style variables.
    fn load_environment(&mut self) -> Result<(), ConfigError> {
        self.config = Config::builder()
            .add_source(self.config.clone())
            .add_source(
                Environment::with_prefix("P2P_ESCROW")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        Ok(())
    }

    fn apply_cli_overrides(&mut self, cli_args: &CliArgs) -> Result<(), ConfigError> {
        let mut builder = Config::builder().add_source(self.config.clone());

        if let Some(ref url) = cli_args.rpc_url {
            builder = builder.set_override("network.rpc_url", url.as_str())?;
        }

        if let Some(ref environment) = cli_args.environment {
            builder = builder.set_override("order_service.environment", environment.as_str())?;
        }

        if let Some(ref url) = cli_args.order_service_url {
            let environment = match cli_args.environment.as_deref() {
                Some(env) => env.to_string(),
                None => self.config.get_string("order_service.environment")?,
            };
            builder = builder.set_override(
                format!("order_service.base_url.{}", environment),
                url.as_str(),
            )?;
        }

        if let Some(ref level) = cli_args.log_level {
            builder = builder.set_override("logging.level", level.as_str())?;
        }

        self.config = builder.build()?;
        Ok(())
    }
}

pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.network.rpc_url.is_empty() {
        return Err(ConfigError::Invalid("Ledger RPC URL is required".to_string()));
    }

    if config.network.chain_id == 0 {
        return Err(ConfigError::Invalid("Chain ID must be greater than 0".to_string()));
    }

    if config.contracts.order_book_address.is_empty() {
        return Err(ConfigError::Invalid(
            "Order book contract address is required".to_string(),
        ));
    }

    Address::parse(&config.contracts.order_book_address)
        .map_err(|e| ConfigError::Invalid(format!("Order book contract: {}", e)))?;

    if config.order_service.active_base_url().is_empty() {
        let environment = match config.order_service.environment {
            ServiceEnvironment::Development => "development",
            ServiceEnvironment::Production => "production",
        };
        return Err(ConfigError::Invalid(format!(
            "Order service base URL for {} is required",
            environment
        )));
    }

    if config.chain.confirmation_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "Confirmation timeout must be greater than 0".to_string(),
        ));
    }

    if config.chain.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "Receipt poll interval must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Commented sample configuration file
pub fn create_sample_config() -> String {
    r#"# P2P escrow client configuration
# Copy this file to p2p-escrow.toml and update the values

[network]
# Chain the order book is deployed on
chain_id = 80002
network_name = "Polygon Amoy"
# JSON-RPC endpoint of the wallet / node holding the account keys
rpc_url = "http://127.0.0.1:8545"

[contracts]
# Deployed P2P order book contract
order_book_address = "0xYOUR_ORDER_BOOK_ADDRESS_HERE"

[chain]
# Seconds to wait for a transaction receipt
confirmation_timeout_secs = 120
# Receipt polling interval in milliseconds
poll_interval_ms = 1000
# Per-request timeout for JSON-RPC calls
request_timeout_secs = 30

[order_service]
# development or production
environment = "development"
request_timeout_secs = 30

[order_service.base_url]
development = "http://localhost:3000/api"
production = "https://YOUR_ORDER_SERVICE_HERE/api"

[order_service.endpoints]
limit_order = "/limitOrder"
cancel_order = "/cancelOrder"
order_book = "/orderBook"
initiate_withdrawal = "/initiateWithdrawal"

[coordinator]
# Attempts for read-only ledger queries (transactions are never retried)
read_retry_attempts = 3
read_retry_delay_ms = 500

[logging]
# trace, debug, info, warn, error
level = "info"
"#
    .to_string()
}
