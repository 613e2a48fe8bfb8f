use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use log::{error, info, warn, LevelFilter};
use p2p_escrow_client::{
    config::{create_sample_config, CliArgs, ConfigBuilder},
    types::EscrowIntent,
    Address, CoordinatorError, EscrowOrderCoordinator, EvmGateway, HttpOrderGateway,
    SessionState, Side,
};
use std::sync::Arc;

fn cli() -> Command {
    Command::new("p2p-escrow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("P2P order book escrow client")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .env("P2P_ESCROW_CONFIG_FILE")
                .global(true),
        )
        .arg(
            Arg::new("rpc-url")
                .long("rpc-url")
                .value_name("URL")
                .help("Ledger JSON-RPC URL")
                .global(true),
        )
        .arg(
            Arg::new("order-service-url")
                .long("order-service-url")
                .value_name("URL")
                .help("Order service base URL for the selected environment")
                .global(true),
        )
        .arg(
            Arg::new("environment")
                .short('e')
                .long("environment")
                .value_name("ENV")
                .value_parser(["development", "production"])
                .help("Order service environment")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .env("LOG_LEVEL")
                .global(true),
        )
        .subcommand(Command::new("status").about("Connect the wallet and show the session"))
        .subcommand(Command::new("sample-config").about("Print a sample configuration file"))
        .subcommand(
            Command::new("escrow")
                .about("Approve and deposit tokens into order book escrow")
                .arg(Arg::new("token").required(true).help("Token contract address"))
                .arg(Arg::new("amount").required(true).help("Decimal amount, e.g. 10.5")),
        )
        .subcommand(
            Command::new("resume")
                .about("Retry the deposit of a partially escrowed intent")
                .arg(
                    Arg::new("intent-file")
                        .required(true)
                        .value_name("FILE")
                        .help("Intent JSON printed by a failed escrow"),
                ),
        )
        .subcommand(
            Command::new("balance")
                .about("Show the escrowed balance of a token")
                .arg(Arg::new("token").required(true).help("Token contract address")),
        )
        .subcommand(
            Command::new("place-order")
                .about("Place a limit order")
                .arg(Arg::new("side").required(true).value_parser(["buy", "sell"]))
                .arg(Arg::new("quantity").required(true))
                .arg(Arg::new("base").required(true).help("Base asset"))
                .arg(Arg::new("quote").required(true).help("Quote asset"))
                .arg(Arg::new("price").required(true)),
        )
        .subcommand(
            Command::new("cancel-order")
                .about("Cancel a resting order")
                .arg(Arg::new("order-id").required(true))
                .arg(Arg::new("side").required(true).value_parser(["buy", "sell"]))
                .arg(Arg::new("base").required(true).help("Base asset"))
                .arg(Arg::new("quote").required(true).help("Quote asset")),
        )
        .subcommand(
            Command::new("order-book")
                .about("Fetch the order book for a symbol")
                .arg(Arg::new("symbol").required(true)),
        )
        .subcommand(
            Command::new("withdraw")
                .about("Request a withdrawal from escrow")
                .arg(Arg::new("asset").required(true))
                .arg(Arg::new("amount").required(true)),
        )
}

fn cli_args(matches: &ArgMatches) -> CliArgs {
    CliArgs {
        config_file: matches.get_one::<String>("config").cloned(),
        rpc_url: matches.get_one::<String>("rpc-url").cloned(),
        order_service_url: matches.get_one::<String>("order-service-url").cloned(),
        environment: matches.get_one::<String>("environment").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
    }
}

fn arg<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing argument: {}", name))
}

fn side(matches: &ArgMatches) -> Result<Side> {
    arg(matches, "side")?.parse().map_err(|e: String| anyhow!(e))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_intent(path: &str) -> Result<EscrowIntent> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading intent file {}", path))?;
    serde_json::from_str(&json).with_context(|| format!("parsing intent file {}", path))
}

/// Prints the acknowledgement of an order request the service accepted
/// even though the wallet session moved on while it was in flight.
fn report_order_result<T: serde::Serialize>(result: Result<T, CoordinatorError>) -> Result<()> {
    match result {
        Ok(ack) => print_json(&ack),
        Err(e) => {
            if let Some(ack) = e.remote_ack() {
                print_json(ack)?;
            }
            Err(e.into())
        }
    }
}

/// Starts logging before the configuration is read so the loader's own
/// messages are kept. Returns true when `--log-level`/`LOG_LEVEL` or
/// `RUST_LOG` fixed the level; otherwise the configured level applies later.
fn init_logging(cli_level: Option<&str>) -> bool {
    let fixed = cli_level.is_some() || std::env::var_os("RUST_LOG").is_some();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"));
    if let Some(level) = cli_level {
        builder.parse_filters(level);
    }
    builder.init();

    if !fixed {
        log::set_max_level(LevelFilter::Info);
    }
    fixed
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    if matches.subcommand_name() == Some("sample-config") {
        print!("{}", create_sample_config());
        return Ok(());
    }

    let args = cli_args(&matches);
    let level_fixed = init_logging(args.log_level.as_deref());

    let config = ConfigBuilder::load(&args).context("loading configuration")?;

    if !level_fixed {
        match config.logging.level.parse::<LevelFilter>() {
            Ok(level) => log::set_max_level(level),
            Err(_) => warn!(
                "Unknown log level '{}' in configuration, keeping info",
                config.logging.level
            ),
        }
    }

    let session = Arc::new(SessionState::from_config(&config)?);
    let ledger = Arc::new(EvmGateway::new(
        config.network.rpc_url.clone(),
        &config.chain,
        Arc::clone(&session),
    )?);
    let orders = Arc::new(HttpOrderGateway::new(&config.order_service)?);

    let coordinator = EscrowOrderCoordinator::new(
        Arc::clone(&session),
        ledger.clone(),
        orders,
        config.coordinator.clone(),
    );

    let (command, sub) = matches
        .subcommand()
        .ok_or_else(|| anyhow!("no command given"))?;

    // Order book reads need no wallet
    if command == "order-book" {
        let book = coordinator.order_book(arg(sub, "symbol")?).await?;
        return print_json(&book);
    }

    let handle = session
        .connect(ledger.as_ref())
        .await
        .context("connecting wallet")?;
    if let Some(advisory) = session.network_advisory() {
        warn!("{}", advisory.message);
    }

    match command {
        "status" => {
            info!("Session generation {}", handle.generation);
            println!(
                "account: {}",
                handle
                    .account
                    .as_ref()
                    .map(Address::to_string)
                    .unwrap_or_else(|| "(none)".to_string())
            );
            println!(
                "chain:   {}",
                handle
                    .chain_id
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "(unknown)".to_string())
            );
            println!("network: {}", if session.network_advisory().is_some() { "mismatch" } else { "ok" });
        }
        "escrow" => {
            let token = Address::parse(arg(sub, "token")?)?;
            match coordinator.escrow(&token, arg(sub, "amount")?).await {
                Ok(receipt) => print_json(&receipt)?,
                Err(CoordinatorError::PartialEscrow {
                    intent,
                    approve_tx,
                    source,
                }) => {
                    error!("Deposit failed after approval {}: {}", approve_tx, source);
                    print_json(&intent)?;
                    return Err(anyhow!(
                        "allowance granted in {} but funds were not deposited; \
                         save the intent above and run `p2p-escrow resume <FILE>`",
                        approve_tx
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
        "resume" => {
            let intent = read_intent(arg(sub, "intent-file")?)?;
            info!("Resuming deposit of escrow {}", intent.id);
            match coordinator.resume_deposit(intent).await {
                Ok(receipt) => print_json(&receipt)?,
                Err(CoordinatorError::DepositFailed { intent, source }) => {
                    error!("Resumed deposit failed: {}", source);
                    print_json(&intent)?;
                    return Err(anyhow!(
                        "deposit of escrow {} failed again; the intent above can be resumed",
                        intent.id
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
        "balance" => {
            let token = Address::parse(arg(sub, "token")?)?;
            println!("{}", coordinator.get_escrow_balance(&token).await?);
        }
        "place-order" => {
            let result = coordinator
                .place_order(
                    arg(sub, "price")?,
                    arg(sub, "quantity")?,
                    side(sub)?,
                    arg(sub, "base")?,
                    arg(sub, "quote")?,
                )
                .await;
            report_order_result(result)?;
        }
        "cancel-order" => {
            let result = coordinator
                .cancel_order(
                    arg(sub, "order-id")?,
                    side(sub)?,
                    arg(sub, "base")?,
                    arg(sub, "quote")?,
                )
                .await;
            report_order_result(result)?;
        }
        "withdraw" => {
            let result = coordinator
                .request_withdrawal(arg(sub, "asset")?, arg(sub, "amount")?)
                .await;
            report_order_result(result)?;
        }
        other => return Err(anyhow!("unknown command: {}", other)),
    }

    Ok(())
}
