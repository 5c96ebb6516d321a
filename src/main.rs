use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fract::broker::{BrokerClient, OandaClient};
use fract::engine::{DecisionEngine, EngineOptions};
use fract::execution::ExecutionMode;
use fract::model::ModelKind;
use fract::streams::{spawn_price_stream, PollingSource, QueueSource, QuoteSource, SharedQueue};
use fract::{EngineError, TraderConfig};

#[derive(Parser, Debug)]
#[command(name = "fract")]
#[command(about = "Autonomous forex trader on the OANDA v20 API")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// YAML config path (falls back to $FRACT_YML, then ./fract.yml)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a config template
    Init,

    /// Print broker data as JSON
    Info {
        /// account | instruments | prices | positions | transactions
        target: String,

        /// Instruments for `prices` (defaults to the configured ones)
        instruments: Vec<String>,
    },

    /// Close positions (all open positions when none are given)
    Close {
        instruments: Vec<String>,
    },

    /// Run the autonomous trader
    Open {
        /// Instruments to trade (defaults to the configured ones)
        instruments: Vec<String>,

        /// Signal model: ewma | kalman
        #[arg(long, default_value = "ewma")]
        model: String,

        /// Seconds between cycles
        #[arg(long, default_value = "0")]
        interval: f64,

        /// Stop after this many seconds without a new quote
        #[arg(long, default_value = "3600")]
        timeout: f64,

        /// Poll the latest price instead of consuming the pricing stream
        #[arg(long)]
        standalone: bool,

        /// Directory for parameter / order / transaction / rate / signal logs
        #[arg(long, env = "FRACT_LOG_DIR")]
        log_dir: Option<PathBuf>,

        /// Skip instruments and cycles on broker API errors instead of stopping
        #[arg(long)]
        ignore_api_error: bool,

        /// Trade against the signal
        #[arg(long)]
        contrarian: bool,

        /// Only log warnings and errors
        #[arg(long)]
        quiet: bool,

        /// Log orders without sending them
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfoTarget {
    Account,
    Instruments,
    Prices,
    Positions,
    Transactions,
}

impl FromStr for InfoTarget {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "account" => Ok(Self::Account),
            "instruments" => Ok(Self::Instruments),
            "prices" => Ok(Self::Prices),
            "positions" => Ok(Self::Positions),
            "transactions" => Ok(Self::Transactions),
            _ => Err(EngineError::Configuration(format!("invalid info target: {}", s))),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let quiet = matches!(args.command, Commands::Open { quiet: true, .. });
    let directive = if args.debug {
        "fract=debug"
    } else if quiet {
        "fract=warn"
    } else {
        "fract=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)),
        )
        .init();

    let path = TraderConfig::resolve_path(args.file.as_deref());

    match args.command {
        Commands::Init => {
            TraderConfig::write_template(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }

        Commands::Info { target, instruments } => {
            let target: InfoTarget = target.parse()?;
            let config = load_config(&path)?;
            let client = OandaClient::new(&config.oanda)?;
            let json = match target {
                InfoTarget::Account => serde_json::to_string_pretty(&client.get_account().await?)?,
                InfoTarget::Instruments => {
                    serde_json::to_string_pretty(&client.get_instruments().await?)?
                }
                InfoTarget::Prices => {
                    let names = if instruments.is_empty() {
                        config.instruments.clone()
                    } else {
                        instruments
                    };
                    serde_json::to_string_pretty(&client.get_prices(&names).await?)?
                }
                InfoTarget::Positions => {
                    serde_json::to_string_pretty(&client.get_positions().await?)?
                }
                InfoTarget::Transactions => {
                    serde_json::to_string_pretty(&client.get_transaction_history(0).await?)?
                }
            };
            println!("{}", json);
        }

        Commands::Close { instruments } => {
            let config = load_config(&path)?;
            let client = OandaClient::new(&config.oanda)?;
            let targets = if instruments.is_empty() {
                let mut open: Vec<String> = client.get_positions().await?.into_keys().collect();
                open.sort();
                open
            } else {
                instruments
            };
            if targets.is_empty() {
                info!("No open positions");
            }
            let mut failed = 0;
            for instrument in &targets {
                match client.close_position(instrument).await {
                    Ok(result) => println!("{}", serde_json::to_string_pretty(&result.response)?),
                    Err(e) => {
                        error!("Failed to close {}: {}", instrument, e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} positions could not be closed", failed, targets.len());
            }
        }

        Commands::Open {
            instruments,
            model,
            interval,
            timeout,
            standalone,
            log_dir,
            ignore_api_error,
            contrarian,
            quiet: _,
            dry_run,
        } => {
            let mut config = load_config(&path)?;
            if !instruments.is_empty() {
                config.instruments = instruments;
                config.validate()?;
            }
            let options = EngineOptions {
                model: ModelKind::from_str(&model)?,
                mode: if dry_run {
                    ExecutionMode::DryRun
                } else {
                    ExecutionMode::Live
                },
                interval: Duration::from_secs_f64(interval.max(0.0)),
                timeout: (timeout > 0.0).then(|| Duration::from_secs_f64(timeout)),
                contrarian,
                ignore_api_error,
                log_dir,
            };
            let client = OandaClient::new(&config.oanda)?;
            info!("Account: {} ({})", client.account_id(), options.mode);

            if standalone {
                let broker = Arc::new(client);
                let source = PollingSource::new(broker.clone());
                trade(broker, source, config, options).await?;
            } else {
                let queue = SharedQueue::new(config.queue.max_len);
                let producer =
                    spawn_price_stream(client.clone(), config.instruments.clone(), queue.clone());
                let source = QueueSource::new(queue, config.instruments.clone());
                let result = trade(Arc::new(client), source, config, options).await;
                producer.abort();
                result?;
            }
        }
    }

    Ok(())
}

fn load_config(path: &std::path::Path) -> Result<TraderConfig> {
    TraderConfig::load(path).with_context(|| {
        format!(
            "Failed to load {} (run `fract init` to create one)",
            path.display()
        )
    })
}

/// Run the engine until it stops by itself or Ctrl-C is pressed
async fn trade<B: BrokerClient, Q: QuoteSource>(
    broker: Arc<B>,
    source: Q,
    config: TraderConfig,
    options: EngineOptions,
) -> Result<()> {
    let mut engine = DecisionEngine::new(broker, source, config, options)
        .context("Failed to set up the decision engine")?;
    let interrupted = tokio::select! {
        result = engine.run() => {
            result.context("Trading loop stopped")?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        warn!("Interrupted, releasing the quote source");
        engine.release().await;
    }
    info!("Done");
    Ok(())
}
