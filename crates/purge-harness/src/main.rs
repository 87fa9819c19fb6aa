use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use purge_core::{CancellationToken, PurgeConfig};
use purge_harness::{run_simulator_with_cancel, SimulatorConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn engine_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("TOML file with engine settings"),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .value_parser(value_parser!(usize))
                .help("Requests per batch-write call (1-25)"),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .value_parser(value_parser!(usize))
                .help("Batches in flight at once"),
        )
        .arg(
            Arg::new("max-attempts")
                .long("max-attempts")
                .value_parser(value_parser!(u32))
                .help("Retry ceiling"),
        )
}

fn cli() -> Command {
    Command::new("purge-harness")
        .version(purge_harness::VERSION)
        .about("Batched deletion engine harness")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand(engine_args(
            Command::new("simulate")
                .about("Purge a seeded in-memory table through an unreliable store")
                .arg(
                    Arg::new("items")
                        .long("items")
                        .default_value("1000")
                        .value_parser(value_parser!(usize))
                        .help("Number of items to seed and purge"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("throttle-rate")
                        .long("throttle-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a call is throttled whole"),
                )
                .arg(
                    Arg::new("partial-rate")
                        .long("partial-rate")
                        .default_value("0.2")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a call applies only part of its batch"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("2")
                        .value_parser(value_parser!(u64))
                        .help("Simulated latency of every store call"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the report as JSON"),
                ),
        ))
        .subcommand(engine_args(
            Command::new("config").about("Print the effective engine configuration as TOML"),
        ))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> anyhow::Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

/// File (or `base`), then flag overrides, then validation
fn effective_config(args: &ArgMatches, base: PurgeConfig) -> anyhow::Result<PurgeConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => PurgeConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => base,
    };
    if let Some(&batch_size) = args.get_one::<usize>("batch-size") {
        config = config.with_batch_size(batch_size);
    }
    if let Some(&concurrency) = args.get_one::<usize>("concurrency") {
        config = config.with_concurrency(concurrency);
    }
    if let Some(&max_attempts) = args.get_one::<u32>("max-attempts") {
        config = config.with_max_attempts(max_attempts);
    }
    config.validate().context("invalid engine configuration")?;
    Ok(config)
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = SimulatorConfig {
        seed: arg(args, "seed")?,
        items: arg(args, "items")?,
        throttle_rate: arg(args, "throttle-rate")?,
        partial_rate: arg(args, "partial-rate")?,
        latency_ms: arg(args, "latency-ms")?,
        purge: effective_config(args, SimulatorConfig::fast_purge_config())?,
    };
    let json = args.get_flag("json");

    if !json {
        println!("Running Purge Simulator...");
        println!("Items: {}", config.items);
        println!("Seed: {}", config.seed);
        println!(
            "Throttle Rate: {} | Partial Rate: {}",
            config.throttle_rate, config.partial_rate
        );
        println!();
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling purge");
            trigger.cancel();
        }
    });

    let report = run_simulator_with_cancel(config, &cancel).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await,
        Some(("config", args)) => {
            let config = effective_config(args, PurgeConfig::default())?;
            print!("{}", config.to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}
