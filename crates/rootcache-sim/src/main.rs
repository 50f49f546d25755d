use anyhow::{anyhow, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use rootcache_core::{RecoveryMode, RootCacheConfig};
use rootcache_sim::{run_simulator, SimulatorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("TOML file with cache configuration");
    let json_arg = Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON");

    Command::new("rootcache-sim")
        .version(rootcache_sim::VERSION)
        .about("Recoverable root cache workload simulator")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run a seeded workload against the root cache")
                .arg(
                    Arg::new("files")
                        .long("files")
                        .default_value("64")
                        .value_parser(value_parser!(usize))
                        .help("Number of synthetic files"),
                )
                .arg(
                    Arg::new("requests")
                        .long("requests")
                        .default_value("2000")
                        .value_parser(value_parser!(usize))
                        .help("Number of root requests to issue"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .default_value("16")
                        .value_parser(value_parser!(usize))
                        .help("Requests in flight at once"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("capacity")
                        .long("capacity")
                        .value_parser(value_parser!(u64))
                        .help("Cache budget in bytes; overrides the config file"),
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .value_parser(["reparse", "serialize"])
                        .help("Recovery mode; overrides the config file"),
                )
                .arg(config_arg.clone())
                .arg(json_arg.clone()),
        )
        .subcommand(
            Command::new("report")
                .about("Print the effective configuration")
                .arg(config_arg)
                .arg(json_arg),
        )
}

fn load_config(args: &ArgMatches) -> anyhow::Result<RootCacheConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => RootCacheConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(SimulatorConfig::default().cache),
    }
}

fn required<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> anyhow::Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .ok_or_else(|| anyhow!("missing --{name}"))
}

async fn run(args: &ArgMatches) -> anyhow::Result<bool> {
    let mut cache = load_config(args)?;
    if let Some(capacity) = args.get_one::<u64>("capacity") {
        cache = cache.with_capacity_bytes(*capacity);
    }
    if let Some(mode) = args.get_one::<String>("mode") {
        cache = cache.with_recovery(match mode.as_str() {
            "serialize" => RecoveryMode::Serialize,
            _ => RecoveryMode::Reparse,
        });
    }

    let config = SimulatorConfig {
        seed: required(args, "seed")?,
        files: required(args, "files")?,
        requests: required(args, "requests")?,
        concurrency: required(args, "concurrency")?,
        cache,
        ..SimulatorConfig::default()
    };

    let report = run_simulator(config).await?;
    if args.get_flag("json") {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

fn report(args: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(args)?;
    if args.get_flag("json") {
        let report = serde_json::json!({
            "version": rootcache_sim::VERSION,
            "core_version": rootcache_core::VERSION,
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Rootcache Configuration");
        println!("=======================");
        println!();
        println!("Version: {}", rootcache_sim::VERSION);
        println!("Cache Capacity: {} bytes", config.cache_capacity_bytes);
        match config.time_to_idle_secs {
            Some(secs) => println!("Time To Idle: {secs}s"),
            None => println!("Time To Idle: disabled"),
        }
        println!(
            "Min Recoverable Length: {} bytes",
            config.min_length_for_recoverable_tree
        );
        println!("Recovery: {:?}", config.recovery);
        println!(
            "Retrieve Fallback To Reparse: {}",
            config.retrieve_fallback_to_reparse
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("run", args)) => {
            if !run(args).await? {
                std::process::exit(1);
            }
        }
        Some(("report", args)) => report(args)?,
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn run_overrides_apply() {
        let matches = cli().get_matches_from([
            "rootcache-sim",
            "run",
            "--capacity",
            "4096",
            "--mode",
            "serialize",
        ]);
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(required::<u64>(args, "seed").unwrap(), 42);
        assert_eq!(args.get_one::<u64>("capacity"), Some(&4096));
        assert_eq!(
            args.get_one::<String>("mode").map(String::as_str),
            Some("serialize")
        );
    }
}
