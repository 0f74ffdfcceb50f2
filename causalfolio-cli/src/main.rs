//! Causalfolio CLI — one command per engine operation.
//!
//! Commands:
//! - `sample-data` — print the built-in dataset
//! - `upload <file>` — ingest a CSV file and report what was loaded
//! - `simulate --fed-rate <x>` — effects of a shock to the intervention node
//! - `portfolio [--allow-short]` — allocate under the configured scenario
//! - `backtest` — replay the causal strategy against the benchmark
//! - `graph` — nodes and edges of the fitted graph
//! - `config` — print the effective configuration as TOML
//!
//! Every engine command prints a `{status, data, error}` envelope on stdout
//! and exits non-zero when the status is `error`. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use causalfolio_core::cancel::CancelToken;
use causalfolio_runner::{dispatch, EngineConfig, Envelope, Operation, Session};

const DEFAULT_LOG_FILTER: &str = "causalfolio_core=info,causalfolio_runner=info";

#[derive(Parser)]
#[command(
    name = "causalfolio",
    about = "Causalfolio CLI — causal macro-to-asset portfolio engine"
)]
struct Cli {
    /// Path to a TOML engine config. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// CSV file to load into the session before running the command.
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Abort the operation after this many seconds.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Pretty-print the JSON envelope.
    #[arg(long, global = true, default_value_t = false)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the built-in sample dataset as price columns.
    SampleData,
    /// Ingest a CSV file (long or wide layout).
    Upload {
        /// File to upload.
        file: PathBuf,
    },
    /// Simulate the effect of a change in the intervention node.
    Simulate {
        /// Size of the shock, in the node's own units.
        #[arg(long, allow_negative_numbers = true)]
        fed_rate: f64,
    },
    /// Allocate a portfolio under the configured scenario shock.
    Portfolio {
        /// Allow negative weights.
        #[arg(long, default_value_t = false)]
        allow_short: bool,
    },
    /// Backtest the causal strategy against the benchmark.
    Backtest,
    /// Fit and print the causal graph.
    Graph,
    /// Print the effective configuration as TOML.
    Config,
}

impl Commands {
    /// Operation name and JSON body for engine commands; `None` for `config`.
    fn request(&self) -> Result<Option<(Operation, String)>> {
        let request = match self {
            Commands::SampleData => (Operation::SampleData, String::new()),
            Commands::Upload { file } => {
                let content = std::fs::read_to_string(file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let body = json!({ "filename": file_name(file), "content": content });
                (Operation::Upload, body.to_string())
            }
            Commands::Simulate { fed_rate } => {
                (Operation::Simulate, json!({ "fed_rate": fed_rate }).to_string())
            }
            Commands::Portfolio { allow_short } => (
                Operation::Portfolio,
                json!({ "allow_short": allow_short }).to_string(),
            ),
            Commands::Backtest => (Operation::Backtest, String::new()),
            Commands::Graph => (Operation::Graph, String::new()),
            Commands::Config => return Ok(None),
        };
        Ok(Some(request))
    }
}

enum Output {
    Envelope(Envelope),
    Config(String),
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    match execute(&cli)? {
        Output::Config(toml) => {
            print!("{toml}");
            Ok(ExitCode::SUCCESS)
        }
        Output::Envelope(envelope) => {
            let rendered = if cli.pretty {
                serde_json::to_string_pretty(&envelope)?
            } else {
                serde_json::to_string(&envelope)?
            };
            println!("{rendered}");
            Ok(if envelope.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .init();
}

fn execute(cli: &Cli) -> Result<Output> {
    let config = load_config(cli.config.as_deref())?;
    let Some((operation, body)) = cli.command.request()? else {
        return Ok(Output::Config(config.to_toml()?));
    };

    let session = Session::new(config);
    if let Some(path) = &cli.data {
        preload(&session, path)?;
    }
    let cancel = match cli.timeout_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::none(),
    };
    let envelope = dispatch(&session, operation.name(), &body, &cancel);
    Ok(Output::Envelope(envelope))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn preload(session: &Session, path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let loaded = session
        .upload(&file_name(path), &bytes)
        .with_context(|| format!("loading {}", path.display()))?;
    info!(
        path = %path.display(),
        series = loaded.dataset.series().len(),
        "preloaded data"
    );
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("causalfolio").chain(args.iter().copied())).unwrap()
    }

    fn write_csv(dir: &Path) -> PathBuf {
        let path = dir.join("macro.csv");
        let mut csv = String::from("date,symbol,value,kind\n");
        for day in 1..=28 {
            for (month, base) in [(1, 0.0), (2, 1.0), (3, 2.0)] {
                let t = base * 28.0 + day as f64;
                let date = format!("2024-{month:02}-{day:02}");
                csv.push_str(&format!("{date},fed_rate,{},macro\n", 4.0 + (t * 0.4).sin()));
                csv.push_str(&format!("{date},MKT,{},return\n", 0.002 * (t * 0.9).cos()));
                csv.push_str(&format!("{date},ABC,{},return\n", 0.003 * (t * 0.4).cos()));
            }
        }
        std::fs::write(&path, csv).unwrap();
        path
    }

    fn envelope(cli: &Cli) -> Envelope {
        match execute(cli).unwrap() {
            Output::Envelope(envelope) => envelope,
            Output::Config(_) => panic!("expected an envelope"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn negative_shock_parses() {
        let cli = parse(&["simulate", "--fed-rate", "-0.5"]);
        match cli.command {
            Commands::Simulate { fed_rate } => assert!((fed_rate + 0.5).abs() < 1e-12),
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = parse(&["portfolio", "--allow-short", "--timeout-secs", "5", "--pretty"]);
        assert_eq!(cli.timeout_secs, Some(5));
        assert!(cli.pretty);
        assert!(matches!(cli.command, Commands::Portfolio { allow_short: true }));
    }

    #[test]
    fn simulate_requires_a_shock() {
        assert!(Cli::try_parse_from(["causalfolio", "simulate"]).is_err());
    }

    #[test]
    fn upload_request_carries_file_name_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path());
        let command = Commands::Upload { file: path };
        let (operation, body) = command.request().unwrap().unwrap();
        assert_eq!(operation, Operation::Upload);
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["filename"], "macro.csv");
        assert!(body["content"].as_str().unwrap().starts_with("date,symbol"));
    }

    #[test]
    fn config_command_renders_defaults() {
        let cli = parse(&["config"]);
        let Output::Config(toml) = execute(&cli).unwrap() else {
            panic!("expected config output");
        };
        let round_trip = EngineConfig::from_toml(&toml).unwrap();
        assert_eq!(
            round_trip.config_hash().unwrap(),
            EngineConfig::default().config_hash().unwrap()
        );
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let cli = parse(&["graph", "--config", missing.to_str().unwrap()]);
        assert!(execute(&cli).is_err());
    }

    #[test]
    fn preloaded_data_feeds_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path());
        let cli = parse(&["simulate", "--fed-rate", "0.25", "--data", path.to_str().unwrap()]);
        let envelope = envelope(&cli);
        assert!(envelope.is_success(), "{:?}", envelope.error);
        let data = envelope.data.unwrap();
        let effects = data["effects"].as_object().unwrap();
        assert_eq!(effects.keys().collect::<Vec<_>>(), vec!["ABC"]);
    }

    #[test]
    fn sample_run_succeeds_without_flags() {
        let envelope = envelope(&parse(&["sample-data"]));
        assert!(envelope.is_success());
    }
}
