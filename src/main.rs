//! smartstack-probe CLI
//!
//! Usage:
//!   smartstack-probe [-c CONFIG] parse [FILE]          Parse the HAProxy config, print JSON
//!   smartstack-probe [-c CONFIG] down <service> [opts]  Stop a service, wait until it is down
//!   smartstack-probe [-c CONFIG] up <service> [opts]    Start a service, wait until it is healthy
//!   smartstack-probe [-c CONFIG] zk <command...>        Run the ZooKeeper CLI
//!   smartstack-probe [-c CONFIG] synapse [--write]      Render the synapse config
//!
//! Options for up/down:
//!   --max-wait SECS    Polling budget (default from [poll])
//!   --interval SECS    Delay between probes (default from [poll])

use anyhow::{bail, Context, Result};
use smartstack_probe::error::ErrorReport;
use smartstack_probe::haproxy::ConfigDocument;
use smartstack_probe::process::ZooKeeperCli;
use smartstack_probe::{synapse, Config, ServicePoller};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "smartstack.toml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug)]
enum Command {
    Help,
    Version,
    Parse { file: Option<PathBuf> },
    Down(TransitionOpts),
    Up(TransitionOpts),
    Zk { command: String },
    Synapse { write: bool },
}

#[derive(Debug)]
struct TransitionOpts {
    service: String,
    max_wait: Option<Duration>,
    interval: Option<Duration>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("smartstack_probe=info")),
        )
        .init();

    if let Err(e) = run() {
        match e.downcast_ref::<smartstack_probe::Error>() {
            Some(err) => {
                error!(code = err.code().as_str(), error = %err, "Command failed");
                eprintln!("{}", ErrorReport::from(err).to_json());
            }
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let (config_path, rest) = split_config_flag(&args)?;
    let command = parse_command(&rest)?;

    match command {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            println!("smartstack-probe {}", VERSION);
            return Ok(());
        }
        _ => {}
    }

    // `parse FILE` reads nothing from the node config
    let config = match &command {
        Command::Parse { file: Some(_) } => Config::default(),
        _ => load_config(config_path.as_deref(), Path::new(DEFAULT_CONFIG_PATH))?,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    match command {
        Command::Parse { file } => {
            let path = file.unwrap_or_else(|| config.haproxy.config_file_path.clone());
            let document = ConfigDocument::load(&path)?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Command::Down(opts) => {
            let poller = ServicePoller::from_config(&config)?;
            let max_wait = opts.max_wait.unwrap_or_else(|| config.poll.max_wait());
            let interval = opts.interval.unwrap_or_else(|| config.poll.poll_interval());
            runtime.block_on(poller.bring_down(&opts.service, max_wait, interval))?;
            println!("{} is down", opts.service);
        }
        Command::Up(opts) => {
            let poller = ServicePoller::from_config(&config)?;
            let max_wait = opts.max_wait.unwrap_or_else(|| config.poll.max_wait());
            let interval = opts.interval.unwrap_or_else(|| config.poll.poll_interval());
            runtime.block_on(poller.bring_up(&opts.service, max_wait, interval))?;
            println!("{} is up", opts.service);
        }
        Command::Zk { command } => {
            let cli = ZooKeeperCli::from_config(&config.zookeeper, config.control.timeout());
            let output = runtime.block_on(cli.run(&command))?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            if !output.success() {
                bail!("zkCli.sh exited with {}", output.status);
            }
        }
        Command::Synapse { write } => {
            let render = synapse::render(&config);
            for skipped in &render.skipped {
                warn!(service = %skipped.service, reason = %skipped.reason, "Service left out of synapse config");
            }
            if write {
                render.write_to(&config.synapse.config_file)?;
            } else {
                println!("{}", render.to_pretty_json()?);
            }
        }
        Command::Help | Command::Version => unreachable!("handled before loading config"),
    }

    Ok(())
}

/// Load the node config. An explicit path must exist; a missing default
/// file means built-in defaults.
fn load_config(explicit: Option<&Path>, default: &Path) -> Result<Config> {
    let path = match explicit {
        Some(path) => path,
        None if default.exists() => default,
        None => {
            info!(path = %default.display(), "No configuration file, using defaults");
            return Ok(Config::default());
        }
    };

    let config = Config::load(path)?;
    info!(path = %path.display(), services = config.services.len(), "Configuration loaded");
    Ok(config)
}

/// Pull `-c/--config PATH` out of the argument list
fn split_config_flag(args: &[String]) -> Result<(Option<PathBuf>, Vec<String>)> {
    let mut config = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let value = iter.next().context("--config requires a path")?;
                config = Some(PathBuf::from(value));
            }
            _ => rest.push(arg.clone()),
        }
    }

    Ok((config, rest))
}

fn parse_command(args: &[String]) -> Result<Command> {
    let Some(first) = args.first() else {
        return Ok(Command::Help);
    };

    let command = match first.as_str() {
        "help" | "--help" | "-h" => Command::Help,
        "version" | "--version" | "-V" => Command::Version,
        "parse" => Command::Parse {
            file: args.get(1).map(PathBuf::from),
        },
        "down" | "take-down" => Command::Down(parse_transition_opts(&args[1..])?),
        "up" | "bring-up" => Command::Up(parse_transition_opts(&args[1..])?),
        "zk" => {
            if args.len() < 2 {
                bail!("zk requires a command, e.g. `zk ls /`");
            }
            Command::Zk {
                command: shell_words::join(&args[1..]),
            }
        }
        "synapse" => Command::Synapse {
            write: args[1..].iter().any(|a| a == "--write" || a == "-w"),
        },
        other => bail!("unknown command '{}', see `smartstack-probe help`", other),
    };

    Ok(command)
}

fn parse_transition_opts(args: &[String]) -> Result<TransitionOpts> {
    let mut service = None;
    let mut max_wait = None;
    let mut interval = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--max-wait" | "-w" => {
                max_wait = Some(parse_seconds(iter.next(), "--max-wait")?);
            }
            "--interval" | "-i" => {
                interval = Some(parse_seconds(iter.next(), "--interval")?);
            }
            flag if flag.starts_with('-') => bail!("unknown option '{}'", flag),
            name => {
                if service.replace(name.to_string()).is_some() {
                    bail!("only one service may be given");
                }
            }
        }
    }

    Ok(TransitionOpts {
        service: service.context("a service name is required")?,
        max_wait,
        interval,
    })
}

fn parse_seconds(value: Option<&String>, flag: &str) -> Result<Duration> {
    let value = value.with_context(|| format!("{} requires a value", flag))?;
    let secs: f64 = value
        .parse()
        .with_context(|| format!("{} expects seconds, got '{}'", flag, value))?;
    if !secs.is_finite() || secs <= 0.0 {
        bail!("{} must be a positive number of seconds", flag);
    }
    Ok(Duration::from_secs_f64(secs))
}

fn print_help() {
    println!(
        "smartstack-probe {}

Usage: smartstack-probe [-c CONFIG] <command>

Commands:
  parse [FILE]                 Parse the HAProxy config (default: haproxy.config_file_path)
  down <service> [options]     Stop a service and wait until it refuses connections
  up <service> [options]       Start a service and wait until /health answers 200
  zk <command...>              Run zkCli.sh from the configured ZooKeeper install
  synapse [--write]            Render the synapse config (stdout, or synapse.config_file)
  help                         Show this help
  version                      Show the version

Options for up/down:
  -w, --max-wait SECS          Polling budget
  -i, --interval SECS          Delay between probes

The configuration file defaults to {}. Set RUST_LOG to adjust logging.",
        VERSION, DEFAULT_CONFIG_PATH
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_config_flag() {
        let (config, rest) = split_config_flag(&args(&["-c", "/etc/probe.toml", "up", "web"])).unwrap();
        assert_eq!(config, Some(PathBuf::from("/etc/probe.toml")));
        assert_eq!(rest, args(&["up", "web"]));

        assert!(split_config_flag(&args(&["up", "--config"])).is_err());
    }

    #[test]
    fn test_load_config_without_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let default = dir.path().join("smartstack.toml");

        let config = load_config(None, &default).unwrap();
        assert!(config.services.is_empty());
        assert_eq!(config.poll.max_wait(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_config_reads_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let default = dir.path().join("smartstack.toml");
        std::fs::write(&default, "[services.nerve]\nport = 1025\n").unwrap();

        let config = load_config(None, &default).unwrap();
        assert_eq!(config.services["nerve"].port, 1025);
    }

    #[test]
    fn test_load_config_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("probe.toml");
        let default = dir.path().join("smartstack.toml");

        let err = load_config(Some(missing.as_path()), &default).unwrap_err();
        match err.downcast_ref::<smartstack_probe::Error>() {
            Some(smartstack_probe::Error::FileNotFound { path, .. }) => assert_eq!(path, &missing),
            other => panic!("expected FileNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_transition() {
        match parse_command(&args(&["down", "nerve", "--max-wait", "5", "-i", "0.2"])).unwrap() {
            Command::Down(opts) => {
                assert_eq!(opts.service, "nerve");
                assert_eq!(opts.max_wait, Some(Duration::from_secs(5)));
                assert_eq!(opts.interval, Some(Duration::from_millis(200)));
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(parse_command(&args(&["up"])).is_err());
        assert!(parse_command(&args(&["up", "a", "b"])).is_err());
        assert!(parse_command(&args(&["up", "a", "--interval", "0"])).is_err());
    }

    #[test]
    fn test_parse_zk_and_synapse() {
        match parse_command(&args(&["zk", "ls", "/nerve/services"])).unwrap() {
            Command::Zk { command } => assert_eq!(command, "ls /nerve/services"),
            other => panic!("unexpected command {:?}", other),
        }
        assert!(matches!(
            parse_command(&args(&["synapse", "--write"])).unwrap(),
            Command::Synapse { write: true }
        ));
        assert!(matches!(parse_command(&[]).unwrap(), Command::Help));
        assert!(parse_command(&args(&["frobnicate"])).is_err());
    }
}
