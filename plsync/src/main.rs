use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use plsync::lock::{LockError, LockMode, RunLock};
use plsync::logging::{LogConfig, init_logging};
use plsync::runner::{RunConfig, SyncRuntime};

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run {
        config: Option<PathBuf>,
        lock: LockMode,
    },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut config = None;
    let mut lock = LockMode::Immediate;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliMode::Help),
            "--config" => {
                let value = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(value));
            }
            "--wait" => lock = LockMode::Indefinite,
            "--wait-secs" => {
                let value = args.next().context("--wait-secs needs a number")?;
                let secs = value
                    .parse::<u64>()
                    .with_context(|| format!("invalid --wait-secs value: {value}"))?;
                lock = LockMode::Bounded(Duration::from_secs(secs));
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(CliMode::Run { config, lock })
}

fn print_usage() {
    println!("Usage: plsync [--config <path>] [--wait | --wait-secs <n>]");
    println!("  --config <path>   Playlist file (default: $PLSYNC_CONFIG or /config.yaml)");
    println!("  --wait            Wait for a running instance to finish");
    println!("  --wait-secs <n>   Wait at most n seconds for a running instance");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let (config_override, lock_mode) = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            print_usage();
            return Ok(());
        }
        CliMode::Run { config, lock } => (config, lock),
    };
    init_logging(&LogConfig::from_env()).context("failed to initialize logging")?;

    let mut config = RunConfig::from_env();
    if let Some(path) = config_override {
        config.config_path = path;
    }

    let acquired = tokio::select! {
        res = RunLock::acquire(&config.lock_path, lock_mode, config.lock_stale_after) => res,
        res = tokio::signal::ctrl_c() => {
            res.context("failed waiting for shutdown signal")?;
            tracing::info!("interrupted while waiting for the run lock");
            return Ok(());
        }
    };
    let _lock = match acquired {
        Ok(lock) => lock,
        Err(LockError::Busy(path)) => {
            tracing::info!(path = %path.display(), "instance already running");
            return Ok(());
        }
        Err(err) => return Err(err).context("failed to acquire run lock"),
    };

    let runtime = SyncRuntime::bootstrap(&config).await?;
    tokio::select! {
        _summary = runtime.run() => {}
        res = tokio::signal::ctrl_c() => {
            res.context("failed waiting for shutdown signal")?;
            tracing::warn!("interrupted, releasing run lock");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("plsync")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parse_cli_mode_defaults_to_single_attempt() {
        assert_eq!(
            parse_cli_mode(args(&[])).unwrap(),
            CliMode::Run {
                config: None,
                lock: LockMode::Immediate,
            }
        );
    }

    #[test]
    fn parse_cli_mode_reads_config_and_wait() {
        assert_eq!(
            parse_cli_mode(args(&["--config", "/etc/p.yaml", "--wait-secs", "30"])).unwrap(),
            CliMode::Run {
                config: Some(PathBuf::from("/etc/p.yaml")),
                lock: LockMode::Bounded(Duration::from_secs(30)),
            }
        );
        assert!(matches!(
            parse_cli_mode(args(&["--wait"])).unwrap(),
            CliMode::Run {
                lock: LockMode::Indefinite,
                ..
            }
        ));
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        assert_eq!(parse_cli_mode(args(&["-h"])).unwrap(), CliMode::Help);
        assert_eq!(
            parse_cli_mode(args(&["--wait", "--help"])).unwrap(),
            CliMode::Help
        );
    }

    #[test]
    fn parse_cli_mode_rejects_bad_input() {
        assert!(parse_cli_mode(args(&["--config"])).is_err());
        assert!(parse_cli_mode(args(&["--wait-secs", "soon"])).is_err());
        assert!(parse_cli_mode(args(&["--verbose"])).is_err());
    }
}
