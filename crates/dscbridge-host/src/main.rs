//! dsc-bridge: serves DSC resource operations for the OMI host over an
//! inherited socket.
//!
//! Usage: `dsc-bridge <fd>`

mod bootstrap;

use std::os::fd::RawFd;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use dscbridge::{
    BridgeConfig, ConnectionSummary, Dispatcher, Registry, register_scripts, serve_connection,
};

const USAGE: &str = "Usage: dsc-bridge <fd>

Arguments:
  <fd>    Descriptor of the connected socket inherited from the host

Options:
  -h, --help       Print help
  -V, --version    Print version

Environment:
  OMI_HOME                          Installation root [default: /opt/omi]
  DSCBRIDGE_SCRIPTS_DIR             Script resource directory [default: $OMI_HOME/lib/Scripts/resources]
  DSCBRIDGE_BYTE_ORDER              little, big or native [default: little]
  DSCBRIDGE_HANDLER_TIMEOUT_SECS    Per-call handler timeout, 0 or unset for none
  DSCBRIDGE_LOG                     debug, info, warn or error [default: info]
  LOG_FORMAT                        json for JSON log lines";

#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    Serve(RawFd),
    Help,
    Version,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let fd = match parse_args(&args) {
        Ok(Invocation::Serve(fd)) => fd,
        Ok(Invocation::Help) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Ok(Invocation::Version) => {
            println!("dsc-bridge {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    init_tracing();

    match run(fd) {
        Ok(summary) => {
            tracing::info!(requests_served = summary.requests_served, "Bridge exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Bridge failed");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut fd: Option<RawFd> = None;

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => return Ok(Invocation::Help),
            "--version" | "-V" => return Ok(Invocation::Version),
            arg if arg.starts_with('-') && arg.parse::<RawFd>().is_err() => {
                return Err(format!("unknown flag: {arg}"));
            }
            arg => {
                if fd.is_some() {
                    return Err(format!("unexpected argument: {arg}"));
                }
                let parsed: RawFd = arg
                    .parse()
                    .map_err(|_| format!("invalid file descriptor: {arg}"))?;
                if parsed < 0 {
                    return Err(format!("invalid file descriptor: {arg}"));
                }
                fd = Some(parsed);
            }
        }
    }

    fd.map(Invocation::Serve)
        .ok_or_else(|| "missing required argument: <fd>".to_string())
}

/// Initialize tracing with DSCBRIDGE_LOG and LOG_FORMAT support.
///
/// Logs go to stderr; stdout is never written once the bridge is serving.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("DSCBRIDGE_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("dscbridge={level},dsc_bridge={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn run(fd: RawFd) -> anyhow::Result<ConnectionSummary> {
    // Adopt first so the descriptor is closed on every exit path below.
    let socket = bootstrap::adopt_socket(fd)
        .with_context(|| format!("file descriptor {fd} is not usable"))?;

    let config = Arc::new(BridgeConfig::from_env()?);
    bootstrap::ensure_omi_home(&config)?;
    tracing::info!(
        omi_home = %config.omi_home.display(),
        scripts_dir = %config.scripts_dir.display(),
        byte_order = %config.byte_order,
        "Starting bridge"
    );

    match bootstrap::write_pid_file(&config, nix::unistd::getuid().as_raw()) {
        Ok(path) => tracing::debug!(path = %path.display(), "Wrote pid file"),
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "Failed to write pid file"),
    }

    let mut registry = Registry::new();
    register_scripts(&mut registry, &config.scripts_dir).with_context(|| {
        format!(
            "failed to load resources from {}",
            config.scripts_dir.display()
        )
    })?;
    let dispatcher = Dispatcher::new(registry, Arc::clone(&config));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async {
        let stream = bootstrap::into_async(socket).context("failed to register socket")?;
        let summary = serve_connection(stream, &dispatcher, config.byte_order).await?;
        Ok(summary)
    })
}
