#![forbid(unsafe_code)]

//! `spark-gateway`: start and supervise an embedded Spark gateway.
//!
//! `run` launches the gateway, keeps it verified until a shutdown signal
//! arrives, then tears the process tree down. `resolve` prints the effective
//! engine configuration without launching anything.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use spark_gateway::config::ManagerConfig;
use spark_gateway::resolver::ConfigResolver;
use spark_gateway::{ConfValue, EngineConf, GatewayError, Result, Session};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "spark-gateway", about = "Embedded Spark gateway manager", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch the gateway and hold it until interrupted.
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Seconds between liveness checks; 0 disables them.
        #[arg(long, default_value_t = 30)]
        verify_interval: u64,
    },
    /// Print the effective engine configuration as JSON.
    Resolve {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Debug, Args)]
struct Overrides {
    /// Engine setting `key=value`; may be repeated.
    #[arg(long = "conf", value_name = "KEY=VALUE", value_parser = EngineConf::parse_pair)]
    conf: Vec<(String, ConfValue)>,
}

impl Overrides {
    /// Merge command-line overrides on top of the file's `[engine]` table.
    fn apply_to(self, base: &EngineConf) -> EngineConf {
        let mut conf = base.clone();
        conf.extend(self.conf.into_iter().collect());
        conf
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| GatewayError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = ManagerConfig::load_from_path(&args.config)?;
    info!(install_dir = %config.host.install_dir.display(), "configuration loaded");

    match args.command {
        Command::Resolve { overrides } => {
            let user_conf = overrides.apply_to(&config.engine);
            let resolved = ConfigResolver::new(&config.host_install()).resolve(&user_conf);
            let out = serde_json::json!({
                "local_mode": resolved.local_mode,
                "conf": resolved.conf,
            });
            let text = serde_json::to_string_pretty(&out)
                .map_err(|err| GatewayError::Config(format!("cannot render conf: {err}")))?;
            println!("{text}");
            Ok(())
        }
        Command::Run {
            overrides,
            verify_interval,
        } => {
            let user_conf = overrides.apply_to(&config.engine);
            supervise(&config, &user_conf, verify_interval).await
        }
    }
}

async fn supervise(
    config: &ManagerConfig,
    user_conf: &EngineConf,
    verify_interval: u64,
) -> Result<()> {
    let mut session = Session::new(config.session_options());
    let engine = session.start(user_conf).await?;
    info!(
        pid = engine.pid(),
        port = engine.endpoint().port,
        local_mode = engine.is_local(),
        "gateway session ready"
    );

    let result = hold(&mut session, verify_interval).await;
    session.stop().await;
    info!("spark-gateway shut down");
    result
}

/// Wait for a shutdown signal, verifying the session periodically.
async fn hold(session: &mut Session, verify_interval: u64) -> Result<()> {
    if verify_interval == 0 {
        shutdown_signal().await;
        info!("shutdown signal received");
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(verify_interval));
    ticker.tick().await;
    let signal = shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            () = &mut signal => {
                info!("shutdown signal received");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(err) = session.verify().await {
                    error!(%err, "gateway failed liveness check");
                    return Err(err);
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| GatewayError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| GatewayError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
