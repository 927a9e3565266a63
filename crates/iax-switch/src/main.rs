//! iax-switch: run an IAX endpoint, place a test call or inspect a config

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use rvoip_iax_core::admin::{render_channels, render_stats};
use rvoip_iax_core::logging::{setup_logging, LogFormat, LoggingConfig};
use rvoip_iax_core::prelude::*;

#[derive(Parser)]
#[command(name = "iax-switch", version, about = "IAX call switch")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "IAX_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Overrides `[logging] level`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Include file and line in log events
    #[arg(long, global = true)]
    file_info: bool,

    /// Extra filter directive, e.g. rvoip_iax_core::endpoint=debug
    #[arg(long = "log", value_name = "DIRECTIVE", global = true)]
    directives: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve calls, echoing back whatever each caller sends
    Run {
        /// Seconds between channel reports; 0 disables them
        #[arg(long, default_value_t = 60)]
        report_interval: u64,
    },
    /// Place one call and keep it up for a while
    Call {
        /// [user[:secret]@]host[:port][/exten[@context]]
        dial: String,
        #[arg(long)]
        callerid: Option<String>,
        /// Preferred codec name, e.g. gsm
        #[arg(long)]
        codec: Option<String>,
        /// How long to stay on the call once it is accepted
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Print the effective configuration
    ShowConfig,
}

/// Answers every call and plays its media back to the caller
struct EchoPbx;

#[async_trait]
impl Pbx for EchoPbx {
    async fn start(&self, mut channel: IaxChannel) {
        info!(
            "Echoing {} for {} ({})",
            channel.name(),
            channel.info().callerid,
            channel.info().exten
        );
        if let Err(e) = channel.answer() {
            warn!("Cannot answer {}: {}", channel.name(), e);
            return;
        }
        while let Some(event) = channel.recv().await {
            match event {
                ChannelEvent::Frame(frame) if frame.frame_type != FrameType::Control => {
                    if let Err(e) = channel.write(frame) {
                        warn!("Echo on {} failed: {}", channel.name(), e);
                        break;
                    }
                }
                ChannelEvent::Hangup { cause } => {
                    info!("{} hung up ({:?})", channel.name(), cause);
                    break;
                }
                _ => {}
            }
        }
        channel.hangup();
    }
}

/// Command line switches win over the configuration file
fn logging_config(cli: &Cli, config: &IaxConfig) -> Result<LoggingConfig> {
    let mut logging = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging.level = level.clone();
    }
    if cli.json {
        logging.format = LogFormat::Json;
    }
    logging.file_info |= cli.file_info;
    logging.directives.extend(cli.directives.iter().cloned());
    logging.validate()?;
    Ok(logging)
}

fn load_config(path: Option<&Path>) -> Result<IaxConfig> {
    match path {
        Some(path) => IaxConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(IaxConfig::default()),
    }
}

async fn run(config: IaxConfig, report_interval: u64) -> Result<()> {
    let endpoint = IaxEndpoint::bind(config, Arc::new(EchoPbx)).await?;
    let admin = endpoint.admin();
    info!("Serving IAX calls on {}", endpoint.local_addr());

    let mut ticker = tokio::time::interval(Duration::from_secs(report_interval.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick(), if report_interval > 0 => {
                info!("\n{}", render_channels(&admin.channels()));
                info!("\n{}", render_stats(&admin.stats()));
            }
        }
    }

    info!("Shutting down");
    endpoint.shutdown().await?;
    Ok(())
}

async fn call(
    mut config: IaxConfig,
    dial: &str,
    callerid: Option<String>,
    codec: Option<String>,
    seconds: u64,
) -> Result<()> {
    // Any free port will do for a one-off call
    config.general.port = 0;
    let format = match codec {
        Some(name) => Some(
            format::by_name(&name).with_context(|| format!("unknown codec '{}'", name))?,
        ),
        None => None,
    };

    let endpoint = IaxEndpoint::bind(config, Arc::new(NullPbx)).await?;
    let mut channel = endpoint.call(dial, CallOptions { callerid, format }).await?;
    info!("Calling {} as {}", dial, channel.name());

    let outcome = loop {
        let event = tokio::time::timeout(Duration::from_secs(30), channel.recv())
            .await
            .context("no answer within 30 seconds")?;
        match event {
            Some(ChannelEvent::Accepted { format }) => {
                info!("Call accepted with {}", format::name(format));
                break Ok(());
            }
            Some(ChannelEvent::Hangup { cause }) => {
                break match cause {
                    Some(error) => Err(anyhow::Error::new(error).context("call failed")),
                    None => Err(anyhow::anyhow!("remote hung up")),
                };
            }
            Some(_) => {}
            None => bail!("call vanished"),
        }
    };

    if outcome.is_ok() {
        let hold = tokio::time::sleep(Duration::from_secs(seconds));
        tokio::pin!(hold);
        loop {
            tokio::select! {
                _ = &mut hold => break,
                event = channel.recv() => match event {
                    Some(ChannelEvent::Hangup { cause }) => {
                        info!("Remote hung up ({:?})", cause);
                        break;
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
        channel.hangup();
        // Let the HANGUP get acknowledged
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    endpoint.shutdown().await?;
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    setup_logging(&logging_config(&cli, &config)?, "iax-switch")?;

    match cli.command {
        Command::Run { report_interval } => run(config, report_interval).await,
        Command::Call {
            dial,
            callerid,
            codec,
            seconds,
        } => call(config, &dial, callerid, codec, seconds).await,
        Command::ShowConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
