//! tickwatch - threshold monitor with multi-channel alerts.

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use tickwatch_bot::{AppConfig, Application};
use tickwatch_core::{ChannelKind, DirectConfig, WebhookConfig};
use tickwatch_notify::{ChannelUpdate, SendOptions};
use tracing::{info, warn};

/// Price threshold monitor
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKWATCH_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Synthetic quotes and in-memory delivery
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the scheduler until SIGINT/SIGTERM
    Run,
    /// Run a single monitoring cycle
    Once,
    /// Print registry and channel totals
    Status,
    /// Print the effective configuration
    Config,
    /// Manage tracked instruments
    #[command(subcommand)]
    Instrument(InstrumentCommand),
    /// Manage notification channels
    #[command(subcommand)]
    Channel(ChannelCommand),
    /// Send a message through configured channels
    Notify(NotifyArgs),
}

#[derive(Subcommand, Debug)]
enum InstrumentCommand {
    /// Track a new symbol (a quote must be available)
    Add {
        symbol: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "US")]
        market: String,
        #[arg(long, default_value_t = 5.0)]
        up: f64,
        #[arg(long, default_value_t = -5.0, allow_negative_numbers = true)]
        down: f64,
    },
    Remove {
        symbol: String,
    },
    Enable {
        symbol: String,
    },
    Disable {
        symbol: String,
    },
    SetThresholds {
        symbol: String,
        #[arg(long)]
        up: f64,
        #[arg(long, allow_negative_numbers = true)]
        down: f64,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum ChannelCommand {
    /// Add an application message channel
    AddDirect {
        name: String,
        #[arg(long)]
        corp_id: String,
        #[arg(long)]
        corp_secret: String,
        #[arg(long)]
        agent_id: String,
        #[arg(long, default_value = "@all")]
        recipient: String,
        #[arg(long)]
        disabled: bool,
    },
    /// Add a group robot webhook channel
    AddWebhook {
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        disabled: bool,
    },
    Rename {
        id: String,
        name: String,
    },
    Remove {
        id: String,
    },
    Enable {
        id: String,
    },
    Disable {
        id: String,
    },
    /// Check connectivity of one channel, or all when no id is given
    Test {
        id: Option<String>,
    },
    List {
        /// Only this type ("direct" or "webhook")
        #[arg(long)]
        kind: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct NotifyArgs {
    message: String,
    /// Deliver to this channel id only
    #[arg(long, conflicts_with = "kind")]
    channel: Option<String>,
    /// Deliver to every valid channel of this type
    #[arg(long)]
    kind: Option<String>,
    #[arg(long)]
    title: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = AppConfig::resolve_path(args.config);
    let config = AppConfig::load(&config_path)?;

    tickwatch_telemetry::init_logging(&config.telemetry.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %config_path.display(),
        "Starting tickwatch"
    );

    let app = Application::new(config, Some(config_path), args.mock)?;

    match args.command {
        Command::Run => run(&app).await?,
        Command::Once => {
            let result = app.run_once().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&app.status_totals())?);
        }
        Command::Config => print!("{}", app.config().to_toml_string()?),
        Command::Instrument(cmd) => instrument(&app, cmd).await?,
        Command::Channel(cmd) => channel(&app, cmd).await?,
        Command::Notify(notify_args) => notify(&app, notify_args).await?,
    }

    Ok(())
}

async fn run(app: &Application) -> Result<()> {
    let first = app.scheduler().start().await?;
    info!(
        monitored = first.monitored,
        alerts = first.alerts_sent,
        errors = first.errors,
        "Initial cycle complete"
    );

    shutdown_signal().await;
    info!("Shutdown signal received");
    app.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn instrument(app: &Application, cmd: InstrumentCommand) -> Result<()> {
    match cmd {
        InstrumentCommand::Add {
            symbol,
            name,
            market,
            up,
            down,
        } => {
            let quote = app.add_instrument(&symbol, &name, &market, up, down).await?;
            println!(
                "added {} at {:.2} ({:+.2}%){}",
                quote.symbol,
                quote.current_price,
                quote.change_percent,
                if quote.is_synthetic { " [synthetic]" } else { "" }
            );
        }
        InstrumentCommand::Remove { symbol } => {
            let removed = app.remove_instrument(&symbol)?;
            println!("removed {}", removed.symbol);
        }
        InstrumentCommand::Enable { symbol } => {
            app.set_instrument_enabled(&symbol, true)?;
            println!("enabled {symbol}");
        }
        InstrumentCommand::Disable { symbol } => {
            app.set_instrument_enabled(&symbol, false)?;
            println!("disabled {symbol}");
        }
        InstrumentCommand::SetThresholds { symbol, up, down } => {
            app.set_thresholds(&symbol, up, down)?;
            println!("{symbol}: up {up}%, down {down}%");
        }
        InstrumentCommand::List => {
            println!("{}", serde_json::to_string_pretty(&app.instrument_status())?);
        }
    }
    Ok(())
}

async fn channel(app: &Application, cmd: ChannelCommand) -> Result<()> {
    match cmd {
        ChannelCommand::AddDirect {
            name,
            corp_id,
            corp_secret,
            agent_id,
            recipient,
            disabled,
        } => {
            let ch = app.add_direct_channel(
                &name,
                DirectConfig {
                    corp_id,
                    corp_secret,
                    agent_id,
                    recipient,
                },
                !disabled,
            );
            println!("added direct channel {} ({})", ch.name, ch.id);
        }
        ChannelCommand::AddWebhook { name, url, disabled } => {
            let ch = app.add_webhook_channel(&name, WebhookConfig { endpoint_url: url }, !disabled);
            println!("added webhook channel {} ({})", ch.name, ch.id);
        }
        ChannelCommand::Rename { id, name } => {
            let ch = app.update_channel(
                &id,
                ChannelUpdate {
                    name: Some(name),
                    ..ChannelUpdate::default()
                },
            )?;
            println!("renamed {} to {}", ch.id, ch.name);
        }
        ChannelCommand::Remove { id } => {
            let ch = app.remove_channel(&id)?;
            println!("removed {} ({})", ch.name, ch.id);
        }
        ChannelCommand::Enable { id } => {
            let ch = app.set_channel_enabled(&id, true)?;
            println!("enabled {} ({})", ch.name, ch.id);
        }
        ChannelCommand::Disable { id } => {
            let ch = app.set_channel_enabled(&id, false)?;
            println!("disabled {} ({})", ch.name, ch.id);
        }
        ChannelCommand::Test { id: Some(id) } => {
            let test = app.test_channel(&id).await?;
            println!("{id}: {} {}", if test.success { "ok" } else { "FAILED" }, test.message);
        }
        ChannelCommand::Test { id: None } => {
            for (id, test) in app.test_all_channels().await {
                println!("{id}: {} {}", if test.success { "ok" } else { "FAILED" }, test.message);
            }
        }
        ChannelCommand::List { kind } => {
            let kind = kind.map(|k| k.parse::<ChannelKind>()).transpose()?;
            for ch in app.channels(kind) {
                let state = match ch.invalid_reason() {
                    None => "valid".to_string(),
                    Some(reason) => reason,
                };
                println!("{}  {:<8} {:<24} {}", ch.id, ch.kind(), ch.name, state);
            }
        }
    }
    Ok(())
}

async fn notify(app: &Application, args: NotifyArgs) -> Result<()> {
    let options = SendOptions {
        title: args.title,
        report_hint: None,
    };

    if let Some(id) = args.channel {
        let outcome = app.notify_channel(&id, &args.message, &options).await?;
        println!("{id}: {outcome}");
        return Ok(());
    }

    let report = match args.kind {
        Some(kind) => {
            app.notify_kind(kind.parse::<ChannelKind>()?, &args.message, &options)
                .await
        }
        None => app.notify_all(&args.message, &options).await,
    };
    for (id, entry) in report.iter() {
        println!("{id}  {:<8} {:<24} {}", entry.kind, entry.channel_name, entry.outcome);
    }
    if report.is_empty() {
        println!("no valid channels");
    }
    Ok(())
}
