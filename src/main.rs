use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use bounce::actions;
use bounce::channels::{ChatTransport, StdioTransport, TelegramTransport};
use bounce::config::{BOT_TOKEN_ENV, BounceConfig, Overrides, TransportKind};
use bounce::control;
use bounce::engine::Engine;
use bounce::error::ConfigError;
use bounce::rules::RuleSet;

/// Rule-driven auto-responder for chat messages.
#[derive(Debug, Parser)]
#[command(name = "bounce", version, about)]
struct Cli {
    /// Rules file (default: $BOUNCE_RULES_FILE, then ~/.tgbounce/rules.json)
    rules_file: Option<PathBuf>,

    /// Chat transport (default: telegram when TELEGRAM_BOT_TOKEN is set, else stdio)
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    /// Validate the rules file and exit
    #[arg(long)]
    check: bool,

    /// Print the supported actions and exit
    #[arg(long)]
    list_actions: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if cli.list_actions {
        println!("{}", actions::render_catalog());
        return Ok(());
    }

    let config = BounceConfig::from_env(Overrides {
        rules_file: cli.rules_file,
        transport: cli.transport,
    })?;

    let rules = RuleSet::load(&config.rules_file)
        .await
        .with_context(|| format!("Failed to load rules from {}", config.rules_file.display()))?;

    if cli.check {
        println!("{}: {}", config.rules_file.display(), rules.summary());
        return Ok(());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        rules_file = %config.rules_file.display(),
        rules = rules.len(),
        transport = %config.transport,
        "Starting bounce"
    );

    let transport: Arc<dyn ChatTransport> = match config.transport {
        TransportKind::Telegram => {
            let token = config
                .bot_token
                .clone()
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: BOT_TOKEN_ENV.into(),
                    hint: "export TELEGRAM_BOT_TOKEN=123:ABC".into(),
                })?;
            Arc::new(TelegramTransport::new(token, config.poll_timeout))
        }
        TransportKind::Stdio => Arc::new(StdioTransport::new()),
    };

    let (control_tx, control_rx) = control::channel();
    let _signals = control::spawn_signal_listener(control_tx)
        .context("Failed to install signal handlers")?;

    let engine = Engine::new(rules, transport, config.engine_options());
    engine.run(control_rx).await?;

    tracing::info!("Bounce stopped");
    Ok(())
}

/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_tracing(verbose: u8) {
    let base = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let directives = match verbose {
        0 => base,
        1 => format!("{base},bounce=debug"),
        _ => format!("{base},bounce=trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&directives)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
