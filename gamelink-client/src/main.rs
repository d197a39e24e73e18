//! gamelink client entry point.
//!
//! ```text
//! gamelink-client                     Start with defaults
//! gamelink-client --config <path>     Use custom config TOML
//! gamelink-client --host <url>        Override the host URL
//! gamelink-client --quality 2k        Override the initial quality
//! gamelink-client --gen-config        Dump default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gamelink_core::{
    HttpHost, InputTransport, QualityController, QualityLevel, SessionController, SessionState,
};

use gamelink_client::config::ClientConfig;
use gamelink_client::console::{Console, ConsoleCommand};
use gamelink_client::rtc::WebRtcCapability;

/// Depth of the input intake queue.
const INPUT_QUEUE: usize = 256;

const AFTER_HELP: &str = "\
Input comes from the console (`button`, `axis`, `stick`). Physical \
controllers are not polled by this build, so the [input.gamepad] dead_zone \
and polling intervals have no effect; emit_threshold still applies.";

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "gamelink-client",
    version,
    about = "gamelink game-streaming client",
    after_help = AFTER_HELP
)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "gamelink.toml")]
    config: PathBuf,

    /// Streaming host URL (overrides config). Example: http://192.168.1.20:8080
    #[arg(long)]
    host: Option<String>,

    /// Initial quality level (overrides config): 720p, 1080p, 2k or 4k.
    #[arg(short, long)]
    quality: Option<QualityLevel>,

    /// Start a session immediately.
    #[arg(long)]
    connect: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", ClientConfig::default_toml()?);
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.session.host_url = host;
    }
    if let Some(level) = cli.quality {
        config.quality.initial = level;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("gamelink-client v{}", env!("CARGO_PKG_VERSION"));
    info!(host = %config.session.host_url, "streaming host");

    // ── 1. Wire up the session ──────────────────────────────────

    let host = Arc::new(HttpHost::new(
        &config.session.host_url,
        config.session.request_timeout(),
    )?);
    let capability = Arc::new(WebRtcCapability::new(config.session.ice_servers.clone()));
    let input = Arc::new(InputTransport::new(config.input.gamepad.emit_threshold));
    let (intake, input_pump) = input.intake(INPUT_QUEUE);

    let (session, controller) =
        SessionController::spawn(config.session.clone(), capability, host.clone(), input);

    let mut quality = QualityController::new(host, session.clone());
    quality.restore(config.quality.initial);

    // ── 2. Surface status changes ───────────────────────────────

    let mut status_rx = session.status_receiver();
    let status_task = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            match (&status.message, status.show_reconnect) {
                (Some(message), true) => warn!(state = %status.state, "{message} (type `restart`)"),
                (Some(message), false) => info!(state = %status.state, "{message}"),
                (None, _) if status.state == SessionState::Connected => info!("stream is live"),
                (None, _) => {}
            }
        }
    });

    let mut console = Console::new(session.clone(), quality, intake, config.input.joystick_radius);

    if cli.connect {
        if let Err(e) = console.execute(ConsoleCommand::Start).await {
            error!("start failed: {e}");
        }
    }

    // ── 3. Console loop ─────────────────────────────────────────

    println!("type `help` for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        let command = match ConsoleCommand::parse(&line) {
            None => continue,
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                println!("{e}");
                continue;
            }
        };
        let quit = command == ConsoleCommand::Quit;

        match console.execute(command).await {
            Ok(output) if !output.is_empty() => println!("{output}"),
            Ok(_) => {}
            Err(e) if e.is_user_visible() => error!("{e}"),
            Err(e) => println!("{e}"),
        }

        if quit {
            break;
        }
    }

    // ── 4. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    session.stop().await?;
    drop(console);
    drop(session);
    let _ = controller.await;
    let _ = input_pump.await;
    status_task.abort();

    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
