//! Runtime core for an always-on AI companion agent.
//!
//! Usage:
//!   companiond                      # terminal chat, config.yml in the cwd
//!   companiond --config path.yml    # explicit config file
//!   companiond --http --port 8787   # also serve the HTTP chat front-end

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};

use companiond::config::Config;
use companiond::controller::Controller;
use companiond::display::NullDisplay;
use companiond::frontend::terminal;
use companiond::frontend::ChatContext;

#[derive(Parser, Debug)]
#[command(name = "companiond")]
#[command(about = "Runtime core for an always-on AI companion agent", long_about = None)]
struct Args {
    /// Path to the YAML config file; missing is fine, defaults apply.
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    /// Directory for persisted state (memory/tasks/personality); overrides
    /// the config file's `state_dir` when given.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Serve the HTTP chat front-end alongside the terminal one.
    #[cfg(feature = "http-frontend")]
    #[arg(long)]
    http: bool,

    /// Port for the HTTP chat front-end.
    #[cfg(feature = "http-frontend")]
    #[arg(long, default_value = "8787")]
    port: u16,

    /// Skip the terminal chat front-end (useful when only --http is wanted).
    #[arg(long)]
    no_terminal: bool,

    /// Verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Quiet logging (warnings and above only).
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_level = if args.quiet { Level::WARN } else if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(log_level).init();

    info!("companiond starting...");

    let config = Config::load(&args.config);
    let state_dir = args.state_dir.clone().unwrap_or_else(|| config.state_dir());

    let controller = Controller::start(config, args.config.clone(), state_dir, Arc::new(NullDisplay), None).await?;
    let heartbeat_handle = controller.spawn_heartbeat();

    let context = ChatContext {
        brain: controller.brain.clone(),
        personality: controller.personality.clone(),
        memory: controller.memory.clone(),
        tasks: controller.tasks.clone(),
        mcp: Some(controller.mcp.clone()),
    };

    #[cfg(feature = "http-frontend")]
    let http_handle = if args.http {
        let context = context.clone();
        let port = args.port;
        Some(tokio::spawn(async move { companiond::frontend::http::serve(context, port).await }))
    } else {
        None
    };

    if !args.no_terminal {
        terminal::run(context).await;
    } else {
        tokio::signal::ctrl_c().await?;
    }

    heartbeat_handle.abort();
    #[cfg(feature = "http-frontend")]
    if let Some(handle) = http_handle {
        handle.abort();
    }

    controller.shutdown().await;
    Ok(())
}
