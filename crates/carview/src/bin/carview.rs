//! Carview server CLI
//!
//! Usage:
//!   carview serve [-c config.yaml] [-l addr] [-e ws_uri]   # Run the server
//!   carview probe <ip> [-p port] [-t ms]                   # Check a camera port

use argh::FromArgs;
use carview::camera::{CameraDirectory, MemoryDirectory};
use carview::engine::kurento::KurentoConnector;
use carview::{probe, server, ServerConfig, SessionManager};
use std::sync::Arc;
use std::time::Duration;

/// Carview - live vehicle camera viewing and recording
#[derive(FromArgs)]
struct Args {
    /// show version information
    #[argh(switch, short = 'V')]
    version: bool,

    #[argh(subcommand)]
    command: Option<Command>,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Serve(ServeArgs),
    Probe(ProbeArgs),
}

/// Run the signaling and HTTP server
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
struct ServeArgs {
    /// path to a YAML config file
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// listen address (overrides config)
    #[argh(option, short = 'l')]
    listen: Option<String>,

    /// media server WebSocket URI (overrides config)
    #[argh(option, short = 'e')]
    engine: Option<String>,
}

/// Check whether a camera's RTSP port accepts connections
#[derive(FromArgs)]
#[argh(subcommand, name = "probe")]
struct ProbeArgs {
    /// camera IP address
    #[argh(positional)]
    ip: String,

    /// TCP port (default: 1935)
    #[argh(option, short = 'p', default = "1935")]
    port: u16,

    /// timeout in milliseconds (default: 500)
    #[argh(option, short = 't', default = "500")]
    timeout: u64,
}

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading config from {}", path);
            ServerConfig::from_file(path)?
        }
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(engine) = args.engine {
        config.engine.ws_uri = engine;
    }

    let cameras: Arc<dyn CameraDirectory> = match &config.registry.path {
        Some(path) => Arc::new(MemoryDirectory::open(path)?),
        None => {
            log::warn!("No registry path configured, camera records are kept in memory only");
            Arc::new(MemoryDirectory::new())
        }
    };
    log::info!("{} camera(s) registered", cameras.list().await?.len());

    let connector = Arc::new(KurentoConnector::new(
        config.engine.ws_uri.clone(),
        config.engine.request_timeout(),
    ));
    let manager = SessionManager::new(config, cameras, connector);
    server::serve(manager).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Args = argh::from_env();

    if args.version {
        println!("carview {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match args.command {
        None => {
            eprintln!("Carview - live vehicle camera viewing and recording\n");
            eprintln!("Usage: carview <command>\n");
            eprintln!("Commands:");
            eprintln!("  serve     Run the signaling and HTTP server");
            eprintln!("              -c, --config <path>: YAML config file");
            eprintln!("              -l, --listen <addr>: listen address");
            eprintln!("              -e, --engine <uri>: media server WebSocket URI");
            eprintln!("  probe     Check whether a camera port accepts connections");
            eprintln!("\nRun 'carview <command> --help' for more information.");
        }
        Some(Command::Serve(args)) => run_serve(args).await?,
        Some(Command::Probe(args)) => {
            let result =
                probe::probe(&args.ip, args.port, Duration::from_millis(args.timeout)).await;
            println!("{}:{} is {}", args.ip, args.port, result.status());
            if !result.reachable {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
