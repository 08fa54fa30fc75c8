//! bnb-node - interactive BnB router node
//!
//! Boots the relay, application server, UDP bridge and LED indicator, then
//! reads shell commands from stdin until EOF or Ctrl-C.
//!
//! ```bash
//! bnb-node                          # ./bnb.toml if present, else defaults
//! bnb-node --config router.toml
//! bnb-node --log-level debug        # RUST_LOG takes precedence
//! ```

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;

use clap::Parser;
use crossbeam_channel::{bounded, select};

use bnb_node::shell::Dispatcher;
use bnb_node::transceiver::SimulatedRadio;
use bnb_node::{Error, Node, NodeConfig, Result};

const DEFAULT_CONFIG: &str = "bnb.toml";

/// BnB CCN/UDP router node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    match path {
        Some(path) => NodeConfig::load(path),
        None if Path::new(DEFAULT_CONFIG).exists() => NodeConfig::load(Path::new(DEFAULT_CONFIG)),
        None => Ok(NodeConfig::default()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match &args.config {
        Some(path) => log::info!("Using config: {}", path.display()),
        None => log::info!("Using config: {} or defaults", DEFAULT_CONFIG),
    }

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        let _ = shutdown_tx.try_send(());
    })
    .map_err(|e| Error::Signal(format!("Error setting Ctrl-C handler: {}", e)))?;

    let (radio, _frames) = SimulatedRadio::new(&config.transceiver);
    let mut stdout = io::stdout();
    let node = Node::boot(config, Box::new(radio), &mut stdout)?;

    // Shell input arrives on its own thread so the main loop can also
    // watch for Ctrl-C
    let (line_tx, line_rx) = bounded::<String>(1);
    thread::Builder::new()
        .name("shell-input".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("stdin: {}", e);
                        break;
                    }
                }
            }
        })
        .map_err(|e| Error::ResourceExhausted(format!("failed to spawn shell-input: {}", e)))?;

    let shell = Dispatcher::new(&node);
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        select! {
            recv(line_rx) -> line => match line {
                Ok(line) => shell.run_line(&line, &mut stdout)?,
                Err(_) => {
                    writeln!(stdout)?;
                    break;
                }
            },
            recv(shutdown_rx) -> _ => {
                writeln!(stdout)?;
                break;
            }
        }
    }

    log::info!("Shutting down");
    node.shutdown()
}
