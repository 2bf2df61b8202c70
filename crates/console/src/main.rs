//! Werewolf Console Client
//!
//! A terminal front-end over the backend session: loads configuration, sets
//! up logging, bridges the game server over TCP and renders the session state
//! as text. Commands are typed on stdin (see `/help`).

mod commands;
mod config;
mod transport;
mod view;

use std::sync::Arc;

use anyhow::Result;
use backend::{Command, SessionHandle, transport_pair};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::Notify,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{
    commands::{ConsoleAction, HELP, parse_line, say_command},
    config::ClientConfig,
    transport::BridgeExit,
    view::{ConsoleView, status_line},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ClientConfig::load()?;

    // RUST_LOG wins over the configured level.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = &config.created_config {
        info!("Config file not found, created default: {}", path.display());
    }
    info!("Connecting to {}", config.server);

    let (link, peer) = transport_pair();
    let repaint = Arc::new(Notify::new());
    let repaint_cb = repaint.clone();
    let handle = SessionHandle::new(
        link,
        config.session_config(),
        config.output_selection(),
        move || repaint_cb.notify_one(),
    );

    let mut bridge = tokio::spawn(transport::run_bridge(config.server.clone(), peer));
    let mut bridge_running = true;

    let mut view = ConsoleView::default();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);

    loop {
        tokio::select! {
            _ = repaint.notified() => {
                let (lines, alert) = view.render(&handle.state());
                for line in lines {
                    println!("{}", line);
                }
                if let Some(alert) = alert {
                    println!("!! {}", alert);
                    handle.send(Command::DismissAlert);
                }
            }

            line = stdin.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                match parse_line(&line, config.voice_enabled) {
                    Ok(ConsoleAction::Send(command)) => handle.send(command),
                    Ok(ConsoleAction::Say(text)) => {
                        match say_command(text, handle.state().surface) {
                            Ok(command) => handle.send(command),
                            Err(e) => println!("{}", e),
                        }
                    }
                    Ok(ConsoleAction::ShowStatus) => println!("{}", status_line(&handle.state())),
                    Ok(ConsoleAction::ShowDevices) => {
                        view.request_devices();
                        handle.send(Command::RefreshAudioDevices);
                    }
                    Ok(ConsoleAction::Help) => println!("{}", HELP),
                    Ok(ConsoleAction::Quit) => break,
                    Ok(ConsoleAction::Nothing) => {}
                    Err(e) => println!("{}", e),
                }
            }

            result = &mut bridge, if bridge_running => {
                bridge_running = false;
                match result {
                    Ok(Ok(BridgeExit::ServerClosed)) => info!("Server connection closed"),
                    Ok(Ok(BridgeExit::SessionClosed)) => break,
                    Ok(Err(e)) => error!("{:#}", e),
                    Err(e) => error!("Transport task failed: {}", e),
                }
            }
        }
    }

    info!("Shutting down");
    bridge.abort();
    drop(handle);
    Ok(())
}
