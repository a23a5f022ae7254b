use anyhow::{Context, Result};
use attractap_core::{CardUid, ServerConfig};
use attractap_emulator::{ConsoleCommand, HELP, ScreenSink, SimulatedWifi, TerminalConfig, TransportKind};
use attractap_firmware::FileImageSlot;
use attractap_hardware::mock::{MockCard, MockChip, MockChipHandle};
use attractap_hardware::{CardControllerConfig, CardControllerService};
use attractap_network::{
    CertificateBundle, TcpTransport, TcpTransportConfig, Transport, WsTransport, WsTransportConfig,
};
use attractap_session::{SessionHandle, SessionManager};
use attractap_storage::{JsonFileStore, SharedStore, WifiCredentials};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "attractap-emulator")]
#[command(about = "Attractap NFC reader terminal")]
#[command(version)]
struct Args {
    /// Terminal configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for preferences and firmware images
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Server as host:port, used instead of the stored one
    #[arg(long, value_parser = parse_server)]
    server: Option<ServerConfig>,
}

fn parse_server(value: &str) -> std::result::Result<ServerConfig, String> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got {value}"))?;
    let port = port.parse::<u16>().map_err(|e| e.to_string())?;
    let server = ServerConfig::new(host, port);
    server.validate().map_err(|e| e.to_string())?;
    Ok(server)
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG=debug for detailed logs
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => TerminalConfig::load(path)?,
        None => TerminalConfig::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(server) = args.server {
        config.server = Some(server);
    }

    match config.transport {
        TransportKind::WebSocket => run(config, WsTransport::new(WsTransportConfig::default())).await,
        TransportKind::Tcp => run(config, TcpTransport::new(TcpTransportConfig::default())).await,
    }
}

async fn run<T: Transport>(config: TerminalConfig, transport: T) -> Result<()> {
    let store: SharedStore = Arc::new(
        JsonFileStore::open(&config.data_dir)
            .with_context(|| format!("opening data directory {}", config.data_dir.display()))?,
    );
    let slot = FileImageSlot::open(config.firmware_dir()).context("opening firmware slot")?;
    let bundle = match &config.certificates {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading certificate bundle {}", path.display()))?;
            CertificateBundle::from_pem_bundle(&text)
        }
        None => CertificateBundle::default(),
    };
    info!(anchors = bundle.len(), "Trust anchors loaded");

    let (chip, chip_handle) = MockChip::with_name("Emulated PN532");
    let (card, taps) = CardControllerService::spawn(chip, CardControllerConfig::default());

    let screen = Arc::new(ScreenSink::new(config.virtual_display()));
    let wifi = Arc::new(SimulatedWifi::new(store.clone()));
    let restart = Arc::new(Notify::new());
    let restart_signal = restart.clone();

    let mut builder = SessionManager::builder(transport, card.handle(), store)
        .config(config.session_config())
        .display(screen.clone())
        .network(wifi.clone())
        .device_control(Arc::new(move || restart_signal.notify_one()))
        .tap_listener(Arc::new(|uid: &CardUid| info!(%uid, "Card detected")))
        .certificates(bundle)
        .image_slot(slot);
    if let Some(server) = config.server.clone() {
        builder = builder.server(server);
    }
    let session = builder.build()?;
    let handle = session.handle();

    if session.server().is_none() {
        warn!("No server configured, use `server <host> <port>`");
    }
    println!("{HELP}");

    let console = tokio::spawn(console_loop(handle.clone(), chip_handle, wifi));
    let refresher = tokio::spawn(refresh_loop(screen));

    let run = session.run(taps);
    tokio::pin!(run);
    tokio::select! {
        result = &mut run => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            handle.shutdown().await?;
            run.await?;
        }
        _ = restart.notified() => {
            info!("Restart requested, exiting so the supervisor can start the new image");
        }
    }

    console.abort();
    refresher.abort();
    card.shutdown().await;
    Ok(())
}

/// Execute console commands until stdin closes or `quit`.
async fn console_loop(handle: SessionHandle, chip: MockChipHandle, wifi: Arc<SimulatedWifi>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Console read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        let result = match command {
            ConsoleCommand::Tap(uid) => {
                chip.tap_card(card_with_uid(uid));
                Ok(())
            }
            ConsoleCommand::Present(uid) => {
                chip.present_card(card_with_uid(uid));
                Ok(())
            }
            ConsoleCommand::Remove => {
                chip.remove_card();
                Ok(())
            }
            ConsoleCommand::Cancel => handle.cancel().await,
            ConsoleCommand::Select(id) => handle.select_item(id).await,
            ConsoleCommand::Server(server) => handle.set_server_config(server).await,
            ConsoleCommand::WifiJoin { ssid, password } => {
                if let Err(e) = wifi.join(&WifiCredentials { ssid, password }) {
                    warn!(error = %e, "Cannot save Wi-Fi credentials");
                }
                Ok(())
            }
            ConsoleCommand::WifiDown => {
                wifi.drop_link();
                Ok(())
            }
            ConsoleCommand::WifiForget => {
                if let Err(e) = wifi.forget() {
                    warn!(error = %e, "Cannot delete Wi-Fi credentials");
                }
                Ok(())
            }
            ConsoleCommand::Status => {
                match serde_json::to_string_pretty(&handle.status()) {
                    Ok(status) => println!("{status}"),
                    Err(e) => warn!(error = %e, "Cannot format status"),
                }
                Ok(())
            }
            ConsoleCommand::Help => {
                println!("{HELP}");
                Ok(())
            }
            ConsoleCommand::Quit => {
                if let Err(e) = handle.shutdown().await {
                    warn!(error = %e, "Shutdown failed");
                }
                break;
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "Command failed");
            break;
        }
    }
}

async fn refresh_loop(screen: Arc<ScreenSink>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        ticker.tick().await;
        screen.refresh();
    }
}

/// A factory-fresh NTAG 424 with `uid`.
fn card_with_uid(uid: CardUid) -> MockCard {
    let mut card = MockCard::ntag424([0; 7]);
    card.uid = uid;
    card
}
