//! Line oriented front end. Turns typed commands into session intents and prints session
//! events; all protocol and connection logic lives in [`crate::device`].
use std::sync::{Arc, Mutex};
use futures::StreamExt;
use log::{error, info, warn};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::spawn;

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::session::{session, SessionController, Subscription};
use crate::device::types::{ConnectionState, ErrorKind, PeerDevice, SessionEvent};
use crate::error::{AppRunError, CommandError};
use crate::shell::args::Args;
use crate::shell::command::{PeerChoice, ShellCommand, HELP};
use crate::transport::btle::BtleTransport;

pub mod args;
pub mod command;

type PeerList = Arc<Mutex<Vec<PeerDevice>>>;

fn describe_state(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Idle => "Select A Device To Begin".to_string(),
        ConnectionState::Discovering => "Scanning for feeders...".to_string(),
        ConnectionState::Connecting(peer) => format!("Device Selected\n{}\nConnecting...", peer.name),
        ConnectionState::Connected(peer) => format!("Connected To\n{}", peer.name),
        ConnectionState::Disconnecting => "Disconnecting...".to_string(),
        ConnectionState::Failed(reason) => format!("Connection failed: {}\nType 'ack' to continue", reason),
    }
}

fn describe_error(kind: ErrorKind, detail: &str) -> String {
    match kind {
        ErrorKind::TransportUnavailable => format!("Bluetooth is not available: {}", detail),
        ErrorKind::ConnectTimeout => "Connection timed out, the feeder did not respond".to_string(),
        ErrorKind::NotConnected => "Connect to a feeder first".to_string(),
        ErrorKind::NoPeerSelected => "No device selected, type 'scan' to find one".to_string(),
        ErrorKind::LinkDropped => detail.to_string(),
        _ => format!("Error: {}", detail),
    }
}

fn print_peers(peers: &[PeerDevice]) {
    if peers.is_empty() {
        println!("No feeders found, type 'scan' to search again or 'cancel'");
        return;
    }

    for (index, peer) in peers.iter().enumerate() {
        println!("  {}. {}", index + 1, peer);
    }
    println!("Type 'select <n>' to connect");
}

async fn print_events(mut events: Subscription, peers: PeerList) {
    while let Some(event) = events.next().await {
        match event {
            SessionEvent::StateChanged { new, .. } => println!("{}", describe_state(&new)),
            SessionEvent::PeersDiscovered(found) => {
                print_peers(&found);
                *peers.lock().expect("Failed to lock peer list") = found;
            },
            SessionEvent::StatusReceived(report) => println!("{}", report.text),
            SessionEvent::Error { kind, detail } => println!("{}", describe_error(kind, &detail)),
        }
    }
}

fn choose_peer(choice: PeerChoice, peers: &PeerList) -> Option<PeerDevice> {
    let peers = peers.lock().expect("Failed to lock peer list");

    match choice {
        PeerChoice::Index(index) => peers.get(index - 1).cloned(),
        // addresses typed by hand need not come from the last scan
        PeerChoice::Address(address) => Some(
            peers.iter()
                .find(|peer| peer.address.eq_ignore_ascii_case(&address))
                .cloned()
                .unwrap_or_else(|| PeerDevice::new(address.clone(), address)),
        ),
    }
}

async fn execute(controller: &SessionController, command: ShellCommand, peers: &PeerList) -> Result<(), CommandError> {
    match command {
        ShellCommand::Scan => controller.begin_discovery()?,
        ShellCommand::Cancel => controller.cancel_discovery()?,
        ShellCommand::Peers => {
            let peers = peers.lock().expect("Failed to lock peer list");
            print_peers(&peers);
        },
        ShellCommand::Select(choice) => match choose_peer(choice, peers) {
            Some(peer) => controller.select_peer(peer)?,
            None => println!("No such device, type 'peers' to list them"),
        },
        ShellCommand::Connect => controller.connect()?,
        ShellCommand::Disconnect => controller.disconnect()?,
        ShellCommand::Acknowledge => controller.acknowledge()?,
        ShellCommand::Status => controller.send_status_request().await?,
        ShellCommand::Feed => controller.send_dispense().await?,
        ShellCommand::State => {
            let snapshot = controller.snapshot().await?;
            println!("{}", describe_state(&snapshot.state));
            if let Some(report) = snapshot.last_status {
                println!("Last status: {}", report.text);
            }
        },
        ShellCommand::Help => println!("{}", HELP),
        ShellCommand::Quit => {},
    }

    Ok(())
}

async fn load_config(config_io: &ConfigIO) -> Config {
    match config_io.load_or_init().await {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load config: {:?}", &err);
            println!("Failed to load config, using defaults: {}", &err);
            Config::default()
        },
    }
}

pub async fn run_shell(args: Args) -> Result<(), AppRunError> {
    let config_io = ConfigIO::open(args.config.as_deref())?;
    let mut instance_lock = config_io.instance_lock()?;
    let _guard = instance_lock.acquire()?;

    let mut config = load_config(&config_io).await;
    args.apply(&mut config);

    let transport = BtleTransport::new(config.btle()).await?;
    let (controller, session_handle) = session(transport, config.session());

    let peers: PeerList = Arc::new(Mutex::new(Vec::new()));
    let printer_handle = spawn(print_events(controller.subscribe(), peers.clone()));

    println!("{}", describe_state(&ConnectionState::Idle));
    println!("Type 'help' for a list of commands");

    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ShellCommand>() {
            Err(message) => println!("{}", message),
            Ok(ShellCommand::Quit) => break,
            Ok(command) => {
                // expected failures (e.g. not connected) are also reported as events
                if let Err(err) = execute(&controller, command, &peers).await {
                    info!("Command failed: {}", err);
                }
            },
        }
    }

    if let Err(err) = controller.shutdown().await {
        warn!("Session already stopped: {}", err);
    }
    if let Err(err) = session_handle.await {
        error!("Session task failed: {:?}", err);
    }
    if let Err(err) = printer_handle.await {
        error!("Event printer failed: {:?}", err);
    }

    Ok(())
}
