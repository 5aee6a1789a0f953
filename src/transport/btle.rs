use std::sync::Arc;
use btleplug::api::{Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::channel::mpsc::UnboundedSender;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{BoxStream, StreamExt};
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::constants::{IS_CONNECTED_DEADLINE, POLL_DELAY};
use crate::device::types::PeerDevice;
use crate::error::{ConnectError, TransportError, WriteError};
use crate::transport::{Link, LinkEvent, Transport};

#[derive(Debug, Clone)]
pub struct BtleSettings {
    pub service_uuid: Uuid,
    pub data_uuid: Uuid,
    pub scan_duration: Duration,
    // when set, peers whose advertised name contains this text are accepted even if they do not
    // advertise the serial service (many UART bridges leave it out of the advertisement)
    pub name_filter: Option<String>,
}

/// Serial-over-Bluetooth transport for UART bridge modules exposing a single data characteristic.
#[derive(Clone)]
pub struct BtleTransport {
    manager: Arc<Manager>,
    settings: BtleSettings,
}

impl BtleTransport {
    pub async fn new(settings: BtleSettings) -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(radio_error)?;
        Ok(BtleTransport { manager: Arc::new(manager), settings })
    }
}

fn radio_error(err: btleplug::Error) -> TransportError {
    match err {
        btleplug::Error::PermissionDenied => TransportError::Unavailable {
            reason: "permission to use bluetooth was denied".to_string(),
        },
        btleplug::Error::NotSupported(what) => TransportError::Unavailable { reason: what },
        source => TransportError::Btle { source },
    }
}

fn connect_error(err: btleplug::Error, address: &str) -> ConnectError {
    match err {
        btleplug::Error::DeviceNotFound => ConnectError::PeerNotFound { address: address.to_string() },
        btleplug::Error::NotConnected => ConnectError::Rejected { reason: "peer closed the connection".to_string() },
        btleplug::Error::PermissionDenied | btleplug::Error::NotSupported(_) => radio_error(err).into(),
        source => ConnectError::Btle { source },
    }
}

async fn usable_adapters(manager: &Manager) -> Result<Vec<Adapter>, TransportError> {
    let adapters = manager.adapters().await.map_err(radio_error)?;

    if adapters.is_empty() {
        return Err(TransportError::Unavailable { reason: "no bluetooth adapter found".to_string() });
    }

    Ok(adapters)
}

// On macOS the address is hidden (all zeros), fall back to the platform identifier
fn peer_address(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address.into_inner() == [0u8; 6] {
        return format!("{:?}", peripheral.id());
    }
    address.to_string()
}

async fn start_scanning(manager: &Manager, settings: &BtleSettings) -> Result<Vec<Adapter>, TransportError> {
    let adapters = usable_adapters(manager).await?;

    let filter = match settings.name_filter {
        Some(_) => ScanFilter::default(),
        None => ScanFilter { services: vec![settings.service_uuid] },
    };

    for adapter in &adapters {
        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        adapter.start_scan(filter.clone()).await.map_err(radio_error)?;
    }

    Ok(adapters)
}

async fn list_peers(adapters: &Vec<Adapter>, settings: &BtleSettings) -> Vec<PeerDevice> {
    let mut peers: Vec<PeerDevice> = Vec::new();

    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                    continue;
                },
                Ok(None) => {
                    debug!("Peripheral has no properties");
                    continue;
                },
                Ok(Some(properties)) => properties,
            };

            let name = properties.local_name.unwrap_or(String::from("Unknown"));
            let name_matches = settings.name_filter
                .as_ref()
                .map_or(false, |filter| name.contains(filter.as_str()));

            // Some environments ignore the filter, so make sure to check the service uuid again
            if !properties.services.contains(&settings.service_uuid) && !name_matches {
                continue;
            }

            let peer = PeerDevice::new(name, peer_address(&peripheral));
            if !peers.contains(&peer) {
                info!("Found peer {} {:?} {:?}", peer, properties.address_type, properties.services);
                peers.push(peer);
            }
        }
    }

    peers
}

async fn find_peripheral(adapters: &Vec<Adapter>, address: &str) -> Result<Option<Peripheral>, ConnectError> {
    for adapter in adapters {
        let peripherals = adapter.peripherals().await
            .map_err(|err| connect_error(err, address))?;

        if let Some(peripheral) = peripherals.into_iter().find(|p| peer_address(p) == address) {
            return Ok(Some(peripheral));
        }
    }

    Ok(None)
}

// Runs `cleanup` on the runtime when dropped unless disarmed. Guards a peripheral while an open
// attempt is in progress, so a failed step or a timeout that drops the open future both
// disconnect it.
struct DisconnectGuard {
    cleanup: Option<BoxFuture<'static, ()>>,
}

impl DisconnectGuard {
    fn new(cleanup: BoxFuture<'static, ()>) -> Self {
        DisconnectGuard { cleanup: Some(cleanup) }
    }

    fn for_peripheral(peripheral: &Peripheral) -> Self {
        let peripheral = peripheral.clone();
        DisconnectGuard::new(async move {
            info!("Disconnecting from half open peripheral");
            if let Err(err) = peripheral.disconnect().await {
                warn!("Failed to disconnect from peripheral: {:?}", err);
            }
        }.boxed())
    }

    fn disarm(mut self) {
        self.cleanup = None;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let Some(cleanup) = self.cleanup.take() else {
            return;
        };

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(cleanup);
            },
            Err(_) => warn!("No runtime left to disconnect the peripheral"),
        }
    }
}

async fn subscribe_data_characteristic(peripheral: &Peripheral, settings: &BtleSettings, address: &str) -> Result<Characteristic, ConnectError> {
    info!("Connected; Discovering services...");
    peripheral.discover_services().await.map_err(|err| connect_error(err, address))?;

    for service in peripheral.services() {
        if !service.uuid.eq(&settings.service_uuid) {
            continue;
        }

        for characteristic in &service.characteristics {
            if !characteristic.uuid.eq(&settings.data_uuid) {
                continue;
            }

            info!("Subscribing to characteristic {:?} {:?}", service.uuid, characteristic.uuid);
            peripheral.subscribe(characteristic).await.map_err(|err| connect_error(err, address))?;
            return Ok(characteristic.clone());
        }
    }

    Err(ConnectError::MissingCharacteristic)
}

async fn still_connected(peripheral: &Peripheral) -> bool {
    tokio::select! {
        _ = sleep(Duration::from_millis(IS_CONNECTED_DEADLINE)) => {
            // macOS
            warn!("Checking for connection status took too long");
            false
        }
        result = peripheral.is_connected() => match result {
            Err(err) => {
                warn!("Error checking for connection state: {:?}", err);
                false
            },
            Ok(connected) => connected,
        }
    }
}

fn forward_notifications_task(
    cancel: CancellationToken,
    peripheral: Peripheral,
    data_uuid: Uuid,
    mut notification_stream: BoxStream<'static, ValueNotification>,
    inbound: UnboundedSender<LinkEvent>,
) -> JoinHandle<()> {
    return spawn(async move {
        let mut poll = interval(Duration::from_millis(POLL_DELAY));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                notification = notification_stream.next() => match notification {
                    Some(data) => {
                        if data.uuid.eq(&data_uuid) && inbound.unbounded_send(LinkEvent::Data(data.value)).is_err() {
                            // nobody listens anymore, the link is being torn down
                            break 'mainloop;
                        }
                    },
                    None => {
                        warn!("Notification stream ended");
                        let _ = inbound.unbounded_send(LinkEvent::Dropped);
                        break 'mainloop;
                    },
                },
                _ = poll.tick() => {
                    if !still_connected(&peripheral).await {
                        warn!("Connection lost");
                        let _ = inbound.unbounded_send(LinkEvent::Dropped);
                        break 'mainloop;
                    }
                },
            }
        }
    });
}

impl Transport for BtleTransport {
    fn discover(&self) -> BoxFuture<'static, Result<Vec<PeerDevice>, TransportError>> {
        let manager = self.manager.clone();
        let settings = self.settings.clone();

        async move {
            let adapters = start_scanning(&manager, &settings).await?;
            sleep(settings.scan_duration).await;

            let peers = list_peers(&adapters, &settings).await;

            for adapter in &adapters {
                if let Err(err) = adapter.stop_scan().await {
                    warn!("Failed to stop scanning: {:?}", err);
                }
            }

            Ok::<_, TransportError>(peers)
        }.boxed()
    }

    fn open(&self, peer: &PeerDevice, inbound: UnboundedSender<LinkEvent>) -> BoxFuture<'static, Result<Box<dyn Link>, ConnectError>> {
        let manager = self.manager.clone();
        let settings = self.settings.clone();
        let address = peer.address.clone();

        async move {
            let adapters = usable_adapters(&manager).await?;
            let peripheral = find_peripheral(&adapters, &address).await?
                .ok_or_else(|| ConnectError::PeerNotFound { address: address.clone() })?;

            let guard = DisconnectGuard::for_peripheral(&peripheral);
            info!("Connecting to peripheral {}...", address);
            peripheral.connect().await.map_err(|err| connect_error(err, &address))?;

            let data_char = subscribe_data_characteristic(&peripheral, &settings, &address).await?;

            // obtain the stream before reporting the link as open, so that no early status line is lost
            let notification_stream = peripheral.notifications().await
                .map_err(|err| connect_error(err, &address))?;

            let cancel = CancellationToken::new();
            let listener = forward_notifications_task(
                cancel.clone(),
                peripheral.clone(),
                data_char.uuid,
                notification_stream,
                inbound,
            );

            guard.disarm();
            info!("Peripheral {} ready", address);
            Ok::<_, ConnectError>(Box::new(BtleLink { peripheral, data_char, cancel, listener }) as Box<dyn Link>)
        }.boxed()
    }
}

pub struct BtleLink {
    peripheral: Peripheral,
    data_char: Characteristic,
    cancel: CancellationToken,
    listener: JoinHandle<()>,
}

impl Link for BtleLink {
    fn write(&mut self, bytes: &[u8]) -> BoxFuture<'_, Result<(), WriteError>> {
        let bytes = bytes.to_vec();
        let write_type = if self.data_char.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        async move {
            self.peripheral.write(&self.data_char, &bytes, write_type).await?;
            Ok::<_, WriteError>(())
        }.boxed()
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        async move {
            self.cancel.cancel();
            if let Err(err) = self.listener.await {
                warn!("Notification task did not stop cleanly: {:?}", err);
            }

            if let Err(err) = self.peripheral.unsubscribe(&self.data_char).await {
                debug!("Failed to unsubscribe from data characteristic: {:?}", err);
            }
            if let Err(err) = self.peripheral.disconnect().await {
                warn!("Failed to disconnect from peripheral: {:?}", err);
            }
            info!("Link closed");
        }.boxed()
    }
}
