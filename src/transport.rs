//! The radio side of a [`BleSensorSession`](crate::sensor_session::BleSensorSession).
//!
//! [`Connector`] finds a sensor and opens a [`SensorLink`] to it; the session
//! only ever talks to the link.  [`BtleConnector`] is the btleplug
//! implementation used in production.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::BoxStream;
use futures::{future, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::protocol::{NOTIFY_CHARACTERISTIC, WRITE_CHARACTERISTIC};
use crate::sensor_session::SessionConfig;
use crate::types::ConnectedDevice;

/// Limit on GATT service discovery after the link comes up.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// An open GATT connection to one sensor.
#[async_trait]
pub trait SensorLink: Send + Sync + 'static {
    /// Payloads from the notify characteristic, in arrival order.
    async fn notifications(&self) -> btleplug::Result<BoxStream<'static, Vec<u8>>>;

    async fn subscribe(&self) -> btleplug::Result<()>;

    async fn unsubscribe(&self) -> btleplug::Result<()>;

    /// Write to the command characteristic (with response).
    async fn write(&self, data: &[u8]) -> btleplug::Result<()>;

    async fn disconnect(&self) -> btleplug::Result<()>;

    async fn is_connected(&self) -> bool;
}

/// Scans for a sensor and connects to it.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Link: SensorLink;

    /// Open a link to the first sensor matching `config`.
    ///
    /// Fails with [`SessionError::DeviceNotFound`] or
    /// [`SessionError::ConnectFailed`]; a failed open leaves no link behind.
    async fn open(&self, config: &SessionConfig) -> Result<(ConnectedDevice, Self::Link)>;
}

// ── btleplug ──────────────────────────────────────────────────────────────────

/// [`Connector`] backed by the platform's first Bluetooth adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct BtleConnector;

/// Connected btleplug peripheral with its resolved GSP characteristics.
pub struct BtleLink {
    peripheral: Peripheral,
    write_char: Characteristic,
    notify_char: Characteristic,
}

#[async_trait]
impl Connector for BtleConnector {
    type Link = BtleLink;

    async fn open(&self, config: &SessionConfig) -> Result<(ConnectedDevice, BtleLink)> {
        let adapter = first_adapter().await?;
        wait_until_powered_on(&adapter).await;

        info!(
            "Scanning for \"{}\" (timeout: {} s) …",
            config.name_pattern, config.scan_timeout_secs
        );
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| SessionError::ConnectFailed(format!("scan: {e}")))?;
        let found = find_first(&adapter, &config.name_pattern, config.scan_timeout_secs).await;
        adapter.stop_scan().await.ok();
        let (peripheral, name) = found?;
        let id = peripheral.id().to_string();
        info!("Found device: {name}  id={id}");

        let limit = Duration::from_secs(config.connect_timeout_secs);
        match tokio::time::timeout(limit, peripheral.connect()).await {
            Err(_) => {
                return Err(SessionError::ConnectFailed(format!(
                    "BLE connect() timed out after {} s",
                    config.connect_timeout_secs
                )))
            }
            Ok(Err(e)) => return Err(SessionError::ConnectFailed(e.to_string())),
            Ok(Ok(())) => {}
        }

        match resolve_characteristics(&peripheral).await {
            Ok((write_char, notify_char)) => Ok((
                ConnectedDevice { name, id },
                BtleLink {
                    peripheral,
                    write_char,
                    notify_char,
                },
            )),
            Err(e) => {
                // Don't leave the link half-open.
                peripheral.disconnect().await.ok();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl SensorLink for BtleLink {
    async fn notifications(&self) -> btleplug::Result<BoxStream<'static, Vec<u8>>> {
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .filter_map(|n| {
                future::ready(if n.uuid == NOTIFY_CHARACTERISTIC {
                    Some(n.value)
                } else {
                    debug!("Unknown notification from {}", n.uuid);
                    None
                })
            })
            .boxed())
    }

    async fn subscribe(&self) -> btleplug::Result<()> {
        self.peripheral.subscribe(&self.notify_char).await
    }

    async fn unsubscribe(&self) -> btleplug::Result<()> {
        self.peripheral.unsubscribe(&self.notify_char).await
    }

    async fn write(&self, data: &[u8]) -> btleplug::Result<()> {
        self.peripheral
            .write(&self.write_char, data, WriteType::WithResponse)
            .await
    }

    async fn disconnect(&self) -> btleplug::Result<()> {
        self.peripheral.disconnect().await
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }
}

async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|e| SessionError::ConnectFailed(format!("BLE manager: {e}")))?;
    manager
        .adapters()
        .await
        .map_err(|e| SessionError::ConnectFailed(format!("BLE adapters: {e}")))?
        .into_iter()
        .next()
        .ok_or_else(|| SessionError::ConnectFailed("No Bluetooth adapter found".into()))
}

/// macOS: CBCentralManager starts in an "unknown" state and silently ignores
/// scans until it reaches PoweredOn.
#[cfg(target_os = "macos")]
async fn wait_until_powered_on(adapter: &Adapter) {
    use btleplug::api::CentralState;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match adapter.adapter_state().await {
            Ok(CentralState::PoweredOn) => break,
            Ok(state) if tokio::time::Instant::now() >= deadline => {
                warn!("macOS: adapter still {state:?} after 3 s, scanning anyway");
                break;
            }
            Ok(state) => debug!("macOS: adapter state = {state:?}, waiting…"),
            Err(e) => {
                warn!("macOS: adapter_state() error: {e}");
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[cfg(not(target_os = "macos"))]
async fn wait_until_powered_on(_adapter: &Adapter) {}

/// Poll the adapter until a peripheral whose name contains `pattern` shows up.
async fn find_first(
    adapter: &Adapter,
    pattern: &str,
    timeout_secs: u64,
) -> Result<(Peripheral, String)> {
    use tokio::time::{sleep, timeout};

    let result = timeout(Duration::from_secs(timeout_secs), async {
        loop {
            let peripherals = adapter.peripherals().await.unwrap_or_default();
            for p in peripherals {
                if let Ok(Some(props)) = p.properties().await {
                    if let Some(name) = props.local_name {
                        if name.contains(pattern) {
                            return (p, name);
                        }
                    }
                }
            }
            sleep(Duration::from_millis(250)).await;
        }
    })
    .await;

    result.map_err(|_| SessionError::DeviceNotFound {
        pattern: pattern.to_owned(),
        timeout_secs,
    })
}

/// Discover services and pick out the GSP write / notify characteristics.
async fn resolve_characteristics(
    peripheral: &Peripheral,
) -> Result<(Characteristic, Characteristic)> {
    // BlueZ reports the link as up before the GATT cache is populated;
    // discovering too early returns an empty set.
    #[cfg(target_os = "linux")]
    tokio::time::sleep(Duration::from_millis(600)).await;

    match tokio::time::timeout(DISCOVERY_TIMEOUT, peripheral.discover_services()).await {
        Err(_) => {
            return Err(SessionError::ConnectFailed(format!(
                "discover_services() timed out after {DISCOVERY_TIMEOUT:?}"
            )))
        }
        Ok(Err(e)) => {
            return Err(SessionError::ConnectFailed(format!("discover_services: {e}")))
        }
        Ok(Ok(())) => {}
    }

    let chars = peripheral.characteristics();
    let find_char = |uuid: Uuid| {
        chars
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or_else(|| SessionError::ConnectFailed(format!("Characteristic {uuid} not found")))
    };
    Ok((
        find_char(WRITE_CHARACTERISTIC)?,
        find_char(NOTIFY_CHARACTERISTIC)?,
    ))
}

// ── Scripted sensor for tests ─────────────────────────────────────────────────
