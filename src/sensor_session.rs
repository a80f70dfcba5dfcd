use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::channel::SampleChannel;
use crate::error::{Result, SessionError};
use crate::pipeline::NotificationPipeline;
use crate::protocol::{
    start_imu9_command, stop_imu9_command, DEFAULT_CHANNEL_CAPACITY, DEFAULT_NAME_PATTERN,
};
use crate::transport::{BtleConnector, Connector, SensorLink, DISCOVERY_TIMEOUT};
use crate::types::{ConnectedDevice, SessionState};

// ── SessionConfig ─────────────────────────────────────────────────────────────

/// Configuration for [`BleSensorSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connect to the first device whose advertised name contains this
    /// string.  Default: `"Movesense"`.
    pub name_pattern: String,
    /// How long [`BleSensorSession::connect`] scans before giving up with
    /// [`SessionError::DeviceNotFound`].  Default: `5`.
    pub scan_timeout_secs: u64,
    /// Hard limit on the BLE connect call.  BlueZ can otherwise block forever
    /// on a device that went out of range mid-handshake.  Default: `10`.
    pub connect_timeout_secs: u64,
    /// Capacity of the [`SampleChannel`].  Default: `5000` (≈ 48 s at 104 Hz).
    pub channel_capacity: usize,
    /// Per-step limit used by [`BleSensorSession::shutdown`].  Default: `2`.
    pub shutdown_timeout_secs: u64,
}

impl SessionConfig {
    /// Longest a single lifecycle command can run: scan, connect, discovery
    /// and a teardown step, each at its own limit.
    pub fn command_deadline(&self) -> Duration {
        Duration::from_secs(
            self.scan_timeout_secs + self.connect_timeout_secs + self.shutdown_timeout_secs,
        ) + DISCOVERY_TIMEOUT
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name_pattern: DEFAULT_NAME_PATTERN.into(),
            scan_timeout_secs: 5,
            connect_timeout_secs: 10,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            shutdown_timeout_secs: 2,
        }
    }
}

// ── ActiveClient ──────────────────────────────────────────────────────────────

/// Everything owned by an established connection.
struct ActiveClient<L> {
    device: ConnectedDevice,
    link: L,
    /// Present while streaming.
    notify_task: Option<JoinHandle<()>>,
}

impl<L: SensorLink> ActiveClient<L> {
    /// Stop delivering samples and drop the GATT subscription.
    ///
    /// The task is aborted and awaited before anything else, so once this
    /// returns no further sample from this run can reach the channel.
    async fn unregister_notifications(&mut self) {
        let Some(task) = self.notify_task.take() else {
            return;
        };
        task.abort();
        let _ = task.await;
        if let Err(e) = self.link.unsubscribe().await {
            warn!("{}: unsubscribe failed (ignored): {e}", self.device.name);
        }
    }
}

/// Clears the in-progress flag when `connect` finishes or is cancelled.
struct ConnectingFlag<'a>(&'a AtomicBool);

impl Drop for ConnectingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── BleSensorSession ──────────────────────────────────────────────────────────

/// Connection lifecycle for one Movesense sensor streaming `/Meas/IMU9/104`.
///
/// ```text
/// Disconnected → Connecting → Connected → Streaming → Stopping → Connected
///                                 └──────────── disconnect() ───────→ Disconnected
/// ```
///
/// The single connection lives in an internal slot guarded by an async
/// mutex, which also serializes concurrent lifecycle calls.  Decoded samples
/// go to the [`SampleChannel`] returned by [`channel`](Self::channel).
///
/// The radio is reached through a [`Connector`]; [`BleSensorSession::new`]
/// uses btleplug.
pub struct BleSensorSession<C: Connector = BtleConnector> {
    config: SessionConfig,
    connector: C,
    channel: SampleChannel,
    connecting: AtomicBool,
    client: Mutex<Option<ActiveClient<C::Link>>>,
    state: watch::Sender<SessionState>,
}

impl BleSensorSession {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, BtleConnector)
    }
}

impl<C: Connector> BleSensorSession<C> {
    pub fn with_connector(config: SessionConfig, connector: C) -> Self {
        let channel = SampleChannel::new(config.channel_capacity);
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            config,
            connector,
            channel,
            connecting: AtomicBool::new(false),
            client: Mutex::new(None),
            state,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Consumer handle for the decoded sample stream.
    pub fn channel(&self) -> SampleChannel {
        self.channel.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions, e.g. to drive a status label.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        let prev = self.state.send_replace(state);
        if prev != state {
            debug!("session state: {prev} → {state}");
        }
    }

    /// The connected device, if any.
    pub async fn device(&self) -> Option<ConnectedDevice> {
        self.client.lock().await.as_ref().map(|c| c.device.clone())
    }

    /// Whether the link is still up at the adapter level.
    pub async fn is_connected(&self) -> bool {
        match self.client.lock().await.as_ref() {
            Some(c) => c.link.is_connected().await,
            None => false,
        }
    }

    // ── connect ──────────────────────────────────────────────────────────────

    /// Scan for the first matching sensor and connect to it.
    ///
    /// Fails immediately with [`SessionError::AlreadyConnected`] while
    /// connected or while another `connect` is still in progress.
    pub async fn connect(&self) -> Result<ConnectedDevice> {
        if self.connecting.swap(true, Ordering::AcqRel) {
            return Err(SessionError::AlreadyConnected);
        }
        let _connecting = ConnectingFlag(&self.connecting);

        let mut slot = self.client.lock().await;
        if slot.is_some() {
            return Err(SessionError::AlreadyConnected);
        }

        self.set_state(SessionState::Connecting);
        match self.connector.open(&self.config).await {
            Ok((device, link)) => {
                *slot = Some(ActiveClient {
                    device: device.clone(),
                    link,
                    notify_task: None,
                });
                self.set_state(SessionState::Connected);
                info!("Connected: {} ({})", device.name, device.id);
                Ok(device)
            }
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                warn!("connect: {e}");
                Err(e)
            }
        }
    }

    // ── start_streaming ──────────────────────────────────────────────────────

    /// Register the notification handler and send the start command.
    ///
    /// Already streaming is a successful no-op.
    pub async fn start_streaming(&self) -> Result<()> {
        let mut slot = self.client.lock().await;
        let Some(client) = slot.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        if self.state() == SessionState::Streaming {
            debug!("start_streaming: already streaming");
            return Ok(());
        }

        let notifications = client
            .link
            .notifications()
            .await
            .map_err(|e| SessionError::CommandFailed(format!("notification stream: {e}")))?;
        client
            .link
            .subscribe()
            .await
            .map_err(|e| SessionError::CommandFailed(format!("subscribe: {e}")))?;
        client.notify_task = Some(spawn_notification_task(
            notifications,
            self.channel.clone(),
        ));

        if let Err(e) = client.link.write(&start_imu9_command()).await {
            client.unregister_notifications().await;
            return Err(SessionError::CommandFailed(format!("start command: {e}")));
        }

        self.set_state(SessionState::Streaming);
        info!("{}: streaming IMU9 @ 104 Hz", client.device.name);
        Ok(())
    }

    // ── stop_streaming ───────────────────────────────────────────────────────

    /// Send the stop command and unregister the handler.
    ///
    /// Transport errors are logged; the session is back in `Connected`
    /// regardless.
    pub async fn stop_streaming(&self) -> Result<()> {
        let mut slot = self.client.lock().await;
        if self.state() != SessionState::Streaming {
            return Err(SessionError::NotConnected);
        }
        let Some(client) = slot.as_mut() else {
            return Err(SessionError::NotConnected);
        };

        self.set_state(SessionState::Stopping);
        if let Err(e) = client.link.write(&stop_imu9_command()).await {
            warn!("{}: stop command failed (ignored): {e}", client.device.name);
        }
        client.unregister_notifications().await;
        self.set_state(SessionState::Connected);
        info!("{}: streaming stopped", client.device.name);
        Ok(())
    }

    // ── disconnect ───────────────────────────────────────────────────────────

    /// Tear down the connection from any state.  Never fails; a call while
    /// already disconnected does nothing.
    pub async fn disconnect(&self) -> Result<()> {
        let mut slot = self.client.lock().await;
        let Some(mut client) = slot.take() else {
            return Ok(());
        };

        self.set_state(SessionState::Stopping);
        client.unregister_notifications().await;
        if let Err(e) = client.link.disconnect().await {
            warn!("{}: disconnect failed (ignored): {e}", client.device.name);
        }
        // The handler is gone, so nothing can refill the channel after this.
        self.channel.clear();
        self.set_state(SessionState::Disconnected);
        info!("Disconnected from {}", client.device.name);
        Ok(())
    }

    /// Best-effort stop + disconnect, each bounded by
    /// [`SessionConfig::shutdown_timeout_secs`].
    pub async fn shutdown(&self) {
        let limit = Duration::from_secs(self.config.shutdown_timeout_secs);
        if self.state() == SessionState::Streaming {
            match tokio::time::timeout(limit, self.stop_streaming()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("shutdown: stop_streaming: {e}"),
                Err(_) => warn!("shutdown: stop_streaming timed out after {limit:?}"),
            }
        }
        if tokio::time::timeout(limit, self.disconnect()).await.is_err() {
            warn!("shutdown: disconnect timed out after {limit:?}");
        }
    }
}

/// Drive a [`NotificationPipeline`] from the link's notification stream
/// until the stream ends or the task is aborted.
fn spawn_notification_task(
    mut notifications: BoxStream<'static, Vec<u8>>,
    channel: SampleChannel,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pipeline = NotificationPipeline::new(channel);
        info!("Notification stream subscribed, waiting for data…");
        while let Some(value) = notifications.next().await {
            pipeline.handle(&value);
        }
        let stats = pipeline.stats();
        info!(
            "Notification stream ended: {} notif(s), {} frame(s), {} sample(s), {} dropped",
            stats.notifications, stats.frames, stats.samples_pushed, stats.samples_dropped
        );
    })
}
