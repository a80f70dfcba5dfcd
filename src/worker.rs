//! Dedicated network thread for the BLE session.
//!
//! A GUI or terminal loop must never wait on BLE I/O, so the
//! [`BleSensorSession`] lives on its own OS thread running a current-thread
//! tokio runtime.  Other threads talk to it by submitting
//! [`SessionCommand`]s and reading the answer from a `oneshot` receiver,
//! either by polling it from a refresh loop or with
//! [`BleWorker::run_blocking`].

use std::sync::Arc;
use std::thread;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

use crate::channel::SampleChannel;
use crate::error::SessionError;
use crate::sensor_session::{BleSensorSession, SessionConfig};
use crate::transport::Connector;
use crate::types::SessionState;

/// Lifecycle request accepted by [`BleWorker::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Connect,
    StartStreaming,
    StopStreaming,
    Disconnect,
}

/// Status text on success (e.g. `"Connected: Movesense 1746…"`), typed
/// error otherwise.
pub type CommandOutcome = Result<String, SessionError>;

enum Message {
    Run {
        command: SessionCommand,
        reply: oneshot::Sender<CommandOutcome>,
    },
    Shutdown,
}

/// Run one command against `session` and describe the result.
pub async fn execute<C: Connector>(
    session: &BleSensorSession<C>,
    command: SessionCommand,
) -> CommandOutcome {
    match command {
        SessionCommand::Connect => session
            .connect()
            .await
            .map(|device| format!("Connected: {}", device.name)),
        SessionCommand::StartStreaming => {
            session.start_streaming().await.map(|()| "Streaming".to_owned())
        }
        SessionCommand::StopStreaming => {
            session.stop_streaming().await.map(|()| "Stopped".to_owned())
        }
        SessionCommand::Disconnect => {
            session.disconnect().await.map(|()| "Disconnected".to_owned())
        }
    }
}

/// Owner of the BLE thread.
///
/// Dropping the worker (or calling [`shutdown`](Self::shutdown)) stops any
/// stream, disconnects, and joins the thread.
pub struct BleWorker {
    tx: mpsc::UnboundedSender<Message>,
    channel: SampleChannel,
    state: watch::Receiver<SessionState>,
    thread: Option<thread::JoinHandle<()>>,
}

impl BleWorker {
    /// Start the thread and its runtime with a btleplug session.
    pub fn spawn(config: SessionConfig) -> std::io::Result<Self> {
        Self::spawn_with(BleSensorSession::new(config))
    }

    /// Start the thread and its runtime around an existing session.
    pub fn spawn_with<C: Connector>(session: BleSensorSession<C>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let session = Arc::new(session);
        let channel = session.channel();
        let state = session.subscribe_state();
        let (tx, rx) = mpsc::unbounded_channel();

        let thread = thread::Builder::new()
            .name("ble-session".into())
            .spawn(move || runtime.block_on(run(session, rx)))?;

        Ok(Self {
            tx,
            channel,
            state,
            thread: Some(thread),
        })
    }

    /// Queue `command`; the receiver resolves once it has completed.
    ///
    /// Commands run concurrently on the worker but the session serializes
    /// them, so they take effect in submission order.
    pub fn submit(&self, command: SessionCommand) -> oneshot::Receiver<CommandOutcome> {
        let (reply, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(Message::Run { reply, .. })) =
            self.tx.send(Message::Run { command, reply })
        {
            let _ = reply.send(Err(SessionError::WorkerStopped));
        }
        rx
    }

    /// Submit `command` and block the calling thread until it completes.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run_blocking(&self, command: SessionCommand) -> CommandOutcome {
        self.submit(command)
            .blocking_recv()
            .unwrap_or(Err(SessionError::WorkerStopped))
    }

    /// Consumer handle for the decoded sample stream.
    pub fn channel(&self) -> SampleChannel {
        self.channel.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Stop streaming, disconnect, and join the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.tx.send(Message::Shutdown);
        if thread.join().is_err() {
            warn!("BLE worker thread panicked");
        }
    }
}

impl Drop for BleWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run<C: Connector>(
    session: Arc<BleSensorSession<C>>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    info!("BLE worker started");
    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Message::Run { command, reply }) => {
                    let session = Arc::clone(&session);
                    in_flight.spawn(async move {
                        let outcome = execute(&session, command).await;
                        if let Err(e) = &outcome {
                            debug!("{command:?} failed: {e}");
                        }
                        let _ = reply.send(outcome);
                    });
                }
                Some(Message::Shutdown) | None => break,
            },
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
        }
    }

    // A connect still in flight may already hold an open link; let it land
    // in the session so the shutdown below can close it.
    if !in_flight.is_empty() {
        let limit = session.config().command_deadline();
        info!("Waiting up to {limit:?} for {} command(s)", in_flight.len());
        let drained = tokio::time::timeout(limit, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Commands still running after {limit:?}, abandoning them");
            in_flight.abort_all();
        }
    }
    session.shutdown().await;
    info!("BLE worker stopped");
}
