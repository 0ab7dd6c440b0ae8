//! RCON session over a datagram transport
//!
//! A [`Session`] owns the connection state machine behind a mutex. A spawned
//! receiver task feeds it inbound packets and timer ticks while the caller
//! issues commands; both paths transmit under the same lock so a gate check
//! and its send can never interleave with a state change.

mod error;
pub mod machine;

pub use error::SessionError;
pub use machine::{
    ConnectionMachine, ConnectionState, DisconnectReason, Rejection, ServerSnapshot,
    SessionEvent, Settings, Step,
};

use crate::output::Observer;
use crate::transport::Transport;
use protocol::packets::ClientPacket;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Shared<T: Transport> {
    transport: T,
    machine: Mutex<ConnectionMachine>,
    state_tx: watch::Sender<ConnectionState>,
    observer: Arc<dyn Observer>,
    stop: AtomicBool,
    read_timeout: Duration,
}

impl<T: Transport> Shared<T> {
    /// Transmit a step's packets, publish the resulting state and report its
    /// events. Must be called with the machine lock held.
    ///
    /// Returns the first send failure. A failed Disconnect is ignored since
    /// the session is closing anyway; any other failure closes the machine.
    async fn flush(&self, machine: &mut ConnectionMachine, step: Step) -> io::Result<()> {
        let Step { outbound, mut events } = step;
        let mut result = Ok(());

        for packet in outbound {
            let datagram = protocol::encode_client_packet(&packet);
            debug!("Sending {:?} ({} bytes)", packet.tag(), datagram.len());

            if let Err(e) = self.transport.send(&datagram).await {
                if packet == ClientPacket::Disconnect {
                    debug!("Failed to send Disconnect: {}", e);
                    continue;
                }
                if refused_during_handshake(machine, &e) {
                    debug!("Server unreachable while sending {:?}: {}", packet.tag(), e);
                    continue;
                }

                warn!("Failed to send {:?}: {}", packet.tag(), e);
                events.extend(machine.fail(e.to_string()).events);
                result = Err(e);
                break;
            }
        }

        let state = machine.state();
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });

        for event in &events {
            self.observer.on_event(event);
        }

        result
    }

    /// How long the receiver may block before the machine needs a tick.
    fn wait_for(&self, machine: &ConnectionMachine) -> Duration {
        match machine.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(self.read_timeout),
            None => self.read_timeout,
        }
    }
}

/// ICMP port unreachable surfaces as `ConnectionRefused`. During the
/// handshake the server may not be listening yet and the retry ceiling bounds
/// the wait; once authenticated it means the server is gone.
fn refused_during_handshake(machine: &ConnectionMachine, error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::ConnectionRefused
        && matches!(
            machine.state(),
            ConnectionState::AwaitingSalt | ConnectionState::AwaitingLoginResult
        )
}

async fn receive_loop<T: Transport>(shared: Arc<Shared<T>>) {
    loop {
        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        let wait = {
            let machine = shared.machine.lock().await;
            if machine.is_closed() {
                break;
            }
            shared.wait_for(&machine)
        };

        let received = shared.transport.recv(wait).await;

        let mut machine = shared.machine.lock().await;
        let now = Instant::now();

        match received {
            Ok(Some(datagram)) => match protocol::decode_server_packet(&datagram) {
                Ok(packet) => {
                    debug!("Received {} ({} bytes)", packet.name(), datagram.len());
                    let step = machine.handle(packet, now);
                    // Send failures have already closed the machine
                    let _ = shared.flush(&mut machine, step).await;
                }
                Err(e) => {
                    warn!("Dropping malformed datagram ({} bytes): {}", datagram.len(), e);
                    shared.observer.on_event(&SessionEvent::Rejected(e.to_string()));
                }
            },
            Ok(None) => {}
            Err(e) if refused_during_handshake(&machine, &e) => {
                debug!("Server unreachable: {}", e);
            }
            Err(e) => {
                if shared.stop.load(Ordering::Acquire) {
                    break;
                }
                warn!("Failed to receive: {}", e);
                let step = machine.fail(e.to_string());
                let _ = shared.flush(&mut machine, step).await;
                break;
            }
        }

        let step = machine.poll(now);
        let _ = shared.flush(&mut machine, step).await;
    }

    debug!("Receiver stopped");
}

/// One RCON session with one server
pub struct Session<T: Transport> {
    shared: Arc<Shared<T>>,
    receiver: Option<JoinHandle<()>>,
}

impl<T: Transport> Session<T> {
    pub fn new(
        transport: T,
        settings: Settings,
        password: impl Into<String>,
        observer: Arc<dyn Observer>,
        read_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Self {
            shared: Arc::new(Shared {
                transport,
                machine: Mutex::new(ConnectionMachine::new(settings, password)),
                state_tx,
                observer,
                stop: AtomicBool::new(false),
                read_timeout,
            }),
            receiver: None,
        }
    }

    /// Send BeginConnection and start the receiver task.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        {
            let mut machine = self.shared.machine.lock().await;
            let step = machine.connect(Instant::now())?;
            self.shared.flush(&mut machine, step).await?;
        }

        info!("Handshake started");
        self.receiver = Some(tokio::spawn(receive_loop(Arc::clone(&self.shared))));
        Ok(())
    }

    /// Connect and wait for the handshake to finish.
    pub async fn login(&mut self) -> Result<(), SessionError> {
        self.connect().await?;
        self.wait_authenticated().await
    }

    pub async fn wait_authenticated(&self) -> Result<(), SessionError> {
        let mut state_rx = self.shared.state_tx.subscribe();
        let state = *state_rx
            .wait_for(|state| {
                matches!(state, ConnectionState::Authenticated | ConnectionState::Disconnected)
            })
            .await
            .map_err(|_| SessionError::NotConnected)?;

        if state == ConnectionState::Authenticated {
            return Ok(());
        }

        match self.reason().await {
            Some(reason) => Err(SessionError::Closed(reason)),
            None => Err(SessionError::NotConnected),
        }
    }

    /// Wait until the session is closed, for whatever reason.
    pub async fn closed(&self) -> DisconnectReason {
        let mut state_rx = self.shared.state_tx.subscribe();
        let _ = state_rx
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await;

        self.reason().await.unwrap_or(DisconnectReason::Requested)
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub async fn reason(&self) -> Option<DisconnectReason> {
        self.shared.machine.lock().await.reason().cloned()
    }

    pub async fn server(&self) -> ServerSnapshot {
        self.shared.machine.lock().await.server().clone()
    }

    pub async fn send_command(&self, text: &str) -> Result<(), SessionError> {
        let mut machine = self.shared.machine.lock().await;
        let packet = machine.command(text)?;
        self.send(&mut machine, packet).await
    }

    /// Ask the server to complete `partial`. Candidates arrive as a
    /// [`SessionEvent::Completions`] event.
    pub async fn tab_complete(&self, partial: &str) -> Result<(), SessionError> {
        let mut machine = self.shared.machine.lock().await;
        let packet = machine.tab_complete(partial, Instant::now())?;
        self.send(&mut machine, packet).await
    }

    /// Close the session. Safe to call more than once.
    pub async fn disconnect(&self) {
        self.shared.stop.store(true, Ordering::Release);

        let mut machine = self.shared.machine.lock().await;
        let step = machine.disconnect();
        let _ = self.shared.flush(&mut machine, step).await;
    }

    /// Disconnect and wait for the receiver task to finish.
    pub async fn shutdown(mut self) {
        self.disconnect().await;

        if let Some(receiver) = self.receiver.take() {
            if let Err(e) = receiver.await {
                warn!("Receiver task failed: {}", e);
            }
        }
    }

    async fn send(&self, machine: &mut ConnectionMachine, packet: ClientPacket) -> Result<(), SessionError> {
        let step = Step {
            outbound: vec![packet],
            ..Step::default()
        };
        self.shared.flush(machine, step).await?;
        Ok(())
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
    }
}
