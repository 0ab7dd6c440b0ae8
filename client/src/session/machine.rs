//! RCON connection state machine
//!
//! The machine performs no I/O. Callers feed it parsed server packets, local
//! requests and clock ticks along with the current [`Instant`]; each call
//! returns a [`Step`] listing the packets to transmit and the events to
//! report. The session drives it from both the receiver task and the
//! dispatcher under one lock.

use super::SessionError;
use protocol::crypto::{self, Digest, DigestEncoding};
use protocol::packets::{ClientPacket, LoginSummary, ServerPacket, ServerUpdate};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    AwaitingSalt,
    AwaitingLoginResult,
    Authenticated,
    /// Terminal: nothing is sent after this
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingSalt => "awaiting salt",
            Self::AwaitingLoginResult => "awaiting login result",
            Self::Authenticated => "authenticated",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Why the server refused the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("invalid RCON password")]
    InvalidPassword,

    #[error("this address is banned on the server")]
    Banned,
}

/// Cause reported when the session reaches `Disconnected`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisconnectReason {
    #[error("disconnected on request")]
    Requested,

    #[error("server reports an old protocol version")]
    ProtocolMismatch,

    #[error("authentication rejected: {0}")]
    AuthRejected(Rejection),

    #[error("no handshake response after {attempts} attempts")]
    HandshakeTimeout { attempts: u32 },

    #[error("nothing received from the server for {:.1}s", .silent_for.as_secs_f64())]
    LivenessTimeout { silent_for: Duration },

    #[error("socket error: {0}")]
    Transport(String),
}

/// Observable outcome of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A handshake packet went unanswered and was sent again
    Retrying { packet: &'static str, attempt: u32 },
    LoggedIn { hostname: Option<String> },
    /// Console output, verbatim
    Message(String),
    Players(Vec<String>),
    AdminCount(u8),
    MapChanged(String),
    Completions(Vec<String>),
    TooManyCompletions(u16),
    /// The server did not answer a tab completion in time
    CompletionTimedOut,
    /// Well-formed packet that makes no sense in the current state
    Ignored { packet: &'static str, state: ConnectionState },
    /// Packet tag or update kind this client does not know
    Unsupported { packet: &'static str, kind: u8 },
    /// Datagram that failed to decompress or parse
    Rejected(String),
    Disconnected(DisconnectReason),
}

/// Packets to send and events to report after one call into the machine
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Step {
    pub outbound: Vec<ClientPacket>,
    pub events: Vec<SessionEvent>,
}

impl Step {
    fn send(&mut self, packet: ClientPacket) {
        self.outbound.push(packet);
    }

    fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.events.is_empty()
    }
}

/// Timing and protocol knobs
#[derive(Debug, Clone)]
pub struct Settings {
    pub protocol_version: u8,
    pub digest_encoding: DigestEncoding,
    /// First retransmission window for BeginConnection and Password
    pub handshake_timeout: Duration,
    /// Upper bound for the doubled retransmission window
    pub handshake_max_backoff: Duration,
    /// Total sends of one handshake packet before giving up
    pub handshake_attempts: u32,
    pub keepalive_interval: Duration,
    pub liveness_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            protocol_version: protocol::PROTOCOL_VERSION,
            digest_encoding: DigestEncoding::Binary,
            handshake_timeout: Duration::from_secs(1),
            handshake_max_backoff: Duration::from_secs(4),
            handshake_attempts: 4,
            keepalive_interval: Duration::from_secs(4),
            liveness_timeout: None,
        }
    }
}

/// What the server has told us so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub hostname: Option<String>,
    pub protocol_version: Option<u8>,
    pub players: Vec<String>,
    pub admin_count: u8,
    pub map: Option<String>,
}

#[derive(Debug)]
struct Retry {
    packet: ClientPacket,
    attempts: u32,
    window: Duration,
    deadline: Instant,
}

#[derive(Debug)]
pub struct ConnectionMachine {
    settings: Settings,
    password: String,
    state: ConnectionState,
    digest: Option<Digest>,
    retry: Option<Retry>,
    last_received: Option<Instant>,
    last_pong: Option<Instant>,
    tab_deadline: Option<Instant>,
    reason: Option<DisconnectReason>,
    server: ServerSnapshot,
}

impl ConnectionMachine {
    pub fn new(settings: Settings, password: impl Into<String>) -> Self {
        Self {
            settings,
            password: password.into(),
            state: ConnectionState::Idle,
            digest: None,
            retry: None,
            last_received: None,
            last_pong: None,
            tab_deadline: None,
            reason: None,
            server: ServerSnapshot::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Disconnected
    }

    pub fn reason(&self) -> Option<&DisconnectReason> {
        self.reason.as_ref()
    }

    #[cfg(test)]
    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    pub fn server(&self) -> &ServerSnapshot {
        &self.server
    }

    /// Start the handshake.
    pub fn connect(&mut self, now: Instant) -> Result<Step, SessionError> {
        if self.state != ConnectionState::Idle {
            return Err(SessionError::AlreadyStarted);
        }

        let mut step = Step::default();
        let begin = ClientPacket::BeginConnection {
            version: self.settings.protocol_version,
        };
        step.send(begin.clone());
        self.arm_retry(begin, now);
        // Silence is measured from the first send until the server answers
        self.last_received = Some(now);
        self.transition(ConnectionState::AwaitingSalt);
        Ok(step)
    }

    /// Feed one parsed server packet.
    pub fn handle(&mut self, packet: ServerPacket, now: Instant) -> Step {
        let mut step = Step::default();

        if matches!(self.state, ConnectionState::Idle | ConnectionState::Disconnected) {
            debug!("Ignoring {} while {}", packet.name(), self.state);
            step.emit(SessionEvent::Ignored { packet: packet.name(), state: self.state });
            return step;
        }

        self.last_received = Some(now);

        use ConnectionState::*;
        match (self.state, packet) {
            (AwaitingSalt | AwaitingLoginResult, ServerPacket::Salt(salt)) => {
                let digest = crypto::password_digest(&salt, &self.password);
                self.digest = Some(digest);

                let password = ClientPacket::Password {
                    digest,
                    encoding: self.settings.digest_encoding,
                };
                step.send(password.clone());
                self.arm_retry(password, now);
                self.transition(AwaitingLoginResult);
            }
            (AwaitingSalt, ServerPacket::OldProtocol) => {
                self.close(DisconnectReason::ProtocolMismatch, false, &mut step);
            }
            (_, ServerPacket::Banned) => {
                self.close(DisconnectReason::AuthRejected(Rejection::Banned), false, &mut step);
            }
            (AwaitingLoginResult, ServerPacket::InvalidPassword) => {
                self.close(
                    DisconnectReason::AuthRejected(Rejection::InvalidPassword),
                    false,
                    &mut step,
                );
            }
            (AwaitingLoginResult, ServerPacket::LoggedIn(summary)) => {
                self.retry = None;
                self.last_pong = Some(now);
                self.transition(Authenticated);
                self.log_in(summary, &mut step);
            }
            (Authenticated, ServerPacket::Message(text)) => {
                step.emit(SessionEvent::Message(text));
            }
            (Authenticated, ServerPacket::Update(update)) => {
                self.apply_update(update, &mut step);
            }
            (Authenticated, ServerPacket::TabComplete(candidates)) => {
                if self.tab_deadline.take().is_some() {
                    step.emit(SessionEvent::Completions(candidates));
                } else {
                    step.emit(SessionEvent::Ignored { packet: "TabComplete", state: self.state });
                }
            }
            (Authenticated, ServerPacket::TooManyTabCompletes(count)) => {
                if self.tab_deadline.take().is_some() {
                    step.emit(SessionEvent::TooManyCompletions(count));
                } else {
                    step.emit(SessionEvent::Ignored {
                        packet: "TooManyTabCompletes",
                        state: self.state,
                    });
                }
            }
            (_, ServerPacket::Unknown { tag, .. }) => {
                warn!("Unknown packet tag {} from server", tag);
                step.emit(SessionEvent::Unsupported { packet: "Unknown", kind: tag });
            }
            (state, other) => {
                debug!("Ignoring {} while {}", other.name(), state);
                step.emit(SessionEvent::Ignored { packet: other.name(), state });
            }
        }

        step
    }

    /// Run timers: handshake retransmission, keep-alive, liveness and
    /// tab-completion expiry.
    pub fn poll(&mut self, now: Instant) -> Step {
        let mut step = Step::default();

        if matches!(self.state, ConnectionState::Idle | ConnectionState::Disconnected) {
            return step;
        }

        if let (Some(limit), Some(last)) = (self.settings.liveness_timeout, self.last_received) {
            let silent_for = now.saturating_duration_since(last);
            if silent_for >= limit {
                self.close(DisconnectReason::LivenessTimeout { silent_for }, true, &mut step);
                return step;
            }
        }

        match self.state {
            ConnectionState::AwaitingSalt | ConnectionState::AwaitingLoginResult => {
                self.poll_retry(now, &mut step);
            }
            ConnectionState::Authenticated => {
                if self.tab_deadline.is_some_and(|deadline| now >= deadline) {
                    self.tab_deadline = None;
                    step.emit(SessionEvent::CompletionTimedOut);
                }

                let due = self
                    .last_pong
                    .is_none_or(|last| now.saturating_duration_since(last) >= self.settings.keepalive_interval);
                if due {
                    step.send(ClientPacket::Pong);
                    self.last_pong = Some(now);
                }
            }
            ConnectionState::Idle | ConnectionState::Disconnected => {}
        }

        step
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut deadlines: Vec<Instant> = Vec::with_capacity(4);

        match self.state {
            ConnectionState::Idle | ConnectionState::Disconnected => return None,
            ConnectionState::AwaitingSalt | ConnectionState::AwaitingLoginResult => {
                deadlines.extend(self.retry.as_ref().map(|retry| retry.deadline));
            }
            ConnectionState::Authenticated => {
                deadlines.extend(self.last_pong.map(|last| last + self.settings.keepalive_interval));
                deadlines.extend(self.tab_deadline);
            }
        }

        if let (Some(limit), Some(last)) = (self.settings.liveness_timeout, self.last_received) {
            deadlines.push(last + limit);
        }

        deadlines.into_iter().min()
    }

    /// Build a Command packet if the session is authenticated.
    pub fn command(&self, text: &str) -> Result<ClientPacket, SessionError> {
        if self.state != ConnectionState::Authenticated {
            return Err(SessionError::NotConnected);
        }
        Ok(ClientPacket::Command(text.to_string()))
    }

    /// Build a TabComplete packet. Replies carry no request id, so only one
    /// request may be outstanding.
    pub fn tab_complete(&mut self, partial: &str, now: Instant) -> Result<ClientPacket, SessionError> {
        if self.state != ConnectionState::Authenticated {
            return Err(SessionError::NotConnected);
        }
        if self.tab_deadline.is_some_and(|deadline| now < deadline) {
            return Err(SessionError::TabCompletePending);
        }

        self.tab_deadline = Some(now + self.settings.handshake_timeout);
        Ok(ClientPacket::TabComplete(partial.to_string()))
    }

    /// Local disconnect request. Calling it again is a no-op.
    pub fn disconnect(&mut self) -> Step {
        let mut step = Step::default();
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Idle => self.close(DisconnectReason::Requested, false, &mut step),
            _ => self.close(DisconnectReason::Requested, true, &mut step),
        }
        step
    }

    /// The socket failed; nothing more can be sent.
    pub fn fail(&mut self, detail: impl Into<String>) -> Step {
        let mut step = Step::default();
        if !self.is_closed() {
            self.close(DisconnectReason::Transport(detail.into()), false, &mut step);
        }
        step
    }

    fn arm_retry(&mut self, packet: ClientPacket, now: Instant) {
        let window = self.settings.handshake_timeout;
        self.retry = Some(Retry {
            packet,
            attempts: 1,
            window,
            deadline: now + window,
        });
    }

    fn poll_retry(&mut self, now: Instant, step: &mut Step) {
        let Some(retry) = self.retry.as_mut() else {
            return;
        };
        if now < retry.deadline {
            return;
        }

        if retry.attempts >= self.settings.handshake_attempts {
            let attempts = retry.attempts;
            self.close(DisconnectReason::HandshakeTimeout { attempts }, true, step);
            return;
        }

        retry.attempts += 1;
        retry.window = (retry.window * 2).min(self.settings.handshake_max_backoff);
        retry.deadline = now + retry.window;

        let name = match retry.packet {
            ClientPacket::BeginConnection { .. } => "BeginConnection",
            ClientPacket::Password { .. } => "Password",
            _ => "handshake packet",
        };
        info!(
            "No response, resending {} (attempt {}/{})",
            name, retry.attempts, self.settings.handshake_attempts
        );
        step.emit(SessionEvent::Retrying { packet: name, attempt: retry.attempts });
        step.send(retry.packet.clone());
    }

    fn log_in(&mut self, summary: Option<LoginSummary>, step: &mut Step) {
        let Some(summary) = summary else {
            step.emit(SessionEvent::LoggedIn { hostname: None });
            return;
        };

        self.server.hostname = Some(summary.hostname.clone());
        self.server.protocol_version = Some(summary.protocol_version);
        step.emit(SessionEvent::LoggedIn { hostname: Some(summary.hostname) });

        for update in summary.updates {
            self.apply_update(update, step);
        }
        for line in summary.console_history {
            step.emit(SessionEvent::Message(line));
        }
    }

    fn apply_update(&mut self, update: ServerUpdate, step: &mut Step) {
        match update {
            ServerUpdate::PlayerData(players) => {
                self.server.players = players.clone();
                step.emit(SessionEvent::Players(players));
            }
            ServerUpdate::AdminCount(count) => {
                self.server.admin_count = count;
                step.emit(SessionEvent::AdminCount(count));
            }
            ServerUpdate::Map(map) => {
                self.server.map = Some(map.clone());
                step.emit(SessionEvent::MapChanged(map));
            }
            ServerUpdate::Unknown { kind, .. } => {
                warn!("Unknown update kind {} from server", kind);
                step.emit(SessionEvent::Unsupported { packet: "Update", kind });
            }
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        info!("Connection state: {} -> {}", self.state, to);
        self.state = to;
    }

    fn close(&mut self, reason: DisconnectReason, notify_server: bool, step: &mut Step) {
        if notify_server {
            step.send(ClientPacket::Disconnect);
        }

        self.retry = None;
        self.tab_deadline = None;
        if self.digest.take().is_some() {
            debug!("Discarded password digest");
        }
        self.transition(ConnectionState::Disconnected);
        info!("Session closed: {}", reason);

        self.reason = Some(reason.clone());
        step.emit(SessionEvent::Disconnected(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::crypto::Salt;
    use protocol::SALT_SIZE;

    fn settings() -> Settings {
        Settings {
            protocol_version: 1,
            handshake_timeout: Duration::from_millis(100),
            handshake_max_backoff: Duration::from_millis(250),
            handshake_attempts: 3,
            keepalive_interval: Duration::from_secs(4),
            ..Settings::default()
        }
    }

    fn authenticated(now: Instant) -> ConnectionMachine {
        let mut machine = ConnectionMachine::new(settings(), "secret");
        machine.connect(now).unwrap();
        machine.handle(ServerPacket::Salt(Salt([0u8; SALT_SIZE])), now);
        machine.handle(ServerPacket::LoggedIn(None), now);
        assert_eq!(machine.state(), ConnectionState::Authenticated);
        machine
    }

    #[test]
    fn test_full_handshake() {
        let now = Instant::now();
        let mut machine = ConnectionMachine::new(settings(), "secret");
        assert_eq!(machine.state(), ConnectionState::Idle);

        let step = machine.connect(now).unwrap();
        assert_eq!(step.outbound, vec![ClientPacket::BeginConnection { version: 1 }]);
        assert_eq!(machine.state(), ConnectionState::AwaitingSalt);

        let salt = Salt([0u8; SALT_SIZE]);
        let step = machine.handle(ServerPacket::Salt(salt), now);
        let expected = crypto::password_digest(&salt, "secret");
        assert_eq!(
            step.outbound,
            vec![ClientPacket::Password { digest: expected, encoding: DigestEncoding::Binary }]
        );
        assert_eq!(machine.digest(), Some(&expected));
        assert_eq!(machine.state(), ConnectionState::AwaitingLoginResult);

        let step = machine.handle(ServerPacket::LoggedIn(None), now);
        assert!(step.outbound.is_empty());
        assert_eq!(step.events, vec![SessionEvent::LoggedIn { hostname: None }]);
        assert_eq!(machine.state(), ConnectionState::Authenticated);

        assert_eq!(
            machine.command("status").unwrap(),
            ClientPacket::Command("status".into())
        );
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let now = Instant::now();
        let mut machine = ConnectionMachine::new(settings(), "secret");
        machine.connect(now).unwrap();
        assert!(matches!(machine.connect(now), Err(SessionError::AlreadyStarted)));
    }

    #[test]
    fn test_salt_while_idle_is_ignored() {
        let mut machine = ConnectionMachine::new(settings(), "secret");
        let step = machine.handle(ServerPacket::Salt(Salt([0u8; SALT_SIZE])), Instant::now());

        assert!(step.outbound.is_empty());
        assert_eq!(machine.state(), ConnectionState::Idle);
        assert_eq!(
            step.events,
            vec![SessionEvent::Ignored { packet: "Salt", state: ConnectionState::Idle }]
        );
    }

    #[test]
    fn test_invalid_password_closes_session() {
        let now = Instant::now();
        let mut machine = ConnectionMachine::new(settings(), "wrong");
        machine.connect(now).unwrap();
        machine.handle(ServerPacket::Salt(Salt([3u8; SALT_SIZE])), now);

        let step = machine.handle(ServerPacket::InvalidPassword, now);
        let reason = DisconnectReason::AuthRejected(Rejection::InvalidPassword);
        assert!(step.outbound.is_empty());
        assert_eq!(step.events, vec![SessionEvent::Disconnected(reason.clone())]);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(machine.reason(), Some(&reason));
        assert!(machine.digest().is_none());

        assert!(matches!(machine.command("status"), Err(SessionError::NotConnected)));
    }

    #[test]
    fn test_old_protocol_and_banned_while_awaiting_salt() {
        let now = Instant::now();

        let mut machine = ConnectionMachine::new(settings(), "secret");
        machine.connect(now).unwrap();
        machine.handle(ServerPacket::OldProtocol, now);
        assert_eq!(machine.reason(), Some(&DisconnectReason::ProtocolMismatch));

        let mut machine = ConnectionMachine::new(settings(), "secret");
        machine.connect(now).unwrap();
        machine.handle(ServerPacket::Banned, now);
        assert_eq!(
            machine.reason(),
            Some(&DisconnectReason::AuthRejected(Rejection::Banned))
        );
    }

    #[test]
    fn test_banned_while_authenticated() {
        let now = Instant::now();
        let mut machine = authenticated(now);
        machine.handle(ServerPacket::Banned, now);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_commands_rejected_before_login() {
        let now = Instant::now();
        let mut machine = ConnectionMachine::new(settings(), "secret");
        assert!(matches!(machine.command("status"), Err(SessionError::NotConnected)));

        machine.connect(now).unwrap();
        assert!(matches!(machine.command("status"), Err(SessionError::NotConnected)));
        assert!(matches!(
            machine.tab_complete("st", now),
            Err(SessionError::NotConnected)
        ));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let now = Instant::now();
        let mut machine = authenticated(now);

        let first = machine.disconnect();
        assert_eq!(first.outbound, vec![ClientPacket::Disconnect]);
        assert_eq!(
            first.events,
            vec![SessionEvent::Disconnected(DisconnectReason::Requested)]
        );

        let second = machine.disconnect();
        assert!(second.is_empty());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_from_idle_sends_nothing() {
        let mut machine = ConnectionMachine::new(settings(), "secret");
        let step = machine.disconnect();
        assert!(step.outbound.is_empty());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_handshake_retries_with_backoff_then_times_out() {
        let start = Instant::now();
        let mut machine = ConnectionMachine::new(settings(), "secret");
        machine.connect(start).unwrap();
        assert_eq!(machine.next_deadline(), Some(start + Duration::from_millis(100)));

        // Nothing due yet
        assert!(machine.poll(start + Duration::from_millis(50)).is_empty());

        let t1 = start + Duration::from_millis(100);
        let step = machine.poll(t1);
        assert_eq!(step.outbound, vec![ClientPacket::BeginConnection { version: 1 }]);
        assert_eq!(
            step.events,
            vec![SessionEvent::Retrying { packet: "BeginConnection", attempt: 2 }]
        );
        assert_eq!(machine.next_deadline(), Some(t1 + Duration::from_millis(200)));

        let t2 = t1 + Duration::from_millis(200);
        machine.poll(t2);
        // Window capped at the maximum backoff
        assert_eq!(machine.next_deadline(), Some(t2 + Duration::from_millis(250)));

        let step = machine.poll(t2 + Duration::from_millis(250));
        assert_eq!(step.outbound, vec![ClientPacket::Disconnect]);
        assert_eq!(
            machine.reason(),
            Some(&DisconnectReason::HandshakeTimeout { attempts: 3 })
        );
        assert_eq!(machine.next_deadline(), None);
    }

    #[test]
    fn test_password_is_retransmitted() {
        let now = Instant::now();
        let mut machine = ConnectionMachine::new(settings(), "secret");
        machine.connect(now).unwrap();
        let step = machine.handle(ServerPacket::Salt(Salt([9u8; SALT_SIZE])), now);
        let password = step.outbound[0].clone();

        let step = machine.poll(now + Duration::from_millis(100));
        assert_eq!(step.outbound, vec![password]);
        assert_eq!(machine.state(), ConnectionState::AwaitingLoginResult);
    }

    #[test]
    fn test_fresh_salt_while_awaiting_login_recomputes_digest() {
        let now = Instant::now();
        let mut machine = ConnectionMachine::new(settings(), "secret");
        machine.connect(now).unwrap();
        machine.handle(ServerPacket::Salt(Salt([1u8; SALT_SIZE])), now);

        let fresh = Salt([2u8; SALT_SIZE]);
        let step = machine.handle(ServerPacket::Salt(fresh), now);
        assert_eq!(step.outbound.len(), 1);
        assert_eq!(machine.digest(), Some(&crypto::password_digest(&fresh, "secret")));
        assert_eq!(machine.state(), ConnectionState::AwaitingLoginResult);
    }

    #[test]
    fn test_keepalive_pong_while_authenticated() {
        let now = Instant::now();
        let mut machine = authenticated(now);

        assert!(machine.poll(now + Duration::from_secs(1)).outbound.is_empty());

        let due = now + Duration::from_secs(4);
        assert_eq!(machine.next_deadline(), Some(due));
        assert_eq!(machine.poll(due).outbound, vec![ClientPacket::Pong]);
        assert_eq!(machine.next_deadline(), Some(due + Duration::from_secs(4)));
    }

    #[test]
    fn test_liveness_timeout() {
        let now = Instant::now();
        let mut machine = ConnectionMachine::new(
            Settings {
                liveness_timeout: Some(Duration::from_secs(10)),
                ..settings()
            },
            "secret",
        );
        machine.connect(now).unwrap();
        machine.handle(ServerPacket::Salt(Salt([0u8; SALT_SIZE])), now);
        machine.handle(ServerPacket::LoggedIn(None), now);

        let later = now + Duration::from_secs(8);
        machine.handle(ServerPacket::Message("still here\n".into()), later);
        assert_eq!(machine.state(), ConnectionState::Authenticated);

        let step = machine.poll(later + Duration::from_secs(10));
        assert_eq!(step.outbound, vec![ClientPacket::Disconnect]);
        assert_eq!(
            machine.reason(),
            Some(&DisconnectReason::LivenessTimeout { silent_for: Duration::from_secs(10) })
        );
    }

    #[test]
    fn test_login_summary_populates_snapshot() {
        let now = Instant::now();
        let mut machine = ConnectionMachine::new(settings(), "secret");
        machine.connect(now).unwrap();
        machine.handle(ServerPacket::Salt(Salt([0u8; SALT_SIZE])), now);

        let summary = LoginSummary {
            protocol_version: 4,
            hostname: "Duel server".into(),
            updates: vec![
                ServerUpdate::PlayerData(vec!["alice".into()]),
                ServerUpdate::Map("MAP01".into()),
            ],
            console_history: vec!["welcome\n".into()],
        };
        let step = machine.handle(ServerPacket::LoggedIn(Some(summary)), now);

        assert_eq!(
            step.events,
            vec![
                SessionEvent::LoggedIn { hostname: Some("Duel server".into()) },
                SessionEvent::Players(vec!["alice".into()]),
                SessionEvent::MapChanged("MAP01".into()),
                SessionEvent::Message("welcome\n".into()),
            ]
        );
        assert_eq!(machine.server().hostname.as_deref(), Some("Duel server"));
        assert_eq!(machine.server().map.as_deref(), Some("MAP01"));
    }

    #[test]
    fn test_updates_refresh_snapshot() {
        let now = Instant::now();
        let mut machine = authenticated(now);

        machine.handle(ServerPacket::Update(ServerUpdate::AdminCount(2)), now);
        machine.handle(
            ServerPacket::Update(ServerUpdate::PlayerData(vec!["bob".into(), "eve".into()])),
            now,
        );
        let step = machine.handle(
            ServerPacket::Update(ServerUpdate::Unknown { kind: 7, body: vec![] }),
            now,
        );

        assert_eq!(machine.server().admin_count, 2);
        assert_eq!(machine.server().players, vec!["bob".to_string(), "eve".to_string()]);
        assert_eq!(
            step.events,
            vec![SessionEvent::Unsupported { packet: "Update", kind: 7 }]
        );
    }

    #[test]
    fn test_single_outstanding_tab_completion() {
        let now = Instant::now();
        let mut machine = authenticated(now);

        assert_eq!(
            machine.tab_complete("ki", now).unwrap(),
            ClientPacket::TabComplete("ki".into())
        );
        assert!(matches!(
            machine.tab_complete("ma", now),
            Err(SessionError::TabCompletePending)
        ));

        let step = machine.handle(ServerPacket::TabComplete(vec!["kick".into()]), now);
        assert_eq!(step.events, vec![SessionEvent::Completions(vec!["kick".into()])]);

        // A reply nobody asked for is not correlated with anything
        let step = machine.handle(ServerPacket::TabComplete(vec!["kick".into()]), now);
        assert!(matches!(step.events[0], SessionEvent::Ignored { .. }));

        assert!(machine.tab_complete("ma", now).is_ok());
    }

    #[test]
    fn test_tab_completion_expires() {
        let now = Instant::now();
        let mut machine = authenticated(now);
        machine.tab_complete("ki", now).unwrap();

        let step = machine.poll(now + Duration::from_millis(100));
        assert_eq!(step.events, vec![SessionEvent::CompletionTimedOut]);
        assert!(machine.tab_complete("ki", now + Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn test_message_before_login_is_ignored() {
        let now = Instant::now();
        let mut machine = ConnectionMachine::new(settings(), "secret");
        machine.connect(now).unwrap();

        let step = machine.handle(ServerPacket::Message("early".into()), now);
        assert_eq!(
            step.events,
            vec![SessionEvent::Ignored {
                packet: "Message",
                state: ConnectionState::AwaitingSalt
            }]
        );
        assert_eq!(machine.state(), ConnectionState::AwaitingSalt);
    }

    #[test]
    fn test_transport_failure_is_terminal() {
        let now = Instant::now();
        let mut machine = authenticated(now);

        let step = machine.fail("connection refused");
        assert!(step.outbound.is_empty());
        assert_eq!(
            machine.reason(),
            Some(&DisconnectReason::Transport("connection refused".into()))
        );
        assert!(machine.fail("again").is_empty());
        assert!(machine.poll(now + Duration::from_secs(60)).is_empty());
    }
}
