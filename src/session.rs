//! Session handling of v6 (iBox) bridges.
//!
//! A v6 bridge only accepts light commands carrying the two session bytes it
//! handed out. The handshake runs as
//!
//! ```text
//! client                                   bridge
//!   20 00 00 00 16 02 62 3A ... 1E  ---->          session request
//!                                   <----  28 ..   MAC @7..=12, session @19,20
//!   80 .. 33 .. (registration)      ---->
//!                                   <----  80 ..   MAC @5..=10
//!   D0 00 00 00 02 S1 S2            ---->          keep-alive
//!                                   <----  D8 00 00 00 07 MAC 01
//! ```
//!
//! Every light command is acknowledged with `88 00 00 00 03 00 SN ST`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use serde::Serialize;

use crate::errors::Error;
use crate::frame::{
    self, CommandCategory, Frame, SessionFields, V6_SESSION_REQUEST, coalesce_id, hex, mac_id,
};
use crate::queue::CommandQueue;
use crate::runtime::{self, AsyncUdpSocket, JoinHandle, Shutdown, ShutdownListener, UdpSocket};

type Result<T> = std::result::Result<T, Error>;

/// How long a command may stay unacknowledged before it is reported lost.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(2000);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handshake state of a v6 session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    /// No session bytes; the next keep-alive requests them.
    Invalid,
    /// Session bytes received, registration not yet confirmed.
    Registering,
    /// Light commands are accepted.
    Valid,
}

/// A decoded inbound packet of a v6 bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    SessionId { mac: String, sid1: u8, sid2: u8 },
    RegistrationAck { mac: String },
    KeepAliveEcho { mac: String },
    CommandAck { sequence: u8, status: u8 },
}

impl Response {
    /// Decode a packet; anything that is not a well formed bridge response is an error.
    pub fn parse(data: &[u8]) -> Result<Response> {
        if data.len() < 5 || data[1..4] != [0, 0, 0] {
            return Err(Error::MalformedPacket(format!(
                "not an iBox response: {}",
                hex(data)
            )));
        }

        let expected = data[4] as usize + 5;
        let needed = |min: usize, what: &str| {
            if data.len() < expected.max(min) {
                Err(Error::MalformedPacket(format!(
                    "unexpected size for {what}: {}",
                    hex(data)
                )))
            } else {
                Ok(())
            }
        };

        match data[0] {
            0x28 => {
                needed(21, "session ids")?;
                Ok(Response::SessionId {
                    mac: mac_id(&data[7..13]),
                    sid1: data[19],
                    sid2: data[20],
                })
            }
            0x80 => {
                needed(11, "registration confirmation")?;
                Ok(Response::RegistrationAck {
                    mac: mac_id(&data[5..11]),
                })
            }
            0xD8 => {
                needed(11, "keep alive")?;
                Ok(Response::KeepAliveEcho {
                    mac: mac_id(&data[5..11]),
                })
            }
            0x88 => {
                needed(8, "command confirmation")?;
                Ok(Response::CommandAck {
                    sequence: data[6],
                    status: data[7],
                })
            }
            _ => Err(Error::MalformedPacket(format!(
                "no valid start byte: {}",
                hex(data)
            ))),
        }
    }
}

/// Sequence numbers awaiting a `0x88` acknowledgment.
#[derive(Debug, Default)]
pub struct PendingAcks {
    entries: BTreeMap<u8, Instant>,
}

impl PendingAcks {
    pub fn insert(&mut self, sequence: u8, now: Instant) {
        self.entries.insert(sequence, now);
    }

    /// Returns whether the sequence number was pending.
    pub fn acknowledge(&mut self, sequence: u8) -> bool {
        self.entries.remove(&sequence).is_some()
    }

    /// Drop every entry older than [`ACK_TIMEOUT`] and return their sequence numbers.
    pub fn prune(&mut self, now: Instant) -> Vec<u8> {
        let expired: Vec<u8> = self
            .entries
            .iter()
            .filter(|(_, sent)| now.saturating_duration_since(**sent) > ACK_TIMEOUT)
            .map(|(sequence, _)| *sequence)
            .collect();
        for sequence in &expired {
            self.entries.remove(sequence);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct Session {
    state: SessionState,
    sid1: u8,
    sid2: u8,
    password: [u8; 2],
    sequence: u8,
    awaiting_confirmation: bool,
    pending: PendingAcks,
}

impl Session {
    fn assign(&mut self) -> SessionFields {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let now = Instant::now();
        self.pending.insert(sequence, now);
        self.prune_lost(now);

        SessionFields {
            sid1: self.sid1,
            sid2: self.sid2,
            pw1: self.password[0],
            pw2: self.password[1],
            sequence,
        }
    }

    fn prune_lost(&mut self, now: Instant) {
        for lost in self.pending.prune(now) {
            error!("Command not confirmed: {lost}");
        }
    }
}

#[derive(Debug)]
struct Shared {
    bridge_id: String,
    queue: Arc<CommandQueue>,
    session: Mutex<Session>,
}

impl Shared {
    fn enqueue(&self, frame: Frame) {
        if let Err(e) = self.queue.enqueue(frame) {
            error!("Bridge {}: {e}", self.bridge_id);
        }
    }

    fn keep_alive(&self) {
        let frame = {
            let mut session = lock(&self.session);
            session.prune_lost(Instant::now());
            if session.awaiting_confirmation {
                warn!(
                    "Bridge {} did not confirm the {} session, requesting a new one",
                    self.bridge_id, session.state
                );
                session.state = SessionState::Invalid;
                session.awaiting_confirmation = false;
            }

            match session.state {
                SessionState::Invalid => Frame::new(
                    V6_SESSION_REQUEST.to_vec(),
                    coalesce_id(CommandCategory::Session, 0, 0),
                    false,
                ),
                SessionState::Registering | SessionState::Valid => {
                    session.awaiting_confirmation = true;
                    Frame::new(
                        frame::v6_keep_alive(session.sid1, session.sid2).to_vec(),
                        coalesce_id(CommandCategory::KeepAlive, 0, 0),
                        false,
                    )
                }
            }
        };
        self.enqueue(frame);
    }

    fn matches(&self, mac: &str, what: &str) -> bool {
        if mac == self.bridge_id {
            return true;
        }
        error!(
            "{what} received from {mac}, expected bridge {}",
            self.bridge_id
        );
        false
    }

    fn handle_packet(&self, data: &[u8]) {
        let response = match Response::parse(data) {
            Ok(response) => response,
            Err(e) => {
                error!("Bridge {}: {e}", self.bridge_id);
                return;
            }
        };
        self.apply(response);
    }

    fn apply(&self, response: Response) {
        match response {
            Response::SessionId { mac, sid1, sid2 } => {
                if !self.matches(&mac, "Session id") {
                    return;
                }
                debug!("Session id received: {sid1:02X} {sid2:02X}");
                let registration = {
                    let mut session = lock(&self.session);
                    session.sid1 = sid1;
                    session.sid2 = sid2;
                    session.state = SessionState::Registering;
                    session.awaiting_confirmation = true;
                    frame::v6_registration(&session.assign())
                };
                self.enqueue(Frame::new(
                    registration.to_vec(),
                    coalesce_id(CommandCategory::Session, 0, 0),
                    false,
                ));
            }
            Response::RegistrationAck { mac } => {
                if !self.matches(&mac, "Registration confirmation") {
                    return;
                }
                let mut session = lock(&self.session);
                session.awaiting_confirmation = false;
                if session.state == SessionState::Registering {
                    session.state = SessionState::Valid;
                    debug!("Registration with bridge {} complete", self.bridge_id);
                }
            }
            Response::KeepAliveEcho { mac } => {
                if !self.matches(&mac, "Keep alive") {
                    return;
                }
                lock(&self.session).awaiting_confirmation = false;
                debug!("Keep alive received");
            }
            Response::CommandAck { sequence, status } => {
                lock(&self.session).pending.acknowledge(sequence);
                if status == 0 {
                    debug!("Confirmation received for command {sequence}");
                } else {
                    error!("Bridge reports an error for command {sequence}");
                }
            }
        }
    }
}

/// Owner of one v6 session and its receive loop.
#[derive(Debug)]
pub struct SessionManager {
    shared: Arc<Shared>,
    shutdown: Shutdown,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Start receiving on the queue's socket. The loop opens with a keep-alive,
    /// which requests the first session.
    pub fn start(queue: Arc<CommandQueue>, bridge_id: &str, password: [u8; 2]) -> Self {
        let socket = queue.socket();
        let shared = Arc::new(Shared {
            bridge_id: bridge_id.to_uppercase(),
            queue,
            session: Mutex::new(Session {
                state: SessionState::Invalid,
                sid1: 0,
                sid2: 0,
                password,
                sequence: 0,
                awaiting_confirmation: false,
                pending: PendingAcks::default(),
            }),
        });
        let shutdown = Shutdown::new();
        let task = runtime::spawn(receive(
            Arc::clone(&shared),
            socket,
            shutdown.listener(),
        ));

        SessionManager {
            shared,
            shutdown,
            receive_task: Mutex::new(Some(task)),
        }
    }

    pub fn bridge_id(&self) -> &str {
        &self.shared.bridge_id
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared.session).state
    }

    pub fn is_valid(&self) -> bool {
        self.state() == SessionState::Valid
    }

    /// Session bytes as `"S1 S2"`.
    pub fn session_id(&self) -> String {
        let session = lock(&self.shared.session);
        format!("{:02X} {:02X}", session.sid1, session.sid2)
    }

    pub fn set_password(&self, pw1: u8, pw2: u8) {
        lock(&self.shared.session).password = [pw1, pw2];
    }

    pub fn set_sequence_number(&self, sequence: u8) {
        lock(&self.shared.session).sequence = sequence;
    }

    /// Number of commands still waiting for an acknowledgment.
    pub fn pending_acks(&self) -> usize {
        lock(&self.shared.session).pending.len()
    }

    /// Header fields for the next light command, consuming one sequence number.
    ///
    /// `None` unless the session is valid.
    pub fn next_fields(&self) -> Option<SessionFields> {
        let mut session = lock(&self.shared.session);
        if session.state != SessionState::Valid {
            return None;
        }
        Some(session.assign())
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.shared.queue
    }

    /// Confirm the session is alive, or request a new one.
    ///
    /// A keep-alive whose echo never arrived before the next call invalidates the session.
    pub fn keep_alive(&self) {
        self.shared.keep_alive();
    }

    /// Feed one inbound packet through the state machine.
    pub fn handle_packet(&self, data: &[u8]) {
        self.shared.handle_packet(data);
    }

    /// Stop the receive loop.
    pub async fn dispose(&self) {
        self.shutdown.request();
        let task = lock(&self.receive_task).take();
        if let Some(task) = task {
            runtime::join_or_cancel(task, Duration::from_millis(100)).await;
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown.request();
    }
}

async fn receive(shared: Arc<Shared>, socket: Arc<UdpSocket>, stop: ShutdownListener) {
    debug!("Session receive loop for bridge {} ready", shared.bridge_id);
    shared.keep_alive();

    let mut buffer = [0u8; 1024];
    loop {
        match runtime::until_shutdown(&stop, socket.recv(&mut buffer)).await {
            None => break,
            Some(Ok(size)) => shared.handle_packet(&buffer[..size]),
            Some(Err(e)) => {
                error!("Bridge {}: receive failed: {e}", shared.bridge_id);
                let pause = runtime::sleep(Duration::from_millis(100));
                if runtime::until_shutdown(&stop, pause).await.is_none() {
                    break;
                }
            }
        }
    }

    debug!("Session receive loop for bridge {} stopped", shared.bridge_id);
}
