//! Bridge discovery via UDP broadcast.
//!
//! Bridges answer the probes [`DISCOVER_V3`] and [`DISCOVER_V6`] on port 48899
//! with `"<ip>,<mac>[,<model>]"`, e.g. `"10.1.1.27,ACCF23F57AD4,HF-LPB100"`.
//! Only v6 bridges send the model field.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error};

use crate::config::{DiscoveryConfig, ProtocolVersion};
use crate::errors::Error;
use crate::frame::{DISCOVER_V3, DISCOVER_V6};
use crate::runtime::{
    self, AsyncUdpSocket, Instant, JoinHandle, Shutdown, ShutdownListener, UdpSocket,
};

type Result<T> = std::result::Result<T, Error>;

/// Callback receiving the outcome of each discovery round.
pub type DiscoveryCallback = Arc<dyn Fn(DiscoveryResult) + Send + Sync>;

/// A bridge that answered a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredBridge {
    /// Source address of the response.
    pub address: IpAddr,
    /// Bridge MAC, 12 hex characters.
    pub id: String,
    pub version: ProtocolVersion,
}

/// Terminal outcome of one discovery round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryResult {
    BridgeFound(DiscoveredBridge),
    NotFound,
}

/// Parse a probe response received from `source`.
///
/// ```
/// use milight_rs::{ProtocolVersion, discovery::parse_response};
///
/// let bridge = parse_response(b"10.1.1.27,ACCF23F57AD4,HF-LPB100", "10.1.1.27".parse().unwrap())
///     .unwrap();
/// assert_eq!(bridge.id, "ACCF23F57AD4");
/// assert_eq!(bridge.version, ProtocolVersion::V6);
/// ```
pub fn parse_response(data: &[u8], source: IpAddr) -> Result<DiscoveredBridge> {
    let text = std::str::from_utf8(data).map_err(Error::Utf8Decode)?;
    let text = text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
    let fields: Vec<&str> = text.split(',').collect();

    match fields.as_slice() {
        [_, id, rest @ ..] if id.len() == 12 => {
            let version = match rest.first() {
                Some(model) if !model.is_empty() => ProtocolVersion::V6,
                _ => ProtocolVersion::V3,
            };
            Ok(DiscoveredBridge {
                address: source,
                id: id.to_string(),
                version,
            })
        }
        _ => Err(Error::MalformedPacket(format!(
            "unexpected discovery response {text:?}"
        ))),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct Round {
    generation: u64,
    active: bool,
    resend_task: Option<JoinHandle<()>>,
}

struct Inner {
    socket: UdpSocket,
    config: DiscoveryConfig,
    on_result: DiscoveryCallback,
    round: Mutex<Round>,
}

impl Inner {
    async fn send_probes(&self) {
        for probe in [DISCOVER_V3, DISCOVER_V6] {
            if let Err(e) = self.socket.send_to(probe, self.config.target).await {
                error!("Sending a discovery packet failed: {e}");
                return;
            }
        }
        debug!("Sent discovery packet to {}", self.config.target);
    }

    fn is_current(&self, generation: u64) -> bool {
        let round = lock(&self.round);
        round.active && round.generation == generation
    }

    /// End the current round; only the first caller of a round wins.
    fn finish(&self, generation: Option<u64>) -> bool {
        let mut round = lock(&self.round);
        if !round.active || generation.is_some_and(|g| g != round.generation) {
            return false;
        }
        round.active = false;
        // an obsolete resend task exits on its next tick
        round.resend_task.take();
        true
    }
}

/// A long-lived discovery session with its own receive loop.
///
/// Every call to [`BridgeDiscovery::send_discover`] starts a round that ends
/// with exactly one [`DiscoveryResult`] passed to the callback.
pub struct BridgeDiscovery {
    inner: Arc<Inner>,
    shutdown: Shutdown,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BridgeDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDiscovery")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl BridgeDiscovery {
    /// Bind the discovery socket and start receiving.
    pub async fn start<F>(config: DiscoveryConfig, on_result: F) -> Result<Self>
    where
        F: Fn(DiscoveryResult) + Send + Sync + 'static,
    {
        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
            .await
            .map_err(|e| Error::socket("bind", e))?;
        socket
            .set_broadcast(true)
            .map_err(|e| Error::socket("set_broadcast", e))?;

        let inner = Arc::new(Inner {
            socket,
            config,
            on_result: Arc::new(on_result),
            round: Mutex::new(Round::default()),
        });
        let shutdown = Shutdown::new();
        let task = runtime::spawn(receive(Arc::clone(&inner), shutdown.listener()));

        Ok(BridgeDiscovery {
            inner,
            shutdown,
            receive_task: Mutex::new(Some(task)),
        })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    /// Whether a round is in flight.
    pub fn is_running(&self) -> bool {
        lock(&self.inner.round).active
    }

    /// Start a round: probe now, then every resend interval until a bridge
    /// answers or the attempts run out.
    ///
    /// Does nothing while a round is in flight.
    pub fn send_discover(&self) {
        if self.shutdown.is_requested() {
            return;
        }

        let mut round = lock(&self.inner.round);
        if round.active {
            return;
        }
        round.generation = round.generation.wrapping_add(1);
        round.active = true;
        round.resend_task = Some(runtime::spawn(resend(
            Arc::clone(&self.inner),
            round.generation,
            self.shutdown.listener(),
        )));
    }

    /// Abort the current round without reporting an outcome.
    pub fn stop_resend(&self) {
        self.inner.finish(None);
    }

    /// Stop both loops and release the socket.
    pub async fn dispose(&self) {
        self.shutdown.request();

        let resend_task = {
            let mut round = lock(&self.inner.round);
            round.active = false;
            round.resend_task.take()
        };
        if let Some(task) = resend_task {
            runtime::join_or_cancel(task, Duration::from_millis(500)).await;
        }

        let receive_task = lock(&self.receive_task).take();
        if let Some(task) = receive_task {
            runtime::join_or_cancel(task, Duration::from_millis(500)).await;
        }
    }
}

impl Drop for BridgeDiscovery {
    fn drop(&mut self) {
        self.shutdown.request();
    }
}

async fn resend(inner: Arc<Inner>, generation: u64, stop: ShutdownListener) {
    let mut attempts = 0;
    loop {
        attempts += 1;
        if attempts > inner.config.max_attempts {
            if inner.finish(Some(generation)) {
                debug!("No bridge answered {} discovery attempts", inner.config.max_attempts);
                (inner.on_result)(DiscoveryResult::NotFound);
            }
            return;
        }
        if !inner.is_current(generation) {
            return;
        }

        inner.send_probes().await;

        let tick = runtime::sleep(inner.config.resend_interval);
        if runtime::until_shutdown(&stop, tick).await.is_none() {
            return;
        }
    }
}

async fn receive(inner: Arc<Inner>, stop: ShutdownListener) {
    debug!("Discovery receive loop ready");
    let mut buffer = [0u8; 1024];

    loop {
        let received = match runtime::until_shutdown(&stop, inner.socket.recv_from(&mut buffer)).await
        {
            None => break,
            Some(Ok(received)) => received,
            Some(Err(e)) => {
                error!("Discovery receive failed: {e}");
                if runtime::until_shutdown(&stop, runtime::sleep(Duration::from_millis(100)))
                    .await
                    .is_none()
                {
                    break;
                }
                continue;
            }
        };

        let (size, source) = received;
        match parse_response(&buffer[..size], source.ip()) {
            Ok(bridge) => {
                if inner.finish(None) {
                    debug!("Bridge {} ({}) found at {}", bridge.id, bridge.version, bridge.address);
                    (inner.on_result)(DiscoveryResult::BridgeFound(bridge));
                } else {
                    debug!("Ignoring late discovery response of bridge {}", bridge.id);
                }
            }
            Err(e) => error!("Unexpected data received from {source}: {e}"),
        }
    }

    debug!("Discovery receive loop stopped");
}

/// Broadcast both probes once and collect every bridge answering within `timeout`.
///
/// # Examples
///
/// ```ignore
/// use std::time::Duration;
/// use milight_rs::discover_bridges;
///
/// for bridge in discover_bridges(Duration::from_secs(2)).await? {
///     println!("{} {} {}", bridge.address, bridge.id, bridge.version);
/// }
/// ```
pub async fn discover_bridges(timeout: Duration) -> Result<Vec<DiscoveredBridge>> {
    discover_bridges_at(DiscoveryConfig::default().target, timeout).await
}

/// Like [`discover_bridges`], probing `target` instead of the broadcast address.
pub async fn discover_bridges_at(
    target: SocketAddr,
    timeout: Duration,
) -> Result<Vec<DiscoveredBridge>> {
    let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
        .await
        .map_err(|e| Error::socket("bind", e))?;
    socket
        .set_broadcast(true)
        .map_err(|e| Error::socket("set_broadcast", e))?;

    for probe in [DISCOVER_V3, DISCOVER_V6] {
        socket
            .send_to(probe, target)
            .await
            .map_err(|e| Error::socket("send_to", e))?;
    }

    let mut discovered: HashMap<String, DiscoveredBridge> = HashMap::new();
    let start = Instant::now();
    let mut buffer = [0u8; 1024];

    while let Some(remaining) = timeout.checked_sub(start.elapsed()) {
        match runtime::timeout(remaining, socket.recv_from(&mut buffer)).await {
            Ok(Ok((size, source))) => match parse_response(&buffer[..size], source.ip()) {
                Ok(bridge) => {
                    discovered.entry(bridge.id.clone()).or_insert(bridge);
                }
                Err(e) => debug!("Skipping response from {source}: {e}"),
            },
            Ok(Err(e)) => debug!("Discovery receive failed: {e}"),
            Err(_) => break,
        }
    }

    Ok(discovered.into_values().collect())
}
