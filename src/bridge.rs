//! Connection to one bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::{Value, json};
use strum::IntoEnumIterator;

use crate::bulb::{self, Bulb, BulbFamily};
use crate::config::{BridgeConfig, DiscoveryConfig, ProtocolVersion};
use crate::discovery::{BridgeDiscovery, DiscoveryResult};
use crate::errors::Error;
use crate::light::Light;
use crate::queue::CommandQueue;
use crate::runtime::{self, JoinHandle, Shutdown, ShutdownListener};
use crate::session::{SessionManager, SessionState};

type Result<T> = std::result::Result<T, Error>;

/// Minimum time between two keep-alives triggered by discovery.
const KEEP_ALIVE_THROTTLE: Duration = Duration::from_secs(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reachability of a bridge, as seen by its discovery rounds.
#[derive(Debug, Default)]
struct Presence {
    online: AtomicBool,
    last_keep_alive: Mutex<Option<Instant>>,
}

impl Presence {
    fn on_discovery(&self, id: &str, result: DiscoveryResult, session: Option<&SessionManager>) {
        match result {
            DiscoveryResult::BridgeFound(bridge) if bridge.id.eq_ignore_ascii_case(id) => {
                if !self.online.swap(true, Ordering::SeqCst) {
                    info!("Bridge {id} is online at {}", bridge.address);
                }
                if let Some(session) = session
                    && self.keep_alive_due(Instant::now())
                {
                    session.keep_alive();
                }
            }
            DiscoveryResult::BridgeFound(bridge) => {
                debug!("Bridge {} answered while looking for {id}", bridge.id);
            }
            DiscoveryResult::NotFound => {
                if self.online.swap(false, Ordering::SeqCst) {
                    warn!("Bridge {id} is offline");
                }
            }
        }
    }

    fn keep_alive_due(&self, now: Instant) -> bool {
        let mut last = lock(&self.last_keep_alive);
        if last.is_some_and(|at| now.duration_since(at) < KEEP_ALIVE_THROTTLE) {
            return false;
        }
        *last = Some(now);
        true
    }
}

/// Owner of everything needed to talk to one bridge: the command queue, the
/// v6 session and the discovery used to track whether the bridge is reachable.
///
/// Bulb encoders created by [`Bridge::bulb`] share the queue and session; they
/// stop working once the bridge is disposed.
///
/// # Example
///
/// ```ignore
/// use milight_rs::{Bridge, BridgeConfig, BulbFamily, ProtocolVersion};
///
/// let config = BridgeConfig::new("10.1.1.27".parse()?, Some("ACCF23F57AD4"), ProtocolVersion::V6);
/// let bridge = Bridge::connect(config).await?;
/// bridge.refresh();
///
/// let mut lamp = bridge.light(BulbFamily::V6BridgeLamp, 1, None)?;
/// lamp.set_power(true)?;
/// ```
#[derive(Debug)]
pub struct Bridge {
    config: BridgeConfig,
    version: ProtocolVersion,
    id: Option<String>,
    queue: Arc<CommandQueue>,
    session: Option<Arc<SessionManager>>,
    discovery: Option<Arc<BridgeDiscovery>>,
    presence: Arc<Presence>,
    shutdown: Shutdown,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Bridge {
    /// Open the control connection.
    ///
    /// A v6 bridge immediately starts negotiating a session. When
    /// `refresh_secs` is set, the bridge is looked up periodically.
    pub async fn connect(config: BridgeConfig) -> Result<Self> {
        let discovery = DiscoveryConfig::unicast(config.host);
        Self::connect_with(config, discovery).await
    }

    pub(crate) async fn connect_with(config: BridgeConfig, discovery: DiscoveryConfig) -> Result<Self> {
        config.validate()?;
        let version = config.effective_protocol();
        let id = config.bridge_id();

        let queue = CommandQueue::start(config.control_addr()).await?;
        queue.set_delay(config.delay());
        queue.set_repeat(config.repeat);
        let queue = Arc::new(queue);

        let session = match (&id, version) {
            (Some(id), ProtocolVersion::V6) => Some(Arc::new(SessionManager::start(
                Arc::clone(&queue),
                id,
                config.password,
            ))),
            _ => None,
        };

        let presence = Arc::new(Presence::default());
        let discovery = match &id {
            Some(id) => {
                let id = id.clone();
                let weak_session = session.as_ref().map(Arc::downgrade);
                let status = Arc::clone(&presence);
                let discovery = BridgeDiscovery::start(discovery, move |result| {
                    let session = weak_session.as_ref().and_then(Weak::upgrade);
                    status.on_discovery(&id, result, session.as_deref());
                })
                .await?;
                Some(Arc::new(discovery))
            }
            None => None,
        };

        let shutdown = Shutdown::new();
        let refresh_task = match &discovery {
            Some(discovery) if config.refresh_secs > 0 => Some(runtime::spawn(refresh(
                Arc::clone(discovery),
                Duration::from_secs(config.refresh_secs),
                shutdown.listener(),
            ))),
            _ => None,
        };

        info!(
            "Connected to {version} bridge {} at {}",
            id.as_deref().unwrap_or("without id"),
            config.control_addr()
        );

        Ok(Bridge {
            config,
            version,
            id,
            queue,
            session,
            discovery,
            presence,
            shutdown,
            refresh_task: Mutex::new(refresh_task),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The protocol generation actually spoken.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Look the bridge up once. Bridges without an id cannot be looked up.
    pub fn refresh(&self) {
        if let Some(discovery) = &self.discovery {
            discovery.send_discover();
        }
    }

    /// Whether the last lookup found the bridge. Legacy bridges are always online.
    pub fn is_online(&self) -> bool {
        self.discovery.is_none() || self.presence.online.load(Ordering::SeqCst)
    }

    /// `"S1 S2"` of the v6 session.
    pub fn session_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.session_id())
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(|s| s.state())
    }

    /// Every family and zone this bridge can address.
    pub fn available_bulbs(&self) -> Vec<(BulbFamily, u8)> {
        BulbFamily::iter()
            .filter(|family| family.version() == self.version)
            .flat_map(|family| family.zones().map(move |zone| (family, zone)))
            .collect()
    }

    /// Encoder for `family` on `zone`.
    pub fn bulb(&self, family: BulbFamily, zone: u8) -> Result<Box<dyn Bulb>> {
        bulb::new_bulb(
            family,
            zone,
            self.version,
            Arc::clone(&self.queue),
            self.session.clone(),
        )
    }

    pub fn light(&self, family: BulbFamily, zone: u8, name: Option<&str>) -> Result<Light> {
        Ok(Light::new(self.bulb(family, zone)?, name))
    }

    pub fn diagnostics(&self) -> Value {
        json!({
            "host": self.config.host.to_string(),
            "port": self.config.control_port(),
            "id": self.id,
            "version": self.version.to_string(),
            "online": self.is_online(),
            "queue": {
                "pending": self.queue.len(),
                "delay_ms": self.queue.delay().as_millis() as u64,
                "repeat": self.queue.repeat(),
            },
            "session": self.session.as_ref().map(|s| json!({
                "state": s.state(),
                "id": s.session_id(),
                "pending_acks": s.pending_acks(),
            })),
        })
    }

    /// Stop every background task of this bridge.
    pub async fn dispose(&self) {
        self.shutdown.request();
        let task = lock(&self.refresh_task).take();
        if let Some(task) = task {
            runtime::join_or_cancel(task, Duration::from_millis(100)).await;
        }
        if let Some(discovery) = &self.discovery {
            discovery.dispose().await;
        }
        if let Some(session) = &self.session {
            session.dispose().await;
        }
        self.queue.dispose().await;
        debug!("Bridge at {} disposed", self.config.host);
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown.request();
    }
}

async fn refresh(discovery: Arc<BridgeDiscovery>, interval: Duration, stop: ShutdownListener) {
    loop {
        discovery.send_discover();
        if runtime::until_shutdown(&stop, runtime::sleep(interval))
            .await
            .is_none()
        {
            break;
        }
    }
}
