//! Paced, coalescing send queue for one bridge connection.
//!
//! Older bridges drop commands that arrive less than ~100ms apart, while a UI
//! slider can produce a new brightness every few milliseconds. Every queued
//! [`Frame`] carries a coalescing id: enqueuing a frame replaces any frame with
//! the same non-zero id that has not been sent yet, so only the newest absolute
//! value reaches the bridge. Relative (step) frames use id 0 and are always
//! delivered, in order.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use log::{debug, error};

use crate::errors::Error;
use crate::frame::{Frame, NO_COALESCE, hex};
use crate::runtime::{
    self, AsyncUdpSocket, Instant, JoinHandle, Shutdown, ShutdownListener, UdpSocket,
};

type Result<T> = std::result::Result<T, Error>;

/// Recover the data of a poisoned lock; queue state stays consistent per operation.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct QueueItem {
    frame: Frame,
    enqueued: Instant,
}

#[derive(Debug)]
struct Shared {
    items: Mutex<VecDeque<QueueItem>>,
    delay_ms: AtomicU64,
    repeat: AtomicU8,
}

/// Outbound frame queue with a single background drain task.
#[derive(Debug)]
pub struct CommandQueue {
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    doorbell: UnboundedSender<()>,
    closed: AtomicBool,
    shutdown: Shutdown,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    /// Maximum number of unsent frames.
    pub const CAPACITY: usize = 20;
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);
    /// Upper bound of sends per repeatable frame, whatever `repeat` is set to.
    pub const MAX_IN_FLIGHT_REPEATS: u8 = 1;

    /// Bind a socket connected to `target` and start draining.
    ///
    /// Must be called within the selected async runtime.
    pub async fn start(target: SocketAddr) -> Result<Self> {
        let local = if target.is_ipv4() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        };

        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| Error::socket("bind", e))?;
        socket
            .connect(target)
            .await
            .map_err(|e| Error::socket("connect", e))?;

        Ok(Self::with_socket(Arc::new(socket), target))
    }

    fn with_socket(socket: Arc<UdpSocket>, target: SocketAddr) -> Self {
        let shared = Arc::new(Shared {
            items: Mutex::new(VecDeque::with_capacity(Self::CAPACITY)),
            delay_ms: AtomicU64::new(Self::DEFAULT_DELAY.as_millis() as u64),
            repeat: AtomicU8::new(1),
        });
        let (doorbell, rings) = mpsc::unbounded();
        let shutdown = Shutdown::new();

        let task = runtime::spawn(drain(
            Arc::clone(&shared),
            Arc::clone(&socket),
            target,
            rings,
            shutdown.listener(),
        ));

        CommandQueue {
            shared,
            socket,
            target,
            doorbell,
            closed: AtomicBool::new(false),
            shutdown,
            drain_task: Mutex::new(Some(task)),
        }
    }

    /// Queue a frame without blocking.
    ///
    /// A non-zero coalescing id first removes any unsent frame with the same id.
    pub fn enqueue(&self, frame: Frame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }

        {
            let mut items = lock(&self.shared.items);
            if frame.coalesce_id() != NO_COALESCE {
                items.retain(|item| item.frame.coalesce_id() != frame.coalesce_id());
            }
            if items.len() >= Self::CAPACITY {
                return Err(Error::QueueFull {
                    capacity: Self::CAPACITY,
                });
            }
            items.push_back(QueueItem {
                frame,
                enqueued: Instant::now(),
            });
        }

        self.doorbell
            .unbounded_send(())
            .map_err(|_| Error::QueueClosed)
    }

    /// Number of frames waiting to be sent.
    pub fn len(&self) -> usize {
        lock(&self.shared.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// The socket frames are sent from; replies of the bridge arrive here too.
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.shared.delay_ms.load(Ordering::Relaxed))
    }

    /// Pause between two sends.
    pub fn set_delay(&self, delay: Duration) {
        self.shared
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Configured repeat count of repeatable frames.
    ///
    /// Sends are still capped at [`Self::MAX_IN_FLIGHT_REPEATS`].
    pub fn repeat(&self) -> u8 {
        self.shared.repeat.load(Ordering::Relaxed)
    }

    pub fn set_repeat(&self, repeat: u8) {
        self.shared.repeat.store(repeat.max(1), Ordering::Relaxed);
    }

    /// Remove and return every unsent frame.
    #[cfg(test)]
    pub(crate) fn take_pending(&self) -> Vec<Frame> {
        lock(&self.shared.items)
            .drain(..)
            .map(|item| item.frame)
            .collect()
    }

    /// Stop the drain task. The queue cannot be reused afterwards.
    pub async fn dispose(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.request();
        self.doorbell.close_channel();

        let task = lock(&self.drain_task).take();
        if let Some(task) = task {
            runtime::join_or_cancel(task, self.delay()).await;
        }
        lock(&self.shared.items).clear();
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.request();
        self.doorbell.close_channel();
    }
}

/// Wait for the next frame; `None` once the queue was closed.
async fn next_item(shared: &Shared, rings: &mut UnboundedReceiver<()>) -> Option<QueueItem> {
    loop {
        if let Some(item) = lock(&shared.items).pop_front() {
            return Some(item);
        }
        rings.next().await?;
    }
}

async fn drain(
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    mut rings: UnboundedReceiver<()>,
    stop: ShutdownListener,
) {
    debug!("Send queue for {target} ready");

    while let Some(Some(item)) = runtime::until_shutdown(&stop, next_item(&shared, &mut rings)).await
    {
        let configured = if item.frame.repeatable() {
            shared.repeat.load(Ordering::Relaxed)
        } else {
            1
        };
        let sends = configured.clamp(1, CommandQueue::MAX_IN_FLIGHT_REPEATS);

        for _ in 0..sends {
            match socket.send(item.frame.bytes()).await {
                Ok(_) => debug!(
                    "Sent packet '{}' to bridge {} (queued {:?} ago)",
                    hex(item.frame.bytes()),
                    target,
                    item.enqueued.elapsed()
                ),
                Err(e) => error!("Failed to send message to '{target}': {e}"),
            }
        }

        let delay = Duration::from_millis(shared.delay_ms.load(Ordering::Relaxed));
        if runtime::until_shutdown(&stop, runtime::sleep(delay))
            .await
            .is_none()
        {
            break;
        }
    }

    debug!("Send queue for {target} stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use tokio::net::UdpSocket as TokioUdpSocket;

    /// A loopback socket standing in for the bridge.
    pub(crate) async fn fake_bridge() -> (TokioUdpSocket, SocketAddr) {
        let socket = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    pub(crate) async fn recv_frame(socket: &TokioUdpSocket, wait: Duration) -> Option<Vec<u8>> {
        let mut buf = [0u8; 64];
        match tokio::time::timeout(wait, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => Some(buf[..n].to_vec()),
            _ => None,
        }
    }

    /// A started queue whose drain task has not run yet.
    pub(crate) async fn idle_queue() -> (Arc<CommandQueue>, TokioUdpSocket) {
        let (bridge, addr) = fake_bridge().await;
        (Arc::new(CommandQueue::start(addr).await.unwrap()), bridge)
    }

    async fn queue(delay_ms: u64) -> (CommandQueue, TokioUdpSocket) {
        let (bridge, addr) = fake_bridge().await;
        let queue = CommandQueue::start(addr).await.unwrap();
        queue.set_delay(Duration::from_millis(delay_ms));
        (queue, bridge)
    }

    #[tokio::test]
    async fn test_same_id_sends_only_newest() {
        let (queue, bridge) = queue(20).await;

        queue.enqueue(Frame::new(vec![1, 1, 0x55], 7, true)).unwrap();
        queue.enqueue(Frame::new(vec![2, 2, 0x55], 7, true)).unwrap();
        assert_eq!(queue.len(), 1);

        let wait = Duration::from_millis(300);
        assert_eq!(recv_frame(&bridge, wait).await, Some(vec![2, 2, 0x55]));
        assert_eq!(recv_frame(&bridge, wait).await, None);
        queue.dispose().await;
    }

    #[tokio::test]
    async fn test_relative_frames_all_delivered_in_order() {
        let (queue, bridge) = queue(5).await;

        for i in 0..5u8 {
            queue.enqueue(Frame::relative(vec![0x23, i, 0x55])).unwrap();
        }
        assert_eq!(queue.len(), 5);

        let wait = Duration::from_millis(300);
        for i in 0..5u8 {
            assert_eq!(recv_frame(&bridge, wait).await, Some(vec![0x23, i, 0x55]));
        }
        assert_eq!(recv_frame(&bridge, Duration::from_millis(100)).await, None);
        queue.dispose().await;
    }

    #[tokio::test]
    async fn test_coalesced_frame_takes_newest_position() {
        let (queue, bridge) = queue(5).await;

        queue.enqueue(Frame::new(vec![0xA0], 3, true)).unwrap();
        queue.enqueue(Frame::relative(vec![0xB0])).unwrap();
        queue.enqueue(Frame::new(vec![0xA1], 3, true)).unwrap();

        let wait = Duration::from_millis(300);
        assert_eq!(recv_frame(&bridge, wait).await, Some(vec![0xB0]));
        assert_eq!(recv_frame(&bridge, wait).await, Some(vec![0xA1]));
        queue.dispose().await;
    }

    #[tokio::test]
    async fn test_capacity_overflow_is_reported() {
        let (queue, _bridge) = queue(100).await;

        for _ in 0..CommandQueue::CAPACITY {
            queue.enqueue(Frame::relative(vec![0x24, 0, 0x55])).unwrap();
        }
        assert_eq!(
            queue.enqueue(Frame::relative(vec![0x24, 0, 0x55])),
            Err(Error::QueueFull {
                capacity: CommandQueue::CAPACITY
            })
        );
        queue.dispose().await;
    }

    #[tokio::test]
    async fn test_repeat_is_capped() {
        let (queue, bridge) = queue(5).await;
        queue.set_repeat(3);
        assert_eq!(queue.repeat(), 3);

        queue.enqueue(Frame::new(vec![0x42, 0, 0x55], 9, true)).unwrap();
        let wait = Duration::from_millis(200);
        assert!(recv_frame(&bridge, wait).await.is_some());
        assert_eq!(recv_frame(&bridge, wait).await, None);
        queue.dispose().await;
    }

    #[tokio::test]
    async fn test_enqueue_after_dispose_fails() {
        let (queue, _bridge) = queue(5).await;
        queue.dispose().await;
        assert_eq!(
            queue.enqueue(Frame::relative(vec![0x22, 0, 0x55])),
            Err(Error::QueueClosed)
        );
    }
}
