//! Runtime-agnostic async abstractions.
//!
//! The bridge loops (queue drain, discovery receive, session receive) are plain
//! spawned tasks. This module gives them a UDP socket, timers, task handles and
//! an explicit shutdown signal without tying the crate to one executor.
//!
//! # Feature Flags
//!
//! Enable exactly one of the following features to select your runtime:
//!
//! - `runtime-tokio` (default) - Use the tokio runtime
//! - `runtime-async-std` - Use the async-std runtime
//! - `runtime-smol` - Use the smol runtime
//!
//! # Example
//!
//! ```toml
//! [dependencies]
//! milight-rs = { version = "0.1", default-features = false, features = ["runtime-smol"] }
//! ```

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{self, Either, FutureExt, Shared};

#[cfg(feature = "runtime-tokio")]
mod tokio_impl;

#[cfg(feature = "runtime-async-std")]
mod async_std_impl;

#[cfg(feature = "runtime-smol")]
mod smol_impl;

#[cfg(feature = "runtime-tokio")]
pub use tokio_impl::*;

#[cfg(feature = "runtime-async-std")]
pub use async_std_impl::*;

#[cfg(feature = "runtime-smol")]
pub use smol_impl::*;

/// Trait for async UDP socket operations.
///
/// Every socket in this crate is shared between a sending side and a receiving
/// task, so all operations take `&self`.
pub trait AsyncUdpSocket: Send + Sync + Sized {
    /// Bind to the specified address.
    fn bind(addr: SocketAddr) -> impl Future<Output = io::Result<Self>> + Send;

    /// Connect to the specified address, so `send`/`recv` talk to that peer only.
    fn connect(&self, addr: SocketAddr) -> impl Future<Output = io::Result<()>> + Send;

    /// Send data to the connected address.
    fn send(&self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Receive data from the connected address.
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Send data to a specific address.
    fn send_to(&self, buf: &[u8], addr: SocketAddr)
    -> impl Future<Output = io::Result<usize>> + Send;

    /// Receive data and the source address.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    /// Enable or disable broadcast mode.
    fn set_broadcast(&self, broadcast: bool) -> io::Result<()>;

    /// The local address this socket is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Sleep for the specified duration.
pub async fn sleep(duration: Duration) {
    sleep_impl(duration).await
}

/// Run a future with a timeout.
///
/// Returns `Err(TimedOut)` if the timeout expires before the future completes.
pub async fn timeout<F, T>(duration: Duration, future: F) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    timeout_impl(duration, future).await
}

/// Error returned when a timeout expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut;

impl std::fmt::Display for TimedOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation timed out")
    }
}

impl std::error::Error for TimedOut {}

/// A measurement of monotonically increasing time.
#[derive(Debug, Clone, Copy)]
pub struct Instant(InstantInner);

impl Instant {
    /// Returns the current instant.
    pub fn now() -> Self {
        Instant(InstantInner::now())
    }

    /// Returns the duration elapsed since this instant was created.
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

/// Owning side of a shutdown signal.
///
/// Requesting shutdown sets a flag (so a loop can tell an I/O error caused by
/// the shutdown from a real failure) and wakes every [`ShutdownListener`].
#[derive(Debug)]
pub struct Shutdown {
    requested: AtomicBool,
    trigger: Mutex<Option<oneshot::Sender<()>>>,
    signal: Shared<oneshot::Receiver<()>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Shutdown {
            requested: AtomicBool::new(false),
            trigger: Mutex::new(Some(tx)),
            signal: rx.shared(),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        let sender = match self.trigger.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener(self.signal.clone())
    }
}

/// Cloneable receiving side of a [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownListener(Shared<oneshot::Receiver<()>>);

impl ShutdownListener {
    /// Resolves once shutdown was requested (or the owner was dropped).
    pub async fn wait(&self) {
        let _ = self.0.clone().await;
    }
}

/// Drive `future` until it completes or shutdown is signalled.
///
/// Returns `None` when shutdown won the race; the future is dropped in that case.
pub async fn until_shutdown<F>(listener: &ShutdownListener, future: F) -> Option<F::Output>
where
    F: Future,
{
    let stop = listener.wait();
    futures::pin_mut!(future);
    futures::pin_mut!(stop);

    match future::select(future, stop).await {
        Either::Left((output, _)) => Some(output),
        Either::Right(_) => None,
    }
}

/// Give a task `grace` to finish on its own, then cancel it.
pub async fn join_or_cancel<T: Send + 'static>(mut handle: JoinHandle<T>, grace: Duration) {
    if timeout(grace, &mut handle).await.is_err() {
        handle.cancel().await;
    }
}

// JoinHandle type alias for task spawning
#[cfg(feature = "runtime-tokio")]
pub type JoinHandle<T> = tokio_impl::TokioJoinHandle<T>;

#[cfg(feature = "runtime-async-std")]
pub type JoinHandle<T> = async_std_impl::AsyncStdJoinHandle<T>;

#[cfg(feature = "runtime-smol")]
pub type JoinHandle<T> = smol_impl::SmolJoinHandle<T>;

// Compile-time check to ensure exactly one runtime is selected
#[cfg(not(any(
    feature = "runtime-tokio",
    feature = "runtime-async-std",
    feature = "runtime-smol"
)))]
compile_error!(
    "One of \"runtime-tokio\", \"runtime-async-std\", or \"runtime-smol\" features must be enabled"
);

#[cfg(all(feature = "runtime-tokio", feature = "runtime-async-std"))]
compile_error!("Features \"runtime-tokio\" and \"runtime-async-std\" are mutually exclusive");

#[cfg(all(feature = "runtime-tokio", feature = "runtime-smol"))]
compile_error!("Features \"runtime-tokio\" and \"runtime-smol\" are mutually exclusive");

#[cfg(all(feature = "runtime-async-std", feature = "runtime-smol"))]
compile_error!("Features \"runtime-async-std\" and \"runtime-smol\" are mutually exclusive");

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_until_shutdown_returns_output_when_not_stopped() {
        let shutdown = Shutdown::new();
        let listener = shutdown.listener();
        assert_eq!(until_shutdown(&listener, async { 7 }).await, Some(7));
        assert!(!shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_until_shutdown_interrupts_pending_future() {
        let shutdown = Shutdown::new();
        let listener = shutdown.listener();
        shutdown.request();
        let out = until_shutdown(&listener, futures::future::pending::<()>()).await;
        assert!(out.is_none());
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_join_or_cancel_stops_stuck_task() {
        let handle = spawn(futures::future::pending::<()>());
        let started = Instant::now();
        join_or_cancel(handle, Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
