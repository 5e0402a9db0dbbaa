//! The scheduler & worker (K): a bounded ticket queue feeding a single
//! consumer task that drives the reconciler's fetch loop.
//!
//! Grounded on `numbex-daemon.py`'s `p2p_start` background thread, reimagined
//! around `tokio` rather than a polling OS thread.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::Error;
use crate::reconciler::Peer;
use crate::reconciler::Reconciler;

/// A unit of work pushed onto the worker's queue. `Shutdown` is a sentinel:
/// once received, the consumer drains no further tickets and exits.
#[derive(Debug, Clone)]
pub enum FetchTicket {
    Fetch,
    Shutdown,
}

/// Queue capacity matching the "capacity ≈20" bound: enough to absorb a
/// burst of scheduler ticks without the producer blocking indefinitely, but
/// small enough that a stalled consumer becomes visible as backpressure.
pub const QUEUE_CAPACITY: usize = 20;

/// The sticky fatal-error flag: once a fetch fails with `InconsistentData`,
/// the worker stops scheduling further fetches until `clearerrors()` resets
/// it.
#[derive(Default)]
pub struct FatalErrorFlag {
    set: AtomicBool,
    last: Mutex<Option<String>>,
}

impl FatalErrorFlag {
    pub fn is_set(&self) -> bool {
        return self.set.load(Ordering::SeqCst);
    }

    pub fn set(&self, err: &Error) {
        self.set.store(true, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(err.to_string());
    }

    pub fn clear(&self) {
        self.set.store(false, Ordering::SeqCst);
        *self.last.lock().unwrap() = None;
    }

    pub fn last_error(&self) -> Option<String> {
        return self.last.lock().unwrap().clone();
    }
}

/// Handle to a running worker: a sender half to push tickets, plus the
/// shared fatal-error flag `status()` reads.
pub struct WorkerHandle {
    sender: mpsc::Sender<FetchTicket>,
    pub fatal: std::sync::Arc<FatalErrorFlag>,
}

impl WorkerHandle {
    /// Push an immediate fetch ticket, as `p2p_import`/the control plane's
    /// forced-fetch verb does.
    pub async fn request_fetch(&self) -> bool {
        return self.sender.send(FetchTicket::Fetch).await.is_ok();
    }

    /// Push the shutdown sentinel; the consumer exits once it drains it.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(FetchTicket::Shutdown).await;
    }
}

/// Spawn the periodic scheduler (a `tokio::time::interval` loop emitting
/// `FetchTicket::Fetch` at `period`) and the single consumer task that
/// drives `reconciler.fetch_from_peers(&peers)` for each ticket it drains.
///
/// The consumer stops scheduling fetches (but keeps draining the queue,
/// discarding tickets) once the fatal-error flag is set, until
/// `clearerrors()`-equivalent code calls [`FatalErrorFlag::clear`].
pub fn spawn(
    reconciler: std::sync::Arc<Reconciler>,
    peers: std::sync::Arc<Mutex<Vec<Peer>>>,
    period: Duration,
) -> (WorkerHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);
    let fatal = std::sync::Arc::new(FatalErrorFlag::default());

    let ticker_tx = tx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if ticker_tx.send(FetchTicket::Fetch).await.is_err() {
                break;
            }
        }
    });

    let consumer_fatal = fatal.clone();
    let consumer = tokio::spawn(async move {
        while let Some(ticket) = rx.recv().await {
            match ticket {
                FetchTicket::Shutdown => break,
                FetchTicket::Fetch => {
                    if consumer_fatal.is_set() {
                        continue;
                    }
                    let peer_list = peers.lock().unwrap().clone();
                    if let Err(e) = reconciler.fetch_from_peers(&peer_list).await {
                        tracing::error!("fetch from peers failed: {}", e);
                        if matches!(e, Error::InconsistentData) {
                            consumer_fatal.set(&e);
                        }
                    }
                }
            }
        }
    });

    return (WorkerHandle { sender: tx, fatal }, consumer);
}
