//! Process-wide online/offline signal.
//!
//! The monitor never polls. Platform code forwards its network events to
//! [`ConnectivityMonitor::handle_online`] and
//! [`ConnectivityMonitor::handle_offline`]; everything else reads the
//! current value or waits for the next offline→online edge.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reading {
    online: bool,
    /// Number of offline→online transitions so far
    edges: u64,
}

/// Tracks whether the device believes it can reach the network.
///
/// Cheap to clone; all clones share the same signal.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<Reading>>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the platform's reading at startup.
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(Reading {
            online: initially_online,
            edges: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Platform reported that the network came back.
    pub fn handle_online(&self) {
        let changed = self.tx.send_if_modified(|reading| {
            if reading.online {
                return false;
            }
            reading.online = true;
            reading.edges += 1;
            true
        });
        if changed {
            tracing::info!("connectivity restored");
        }
    }

    /// Platform reported that the network went away.
    pub fn handle_offline(&self) {
        let changed = self.tx.send_if_modified(|reading| {
            let was_online = reading.online;
            reading.online = false;
            was_online
        });
        if changed {
            tracing::info!("connectivity lost");
        }
    }

    /// Current reading; no IO involved.
    pub fn is_online(&self) -> bool {
        self.tx.borrow().online
    }

    /// Subscribe to offline→online transitions from now on.
    pub fn online_edges(&self) -> OnlineEdges {
        let rx = self.tx.subscribe();
        let seen = rx.borrow().edges;
        OnlineEdges { rx, seen }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Stream of offline→online transitions.
#[derive(Debug)]
pub struct OnlineEdges {
    rx: watch::Receiver<Reading>,
    seen: u64,
}

impl OnlineEdges {
    /// Wait until the device goes from offline to online.
    ///
    /// Resolves immediately if a transition happened since the last call and
    /// the device is still online. Online→online and online→offline updates
    /// never resolve it. Returns `None` once every monitor handle is dropped.
    pub async fn next(&mut self) -> Option<()> {
        loop {
            let reading = *self.rx.borrow_and_update();
            if reading.edges != self.seen {
                self.seen = reading.edges;
                if reading.online {
                    return Some(());
                }
            }
            self.rx.changed().await.ok()?;
        }
    }
}
