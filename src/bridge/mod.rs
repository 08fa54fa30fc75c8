//! UDP transport bridge.
//!
//! A dedicated thread owns the listening socket and forwards each datagram's
//! payload to the application server with a best-effort send: when the
//! server's mailbox is full the datagram is dropped and counted, the
//! receive loop never blocks on it. Outbound datagrams go through
//! [`UdpBridge::send_to`], which uses a transient socket of its own.

mod peer;
mod stats;

pub use peer::{NeighborCache, encode_text, parse_prefix, peer_address, send_datagram};
pub use stats::{BridgeStats, StatsSnapshot};

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded};
use parking_lot::Mutex;

use crate::appserver::AppServerSupervisor;
use crate::config::{BridgeConfig, NodeConfig};
use crate::error::{Error, Result};
use crate::messaging::{Delivery, Mailbox, Message};
use crate::worker::StartOutcome;

/// Where inbound payloads go. Resolved per datagram, so a server started
/// after the bridge is picked up.
pub trait PayloadTarget: Send + Sync {
    fn target(&self) -> Option<Mailbox>;
}

impl PayloadTarget for Mailbox {
    fn target(&self) -> Option<Mailbox> {
        Some(self.clone())
    }
}

impl PayloadTarget for AppServerSupervisor {
    fn target(&self) -> Option<Mailbox> {
        self.mailbox()
    }
}

/// Result of [`UdpBridge::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listening {
    pub outcome: StartOutcome,
    pub local_addr: SocketAddr,
}

/// Outcome of an outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub bytes: usize,
    pub address: IpAddr,
}

struct BridgeWorker {
    join: JoinHandle<()>,
    local_addr: SocketAddr,
    /// Flag of this receive loop only; every start gets a fresh one
    running: Arc<AtomicBool>,
}

/// Owns the bridge thread and the outbound path.
pub struct UdpBridge {
    config: BridgeConfig,
    peer_prefix: IpAddr,
    target: Arc<dyn PayloadTarget>,
    stats: Arc<BridgeStats>,
    bind_timeout: Duration,
    worker: Mutex<Option<BridgeWorker>>,
    neighbors: Mutex<NeighborCache>,
}

impl UdpBridge {
    pub fn new(config: &NodeConfig, target: Arc<dyn PayloadTarget>) -> Result<Self> {
        Ok(Self {
            peer_prefix: parse_prefix(&config.bridge.peer_prefix)?,
            config: config.bridge.clone(),
            target,
            stats: Arc::new(BridgeStats::default()),
            bind_timeout: Duration::from_millis(config.messaging.reply_timeout_ms),
            worker: Mutex::new(None),
            neighbors: Mutex::new(NeighborCache::new()),
        })
    }

    /// Start the receive loop unless it is already running.
    ///
    /// The socket is bound on the bridge thread; a bind failure ends that
    /// thread and is returned here.
    pub fn start(&self) -> Result<Listening> {
        let mut slot = self.worker.lock();

        if let Some(worker) = slot.as_ref() {
            if !worker.join.is_finished() {
                log::info!("UDP bridge already listening on {}", worker.local_addr);
                return Ok(Listening {
                    outcome: StartOutcome::AlreadyRunning,
                    local_addr: worker.local_addr,
                });
            }
        }
        if let Some(stale) = slot.take() {
            log::warn!("UDP bridge thread exited on its own, restarting");
            let _ = stale.join.join();
        }

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded(1);
        let bind_address = self.config.bind_address.clone();
        let read_timeout = Duration::from_millis(self.config.read_timeout_ms.max(1));
        let buffer_size = self.config.buffer_size;
        let target = Arc::clone(&self.target);
        let stats = Arc::clone(&self.stats);
        let thread_running = Arc::clone(&running);

        let join = thread::Builder::new()
            .name("udp_server".to_string())
            .spawn(move || {
                let socket = match bind(&bind_address, read_timeout) {
                    Ok(socket) => socket,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                match socket.local_addr() {
                    Ok(addr) => {
                        let _ = ready_tx.send(Ok(addr));
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                }
                BridgeThread {
                    socket,
                    target,
                    stats,
                    running: thread_running,
                    buffer_size,
                }
                .run();
            })
            .map_err(|e| Error::ResourceExhausted(format!("failed to spawn udp_server: {}", e)))?;

        match ready_rx.recv_timeout(self.bind_timeout) {
            Ok(Ok(local_addr)) => {
                log::info!("UDP bridge listening on {}", local_addr);
                *slot = Some(BridgeWorker {
                    join,
                    local_addr,
                    running,
                });
                Ok(Listening {
                    outcome: StartOutcome::Started,
                    local_addr,
                })
            }
            Ok(Err(e)) => {
                log::error!("UDP bridge bind to {} failed: {}", self.config.bind_address, e);
                let _ = join.join();
                Err(Error::socket(
                    format!("binding {}", self.config.bind_address),
                    e,
                ))
            }
            Err(RecvTimeoutError::Timeout) => {
                // A late bind sees the cleared flag and leaves at once
                running.store(false, Ordering::SeqCst);
                let _ = join.join();
                Err(Error::Timeout(format!(
                    "UDP bridge did not bind within {:?}",
                    self.bind_timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = join.join();
                Err(Error::Disconnected("UDP bridge thread died during bind".into()))
            }
        }
    }

    /// Stop the receive loop and join the thread.
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        let Some(worker) = slot.take() else {
            return Err(Error::NotRunning("UDP bridge"));
        };
        worker.running.store(false, Ordering::SeqCst);
        if worker.join.join().is_err() {
            log::error!("UDP bridge thread panicked");
        }
        log::info!("UDP bridge stopped ({})", self.stats.snapshot());
        Ok(())
    }

    pub fn shutdown(&self) -> Result<()> {
        match self.stop() {
            Err(Error::NotRunning(_)) => Ok(()),
            other => other,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.join.is_finished())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.worker.lock().as_ref().map(|w| w.local_addr)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Add neighbours `0..count` with derived link-local addresses.
    pub fn fill_neighbors(&self, count: u16) -> Vec<(u16, IpAddr)> {
        let mut cache = self.neighbors.lock();
        cache.fill(self.peer_prefix, count);
        (0..count).filter_map(|id| cache.get(id).map(|a| (id, a))).collect()
    }

    pub fn neighbors(&self) -> NeighborCache {
        self.neighbors.lock().clone()
    }

    /// Send `text` (NUL terminated, truncated to the buffer size) to peer `id`.
    pub fn send_to(&self, id: u16, text: &str) -> Result<SendReport> {
        let address = self.neighbors.lock().resolve(self.peer_prefix, id);
        let payload = encode_text(text, self.config.buffer_size);
        let bytes = send_datagram(SocketAddr::new(address, self.config.port), &payload)?;
        Ok(SendReport { bytes, address })
    }
}

impl Drop for UdpBridge {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.running.store(false, Ordering::SeqCst);
        }
    }
}

fn bind(address: &str, read_timeout: Duration) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(address)?;
    // Short timeout so the loop observes the running flag
    socket.set_read_timeout(Some(read_timeout))?;
    Ok(socket)
}

struct BridgeThread {
    socket: UdpSocket,
    target: Arc<dyn PayloadTarget>,
    stats: Arc<BridgeStats>,
    running: Arc<AtomicBool>,
    buffer_size: usize,
}

impl BridgeThread {
    fn run(self) {
        log::debug!("UDP bridge receive loop running");
        let mut buffer = vec![0u8; self.buffer_size];

        while self.running.load(Ordering::Relaxed) {
            let (len, source) = match self.socket.recv_from(&mut buffer) {
                Ok(result) => result,
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => {
                    log::error!("UDP recv error: {}", e);
                    self.stats.record_error();
                    continue;
                }
            };
            self.stats.record_received();
            log::debug!("UDP packet of size {} received from {}", len, source);

            let Some(mailbox) = self.target.target() else {
                self.stats.record_dropped("no application server");
                continue;
            };
            match mailbox.try_send(Message::InboundPayload(buffer[..len].to_vec())) {
                Delivery::Delivered => self.stats.record_forwarded(),
                Delivery::Full => self.stats.record_dropped("application server busy"),
                Delivery::Closed => self.stats.record_dropped("application server gone"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MailboxPool;

    fn bridge_to(mailbox: Mailbox) -> UdpBridge {
        UdpBridge::new(&NodeConfig::fast(), Arc::new(mailbox)).unwrap()
    }

    #[test]
    fn test_datagram_forwarded_as_payload() {
        let pool = MailboxPool::new(1);
        let (mailbox, inbox) = pool.create("appserver", 4).unwrap();
        let bridge = bridge_to(mailbox);

        let listening = bridge.start().unwrap();
        assert_eq!(listening.outcome, StartOutcome::Started);

        send_datagram(listening.local_addr, b"21C\0").unwrap();
        match inbox.recv_timeout(Duration::from_secs(1)) {
            Ok(Message::InboundPayload(payload)) => assert_eq!(payload, b"21C\0"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(bridge.stats().forwarded, 1);

        bridge.stop().unwrap();
        assert!(!bridge.is_running());
    }

    #[test]
    fn test_start_twice_keeps_one_socket() {
        let pool = MailboxPool::new(1);
        let (mailbox, _inbox) = pool.create("appserver", 4).unwrap();
        let bridge = bridge_to(mailbox);

        let first = bridge.start().unwrap();
        let second = bridge.start().unwrap();
        assert_eq!(second.outcome, StartOutcome::AlreadyRunning);
        assert_eq!(second.local_addr, first.local_addr);

        bridge.shutdown().unwrap();
        assert!(matches!(bridge.stop(), Err(Error::NotRunning(_))));
    }

    #[test]
    fn test_bind_failure_reported() {
        let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut config = NodeConfig::fast();
        config.bridge.bind_address = taken.local_addr().unwrap().to_string();

        let pool = MailboxPool::new(1);
        let (mailbox, _inbox) = pool.create("appserver", 4).unwrap();
        let bridge = UdpBridge::new(&config, Arc::new(mailbox)).unwrap();

        assert!(matches!(bridge.start(), Err(Error::Socket { .. })));
        assert!(!bridge.is_running());
    }

    #[test]
    fn test_bind_timeout_leaves_no_loop_behind() {
        let pool = MailboxPool::new(1);
        let (mailbox, inbox) = pool.create("appserver", 4).unwrap();
        let mut bridge = bridge_to(mailbox);

        // Zero wait: the handshake times out before the thread reports
        bridge.bind_timeout = Duration::ZERO;
        let mut timed_out = false;
        for _ in 0..20 {
            match bridge.start() {
                Err(Error::Timeout(_)) => {
                    timed_out = true;
                    break;
                }
                Ok(_) => bridge.stop().unwrap(),
                Err(e) => panic!("unexpected {}", e),
            }
        }
        assert!(timed_out);
        assert!(!bridge.is_running());

        bridge.bind_timeout = Duration::from_secs(1);
        let listening = bridge.start().unwrap();
        assert_eq!(listening.outcome, StartOutcome::Started);
        send_datagram(listening.local_addr, b"once\0").unwrap();
        assert!(inbox.recv_timeout(Duration::from_secs(1)).is_ok());

        bridge.stop().unwrap();
        assert!(!bridge.is_running());
        // Nothing else is reading into the stats
        assert_eq!(bridge.stats().received, 1);
    }

    #[test]
    fn test_oversized_datagram_truncated_to_buffer() {
        let pool = MailboxPool::new(1);
        let (mailbox, inbox) = pool.create("appserver", 4).unwrap();
        let bridge = bridge_to(mailbox);
        let listening = bridge.start().unwrap();

        send_datagram(listening.local_addr, &[7u8; 300]).unwrap();
        match inbox.recv_timeout(Duration::from_secs(1)) {
            Ok(Message::InboundPayload(payload)) => assert_eq!(payload.len(), 128),
            other => panic!("unexpected {:?}", other),
        }

        bridge.stop().unwrap();
    }

    #[test]
    fn test_send_to_resolves_peer() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();

        let mut config = NodeConfig::fast();
        config.bridge.peer_prefix = "127.0.0.0".into();
        config.bridge.port = receiver.local_addr().unwrap().port();
        let pool = MailboxPool::new(1);
        let (mailbox, _inbox) = pool.create("appserver", 4).unwrap();
        let bridge = UdpBridge::new(&config, Arc::new(mailbox)).unwrap();

        let report = bridge.send_to(1, "hello").unwrap();
        assert_eq!(report.bytes, 6);
        assert_eq!(report.address.to_string(), "127.0.0.1");

        let mut buf = [0u8; 32];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"hello\0");
    }
}
