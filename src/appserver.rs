//! Application server: answers interests under its prefix with locally
//! generated content.
//!
//! Started at most once per process; the halt used at process shutdown is
//! not reachable from the shell.

use parking_lot::Mutex;

use crate::config::{AppServerConfig, NodeConfig};
use crate::error::Result;
use crate::messaging::{Deadlines, Inbox, Mailbox, MailboxPool, Message};
use crate::worker::{StartOutcome, WorkerHandle};

/// Owns the application server thread's lifecycle.
pub struct AppServerSupervisor {
    pool: MailboxPool,
    config: AppServerConfig,
    capacity: usize,
    deadlines: Deadlines,
    worker: Mutex<Option<WorkerHandle>>,
}

impl AppServerSupervisor {
    pub fn new(pool: MailboxPool, config: &NodeConfig) -> Self {
        Self {
            pool,
            config: config.appserver.clone(),
            capacity: config.messaging.appserver_capacity,
            deadlines: Deadlines::from_config(&config.messaging),
            worker: Mutex::new(None),
        }
    }

    /// Start the application server unless it is already running, and
    /// attach it to `relay` when one is given.
    ///
    /// The worker lock is released before the attach, which may block on a
    /// full relay mailbox.
    pub fn start(&self, relay: Option<&Mailbox>) -> Result<StartOutcome> {
        let own = {
            let mut slot = self.worker.lock();
            if slot.is_some() {
                log::debug!("Application server already running");
                return Ok(StartOutcome::AlreadyRunning);
            }

            let (mailbox, inbox) = self.pool.create("appserver", self.capacity)?;
            let default_content = self.config.default_content.clone().into_bytes();
            let worker = WorkerHandle::spawn("appserver", mailbox, inbox, move |inbox| {
                AppServerThread::new(inbox, default_content).run();
            })?;
            log::info!("Application server started for {}", self.config.prefix);
            let own = worker.mailbox().clone();
            *slot = Some(worker);
            own
        };

        match relay {
            Some(relay) => self.attach_to(relay, own),
            None => log::warn!("Application server started without a relay"),
        }
        Ok(StartOutcome::Started)
    }

    /// Register the running server with a (re)started relay.
    pub fn attach(&self, relay: &Mailbox) {
        if let Some(own) = self.mailbox() {
            self.attach_to(relay, own);
        }
    }

    fn attach_to(&self, relay: &Mailbox, own: Mailbox) {
        let msg = Message::AttachAppServer {
            mailbox: own,
            prefix: self.config.prefix.clone(),
        };
        if let Err(e) = relay.send(msg, self.deadlines.send) {
            log::warn!("Application server: attaching to relay failed: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Mailbox fed by the UDP bridge; `None` before the first start.
    pub fn mailbox(&self) -> Option<Mailbox> {
        self.worker.lock().as_ref().map(|w| w.mailbox().clone())
    }

    /// Process-exit halt.
    pub fn shutdown(&self) -> Result<()> {
        // Taken out so the bridge never waits on the lock during the halt
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        match worker.halt(self.deadlines) {
            Ok(()) => {
                log::info!("Application server stopped");
                Ok(())
            }
            Err((worker, e)) => {
                *self.worker.lock() = Some(worker);
                Err(e)
            }
        }
    }
}

struct AppServerThread {
    inbox: Inbox,
    latest: Option<Vec<u8>>,
    default_content: Vec<u8>,
}

impl AppServerThread {
    fn new(inbox: Inbox, default_content: Vec<u8>) -> Self {
        Self {
            inbox,
            latest: None,
            default_content,
        }
    }

    fn run(mut self) {
        while let Some(msg) = self.inbox.recv() {
            match msg {
                Message::Halt { ack } => {
                    ack.send(());
                    return;
                }
                Message::InboundPayload(payload) => {
                    log::debug!("Application server: {} byte payload", payload.len());
                    self.latest = Some(payload);
                }
                Message::ForwardedInterest {
                    name,
                    max_len,
                    reply,
                    relay,
                } => {
                    let content = self.content();
                    log::debug!("Application server: {} bytes for {}", content.len(), name);
                    let ready = Message::ContentReady {
                        name,
                        content,
                        max_len,
                        reply,
                    };
                    // Relay full or gone: answer the requester directly
                    if let Err((delivery, msg)) = relay.offer(ready) {
                        log::debug!("Application server: relay {:?}, replying directly", delivery);
                        if let Message::ContentReady {
                            mut content,
                            max_len,
                            reply,
                            ..
                        } = msg
                        {
                            content.truncate(max_len);
                            reply.send(content);
                        }
                    }
                }
                Message::Interest {
                    name,
                    max_len,
                    reply,
                } => {
                    let mut content = self.content();
                    log::debug!("Application server: direct interest for {}", name);
                    content.truncate(max_len);
                    reply.send(content);
                }
                other => {
                    log::warn!("Application server: unexpected {} message", other.kind());
                }
            }
        }
    }

    /// Latest payload without trailing NULs, or the default content.
    fn content(&self) -> Vec<u8> {
        let payload = self.latest.as_deref().unwrap_or_default();
        let end = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        if end == 0 {
            self.default_content.clone()
        } else {
            payload[..end].to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn interest(mailbox: &Mailbox, deadlines: Deadlines) -> Vec<u8> {
        mailbox
            .request(
                |reply| Message::Interest {
                    name: "/riot/appserver/0".into(),
                    max_len: 64,
                    reply,
                },
                deadlines,
            )
            .unwrap()
    }

    #[test]
    fn test_serves_default_then_latest_payload() {
        let config = NodeConfig::fast();
        let pool = MailboxPool::new(2);
        let server = AppServerSupervisor::new(pool, &config);
        let deadlines = Deadlines::from_config(&config.messaging);

        assert_eq!(server.start(None).unwrap(), StartOutcome::Started);
        let mailbox = server.mailbox().unwrap();
        assert_eq!(interest(&mailbox, deadlines), b"RIOT is friendly");

        mailbox
            .send(Message::InboundPayload(b"21C\0\0".to_vec()), deadlines.send)
            .unwrap();
        assert_eq!(interest(&mailbox, deadlines), b"21C");

        server.shutdown().unwrap();
        assert!(!server.is_running());
    }

    #[test]
    fn test_start_is_idempotent_and_attaches() {
        let config = NodeConfig::fast();
        let pool = MailboxPool::new(3);
        let (relay, relay_inbox) = pool.create("relay", 4).unwrap();
        let server = AppServerSupervisor::new(pool.clone(), &config);

        assert_eq!(server.start(Some(&relay)).unwrap(), StartOutcome::Started);
        assert_eq!(
            server.start(Some(&relay)).unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(pool.in_use(), 2);

        match relay_inbox.recv_timeout(Duration::from_secs(1)) {
            Ok(Message::AttachAppServer { mailbox, prefix }) => {
                assert_eq!(prefix, "/riot/appserver");
                assert!(mailbox.same_as(&server.mailbox().unwrap()));
            }
            other => panic!("unexpected {:?}", other),
        }
        // The second start did not attach again
        assert!(relay_inbox.is_empty());

        server.shutdown().unwrap();
    }

    #[test]
    fn test_blocked_attach_does_not_hold_mailbox_lookup() {
        let mut config = NodeConfig::fast();
        config.messaging.send_timeout_ms = 800;
        let pool = MailboxPool::new(3);
        // Full relay mailbox nobody drains: the attach waits out its timeout
        let (relay, _relay_inbox) = pool.create("relay", 1).unwrap();
        relay.send(Message::Populate, Duration::from_millis(10)).unwrap();
        let server = std::sync::Arc::new(AppServerSupervisor::new(pool, &config));

        let starter = {
            let server = server.clone();
            std::thread::spawn(move || server.start(Some(&relay)).unwrap())
        };

        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while server.mailbox().is_none() {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
        // The lookup the bridge does per datagram answers while attach blocks
        let looked_up = std::time::Instant::now();
        assert!(server.mailbox().is_some());
        assert!(looked_up.elapsed() < Duration::from_millis(100));
        assert!(!starter.is_finished());

        assert_eq!(starter.join().unwrap(), StartOutcome::Started);
        server.shutdown().unwrap();
    }

    #[test]
    fn test_forwarded_interest_falls_back_when_relay_gone() {
        let config = NodeConfig::fast();
        let pool = MailboxPool::new(3);
        let server = AppServerSupervisor::new(pool.clone(), &config);
        server.start(None).unwrap();

        let (relay, relay_inbox) = pool.create("relay", 1).unwrap();
        drop(relay_inbox);

        let content = server
            .mailbox()
            .unwrap()
            .request(
                |reply| Message::ForwardedInterest {
                    name: "/riot/appserver".into(),
                    max_len: 4,
                    reply,
                    relay,
                },
                Deadlines::from_config(&config.messaging),
            )
            .unwrap();
        assert_eq!(content, b"RIOT");

        server.shutdown().unwrap();
    }
}
