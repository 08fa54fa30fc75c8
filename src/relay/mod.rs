//! Forwarding relay: supervisor and worker thread.
//!
//! The supervisor is the only owner of the relay's [`WorkerHandle`]. Control
//! commands are one-way messages with backpressure; `stop` is an
//! acknowledged halt, so a `start` issued right after `stop` returns can
//! never find a half-dead relay.

mod engine;

pub use engine::{ContentStore, EngineStats, ForwardingEngine, PREFIX_REGISTERED};

use parking_lot::Mutex;

use crate::config::{NodeConfig, RelayConfig};
use crate::error::{Error, Result};
use crate::messaging::{Deadlines, Delivery, Inbox, Mailbox, MailboxPool, Message, Reply};
use crate::transceiver::Transceiver;
use crate::worker::{StartOutcome, WorkerHandle};

use engine::name_matches;

/// Builds the engine for each relay start.
pub type EngineFactory = Box<dyn Fn(&RelayConfig) -> Box<dyn ForwardingEngine> + Send + Sync>;

/// Result of [`RelaySupervisor::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStart {
    /// Relay spawned. `channel` is the confirmed radio channel, `None` when
    /// the transceiver rejected it.
    Started { channel: Option<i32> },
    AlreadyRunning,
}

impl RelayStart {
    pub fn outcome(self) -> StartOutcome {
        match self {
            RelayStart::Started { .. } => StartOutcome::Started,
            RelayStart::AlreadyRunning => StartOutcome::AlreadyRunning,
        }
    }
}

/// Owns the relay thread's lifecycle.
pub struct RelaySupervisor {
    pool: MailboxPool,
    transceiver: Transceiver,
    config: RelayConfig,
    capacity: usize,
    default_channel: i32,
    deadlines: Deadlines,
    engine: EngineFactory,
    worker: Mutex<Option<WorkerHandle>>,
}

impl RelaySupervisor {
    /// Supervisor for a relay backed by [`ContentStore`].
    pub fn new(pool: MailboxPool, transceiver: Transceiver, config: &NodeConfig) -> Self {
        Self::with_engine(
            pool,
            transceiver,
            config,
            Box::new(|relay: &RelayConfig| {
                Box::new(ContentStore::new(
                    relay.cache_entries,
                    relay.default_interest.clone(),
                )) as Box<dyn ForwardingEngine>
            }),
        )
    }

    pub fn with_engine(
        pool: MailboxPool,
        transceiver: Transceiver,
        config: &NodeConfig,
        engine: EngineFactory,
    ) -> Self {
        Self {
            pool,
            transceiver,
            config: config.relay.clone(),
            capacity: config.messaging.relay_capacity,
            default_channel: config.transceiver.default_channel,
            deadlines: Deadlines::from_config(&config.messaging),
            engine,
            worker: Mutex::new(None),
        }
    }

    /// Start the relay unless it is already running.
    ///
    /// A fresh relay registers for radio frames and tunes the radio to the
    /// default channel; a tuning failure is reported, not fatal.
    pub fn start(&self) -> Result<RelayStart> {
        let mut slot = self.worker.lock();

        if let Some(worker) = slot.as_ref() {
            if !worker.is_finished() {
                log::info!("Relay already running, stop it first");
                return Ok(RelayStart::AlreadyRunning);
            }
        }
        if let Some(stale) = slot.take() {
            log::warn!("Relay thread exited on its own, restarting");
            if let Err((_, e)) = stale.halt(self.deadlines) {
                log::warn!("Relay cleanup failed: {}", e);
            }
        }

        let (mailbox, inbox) = self.pool.create("relay", self.capacity)?;
        let engine = (self.engine)(&self.config);
        let own = mailbox.clone();
        let worker = WorkerHandle::spawn("relay", mailbox.clone(), inbox, move |inbox| {
            RelayThread::new(inbox, own, engine).run();
        })?;
        *slot = Some(worker);
        log::info!("Relay started");

        if let Err(e) = self.transceiver.register(mailbox) {
            log::warn!("Relay: transceiver register failed: {}", e);
        }
        let channel = match self.transceiver.set_channel(self.default_channel) {
            Ok(channel) => {
                log::info!("Relay: radio on channel {}", channel);
                Some(channel)
            }
            Err(e) => {
                log::warn!("Relay: setting channel {} failed: {}", self.default_channel, e);
                None
            }
        };

        Ok(RelayStart::Started { channel })
    }

    /// Halt the relay and wait for it to exit.
    ///
    /// If the relay does not acknowledge in time it is still considered
    /// running and the error is returned.
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        let Some(worker) = slot.take() else {
            return Err(Error::NotRunning("relay"));
        };

        match worker.halt(self.deadlines) {
            Ok(()) => {
                log::info!("Relay stopped");
                Ok(())
            }
            Err((worker, e)) => {
                log::warn!("Relay did not acknowledge halt: {}", e);
                *slot = Some(worker);
                Err(e)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    /// Mailbox of the running relay.
    pub fn mailbox(&self) -> Result<Mailbox> {
        match self.worker.lock().as_ref() {
            Some(worker) if !worker.is_finished() => Ok(worker.mailbox().clone()),
            _ => Err(Error::NotRunning("relay")),
        }
    }

    pub fn deadlines(&self) -> Deadlines {
        self.deadlines
    }

    pub fn configure_cache(&self, entries: usize) -> Result<()> {
        self.post(Message::ConfigureCache(entries))
    }

    pub fn populate(&self) -> Result<()> {
        self.post(Message::Populate)
    }

    pub fn print_statistics(&self) -> Result<()> {
        self.post(Message::PrintStatistics)
    }

    /// One-way control message; blocks while the relay's mailbox is full.
    fn post(&self, msg: Message) -> Result<()> {
        let mailbox = self.mailbox().inspect_err(|_| {
            log::warn!("Relay not running, {} skipped", msg.kind());
        })?;
        mailbox.send(msg, self.deadlines.send)
    }

    /// Stop the relay if it is running.
    pub fn shutdown(&self) -> Result<()> {
        match self.stop() {
            Err(Error::NotRunning(_)) => Ok(()),
            other => other,
        }
    }
}

/// Where uncached interests under a prefix are forwarded.
struct AppServerRoute {
    mailbox: Mailbox,
    prefix: String,
}

/// Relay worker loop.
struct RelayThread {
    inbox: Inbox,
    own: Mailbox,
    engine: Box<dyn ForwardingEngine>,
    appserver: Option<AppServerRoute>,
}

impl RelayThread {
    fn new(inbox: Inbox, own: Mailbox, engine: Box<dyn ForwardingEngine>) -> Self {
        Self {
            inbox,
            own,
            engine,
            appserver: None,
        }
    }

    fn run(mut self) {
        log::debug!("Relay thread running");

        while let Some(msg) = self.inbox.recv() {
            match msg {
                Message::Halt { ack } => {
                    log::info!("Relay halting: {}", self.engine.statistics());
                    ack.send(());
                    return;
                }
                msg => self.handle(msg),
            }
        }
    }

    fn handle(&mut self, msg: Message) {
        match msg {
            Message::ConfigureCache(entries) => self.engine.configure_cache(entries),
            Message::Populate => self.engine.populate(),
            Message::PrintStatistics => {
                log::info!("Relay statistics: {}", self.engine.statistics());
            }
            Message::Interest {
                name,
                max_len,
                reply,
            } => self.on_interest(name, max_len, reply),
            Message::ContentReady {
                name,
                mut content,
                max_len,
                reply,
            } => {
                if !content.is_empty() {
                    self.engine.store(&name, content.clone());
                }
                content.truncate(max_len);
                reply.send(content);
            }
            Message::RegisterPrefix {
                prefix,
                kind,
                face,
                reply,
            } => {
                let status = self.engine.register_prefix(&prefix, &kind, &face);
                log::debug!("Relay: prefix {} -> {}", prefix, status);
                reply.send(status);
            }
            Message::AttachAppServer { mailbox, prefix } => {
                log::info!("Relay: forwarding {} to {}", prefix, mailbox.name());
                self.appserver = Some(AppServerRoute { mailbox, prefix });
            }
            Message::RadioFrame(frame) => self.engine.on_frame(&frame),
            other => {
                log::warn!("Relay: unexpected {} message", other.kind());
            }
        }
    }

    fn on_interest(&mut self, name: String, max_len: usize, reply: Reply<Vec<u8>>) {
        if let Some(mut content) = self.engine.lookup(&name) {
            log::debug!("Relay: {} answered from cache", name);
            content.truncate(max_len);
            reply.send(content);
            return;
        }

        let target = self
            .appserver
            .as_ref()
            .filter(|route| name_matches(&route.prefix, &name))
            .map(|route| route.mailbox.clone());
        let Some(target) = target else {
            log::debug!("Relay: no content for {}", name);
            reply.send(Vec::new());
            return;
        };

        let forwarded = Message::ForwardedInterest {
            name,
            max_len,
            reply,
            relay: self.own.clone(),
        };
        match target.offer(forwarded) {
            Ok(()) => log::trace!("Relay: interest forwarded to {}", target.name()),
            Err((delivery, msg)) => {
                log::warn!("Relay: {} unavailable ({:?})", target.name(), delivery);
                if delivery == Delivery::Closed {
                    self.appserver = None;
                }
                if let Message::ForwardedInterest { reply, .. } = msg {
                    reply.send(Vec::new());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transceiver::SimulatedRadio;

    fn setup() -> (RelaySupervisor, Transceiver, MailboxPool) {
        let config = NodeConfig::fast();
        let pool = MailboxPool::new(config.messaging.pool_size);
        let (radio, _) = SimulatedRadio::new(&config.transceiver);
        let transceiver = Transceiver::spawn(Box::new(radio), &pool, &config).unwrap();
        let relay = RelaySupervisor::new(pool.clone(), transceiver.clone(), &config);
        (relay, transceiver, pool)
    }

    fn interest(relay: &RelaySupervisor, name: &str) -> Vec<u8> {
        relay
            .mailbox()
            .unwrap()
            .request(
                |reply| Message::Interest {
                    name: name.to_string(),
                    max_len: 3072,
                    reply,
                },
                relay.deadlines(),
            )
            .unwrap()
    }

    #[test]
    fn test_start_twice_yields_one_relay() {
        let (relay, transceiver, pool) = setup();

        assert_eq!(
            relay.start().unwrap(),
            RelayStart::Started { channel: Some(10) }
        );
        let used = pool.in_use();
        assert_eq!(relay.start().unwrap(), RelayStart::AlreadyRunning);
        assert_eq!(pool.in_use(), used);
        assert_eq!(transceiver.query().unwrap().channel, 10);

        relay.stop().unwrap();
        transceiver.shutdown().unwrap();
    }

    #[test]
    fn test_stop_is_acknowledged_and_restartable() {
        let (relay, transceiver, pool) = setup();

        relay.start().unwrap();
        relay.stop().unwrap();
        assert!(!relay.is_running());
        // Relay inbox released once the thread is joined
        assert_eq!(pool.in_use(), 1);

        assert!(matches!(relay.stop(), Err(Error::NotRunning(_))));
        assert!(matches!(relay.start().unwrap(), RelayStart::Started { .. }));
        assert!(relay.is_running());

        relay.shutdown().unwrap();
        transceiver.shutdown().unwrap();
    }

    #[test]
    fn test_control_messages_require_running_relay() {
        let (relay, transceiver, _pool) = setup();

        assert!(matches!(
            relay.configure_cache(5),
            Err(Error::NotRunning("relay"))
        ));
        assert!(matches!(relay.populate(), Err(Error::NotRunning(_))));
        assert!(matches!(relay.print_statistics(), Err(Error::NotRunning(_))));

        transceiver.shutdown().unwrap();
    }

    #[test]
    fn test_populate_then_interest() {
        let (relay, transceiver, _pool) = setup();
        relay.start().unwrap();

        let name = NodeConfig::default().relay.default_interest;
        assert!(interest(&relay, &name).is_empty());

        relay.populate().unwrap();
        relay.print_statistics().unwrap();
        assert!(!interest(&relay, &name).is_empty());

        relay.shutdown().unwrap();
        transceiver.shutdown().unwrap();
    }

    #[test]
    fn test_shrinking_cache_to_zero_empties_it() {
        let (relay, transceiver, _pool) = setup();
        relay.start().unwrap();

        relay.populate().unwrap();
        relay.configure_cache(0).unwrap();
        let name = NodeConfig::default().relay.default_interest;
        assert!(interest(&relay, &name).is_empty());

        relay.shutdown().unwrap();
        transceiver.shutdown().unwrap();
    }

    #[test]
    fn test_forwarded_interest_answered_through_relay() {
        let (relay, transceiver, pool) = setup();
        relay.start().unwrap();

        let (app, app_inbox) = pool.create("app", 4).unwrap();
        relay
            .mailbox()
            .unwrap()
            .send(
                Message::AttachAppServer {
                    mailbox: app,
                    prefix: "/riot/appserver".into(),
                },
                relay.deadlines().send,
            )
            .unwrap();

        let responder = std::thread::spawn(move || match app_inbox.recv() {
            Some(Message::ForwardedInterest {
                name,
                max_len,
                reply,
                relay,
            }) => {
                relay
                    .send(
                        Message::ContentReady {
                            name,
                            content: b"hello".to_vec(),
                            max_len,
                            reply,
                        },
                        std::time::Duration::from_secs(1),
                    )
                    .unwrap();
            }
            other => panic!("unexpected {:?}", other),
        });

        assert_eq!(interest(&relay, "/riot/appserver/temp"), b"hello");
        responder.join().unwrap();
        // Second request is served from the relay's cache
        assert_eq!(interest(&relay, "/riot/appserver/temp"), b"hello");

        relay.shutdown().unwrap();
        transceiver.shutdown().unwrap();
    }
}
