//! Transceiver owner thread and its synchronous configuration protocol.
//!
//! The radio is owned by exactly one thread. Everyone else holds a
//! [`Transceiver`] handle and changes settings through request/reply
//! messages; the call returns only after the owner has applied or rejected
//! the value, so a read-back right after `set_address(3)` observes 3 or the
//! call itself reported a failure.
//!
//! Requests for the same property must not race: the shell issues commands
//! one at a time, which is sufficient.

mod radio;

pub use radio::{BROADCAST_ADDRESS, CHANNEL_ERROR, FrameInjector, Radio, SimulatedRadio};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::messaging::{
    Deadlines, Delivery, Inbox, Mailbox, MailboxPool, Message, RadioConfig, RadioFrame,
};
use crate::worker::WorkerHandle;

/// Client handle to the transceiver owner thread.
#[derive(Clone)]
pub struct Transceiver {
    mailbox: Mailbox,
    deadlines: Deadlines,
    worker: Arc<Mutex<Option<WorkerHandle>>>,
}

impl Transceiver {
    /// Start the owner thread for `radio`.
    pub fn spawn(radio: Box<dyn Radio>, pool: &MailboxPool, config: &NodeConfig) -> Result<Self> {
        let (mailbox, inbox) =
            pool.create("transceiver", config.messaging.transceiver_capacity)?;
        let poll_interval = Duration::from_millis(config.transceiver.poll_interval_ms.max(1));

        let worker = WorkerHandle::spawn("transceiver", mailbox.clone(), inbox, move |inbox| {
            TransceiverThread::new(radio, inbox, poll_interval).run();
        })?;
        log::info!("Transceiver owner thread started");

        Ok(Self {
            mailbox,
            deadlines: Deadlines::from_config(&config.messaging),
            worker: Arc::new(Mutex::new(Some(worker))),
        })
    }

    /// Set the radio channel. A `-1` answer from the owner is a
    /// `TransceiverFailure`; the caller logs it and does not retry.
    pub fn set_channel(&self, channel: i32) -> Result<i32> {
        let effective = self
            .mailbox
            .request(|reply| Message::SetChannel { channel, reply }, self.deadlines)?;
        if effective == CHANNEL_ERROR {
            return Err(Error::TransceiverFailure(format!(
                "channel {} rejected",
                channel
            )));
        }
        Ok(effective)
    }

    /// Set the radio short address. An unchanged address in the answer is a
    /// `TransceiverFailure`.
    pub fn set_address(&self, address: u16) -> Result<u16> {
        let effective = self
            .mailbox
            .request(|reply| Message::SetAddress { address, reply }, self.deadlines)?;
        if effective != address {
            return Err(Error::TransceiverFailure(format!(
                "address {} rejected, still {}",
                address, effective
            )));
        }
        Ok(effective)
    }

    /// Read back the effective channel and address.
    pub fn query(&self) -> Result<RadioConfig> {
        self.mailbox
            .request(|reply| Message::QueryRadio { reply }, self.deadlines)
    }

    /// Discard frames from `address` from now on (one-way).
    pub fn ignore(&self, address: u16) -> Result<()> {
        self.mailbox
            .send(Message::IgnorePeer(address), self.deadlines.send)
    }

    /// Deliver received frames to `listener` (one-way).
    pub fn register(&self, listener: Mailbox) -> Result<()> {
        self.mailbox
            .send(Message::RegisterListener(listener), self.deadlines.send)
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.is_finished())
    }

    /// Halt the owner thread; later requests fail with `Disconnected`.
    pub fn shutdown(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        let Some(worker) = slot.take() else {
            return Ok(());
        };
        match worker.halt(self.deadlines) {
            Ok(()) => {
                log::info!("Transceiver owner thread stopped");
                Ok(())
            }
            Err((worker, e)) => {
                *slot = Some(worker);
                Err(e)
            }
        }
    }
}

/// Owner thread state: the radio plus listener and ignore tables.
struct TransceiverThread {
    radio: Box<dyn Radio>,
    inbox: Inbox,
    listeners: Vec<Mailbox>,
    ignored: HashSet<u16>,
    poll_interval: Duration,
}

impl TransceiverThread {
    fn new(radio: Box<dyn Radio>, inbox: Inbox, poll_interval: Duration) -> Self {
        Self {
            radio,
            inbox,
            listeners: Vec::new(),
            ignored: HashSet::new(),
            poll_interval,
        }
    }

    fn run(mut self) {
        log::debug!(
            "Transceiver: channel {}, address {}",
            self.radio.channel(),
            self.radio.address()
        );

        loop {
            match self.inbox.recv_timeout(self.poll_interval) {
                Ok(Message::Halt { ack }) => {
                    ack.send(());
                    break;
                }
                Ok(msg) => self.handle(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("Transceiver: all handles dropped, exiting");
                    break;
                }
            }
            self.drain_frames();
        }
    }

    fn handle(&mut self, msg: Message) {
        match msg {
            Message::SetChannel { channel, reply } => {
                let effective = self.radio.set_channel(channel);
                log::debug!("Transceiver: SET_CHANNEL {} -> {}", channel, effective);
                reply.send(effective);
            }
            Message::SetAddress { address, reply } => {
                let effective = self.radio.set_address(address);
                log::debug!("Transceiver: SET_ADDRESS {} -> {}", address, effective);
                reply.send(effective);
            }
            Message::QueryRadio { reply } => {
                reply.send(RadioConfig {
                    channel: self.radio.channel(),
                    address: self.radio.address(),
                });
            }
            Message::IgnorePeer(address) => {
                log::info!("Transceiver: ignoring frames from {}", address);
                self.ignored.insert(address);
            }
            Message::RegisterListener(listener) => {
                if self.listeners.iter().any(|l| l.same_as(&listener)) {
                    log::debug!("Transceiver: {} already registered", listener.name());
                } else {
                    log::info!("Transceiver: registered {} for frames", listener.name());
                    self.listeners.push(listener);
                }
            }
            other => {
                log::warn!("Transceiver: unexpected {} message", other.kind());
            }
        }
    }

    fn drain_frames(&mut self) {
        while let Some(frame) = self.radio.poll_frame() {
            if self.ignored.contains(&frame.source) {
                log::trace!("Transceiver: dropped frame from ignored {}", frame.source);
                continue;
            }
            self.deliver(frame);
        }
    }

    fn deliver(&mut self, frame: RadioFrame) {
        self.listeners.retain(|listener| {
            match listener.try_send(Message::RadioFrame(frame.clone())) {
                Delivery::Delivered => true,
                Delivery::Full => {
                    log::debug!("Transceiver: {} full, frame dropped", listener.name());
                    true
                }
                Delivery::Closed => {
                    log::debug!("Transceiver: {} gone, unregistering", listener.name());
                    false
                }
            }
        });
    }
}
