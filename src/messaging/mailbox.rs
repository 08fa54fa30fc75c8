//! Bounded FIFO mailboxes backed by crossbeam channels.
//!
//! Each worker owns exactly one [`Inbox`]; any thread holding a clone of the
//! matching [`Mailbox`] may enqueue into it. Mailboxes are allocated from a
//! [`MailboxPool`] with a fixed number of slots, mirroring the platform's
//! message-queue pool.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError, bounded,
};

use super::message::{Message, Reply};
use crate::config::MessagingConfig;
use crate::error::{Error, Result};

/// Blocking deadlines applied to sends and reply waits.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    /// Longest a sender waits on a full mailbox
    pub send: Duration,
    /// Longest a requester waits for the reply
    pub reply: Duration,
}

impl Deadlines {
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self {
            send: Duration::from_millis(config.send_timeout_ms),
            reply: Duration::from_millis(config.reply_timeout_ms),
        }
    }
}

/// Fixed-size pool of mailbox slots.
#[derive(Debug, Clone)]
pub struct MailboxPool {
    limit: usize,
    in_use: Arc<AtomicUsize>,
}

impl MailboxPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Allocate a mailbox with room for `capacity` queued messages.
    ///
    /// The slot returns to the pool when the [`Inbox`] is dropped.
    pub fn create(&self, name: &str, capacity: usize) -> Result<(Mailbox, Inbox)> {
        if capacity == 0 {
            return Err(Error::InvalidParameter(format!(
                "mailbox {} needs a non-zero capacity",
                name
            )));
        }

        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .map_err(|n| {
                Error::ResourceExhausted(format!(
                    "mailbox pool full ({}/{}) creating {}",
                    n, self.limit, name
                ))
            })?;

        let (tx, rx) = bounded(capacity);
        let name: Arc<str> = Arc::from(name);
        log::debug!("Mailbox {} created (capacity {})", name, capacity);

        Ok((
            Mailbox {
                name: Arc::clone(&name),
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            Inbox {
                name,
                rx,
                _lease: PoolLease {
                    in_use: Arc::clone(&self.in_use),
                },
            },
        ))
    }

    /// Slots currently allocated.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}

struct PoolLease {
    in_use: Arc<AtomicUsize>,
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Outcome of a best-effort [`Mailbox::try_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Mailbox at capacity; message dropped
    Full,
    /// Inbox gone; message dropped
    Closed,
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        self == Delivery::Delivered
    }
}

/// Sending side of a worker's inbox. Cheap to clone.
#[derive(Clone)]
pub struct Mailbox {
    name: Arc<str>,
    tx: Sender<Message>,
    dropped: Arc<AtomicU64>,
}

impl Mailbox {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue, blocking while the mailbox is full for at most `timeout`.
    pub fn send(&self, msg: Message, timeout: Duration) -> Result<()> {
        let kind = msg.kind();
        log::trace!("{} -> {}", kind, self.name);
        self.tx.send_timeout(msg, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(_) => Error::Timeout(format!(
                "{} full, {} not accepted within {:?}",
                self.name, kind, timeout
            )),
            SendTimeoutError::Disconnected(_) => {
                Error::Disconnected(format!("{} closed, {} not delivered", self.name, kind))
            }
        })
    }

    /// Best-effort enqueue. A full or closed mailbox drops the message and
    /// bumps the drop counter; the caller never blocks.
    pub fn try_send(&self, msg: Message) -> Delivery {
        match self.offer(msg) {
            Ok(()) => Delivery::Delivered,
            Err((outcome, msg)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("{} dropped {} ({:?})", self.name, msg.kind(), outcome);
                outcome
            }
        }
    }

    /// Non-blocking enqueue that hands the message back when it cannot be
    /// queued, so request kinds can still answer their reply slot.
    pub fn offer(&self, msg: Message) -> std::result::Result<(), (Delivery, Message)> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(msg) => (Delivery::Full, msg),
            TrySendError::Disconnected(msg) => (Delivery::Closed, msg),
        })
    }

    /// Send a request and block until the receiver fills the reply slot.
    ///
    /// `build` embeds the slot into the request message.
    pub fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Message,
        deadlines: Deadlines,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = bounded(1);
        let msg = build(Reply::new(reply_tx));
        let kind = msg.kind();

        self.send(msg, deadlines.send)?;

        reply_rx.recv_timeout(deadlines.reply).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::Timeout(format!(
                "no reply to {} from {} within {:?}",
                kind, self.name, deadlines.reply
            )),
            RecvTimeoutError::Disconnected => {
                Error::Disconnected(format!("{} dropped {} without replying", self.name, kind))
            }
        })
    }

    /// Messages discarded by [`Mailbox::try_send`] so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether both handles feed the same inbox.
    pub fn same_as(&self, other: &Mailbox) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("queued", &self.tx.len())
            .finish()
    }
}

/// Receiving side of a worker's mailbox. Not cloneable: one reader only.
pub struct Inbox {
    name: Arc<str>,
    rx: Receiver<Message>,
    _lease: PoolLease,
}

impl Inbox {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until a message arrives. `None` once every [`Mailbox`] is gone.
    pub fn recv(&self) -> Option<Message> {
        self.rx.recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Message, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> std::result::Result<Message, TryRecvError> {
        self.rx.try_recv()
    }

    /// Messages waiting to be received.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl fmt::Debug for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbox")
            .field("name", &self.name)
            .field("queued", &self.rx.len())
            .finish()
    }
}
