//! Message kinds exchanged between worker threads.
//!
//! Request kinds carry a [`Reply`] slot; the thread that owns the resource
//! answers through it exactly once. One-way kinds carry no slot.

use std::fmt;

use crossbeam_channel::Sender;

use super::Mailbox;

/// One-shot reply slot embedded in a request message.
///
/// Consumed by [`Reply::send`], so a receiver cannot answer twice. Dropping
/// the slot unanswered surfaces as `Disconnected` at the requester.
pub struct Reply<T> {
    tx: Sender<T>,
}

impl<T> Reply<T> {
    pub(crate) fn new(tx: Sender<T>) -> Self {
        Self { tx }
    }

    /// Deliver the answer. Returns `false` if the requester already gave up.
    pub fn send(self, value: T) -> bool {
        if self.tx.send(value).is_err() {
            log::debug!("Reply dropped: requester no longer waiting");
            return false;
        }
        true
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reply(..)")
    }
}

/// Effective radio settings as reported by the transceiver owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioConfig {
    pub channel: i32,
    pub address: u16,
}

/// A frame received by the radio, tagged with the sender's short address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioFrame {
    pub source: u16,
    pub payload: Vec<u8>,
}

/// Inter-thread message.
#[derive(Debug)]
pub enum Message {
    /// Stop the receiving worker; acknowledged once it has left its loop.
    Halt { ack: Reply<()> },

    /// Resize the relay's content store.
    ConfigureCache(usize),

    /// Load the relay's demo content.
    Populate,

    /// Log forwarding statistics.
    PrintStatistics,

    /// Datagram payload forwarded by the UDP bridge.
    InboundPayload(Vec<u8>),

    /// Set the radio channel; the reply is the effective channel or `-1`.
    SetChannel { channel: i32, reply: Reply<i32> },

    /// Set the radio short address; the reply is the effective address.
    SetAddress { address: u16, reply: Reply<u16> },

    /// Discard radio frames from this short address.
    IgnorePeer(u16),

    /// Read back the effective radio settings.
    QueryRadio { reply: Reply<RadioConfig> },

    /// Deliver received radio frames to this mailbox.
    RegisterListener(Mailbox),

    /// Radio frame delivered to a registered listener.
    RadioFrame(RadioFrame),

    /// Request named content; the reply is empty when nothing matched.
    Interest {
        name: String,
        max_len: usize,
        reply: Reply<Vec<u8>>,
    },

    /// Register a name prefix to a face; the reply is the engine's status text.
    RegisterPrefix {
        prefix: String,
        kind: String,
        face: String,
        reply: Reply<String>,
    },

    /// Interest the relay could not satisfy, handed to the application server.
    /// The generated content goes back to `relay` as `ContentReady`.
    ForwardedInterest {
        name: String,
        max_len: usize,
        reply: Reply<Vec<u8>>,
        relay: Mailbox,
    },

    /// Tell the relay where to forward interests under `prefix`.
    AttachAppServer { mailbox: Mailbox, prefix: String },

    /// Content generated by the application server for a forwarded interest.
    ContentReady {
        name: String,
        content: Vec<u8>,
        max_len: usize,
        reply: Reply<Vec<u8>>,
    },
}

impl Message {
    /// Short name of the message kind, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Halt { .. } => "Halt",
            Message::ConfigureCache(_) => "ConfigureCache",
            Message::Populate => "Populate",
            Message::PrintStatistics => "PrintStatistics",
            Message::InboundPayload(_) => "InboundPayload",
            Message::SetChannel { .. } => "SetChannel",
            Message::SetAddress { .. } => "SetAddress",
            Message::IgnorePeer(_) => "IgnorePeer",
            Message::QueryRadio { .. } => "QueryRadio",
            Message::RegisterListener(_) => "RegisterListener",
            Message::RadioFrame(_) => "RadioFrame",
            Message::Interest { .. } => "Interest",
            Message::RegisterPrefix { .. } => "RegisterPrefix",
            Message::ForwardedInterest { .. } => "ForwardedInterest",
            Message::AttachAppServer { .. } => "AttachAppServer",
            Message::ContentReady { .. } => "ContentReady",
        }
    }
}
