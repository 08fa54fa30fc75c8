//! Radio driver abstraction and the in-tree simulated radio.

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::config::TransceiverConfig;
use crate::messaging::RadioFrame;

/// Sentinel returned by [`Radio::set_channel`] when the channel was rejected.
pub const CHANNEL_ERROR: i32 = -1;

/// Short address reserved for broadcast; never assignable to a node.
pub const BROADCAST_ADDRESS: u16 = 0;

/// Register/command channel to the radio hardware.
///
/// Only the transceiver owner thread calls these.
pub trait Radio: Send {
    /// Apply a channel. Returns the effective channel, or [`CHANNEL_ERROR`].
    fn set_channel(&mut self, channel: i32) -> i32;

    fn channel(&self) -> i32;

    /// Apply a short address. Returns the effective address; a rejected
    /// request leaves the previous one in place.
    fn set_address(&mut self, address: u16) -> u16;

    fn address(&self) -> u16;

    /// Next received frame, if any. Never blocks.
    fn poll_frame(&mut self) -> Option<RadioFrame>;
}

/// Simulated radio with a fixed channel range.
///
/// Frames "received over the air" are fed in through a [`FrameInjector`].
pub struct SimulatedRadio {
    channel: i32,
    address: u16,
    channel_min: i32,
    channel_max: i32,
    frames: Receiver<RadioFrame>,
}

/// Feeds frames into a [`SimulatedRadio`] as if they arrived over the air.
#[derive(Clone)]
pub struct FrameInjector {
    tx: Sender<RadioFrame>,
}

impl FrameInjector {
    pub fn inject(&self, source: u16, payload: &[u8]) {
        let _ = self.tx.send(RadioFrame {
            source,
            payload: payload.to_vec(),
        });
    }
}

impl SimulatedRadio {
    pub fn new(config: &TransceiverConfig) -> (Self, FrameInjector) {
        let (tx, rx) = unbounded();
        let radio = Self {
            channel: config.channel_min,
            address: config.initial_address,
            channel_min: config.channel_min,
            channel_max: config.channel_max,
            frames: rx,
        };
        (radio, FrameInjector { tx })
    }
}

impl Radio for SimulatedRadio {
    fn set_channel(&mut self, channel: i32) -> i32 {
        if !(self.channel_min..=self.channel_max).contains(&channel) {
            log::debug!(
                "Radio: channel {} outside {}..={}",
                channel,
                self.channel_min,
                self.channel_max
            );
            return CHANNEL_ERROR;
        }
        self.channel = channel;
        self.channel
    }

    fn channel(&self) -> i32 {
        self.channel
    }

    fn set_address(&mut self, address: u16) -> u16 {
        if address == BROADCAST_ADDRESS {
            log::debug!("Radio: refusing broadcast address");
        } else {
            self.address = address;
        }
        self.address
    }

    fn address(&self) -> u16 {
        self.address
    }

    fn poll_frame(&mut self) -> Option<RadioFrame> {
        self.frames.try_recv().ok()
    }
}
