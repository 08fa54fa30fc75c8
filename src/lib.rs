//! BnB node - control plane for a CCN relay / UDP bridge / radio node
//!
//! Every long-lived component is a thread with one bounded inbox:
//!
//! ```text
//!   shell ──► Dispatcher ──► RelaySupervisor ──► relay thread ◄──┐
//!                │                                   │            │
//!                │                     ForwardedInterest   ContentReady
//!                │                                   ▼            │
//!                ├──► Transceiver ◄── frames    appserver thread ─┘
//!                │    (owner thread)                  ▲
//!                └──► UdpBridge ── InboundPayload ────┘ (best effort)
//!
//!   ContentClient ──► RequestTracker ◄── Indicator thread (LEDs)
//! ```
//!
//! - [`messaging`]: mailboxes, pool, request/reply
//! - [`transceiver`]: radio owner and its confirmed configuration protocol
//! - [`relay`], [`appserver`]: supervisors with idempotent start
//! - [`bridge`]: UDP receive loop and outbound send
//! - [`indicator`]: request state machine and LED blinker
//! - [`shell`]: command parsing and dispatch
//! - [`node`]: owns all of the above; boot and shutdown

pub mod appserver;
pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod indicator;
pub mod messaging;
pub mod node;
pub mod relay;
pub mod shell;
pub mod transceiver;
pub mod worker;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::Node;
