//! Inter-thread messaging.
//!
//! - [`Mailbox`] / [`Inbox`]: bounded FIFO pair, one reader per inbox
//! - [`MailboxPool`]: fixed number of mailbox slots
//! - [`Message`]: every kind a worker can receive
//! - [`Reply`]: one-shot slot for request/response kinds

mod mailbox;
mod message;

pub use mailbox::{Deadlines, Delivery, Inbox, Mailbox, MailboxPool};
pub use message::{Message, RadioConfig, RadioFrame, Reply};
