//! Operator shell: line parsing and dispatch.

mod command;
mod dispatch;

pub use command::{COMMANDS, Command, ParseError, Role};
pub use dispatch::Dispatcher;
