//! Worker thread handles shared by the supervisors.
//!
//! A [`WorkerHandle`] is the "thread handle" of a running worker: its name,
//! the mailbox feeding it, and the join handle. The owning supervisor is the
//! only party that creates or clears it.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, bounded};

use crate::error::{Error, Result};
use crate::messaging::{Deadlines, Inbox, Mailbox, Message, Reply};

/// How often a pending halt checks whether the thread already exited.
const HALT_POLL: Duration = Duration::from_millis(10);

/// Result of an idempotent start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new worker thread was spawned
    Started,
    /// The worker was already running; nothing changed
    AlreadyRunning,
}

/// Handle to a running worker thread.
pub struct WorkerHandle {
    name: &'static str,
    mailbox: Mailbox,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn `body` on a named thread, handing it the worker's inbox.
    ///
    /// Thread creation failure maps to `ResourceExhausted`; the inbox (and its
    /// pool slot) is released with the failed closure.
    pub fn spawn<F>(name: &'static str, mailbox: Mailbox, inbox: Inbox, body: F) -> Result<Self>
    where
        F: FnOnce(Inbox) + Send + 'static,
    {
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(inbox))
            .map_err(|e| Error::ResourceExhausted(format!("failed to spawn {}: {}", name, e)))?;

        Ok(Self {
            name,
            mailbox,
            join,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Whether the thread has left its loop (halted or panicked).
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Acknowledged shutdown: send `Halt`, wait for the ack, then join.
    ///
    /// A thread that exits while the ack is pending counts as halted. On
    /// failure the handle is returned so the caller can keep treating the
    /// worker as running.
    pub fn halt(self, deadlines: Deadlines) -> std::result::Result<(), (Self, Error)> {
        if self.join.is_finished() {
            log::warn!("{} thread already exited", self.name);
            self.join_quietly();
            return Ok(());
        }

        let (ack_tx, ack_rx) = bounded(1);
        let halt = Message::Halt {
            ack: Reply::new(ack_tx),
        };
        match self.mailbox.send(halt, deadlines.send) {
            Ok(()) => {}
            Err(Error::Disconnected(reason)) => {
                log::warn!("{} inbox closed before halt: {}", self.name, reason);
                self.join_quietly();
                return Ok(());
            }
            Err(e) => return Err((self, e)),
        }

        // The queued Halt keeps its ack sender alive after the thread is gone,
        // so watch the thread as well as the ack.
        let deadline = Instant::now() + deadlines.reply;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match ack_rx.recv_timeout(remaining.min(HALT_POLL)) {
                Ok(()) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("{} dropped halt without acknowledging", self.name);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.join.is_finished() {
                        log::warn!("{} exited without acknowledging halt", self.name);
                        break;
                    }
                    if remaining.is_zero() {
                        let err = Error::Timeout(format!(
                            "{} did not acknowledge halt within {:?}",
                            self.name, deadlines.reply
                        ));
                        return Err((self, err));
                    }
                }
            }
        }
        self.join_quietly();
        Ok(())
    }

    fn join_quietly(self) {
        if self.join.join().is_err() {
            log::error!("{} thread panicked", self.name);
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("finished", &self.join.is_finished())
            .finish()
    }
}
