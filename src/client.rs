//! Synchronous content requests against the relay.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::indicator::RequestTracker;
use crate::messaging::Message;
use crate::relay::RelaySupervisor;

/// Longest name accepted by [`ContentClient::express_interest`] and
/// [`ContentClient::publish`].
pub const MAX_NAME_LEN: usize = 100;

/// Issues interests and prefix registrations on behalf of the shell.
///
/// Every interest moves the shared [`RequestTracker`]; nothing else writes
/// Idle→Waiting or Waiting→Ready.
pub struct ContentClient {
    relay: Arc<RelaySupervisor>,
    tracker: RequestTracker,
    max_content_len: usize,
    delay: Duration,
}

impl ContentClient {
    pub fn new(relay: Arc<RelaySupervisor>, tracker: RequestTracker, config: &RelayConfig) -> Self {
        Self {
            relay,
            tracker,
            max_content_len: config.max_content_len,
            delay: Duration::from_millis(config.interest_delay_ms),
        }
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Request `name` and wait for the content.
    ///
    /// Zero bytes is `EmptyResult`; the state is back at Idle in every
    /// failure case.
    pub fn express_interest(&self, name: &str) -> Result<Vec<u8>> {
        check_name(name)?;
        log::debug!("in='{}'", name);

        self.tracker.begin();
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let content = self
            .relay
            .mailbox()
            .and_then(|relay| {
                relay.request(
                    |reply| Message::Interest {
                        name: name.to_string(),
                        max_len: self.max_content_len,
                        reply,
                    },
                    self.relay.deadlines(),
                )
            })
            .inspect_err(|_| self.tracker.abort())?;

        self.tracker.complete(content.len());
        if content.is_empty() {
            return Err(Error::EmptyResult(name.to_string()));
        }
        Ok(content)
    }

    /// Register `prefix` to `face`; returns the relay's status text.
    pub fn publish(&self, prefix: &str, kind: &str, face: &str) -> Result<String> {
        check_name(prefix)?;
        let relay = self.relay.mailbox()?;
        let status = relay.request(
            |reply| Message::RegisterPrefix {
                prefix: prefix.to_string(),
                kind: kind.to_string(),
                face: face.to_string(),
                reply,
            },
            self.relay.deadlines(),
        )?;
        log::debug!("shell received: '{}'", status);
        Ok(status)
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidParameter(format!(
            "name longer than {} bytes",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::indicator::RequestState;
    use crate::messaging::MailboxPool;
    use crate::transceiver::{SimulatedRadio, Transceiver};

    struct Fixture {
        client: ContentClient,
        relay: Arc<RelaySupervisor>,
        transceiver: Transceiver,
    }

    fn fixture() -> Fixture {
        let config = NodeConfig::fast();
        let pool = MailboxPool::new(4);
        let (radio, _) = SimulatedRadio::new(&config.transceiver);
        let transceiver = Transceiver::spawn(Box::new(radio), &pool, &config).unwrap();
        let relay = Arc::new(RelaySupervisor::new(pool, transceiver.clone(), &config));
        let client = ContentClient::new(relay.clone(), RequestTracker::new(), &config.relay);
        Fixture {
            client,
            relay,
            transceiver,
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = self.relay.shutdown();
            let _ = self.transceiver.shutdown();
        }
    }

    #[test]
    fn test_interest_without_relay_stays_idle() {
        let f = fixture();
        let err = f.client.express_interest("/x/y").unwrap_err();
        assert!(matches!(err, Error::NotRunning(_)));
        assert_eq!(f.client.tracker().state(), RequestState::Idle);
    }

    #[test]
    fn test_empty_content_returns_to_idle() {
        let f = fixture();
        f.relay.start().unwrap();

        let err = f.client.express_interest("/x/y").unwrap_err();
        assert!(matches!(err, Error::EmptyResult(_)));
        assert_eq!(f.client.tracker().state(), RequestState::Idle);
    }

    #[test]
    fn test_content_moves_to_ready() {
        let f = fixture();
        f.relay.start().unwrap();
        f.relay.populate().unwrap();

        let name = NodeConfig::default().relay.default_interest;
        let content = f.client.express_interest(&name).unwrap();
        assert!(!content.is_empty());
        assert_eq!(f.client.tracker().state(), RequestState::Ready);
    }

    #[test]
    fn test_long_name_rejected_without_state_change() {
        let f = fixture();
        let name = format!("/{}", "a".repeat(MAX_NAME_LEN));
        assert!(matches!(
            f.client.express_interest(&name),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(f.client.tracker().state(), RequestState::Idle);
    }

    #[test]
    fn test_publish() {
        let f = fixture();
        assert!(matches!(
            f.client.publish("/a/b/c", "1", "0"),
            Err(Error::NotRunning(_))
        ));

        f.relay.start().unwrap();
        assert_eq!(
            f.client.publish("/a/b/c", "1", "0").unwrap(),
            crate::relay::PREFIX_REGISTERED
        );
    }
}
