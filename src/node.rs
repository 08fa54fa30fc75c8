//! The node: every component, owned in one place and handed to the shell.

use std::io::Write;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::appserver::AppServerSupervisor;
use crate::bridge::{PayloadTarget, UdpBridge};
use crate::client::ContentClient;
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::indicator::{Indicator, IndicatorHandle, RequestTracker, SharedLeds};
use crate::messaging::{MailboxPool, RadioConfig};
use crate::relay::{RelayStart, RelaySupervisor};
use crate::shell::{Command, Dispatcher, Role};
use crate::transceiver::{Radio, Transceiver};
use crate::worker::StartOutcome;

/// Network identity set through `set` and `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkState {
    pub id: u16,
    pub role: Option<Role>,
}

/// What `dodag` prints.
#[derive(Debug, Clone)]
pub struct DodagInfo {
    pub network: NetworkState,
    pub radio: RadioConfig,
    pub neighbors: Vec<(u16, IpAddr)>,
}

pub struct Node {
    config: NodeConfig,
    pool: MailboxPool,
    transceiver: Transceiver,
    relay: Arc<RelaySupervisor>,
    appserver: Arc<AppServerSupervisor>,
    bridge: UdpBridge,
    client: ContentClient,
    tracker: RequestTracker,
    leds: SharedLeds,
    indicator: Mutex<Option<IndicatorHandle>>,
    network: Mutex<NetworkState>,
}

impl Node {
    /// Build the node with only the transceiver owner running.
    pub fn new(config: NodeConfig, radio: Box<dyn Radio>) -> Result<Self> {
        config.validate()?;
        let pool = MailboxPool::new(config.messaging.pool_size);
        let transceiver = Transceiver::spawn(radio, &pool, &config)?;
        let relay = Arc::new(RelaySupervisor::new(
            pool.clone(),
            transceiver.clone(),
            &config,
        ));
        let appserver = Arc::new(AppServerSupervisor::new(pool.clone(), &config));
        let bridge = UdpBridge::new(&config, appserver.clone() as Arc<dyn PayloadTarget>)?;
        let tracker = RequestTracker::new();
        let client = ContentClient::new(relay.clone(), tracker.clone(), &config.relay);
        let network = NetworkState {
            id: config.node.id,
            role: None,
        };

        Ok(Self {
            config,
            pool,
            transceiver,
            relay,
            appserver,
            bridge,
            client,
            tracker,
            leds: SharedLeds::new(),
            indicator: Mutex::new(None),
            network: Mutex::new(network),
        })
    }

    /// Build the node and run the boot sequence selected by `[startup]`,
    /// writing the boot log to `out`.
    ///
    /// Individual step failures are reported and skipped; only building the
    /// node itself can fail.
    pub fn boot(config: NodeConfig, radio: Box<dyn Radio>, out: &mut dyn Write) -> Result<Self> {
        let node = Self::new(config, radio)?;
        let startup = node.config.startup.clone();
        writeln!(out, "{}", node.config.node.name)?;

        let shell = Dispatcher::new(&node);
        if let Some(address) = startup.address {
            shell.set_radio_address(address, out)?;
        }
        for &peer in &startup.ignore {
            shell.execute(Command::Ignore(peer), out)?;
        }
        if startup.relay {
            shell.execute(Command::StartCcn, out)?;
        }
        for (id, _) in node.bridge.fill_neighbors(startup.neighbors) {
            writeln!(out, "Adding {} as neighbor", id)?;
        }
        if startup.appserver {
            shell.execute(Command::AppServer, out)?;
        }
        if startup.udp_server {
            shell.execute(Command::Server, out)?;
        }
        if startup.indicator {
            if let Err(e) = node.start_indicator() {
                log::error!("Indicator not started: {}", e);
            }
        }

        log::info!("Node {} booted", node.config.node.id);
        Ok(node)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn pool(&self) -> &MailboxPool {
        &self.pool
    }

    pub fn transceiver(&self) -> &Transceiver {
        &self.transceiver
    }

    pub fn relay(&self) -> &RelaySupervisor {
        &self.relay
    }

    pub fn appserver(&self) -> &AppServerSupervisor {
        &self.appserver
    }

    pub fn bridge(&self) -> &UdpBridge {
        &self.bridge
    }

    pub fn client(&self) -> &ContentClient {
        &self.client
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn network(&self) -> NetworkState {
        self.network.lock().clone()
    }

    /// Start the relay; a restarted relay gets the running application
    /// server attached again.
    pub fn start_relay(&self) -> Result<RelayStart> {
        let started = self.relay.start()?;
        if started.outcome() == StartOutcome::Started && self.appserver.is_running() {
            self.appserver.attach(&self.relay.mailbox()?);
        }
        Ok(started)
    }

    /// Start the application server, attached to the relay if it runs.
    pub fn start_appserver(&self) -> Result<StartOutcome> {
        let relay = self.relay.mailbox().ok();
        self.appserver.start(relay.as_ref())
    }

    pub fn start_indicator(&self) -> Result<StartOutcome> {
        let mut slot = self.indicator.lock();
        if slot.as_ref().is_some_and(|h| h.is_running()) {
            return Ok(StartOutcome::AlreadyRunning);
        }
        let indicator = Indicator::new(
            self.tracker.clone(),
            self.leds.clone(),
            &self.config.indicator,
        );
        *slot = Some(indicator.spawn()?);
        log::info!("Indicator started");
        Ok(StartOutcome::Started)
    }

    pub fn indicator_running(&self) -> bool {
        self.indicator.lock().as_ref().is_some_and(|h| h.is_running())
    }

    /// Use `id` as the radio address and record it once the radio took it.
    pub fn set_id(&self, id: u16) -> Result<u16> {
        let address = self.transceiver.set_address(id)?;
        self.network.lock().id = address;
        Ok(address)
    }

    /// Apply id and default channel to the radio, then record the role.
    pub fn init_network(&self, role: Role) -> Result<RadioConfig> {
        let id = self.network.lock().id;
        self.transceiver.set_address(id)?;
        self.transceiver
            .set_channel(self.config.transceiver.default_channel)?;
        self.network.lock().role = Some(role);
        self.transceiver.query()
    }

    pub fn dodag(&self) -> Result<DodagInfo> {
        Ok(DodagInfo {
            network: self.network(),
            radio: self.transceiver.query()?,
            neighbors: self.bridge.neighbors().iter().collect(),
        })
    }

    /// Stop every worker, last started first. Returns the first failure
    /// after attempting all of them.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.indicator.lock().take() {
            handle.stop();
        }

        let mut first: Option<Error> = None;
        let mut record = |name: &str, result: Result<()>| {
            if let Err(e) = result {
                log::error!("Stopping {} failed: {}", name, e);
                first.get_or_insert(e);
            }
        };
        record("UDP bridge", self.bridge.shutdown());
        record("application server", self.appserver.shutdown());
        record("relay", self.relay.shutdown());
        record("transceiver", self.transceiver.shutdown());

        match first {
            Some(e) => Err(e),
            None => {
                log::info!("Node stopped");
                Ok(())
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
