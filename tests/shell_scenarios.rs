//! Shell Scenario Tests
//!
//! Drives a booted node through the dispatcher exactly as an operator would
//! and checks the printed outcome lines.
//!
//! | Scenario | Expected output |
//! |----------|-----------------|
//! | prefix, relay down | `ccnl stack not running` |
//! | prefix, relay up | `done` |
//! | interest, no content | `riot_get returned 0 bytes...aborting!` |
//! | interest, populated | banner with `data='...'` |
//! | unknown command | `shell: command not found: <name>` |
//!
//! Run with: `cargo test --test shell_scenarios`

use std::time::{Duration, Instant};

use bnb_node::bridge::send_datagram;
use bnb_node::indicator::RequestState;
use bnb_node::shell::Dispatcher;
use bnb_node::transceiver::SimulatedRadio;
use bnb_node::{Node, NodeConfig};

// ============================================================================
// Helpers
// ============================================================================

fn test_config() -> NodeConfig {
    let mut config = NodeConfig::fast();
    // The state machine is asserted directly; keep the blinker out of it
    config.startup.indicator = false;
    config
}

fn boot(config: NodeConfig) -> (Node, String) {
    let (radio, _) = SimulatedRadio::new(&config.transceiver);
    let mut out = Vec::new();
    let node = Node::boot(config, Box::new(radio), &mut out).unwrap();
    (node, String::from_utf8(out).unwrap())
}

fn run(node: &Node, line: &str) -> String {
    let mut out = Vec::new();
    Dispatcher::new(node).run_line(line, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ============================================================================
// Boot
// ============================================================================

#[test]
fn test_boot_log_matches_router_sequence() {
    let (node, log) = boot(test_config());
    let lines: Vec<&str> = log.lines().collect();

    assert_eq!(lines[0], "IETF90 - BnB - CCN-RPL router");
    assert_eq!(lines[1], "[transceiver] Got channel: 10");
    for id in 0..5 {
        assert_eq!(lines[2 + id], format!("Adding {} as neighbor", id));
    }
    assert_eq!(lines[7], "ccn-lite appserver started");
    assert!(lines[8].starts_with("UDP SERVER ON PORT "));

    assert!(node.relay().is_running());
    assert!(node.appserver().is_running());
    assert!(node.bridge().is_running());
    node.shutdown().unwrap();
}

// ============================================================================
// Relay control
// ============================================================================

#[test]
fn test_prefix_before_and_after_relay_start() {
    let mut config = test_config();
    config.startup.relay = false;
    let (node, _) = boot(config);

    assert_eq!(run(&node, "prefix /a/b/c 1 0"), "ccnl stack not running\n");

    assert_eq!(run(&node, "startccn"), "[transceiver] Got channel: 10\n");
    assert_eq!(run(&node, "prefix /a/b/c 1 0"), "done\n");
    assert_eq!(run(&node, "prefix /a/b/c 1 face"), "prefixreg cmd failed: bad faceid 'face'\n");
}

#[test]
fn test_haltccn_then_control_commands() {
    let (node, _) = boot(test_config());

    assert_eq!(run(&node, "haltccn"), "ccn-lite relay stopped\n");
    assert_eq!(run(&node, "haltccn"), "ccnl stack not running\n");
    assert_eq!(run(&node, "config 5"), "ccnl stack not running\n");
    assert_eq!(run(&node, "populate"), "ccnl stack not running\n");
    assert_eq!(run(&node, "stat"), "ccnl stack not running\n");

    assert_eq!(run(&node, "startccn"), "[transceiver] Got channel: 10\n");
    assert_eq!(
        run(&node, "startccn"),
        "ccn-lite relay already running...please stop it first!\n"
    );
    assert_eq!(run(&node, "config 5"), "cache size set to 5\n");
    assert_eq!(run(&node, "stat"), "done\n");
}

// ============================================================================
// Interests
// ============================================================================

#[test]
fn test_interest_without_content_aborts_and_stays_idle() {
    let (node, _) = boot(test_config());

    assert_eq!(
        run(&node, "interest /x/y"),
        "riot_get returned 0 bytes...aborting!\n"
    );
    assert_eq!(node.tracker().state(), RequestState::Idle);
}

#[test]
fn test_populated_default_interest() {
    let (node, _) = boot(test_config());

    assert_eq!(run(&node, "populate"), "done\n");
    let out = run(&node, "interest");
    let lines: Vec<&str> = out.lines().collect();

    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "#".repeat(52));
    assert!(lines[1].starts_with("data='CCNx Canonical Ordering."));
    assert_eq!(lines[2], "#".repeat(52));
    assert_eq!(lines[3], "done");
    assert_eq!(node.tracker().state(), RequestState::Ready);
}

#[test]
fn test_interest_with_relay_down() {
    let mut config = test_config();
    config.startup.relay = false;
    let (node, _) = boot(config);

    assert_eq!(run(&node, "interest /x/y"), "ccnl stack not running\n");
    assert_eq!(node.tracker().state(), RequestState::Idle);
}

#[test]
fn test_udp_payload_served_by_appserver() {
    let (node, _) = boot(test_config());

    // Before any datagram the server answers with its default content
    let out = run(&node, "interest /riot/appserver/default");
    assert!(out.contains("data='RIOT is friendly'"), "{}", out);

    let addr = node.bridge().local_addr().unwrap();
    send_datagram(addr, b"21C\0").unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        node.bridge().stats().forwarded == 1
    }));

    let out = run(&node, "interest /riot/appserver/temperature");
    assert!(out.contains("data='21C'"), "{}", out);
}

#[test]
fn test_appserver_reattached_after_relay_restart() {
    let (node, _) = boot(test_config());

    run(&node, "haltccn");
    run(&node, "startccn");

    let out = run(&node, "interest /riot/appserver/again");
    assert!(out.contains("data='RIOT is friendly'"), "{}", out);
}

// ============================================================================
// Network commands
// ============================================================================

#[test]
fn test_set_and_dodag() {
    let (node, _) = boot(test_config());

    assert_eq!(run(&node, "set 3"), "Set node ID to 3\n");
    assert_eq!(node.transceiver().query().unwrap().address, 3);

    assert_eq!(
        run(&node, "init r"),
        "Initialized as root with address 3 on channel 10\n"
    );

    let out = run(&node, "dodag");
    assert!(out.contains("DODAG: root node, id 3"), "{}", out);
    assert!(out.contains("radio: channel 10, address 3"), "{}", out);
    assert!(out.contains("0=fe80::ff:fe00:0"), "{}", out);
    assert!(out.contains("udp: received 0"), "{}", out);
}

#[test]
fn test_set_broadcast_address_reports_failure() {
    let (node, _) = boot(test_config());
    run(&node, "set 4");

    let out = run(&node, "set 0");
    assert!(out.starts_with("[transceiver] could not set address 0"), "{}", out);
    assert_eq!(node.transceiver().query().unwrap().address, 4);
}

#[test]
fn test_failed_init_leaves_node_uninitialized() {
    let mut config = test_config();
    // Broadcast address; the radio refuses it
    config.node.id = 0;
    let (node, _) = boot(config);

    let out = run(&node, "init r");
    assert!(out.starts_with("init failed: "), "{}", out);
    assert_eq!(node.network().role, None);

    let out = run(&node, "dodag");
    assert!(out.contains("DODAG: uninitialized node, id 0"), "{}", out);
}

#[test]
fn test_server_and_appserver_are_idempotent() {
    let (node, _) = boot(test_config());
    let port = node.bridge().local_addr().unwrap().port();

    assert_eq!(
        run(&node, "server"),
        format!("UDP server already running on port {}\n", port)
    );
    assert_eq!(run(&node, "appserver"), "ccn-lite appserver already running\n");
}

#[test]
fn test_ign() {
    let (node, _) = boot(test_config());
    assert_eq!(run(&node, "ign 1"), "[transceiver] ignoring address 1\n");
}

// ============================================================================
// Parse errors
// ============================================================================

#[test]
fn test_usage_and_unknown_commands() {
    let (node, _) = boot(test_config());

    assert_eq!(
        run(&node, "prefix /a/b/c"),
        "enter: prefix </path/to/abc> <type> <faceid>\n"
    );
    assert_eq!(run(&node, "send 3"), "usage: send <addr> <text>\n");
    assert_eq!(run(&node, "config"), "config: <max_cache_entries>\n");
    assert_eq!(run(&node, "frobnicate"), "shell: command not found: frobnicate\n");
    assert_eq!(run(&node, ""), "");

    let help = run(&node, "help");
    assert!(help.lines().any(|l| l.starts_with("haltccn")));
    assert!(help.lines().any(|l| l.starts_with("dodag")));
}
