//! Outbound path: peer address resolution, neighbour cache and the
//! one-shot datagram send.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use crate::error::{Error, Result};

/// Derive a peer's address from its numeric id.
///
/// The id replaces the low 16 bits of `prefix`, so `fe80::ff:fe00:0` and id 3
/// give `fe80::ff:fe00:3`.
pub fn peer_address(prefix: IpAddr, id: u16) -> IpAddr {
    match prefix {
        IpAddr::V6(v6) => {
            let mut segments = v6.segments();
            segments[7] = id;
            IpAddr::V6(Ipv6Addr::from(segments))
        }
        IpAddr::V4(v4) => {
            let base = u32::from(v4) & 0xFFFF_0000;
            IpAddr::V4(Ipv4Addr::from(base | u32::from(id)))
        }
    }
}

/// Parse the configured peer prefix.
pub fn parse_prefix(prefix: &str) -> Result<IpAddr> {
    prefix
        .parse()
        .map_err(|e| Error::Config(format!("invalid peer prefix '{}': {}", prefix, e)))
}

/// Neighbour cache: peer id to link-local address.
#[derive(Debug, Clone, Default)]
pub struct NeighborCache {
    entries: BTreeMap<u16, IpAddr>,
}

impl NeighborCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: u16, address: IpAddr) {
        log::debug!("Neighbour {} -> {}", id, address);
        self.entries.insert(id, address);
    }

    /// Add ids `0..count` with addresses derived from `prefix`.
    pub fn fill(&mut self, prefix: IpAddr, count: u16) {
        for id in 0..count {
            self.add(id, peer_address(prefix, id));
        }
    }

    pub fn get(&self, id: u16) -> Option<IpAddr> {
        self.entries.get(&id).copied()
    }

    /// Cached address for `id`, else the derived one.
    pub fn resolve(&self, prefix: IpAddr, id: u16) -> IpAddr {
        self.get(id).unwrap_or_else(|| peer_address(prefix, id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, IpAddr)> + '_ {
        self.entries.iter().map(|(id, addr)| (*id, *addr))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `text` as sent on the wire: NUL terminated, at most `buffer_size` bytes.
pub fn encode_text(text: &str, buffer_size: usize) -> Vec<u8> {
    let mut payload: Vec<u8> = text.as_bytes().to_vec();
    payload.truncate(buffer_size.saturating_sub(1));
    payload.push(0);
    payload
}

/// Send one datagram from a transient socket. Returns the bytes sent.
///
/// No retry: the caller reports the outcome.
pub fn send_datagram(destination: SocketAddr, payload: &[u8]) -> Result<usize> {
    let local: SocketAddr = match destination {
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).map_err(|e| Error::socket("creating socket", e))?;
    let sent = socket
        .send_to(payload, destination)
        .map_err(|e| Error::socket(format!("sending to {}", destination), e))?;
    log::debug!("Sent {} bytes to {}", sent, destination);
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_peer_address_link_local() {
        let prefix = parse_prefix("fe80::ff:fe00:0").unwrap();
        assert_eq!(
            peer_address(prefix, 3).to_string(),
            "fe80::ff:fe00:3"
        );
        assert_eq!(
            peer_address(prefix, 0x1234).to_string(),
            "fe80::ff:fe00:1234"
        );
    }

    #[test]
    fn test_peer_address_v4_prefix() {
        let prefix = parse_prefix("127.0.0.0").unwrap();
        assert_eq!(peer_address(prefix, 1), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_bad_prefix_is_config_error() {
        assert!(matches!(parse_prefix("fe80::zz"), Err(Error::Config(_))));
    }

    #[test]
    fn test_neighbor_cache_fill_and_resolve() {
        let prefix = parse_prefix("fe80::ff:fe00:0").unwrap();
        let mut cache = NeighborCache::new();
        cache.fill(prefix, 5);
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.get(4), Some(peer_address(prefix, 4)));
        assert!(cache.get(5).is_none());

        let custom: IpAddr = "fe80::1".parse().unwrap();
        cache.add(9, custom);
        assert_eq!(cache.resolve(prefix, 9), custom);
        assert_eq!(cache.resolve(prefix, 7), peer_address(prefix, 7));
    }

    #[test]
    fn test_encode_text_terminates_and_truncates() {
        assert_eq!(encode_text("hi", 128), b"hi\0");
        assert_eq!(encode_text("abcdef", 4), b"abc\0");
        assert_eq!(encode_text("", 128), b"\0");
    }

    #[test]
    fn test_send_datagram_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let destination = receiver.local_addr().unwrap();

        let sent = send_datagram(destination, b"hello\0").unwrap();
        assert_eq!(sent, 6);

        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"hello\0");
    }
}
