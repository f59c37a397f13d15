//! `wg show` 文本输出解析。
//!
//! 解析是全函数：任何输入（空串、未知前缀、末尾悬空的 peer 段）都得到一个
//! 结构合法的结果，从不报错。

use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::model::Peer;

/// Live interface state as reported by `wg show`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WireGuardStatus {
    pub interface_name: String,
    pub public_key: String,
    pub listen_port: u16,
    pub peers: Vec<PeerStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerStats {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: String,
    /// Raw text, e.g. `1 minute, 5 seconds ago`.
    pub latest_handshake: Option<String>,
    pub transfer_rx: u64,
    pub transfer_tx: u64,
}

impl PeerStats {
    fn new(public_key: &str) -> Self {
        Self {
            public_key: public_key.to_string(),
            ..Default::default()
        }
    }

    pub fn handshake_age(&self) -> Option<Duration> {
        self.latest_handshake.as_deref().and_then(parse_handshake_age)
    }
}

impl WireGuardStatus {
    /// Placeholder returned when the status tool could not be run.
    pub fn unknown() -> Self {
        Self {
            interface_name: "unknown".to_string(),
            ..Default::default()
        }
    }

    pub fn peer(&self, public_key: &str) -> Option<&PeerStats> {
        self.peers.iter().find(|p| p.public_key == public_key)
    }

    /// Peers that completed at least one handshake.
    pub fn connected_peers(&self) -> usize {
        self.peers.iter().filter(|p| p.latest_handshake.is_some()).count()
    }

    pub fn total_rx(&self) -> u64 {
        self.peers.iter().map(|p| p.transfer_rx).sum()
    }

    pub fn total_tx(&self) -> u64 {
        self.peers.iter().map(|p| p.transfer_tx).sum()
    }
}

pub fn parse_wg_show(output: &str) -> WireGuardStatus {
    let mut status = WireGuardStatus::default();
    let mut current: Option<PeerStats> = None;

    for raw in output.lines() {
        let line = raw.trim();

        if let Some(rest) = line.strip_prefix("public key:") {
            status.public_key = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("listening port:") {
            status.listen_port = rest.trim().parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("peer:") {
            if let Some(done) = current.take() {
                status.peers.push(done);
            }
            current = Some(PeerStats::new(rest.trim()));
        } else if let Some(peer) = current.as_mut() {
            if let Some(rest) = line.strip_prefix("endpoint:") {
                peer.endpoint = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("allowed ips:") {
                peer.allowed_ips = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("latest handshake:") {
                peer.latest_handshake = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("transfer:") {
                let (rx, tx) = parse_transfer(rest);
                peer.transfer_rx = rx;
                peer.transfer_tx = tx;
            }
        }
    }

    if let Some(done) = current {
        status.peers.push(done);
    }
    status
}

/// `"<rx> <unit> received, <tx> <unit> sent"`; each side's leading integer, 0 if not one.
fn parse_transfer(text: &str) -> (u64, u64) {
    let mut sides = text.trim().split(',').map(|side| {
        side.trim()
            .split(' ')
            .next()
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(0)
    });
    let rx = sides.next().unwrap_or(0);
    let tx = sides.next().unwrap_or(0);
    (rx, tx)
}

/// Parse `wg show`'s relative handshake time, e.g. `2 hours, 1 minute, 7 seconds ago`.
pub fn parse_handshake_age(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("now") {
        return Some(Duration::ZERO);
    }
    let body = text.strip_suffix("ago").unwrap_or(text).trim();
    if body.is_empty() {
        return None;
    }

    let mut total = 0u64;
    for part in body.split(',') {
        let mut words = part.split_whitespace();
        let amount: u64 = words.next()?.parse().ok()?;
        let unit = words.next()?;
        let secs = match unit.trim_end_matches('s') {
            "second" => 1,
            "minute" => 60,
            "hour" => 3600,
            "day" => 86_400,
            "year" => 365 * 86_400,
            _ => return None,
        };
        total = total.checked_add(amount.checked_mul(secs)?)?;
    }
    Some(Duration::from_secs(total))
}

/// Configured peers with live endpoint, counters and handshake time filled in.
///
/// Inputs are left untouched; peers absent from `live` are returned as-is.
pub fn merge_peer_stats(peers: &[Peer], live: &WireGuardStatus, now: SystemTime) -> Vec<Peer> {
    peers
        .iter()
        .map(|peer| {
            let mut merged = peer.clone();
            if let Some(stats) = live.peer(&peer.public_key) {
                if stats.endpoint.is_some() {
                    merged.endpoint = stats.endpoint.clone();
                }
                merged.transfer_rx = stats.transfer_rx;
                merged.transfer_tx = stats.transfer_tx;
                if let Some(age) = stats.handshake_age() {
                    merged.last_handshake = now.checked_sub(age);
                }
            }
            merged
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "interface: wg0
  public key: SERVERPUB=
  private key: (hidden)
  listening port: 51820

peer: PEER1=
  endpoint: 203.0.113.5:41414
  allowed ips: 10.0.0.2/32
  latest handshake: 1 minute, 5 seconds ago
  transfer: 1024 B received, 2048 B sent

peer: PEER2=
  allowed ips: 10.0.0.3/32
";

    #[test]
    fn parses_single_peer_scenario() {
        let status = parse_wg_show(
            "peer: ABC\nendpoint: 1.2.3.4:5\nallowed ips: 0.0.0.0/0\ntransfer: 10 B received, 20 B sent\n",
        );
        assert_eq!(status.peers.len(), 1);
        let p = &status.peers[0];
        assert_eq!(p.public_key, "ABC");
        assert_eq!(p.endpoint.as_deref(), Some("1.2.3.4:5"));
        assert_eq!(p.allowed_ips, "0.0.0.0/0");
        assert_eq!(p.transfer_rx, 10);
        assert_eq!(p.transfer_tx, 20);
    }

    #[test]
    fn parses_interface_and_flushes_trailing_peer() {
        let status = parse_wg_show(FULL);
        assert_eq!(status.public_key, "SERVERPUB=");
        assert_eq!(status.listen_port, 51820);
        assert_eq!(status.peers.len(), 2);
        assert_eq!(status.peers[1].public_key, "PEER2=");
        assert_eq!(status.peers[1].endpoint, None);
        assert_eq!(status.connected_peers(), 1);
        assert_eq!(status.total_rx(), 1024);
        assert_eq!(status.total_tx(), 2048);
    }

    #[test]
    fn parsing_is_total() {
        assert_eq!(parse_wg_show(""), WireGuardStatus::default());
        assert_eq!(parse_wg_show("garbage\n\n\t???"), WireGuardStatus::default());

        let status = parse_wg_show("listening port: lots\nendpoint: 1.1.1.1:1\ntransfer: x");
        assert_eq!(status.listen_port, 0);
        assert!(status.peers.is_empty());
    }

    #[test]
    fn non_numeric_transfer_is_zero() {
        let status = parse_wg_show("peer: A\ntransfer: 1.21 MiB received, 5 B sent\n");
        assert_eq!(status.peers[0].transfer_rx, 0);
        assert_eq!(status.peers[0].transfer_tx, 5);

        let status = parse_wg_show("peer: A\ntransfer: 7 B received\n");
        assert_eq!(status.peers[0].transfer_rx, 7);
        assert_eq!(status.peers[0].transfer_tx, 0);
    }

    #[test]
    fn handshake_age() {
        assert_eq!(parse_handshake_age("Now"), Some(Duration::ZERO));
        assert_eq!(parse_handshake_age("1 minute, 5 seconds ago"), Some(Duration::from_secs(65)));
        assert_eq!(
            parse_handshake_age("2 days, 1 hour, 1 second ago"),
            Some(Duration::from_secs(2 * 86_400 + 3600 + 1))
        );
        assert_eq!(parse_handshake_age("(none)"), None);
        assert_eq!(parse_handshake_age("soon"), None);
        assert_eq!(parse_handshake_age(""), None);
    }

    #[test]
    fn merge_fills_live_fields_without_touching_input() {
        let peers = vec![
            Peer::new("PEER1=", "10.0.0.2/32").with_name("laptop"),
            Peer::new("OTHER=", "10.0.0.9/32"),
        ];
        let live = parse_wg_show(FULL);
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);

        let merged = merge_peer_stats(&peers, &live, now);

        assert_eq!(merged[0].name, "laptop");
        assert_eq!(merged[0].endpoint.as_deref(), Some("203.0.113.5:41414"));
        assert_eq!(merged[0].transfer_rx, 1024);
        assert_eq!(merged[0].transfer_tx, 2048);
        assert_eq!(
            merged[0].last_handshake,
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 - 65))
        );
        assert_eq!(merged[1], peers[1]);
        assert_eq!(peers[0].transfer_rx, 0);
    }
}
