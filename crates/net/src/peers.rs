//! Peer table and syn-cookie anti-spoofing.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::RngCore;
use tracing::*;

use weave_primitives::crypto::validate_message;
use weave_primitives::{Account, Amount, Buf32, Signature};

/// Hard caps from the protocol: how many peers a single address may hold,
/// and how many un-handshaken ("legacy") peers we tolerate.
pub const MAX_PEERS_PER_IP: usize = 10;
pub const MAX_LEGACY_PEERS_PER_IP: usize = 5;
pub const MAX_LEGACY_PEERS: usize = 500;

#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub endpoint: SocketAddr,
    pub last_contact: Instant,
    pub last_attempt: Instant,
    pub last_rep_request: Instant,
    pub rep_weight: Amount,
    /// Proven identity from the handshake; `None` marks a legacy peer.
    pub node_id: Option<Account>,
    pub network_version: u8,
}

struct SynCookieInfo {
    cookie: Buf32,
    created: Instant,
}

struct PeersState {
    peers: HashMap<SocketAddr, PeerInfo>,
    legacy_total: usize,
}

/// Known peers indexed by endpoint, with caps per IP and for legacy
/// entries.  All operations are short critical sections.
pub struct PeerContainer {
    state: Mutex<PeersState>,
    syn_cookies: Mutex<HashMap<SocketAddr, SynCookieInfo>>,
    syn_cookies_per_ip: Mutex<HashMap<IpAddr, usize>>,
    cookie_cutoff: Duration,
}

impl PeerContainer {
    pub fn new(cookie_cutoff: Duration) -> Self {
        Self {
            state: Mutex::new(PeersState {
                peers: HashMap::new(),
                legacy_total: 0,
            }),
            syn_cookies: Mutex::new(HashMap::new()),
            syn_cookies_per_ip: Mutex::new(HashMap::new()),
            cookie_cutoff,
        }
    }

    /// Inserts or refreshes a peer.  Returns `true` when the peer is
    /// listed afterwards (caps can refuse new legacy entries).
    pub fn insert(&self, endpoint: SocketAddr, version: u8, node_id: Option<Account>) -> bool {
        if endpoint.ip().is_unspecified() || endpoint.port() == 0 {
            return false;
        }
        let now = Instant::now();
        let mut state = self.state.lock();
        if let Some(existing) = state.peers.get_mut(&endpoint) {
            existing.last_contact = now;
            existing.network_version = version;
            if node_id.is_some() && existing.node_id.is_none() {
                existing.node_id = node_id;
                state.legacy_total -= 1;
            }
            return true;
        }

        let ip = endpoint.ip();
        let per_ip = state
            .peers
            .values()
            .filter(|p| p.endpoint.ip() == ip)
            .count();
        if per_ip >= MAX_PEERS_PER_IP {
            debug!(%endpoint, "peer refused, per-ip cap");
            return false;
        }
        if node_id.is_none() {
            let legacy_per_ip = state
                .peers
                .values()
                .filter(|p| p.endpoint.ip() == ip && p.node_id.is_none())
                .count();
            if legacy_per_ip >= MAX_LEGACY_PEERS_PER_IP || state.legacy_total >= MAX_LEGACY_PEERS {
                debug!(%endpoint, "legacy peer refused, cap");
                return false;
            }
            state.legacy_total += 1;
        }
        let distant_past = now
            .checked_sub(Duration::from_secs(3600))
            .unwrap_or(now);
        state.peers.insert(
            endpoint,
            PeerInfo {
                endpoint,
                last_contact: now,
                last_attempt: distant_past,
                last_rep_request: distant_past,
                rep_weight: Amount::zero(),
                node_id,
                network_version: version,
            },
        );
        trace!(%endpoint, "peer added");
        true
    }

    /// Refreshes liveness for traffic from a known peer.
    pub fn contacted(&self, endpoint: SocketAddr, version: u8) -> bool {
        {
            let mut state = self.state.lock();
            if let Some(peer) = state.peers.get_mut(&endpoint) {
                peer.last_contact = Instant::now();
                peer.network_version = version;
                return true;
            }
        }
        self.insert(endpoint, version, None)
    }

    /// Records a representative's weight against its sending peer.
    pub fn rep_response(&self, endpoint: SocketAddr, weight: Amount) {
        let mut state = self.state.lock();
        if let Some(peer) = state.peers.get_mut(&endpoint) {
            peer.rep_weight = peer.rep_weight.max(weight);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().peers.is_empty()
    }

    pub fn contains(&self, endpoint: &SocketAddr) -> bool {
        self.state.lock().peers.contains_key(endpoint)
    }

    pub fn list(&self) -> Vec<SocketAddr> {
        self.state.lock().peers.keys().copied().collect()
    }

    /// Uniform sample of up to `count` peers.
    pub fn random_peers(&self, count: usize) -> Vec<SocketAddr> {
        let mut peers = self.list();
        peers.shuffle(&mut rand::thread_rng());
        peers.truncate(count);
        peers
    }

    /// Fanout size for block floods: the square root of the table.
    pub fn fanout(&self) -> usize {
        (self.len() as f64).sqrt().ceil() as usize
    }

    /// Peers ordered by rep weight, heaviest first.
    pub fn representatives(&self, count: usize) -> Vec<PeerInfo> {
        let mut reps: Vec<PeerInfo> = self
            .state
            .lock()
            .peers
            .values()
            .filter(|p| !p.rep_weight.is_zero())
            .cloned()
            .collect();
        reps.sort_by(|a, b| b.rep_weight.cmp(&a.rep_weight));
        reps.truncate(count);
        reps
    }

    /// Least-recently-attempted peer for a new bootstrap connection.
    pub fn bootstrap_peer(&self) -> Option<SocketAddr> {
        let mut state = self.state.lock();
        let endpoint = state
            .peers
            .values()
            .min_by_key(|p| p.last_attempt)
            .map(|p| p.endpoint)?;
        if let Some(peer) = state.peers.get_mut(&endpoint) {
            peer.last_attempt = Instant::now();
        }
        Some(endpoint)
    }

    /// Drops peers not heard from within `cutoff`; returns the survivors.
    pub fn purge(&self, cutoff: Duration) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let before = state.peers.len();
        let mut dropped_legacy = 0;
        state.peers.retain(|endpoint, peer| {
            let keep = now.duration_since(peer.last_contact) < cutoff;
            if !keep {
                trace!(%endpoint, "peer timed out");
                if peer.node_id.is_none() {
                    dropped_legacy += 1;
                }
            }
            keep
        });
        state.legacy_total -= dropped_legacy;
        let after = state.peers.len();
        if after != before {
            debug!(dropped = before - after, "peers purged");
        }
        after
    }

    // ---- syn cookies ----

    /// Issues a cookie for an endpoint, unless one is outstanding or the
    /// per-IP rate cap is hit.
    pub fn assign_syn_cookie(&self, endpoint: SocketAddr) -> Option<Buf32> {
        let ip = endpoint.ip();
        let mut per_ip = self.syn_cookies_per_ip.lock();
        let count = per_ip.entry(ip).or_insert(0);
        if *count >= MAX_PEERS_PER_IP {
            return None;
        }
        let mut cookies = self.syn_cookies.lock();
        if cookies.contains_key(&endpoint) {
            return None;
        }
        let mut bytes = [0; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let cookie = Buf32(bytes);
        cookies.insert(
            endpoint,
            SynCookieInfo {
                cookie,
                created: Instant::now(),
            },
        );
        *count += 1;
        Some(cookie)
    }

    /// Checks a handshake response against the endpoint's outstanding
    /// cookie, consuming it either way.
    pub fn validate_syn_cookie(
        &self,
        endpoint: SocketAddr,
        account: &Account,
        signature: &Signature,
    ) -> bool {
        let info = {
            let mut cookies = self.syn_cookies.lock();
            cookies.remove(&endpoint)
        };
        let Some(info) = info else {
            return false;
        };
        if let Some(count) = self.syn_cookies_per_ip.lock().get_mut(&endpoint.ip()) {
            *count = count.saturating_sub(1);
        }
        validate_message(account, &info.cookie, signature)
    }

    /// Expires cookies older than the cutoff.
    pub fn purge_syn_cookies(&self) {
        let now = Instant::now();
        let mut cookies = self.syn_cookies.lock();
        let mut per_ip = self.syn_cookies_per_ip.lock();
        cookies.retain(|endpoint, info| {
            let keep = now.duration_since(info.created) < self.cookie_cutoff;
            if !keep {
                if let Some(count) = per_ip.get_mut(&endpoint.ip()) {
                    *count = count.saturating_sub(1);
                }
            }
            keep
        });
        per_ip.retain(|_, count| *count > 0);
    }
}

/// Addresses a node refuses to gossip or connect to.
pub fn reserved_address(endpoint: &SocketAddr) -> bool {
    match endpoint.ip() {
        IpAddr::V4(v4) => {
            v4.is_unspecified() || v4.is_broadcast() || v4.is_multicast() || v4.is_documentation()
        }
        IpAddr::V6(v6) => v6.is_unspecified() || v6.is_multicast(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_primitives::crypto::{sign_message, Keypair};

    fn container() -> PeerContainer {
        PeerContainer::new(Duration::from_secs(5))
    }

    fn endpoint(ip: [u8; 4], port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::from(ip), port)
    }

    #[test]
    fn test_insert_and_refresh() {
        let peers = container();
        let e = endpoint([10, 0, 0, 1], 7000);
        assert!(peers.insert(e, 12, None));
        assert!(peers.insert(e, 12, None));
        assert_eq!(peers.len(), 1);
        assert!(peers.contains(&e));
        assert!(!peers.insert(endpoint([0, 0, 0, 0], 7000), 12, None));
    }

    #[test]
    fn test_legacy_caps() {
        let peers = container();
        for port in 0..MAX_LEGACY_PEERS_PER_IP {
            assert!(peers.insert(endpoint([10, 0, 0, 9], 7000 + port as u16), 12, None));
        }
        // Sixth legacy peer on the same address is refused.
        assert!(!peers.insert(endpoint([10, 0, 0, 9], 7900), 12, None));
        // But a handshaken peer still fits under the wider cap.
        assert!(peers.insert(
            endpoint([10, 0, 0, 9], 7901),
            12,
            Some(Keypair::generate().public)
        ));
    }

    #[test]
    fn test_per_ip_cap() {
        let peers = container();
        for port in 0..MAX_PEERS_PER_IP {
            assert!(peers.insert(
                endpoint([10, 1, 0, 1], 8000 + port as u16),
                12,
                Some(Keypair::generate().public)
            ));
        }
        assert!(!peers.insert(
            endpoint([10, 1, 0, 1], 8999),
            12,
            Some(Keypair::generate().public)
        ));
        // Other addresses are unaffected.
        assert!(peers.insert(
            endpoint([10, 1, 0, 2], 8000),
            12,
            Some(Keypair::generate().public)
        ));
    }

    #[test]
    fn test_purge_times_out_peers() {
        let peers = container();
        peers.insert(endpoint([10, 0, 0, 3], 7000), 12, None);
        assert_eq!(peers.purge(Duration::from_secs(60)), 1);
        assert_eq!(peers.purge(Duration::from_nanos(0)), 0);
        assert!(peers.is_empty());
    }

    #[test]
    fn test_representative_ordering() {
        let peers = container();
        let light = endpoint([10, 0, 0, 4], 7001);
        let heavy = endpoint([10, 0, 0, 5], 7002);
        peers.insert(light, 12, None);
        peers.insert(heavy, 12, None);
        peers.rep_response(light, Amount(10));
        peers.rep_response(heavy, Amount(1000));
        let reps = peers.representatives(10);
        assert_eq!(reps.len(), 2);
        assert_eq!(reps[0].endpoint, heavy);
    }

    #[test]
    fn test_syn_cookie_flow() {
        let peers = container();
        let e = endpoint([10, 0, 0, 6], 7003);
        let key = Keypair::generate();
        let cookie = peers.assign_syn_cookie(e).unwrap();
        // Only one outstanding cookie per endpoint.
        assert!(peers.assign_syn_cookie(e).is_none());

        let sig = sign_message(&key.raw, &key.public, &cookie);
        assert!(peers.validate_syn_cookie(e, &key.public, &sig));
        // Consumed: replaying the response fails.
        assert!(!peers.validate_syn_cookie(e, &key.public, &sig));
    }

    #[test]
    fn test_syn_cookie_bad_signature() {
        let peers = container();
        let e = endpoint([10, 0, 0, 7], 7004);
        let key = Keypair::generate();
        let cookie = peers.assign_syn_cookie(e).unwrap();
        let mut sig = sign_message(&key.raw, &key.public, &cookie);
        sig.0[0] ^= 1;
        assert!(!peers.validate_syn_cookie(e, &key.public, &sig));
    }

    #[test]
    fn test_syn_cookie_rate_cap_per_ip() {
        let peers = container();
        for port in 0..MAX_PEERS_PER_IP {
            assert!(peers
                .assign_syn_cookie(endpoint([10, 0, 0, 8], 9000 + port as u16))
                .is_some());
        }
        assert!(peers
            .assign_syn_cookie(endpoint([10, 0, 0, 8], 9999))
            .is_none());
        peers.purge_syn_cookies();
    }

    #[test]
    fn test_fanout_is_sqrt() {
        let peers = container();
        for i in 0..16u16 {
            peers.insert(
                endpoint([10, 2, (i / 8) as u8, (i % 8) as u8], 7100 + i),
                12,
                Some(Keypair::generate().public),
            );
        }
        assert_eq!(peers.fanout(), 4);
    }

    #[test]
    fn test_reserved_addresses() {
        assert!(reserved_address(&endpoint([0, 0, 0, 0], 1)));
        assert!(reserved_address(&endpoint([255, 255, 255, 255], 1)));
        assert!(!reserved_address(&endpoint([8, 8, 8, 8], 1)));
    }
}
