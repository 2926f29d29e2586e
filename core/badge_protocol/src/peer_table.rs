//! Table of nearby peers
//!
//! One record per identity, built from received advertisements and evicted
//! when a peer has not been heard from for [`PEER_TIMEOUT`]. Eviction runs
//! once per loop iteration (see [`PeerTable::evict_stale`]), never lazily on
//! access, so a stale record stays readable until the next check.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::codec::{Advertisement, Mode};
use crate::convergence::Cursor;
use crate::identity::Identity;

// ============================================================================
// Constants
// ============================================================================

/// A peer silent for this long is removed from the table
pub const PEER_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Peer Record
// ============================================================================

/// Last known state of a nearby peer
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub name: String,
    pub mode: Mode,
    pub interests: Vec<String>,
    pub topic: String,
    /// Signal strength of the last received advertisement (dBm)
    pub rssi: i16,
    pub last_seen: Instant,
    /// Identity this peer claims to be chatting with
    pub target: Option<Identity>,
    pub contact_shared: bool,
    pub cursor: Cursor,
}

impl PeerRecord {
    pub fn from_advertisement(adv: Advertisement, rssi: i16, now: Instant) -> Self {
        PeerRecord {
            name: adv.name,
            mode: adv.mode,
            interests: adv.interests,
            topic: adv.topic,
            rssi,
            last_seen: now,
            target: adv.target,
            contact_shared: adv.contact_shared,
            cursor: adv.cursor,
        }
    }

    /// True if the fields a display would show differ
    fn differs_visibly(&self, other: &PeerRecord) -> bool {
        self.name != other.name || self.mode != other.mode || self.topic != other.topic
    }
}

/// What an upsert did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First advertisement from this identity
    Inserted,
    /// Name, mode or topic changed
    Changed,
    /// Refreshed without a visible change
    Unchanged,
    /// The advertisement carried our own identity and was ignored
    Ignored,
}

impl UpsertOutcome {
    pub fn is_visible_change(self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Changed)
    }
}

/// Signal strength as 1..=3 bars
pub fn signal_bars(rssi: i16) -> u8 {
    if rssi > -50 {
        3
    } else if rssi > -70 {
        2
    } else {
        1
    }
}

// ============================================================================
// Peer Table
// ============================================================================

/// Nearby peers keyed by identity. Never contains the local identity.
#[derive(Debug)]
pub struct PeerTable {
    /// Our own identity (never stored)
    local: Identity,
    /// Known peers
    peers: HashMap<Identity, PeerRecord>,
    /// Silence after which a peer is evicted
    timeout: Duration,
}

impl PeerTable {
    pub fn new(local: Identity) -> Self {
        Self::with_timeout(local, PEER_TIMEOUT)
    }

    pub fn with_timeout(local: Identity, timeout: Duration) -> Self {
        PeerTable {
            local,
            peers: HashMap::new(),
            timeout,
        }
    }

    /// Replace the record for `identity` with the decoded advertisement
    pub fn upsert(
        &mut self,
        identity: Identity,
        adv: Advertisement,
        rssi: i16,
        now: Instant,
    ) -> UpsertOutcome {
        if identity == self.local {
            return UpsertOutcome::Ignored;
        }

        let record = PeerRecord::from_advertisement(adv, rssi, now);
        match self.peers.insert(identity, record) {
            None => {
                log::info!(
                    "New peer {} '{}' ({} dBm)",
                    identity,
                    self.peers[&identity].name,
                    rssi
                );
                UpsertOutcome::Inserted
            }
            Some(old) if old.differs_visibly(&self.peers[&identity]) => UpsertOutcome::Changed,
            Some(_) => UpsertOutcome::Unchanged,
        }
    }

    /// Remove peers silent for at least the timeout; returns who was removed
    pub fn evict_stale(&mut self, now: Instant) -> Vec<Identity> {
        let timeout = self.timeout;
        let stale: Vec<Identity> = self
            .peers
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_seen) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(peer) = self.peers.remove(id) {
                log::info!("Peer {} '{}' timed out", id, peer.name);
            }
        }

        stale
    }

    pub fn get(&self, identity: &Identity) -> Option<&PeerRecord> {
        self.peers.get(identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.peers.contains_key(identity)
    }

    /// Peer with the strongest signal; equal signals go to the lowest identity
    pub fn closest_peer(&self) -> Option<Identity> {
        self.strongest(|_| true).map(|(id, _)| id)
    }

    /// Strongest-signal peer satisfying `filter` (lowest identity on ties)
    pub fn strongest<F>(&self, filter: F) -> Option<(Identity, &PeerRecord)>
    where
        F: Fn(&PeerRecord) -> bool,
    {
        self.peers
            .iter()
            .filter(|(_, p)| filter(p))
            .max_by(|(a_id, a), (b_id, b)| a.rssi.cmp(&b.rssi).then_with(|| b_id.cmp(a_id)))
            .map(|(id, p)| (*id, p))
    }

    /// Peers ordered by descending signal, then identity
    pub fn by_signal(&self) -> Vec<(Identity, &PeerRecord)> {
        let mut peers: Vec<_> = self.peers.iter().map(|(id, p)| (*id, p)).collect();
        peers.sort_by(|(a_id, a), (b_id, b)| b.rssi.cmp(&a.rssi).then_with(|| a_id.cmp(b_id)));
        peers
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &PeerRecord)> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
