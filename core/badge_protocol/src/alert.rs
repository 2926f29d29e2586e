//! Badge match alerts
//!
//! Fires at most once per peer per boot: the first time a peer is heard
//! close enough, with at least one shared interest.

use std::collections::HashSet;

use serde::Serialize;

use crate::identity::Identity;
use crate::matcher::match_interests;
use crate::peer_table::PeerRecord;

/// Minimum signal strength (dBm) for a peer to trigger an alert
pub const RSSI_ALERT_THRESHOLD: i16 = -65;

/// Strong alerts need at least this match percentage...
const STRONG_MATCH_PERCENT: u8 = 60;
/// ...and at least this signal strength
const STRONG_RSSI: i16 = -60;
/// Medium alerts need at least this match percentage
const MEDIUM_MATCH_PERCENT: u8 = 30;

/// Alert severity, a pure function of match percentage and signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertStrength {
    Strong,
    Medium,
    Weak,
}

impl AlertStrength {
    pub fn classify(percent: u8, rssi: i16) -> Self {
        if percent >= STRONG_MATCH_PERCENT && rssi >= STRONG_RSSI {
            AlertStrength::Strong
        } else if percent >= MEDIUM_MATCH_PERCENT {
            AlertStrength::Medium
        } else {
            AlertStrength::Weak
        }
    }
}

/// Notification for the alert UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertEvent {
    pub identity: Identity,
    pub name: String,
    pub shared: Vec<String>,
    pub percent: u8,
    pub rssi: i16,
    pub strength: AlertStrength,
}

/// One-shot-per-peer alert gate
#[derive(Debug)]
pub struct BadgeAlertFilter {
    /// Peers already alerted since boot (never cleared)
    alerted: HashSet<Identity>,
    threshold: i16,
}

impl BadgeAlertFilter {
    pub fn new() -> Self {
        BadgeAlertFilter {
            alerted: HashSet::new(),
            threshold: RSSI_ALERT_THRESHOLD,
        }
    }

    /// Check a freshly upserted peer against the gate
    pub fn maybe_alert(
        &mut self,
        identity: Identity,
        record: &PeerRecord,
        mine: &[String],
    ) -> Option<AlertEvent> {
        if self.alerted.contains(&identity) || record.rssi < self.threshold {
            return None;
        }

        let m = match_interests(mine, &record.interests);
        if m.common.is_empty() {
            return None;
        }

        self.alerted.insert(identity);

        let event = AlertEvent {
            identity,
            name: record.name.clone(),
            strength: AlertStrength::classify(m.percent, record.rssi),
            shared: m.common,
            percent: m.percent,
            rssi: record.rssi,
        };
        log::info!(
            "Badge match with '{}' ({}): {:?} {}% {} dBm [{:?}]",
            event.name,
            identity,
            event.shared,
            event.percent,
            event.rssi,
            event.strength
        );
        Some(event)
    }

    pub fn has_alerted(&self, identity: &Identity) -> bool {
        self.alerted.contains(identity)
    }
}

impl Default for BadgeAlertFilter {
    fn default() -> Self {
        Self::new()
    }
}
