//! Chat convergence
//!
//! Keeps the shared cursor (which common interest is on screen) convergent
//! between two chatting badges using nothing but periodic, unacknowledged,
//! unordered broadcasts.
//!
//! # Cursor rules
//!
//! Each side owns a `(index, version)` pair. Only the side that authors a
//! new position bumps the version. On receiving the peer's pair:
//!
//! ```text
//! peer.version >  mine   adopt peer (index mod len, version)
//! peer.version == mine   indexes differ: the greater identity adopts the peer's index
//! peer.version <  mine   nothing, the peer catches up on its own receive
//! ```
//!
//! The tie-break is symmetric: exactly one side moves, so once both sides
//! have heard each other's current advertisement they agree.
//!
//! Contact sharing converges as a monotonic OR for the rest of the session.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::{truncate_chars, Mode, MAX_TOPIC_CHARS};
use crate::identity::Identity;
use crate::matcher::{contains_interest, find_interest, match_interests, same_topic};
use crate::peer_table::{PeerRecord, PeerTable};

// ============================================================================
// Cursor
// ============================================================================

/// Shared cursor into the common-interest list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Cursor {
    pub index: u32,
    /// Bumped only by the device that authored the current index
    pub version: u32,
}

/// What [`converge_cursor`] did to the local cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOutcome {
    /// Peer had a newer version; took its index and version
    Adopted,
    /// Same version, different index; we lost the tie-break and took its index
    TieBreak,
    /// Nothing to do (in sync, peer stale, or we won the tie-break)
    Unchanged,
}

/// Reconcile the local cursor with the selected peer's advertised cursor
pub fn converge_cursor(
    local_id: Identity,
    peer_id: Identity,
    local: &mut Cursor,
    peer: Cursor,
    common_len: usize,
) -> CursorOutcome {
    let peer_index = wrap_index(peer.index, common_len);

    if peer.version > local.version {
        local.version = peer.version;
        local.index = peer_index;
        return CursorOutcome::Adopted;
    }

    if peer.version == local.version && peer_index != local.index && local_id > peer_id {
        local.index = peer_index;
        return CursorOutcome::TieBreak;
    }

    CursorOutcome::Unchanged
}

fn wrap_index(index: u32, len: usize) -> u32 {
    if len == 0 {
        0
    } else {
        (index as usize % len) as u32
    }
}

// ============================================================================
// Admission Policy
// ============================================================================

/// Which peer advertisements may drive chat sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionPolicy {
    /// The selected peer must be targeting us
    #[serde(rename = "mutual")]
    MutualTarget,
    /// The selected peer must be chatting, and either target us or broadcast
    /// a topic we share. Also follows the strongest badge on our topic.
    #[serde(rename = "open")]
    SharedTopic,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        AdmissionPolicy::MutualTarget
    }
}

impl FromStr for AdmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mutual" | "strict" => Ok(AdmissionPolicy::MutualTarget),
            "open" | "topic" => Ok(AdmissionPolicy::SharedTopic),
            other => Err(format!("unknown admission policy '{}'", other)),
        }
    }
}

// ============================================================================
// Chat State
// ============================================================================

/// CHAT-scoped session fields; dropped wholesale on return to SEARCH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatState {
    /// Selected peer, if any was resolvable on entry
    pub peer: Option<Identity>,
    /// Common interests with the selected peer (lowercased, sorted)
    pub common: Vec<String>,
    pub cursor: Cursor,
    /// Sticky until the session ends
    pub contact_shared: bool,
    /// Directed entry: the topic is never put on the air
    pub quiet: bool,
}

impl ChatState {
    pub fn new(peer: Option<Identity>, common: Vec<String>, quiet: bool) -> Self {
        ChatState {
            peer,
            common,
            cursor: Cursor::default(),
            contact_shared: false,
            quiet,
        }
    }

    /// Interest under the cursor
    pub fn topic(&self) -> Option<&str> {
        self.common.get(self.cursor.index as usize).map(String::as_str)
    }

    /// TOPIC field for outgoing advertisements
    pub fn broadcast_topic(&self) -> String {
        match (self.quiet, self.topic()) {
            (false, Some(topic)) => truncate_chars(topic, MAX_TOPIC_CHARS).to_string(),
            _ => String::new(),
        }
    }

    /// Author a new cursor position. No-op on an empty list.
    ///
    /// The version saturates at `u32::MAX`: a wrapped version would look stale
    /// to the peer forever.
    pub fn advance(&mut self) -> bool {
        if self.common.is_empty() {
            return false;
        }
        self.cursor.index = (self.cursor.index + 1) % self.common.len() as u32;
        self.cursor.version = self.cursor.version.saturating_add(1);
        true
    }

    /// Position of `topic` in the common list
    pub fn position_of(&self, topic: &str) -> Option<u32> {
        self.common
            .iter()
            .position(|c| same_topic(c, topic))
            .map(|i| i as u32)
    }

    /// Move the cursor onto `topic` without authoring a change (no version
    /// bump). Returns false if the topic is not in the list.
    pub fn point_at(&mut self, topic: &str) -> bool {
        match self.position_of(topic) {
            Some(index) => {
                self.cursor.index = index;
                true
            }
            None => false,
        }
    }

    /// Mark the contact as shared; returns true if it was not already
    pub fn share(&mut self) -> bool {
        !std::mem::replace(&mut self.contact_shared, true)
    }
}

// ============================================================================
// Convergence Engine
// ============================================================================

/// Result of one convergence pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Open-join switched the selected peer
    pub retargeted: bool,
    /// The selected peer's advertisement passed admission
    pub admitted: bool,
    pub common_changed: bool,
    pub cursor: CursorOutcome,
    pub contact_adopted: bool,
}

impl SyncReport {
    fn idle() -> Self {
        SyncReport {
            retargeted: false,
            admitted: false,
            common_changed: false,
            cursor: CursorOutcome::Unchanged,
            contact_adopted: false,
        }
    }

    /// Anything a display would need to redraw for
    pub fn changed(&self) -> bool {
        self.retargeted
            || self.common_changed
            || self.cursor != CursorOutcome::Unchanged
            || self.contact_adopted
    }
}

/// Reconciles local chat state with the selected peer once per receive cycle
#[derive(Debug, Clone)]
pub struct ConvergenceEngine {
    policy: AdmissionPolicy,
}

impl ConvergenceEngine {
    pub fn new(policy: AdmissionPolicy) -> Self {
        ConvergenceEngine { policy }
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Common-interest list with a peer under this engine's policy
    pub fn common_interests(&self, mine: &[String], record: &PeerRecord) -> Vec<String> {
        let mut common = match_interests(mine, &record.interests).common;

        // Their interest list may have been cut on the wire while the topic survived
        if self.policy == AdmissionPolicy::SharedTopic && record.mode == Mode::Chat {
            if let Some(interest) = find_interest(mine, &record.topic) {
                let topic = interest.to_lowercase();
                if !common.contains(&topic) {
                    common.push(topic);
                    common.sort();
                }
            }
        }

        common
    }

    /// Whether `record` may drive chat sync for `local`
    pub fn admits(&self, local: Identity, mine: &[String], record: &PeerRecord) -> bool {
        let targets_us = record.target == Some(local);
        match self.policy {
            AdmissionPolicy::MutualTarget => targets_us,
            AdmissionPolicy::SharedTopic => {
                record.mode == Mode::Chat && (targets_us || contains_interest(mine, &record.topic))
            }
        }
    }

    /// One convergence pass over the current peer table
    pub fn run(
        &self,
        local: Identity,
        mine: &[String],
        chat: &mut ChatState,
        table: &PeerTable,
    ) -> SyncReport {
        let mut report = SyncReport::idle();

        if self.policy == AdmissionPolicy::SharedTopic {
            report.retargeted = self.follow_topic(chat, table);
        }

        let peer_id = match chat.peer {
            Some(id) => id,
            None => return report,
        };
        let record = match table.get(&peer_id) {
            Some(r) => r,
            None => return report,
        };

        if !self.admits(local, mine, record) {
            log::trace!("Chat sync: {} not admitted under {:?}", peer_id, self.policy);
            return report;
        }
        report.admitted = true;

        // Passive recomputation, never bumps the version
        let common = self.common_interests(mine, record);
        if !same_content(&common, &chat.common) {
            log::debug!("Chat sync: common list {:?} -> {:?}", chat.common, common);
            let shown = chat.topic().map(str::to_string);
            chat.common = common;
            // A broadcast topic stays on screen if it survived the refresh
            let kept = !chat.quiet && shown.map_or(false, |t| chat.point_at(&t));
            if !kept && chat.cursor.index as usize >= chat.common.len() {
                chat.cursor.index = 0;
            }
            report.common_changed = true;
        }

        // Lists may differ under open join; the peer's topic says what its
        // index means
        let peer_cursor = Cursor {
            index: chat
                .position_of(&record.topic)
                .unwrap_or(record.cursor.index),
            version: record.cursor.version,
        };
        report.cursor = converge_cursor(
            local,
            peer_id,
            &mut chat.cursor,
            peer_cursor,
            chat.common.len(),
        );
        if report.cursor != CursorOutcome::Unchanged {
            log::debug!(
                "Chat sync: cursor {:?} -> index {} version {}",
                report.cursor,
                chat.cursor.index,
                chat.cursor.version
            );
        }

        if record.contact_shared && !chat.contact_shared {
            chat.contact_shared = true;
            report.contact_adopted = true;
            log::info!("Contact shared by {}", peer_id);
        }

        report
    }

    /// Open join: follow the strongest badge broadcasting our current topic
    fn follow_topic(&self, chat: &mut ChatState, table: &PeerTable) -> bool {
        if chat.quiet {
            return false;
        }
        let topic = match chat.topic() {
            Some(t) => t.to_string(),
            None => return false,
        };

        let best = table
            .strongest(|p| p.mode == Mode::Chat && same_topic(&p.topic, &topic))
            .map(|(id, _)| id);

        match best {
            Some(id) if chat.peer != Some(id) => {
                log::info!("Following {} on topic '{}'", id, topic);
                chat.peer = Some(id);
                true
            }
            _ => false,
        }
    }
}

impl Default for ConvergenceEngine {
    fn default() -> Self {
        Self::new(AdmissionPolicy::default())
    }
}

/// Equal as sets, ignoring order
fn same_content(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

// ============================================================================
// Tests
// ============================================================================
