//! Session state machine
//!
//! ```text
//!            enter_chat(directed)
//!   SEARCH ───────────────────────▶ CHAT ──┐ advance_cursor / share_contact
//!      ▲                              │ ◀──┘
//!      └──────────── exit_chat ───────┘
//! ```
//!
//! [`SessionContext`] owns every piece of mutable protocol state: the peer
//! table, the alert filter, the convergence engine and the CHAT-scoped
//! fields. It is driven from a single cooperative loop and is never shared
//! across threads.

use std::time::Instant;

use serde::Serialize;

use crate::alert::{AlertEvent, BadgeAlertFilter};
use crate::codec::{
    decode, truncate_chars, Advertisement, DecodeError, Mode, MAX_INTERESTS, MAX_NAME_CHARS,
};
use crate::convergence::{AdmissionPolicy, ChatState, ConvergenceEngine, Cursor, SyncReport};
use crate::identity::Identity;
use crate::matcher::{
    contains_interest, find_interest, first_common_interest, match_interests, topic_palette_slot,
};
use crate::peer_table::{signal_bars, PeerTable, UpsertOutcome};
use crate::transport::{InboundFrame, Transport};

// ============================================================================
// Local Profile
// ============================================================================

/// Operator-configured identity, name and interests; fixed at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProfile {
    pub identity: Identity,
    pub name: String,
    pub interests: Vec<String>,
}

impl LocalProfile {
    /// Normalizes like the wire does: name cut to 20 chars, interests
    /// trimmed, empties dropped, at most 12
    pub fn new<S: AsRef<str>>(identity: Identity, name: &str, interests: &[S]) -> Self {
        LocalProfile {
            identity,
            name: truncate_chars(name, MAX_NAME_CHARS).to_string(),
            interests: interests
                .iter()
                .map(|s| s.as_ref().trim())
                .filter(|s| !s.is_empty())
                .take(MAX_INTERESTS)
                .map(str::to_string)
                .collect(),
        }
    }
}

// ============================================================================
// Derived State
// ============================================================================

/// Best shared-interest peer seen while searching, latched until CHAT
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    pub topic: String,
    pub peer_name: String,
    pub rssi: i16,
    pub palette_slot: u8,
}

/// Outcome of one receive cycle
#[derive(Debug, Default)]
pub struct ReceiveReport {
    /// Frames decoded and merged into the peer table
    pub received: usize,
    /// Frames dropped as malformed
    pub decode_errors: usize,
    pub alerts: Vec<AlertEvent>,
    pub evicted: Vec<Identity>,
    pub sync: Option<SyncReport>,
    /// Something a display would redraw for
    pub changed: bool,
}

// ============================================================================
// Snapshot (for rendering)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PeerSummary {
    pub identity: Identity,
    pub name: String,
    pub mode: Mode,
    pub topic: String,
    pub match_percent: u8,
    pub rssi: i16,
    pub signal_bars: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub mode: Mode,
    pub name: String,
    pub chat_peer: Option<Identity>,
    pub chat_peer_name: Option<String>,
    pub common: Vec<String>,
    pub cursor: Cursor,
    pub topic: Option<String>,
    pub contact_shared: bool,
    pub search_match: Option<SearchMatch>,
    pub peers: Vec<PeerSummary>,
}

// ============================================================================
// Session Context
// ============================================================================

/// All protocol state of one badge
#[derive(Debug)]
pub struct SessionContext {
    profile: LocalProfile,
    table: PeerTable,
    alerts: BadgeAlertFilter,
    engine: ConvergenceEngine,
    /// Present exactly while in CHAT
    chat: Option<ChatState>,
    /// Recommended peer for the next non-directed entry
    preselected: Option<Identity>,
    search_match: Option<SearchMatch>,
    broadcast_requested: bool,
}

impl SessionContext {
    pub fn new(profile: LocalProfile, policy: AdmissionPolicy) -> Self {
        SessionContext {
            table: PeerTable::new(profile.identity),
            profile,
            alerts: BadgeAlertFilter::new(),
            engine: ConvergenceEngine::new(policy),
            chat: None,
            preselected: None,
            search_match: None,
            broadcast_requested: false,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn mode(&self) -> Mode {
        if self.chat.is_some() {
            Mode::Chat
        } else {
            Mode::Search
        }
    }

    pub fn profile(&self) -> &LocalProfile {
        &self.profile
    }

    pub fn table(&self) -> &PeerTable {
        &self.table
    }

    pub fn chat(&self) -> Option<&ChatState> {
        self.chat.as_ref()
    }

    pub fn search_match(&self) -> Option<&SearchMatch> {
        self.search_match.as_ref()
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.engine.policy()
    }

    /// Consume a pending out-of-cycle broadcast request
    pub fn take_broadcast_request(&mut self) -> bool {
        std::mem::take(&mut self.broadcast_requested)
    }

    // ------------------------------------------------------------------
    // UI events
    // ------------------------------------------------------------------

    /// SEARCH -> CHAT. `directed` picks the closest peer and keeps the topic
    /// off the air. Returns false if already chatting.
    pub fn enter_chat(&mut self, directed: bool) -> bool {
        if self.chat.is_some() {
            return false;
        }

        let mine = &self.profile.interests;

        // A chatting badge on one of our interests, and the topic it shows
        let joined = if directed {
            None
        } else {
            self.table
                .strongest(|p| p.mode == Mode::Chat && contains_interest(mine, &p.topic))
                .map(|(id, p)| (id, p.topic.clone()))
        };

        let peer = if directed {
            self.table.closest_peer()
        } else {
            joined
                .as_ref()
                .map(|(id, _)| *id)
                .or(self.preselected)
                .or_else(|| self.table.closest_peer())
        };

        let common = peer
            .and_then(|id| self.table.get(&id))
            .map(|record| self.engine.common_interests(mine, record))
            .unwrap_or_default();

        let mut chat = ChatState::new(peer, common, directed);
        if let Some((_, topic)) = &joined {
            chat.point_at(topic);
        }

        match peer {
            Some(id) => log::info!(
                "Mode CHAT with {} ({}), common {:?}, showing {:?}",
                id,
                if directed { "directed" } else { "joined" },
                chat.common,
                chat.topic()
            ),
            None => log::info!("Mode CHAT with no peer in range"),
        }

        self.chat = Some(chat);
        self.preselected = None;
        self.search_match = None;
        self.broadcast_requested = true;
        true
    }

    /// CHAT -> SEARCH; clears every CHAT-scoped field. Returns false if
    /// already searching.
    pub fn exit_chat(&mut self) -> bool {
        if self.chat.take().is_none() {
            return false;
        }
        log::info!("Mode SEARCH");
        self.search_match = None;
        self.broadcast_requested = true;
        true
    }

    /// Show the next common interest on both badges
    pub fn advance_cursor(&mut self) -> bool {
        let advanced = match self.chat.as_mut() {
            Some(chat) => chat.advance(),
            None => false,
        };
        if advanced {
            self.broadcast_requested = true;
        }
        advanced
    }

    /// Share contact with the chat peer (idempotent, always re-broadcast)
    pub fn share_contact(&mut self) -> bool {
        match self.chat.as_mut() {
            Some(chat) => {
                if chat.share() {
                    log::info!("Contact shared");
                }
                self.broadcast_requested = true;
                true
            }
            None => false,
        }
    }

    /// Recommend a peer for the next non-directed chat entry (SEARCH only)
    pub fn select_peer(&mut self, identity: Identity) -> bool {
        if self.chat.is_some() || identity == self.profile.identity {
            return false;
        }
        self.preselected = Some(identity);
        true
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Merge one inbound frame. A decode error leaves all state untouched.
    pub fn ingest(
        &mut self,
        frame: InboundFrame,
        now: Instant,
    ) -> Result<(UpsertOutcome, Option<AlertEvent>), DecodeError> {
        let adv = decode(&frame.payload)?;

        let outcome = self.table.upsert(frame.sender, adv, frame.rssi, now);
        if outcome == UpsertOutcome::Ignored {
            return Ok((outcome, None));
        }

        let alert = self.table.get(&frame.sender).and_then(|record| {
            self.alerts
                .maybe_alert(frame.sender, record, &self.profile.interests)
        });

        Ok((outcome, alert))
    }

    /// Post-drain work: eviction, then chat sync or the search-match latch
    pub fn end_receive_cycle(&mut self, now: Instant, report: &mut ReceiveReport) {
        report.evicted = self.table.evict_stale(now);
        if !report.evicted.is_empty() {
            report.changed = true;
        }

        match self.chat.as_mut() {
            Some(chat) => {
                let sync = self.engine.run(
                    self.profile.identity,
                    &self.profile.interests,
                    chat,
                    &self.table,
                );
                report.changed |= sync.changed();
                report.sync = Some(sync);
            }
            None => {
                if self.search_match.is_none() {
                    self.search_match = self.best_shared_match();
                    if let Some(m) = &self.search_match {
                        log::info!("Shared topic '{}' with '{}' nearby", m.topic, m.peer_name);
                        report.changed = true;
                    }
                }
            }
        }
    }

    /// Drain everything queued on the radio, then run the post-drain work
    pub fn receive_all<T: Transport>(&mut self, transport: &mut T, now: Instant) -> ReceiveReport {
        let mut report = ReceiveReport::default();

        while let Some(frame) = transport.receive() {
            let sender = frame.sender;
            match self.ingest(frame, now) {
                Ok((outcome, alert)) => {
                    if outcome != UpsertOutcome::Ignored {
                        report.received += 1;
                    }
                    report.changed |= outcome.is_visible_change();
                    report.alerts.extend(alert);
                }
                Err(e) => {
                    log::debug!("Dropping packet from {}: {}", sender, e);
                    report.decode_errors += 1;
                }
            }
        }

        self.end_receive_cycle(now, &mut report);
        report
    }

    /// Strongest peer sharing a topic with us: a chat topic we share first,
    /// else the first of our interests they list
    fn best_shared_match(&self) -> Option<SearchMatch> {
        let mine = &self.profile.interests;
        self.table.by_signal().into_iter().find_map(|(_, peer)| {
            let topic = find_interest(mine, &peer.topic)
                .filter(|_| peer.mode == Mode::Chat)
                .or_else(|| first_common_interest(mine, &peer.interests))?;
            Some(SearchMatch {
                topic: topic.to_string(),
                peer_name: peer.name.clone(),
                rssi: peer.rssi,
                palette_slot: topic_palette_slot(topic),
            })
        })
    }

    // ------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------

    /// Advertisement describing the current state
    pub fn advertisement(&self) -> Advertisement {
        let (topic, target, contact_shared, cursor) = match &self.chat {
            Some(chat) => (
                chat.broadcast_topic(),
                chat.peer,
                chat.contact_shared,
                chat.cursor,
            ),
            None => (String::new(), None, false, Cursor::default()),
        };

        Advertisement {
            mode: self.mode(),
            name: self.profile.name.clone(),
            interests: self.profile.interests.clone(),
            topic,
            target,
            contact_shared,
            cursor,
        }
    }

    /// Everything a renderer needs, detached from the session
    pub fn snapshot(&self) -> SessionSnapshot {
        let chat = self.chat.as_ref();
        let chat_peer = chat.and_then(|c| c.peer);

        let peers = self
            .table
            .by_signal()
            .into_iter()
            .map(|(identity, p)| PeerSummary {
                identity,
                name: p.name.clone(),
                mode: p.mode,
                topic: p.topic.clone(),
                match_percent: match_interests(&self.profile.interests, &p.interests).percent,
                rssi: p.rssi,
                signal_bars: signal_bars(p.rssi),
            })
            .collect();

        SessionSnapshot {
            mode: self.mode(),
            name: self.profile.name.clone(),
            chat_peer,
            chat_peer_name: chat_peer
                .and_then(|id| self.table.get(&id))
                .map(|p| p.name.clone()),
            common: chat.map(|c| c.common.clone()).unwrap_or_default(),
            cursor: chat.map(|c| c.cursor).unwrap_or_default(),
            topic: chat.and_then(|c| c.topic()).map(str::to_string),
            contact_shared: chat.map(|c| c.contact_shared).unwrap_or(false),
            search_match: self.search_match.clone(),
            peers,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use std::time::Duration;

    const ME: Identity = Identity::new([0x05, 0, 0, 0, 0, 0]);
    const BOB: Identity = Identity::new([0x01, 0, 0, 0, 0, 0]);
    const CAROL: Identity = Identity::new([0x09, 0, 0, 0, 0, 0]);

    fn session(policy: AdmissionPolicy) -> SessionContext {
        SessionContext::new(LocalProfile::new(ME, "Me", &["python", "music", "chess"]), policy)
    }

    fn frame(sender: Identity, rssi: i16, text: &str) -> InboundFrame {
        InboundFrame {
            sender,
            payload: text.as_bytes().to_vec(),
            rssi,
        }
    }

    #[test]
    fn test_profile_normalization() {
        let p = LocalProfile::new(ME, "A very long badge name indeed", &[" rust ", "", "go"]);
        assert_eq!(p.name, "A very long badge na");
        assert_eq!(p.interests, vec!["rust", "go"]);
    }

    #[test]
    fn test_initial_state() {
        let mut s = session(AdmissionPolicy::MutualTarget);
        assert_eq!(s.mode(), Mode::Search);
        assert!(s.chat().is_none());
        assert!(!s.take_broadcast_request());

        let adv = s.advertisement();
        assert_eq!(adv.target, None);
        assert_eq!(adv.topic, "");
        assert_eq!(adv.cursor, Cursor::default());
        assert!(!adv.contact_shared);
    }

    #[test]
    fn test_decode_error_leaves_table_untouched() {
        let mut s = session(AdmissionPolicy::MutualTarget);
        let now = Instant::now();
        assert!(s.ingest(frame(BOB, -40, "1|Bob|x|x||0|zero|0"), now).is_err());
        assert!(s.table().is_empty());
    }

    #[test]
    fn test_directed_entry_picks_closest_and_stays_quiet() {
        let mut s = session(AdmissionPolicy::MutualTarget);
        let now = Instant::now();
        s.ingest(frame(BOB, -70, "0|Bob|python,music"), now).unwrap();
        s.ingest(frame(CAROL, -40, "0|Carol|chess,golf"), now).unwrap();

        assert!(s.enter_chat(true));
        assert!(!s.enter_chat(true));
        assert!(s.take_broadcast_request());

        let chat = s.chat().unwrap();
        assert_eq!(chat.peer, Some(CAROL));
        assert_eq!(chat.common, vec!["chess"]);
        assert_eq!(chat.cursor, Cursor::default());

        let adv = s.advertisement();
        assert_eq!(adv.mode, Mode::Chat);
        assert_eq!(adv.target, Some(CAROL));
        assert_eq!(adv.topic, "");
    }

    #[test]
    fn test_open_entry_prefers_chatting_peer_on_shared_topic() {
        let mut s = session(AdmissionPolicy::SharedTopic);
        let now = Instant::now();
        s.ingest(frame(CAROL, -30, "0|Carol|python"), now).unwrap();
        s.ingest(frame(BOB, -75, "1|Bob|music,golf|Music|0a0000000000|0|0|0"), now).unwrap();

        s.enter_chat(false);
        let chat = s.chat().unwrap();
        assert_eq!(chat.peer, Some(BOB));
        assert_eq!(chat.common, vec!["music"]);
        assert_eq!(s.advertisement().topic, "music");
    }

    #[test]
    fn test_open_entry_starts_on_joined_topic() {
        let mut s = session(AdmissionPolicy::SharedTopic);
        let now = Instant::now();
        s.ingest(frame(BOB, -40, "1|Bob|chess,python|python|0a0000000000|0|0|0"), now).unwrap();

        s.enter_chat(false);
        let chat = s.chat().unwrap();
        assert_eq!(chat.common, vec!["chess", "python"]);
        assert_eq!(chat.cursor, Cursor { index: 1, version: 0 });
        assert_eq!(s.advertisement().topic, "python");
    }

    #[test]
    fn test_entry_falls_back_to_preselected_then_closest() {
        let mut s = session(AdmissionPolicy::MutualTarget);
        let now = Instant::now();
        s.ingest(frame(CAROL, -30, "0|Carol|python"), now).unwrap();
        s.ingest(frame(BOB, -75, "0|Bob|music"), now).unwrap();

        assert!(s.select_peer(BOB));
        s.enter_chat(false);
        assert_eq!(s.chat().unwrap().peer, Some(BOB));

        s.exit_chat();
        s.enter_chat(false);
        assert_eq!(s.chat().unwrap().peer, Some(CAROL));
    }

    #[test]
    fn test_entry_without_peers_shows_no_peer_state() {
        let mut s = session(AdmissionPolicy::MutualTarget);
        assert!(s.enter_chat(false));
        let chat = s.chat().unwrap();
        assert_eq!(chat.peer, None);
        assert!(chat.common.is_empty());
        assert!(!s.advance_cursor());

        let snap = s.snapshot();
        assert_eq!(snap.chat_peer, None);
        assert_eq!(snap.topic, None);
    }

    #[test]
    fn test_exit_clears_chat_fields() {
        let mut s = session(AdmissionPolicy::MutualTarget);
        let now = Instant::now();
        s.ingest(frame(BOB, -40, "0|Bob|python,music"), now).unwrap();
        s.enter_chat(true);
        s.advance_cursor();
        s.share_contact();
        s.take_broadcast_request();

        assert!(s.exit_chat());
        assert!(!s.exit_chat());
        assert!(s.take_broadcast_request());
        assert_eq!(s.mode(), Mode::Search);

        let adv = s.advertisement();
        assert_eq!(adv.target, None);
        assert!(!adv.contact_shared);
        assert_eq!(adv.cursor, Cursor::default());

        // Re-entry starts from scratch
        s.enter_chat(true);
        let chat = s.chat().unwrap();
        assert_eq!(chat.cursor, Cursor::default());
        assert!(!chat.contact_shared);
    }

    #[test]
    fn test_advance_and_share_only_in_chat() {
        let mut s = session(AdmissionPolicy::MutualTarget);
        assert!(!s.advance_cursor());
        assert!(!s.share_contact());
        assert!(!s.take_broadcast_request());

        let now = Instant::now();
        s.ingest(frame(BOB, -40, "0|Bob|python,music"), now).unwrap();
        s.enter_chat(true);
        s.take_broadcast_request();

        assert!(s.advance_cursor());
        assert!(s.take_broadcast_request());
        assert_eq!(s.chat().unwrap().cursor, Cursor { index: 1, version: 1 });

        assert!(s.share_contact());
        assert!(s.share_contact());
        assert!(s.take_broadcast_request());
        assert!(s.advertisement().contact_shared);
    }

    #[test]
    fn test_select_peer_rejected_in_chat_or_for_self() {
        let mut s = session(AdmissionPolicy::MutualTarget);
        assert!(!s.select_peer(ME));
        s.enter_chat(true);
        assert!(!s.select_peer(BOB));
    }

    #[test]
    fn test_search_match_latches_until_chat() {
        let mut s = session(AdmissionPolicy::MutualTarget);
        let t0 = Instant::now();
        let mut report = ReceiveReport::default();

        s.ingest(frame(BOB, -60, "0|Bob|golf,Chess"), t0).unwrap();
        s.end_receive_cycle(t0, &mut report);
        let latched = s.search_match().cloned().unwrap();
        assert_eq!(latched.topic, "chess");
        assert_eq!(latched.peer_name, "Bob");
        assert!(report.changed);

        // A stronger match later does not replace the latch
        s.ingest(frame(CAROL, -20, "0|Carol|python"), t0).unwrap();
        s.end_receive_cycle(t0, &mut ReceiveReport::default());
        assert_eq!(s.search_match(), Some(&latched));

        s.enter_chat(true);
        assert!(s.search_match().is_none());
    }

    #[test]
    fn test_receive_cycle_evicts_and_counts() {
        struct Queue(Vec<InboundFrame>);
        impl Transport for Queue {
            fn send(&mut self, _: &[u8]) -> Result<(), crate::transport::SendError> {
                Ok(())
            }
            fn receive(&mut self) -> Option<InboundFrame> {
                self.0.pop()
            }
        }

        let mut s = session(AdmissionPolicy::MutualTarget);
        let t0 = Instant::now();
        let mut radio = Queue(vec![
            frame(BOB, -40, "0|Bob|python"),
            frame(CAROL, -40, "garbage"),
            frame(ME, -10, "0|Me|python"),
        ]);

        let report = s.receive_all(&mut radio, t0);
        assert_eq!(report.received, 1);
        assert_eq!(report.decode_errors, 1);
        assert_eq!(report.alerts.len(), 1);
        assert!(report.changed);
        assert_eq!(s.table().len(), 1);

        let later = s.receive_all(&mut Queue(vec![]), t0 + Duration::from_secs(15));
        assert_eq!(later.evicted, vec![BOB]);
        assert!(s.table().is_empty());
    }

    #[test]
    fn test_advertisement_carries_chat_state() {
        let mut s = session(AdmissionPolicy::MutualTarget);
        let now = Instant::now();
        s.ingest(frame(BOB, -40, "0|Bob|python,music"), now).unwrap();
        s.enter_chat(false);
        s.advance_cursor();

        let text = String::from_utf8(encode(&s.advertisement())).unwrap();
        assert_eq!(text, "1|Me|python,music,chess|python|010000000000|0|1|1");
    }

    #[test]
    fn test_snapshot_lists_peers_by_signal() {
        let mut s = session(AdmissionPolicy::MutualTarget);
        let now = Instant::now();
        s.ingest(frame(BOB, -80, "0|Bob|python"), now).unwrap();
        s.ingest(frame(CAROL, -45, "0|Carol|golf"), now).unwrap();

        let snap = s.snapshot();
        assert_eq!(snap.mode, Mode::Search);
        assert_eq!(snap.peers.len(), 2);
        assert_eq!(snap.peers[0].name, "Carol");
        assert_eq!(snap.peers[0].signal_bars, 3);
        assert_eq!(snap.peers[1].match_percent, 33);
    }
}
