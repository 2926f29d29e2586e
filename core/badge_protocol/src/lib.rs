//! Badge Protocol
//!
//! Common-interest discovery and chat synchronization for badges that share
//! a broadcast radio. Every badge periodically advertises its name, interests
//! and session state; everything else is derived from what is overheard.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    Badge Protocol Structure                    │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                                │
//! │  codec.rs       - Pipe-delimited advertisement wire format     │
//! │  matcher.rs     - Case-insensitive interest overlap            │
//! │  peer_table.rs  - Nearby peers with timeout eviction           │
//! │  alert.rs       - One-shot "badge match" notifications         │
//! │  convergence.rs - Shared cursor and contact sync               │
//! │  session.rs     - SEARCH/CHAT state machine                    │
//! │  scheduler.rs   - Periodic and immediate broadcasts            │
//! │  transport.rs   - Radio seam                                   │
//! │                                                                │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Loop
//!
//! The host drives one [`SessionContext`] from a single loop:
//!
//! 1. apply UI events ([`SessionContext::enter_chat`], ...)
//! 2. [`SessionContext::receive_all`] drains the radio, evicts and syncs
//! 3. [`BroadcastScheduler::poll`] sends the advertisement when due

pub mod alert;
pub mod codec;
pub mod convergence;
pub mod identity;
pub mod matcher;
pub mod peer_table;
pub mod scheduler;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use alert::{AlertEvent, AlertStrength, BadgeAlertFilter, RSSI_ALERT_THRESHOLD};
pub use codec::{decode, encode, Advertisement, DecodeError, Mode, MAX_MESSAGE_LEN};
pub use convergence::{AdmissionPolicy, ChatState, ConvergenceEngine, Cursor, SyncReport};
pub use identity::{Identity, IdentityError, IDENTITY_LEN};
pub use matcher::{match_interests, topic_palette_slot, InterestMatch};
pub use peer_table::{signal_bars, PeerRecord, PeerTable, PEER_TIMEOUT};
pub use scheduler::{BroadcastOutcome, BroadcastScheduler, BROADCAST_INTERVAL};
pub use session::{LocalProfile, ReceiveReport, SearchMatch, SessionContext, SessionSnapshot};
pub use transport::{InboundFrame, SendError, Transport};
