//! Broadcast scheduling
//!
//! The current advertisement goes out every [`BROADCAST_INTERVAL`], and
//! immediately after any state-mutating user action (mode change, cursor
//! advance, contact share). Send failures are swallowed; the next periodic
//! tick is the retry.

use std::time::{Duration, Instant};

use crate::codec::encode;
use crate::session::SessionContext;
use crate::transport::Transport;

/// Period of unconditional advertisement broadcasts
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(2);

/// What a scheduler poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Nothing due
    Idle,
    /// Advertisement handed to the radio
    Sent,
    /// The radio refused it; retried on the next tick
    Failed,
}

/// Periodic + edge-triggered broadcaster
#[derive(Debug)]
pub struct BroadcastScheduler {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl BroadcastScheduler {
    pub fn new() -> Self {
        Self::with_interval(BROADCAST_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        BroadcastScheduler {
            interval,
            last_sent: None,
        }
    }

    /// True if the periodic broadcast is due at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_sent {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Time left until the next periodic broadcast
    pub fn time_until_due(&self, now: Instant) -> Duration {
        match self.last_sent {
            None => Duration::ZERO,
            Some(last) => (last + self.interval).saturating_duration_since(now),
        }
    }

    /// Broadcast if the period elapsed or the session asked for an immediate send
    pub fn poll<T: Transport>(
        &mut self,
        now: Instant,
        session: &mut SessionContext,
        transport: &mut T,
    ) -> BroadcastOutcome {
        let requested = session.take_broadcast_request();
        if !requested && !self.is_due(now) {
            return BroadcastOutcome::Idle;
        }

        let payload = encode(&session.advertisement());
        self.last_sent = Some(now);

        match transport.send(&payload) {
            Ok(()) => {
                log::trace!(
                    "Broadcast {} bytes ({})",
                    payload.len(),
                    if requested { "immediate" } else { "periodic" }
                );
                BroadcastOutcome::Sent
            }
            Err(e) => {
                log::debug!("Broadcast failed: {}", e);
                BroadcastOutcome::Failed
            }
        }
    }
}

impl Default for BroadcastScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, Mode};
    use crate::convergence::AdmissionPolicy;
    use crate::identity::Identity;
    use crate::session::LocalProfile;
    use crate::transport::{InboundFrame, SendError};

    #[derive(Default)]
    struct RecordingRadio {
        sent: Vec<Vec<u8>>,
        fail: bool,
    }

    impl Transport for RecordingRadio {
        fn send(&mut self, payload: &[u8]) -> Result<(), SendError> {
            if self.fail {
                return Err(SendError::Busy);
            }
            self.sent.push(payload.to_vec());
            Ok(())
        }

        fn receive(&mut self) -> Option<InboundFrame> {
            None
        }
    }

    fn session() -> SessionContext {
        SessionContext::new(
            LocalProfile::new(Identity::new([1; 6]), "Ada", &["python"]),
            AdmissionPolicy::MutualTarget,
        )
    }

    #[test]
    fn test_periodic_broadcast() {
        let mut scheduler = BroadcastScheduler::new();
        let mut session = session();
        let mut radio = RecordingRadio::default();
        let t0 = Instant::now();

        assert_eq!(scheduler.poll(t0, &mut session, &mut radio), BroadcastOutcome::Sent);
        assert_eq!(
            scheduler.poll(t0 + Duration::from_millis(1999), &mut session, &mut radio),
            BroadcastOutcome::Idle
        );
        assert_eq!(
            scheduler.poll(t0 + BROADCAST_INTERVAL, &mut session, &mut radio),
            BroadcastOutcome::Sent
        );
        assert_eq!(radio.sent.len(), 2);
        assert_eq!(decode(&radio.sent[0]).unwrap().mode, Mode::Search);
    }

    #[test]
    fn test_state_change_broadcasts_immediately() {
        let mut scheduler = BroadcastScheduler::new();
        let mut session = session();
        let mut radio = RecordingRadio::default();
        let t0 = Instant::now();

        scheduler.poll(t0, &mut session, &mut radio);
        session.enter_chat(true);
        assert_eq!(
            scheduler.poll(t0 + Duration::from_millis(10), &mut session, &mut radio),
            BroadcastOutcome::Sent
        );
        assert_eq!(decode(&radio.sent[1]).unwrap().mode, Mode::Chat);

        // Request consumed
        assert_eq!(
            scheduler.poll(t0 + Duration::from_millis(20), &mut session, &mut radio),
            BroadcastOutcome::Idle
        );
    }

    #[test]
    fn test_send_failure_is_swallowed_and_retried_next_tick() {
        let mut scheduler = BroadcastScheduler::new();
        let mut session = session();
        let mut radio = RecordingRadio {
            fail: true,
            ..Default::default()
        };
        let t0 = Instant::now();

        assert_eq!(scheduler.poll(t0, &mut session, &mut radio), BroadcastOutcome::Failed);
        assert_eq!(
            scheduler.poll(t0 + Duration::from_millis(500), &mut session, &mut radio),
            BroadcastOutcome::Idle
        );

        radio.fail = false;
        assert_eq!(
            scheduler.poll(t0 + BROADCAST_INTERVAL, &mut session, &mut radio),
            BroadcastOutcome::Sent
        );
    }

    #[test]
    fn test_time_until_due() {
        let mut scheduler = BroadcastScheduler::new();
        let mut session = session();
        let mut radio = RecordingRadio::default();
        let t0 = Instant::now();

        assert_eq!(scheduler.time_until_due(t0), Duration::ZERO);
        scheduler.poll(t0, &mut session, &mut radio);
        assert_eq!(
            scheduler.time_until_due(t0 + Duration::from_millis(500)),
            Duration::from_millis(1500)
        );
    }
}
