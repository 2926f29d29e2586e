//! Lightweight Prometheus-compatible metrics for the badge node.
//!
//! Uses atomic counters for lock-free instrumentation. Renders metrics in
//! Prometheus text exposition format for scraping on the metrics endpoint.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lightweight Prometheus-compatible metrics for the badge node.
pub struct Metrics {
    /// Advertisements handed to the radio (counter)
    pub frames_sent_total: AtomicU64,
    /// Broadcasts the radio refused (counter)
    pub send_failures_total: AtomicU64,
    /// Advertisements decoded from peers (counter)
    pub frames_received_total: AtomicU64,
    /// Payloads dropped as malformed (counter)
    pub decode_errors_total: AtomicU64,
    /// Badge match alerts fired (counter)
    pub alerts_total: AtomicU64,
    /// Peers removed after going silent (counter)
    pub peers_evicted_total: AtomicU64,
    /// Peers currently in the table (gauge)
    pub peers: AtomicU64,
    /// Node start time (for uptime calculation)
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_sent_total: AtomicU64::new(0),
            send_failures_total: AtomicU64::new(0),
            frames_received_total: AtomicU64::new(0),
            decode_errors_total: AtomicU64::new(0),
            alerts_total: AtomicU64::new(0),
            peers_evicted_total: AtomicU64::new(0),
            peers: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let uptime = self.start_time.elapsed().as_secs();
        format!(
            "# HELP badge_frames_sent_total Advertisements broadcast\n\
             # TYPE badge_frames_sent_total counter\n\
             badge_frames_sent_total {}\n\
             # HELP badge_send_failures_total Broadcasts refused by the radio\n\
             # TYPE badge_send_failures_total counter\n\
             badge_send_failures_total {}\n\
             # HELP badge_frames_received_total Advertisements received from peers\n\
             # TYPE badge_frames_received_total counter\n\
             badge_frames_received_total {}\n\
             # HELP badge_decode_errors_total Malformed payloads dropped\n\
             # TYPE badge_decode_errors_total counter\n\
             badge_decode_errors_total {}\n\
             # HELP badge_alerts_total Badge match alerts fired\n\
             # TYPE badge_alerts_total counter\n\
             badge_alerts_total {}\n\
             # HELP badge_peers_evicted_total Peers timed out\n\
             # TYPE badge_peers_evicted_total counter\n\
             badge_peers_evicted_total {}\n\
             # HELP badge_peers Peers currently in range\n\
             # TYPE badge_peers gauge\n\
             badge_peers {}\n\
             # HELP badge_uptime_seconds Node uptime in seconds\n\
             # TYPE badge_uptime_seconds gauge\n\
             badge_uptime_seconds {}\n",
            self.frames_sent_total.load(Ordering::Relaxed),
            self.send_failures_total.load(Ordering::Relaxed),
            self.frames_received_total.load(Ordering::Relaxed),
            self.decode_errors_total.load(Ordering::Relaxed),
            self.alerts_total.load(Ordering::Relaxed),
            self.peers_evicted_total.load(Ordering::Relaxed),
            self.peers.load(Ordering::Relaxed),
            uptime,
        )
    }

    /// Render as a minimal HTTP/1.0 response
    pub fn http_response(&self) -> String {
        let body = self.render();
        format!(
            "HTTP/1.0 200 OK\r\n\
             Content-Type: text/plain; version=0.0.4\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }
}

/// Answer every connection `accept` has ready; returns how many got a
/// response. Accept and stream errors are logged, never returned.
pub fn serve_pending<S, A>(mut accept: A, metrics: &Metrics) -> usize
where
    S: Read + Write,
    A: FnMut() -> io::Result<(S, SocketAddr)>,
{
    let mut served = 0;
    loop {
        let (mut stream, from) = match accept() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            // Client gave up before we got to it
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionAborted | io::ErrorKind::Interrupted
                ) =>
            {
                log::debug!("Metrics accept: {}", e);
                continue;
            }
            Err(e) => {
                log::warn!("Metrics accept failed: {}", e);
                break;
            }
        };

        // Request content is irrelevant; read what has arrived so the close
        // is not a reset
        let mut request = [0u8; 1024];
        match stream.read(&mut request) {
            Ok(n) => log::trace!("Metrics request from {} ({} bytes)", from, n),
            Err(e) => log::trace!("Metrics request from {} unread: {}", from, e),
        }

        match stream.write_all(metrics.http_response().as_bytes()) {
            Ok(()) => served += 1,
            Err(e) => log::debug!("Metrics scrape from {} failed: {}", from, e),
        }
    }
    served
}
