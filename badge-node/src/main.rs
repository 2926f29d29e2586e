//! Badge Node
//!
//! Runs one badge of the common-interests protocol:
//! - Broadcasts its advertisement over an emulated radio (UDP)
//! - Tracks nearby badges, fires match alerts, keeps chat in sync
//! - Takes button presses on a local control socket
//! - Logs a JSON snapshot for the display whenever something changes

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use badge_protocol::{
    BroadcastOutcome, BroadcastScheduler, LocalProfile, ReceiveReport, SessionContext,
};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use ring::rand::SystemRandom;

mod config;
mod control;
mod metrics;
mod radio;

use config::NodeConfig;
use control::{Command, ControlSocket};
use metrics::Metrics;
use radio::UdpRadio;

// ============================================================================
// Constants
// ============================================================================

/// mio token for the radio socket
const RADIO_TOKEN: Token = Token(0);

/// mio token for the UI command socket
const CONTROL_TOKEN: Token = Token(1);

/// mio token for the metrics listener
const METRICS_TOKEN: Token = Token(2);

/// Upper bound on a poll wait, so eviction runs without traffic
const MAX_POLL_WAIT: Duration = Duration::from_millis(250);

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let args: Vec<String> = std::env::args().collect();
    let config = NodeConfig::load(&args)?;
    let identity = config.identity(&SystemRandom::new())?;

    log::info!("Badge node starting...");
    log::info!("  Identity:  {}", identity);
    log::info!("  Name:      {}", config.name);
    log::info!("  Interests: {:?}", config.interest_list());
    log::info!("  Channel:   {}", config.channel);
    log::info!("  Admission: {:?}", config.admission);

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))?;

    let mut node = Node::new(&config, identity, shutdown)?;
    let result = node.run();

    log::info!("Final metrics:\n{}", node.metrics.render());
    if let Err(e) = &result {
        log::error!("Badge node halted: {}", e);
    }
    result
}

// ============================================================================
// Node Structure
// ============================================================================

struct Node {
    /// mio poll instance
    poll: Poll,
    radio: UdpRadio,
    control: ControlSocket,
    metrics_listener: Option<TcpListener>,
    session: SessionContext,
    scheduler: BroadcastScheduler,
    metrics: Metrics,
    /// Set by SIGTERM/SIGINT
    shutdown: Arc<AtomicBool>,
}

impl Node {
    fn new(
        config: &NodeConfig,
        identity: badge_protocol::Identity,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let poll = Poll::new()?;

        let mut radio = UdpRadio::open(
            identity,
            config.channel,
            config.signal_dbm,
            config.broadcast_ip,
        )?;
        radio.register(poll.registry(), RADIO_TOKEN)?;

        let mut control = ControlSocket::bind(config.control)?;
        control.register(poll.registry(), CONTROL_TOKEN)?;

        let metrics_listener = match config.metrics {
            Some(addr) => {
                let mut listener = TcpListener::bind(addr)?;
                poll.registry()
                    .register(&mut listener, METRICS_TOKEN, Interest::READABLE)?;
                log::info!("Metrics on http://{}/metrics", listener.local_addr()?);
                Some(listener)
            }
            None => None,
        };

        let profile = LocalProfile::new(identity, &config.name, &config.interest_list());

        Ok(Node {
            poll,
            radio,
            control,
            metrics_listener,
            session: SessionContext::new(profile, config.admission),
            scheduler: BroadcastScheduler::new(),
            metrics: Metrics::new(),
            shutdown,
        })
    }

    fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut events = Events::with_capacity(64);

        while !self.shutdown.load(Ordering::Relaxed) {
            let timeout = self
                .scheduler
                .time_until_due(Instant::now())
                .min(MAX_POLL_WAIT);

            match self.poll.poll(&mut events, Some(timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let mut changed = false;
            for event in events.iter() {
                match event.token() {
                    CONTROL_TOKEN => changed |= self.process_control(),
                    METRICS_TOKEN => self.process_metrics(),
                    // Drained every iteration below
                    RADIO_TOKEN => {}
                    _ => {}
                }
            }

            changed |= self.tick(Instant::now());
            if changed {
                self.log_snapshot();
            }
        }

        log::info!("Shutting down");
        Ok(())
    }

    /// Apply pending button presses
    fn process_control(&mut self) -> bool {
        let mut changed = false;
        for (command, from) in self.control.drain() {
            match command {
                Command::Status => match serde_json::to_vec(&self.session.snapshot()) {
                    Ok(body) => self.control.reply(from, &body),
                    Err(e) => log::warn!("Failed to serialize status for {}: {}", from, e),
                },
                cmd => changed |= cmd.apply(&mut self.session),
            }
        }
        changed
    }

    /// One pass of receive, evict, sync, broadcast
    fn tick(&mut self, now: Instant) -> bool {
        let report = self.session.receive_all(&mut self.radio, now);
        self.record(&report);

        match self.scheduler.poll(now, &mut self.session, &mut self.radio) {
            BroadcastOutcome::Sent => {
                self.metrics.frames_sent_total.fetch_add(1, Ordering::Relaxed);
            }
            BroadcastOutcome::Failed => {
                self.metrics.send_failures_total.fetch_add(1, Ordering::Relaxed);
            }
            BroadcastOutcome::Idle => {}
        }

        report.changed
    }

    fn record(&self, report: &ReceiveReport) {
        let m = &self.metrics;
        m.frames_received_total
            .fetch_add(report.received as u64, Ordering::Relaxed);
        m.decode_errors_total
            .fetch_add(report.decode_errors as u64, Ordering::Relaxed);
        m.alerts_total
            .fetch_add(report.alerts.len() as u64, Ordering::Relaxed);
        m.peers_evicted_total
            .fetch_add(report.evicted.len() as u64, Ordering::Relaxed);
        m.peers
            .store(self.session.table().len() as u64, Ordering::Relaxed);

        for alert in &report.alerts {
            match serde_json::to_string(alert) {
                Ok(json) => log::info!("ALERT {}", json),
                Err(e) => log::warn!("Failed to serialize alert: {}", e),
            }
        }
    }

    fn log_snapshot(&self) {
        match serde_json::to_string(&self.session.snapshot()) {
            Ok(json) => log::info!("STATE {}", json),
            Err(e) => log::warn!("Failed to serialize snapshot: {}", e),
        }
    }

    /// Answer every pending scrape
    fn process_metrics(&self) {
        if let Some(listener) = &self.metrics_listener {
            metrics::serve_pending(|| listener.accept(), &self.metrics);
        }
    }
}
