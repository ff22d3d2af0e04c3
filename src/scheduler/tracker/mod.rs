//! Behavior tracking
//!
//! Recording calls are cheap and non-blocking: they validate the event, then
//! push it onto a bounded intake channel with a short send timeout. When the
//! channel stays full past the timeout the event is dropped and counted, never
//! surfaced as an error. A background drain thread applies events to their
//! sessions in batches and periodically sweeps idle sessions out of the map.

pub mod session;

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded, select, tick};
use dashmap::DashMap;

use crate::scheduler::config::TrackerConfig;
use crate::scheduler::error::SchedulerError;
use crate::scheduler::events::{
    BehaviorEvent, Direction, Interaction, InteractionKind, ScrollEvent, WatchEvent, now_nanos,
};
use crate::scheduler::stats::EngineStats;

pub use session::{Session, SessionSnapshot, SessionStats};

type SessionMap = Arc<DashMap<String, Arc<Mutex<Session>>>>;

/// Event intake and session bookkeeping
pub struct BehaviorTracker {
    config: TrackerConfig,
    sessions: SessionMap,
    intake_tx: Sender<(String, BehaviorEvent)>,
    stats: Arc<EngineStats>,
    quit_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl BehaviorTracker {
    pub fn spawn(config: TrackerConfig, stats: Arc<EngineStats>) -> Self {
        let sessions: SessionMap = Arc::new(DashMap::new());
        let (intake_tx, intake_rx) = bounded(config.event_buffer_size);
        let (quit_tx, quit_rx) = bounded::<()>(1);

        let loop_config = config.clone();
        let loop_sessions = Arc::clone(&sessions);
        let loop_stats = Arc::clone(&stats);
        let handle = std::thread::spawn(move || {
            drain_loop(loop_config, loop_sessions, loop_stats, intake_rx, quit_rx);
        });

        Self {
            config,
            sessions,
            intake_tx,
            stats,
            quit_tx,
            handle: Some(handle),
        }
    }

    /// Record a scroll from one reel to another.
    ///
    /// Err only for invalid event data; a full intake queue drops the event
    /// silently apart from the warning and the counter.
    pub fn record_scroll(
        &self,
        user_id: &str,
        from_reel: u64,
        to_reel: u64,
        direction: Direction,
        duration_secs: f64,
    ) -> Result<(), SchedulerError> {
        if !self.config.enable_scroll_tracking {
            return Ok(());
        }
        let event = ScrollEvent::new(from_reel, to_reel, direction, duration_secs)?;
        self.submit(user_id, BehaviorEvent::Scroll(event));
        Ok(())
    }

    /// Record a reel viewing
    pub fn record_watch(
        &self,
        user_id: &str,
        reel_id: u64,
        watch_secs: f64,
        completed: bool,
        position: f64,
    ) -> Result<(), SchedulerError> {
        if !self.config.enable_watch_tracking {
            return Ok(());
        }
        let event = WatchEvent::new(reel_id, watch_secs, completed, position)?;
        self.submit(user_id, BehaviorEvent::Watch(event));
        Ok(())
    }

    /// Record a like/comment/share/save action
    pub fn record_interaction(
        &self,
        user_id: &str,
        reel_id: u64,
        kind: InteractionKind,
        payload: serde_json::Value,
    ) -> Result<(), SchedulerError> {
        if !self.config.enable_interaction_tracking {
            return Ok(());
        }
        let event = Interaction::new(reel_id, kind, payload);
        self.submit(user_id, BehaviorEvent::Interaction(event));
        Ok(())
    }

    fn submit(&self, user_id: &str, event: BehaviorEvent) {
        let message = (user_id.to_string(), event);
        match self
            .intake_tx
            .send_timeout(message, self.config.enqueue_timeout)
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Disconnected(_)) => {
                self.stats.record_event_dropped();
                log::warn!("behavior intake full, dropped event for {}", user_id);
            }
        }
    }

    /// Session handle for `user_id`, created on first access
    pub fn session(&self, user_id: &str) -> Arc<Mutex<Session>> {
        session_for(&self.sessions, user_id)
    }

    /// Point-in-time copy of the user's window; empty if the user is unknown
    pub fn snapshot(&self, user_id: &str) -> SessionSnapshot {
        match self.sessions.get(user_id) {
            Some(entry) => match entry.value().lock() {
                Ok(session) => session.snapshot(),
                Err(poisoned) => poisoned.into_inner().snapshot(),
            },
            None => SessionSnapshot::empty(user_id),
        }
    }

    /// Aggregate counters for one session, None if the user is unknown
    pub fn session_stats(&self, user_id: &str) -> Option<SessionStats> {
        let entry = self.sessions.get(user_id)?;
        let stats = match entry.value().lock() {
            Ok(session) => session.stats(),
            Err(poisoned) => poisoned.into_inner().stats(),
        };
        Some(stats)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Signal the drain loop and join it
    pub fn shutdown(&mut self) {
        let _ = self.quit_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BehaviorTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn session_for(sessions: &SessionMap, user_id: &str) -> Arc<Mutex<Session>> {
    if let Some(entry) = sessions.get(user_id) {
        return Arc::clone(entry.value());
    }
    sessions
        .entry(user_id.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(Session::new(user_id))))
        .clone()
}

fn drain_loop(
    config: TrackerConfig,
    sessions: SessionMap,
    stats: Arc<EngineStats>,
    intake_rx: Receiver<(String, BehaviorEvent)>,
    quit_rx: Receiver<()>,
) {
    let drain_ticker = tick(config.drain_interval);
    let sweep_ticker = tick(config.sweep_interval);

    loop {
        select! {
            recv(drain_ticker) -> _ => {
                for _ in 0..config.drain_batch_size {
                    let Ok((user_id, event)) = intake_rx.try_recv() else { break };
                    apply(&config, &sessions, &user_id, event);
                    stats.record_event_processed();
                }
            }
            recv(sweep_ticker) -> _ => sweep(&config, &sessions),
            recv(quit_rx) -> _ => break,
        }
    }
}

fn apply(config: &TrackerConfig, sessions: &SessionMap, user_id: &str, event: BehaviorEvent) {
    let session = session_for(sessions, user_id);
    let mut session = match session.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match event {
        BehaviorEvent::Scroll(e) => session.apply_scroll(e, config),
        BehaviorEvent::Watch(e) => session.apply_watch(e, config),
        BehaviorEvent::Interaction(e) => session.apply_interaction(e, config),
    }
}

/// Evict sessions idle past the configured timeout
fn sweep(config: &TrackerConfig, sessions: &SessionMap) {
    let now = now_nanos();
    let timeout_ns = config.session_timeout.as_nanos() as u64;
    let before = sessions.len();

    sessions.retain(|_, session| {
        let last_activity = match session.lock() {
            Ok(guard) => guard.last_activity_ns,
            Err(poisoned) => poisoned.into_inner().last_activity_ns,
        };
        now.saturating_sub(last_activity) < timeout_ns
    });

    let evicted = before.saturating_sub(sessions.len());
    if evicted > 0 {
        log::debug!("swept {} idle sessions", evicted);
    }
}
