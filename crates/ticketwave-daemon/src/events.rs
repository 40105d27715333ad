//! Operator event feed.
//!
//! Wave transitions, uploads, delivery runs, delivery notices, invite
//! redemptions and broadcasts are published here. RPC clients poll the bounded history by sequence number.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use ticketwave_types::now_millis;

/// An event emitted by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    /// Event type name (e.g. "WaveActivated", "DeliveryFinished").
    pub event_type: String,
    /// Unix millis.
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

impl Event {
    /// "wave", "tickets", "delivery", "users" or "system".
    pub fn category(&self) -> &'static str {
        categorize_event(&self.event_type)
    }
}

/// Sequenced, bounded event history.
#[derive(Clone)]
pub struct EventBus {
    sequence: Arc<AtomicU64>,
    history: Arc<Mutex<VecDeque<Event>>>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus keeping at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sequence: Arc::new(AtomicU64::new(0)),
            history: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Record an event and return its sequence number.
    pub fn emit(&self, event_type: &str, payload: serde_json::Value) -> u64 {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event {
            seq,
            event_type: event_type.to_string(),
            timestamp: now_millis(),
            payload,
        };
        {
            let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(event);
        }
        tracing::debug!(seq, event_type, "event emitted");
        seq
    }

    /// Get the current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Retained events with `seq > after`, optionally limited to one category.
    pub fn since(&self, after: u64, category: Option<&str>) -> Vec<Event> {
        let history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        history
            .iter()
            .filter(|e| e.seq > after)
            .filter(|e| category.map_or(true, |c| e.category() == c))
            .cloned()
            .collect()
    }
}

fn categorize_event(event_type: &str) -> &'static str {
    match event_type {
        s if s.starts_with("Wave") => "wave",
        s if s.starts_with("Tickets") || s.starts_with("Archive") => "tickets",
        s if s.starts_with("Delivery")
            || s.starts_with("Recipient")
            || s.starts_with("Ticket")
            || s.starts_with("Pool")
            || s.starts_with("Broadcast") =>
        {
            "delivery"
        }
        s if s.starts_with("Invite") || s.starts_with("User") => "users",
        _ => "system",
    }
}
