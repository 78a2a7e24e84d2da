use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::models::packet::PacketSummary;

/// Per-subscriber queue depth; a subscriber that cannot keep up is dropped
const SUBSCRIBER_QUEUE: usize = 64;

/// JSON frames sent to WebSocket subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsEnvelope {
    #[serde(rename = "packet")]
    Packet { data: PacketSummary },

    #[serde(rename = "system")]
    System { message: String },

    #[serde(rename = "stats")]
    Stats { data: LiveStats },
}

/// Periodic live-capture statistics frame
#[derive(Debug, Clone, Serialize)]
pub struct LiveStats {
    pub total_packets: u64,
    pub gateway_packets: u64,
    pub gateway_percentage: f64,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out of text frames to any number of WebSocket subscribers.
///
/// Sends are non-blocking: a subscriber whose queue is full or whose
/// connection task is gone is removed during the broadcast instead of
/// stalling the others.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: DashMap<u64, mpsc::Sender<String>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; the returned receiver feeds its connection.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn remove(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Send a pre-serialized frame to every subscriber, dropping the ones
    /// that fail.
    pub fn broadcast_text(&self, text: &str) {
        self.subscribers
            .retain(|_, tx| tx.try_send(text.to_string()).is_ok());
    }

    /// Serialize and broadcast an envelope.
    pub fn broadcast(&self, envelope: &WsEnvelope) {
        if self.subscribers.is_empty() {
            return;
        }
        match serde_json::to_string(envelope) {
            Ok(text) => self.broadcast_text(&text),
            Err(err) => log::error!("Could not serialize WebSocket frame: {}", err),
        }
    }
}
