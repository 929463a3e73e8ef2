use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use voxbus_core::topics::action;

/// Which way an envelope crossed the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    ToEngine,
    FromEngine,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficRecord {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub topic: String,
    pub action: String,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    pub payload_bytes: usize,
}

#[derive(Clone, Debug, Default)]
pub struct TrafficQuery {
    pub direction: Option<Direction>,
    pub topic: Option<String>,
    pub limit: Option<usize>,
}

/// Bounded in-memory log of recent envelopes, newest last.
pub struct TrafficLog {
    capacity: usize,
    entries: Mutex<VecDeque<TrafficRecord>>,
}

impl TrafficLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(
        &self,
        direction: Direction,
        topic: &str,
        action: &str,
        message_id: &str,
        reply_to_id: Option<&str>,
        payload_bytes: usize,
    ) {
        // Buffered-byte polling would drown everything else.
        if action == action::audio_output::GET_NUM_BYTES_BUFFERED {
            return;
        }
        tracing::trace!(
            target: "voxbus::traffic",
            ?direction,
            topic,
            action,
            message_id,
            reply_to_id,
            payload_bytes,
            "envelope"
        );
        let record = TrafficRecord {
            timestamp: Utc::now(),
            direction,
            topic: topic.to_owned(),
            action: action.to_owned(),
            message_id: message_id.to_owned(),
            reply_to_id: reply_to_id.map(str::to_owned),
            payload_bytes,
        };
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            let _ = entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Matching records, newest first.
    pub fn query(&self, q: &TrafficQuery) -> Vec<TrafficRecord> {
        let entries = self.entries.lock();
        entries
            .iter()
            .rev()
            .filter(|r| q.direction.map_or(true, |d| d == r.direction))
            .filter(|r| q.topic.as_deref().map_or(true, |t| t == r.topic))
            .take(q.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
