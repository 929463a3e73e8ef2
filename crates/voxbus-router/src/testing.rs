//! Test doubles shared by the router's unit tests.

use std::time::Duration;

use parking_lot::Mutex;
use voxbus_core::engine::{EngineStream, MessageBroker, MessageHandler, StreamMode};
use voxbus_core::errors::EngineError;

/// Broker that records every published envelope.
#[derive(Default)]
pub struct RecordingBroker {
    published: Mutex<Vec<String>>,
}

impl RecordingBroker {
    pub fn published(&self) -> Vec<String> {
        self.published.lock().clone()
    }

    pub async fn wait_for_published(&self, count: usize) -> Vec<String> {
        for _ in 0..400 {
            let published = self.published();
            if published.len() >= count {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} published envelopes");
    }
}

impl MessageBroker for RecordingBroker {
    fn publish(&self, raw: &str) -> Result<(), EngineError> {
        self.published.lock().push(raw.to_owned());
        Ok(())
    }

    fn subscribe(&self, _handler: MessageHandler) {}

    fn open_stream(&self, _stream_id: &str, _mode: StreamMode) -> Option<Box<dyn EngineStream>> {
        None
    }
}
