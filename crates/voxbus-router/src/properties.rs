//! Engine property access as request/response over the bus.
//!
//! `GetProperty` is answered by a reply carrying the request id. A
//! `SetProperty` is confirmed by the engine emitting `PropertyStateChanged`
//! for the same name. Every wait is bounded by an explicit timeout.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use voxbus_core::envelope::Envelope;
use voxbus_core::ids::MessageId;
use voxbus_core::topics::{action::property_manager as act, key, topic};

use crate::errors::PropertyError;
use crate::publisher::EnginePublisher;

type GetReply = Result<String, PropertyError>;

pub struct PropertyManager {
    publisher: Arc<EnginePublisher>,
    pending_gets: DashMap<MessageId, (String, oneshot::Sender<GetReply>)>,
    pending_sets: DashMap<String, Vec<oneshot::Sender<bool>>>,
    default_wait: Duration,
}

impl PropertyManager {
    pub fn new(publisher: Arc<EnginePublisher>, default_wait: Duration) -> Self {
        Self {
            publisher,
            pending_gets: DashMap::new(),
            pending_sets: DashMap::new(),
            default_wait,
        }
    }

    pub fn default_wait(&self) -> Duration {
        self.default_wait
    }

    pub async fn get(&self, name: &str, timeout: Duration) -> Result<String, PropertyError> {
        let (id, raw) = self
            .publisher
            .prepare(topic::PROPERTY_MANAGER, act::GET_PROPERTY, json!({ "name": name }))
            .map_err(|e| PropertyError::Publish(e.to_string()))?;
        let (tx, rx) = oneshot::channel();
        let _ = self.pending_gets.insert(id.clone(), (name.to_owned(), tx));

        if let Err(e) =
            self.publisher
                .send_prepared(&id, topic::PROPERTY_MANAGER, act::GET_PROPERTY, &raw)
        {
            let _ = self.pending_gets.remove(&id);
            return Err(PropertyError::Publish(e.to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(PropertyError::Abandoned),
            Err(_) => {
                let _ = self.pending_gets.remove(&id);
                Err(PropertyError::Timeout {
                    name: name.to_owned(),
                    timeout,
                })
            }
        }
    }

    /// Publish `SetProperty`. With `wait`, block up to that long for the
    /// engine to confirm; without, return once published.
    pub async fn set(
        &self,
        name: &str,
        value: &str,
        wait: Option<Duration>,
    ) -> Result<(), PropertyError> {
        let payload = json!({ "name": name, "value": value });
        let Some(wait) = wait else {
            self.publisher
                .publish_value("", topic::PROPERTY_MANAGER, act::SET_PROPERTY, payload)
                .map_err(|e| PropertyError::Publish(e.to_string()))?;
            return Ok(());
        };

        let (tx, rx) = oneshot::channel();
        self.pending_sets.entry(name.to_owned()).or_default().push(tx);

        if let Err(e) =
            self.publisher
                .publish_value("", topic::PROPERTY_MANAGER, act::SET_PROPERTY, payload)
        {
            self.prune_sets(name);
            return Err(PropertyError::Publish(e.to_string()));
        }

        let outcome = tokio::time::timeout(wait, rx).await;
        self.prune_sets(name);
        match outcome {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(PropertyError::Rejected {
                name: name.to_owned(),
            }),
            Ok(Err(_)) => Err(PropertyError::Abandoned),
            Err(_) => Err(PropertyError::Timeout {
                name: name.to_owned(),
                timeout: wait,
            }),
        }
    }

    /// Set with the configured default confirmation wait.
    pub async fn set_confirmed(&self, name: &str, value: &str) -> Result<(), PropertyError> {
        self.set(name, value, Some(self.default_wait)).await
    }

    /// Feed an engine message. Returns `true` when it answered a pending
    /// request.
    pub fn on_engine_message(&self, envelope: &Envelope) -> bool {
        if envelope.topic != topic::PROPERTY_MANAGER {
            return false;
        }
        if let Some(reply_to) = &envelope.reply_to_id {
            if let Some((_, (name, tx))) = self.pending_gets.remove(reply_to) {
                let reply = envelope
                    .payload_str(key::VALUE)
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        PropertyError::MalformedReply(format!("no value for {name}"))
                    });
                let _ = tx.send(reply);
                return true;
            }
        }
        if envelope.action == act::PROPERTY_STATE_CHANGED {
            let Some(name) = envelope.payload_str(key::NAME) else {
                warn!("PropertyStateChanged without name");
                return false;
            };
            let succeeded = envelope
                .payload_str(key::STATE)
                .is_some_and(|s| s.eq_ignore_ascii_case("SUCCEEDED"));
            if let Some((_, waiters)) = self.pending_sets.remove(name) {
                debug!(name, succeeded, waiters = waiters.len(), "property write confirmed");
                for tx in waiters {
                    let _ = tx.send(succeeded);
                }
                return true;
            }
        }
        false
    }

    pub fn pending(&self) -> usize {
        self.pending_gets.len() + self.pending_sets.iter().map(|e| e.len()).sum::<usize>()
    }

    /// Fail every outstanding request.
    pub fn abandon_all(&self) {
        self.pending_gets.clear();
        self.pending_sets.clear();
    }

    fn prune_sets(&self, name: &str) {
        let _ = self.pending_sets.remove_if_mut(name, |_, waiters| {
            waiters.retain(|tx| !tx.is_closed());
            waiters.is_empty()
        });
    }
}
