use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};
use voxbus_core::envelope::Envelope;
use voxbus_core::topics::{action::alexa_client as act, key};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientStateEvent {
    Auth { state: String },
    Connection { status: String, reason: Option<String> },
    Dialog { state: String },
}

/// Auth, connection, and dialog state reported by the engine.
pub struct ClientStateTracker {
    auth: RwLock<Option<String>>,
    connection: RwLock<Option<String>>,
    dialog: RwLock<Option<String>>,
    events: broadcast::Sender<ClientStateEvent>,
}

impl Default for ClientStateTracker {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            auth: RwLock::new(None),
            connection: RwLock::new(None),
            dialog: RwLock::new(None),
            events,
        }
    }
}

impl ClientStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientStateEvent> {
        self.events.subscribe()
    }

    pub fn handle(&self, envelope: &Envelope) -> Option<ClientStateEvent> {
        let event = match envelope.action.as_str() {
            act::AUTH_STATE_CHANGED => {
                let state = envelope.payload_str(key::AUTH_STATE)?.to_owned();
                *self.auth.write() = Some(state.clone());
                ClientStateEvent::Auth { state }
            }
            act::CONNECTION_STATUS_CHANGED => {
                let status = envelope.payload_str(key::CONNECTION_STATUS)?.to_owned();
                *self.connection.write() = Some(status.clone());
                ClientStateEvent::Connection {
                    status,
                    reason: envelope.payload_str(key::REASON).map(str::to_owned),
                }
            }
            act::DIALOG_STATE_CHANGED => {
                let state = envelope.payload_str(key::STATE)?.to_owned();
                *self.dialog.write() = Some(state.clone());
                ClientStateEvent::Dialog { state }
            }
            other => {
                debug!(action = other, "ignoring client message");
                return None;
            }
        };
        info!(?event, "client state changed");
        let _ = self.events.send(event.clone());
        Some(event)
    }

    pub fn auth_state(&self) -> Option<String> {
        self.auth.read().clone()
    }

    pub fn connection_status(&self) -> Option<String> {
        self.connection.read().clone()
    }

    pub fn dialog_state(&self) -> Option<String> {
        self.dialog.read().clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.auth.read().as_deref() == Some("REFRESHED")
    }
}
