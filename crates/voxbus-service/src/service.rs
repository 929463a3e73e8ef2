//! Bus service runtime.
//!
//! One control loop owns the lifecycle. It drains the inbound queue and
//! the engine's outbound messages in order, runs lifecycle effects, and
//! hands engine startup to the [`EngineWorker`] thread.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};
use voxbus_core::engine::{Engine, EngineFactory};
use voxbus_core::envelope::EnvelopeCodec;
use voxbus_ipc::{
    ComponentChannel, ComponentDirectory, Inbound, Intent, IntentBody, IntentNames, Receiver,
    ReceiverHandle, Sender,
};
use voxbus_router::client_state::ClientStateTracker;
use voxbus_router::focus::MediaStateTracker;
use voxbus_router::properties::PropertyManager;
use voxbus_router::system::{InMemorySystemSettings, SystemPropertySync, SystemSettings};
use voxbus_router::{
    Dispatcher, DispatcherParts, EnginePublisher, LocalHandlers, StreamManager, TargetCache,
    TargetResolver,
};
use voxbus_settings::{merge_extra, settings_from_config_message, BusSettings, ConfigStore};
use voxbus_telemetry::TrafficLog;

use crate::engine_worker::EngineWorker;
use crate::errors::ServiceError;
use crate::lifecycle::{transition, Effect, LifecycleEvent, LifecycleInput, LifecycleState, Transition};
use crate::modules::{builtin_modules, EngineStatusListener, ModuleFactory, ModuleRegistry, ModuleSource};
use crate::watchdog::{exit_process, KillAction, Watchdog};

/// IPC action (after the intent prefix) of the lifecycle broadcast.
pub const STATE_CHANGE_ACTION: &str = "state_change";
pub const LIFECYCLE_CATEGORY: &str = "lifecycle";
/// Configuration key announcing that an extra configuration will follow.
pub const AWAIT_EXTRAS_KEY: &str = "awaitExtras";

const EVENT_CAPACITY: usize = 64;

/// Everything the service needs from its host.
pub struct ServiceDeps {
    pub settings: BusSettings,
    pub store: ConfigStore,
    pub engine_factory: Arc<dyn EngineFactory>,
    pub channel: Arc<dyn ComponentChannel>,
    pub directory: Arc<dyn ComponentDirectory>,
    pub system_settings: Arc<dyn SystemSettings>,
    pub handlers: LocalHandlers,
    pub module_factories: Vec<Arc<dyn ModuleFactory>>,
    pub listeners: Vec<Arc<dyn EngineStatusListener>>,
    pub traffic: Option<Arc<TrafficLog>>,
    /// Runs when teardown overruns `lifecycle.shutdownDeadlineMs`.
    pub kill: KillAction,
}

impl ServiceDeps {
    pub fn new(
        engine_factory: Arc<dyn EngineFactory>,
        channel: Arc<dyn ComponentChannel>,
        directory: Arc<dyn ComponentDirectory>,
        store: ConfigStore,
    ) -> Self {
        Self {
            settings: BusSettings::default(),
            store,
            engine_factory,
            channel,
            directory,
            system_settings: Arc::new(InMemorySystemSettings::new()),
            handlers: LocalHandlers::default(),
            module_factories: Vec::new(),
            listeners: Vec::new(),
            traffic: None,
            kill: exit_process(),
        }
    }
}

/// Engine-side objects that exist once the engine has started.
#[derive(Clone)]
struct EngineRuntime {
    engine: Arc<dyn Engine>,
    dispatcher: Arc<Dispatcher>,
    streams: Arc<StreamManager>,
}

enum EngineEvent {
    Message(String),
    Started(EngineRuntime),
    Failed(ServiceError),
}

struct Shared {
    state: RwLock<LifecycleState>,
    events: broadcast::Sender<LifecycleEvent>,
    engine: RwLock<Option<EngineRuntime>>,
}

/// Handle to a running bus service.
pub struct BusService {
    receiver: ReceiverHandle,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_deadline: Duration,
    kill: KillAction,
}

impl BusService {
    /// Start the control loop on the current tokio runtime. The service is
    /// in `Started`, with receivers open, when this returns.
    pub async fn start(deps: ServiceDeps) -> Result<Self, ServiceError> {
        let runtime = Handle::try_current().map_err(|_| ServiceError::NoRuntime)?;
        let (receiver, inbound) = Receiver::channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: RwLock::new(LifecycleState::Started),
            events,
            engine: RwLock::new(None),
        });
        let shutdown_deadline = Duration::from_millis(deps.settings.lifecycle.shutdown_deadline_ms);
        let kill = deps.kill.clone();

        let mut control = ControlLoop {
            shared: shared.clone(),
            settings: deps.settings,
            store: deps.store,
            startup: StartupDeps {
                engine_factory: deps.engine_factory,
                channel: deps.channel,
                directory: deps.directory,
                system_settings: deps.system_settings,
                handlers: deps.handlers,
                module_factories: deps.module_factories,
                traffic: deps.traffic,
                cache: Arc::new(TargetCache::new()),
                runtime: runtime.clone(),
            },
            listeners: deps.listeners,
            receiver: receiver.clone(),
            inbound,
            engine_tx,
            engine_rx,
            worker: None,
            pending_engine_messages: Vec::new(),
            property_enablement: BTreeMap::new(),
        };
        control
            .apply(None, Transition::enter(LifecycleState::Started))
            .await;
        let task = runtime.spawn(control.run());
        info!("bus service started");

        Ok(Self {
            receiver,
            shared,
            task: Mutex::new(Some(task)),
            shutdown_deadline,
            kill,
        })
    }

    /// Entry point for transports delivering component input.
    pub fn receiver(&self) -> ReceiverHandle {
        self.receiver.clone()
    }

    pub fn state(&self) -> LifecycleState {
        *self.shared.state.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.events.subscribe()
    }

    /// Lifecycle events as a stream.
    pub fn events(&self) -> BroadcastStream<LifecycleEvent> {
        BroadcastStream::new(self.subscribe())
    }

    /// Wait until the service reaches `target`. Returns `false` on timeout
    /// or if the service stopped first.
    pub async fn wait_for_state(&self, target: LifecycleState, timeout: Duration) -> bool {
        let mut events = self.subscribe();
        if self.state() == target {
            return true;
        }
        let reached = tokio::time::timeout(timeout, async {
            loop {
                match events.recv().await {
                    Ok(event) if event.state == target => return true,
                    Ok(event) if event.state.is_terminal() => return false,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.state() == target {
                            return true;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        })
        .await;
        reached.unwrap_or(false) || self.state() == target
    }

    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.shared
            .engine
            .read()
            .as_ref()
            .map(|rt| rt.dispatcher.clone())
    }

    fn properties(&self) -> Result<Arc<PropertyManager>, ServiceError> {
        self.dispatcher()
            .map(|d| d.properties().clone())
            .ok_or(ServiceError::EngineNotRunning)
    }

    /// Read an engine property.
    pub async fn get_property(&self, name: &str, timeout: Duration) -> Result<String, ServiceError> {
        let properties = self.properties()?;
        Ok(properties.get(name, timeout).await?)
    }

    /// Write an engine property and wait for the engine to confirm.
    pub async fn set_property(&self, name: &str, value: &str) -> Result<(), ServiceError> {
        let properties = self.properties()?;
        Ok(properties.set_confirmed(name, value).await?)
    }

    /// The OS changed a mirrored property. Returns whether it was pushed.
    pub async fn system_property_changed(&self, name: &str, value: &str) -> Result<bool, ServiceError> {
        let dispatcher = self.dispatcher().ok_or(ServiceError::EngineNotRunning)?;
        Ok(dispatcher
            .system()
            .on_system_change(name, value, dispatcher.properties())
            .await?)
    }

    /// Stop the service and wait for teardown. The kill action fires if
    /// teardown overruns the shutdown deadline.
    pub async fn shutdown(&self) -> bool {
        if self.receiver.deliver(Inbound::Shutdown).is_err() {
            debug!("receiver already closed");
        }
        let task = self.task.lock().take();
        let Some(task) = task else {
            return true;
        };
        let watchdog = Watchdog::arm(self.shutdown_deadline, self.kill.clone());
        let finished = match task.await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "control loop ended abnormally");
                false
            }
        };
        watchdog.disarm();
        finished
    }
}

/// Inputs to engine startup that outlive any one configuration.
#[derive(Clone)]
struct StartupDeps {
    engine_factory: Arc<dyn EngineFactory>,
    channel: Arc<dyn ComponentChannel>,
    directory: Arc<dyn ComponentDirectory>,
    system_settings: Arc<dyn SystemSettings>,
    handlers: LocalHandlers,
    module_factories: Vec<Arc<dyn ModuleFactory>>,
    traffic: Option<Arc<TrafficLog>>,
    cache: Arc<TargetCache>,
    runtime: Handle,
}

struct ControlLoop {
    shared: Arc<Shared>,
    settings: BusSettings,
    store: ConfigStore,
    startup: StartupDeps,
    listeners: Vec<Arc<dyn EngineStatusListener>>,
    receiver: ReceiverHandle,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    worker: Option<EngineWorker>,
    // Engine messages that arrive while the engine is still starting.
    pending_engine_messages: Vec<String>,
    property_enablement: BTreeMap<String, bool>,
}

impl ControlLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some(event) = self.engine_rx.recv() => self.on_engine_event(event).await,
                inbound = self.inbound.recv() => match inbound {
                    Some(Inbound::Shutdown) | None => {
                        let _ = self.step(LifecycleInput::Stop).await;
                    }
                    Some(inbound) => self.on_inbound(inbound).await,
                },
            }
            if self.state().is_terminal() {
                break;
            }
        }
        self.engine_rx.close();
        while let Ok(event) = self.engine_rx.try_recv() {
            if let EngineEvent::Started(rt) = event {
                rt.engine.dispose();
            }
        }
        info!("control loop finished");
    }

    fn state(&self) -> LifecycleState {
        *self.shared.state.read()
    }

    fn runtime(&self) -> Option<EngineRuntime> {
        self.shared.engine.read().clone()
    }

    fn names(&self) -> IntentNames {
        IntentNames::new(self.settings.ipc.intent_prefix.clone())
    }

    /// Feed `input` to the state machine and run the resulting effects.
    /// Returns whether the state changed.
    async fn step(&mut self, input: LifecycleInput) -> bool {
        let current = self.state();
        match transition(current, input) {
            Some(t) => {
                self.apply(Some(current), t).await;
                true
            }
            None => {
                debug!(state = %current, ?input, "lifecycle input ignored");
                false
            }
        }
    }

    async fn apply(&mut self, previous: Option<LifecycleState>, t: Transition) {
        *self.shared.state.write() = t.next;
        info!(from = ?previous, state = %t.next, "lifecycle state changed");
        for effect in t.effects {
            match effect {
                Effect::NotifyObservers => {
                    let _ = self.shared.events.send(LifecycleEvent {
                        previous,
                        state: t.next,
                        at: Utc::now(),
                    });
                }
                Effect::Broadcast(state) => self.broadcast_state(state),
                Effect::OpenReceivers => {
                    self.receiver.open();
                    debug!("receivers open");
                }
                Effect::SpawnEngineWorker => match EngineWorker::spawn("voxbus-engine") {
                    Ok(worker) => self.worker = Some(worker),
                    Err(e) => error!(error = %e, "failed to spawn engine worker"),
                },
                Effect::StartEngine => self.schedule_engine_start(),
                Effect::InitialPropertySync => self.initial_property_sync(),
                Effect::Teardown => self.teardown().await,
            }
        }
    }

    fn broadcast_state(&self, state: LifecycleState) {
        let names = self.names();
        let intent = Intent {
            action: names.action(STATE_CHANGE_ACTION),
            category: names.category(LIFECYCLE_CATEGORY),
            target: None,
            body: IntentBody::State {
                state: state.name().to_string(),
            },
        };
        match self
            .startup
            .channel
            .broadcast(intent, &self.settings.ipc.permission)
        {
            Ok(reached) => debug!(state = %state, reached, "state broadcast"),
            Err(e) => warn!(state = %state, error = %e, kind = e.error_kind(), "state broadcast failed"),
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    async fn on_inbound(&mut self, inbound: Inbound) {
        debug!(kind = inbound.kind(), state = %self.state(), "inbound");
        match inbound {
            Inbound::Message(raw) => self.on_component_message(&raw),
            Inbound::Configuration(raw) => self.on_configuration(&raw).await,
            Inbound::ExtraConfiguration(raw) => self.on_extra_configuration(&raw).await,
            Inbound::Launch { new_config } => self.on_launch(new_config).await,
            Inbound::FetchStream { stream_id, sink } => match self.runtime() {
                Some(rt) => {
                    if let Err(e) = rt.streams.open_fetch(&stream_id, sink) {
                        warn!(%stream_id, error = %e, kind = e.error_kind(), "fetch rejected");
                    }
                }
                None => warn!(%stream_id, "engine not running, closing fetch pipe"),
            },
            Inbound::CancelFetch { stream_id } => {
                if let Some(rt) = self.runtime() {
                    let _ = rt.streams.cancel_stream(&stream_id);
                }
            }
            Inbound::PushStream { stream_id, source } => match self.runtime() {
                Some(rt) => {
                    if let Err(e) = rt.streams.open_push(&stream_id, source) {
                        warn!(%stream_id, error = %e, kind = e.error_kind(), "push rejected");
                    }
                }
                None => warn!(%stream_id, "engine not running, closing push pipe"),
            },
            Inbound::BufferedBytesReport(report) => match self.runtime() {
                Some(rt) => {
                    let _ = rt.dispatcher.update_buffered_bytes(&report);
                }
                None => debug!("buffered bytes report before engine start"),
            },
            Inbound::SyncPropertyEnablement { name, enabled } => {
                if let Some(rt) = self.runtime() {
                    rt.dispatcher.system().change_enablement(&name, enabled);
                }
                let _ = self.property_enablement.insert(name, enabled);
            }
            Inbound::Ping { reply_to } => {
                let names = self.names();
                let intent = Intent {
                    action: names.action(STATE_CHANGE_ACTION),
                    category: names.category(LIFECYCLE_CATEGORY),
                    target: Some(reply_to.clone()),
                    body: IntentBody::State {
                        state: self.state().name().to_string(),
                    },
                };
                if let Err(e) = self.startup.channel.send(intent) {
                    warn!(target = %reply_to, error = %e, "ping reply failed");
                }
            }
            Inbound::FetchCachedMessage { resource_id, sink } => match self.runtime() {
                Some(rt) => match rt.dispatcher.sender().cached_content(&resource_id) {
                    Ok(content) => {
                        if let Err(e) = rt.streams.deliver_cached(resource_id.as_str(), content, sink) {
                            warn!(%resource_id, error = %e, kind = e.error_kind(), "cached message delivery rejected");
                        }
                    }
                    Err(e) => {
                        warn!(%resource_id, error = %e, kind = e.error_kind(), "cached message fetch failed");
                    }
                },
                None => warn!(%resource_id, "no cached messages before engine start"),
            },
            Inbound::AcknowledgeCachedMessage {
                resource_id,
                success,
            } => {
                if let Some(rt) = self.runtime() {
                    rt.dispatcher.sender().acknowledge(&resource_id, success);
                }
            }
            Inbound::Shutdown => {
                let _ = self.step(LifecycleInput::Stop).await;
            }
        }
    }

    fn on_component_message(&self, raw: &str) {
        let Some(rt) = self.runtime() else {
            warn!(state = %self.state(), "engine not running, dropping component message");
            return;
        };
        if let Err(e) = rt.dispatcher.on_external_message(raw) {
            warn!(error = %e, "component message not published");
        }
    }

    async fn on_launch(&mut self, new_config: bool) {
        let mut config_saved = self.store.is_saved();
        if config_saved && !new_config {
            match self.store.load() {
                Ok(Some(settings)) => {
                    info!(path = %self.store.path().display(), "using saved configuration");
                    self.settings = settings;
                }
                Ok(None) => config_saved = false,
                Err(e) => {
                    error!(error = %e, "saved configuration unreadable");
                    config_saved = false;
                }
            }
        }
        if !self
            .step(LifecycleInput::Launch {
                new_config,
                config_saved,
            })
            .await
        {
            info!(new_config, config_saved, "waiting for configuration");
        }
    }

    async fn on_configuration(&mut self, raw: &str) {
        if self.state() != LifecycleState::Started {
            warn!(state = %self.state(), "configuration ignored outside STARTED");
            return;
        }
        let settings = match settings_from_config_message(&self.settings, raw) {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "configuration rejected");
                return;
            }
        };
        let persisted = match self.store.save(&settings) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to persist configuration");
                false
            }
        };
        self.settings = settings;
        let extras_pending = awaits_extras(raw);
        let _ = self
            .step(LifecycleInput::Configuration {
                persisted,
                extras_pending,
            })
            .await;
    }

    async fn on_extra_configuration(&mut self, raw: &str) {
        if self.state() != LifecycleState::AwaitingExtras {
            warn!(state = %self.state(), "extra configuration not expected");
            return;
        }
        match merge_extra(&self.settings, raw) {
            Ok(settings) => {
                if let Err(e) = self.store.save(&settings) {
                    warn!(error = %e, "failed to persist extra configuration");
                }
                self.settings = settings;
                let _ = self.step(LifecycleInput::ExtrasDelivered).await;
            }
            Err(e) => error!(error = %e, "extra configuration rejected"),
        }
    }

    // ── Engine ──────────────────────────────────────────────────────────

    async fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Message(raw) => match self.runtime() {
                Some(rt) => {
                    let disposition = rt.dispatcher.on_engine_message(&raw);
                    debug!(?disposition, "engine message dispatched");
                }
                None => self.pending_engine_messages.push(raw),
            },
            EngineEvent::Started(rt) => {
                if self.state() != LifecycleState::Configured {
                    warn!(state = %self.state(), "engine started in unexpected state, disposing");
                    rt.engine.dispose();
                    return;
                }
                *self.shared.engine.write() = Some(rt.clone());
                let _ = self.step(LifecycleInput::EngineStarted).await;
                for raw in std::mem::take(&mut self.pending_engine_messages) {
                    let _ = rt.dispatcher.on_engine_message(&raw);
                }
                for listener in &self.listeners {
                    listener.on_engine_start().await;
                }
            }
            EngineEvent::Failed(e) => {
                error!(error = %e, kind = e.error_kind(), "engine startup failed, staying configured");
                let _ = self.step(LifecycleInput::EngineFailed).await;
            }
        }
    }

    fn schedule_engine_start(&self) {
        let Some(worker) = &self.worker else {
            error!("no engine worker, engine cannot start");
            return;
        };
        let settings = self.settings.clone();
        let startup = self.startup.clone();
        let enablement = self.property_enablement.clone();
        let tx = self.engine_tx.clone();
        let job = move || {
            let event = match start_engine(&settings, &startup, &enablement, &tx) {
                Ok(rt) => EngineEvent::Started(rt),
                Err(e) => EngineEvent::Failed(e),
            };
            if let Err(mpsc::error::SendError(EngineEvent::Started(rt))) = tx.send(event) {
                warn!("service gone before engine start completed, disposing");
                rt.engine.dispose();
            }
        };
        if let Err(e) = worker.submit(job) {
            error!(error = %e, "failed to schedule engine start");
        }
    }

    fn initial_property_sync(&self) {
        let Some(rt) = self.runtime() else {
            return;
        };
        let _ = self.startup.runtime.spawn(async move {
            let dispatcher = rt.dispatcher;
            let _ = dispatcher.system().initial_sync(dispatcher.properties()).await;
        });
    }

    async fn teardown(&mut self) {
        let lifecycle = self.settings.lifecycle.clone();
        self.receiver.close();

        let rt = self.shared.engine.write().take();
        if let Some(rt) = &rt {
            let drain = Duration::from_millis(lifecycle.stream_drain_timeout_ms);
            let _ = rt.streams.shutdown(drain).await;
            rt.dispatcher.properties().abandon_all();
            rt.dispatcher.clear_audio_input_bindings();
            rt.dispatcher.sender().clear();
        }

        if let Some(worker) = self.worker.take() {
            let timeout = Duration::from_millis(lifecycle.engine_join_timeout_ms);
            let joined = tokio::task::spawn_blocking(move || worker.join(timeout)).await;
            if !matches!(joined, Ok(true)) {
                warn!(?timeout, "engine worker not joined");
            }
        }

        while let Ok(inbound) = self.inbound.try_recv() {
            debug!(kind = inbound.kind(), "discarding input queued during shutdown");
        }
        self.startup.cache.clear();

        if let Some(rt) = rt {
            if let Err(e) = rt.engine.stop() {
                warn!(error = %e, "engine stop failed");
            }
            rt.engine.dispose();
            for listener in &self.listeners {
                listener.on_engine_stop().await;
            }
        }
        info!("teardown complete");
    }
}

/// Whether a configuration message announces an extra configuration.
fn awaits_extras(raw: &str) -> bool {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get(AWAIT_EXTRAS_KEY).and_then(Value::as_bool))
        .unwrap_or(false)
}

/// Runs on the engine worker thread.
fn start_engine(
    settings: &BusSettings,
    startup: &StartupDeps,
    enablement: &BTreeMap<String, bool>,
    events: &mpsc::UnboundedSender<EngineEvent>,
) -> Result<EngineRuntime, ServiceError> {
    let version = settings.checked_version()?;
    info!(version, "configuration version accepted");

    let engine = startup.engine_factory.create()?;
    match wire_engine(&engine, settings, startup, enablement, events) {
        Ok(rt) => Ok(rt),
        Err(e) => {
            engine.dispose();
            Err(e)
        }
    }
}

fn wire_engine(
    engine: &Arc<dyn Engine>,
    settings: &BusSettings,
    startup: &StartupDeps,
    enablement: &BTreeMap<String, bool>,
    events: &mpsc::UnboundedSender<EngineEvent>,
) -> Result<EngineRuntime, ServiceError> {
    let broker = engine.broker();
    let names = IntentNames::new(settings.ipc.intent_prefix.clone());
    let publisher = Arc::new(EnginePublisher::new(
        EnvelopeCodec::new(settings.ipc.namespace.clone()),
        broker.clone(),
        startup.traffic.clone(),
    ));
    let properties = Arc::new(PropertyManager::new(
        publisher.clone(),
        Duration::from_millis(settings.lifecycle.property_wait_ms),
    ));
    let system = Arc::new(SystemPropertySync::new(
        startup.system_settings.clone(),
        settings.general.update_system_property_allowed,
        settings.general.sync_system_property_change,
    ));
    for (name, enabled) in enablement {
        system.change_enablement(name, *enabled);
    }

    let dispatcher = Arc::new(Dispatcher::new(DispatcherParts {
        publisher: publisher.clone(),
        resolver: Arc::new(TargetResolver::new(
            settings.general.intent_targets.clone(),
            startup.directory.clone(),
            startup.cache.clone(),
            names.clone(),
            settings.ipc.permission.clone(),
        )),
        sender: Arc::new(Sender::new(
            startup.channel.clone(),
            names,
            settings.ipc.max_embedded_bytes,
            settings.general.ipc.cache_capacity,
        )),
        handlers: startup.handlers.clone(),
        defaults: settings.default_platform_handlers.clone(),
        properties,
        system,
        client_state: Arc::new(ClientStateTracker::new()),
        media: Arc::new(MediaStateTracker::new()),
        traffic: startup.traffic.clone(),
    }));
    let streams = Arc::new(StreamManager::new(
        broker.clone(),
        settings.streams.clone(),
        startup.runtime.clone(),
    ));

    let tx = events.clone();
    broker.subscribe(Arc::new(move |raw: String| {
        let _ = tx.send(EngineEvent::Message(raw));
    }));

    let mut registry = ModuleRegistry::new();
    for module in builtin_modules(&settings.default_platform_handlers) {
        let _ = registry.register(module, ModuleSource::BuiltIn);
    }
    let mut engine_config = settings.engine.clone();
    for factory in &startup.module_factories {
        engine_config.extend(factory.engine_config());
        for module in factory.modules(&publisher) {
            let name = module.name().to_string();
            if !registry.register(module, ModuleSource::Extension(factory.name().to_string())) {
                warn!(module = %name, factory = factory.name(), "duplicate module ignored");
            }
        }
    }
    for module in registry.modules() {
        engine.register_module(module)?;
    }
    info!(modules = ?registry.names(), "platform modules registered");

    engine.configure(&engine_config)?;
    engine.start()?;
    info!("engine started");

    Ok(EngineRuntime {
        engine: engine.clone(),
        dispatcher,
        streams,
    })
}
