//! # voxbus-service
//!
//! Runs the bus: the lifecycle state machine, the control loop that owns
//! dispatch, the engine worker thread, module registration, and shutdown.

#![deny(unsafe_code)]

pub mod engine_worker;
pub mod errors;
pub mod lifecycle;
pub mod loopback;
pub mod modules;
pub mod service;
pub mod watchdog;

pub use errors::ServiceError;
pub use lifecycle::{LifecycleEvent, LifecycleInput, LifecycleState};
pub use loopback::{LoopbackBroker, LoopbackEngine};
pub use modules::{EngineStatusListener, ModuleFactory, ModuleRegistry, ModuleSource};
pub use service::{BusService, ServiceDeps};
pub use watchdog::{exit_process, KillAction};
