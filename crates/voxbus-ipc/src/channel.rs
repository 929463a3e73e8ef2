//! Seams between the bus and the OS component machinery.

use voxbus_core::target::{Target, TargetKind};

use crate::errors::ChannelError;
use crate::intent::Intent;

/// Outbound delivery.
pub trait ComponentChannel: Send + Sync {
    /// Deliver to `intent.target`. Activities, receivers, and services are
    /// started or notified according to their kind.
    fn send(&self, intent: Intent) -> Result<(), ChannelError>;

    /// Deliver to every component holding `permission`. Returns how many
    /// components were reached.
    fn broadcast(&self, intent: Intent, permission: &str) -> Result<usize, ChannelError>;
}

/// Component discovery and permission checks.
pub trait ComponentDirectory: Send + Sync {
    fn has_permission(&self, package: &str, permission: &str) -> bool;

    /// Components of `kind` that declare a filter matching `action` and
    /// `category`.
    fn query(&self, action: &str, category: &str, kind: TargetKind) -> Vec<Target>;
}
