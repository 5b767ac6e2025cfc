//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging custom event handlers
//! (metrics, alerting, audit) into the supervisor. Each subscriber is driven by
//! a dedicated worker fed by a bounded queue owned by the
//! [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow; they never block the publisher or other subscribers.
//! - On queue overflow, events for that subscriber are **dropped**.

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
///
/// # Example
/// ```rust
/// use async_trait::async_trait;
/// use linevisor::{Event, EventKind, Subscribe};
///
/// struct FatalAlert;
///
/// #[async_trait]
/// impl Subscribe for FatalAlert {
///     async fn on_event(&self, ev: &Event) {
///         if ev.kind == EventKind::FatalEscalation {
///             // page the floor supervisor...
///         }
///     }
///     fn name(&self) -> &'static str { "fatal-alert" }
/// }
/// ```
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs/metrics).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
