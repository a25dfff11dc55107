//! # Event Bus System
//!
//! Provides an event-driven architecture for the sync engine using
//! `tokio::sync::broadcast`. This module enables decoupled communication
//! between engine components through typed events.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for different domains
//! - **EventBus**: Central broadcast channel for publishing events
//! - **Subscription Management**: Multiple subscribers can listen independently
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, CoreEvent, ResyncEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Resync(ResyncEvent::Started {
//!         run_id: "run-1".to_string(),
//!         kind: "repository".to_string(),
//!     }))
//!     .ok();
//! ```
//!
//! ## Error Handling
//!
//! The bus uses `tokio::sync::broadcast`, which can produce two receive
//! errors:
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n`
//!   events. Non-fatal; the subscriber can continue.
//! - **`RecvError::Closed`**: All senders have been dropped; shutdown.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Resync pass lifecycle events
    Resync(ResyncEvent),
    /// Webhook ingestion events
    Webhook(WebhookEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Resync(e) => e.description(),
            CoreEvent::Webhook(e) => e.description(),
        }
    }
}

/// Events covering the lifecycle of one resync pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ResyncEvent {
    /// Resync pass initiated.
    Started {
        /// Unique identifier for this run.
        run_id: String,
        /// The resource kind being synced.
        kind: String,
    },
    /// Incremental progress update.
    Progress {
        /// The run ID.
        run_id: String,
        /// Entities upserted so far.
        upserted: u64,
        /// Entities deleted so far.
        deleted: u64,
    },
    /// Run finished with every entity applied.
    Completed {
        run_id: String,
        upserted: u64,
        deleted: u64,
        duration_secs: u64,
    },
    /// Run finished but some entities still failed after the retry pass.
    PartiallyFailed {
        run_id: String,
        upserted: u64,
        deleted: u64,
        failed: u64,
    },
    /// Run aborted before completion.
    Failed {
        run_id: String,
        /// Human-readable error message.
        message: String,
    },
}

impl ResyncEvent {
    fn description(&self) -> &str {
        match self {
            ResyncEvent::Started { .. } => "Resync started",
            ResyncEvent::Progress { .. } => "Resync in progress",
            ResyncEvent::Completed { .. } => "Resync completed successfully",
            ResyncEvent::PartiallyFailed { .. } => "Resync completed with failures",
            ResyncEvent::Failed { .. } => "Resync failed",
        }
    }
}

/// Events emitted by the webhook ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum WebhookEvent {
    /// An event passed authentication and validation.
    Accepted {
        /// Connector kind the event was routed to.
        kind: String,
    },
    /// An event was rejected before processing.
    Rejected {
        /// Why the event was dropped.
        reason: String,
    },
    /// An accepted event finished reconciling.
    Processed {
        kind: String,
        upserted: u64,
        deleted: u64,
    },
}

impl WebhookEvent {
    fn description(&self) -> &str {
        match self {
            WebhookEvent::Accepted { .. } => "Webhook event accepted",
            WebhookEvent::Rejected { .. } => "Webhook event rejected",
            WebhookEvent::Processed { .. } => "Webhook event processed",
        }
    }
}

/// Central event bus for publishing and subscribing to engine events.
///
/// Thread-safe (`Send + Sync`); share across tasks with `Arc`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error when there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver; past events are not
    /// replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}
