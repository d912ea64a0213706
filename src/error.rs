//! Error taxonomy.
//!
//! Three classes of failure flow through the crate:
//! - resource exhaustion (queue full, subscription table full) — transient,
//!   the caller retries after a short delay or drops the message;
//! - caller bugs (unknown component name) — surfaced immediately;
//! - IPC failures (the shared region or its mapping cannot be set up) —
//!   fatal to the calling process and propagated for shutdown.
//!
//! A lost child process is deliberately *not* an error: the supervisor
//! observes it and remediates (connectivity-down plus restart) locally.

use crate::messages::ComponentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    /// The queue window is at capacity. Back-pressure, not failure.
    #[error("message queue full ({capacity} slots)")]
    QueueFull { capacity: usize },

    /// No free subscription slot remains.
    #[error("subscription table full ({capacity} slots)")]
    SubscriptionTableFull { capacity: usize },

    /// A name that does not map to any known component.
    #[error("unknown component `{0}`")]
    UnknownComponent(String),

    /// The shared region could not be created, mapped, or attached.
    #[error("shared memory region error: {0}")]
    Region(#[from] std::io::Error),
}

impl BusError {
    /// True for back-pressure conditions the caller should retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BusError::QueueFull { .. } | BusError::SubscriptionTableFull { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("failed to spawn {component:?}: {source}")]
    Spawn {
        component: ComponentId,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}
