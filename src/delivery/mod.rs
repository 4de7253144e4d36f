//! Delivery channel abstraction.
//!
//! The engine only consumes the outcome of a send; message content and
//! transport belong to the channel. Implementations must not return errors
//! for provider failures: they report them as [`DeliveryOutcome::Failed`].

use async_trait::async_trait;

use crate::model::{ReminderTier, User};

#[cfg(feature = "email")]
mod email;

#[cfg(feature = "email")]
pub use email::EmailChannel;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { message_id: Option<String> },
    Failed { error: String },
}

impl DeliveryOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        DeliveryOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, user: &User, tier: ReminderTier, remaining_days: i64) -> DeliveryOutcome;
}
