//! Typed records the engine works on.
//!
//! Subscription and preference blobs arrive as JSON from the user store; they
//! are decoded here into fixed shapes. Unknown reminder keys are dropped and
//! missing fields take their documented defaults, so nothing downstream reads
//! ad hoc fields.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::{NotifierError, NotifierResult};

pub type UserId = i64;

/// Validity applied when a subscription does not state one.
pub const DEFAULT_VALIDITY_DAYS: i64 = 30;

/// Reminder classification for one user at one instant.
///
/// Variants are declared in increasing urgency, so `Ord` ranks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReminderTier {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "7day_reminder")]
    SevenDay,
    #[serde(rename = "3day_reminder")]
    ThreeDay,
    #[serde(rename = "1day_reminder")]
    OneDay,
    #[serde(rename = "expired_reminder")]
    Expired,
}

impl ReminderTier {
    /// Every tier that can actually be delivered, most urgent first.
    pub const DELIVERABLE: [ReminderTier; 4] = [
        ReminderTier::Expired,
        ReminderTier::OneDay,
        ReminderTier::ThreeDay,
        ReminderTier::SevenDay,
    ];

    /// Key used in `reminderFrequency` opt-in sets.
    pub fn preference_key(&self) -> Option<&'static str> {
        match self {
            ReminderTier::None => None,
            ReminderTier::SevenDay => Some("7days"),
            ReminderTier::ThreeDay => Some("3days"),
            ReminderTier::OneDay => Some("1day"),
            ReminderTier::Expired => Some("expired"),
        }
    }

    pub fn from_preference_key(key: &str) -> Option<Self> {
        match key {
            "7days" => Some(ReminderTier::SevenDay),
            "3days" => Some(ReminderTier::ThreeDay),
            "1day" => Some(ReminderTier::OneDay),
            "expired" => Some(ReminderTier::Expired),
            _ => None,
        }
    }

    /// Name stored in the log's `template` column and sent to the provider.
    pub fn template(&self) -> &'static str {
        match self {
            ReminderTier::None => "none",
            ReminderTier::SevenDay => "7day_reminder",
            ReminderTier::ThreeDay => "3day_reminder",
            ReminderTier::OneDay => "1day_reminder",
            ReminderTier::Expired => "expired_reminder",
        }
    }

    pub fn from_template(template: &str) -> Option<Self> {
        match template {
            "none" => Some(ReminderTier::None),
            "7day_reminder" => Some(ReminderTier::SevenDay),
            "3day_reminder" => Some(ReminderTier::ThreeDay),
            "1day_reminder" => Some(ReminderTier::OneDay),
            "expired_reminder" => Some(ReminderTier::Expired),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ReminderTier::None)
    }
}

impl fmt::Display for ReminderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template())
    }
}

/// Subscription state embedded in a user record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subscription {
    pub id: Option<String>,
    /// Informational only; expiry is derived from payment date and validity.
    pub status: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    /// `None` or `0` means the default of 30 days.
    pub validity_days: Option<i64>,
}

impl Subscription {
    /// Expiry instant (`paymentDate + validityDays`).
    ///
    /// A missing or zero validity falls back to [`DEFAULT_VALIDITY_DAYS`].
    /// Returns `Ok(None)` when there is no payment date, and a
    /// `ClassificationError` when the validity is negative or overflows.
    pub fn expiry_instant(&self) -> NotifierResult<Option<DateTime<Utc>>> {
        let Some(paid_at) = self.payment_date else {
            return Ok(None);
        };

        let days = match self.validity_days {
            None | Some(0) => DEFAULT_VALIDITY_DAYS,
            Some(days) if days < 0 => {
                return Err(NotifierError::ClassificationError(format!(
                    "validity_days must not be negative, got {days}"
                )));
            }
            Some(days) => days,
        };

        let validity = Duration::try_days(days).ok_or_else(|| {
            NotifierError::ClassificationError(format!("validity_days out of range: {days}"))
        })?;

        paid_at
            .checked_add_signed(validity)
            .map(Some)
            .ok_or_else(|| {
                NotifierError::ClassificationError(format!(
                    "expiry overflows for payment date {paid_at} + {days} days"
                ))
            })
    }
}

fn default_reminder_frequency() -> BTreeSet<ReminderTier> {
    [ReminderTier::SevenDay, ReminderTier::ThreeDay, ReminderTier::OneDay]
        .into_iter()
        .collect()
}

fn default_true() -> bool {
    true
}

/// Per-user notification opt-ins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    #[serde(alias = "emailReminders", default = "default_true")]
    pub email_reminders_enabled: bool,
    #[serde(
        default = "default_reminder_frequency",
        serialize_with = "serialize_reminder_keys",
        deserialize_with = "deserialize_reminder_keys"
    )]
    pub reminder_frequency: BTreeSet<ReminderTier>,
    /// Advisory cache of the last successful send. Never used for dedup.
    #[serde(default)]
    pub last_reminder_sent: Option<DateTime<Utc>>,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email_reminders_enabled: true,
            reminder_frequency: default_reminder_frequency(),
            last_reminder_sent: None,
        }
    }
}

impl NotificationPreferences {
    pub fn with_tiers(enabled: bool, tiers: &[ReminderTier]) -> Self {
        Self {
            email_reminders_enabled: enabled,
            reminder_frequency: tiers.iter().copied().filter(|t| !t.is_none()).collect(),
            last_reminder_sent: None,
        }
    }

    pub fn wants(&self, tier: ReminderTier) -> bool {
        self.reminder_frequency.contains(&tier)
    }
}

fn serialize_reminder_keys<S>(tiers: &BTreeSet<ReminderTier>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.collect_seq(tiers.iter().filter_map(|t| t.preference_key()))
}

// Unknown keys are dropped rather than failing the whole record.
fn deserialize_reminder_keys<'de, D>(d: D) -> Result<BTreeSet<ReminderTier>, D::Error>
where
    D: Deserializer<'de>,
{
    let keys = Option::<Vec<String>>::deserialize(d)?.unwrap_or_default();
    Ok(keys
        .iter()
        .filter_map(|k| ReminderTier::from_preference_key(k.trim()))
        .collect())
}

/// A subscribed user as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub subscription: Option<Subscription>,
    #[serde(default)]
    pub notification_preferences: NotificationPreferences,
}

/// Outcome recorded for a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Sent,
    Failed,
    /// Counted in stats; the engine itself never writes it.
    Pending,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Pending => "pending",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = NotifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            "pending" => Ok(NotificationStatus::Pending),
            other => Err(NotifierError::InvalidRecord(format!(
                "unknown notification status '{other}'"
            ))),
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery details attached to a log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMetadata {
    pub email_address: Option<String>,
    pub delivery_id: Option<String>,
    pub error_message: Option<String>,
}

/// Immutable record of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLogEntry {
    /// Assigned by the store on append.
    pub id: Option<i64>,
    pub user_id: UserId,
    #[serde(rename = "template")]
    pub tier: ReminderTier,
    pub channel: String,
    pub status: NotificationStatus,
    pub sent_at: DateTime<Utc>,
    pub metadata: DeliveryMetadata,
}

impl NotificationLogEntry {
    pub const EMAIL_CHANNEL: &'static str = "email";

    pub fn sent(
        user_id: UserId,
        tier: ReminderTier,
        sent_at: DateTime<Utc>,
        email_address: &str,
        delivery_id: Option<String>,
    ) -> Self {
        Self {
            id: None,
            user_id,
            tier,
            channel: Self::EMAIL_CHANNEL.to_string(),
            status: NotificationStatus::Sent,
            sent_at,
            metadata: DeliveryMetadata {
                email_address: Some(email_address.to_string()),
                delivery_id,
                error_message: None,
            },
        }
    }

    pub fn failed(
        user_id: UserId,
        tier: ReminderTier,
        sent_at: DateTime<Utc>,
        email_address: &str,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            user_id,
            tier,
            channel: Self::EMAIL_CHANNEL.to_string(),
            status: NotificationStatus::Failed,
            sent_at,
            metadata: DeliveryMetadata {
                email_address: Some(email_address.to_string()),
                delivery_id: None,
                error_message: Some(error_message.into()),
            },
        }
    }

    /// UTC calendar day of the attempt; the uniqueness key for `sent` entries.
    pub fn sent_day(&self) -> NaiveDate {
        self.sent_at.date_naive()
    }
}
