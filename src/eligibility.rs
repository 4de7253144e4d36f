//! Decides whether a classified user may receive a reminder.
//!
//! Rules run in order and the first failing one wins:
//! 1. a tier must apply at all,
//! 2. email reminders must be enabled,
//! 3. the tier must be in the user's opt-in set,
//! 4. no `sent` entry for (user, tier) within the dedup window.
//!
//! Rule 4 reads the notification log. `lastReminderSent` on the user is a
//! display cache and is never consulted here.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;

use crate::errors::NotifierResult;
use crate::model::{NotificationPreferences, ReminderTier, UserId};
use crate::store::NotificationLogStore;

/// Why a user was or was not let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    NoTier,
    RemindersDisabled,
    TierNotSelected,
    AlreadySent,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Eligibility::Eligible => "eligible",
            Eligibility::NoTier => "no_tier",
            Eligibility::RemindersDisabled => "reminders_disabled",
            Eligibility::TierNotSelected => "tier_not_selected",
            Eligibility::AlreadySent => "already_sent",
        };
        f.write_str(s)
    }
}

/// Preference rules only (no I/O).
pub fn check_preferences(prefs: &NotificationPreferences, tier: ReminderTier) -> Eligibility {
    if tier.is_none() {
        return Eligibility::NoTier;
    }
    if !prefs.email_reminders_enabled {
        return Eligibility::RemindersDisabled;
    }
    if !prefs.wants(tier) {
        return Eligibility::TierNotSelected;
    }
    Eligibility::Eligible
}

/// Preference rules plus the log-backed dedup check.
#[derive(Clone)]
pub struct EligibilityFilter {
    log_store: Arc<dyn NotificationLogStore>,
    dedup_window: Duration,
}

impl EligibilityFilter {
    pub fn new(log_store: Arc<dyn NotificationLogStore>, dedup_window: Duration) -> Self {
        Self {
            log_store,
            dedup_window,
        }
    }

    /// Evaluate every rule for `user_id`.
    ///
    /// The log is only queried when the preference rules pass.
    pub async fn check(
        &self,
        user_id: UserId,
        prefs: &NotificationPreferences,
        tier: ReminderTier,
        now: DateTime<Utc>,
    ) -> NotifierResult<Eligibility> {
        let by_prefs = check_preferences(prefs, tier);
        if !by_prefs.is_eligible() {
            return Ok(by_prefs);
        }

        let since = now
            .checked_sub_signed(self.dedup_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match self.log_store.find_recent_sent(user_id, tier, since).await? {
            Some(_) => Ok(Eligibility::AlreadySent),
            None => Ok(Eligibility::Eligible),
        }
    }
}
