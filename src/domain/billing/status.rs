//! Subscription status state machine.
//!
//! ```text
//! none ──► trialing ──► active ◄──► past_due ──► expired
//!   │         │           │            │
//!   └─────────┴───────────┴────────────┴──► canceled
//! ```
//!
//! `canceled` and `expired` are retained for audit and only left again by a
//! fresh subscribe (resubscription).

use crate::domain::foundation::{StateMachine, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a tenant's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Tenant exists but has never subscribed.
    None,

    /// Locally authoritative trial, no provider subscription yet.
    Trialing,

    /// Paid and in good standing.
    Active,

    /// Latest invoice failed. Access is kept while the provider retries.
    PastDue,

    /// Canceled by the tenant or deleted at the provider. No access.
    Canceled,

    /// Ended by the external grace-period policy. No access.
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Statuses in which the tenant is considered subscribed.
    pub fn is_live(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }

    /// Statuses that end a lifecycle; leaving them starts a new one.
    pub fn is_closed(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled | SubscriptionStatus::Expired)
    }

    /// Maps a provider-side subscription status onto ours.
    ///
    /// Returns `None` for provider states with no local meaning (e.g. an
    /// incomplete first payment).
    pub fn from_provider(status: &str) -> Option<Self> {
        match status {
            "trialing" => Some(SubscriptionStatus::Trialing),
            "active" => Some(SubscriptionStatus::Active),
            "past_due" | "unpaid" => Some(SubscriptionStatus::PastDue),
            "canceled" | "incomplete_expired" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SubscriptionStatus::None),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "expired" => Ok(SubscriptionStatus::Expired),
            _ => Err(ValidationError::unknown_value("status", s)),
        }
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            // Subscribe
            (None, Trialing)
                | (None, Active)
            // Trial conversion or failed conversion
                | (Trialing, Active)
                | (Trialing, PastDue)
                | (Trialing, Canceled)
            // Renewal, invoice outcomes
                | (Active, Active)
                | (Active, PastDue)
                | (Active, Canceled)
                | (PastDue, Active)
                | (PastDue, Canceled)
            // External grace-period policy
                | (PastDue, Expired)
            // Resubscription
                | (Canceled, Trialing)
                | (Canceled, Active)
                | (Expired, Trialing)
                | (Expired, Active)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            None => vec![Trialing, Active],
            Trialing => vec![Active, PastDue, Canceled],
            Active => vec![Active, PastDue, Canceled],
            PastDue => vec![Active, Canceled, Expired],
            Canceled => vec![Trialing, Active],
            Expired => vec![Trialing, Active],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionStatus::*;

    const ALL: [SubscriptionStatus; 6] = [None, Trialing, Active, PastDue, Canceled, Expired];

    #[test]
    fn subscribe_edges_leave_none() {
        assert!(None.can_transition_to(&Trialing));
        assert!(None.can_transition_to(&Active));
        assert!(!None.can_transition_to(&PastDue));
        assert!(!None.can_transition_to(&Canceled));
    }

    #[test]
    fn invoice_outcomes_toggle_active_and_past_due() {
        assert_eq!(Active.transition_to(PastDue), Ok(PastDue));
        assert_eq!(PastDue.transition_to(Active), Ok(Active));
    }

    #[test]
    fn expired_is_only_reachable_from_past_due() {
        for status in ALL {
            let allowed = status.can_transition_to(&Expired);
            assert_eq!(allowed, status == PastDue, "{status:?} -> Expired");
        }
    }

    #[test]
    fn canceled_cannot_go_past_due() {
        assert!(Canceled.transition_to(PastDue).is_err());
        assert!(Canceled.transition_to(Canceled).is_err());
    }

    #[test]
    fn can_transition_to_is_consistent_with_valid_transitions() {
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(&to),
                    from.valid_transitions().contains(&to),
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn no_status_is_terminal_in_the_strict_sense() {
        // Closed statuses still allow resubscription.
        for status in ALL {
            assert!(!status.is_terminal());
        }
        assert!(Canceled.is_closed());
        assert!(Expired.is_closed());
    }

    #[test]
    fn provider_statuses_map_onto_local_ones() {
        assert_eq!(SubscriptionStatus::from_provider("active"), Some(Active));
        assert_eq!(SubscriptionStatus::from_provider("unpaid"), Some(PastDue));
        assert_eq!(SubscriptionStatus::from_provider("incomplete"), Option::None);
    }

    #[test]
    fn status_round_trips_through_storage_name() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>(), Ok(status));
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&PastDue).unwrap(), "\"past_due\"");
    }
}
