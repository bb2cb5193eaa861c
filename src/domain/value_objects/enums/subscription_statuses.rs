use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Canceled,
    Expired,
    PastDue,
    Incomplete,
    Trial,
}

impl Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::Trial => "trial",
        };
        write!(f, "{}", status)
    }
}

impl SubscriptionStatus {
    pub fn from_str(value: &str) -> Self {
        match value {
            "active" => SubscriptionStatus::Active,
            "canceled" => SubscriptionStatus::Canceled,
            "expired" => SubscriptionStatus::Expired,
            "past_due" => SubscriptionStatus::PastDue,
            "incomplete" => SubscriptionStatus::Incomplete,
            "trial" => SubscriptionStatus::Trial,
            _ => SubscriptionStatus::Expired,
        }
    }

    /// Maps a billing-provider status string onto our lifecycle states.
    /// Total: any string the provider ever sends resolves to exactly one state.
    pub fn from_provider(value: &str) -> Self {
        match value {
            "active" | "on_trial" | "trialing" => SubscriptionStatus::Active,
            "cancelled" | "canceled" => SubscriptionStatus::Canceled,
            "past_due" | "paused" | "unpaid" => SubscriptionStatus::PastDue,
            "incomplete" => SubscriptionStatus::Incomplete,
            _ => SubscriptionStatus::Expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_mapping_is_total() {
        let samples = [
            ("active", SubscriptionStatus::Active),
            ("on_trial", SubscriptionStatus::Active),
            ("trialing", SubscriptionStatus::Active),
            ("cancelled", SubscriptionStatus::Canceled),
            ("canceled", SubscriptionStatus::Canceled),
            ("past_due", SubscriptionStatus::PastDue),
            ("paused", SubscriptionStatus::PastDue),
            ("unpaid", SubscriptionStatus::PastDue),
            ("incomplete", SubscriptionStatus::Incomplete),
            ("expired", SubscriptionStatus::Expired),
        ];
        for (provider, expected) in samples {
            assert_eq!(SubscriptionStatus::from_provider(provider), expected);
        }
    }

    #[test]
    fn unknown_provider_status_maps_to_expired() {
        assert_eq!(
            SubscriptionStatus::from_provider("some_future_status"),
            SubscriptionStatus::Expired
        );
        assert_eq!(
            SubscriptionStatus::from_provider(""),
            SubscriptionStatus::Expired
        );
    }

    #[test]
    fn stored_text_round_trips() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Expired,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::Trial,
        ] {
            assert_eq!(SubscriptionStatus::from_str(&status.to_string()), status);
        }
    }
}
