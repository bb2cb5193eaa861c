use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    #[default]
    Free,
    Monthly,
    Yearly,
    Lifetime,
}

impl Display for SubscriptionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plan = match self {
            SubscriptionPlan::Free => "free",
            SubscriptionPlan::Monthly => "monthly",
            SubscriptionPlan::Yearly => "yearly",
            SubscriptionPlan::Lifetime => "lifetime",
        };
        write!(f, "{}", plan)
    }
}

impl SubscriptionPlan {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "free" => Some(SubscriptionPlan::Free),
            "monthly" => Some(SubscriptionPlan::Monthly),
            "yearly" => Some(SubscriptionPlan::Yearly),
            "lifetime" => Some(SubscriptionPlan::Lifetime),
            _ => None,
        }
    }

    pub fn is_premium(&self) -> bool {
        !matches!(self, SubscriptionPlan::Free)
    }

    /// Recurring plans carry a provider subscription; lifetime is a one-time order.
    pub fn is_recurring(&self) -> bool {
        matches!(self, SubscriptionPlan::Monthly | SubscriptionPlan::Yearly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_plans_and_rejects_unknown() {
        assert_eq!(
            SubscriptionPlan::from_str("lifetime"),
            Some(SubscriptionPlan::Lifetime)
        );
        assert_eq!(SubscriptionPlan::from_str("premium"), None);
    }

    #[test]
    fn only_free_is_not_premium() {
        assert!(!SubscriptionPlan::Free.is_premium());
        assert!(SubscriptionPlan::Monthly.is_premium());
        assert!(SubscriptionPlan::Yearly.is_premium());
        assert!(SubscriptionPlan::Lifetime.is_premium());
    }

    #[test]
    fn lifetime_is_not_recurring() {
        assert!(!SubscriptionPlan::Lifetime.is_recurring());
        assert!(SubscriptionPlan::Yearly.is_recurring());
    }
}
