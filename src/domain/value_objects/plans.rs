use serde::{Deserialize, Serialize};

use crate::domain::value_objects::enums::subscription_plans::SubscriptionPlan;

/// Immutable variant-id lookup table, built once from configuration and
/// injected wherever plans need resolving. The billing provider only knows
/// numeric variant ids; we only know plans.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    variants: Vec<(i64, SubscriptionPlan)>,
}

impl PlanCatalog {
    pub fn new(
        monthly_variant_id: i64,
        yearly_variant_id: i64,
        lifetime_variant_id: i64,
    ) -> Self {
        Self {
            variants: vec![
                (monthly_variant_id, SubscriptionPlan::Monthly),
                (yearly_variant_id, SubscriptionPlan::Yearly),
                (lifetime_variant_id, SubscriptionPlan::Lifetime),
            ],
        }
    }

    pub fn plan_for_variant(&self, variant_id: i64) -> Option<SubscriptionPlan> {
        self.variants
            .iter()
            .find(|(id, _)| *id == variant_id)
            .map(|(_, plan)| *plan)
    }

    pub fn variant_for_plan(&self, plan: SubscriptionPlan) -> Option<i64> {
        self.variants
            .iter()
            .find(|(_, candidate)| *candidate == plan)
            .map(|(id, _)| *id)
    }
}

/// Features the app gates on the current plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Routines,
    CustomProducts,
    CustomMeals,
    AiAdvisor,
    AdvancedStats,
    DataExport,
}

/// Limits and feature flags attached to a plan. A `None` cap means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanFeatures {
    pub max_routines: Option<i64>,
    pub max_custom_products: Option<i64>,
    pub max_custom_meals: Option<i64>,
    pub ai_advisor: bool,
    pub advanced_stats: bool,
    pub data_export: bool,
}

impl PlanFeatures {
    pub fn for_plan(plan: SubscriptionPlan) -> Self {
        match plan {
            SubscriptionPlan::Free => Self {
                max_routines: Some(3),
                max_custom_products: Some(10),
                max_custom_meals: Some(10),
                ai_advisor: false,
                advanced_stats: false,
                data_export: false,
            },
            SubscriptionPlan::Monthly
            | SubscriptionPlan::Yearly
            | SubscriptionPlan::Lifetime => Self {
                max_routines: None,
                max_custom_products: None,
                max_custom_meals: None,
                ai_advisor: true,
                advanced_stats: true,
                data_export: true,
            },
        }
    }

    /// Pure entitlement check: for counted features the caller supplies the
    /// user's current count from the owning collaborator.
    pub fn allows(&self, feature: Feature, current_count: Option<i64>) -> bool {
        match feature {
            Feature::Routines => Self::within_cap(self.max_routines, current_count),
            Feature::CustomProducts => Self::within_cap(self.max_custom_products, current_count),
            Feature::CustomMeals => Self::within_cap(self.max_custom_meals, current_count),
            Feature::AiAdvisor => self.ai_advisor,
            Feature::AdvancedStats => self.advanced_stats,
            Feature::DataExport => self.data_export,
        }
    }

    fn within_cap(cap: Option<i64>, current_count: Option<i64>) -> bool {
        match cap {
            None => true,
            Some(cap) => current_count.unwrap_or(0) < cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PlanCatalog {
        PlanCatalog::new(111, 222, 333)
    }

    #[test]
    fn maps_variants_both_ways() {
        assert_eq!(
            catalog().plan_for_variant(222),
            Some(SubscriptionPlan::Yearly)
        );
        assert_eq!(
            catalog().variant_for_plan(SubscriptionPlan::Lifetime),
            Some(333)
        );
        assert_eq!(catalog().plan_for_variant(999), None);
        assert_eq!(catalog().variant_for_plan(SubscriptionPlan::Free), None);
    }

    #[test]
    fn free_plan_enforces_counted_caps() {
        let features = PlanFeatures::for_plan(SubscriptionPlan::Free);
        assert!(features.allows(Feature::Routines, Some(2)));
        assert!(!features.allows(Feature::Routines, Some(3)));
        assert!(features.allows(Feature::CustomMeals, None));
        assert!(!features.allows(Feature::AiAdvisor, None));
        assert!(!features.allows(Feature::DataExport, None));
    }

    #[test]
    fn paid_plans_are_unlimited() {
        for plan in [
            SubscriptionPlan::Monthly,
            SubscriptionPlan::Yearly,
            SubscriptionPlan::Lifetime,
        ] {
            let features = PlanFeatures::for_plan(plan);
            assert!(features.allows(Feature::Routines, Some(10_000)));
            assert!(features.allows(Feature::AiAdvisor, None));
            assert!(features.allows(Feature::AdvancedStats, None));
        }
    }
}
