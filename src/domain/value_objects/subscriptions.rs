use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::subscriptions::SubscriptionEntity;
use crate::domain::value_objects::enums::{
    subscription_plans::SubscriptionPlan, subscription_statuses::SubscriptionStatus,
};
use crate::domain::value_objects::plans::PlanFeatures;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubscriptionStatusDto {
    pub plan: SubscriptionPlan,
    pub status: SubscriptionStatus,
    pub is_premium: bool,
    pub cancel_at_period_end: bool,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub features: PlanFeatures,
}

impl SubscriptionStatusDto {
    pub fn from_entity(entity: &SubscriptionEntity) -> Self {
        let plan = entity.plan();
        let days_remaining = entity
            .current_period_end
            .map(|end| (end - Utc::now()).num_days().max(0));

        Self {
            plan,
            status: entity.status(),
            is_premium: entity.is_premium_active(),
            cancel_at_period_end: entity.cancel_at_period_end,
            current_period_start: entity.current_period_start,
            current_period_end: entity.current_period_end,
            days_remaining,
            features: PlanFeatures::for_plan(plan),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub plan: String,
}

#[derive(Debug, Serialize)]
pub struct CreateCheckoutResponse {
    pub checkout_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub token: Option<String>,
    pub expected_plan: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    #[serde(default)]
    pub immediately: bool,
}

#[derive(Debug, Serialize)]
pub struct PortalUrlResponse {
    pub portal_url: String,
}
