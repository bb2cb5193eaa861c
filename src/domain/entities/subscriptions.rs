use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::value_objects::enums::{
    subscription_plans::SubscriptionPlan, subscription_statuses::SubscriptionStatus,
};
use crate::infrastructure::postgres::schema::subscriptions;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = subscriptions)]
pub struct SubscriptionEntity {
    pub id: i64,
    pub user_id: Uuid,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub plan: String,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub price_minor: Option<i32>,
    pub currency: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionEntity {
    pub fn plan(&self) -> SubscriptionPlan {
        SubscriptionPlan::from_str(&self.plan).unwrap_or_default()
    }

    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_str(&self.status)
    }

    /// Paid plan with an active billing state; what the verify-payment poll
    /// waits for.
    pub fn is_premium_active(&self) -> bool {
        self.plan().is_premium() && self.status() == SubscriptionStatus::Active
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = subscriptions)]
pub struct InsertSubscriptionEntity {
    pub user_id: Uuid,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub plan: String,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub price_minor: Option<i32>,
    pub currency: Option<String>,
}

impl InsertSubscriptionEntity {
    /// The lazily-created row every user starts from.
    pub fn free_for_user(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            provider_customer_id: None,
            provider_subscription_id: None,
            plan: SubscriptionPlan::Free.to_string(),
            status: SubscriptionStatus::Active.to_string(),
            current_period_start: now,
            current_period_end: None,
            cancel_at_period_end: false,
            canceled_at: None,
            price_minor: None,
            currency: None,
        }
    }
}

/// Full-overwrite changeset applied on every successful reconciliation.
/// `treat_none_as_null` so a reconciled `None` clears the column; these
/// fields are never patched incrementally.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = subscriptions, treat_none_as_null = true)]
pub struct ReconcileSubscriptionEntity {
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub plan: String,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub price_minor: Option<i32>,
    pub currency: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Cancellation/reactivation flag update; leaves plan and period fields alone.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = subscriptions, treat_none_as_null = true)]
pub struct CancellationUpdateEntity {
    pub status: String,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
