use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::subscriptions::{ReconcileSubscriptionEntity, SubscriptionEntity},
        repositories::subscriptions::SubscriptionRepository,
        value_objects::{
            enums::{
                subscription_plans::SubscriptionPlan,
                subscription_statuses::SubscriptionStatus,
            },
            plans::PlanCatalog,
        },
    },
    payments::lemonsqueezy_client::{
        CheckoutRecord, CreatedCheckout, LemonSqueezyClient, OrderRecord, SubscriptionRecord,
        WebhookEvent,
    },
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn create_checkout(
        &self,
        variant_id: i64,
        user_id: Uuid,
        plan: SubscriptionPlan,
        email: &str,
        name: Option<String>,
    ) -> AnyResult<CreatedCheckout>;

    async fn get_order(&self, order_id: &str) -> AnyResult<OrderRecord>;

    async fn get_checkout(&self, checkout_id: &str) -> AnyResult<CheckoutRecord>;

    async fn get_subscription(&self, subscription_id: &str) -> AnyResult<SubscriptionRecord>;

    async fn list_orders_by_email(
        &self,
        email: &str,
        page: u32,
        page_size: u32,
    ) -> AnyResult<Vec<OrderRecord>>;

    async fn list_subscriptions_by_email(
        &self,
        email: &str,
        status: Option<String>,
        page: u32,
        page_size: u32,
    ) -> AnyResult<Vec<SubscriptionRecord>>;

    async fn cancel_subscription(&self, subscription_id: &str) -> AnyResult<()>;

    async fn reactivate_subscription(&self, subscription_id: &str) -> AnyResult<()>;

    async fn customer_portal_url(&self, subscription_id: &str) -> AnyResult<Option<String>>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str)
    -> AnyResult<WebhookEvent>;
}

#[async_trait]
impl BillingGateway for LemonSqueezyClient {
    async fn create_checkout(
        &self,
        variant_id: i64,
        user_id: Uuid,
        plan: SubscriptionPlan,
        email: &str,
        name: Option<String>,
    ) -> AnyResult<CreatedCheckout> {
        self.create_checkout(variant_id, user_id, &plan.to_string(), email, name.as_deref())
            .await
    }

    async fn get_order(&self, order_id: &str) -> AnyResult<OrderRecord> {
        self.retrieve_order(order_id).await
    }

    async fn get_checkout(&self, checkout_id: &str) -> AnyResult<CheckoutRecord> {
        self.retrieve_checkout(checkout_id).await
    }

    async fn get_subscription(&self, subscription_id: &str) -> AnyResult<SubscriptionRecord> {
        self.retrieve_subscription(subscription_id).await
    }

    async fn list_orders_by_email(
        &self,
        email: &str,
        page: u32,
        page_size: u32,
    ) -> AnyResult<Vec<OrderRecord>> {
        self.list_orders_by_email(email, page, page_size).await
    }

    async fn list_subscriptions_by_email(
        &self,
        email: &str,
        status: Option<String>,
        page: u32,
        page_size: u32,
    ) -> AnyResult<Vec<SubscriptionRecord>> {
        self.list_subscriptions_by_email(email, status.as_deref(), page, page_size)
            .await
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> AnyResult<()> {
        self.cancel_subscription(subscription_id).await
    }

    async fn reactivate_subscription(&self, subscription_id: &str) -> AnyResult<()> {
        self.reactivate_subscription(subscription_id).await
    }

    async fn customer_portal_url(&self, subscription_id: &str) -> AnyResult<Option<String>> {
        self.customer_portal_url(subscription_id).await
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> AnyResult<WebhookEvent> {
        self.verify_webhook_signature(payload, signature)
    }
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("subscription not found")]
    NotFound,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("cannot determine plan for order {0}")]
    UnknownPlan(String),
    #[error("payment not completed")]
    VerificationTimeout,
    #[error("invalid webhook signature")]
    SignatureInvalid,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SubscriptionError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            SubscriptionError::NotFound => StatusCode::NOT_FOUND,
            SubscriptionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SubscriptionError::UnknownPlan(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SubscriptionError::VerificationTimeout => StatusCode::PAYMENT_REQUIRED,
            SubscriptionError::SignatureInvalid => StatusCode::BAD_REQUEST,
            SubscriptionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SubscriptionError>;

#[derive(Debug)]
pub enum OrderOutcome {
    Applied(SubscriptionEntity),
    Skipped,
}

/// Shared transition core: both the client-driven verification path and the
/// webhook path go through here, so repeated application from either side
/// converges on the same target state.
pub struct SubscriptionSync<S, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    billing_gateway: Arc<G>,
    plan_catalog: PlanCatalog,
}

impl<S, G> SubscriptionSync<S, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    pub fn new(subscription_repo: Arc<S>, billing_gateway: Arc<G>, plan_catalog: PlanCatalog) -> Self {
        Self {
            subscription_repo,
            billing_gateway,
            plan_catalog,
        }
    }

    /// Applies a provider order to the user's subscription. Unpaid orders are
    /// skipped without touching the row. The plan comes from the order's
    /// custom checkout data first, then from its variant id; a paid order
    /// that resolves to neither is an error.
    pub async fn apply_order(
        &self,
        user_id: Uuid,
        order: &OrderRecord,
        metadata_plan: Option<SubscriptionPlan>,
    ) -> UseCaseResult<OrderOutcome> {
        if !order.is_paid() {
            info!(
                order_id = %order.id,
                order_status = ?order.attributes.status,
                %user_id,
                "order is not paid; leaving subscription untouched"
            );
            return Ok(OrderOutcome::Skipped);
        }

        let plan = metadata_plan
            .or_else(|| {
                order
                    .custom_field("plan")
                    .as_deref()
                    .and_then(SubscriptionPlan::from_str)
            })
            .or_else(|| {
                order
                    .variant_id()
                    .and_then(|variant_id| self.plan_catalog.plan_for_variant(variant_id))
            })
            .filter(|plan| plan.is_premium())
            .ok_or_else(|| SubscriptionError::UnknownPlan(order.id.clone()))?;

        let existing = self
            .subscription_repo
            .get_or_create_for_user(user_id)
            .await?;

        let provider_subscription_id = if plan.is_recurring() {
            order.subscription_id()
        } else {
            None
        };

        if Self::already_reflects(&existing, plan, provider_subscription_id.as_deref()) {
            debug!(
                order_id = %order.id,
                %user_id,
                plan = %plan,
                "subscription already reflects this order"
            );
            return Ok(OrderOutcome::Applied(existing));
        }

        let now = Utc::now();
        let mut state = ReconcileSubscriptionEntity {
            provider_customer_id: order
                .attributes
                .customer_id
                .map(|id| id.to_string())
                .or_else(|| existing.provider_customer_id.clone()),
            provider_subscription_id: provider_subscription_id.clone(),
            plan: plan.to_string(),
            status: SubscriptionStatus::Active.to_string(),
            current_period_start: now,
            current_period_end: None,
            cancel_at_period_end: false,
            canceled_at: None,
            price_minor: order
                .attributes
                .total
                .and_then(|total| i32::try_from(total).ok())
                .or(existing.price_minor),
            currency: order
                .attributes
                .currency
                .clone()
                .or_else(|| existing.currency.clone()),
            updated_at: now,
        };

        if let Some(subscription_id) = provider_subscription_id.as_deref() {
            // Best-effort: the provider may not have materialized the
            // subscription yet. The plan/status change stands either way.
            match self.billing_gateway.get_subscription(subscription_id).await {
                Ok(subscription) => {
                    let attrs = &subscription.attributes;
                    if let Some(created_at) = attrs.created_at {
                        state.current_period_start = created_at;
                    }
                    state.current_period_end = attrs.renews_at.or(attrs.ends_at);
                    let cancelled = attrs.cancelled.unwrap_or(false);
                    state.cancel_at_period_end = cancelled;
                    state.canceled_at = cancelled.then(|| attrs.ends_at.unwrap_or(now));
                    if let Some(customer_id) = attrs.customer_id {
                        state.provider_customer_id = Some(customer_id.to_string());
                    }
                }
                Err(err) => {
                    warn!(
                        order_id = %order.id,
                        subscription_id,
                        error = ?err,
                        "failed to fetch provider subscription; applying order with default period"
                    );
                }
            }
        }

        let updated = self
            .subscription_repo
            .apply_reconciled_state(user_id, state)
            .await?;

        info!(
            order_id = %order.id,
            %user_id,
            plan = %plan,
            "applied paid order to subscription"
        );

        Ok(OrderOutcome::Applied(updated))
    }

    /// Upserts local state from a provider subscription record (webhook
    /// upserts and the direct provider-subscription scan both land here).
    pub async fn apply_provider_subscription(
        &self,
        user_id: Uuid,
        subscription: &SubscriptionRecord,
        metadata_plan: Option<SubscriptionPlan>,
    ) -> UseCaseResult<SubscriptionEntity> {
        let existing = self
            .subscription_repo
            .get_or_create_for_user(user_id)
            .await?;

        let attrs = &subscription.attributes;
        let status = match attrs.status.as_deref() {
            Some(provider_status) => SubscriptionStatus::from_provider(provider_status),
            None => existing.status(),
        };
        let plan = metadata_plan
            .or_else(|| {
                attrs
                    .variant_id
                    .and_then(|variant_id| self.plan_catalog.plan_for_variant(variant_id))
            })
            .unwrap_or_else(|| existing.plan());

        let now = Utc::now();
        let cancelled = attrs.cancelled.unwrap_or(false);
        let state = ReconcileSubscriptionEntity {
            provider_customer_id: attrs
                .customer_id
                .map(|id| id.to_string())
                .or_else(|| existing.provider_customer_id.clone()),
            provider_subscription_id: Some(subscription.id.clone()),
            plan: plan.to_string(),
            status: status.to_string(),
            current_period_start: attrs.created_at.unwrap_or(existing.current_period_start),
            current_period_end: attrs
                .renews_at
                .or(attrs.ends_at)
                .or(existing.current_period_end),
            cancel_at_period_end: cancelled,
            canceled_at: if cancelled {
                Some(attrs.ends_at.unwrap_or(now))
            } else {
                None
            },
            price_minor: existing.price_minor,
            currency: existing.currency.clone(),
            updated_at: now,
        };

        let updated = self
            .subscription_repo
            .apply_reconciled_state(user_id, state)
            .await?;

        info!(
            provider_subscription_id = %subscription.id,
            %user_id,
            plan = %plan,
            status = %status,
            "synced subscription from provider record"
        );

        Ok(updated)
    }

    fn already_reflects(
        existing: &SubscriptionEntity,
        plan: SubscriptionPlan,
        provider_subscription_id: Option<&str>,
    ) -> bool {
        if existing.status() != SubscriptionStatus::Active || existing.plan() != plan {
            return false;
        }
        match provider_subscription_id {
            Some(id) => existing.provider_subscription_id.as_deref() == Some(id),
            // The order carries no linkage; an active row on the same plan is
            // already converged and must not have its period restarted.
            None => true,
        }
    }
}
