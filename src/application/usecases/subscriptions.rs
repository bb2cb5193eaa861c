use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    application::usecases::subscription_sync::{
        BillingGateway, SubscriptionError, UseCaseResult,
    },
    domain::{
        entities::subscriptions::CancellationUpdateEntity,
        repositories::subscriptions::SubscriptionRepository,
        value_objects::{
            enums::{
                subscription_plans::SubscriptionPlan,
                subscription_statuses::SubscriptionStatus,
            },
            plans::{Feature, PlanCatalog, PlanFeatures},
            subscriptions::SubscriptionStatusDto,
        },
    },
    payments::lemonsqueezy_client::CreatedCheckout,
};

/// Client-facing subscription operations: status, checkout, cancellation,
/// reactivation, portal and entitlement checks.
pub struct SubscriptionUseCase<S, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    billing_gateway: Arc<G>,
    plan_catalog: PlanCatalog,
}

impl<S, G> SubscriptionUseCase<S, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    pub fn new(
        subscription_repo: Arc<S>,
        billing_gateway: Arc<G>,
        plan_catalog: PlanCatalog,
    ) -> Self {
        Self {
            subscription_repo,
            billing_gateway,
            plan_catalog,
        }
    }

    pub async fn get_status(&self, user_id: Uuid) -> UseCaseResult<SubscriptionStatusDto> {
        let subscription = self
            .subscription_repo
            .get_or_create_for_user(user_id)
            .await?;

        Ok(SubscriptionStatusDto::from_entity(&subscription))
    }

    pub async fn create_checkout(
        &self,
        user_id: Uuid,
        user_email: Option<String>,
        user_name: Option<String>,
        plan: SubscriptionPlan,
    ) -> UseCaseResult<CreatedCheckout> {
        info!(%user_id, plan = %plan, "subscriptions: create checkout session requested");

        if plan == SubscriptionPlan::Free {
            let err =
                SubscriptionError::InvalidRequest("free plan does not require checkout".to_string());
            warn!(%user_id, status = err.status_code().as_u16(), "subscriptions: free plan checkout attempted");
            return Err(err);
        }

        let email = user_email.ok_or_else(|| {
            let err =
                SubscriptionError::InvalidRequest("user email is required for checkout".to_string());
            warn!(%user_id, status = err.status_code().as_u16(), "subscriptions: missing email for checkout");
            err
        })?;

        let variant_id = self.plan_catalog.variant_for_plan(plan).ok_or_else(|| {
            let err = SubscriptionError::InvalidRequest(format!(
                "no billing variant configured for plan {plan}"
            ));
            warn!(%user_id, plan = %plan, status = err.status_code().as_u16(), "subscriptions: plan has no configured variant");
            err
        })?;

        let checkout = self
            .billing_gateway
            .create_checkout(variant_id, user_id, plan, &email, user_name)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    plan = %plan,
                    variant_id,
                    error = ?err,
                    "subscriptions: checkout session creation failed"
                );
                SubscriptionError::Internal(err)
            })?;

        info!(
            %user_id,
            plan = %plan,
            checkout_id = %checkout.id,
            "subscriptions: checkout session created"
        );

        Ok(checkout)
    }

    /// Asks the provider to cancel at period end. With `immediately` the
    /// local row is additionally flipped to CANCELED right away; the provider
    /// call is the same either way.
    pub async fn cancel_subscription(&self, user_id: Uuid, immediately: bool) -> UseCaseResult<()> {
        let subscription = self
            .subscription_repo
            .get_or_create_for_user(user_id)
            .await?;

        let plan = subscription.plan();
        if !plan.is_recurring() {
            let err = SubscriptionError::InvalidRequest(format!(
                "{plan} plan cannot be canceled"
            ));
            warn!(%user_id, plan = %plan, status = err.status_code().as_u16(), "subscriptions: cancel on non-cancelable plan");
            return Err(err);
        }

        let provider_subscription_id =
            subscription.provider_subscription_id.clone().ok_or_else(|| {
                let err = SubscriptionError::InvalidRequest(
                    "no provider subscription on file".to_string(),
                );
                warn!(%user_id, status = err.status_code().as_u16(), "subscriptions: cancel without provider subscription");
                err
            })?;

        self.billing_gateway
            .cancel_subscription(&provider_subscription_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    %provider_subscription_id,
                    error = ?err,
                    "subscriptions: provider cancel failed"
                );
                SubscriptionError::Internal(err)
            })?;

        let now = Utc::now();
        let state = if immediately {
            CancellationUpdateEntity {
                status: SubscriptionStatus::Canceled.to_string(),
                cancel_at_period_end: true,
                canceled_at: Some(now),
                updated_at: now,
            }
        } else {
            CancellationUpdateEntity {
                status: subscription.status.clone(),
                cancel_at_period_end: true,
                canceled_at: subscription.canceled_at,
                updated_at: now,
            }
        };

        self.subscription_repo
            .update_cancellation_state(user_id, state)
            .await?;

        info!(
            %user_id,
            %provider_subscription_id,
            immediately,
            "subscriptions: cancellation recorded"
        );

        Ok(())
    }

    pub async fn reactivate_subscription(&self, user_id: Uuid) -> UseCaseResult<()> {
        let subscription = self
            .subscription_repo
            .get_or_create_for_user(user_id)
            .await?;

        if !subscription.cancel_at_period_end {
            let err = SubscriptionError::InvalidRequest(
                "subscription is not scheduled for cancellation".to_string(),
            );
            warn!(%user_id, status = err.status_code().as_u16(), "subscriptions: reactivate without pending cancellation");
            return Err(err);
        }

        let provider_subscription_id =
            subscription.provider_subscription_id.clone().ok_or_else(|| {
                let err = SubscriptionError::InvalidRequest(
                    "no provider subscription on file".to_string(),
                );
                warn!(%user_id, status = err.status_code().as_u16(), "subscriptions: reactivate without provider subscription");
                err
            })?;

        self.billing_gateway
            .reactivate_subscription(&provider_subscription_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    %provider_subscription_id,
                    error = ?err,
                    "subscriptions: provider reactivation failed"
                );
                SubscriptionError::Internal(err)
            })?;

        let now = Utc::now();
        self.subscription_repo
            .update_cancellation_state(
                user_id,
                CancellationUpdateEntity {
                    status: subscription.status.clone(),
                    cancel_at_period_end: false,
                    canceled_at: None,
                    updated_at: now,
                },
            )
            .await?;

        info!(%user_id, %provider_subscription_id, "subscriptions: reactivation recorded");

        Ok(())
    }

    /// Deliberately does not lazy-create: asking for a portal before any
    /// subscription exists is a 404, not a reason to mint a FREE row.
    pub async fn customer_portal_url(&self, user_id: Uuid) -> UseCaseResult<String> {
        let subscription = self
            .subscription_repo
            .find_by_user_id(user_id)
            .await?
            .ok_or(SubscriptionError::NotFound)?;

        let provider_subscription_id =
            subscription.provider_subscription_id.ok_or_else(|| {
                SubscriptionError::InvalidRequest("no provider subscription on file".to_string())
            })?;

        let url = self
            .billing_gateway
            .customer_portal_url(&provider_subscription_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    %provider_subscription_id,
                    error = ?err,
                    "subscriptions: portal url lookup failed"
                );
                SubscriptionError::Internal(err)
            })?;

        url.ok_or(SubscriptionError::NotFound)
    }

    /// Entitlement check for the owning collaborators (routines, custom
    /// products, custom meals, AI advisor, stats, export). Counted features
    /// compare the caller-supplied current count against the plan cap.
    pub async fn check_feature_access(
        &self,
        user_id: Uuid,
        feature: Feature,
        current_count: Option<i64>,
    ) -> UseCaseResult<bool> {
        let subscription = self
            .subscription_repo
            .get_or_create_for_user(user_id)
            .await?;

        let effective_plan = match subscription.status() {
            SubscriptionStatus::Active | SubscriptionStatus::Trial => subscription.plan(),
            _ => SubscriptionPlan::Free,
        };

        Ok(PlanFeatures::for_plan(effective_plan).allows(feature, current_count))
    }
}
