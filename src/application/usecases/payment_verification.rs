use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    application::usecases::subscription_sync::{
        BillingGateway, OrderOutcome, SubscriptionError, SubscriptionSync, UseCaseResult,
    },
    domain::{
        entities::subscriptions::SubscriptionEntity,
        repositories::subscriptions::SubscriptionRepository,
        value_objects::{
            enums::subscription_plans::SubscriptionPlan, plans::PlanCatalog,
        },
    },
};

pub const VERIFY_POLL_ATTEMPTS: u32 = 15;
pub const VERIFY_POLL_INTERVAL: Duration = Duration::from_secs(2);

const ORDER_SCAN_MAX_PAGES: u32 = 3;
const ORDER_SCAN_PAGE_SIZE: u32 = 10;
const ORDER_SCAN_MAX_AGE_MINUTES: i64 = 30;

/// Injectable sleep so tests drive the polling loop without real time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PollDelay: Send + Sync {
    async fn wait(&self, duration: Duration);
}

pub struct TokioDelay;

#[async_trait]
impl PollDelay for TokioDelay {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Resolution strategies in the order they are attempted. First one that
/// applies an update wins; every failure is soft.
#[derive(Debug, Clone, Copy)]
enum ResolutionStrategy {
    DirectOrderId,
    CheckoutSessionOrder,
    RecentOrderScan,
    ProviderSubscriptionScan,
}

const RESOLUTION_ORDER: [ResolutionStrategy; 4] = [
    ResolutionStrategy::DirectOrderId,
    ResolutionStrategy::CheckoutSessionOrder,
    ResolutionStrategy::RecentOrderScan,
    ResolutionStrategy::ProviderSubscriptionScan,
];

/// Turns whatever token the client brought back from checkout into a
/// confirmed subscription update, then waits for the store to reflect a
/// premium state. The webhook path is authoritative; this is the accelerant,
/// so an unresolvable token still proceeds to the polling window.
pub struct PaymentVerificationUseCase<S, G, D>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
    D: PollDelay + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    billing_gateway: Arc<G>,
    subscription_sync: Arc<SubscriptionSync<S, G>>,
    plan_catalog: PlanCatalog,
    delay: Arc<D>,
}

impl<S, G, D> PaymentVerificationUseCase<S, G, D>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
    D: PollDelay + Send + Sync + 'static,
{
    pub fn new(
        subscription_repo: Arc<S>,
        billing_gateway: Arc<G>,
        subscription_sync: Arc<SubscriptionSync<S, G>>,
        plan_catalog: PlanCatalog,
        delay: Arc<D>,
    ) -> Self {
        Self {
            subscription_repo,
            billing_gateway,
            subscription_sync,
            plan_catalog,
            delay,
        }
    }

    pub async fn verify_payment(
        &self,
        user_id: Uuid,
        email: &str,
        token: Option<&str>,
        expected_plan: Option<SubscriptionPlan>,
    ) -> UseCaseResult<SubscriptionEntity> {
        info!(
            %user_id,
            token = ?token,
            expected_plan = ?expected_plan,
            "verify payment requested"
        );

        for strategy in RESOLUTION_ORDER {
            match self
                .try_strategy(strategy, user_id, email, token, expected_plan)
                .await
            {
                Ok(true) => {
                    info!(%user_id, strategy = ?strategy, "payment resolved and applied");
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        %user_id,
                        strategy = ?strategy,
                        error = ?err,
                        "resolution strategy failed; trying the next one"
                    );
                }
            }
        }

        self.await_premium(user_id).await
    }

    async fn try_strategy(
        &self,
        strategy: ResolutionStrategy,
        user_id: Uuid,
        email: &str,
        token: Option<&str>,
        expected_plan: Option<SubscriptionPlan>,
    ) -> UseCaseResult<bool> {
        match strategy {
            ResolutionStrategy::DirectOrderId => self.resolve_direct_order(user_id, token).await,
            ResolutionStrategy::CheckoutSessionOrder => {
                self.resolve_checkout_order(user_id, token).await
            }
            ResolutionStrategy::RecentOrderScan => {
                self.resolve_recent_order(user_id, email, expected_plan).await
            }
            ResolutionStrategy::ProviderSubscriptionScan => {
                self.resolve_provider_subscription(user_id, email, expected_plan)
                    .await
            }
        }
    }

    async fn resolve_direct_order(
        &self,
        user_id: Uuid,
        token: Option<&str>,
    ) -> UseCaseResult<bool> {
        let Some(order_id) = token.filter(|candidate| is_numeric(candidate)) else {
            return Ok(false);
        };

        let order = self.billing_gateway.get_order(order_id).await?;
        let outcome = self.subscription_sync.apply_order(user_id, &order, None).await?;
        Ok(matches!(outcome, OrderOutcome::Applied(_)))
    }

    async fn resolve_checkout_order(
        &self,
        user_id: Uuid,
        token: Option<&str>,
    ) -> UseCaseResult<bool> {
        let Some(checkout_id) = token.filter(|candidate| !candidate.is_empty() && !is_numeric(candidate))
        else {
            return Ok(false);
        };

        let checkout = self.billing_gateway.get_checkout(checkout_id).await?;
        let Some(order_id) = checkout.order_id() else {
            debug!(%user_id, checkout_id, "checkout session carries no order yet");
            return Ok(false);
        };

        let order = self.billing_gateway.get_order(&order_id).await?;
        let outcome = self.subscription_sync.apply_order(user_id, &order, None).await?;
        Ok(matches!(outcome, OrderOutcome::Applied(_)))
    }

    /// Scans the user's recent paid orders. Old orders are ignored so a
    /// verify call can never resurrect a purchase from a previous period;
    /// the expected-plan hint narrows candidates but the order's own variant
    /// stays authoritative for the plan that gets applied.
    async fn resolve_recent_order(
        &self,
        user_id: Uuid,
        email: &str,
        expected_plan: Option<SubscriptionPlan>,
    ) -> UseCaseResult<bool> {
        let cutoff = Utc::now() - ChronoDuration::minutes(ORDER_SCAN_MAX_AGE_MINUTES);

        for page in 1..=ORDER_SCAN_MAX_PAGES {
            let orders = self
                .billing_gateway
                .list_orders_by_email(email, page, ORDER_SCAN_PAGE_SIZE)
                .await?;
            if orders.is_empty() {
                break;
            }

            for order in &orders {
                if !order.is_paid() {
                    continue;
                }
                let Some(created_at) = order.attributes.created_at else {
                    continue;
                };
                if created_at < cutoff {
                    continue;
                }
                if let (Some(hint), Some(variant_plan)) = (
                    expected_plan,
                    order
                        .variant_id()
                        .and_then(|variant_id| self.plan_catalog.plan_for_variant(variant_id)),
                ) {
                    if hint != variant_plan {
                        continue;
                    }
                }

                match self.subscription_sync.apply_order(user_id, order, None).await {
                    Ok(OrderOutcome::Applied(_)) => return Ok(true),
                    Ok(OrderOutcome::Skipped) => {}
                    Err(err) => {
                        warn!(
                            %user_id,
                            order_id = %order.id,
                            error = ?err,
                            "candidate order failed to apply; continuing scan"
                        );
                    }
                }
            }
        }

        Ok(false)
    }

    async fn resolve_provider_subscription(
        &self,
        user_id: Uuid,
        email: &str,
        expected_plan: Option<SubscriptionPlan>,
    ) -> UseCaseResult<bool> {
        let subscriptions = self
            .billing_gateway
            .list_subscriptions_by_email(email, Some("active".to_string()), 1, ORDER_SCAN_PAGE_SIZE)
            .await?;

        for subscription in &subscriptions {
            let variant_plan = subscription
                .attributes
                .variant_id
                .and_then(|variant_id| self.plan_catalog.plan_for_variant(variant_id));
            let Some(plan) = variant_plan else {
                continue;
            };
            if expected_plan.is_some_and(|hint| hint != plan) {
                continue;
            }

            self.subscription_sync
                .apply_provider_subscription(user_id, subscription, None)
                .await?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Bridges the race with webhook delivery: the answer may land in the
    /// store from the other path at any point inside the window.
    async fn await_premium(&self, user_id: Uuid) -> UseCaseResult<SubscriptionEntity> {
        for attempt in 0..VERIFY_POLL_ATTEMPTS {
            if attempt > 0 {
                self.delay.wait(VERIFY_POLL_INTERVAL).await;
            }

            if let Some(subscription) = self.subscription_repo.find_by_user_id(user_id).await? {
                if subscription.is_premium_active() {
                    info!(%user_id, attempt, "subscription reached premium state");
                    return Ok(subscription);
                }
            }
        }

        warn!(
            %user_id,
            attempts = VERIFY_POLL_ATTEMPTS,
            "verification window exhausted without a premium subscription"
        );
        Err(SubscriptionError::VerificationTimeout)
    }
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|byte| byte.is_ascii_digit())
}
