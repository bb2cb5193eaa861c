use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    application::usecases::subscription_sync::{
        BillingGateway, SubscriptionError, SubscriptionSync, UseCaseResult,
    },
    domain::{
        entities::subscriptions::{CancellationUpdateEntity, ReconcileSubscriptionEntity},
        repositories::subscriptions::SubscriptionRepository,
        value_objects::enums::{
            subscription_plans::SubscriptionPlan, subscription_statuses::SubscriptionStatus,
        },
    },
    payments::lemonsqueezy_client::{SubscriptionRecord, WebhookEvent},
};

/// Applies provider push events to the store through the same transition core
/// the verify-payment path uses. This is the authoritative, eventually
/// consistent path; everything except a bad signature is acknowledged so the
/// provider does not build up a redelivery backlog.
pub struct BillingWebhookUseCase<S, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    billing_gateway: Arc<G>,
    subscription_sync: Arc<SubscriptionSync<S, G>>,
}

impl<S, G> BillingWebhookUseCase<S, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    pub fn new(
        subscription_repo: Arc<S>,
        billing_gateway: Arc<G>,
        subscription_sync: Arc<SubscriptionSync<S, G>>,
    ) -> Self {
        Self {
            subscription_repo,
            billing_gateway,
            subscription_sync,
        }
    }

    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> UseCaseResult<()> {
        let event = self
            .billing_gateway
            .verify_webhook_signature(payload, signature)
            .map_err(|err| {
                warn!(error = %err, "billing webhook signature verification failed");
                SubscriptionError::SignatureInvalid
            })?;

        info!(event_name = %event.meta.event_name, "billing webhook verified");

        match event.meta.event_name.as_str() {
            "order_created" => self.handle_order_event(&event).await,
            "subscription_created"
            | "subscription_updated"
            | "subscription_resumed"
            | "subscription_unpaused" => self.handle_subscription_upsert(&event).await,
            "subscription_cancelled" | "subscription_paused" => {
                self.handle_subscription_cancelled(&event).await
            }
            "subscription_expired" => self.handle_subscription_expired(&event).await,
            other => {
                debug!(event_name = other, "unhandled billing webhook event");
                Ok(())
            }
        }
    }

    async fn handle_order_event(&self, event: &WebhookEvent) -> UseCaseResult<()> {
        let Some(order) = event.order() else {
            warn!("order event without a readable order payload; dropping");
            return Ok(());
        };
        let Some(user_id) = event.user_id() else {
            warn!(order_id = %order.id, "order event without a user id in custom data; dropping");
            return Ok(());
        };

        let metadata_plan = event
            .custom_field("plan")
            .as_deref()
            .and_then(SubscriptionPlan::from_str);

        if let Err(err) = self
            .subscription_sync
            .apply_order(user_id, &order, metadata_plan)
            .await
        {
            error!(
                %user_id,
                order_id = %order.id,
                error = ?err,
                "failed to apply order from webhook; dropping event"
            );
        }

        Ok(())
    }

    async fn handle_subscription_upsert(&self, event: &WebhookEvent) -> UseCaseResult<()> {
        let Some(subscription) = event.subscription() else {
            warn!("subscription event without a readable payload; dropping");
            return Ok(());
        };
        let Some(user_id) = self.resolve_user(event, &subscription).await else {
            return Ok(());
        };

        let metadata_plan = event
            .custom_field("plan")
            .as_deref()
            .and_then(SubscriptionPlan::from_str);

        if let Err(err) = self
            .subscription_sync
            .apply_provider_subscription(user_id, &subscription, metadata_plan)
            .await
        {
            error!(
                %user_id,
                provider_subscription_id = %subscription.id,
                error = ?err,
                "failed to upsert subscription from webhook; dropping event"
            );
        }

        Ok(())
    }

    async fn handle_subscription_cancelled(&self, event: &WebhookEvent) -> UseCaseResult<()> {
        let Some(subscription) = event.subscription() else {
            warn!("cancellation event without a readable payload; dropping");
            return Ok(());
        };
        let Some(user_id) = self.resolve_user(event, &subscription).await else {
            return Ok(());
        };

        let now = Utc::now();
        let state = CancellationUpdateEntity {
            status: SubscriptionStatus::Canceled.to_string(),
            cancel_at_period_end: true,
            canceled_at: Some(now),
            updated_at: now,
        };

        if let Err(err) = self
            .subscription_repo
            .update_cancellation_state(user_id, state)
            .await
        {
            error!(
                %user_id,
                provider_subscription_id = %subscription.id,
                error = ?err,
                "failed to record cancellation from webhook; dropping event"
            );
        } else {
            info!(
                %user_id,
                provider_subscription_id = %subscription.id,
                "subscription marked canceled from webhook"
            );
        }

        Ok(())
    }

    /// Expiry is terminal: the plan falls back to FREE, which also severs the
    /// provider-subscription link (a FREE row never references one).
    async fn handle_subscription_expired(&self, event: &WebhookEvent) -> UseCaseResult<()> {
        let Some(subscription) = event.subscription() else {
            warn!("expiry event without a readable payload; dropping");
            return Ok(());
        };
        let Some(user_id) = self.resolve_user(event, &subscription).await else {
            return Ok(());
        };

        let existing = match self.subscription_repo.find_by_user_id(user_id).await {
            Ok(Some(existing)) => existing,
            Ok(None) => {
                warn!(%user_id, "expiry event for a user without a subscription row; dropping");
                return Ok(());
            }
            Err(err) => {
                error!(%user_id, error = ?err, "failed to load subscription for expiry; dropping event");
                return Ok(());
            }
        };

        let now = Utc::now();
        let state = ReconcileSubscriptionEntity {
            provider_customer_id: existing.provider_customer_id.clone(),
            provider_subscription_id: None,
            plan: SubscriptionPlan::Free.to_string(),
            status: SubscriptionStatus::Expired.to_string(),
            current_period_start: existing.current_period_start,
            current_period_end: existing.current_period_end,
            cancel_at_period_end: false,
            canceled_at: Some(now),
            price_minor: existing.price_minor,
            currency: existing.currency.clone(),
            updated_at: now,
        };

        if let Err(err) = self
            .subscription_repo
            .apply_reconciled_state(user_id, state)
            .await
        {
            error!(
                %user_id,
                provider_subscription_id = %subscription.id,
                error = ?err,
                "failed to expire subscription from webhook; dropping event"
            );
        } else {
            info!(
                %user_id,
                provider_subscription_id = %subscription.id,
                "subscription expired from webhook"
            );
        }

        Ok(())
    }

    /// Resolves the affected user: the row already linked to this provider
    /// subscription wins; a first-time event falls back to the user id the
    /// checkout stamped into custom data.
    async fn resolve_user(
        &self,
        event: &WebhookEvent,
        subscription: &SubscriptionRecord,
    ) -> Option<Uuid> {
        match self
            .subscription_repo
            .find_by_provider_subscription_id(&subscription.id)
            .await
        {
            Ok(Some(row)) => Some(row.user_id),
            Ok(None) => {
                let fallback = event.user_id();
                if fallback.is_none() {
                    warn!(
                        provider_subscription_id = %subscription.id,
                        event_name = %event.meta.event_name,
                        "webhook event matches no local row and carries no user id; dropping"
                    );
                }
                fallback
            }
            Err(err) => {
                error!(
                    provider_subscription_id = %subscription.id,
                    error = ?err,
                    "failed to look up subscription by provider id; dropping event"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::usecases::subscription_sync::MockBillingGateway;
    use crate::domain::entities::subscriptions::SubscriptionEntity;
    use crate::domain::repositories::subscriptions::MockSubscriptionRepository;
    use crate::domain::value_objects::plans::PlanCatalog;
    use chrono::{DateTime, TimeZone, Utc};
    use mockall::predicate::eq;
    use serde_json::json;

    fn monthly_entity(user_id: Uuid) -> SubscriptionEntity {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        SubscriptionEntity {
            id: 1,
            user_id,
            provider_customer_id: Some("77".to_string()),
            provider_subscription_id: Some("sub_1".to_string()),
            plan: "monthly".to_string(),
            status: "active".to_string(),
            current_period_start: created,
            current_period_end: Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()),
            cancel_at_period_end: false,
            canceled_at: None,
            price_minor: Some(900),
            currency: Some("USD".to_string()),
            created_at: created,
            updated_at: created,
        }
    }

    fn entity_from_state(user_id: Uuid, state: &ReconcileSubscriptionEntity) -> SubscriptionEntity {
        SubscriptionEntity {
            provider_customer_id: state.provider_customer_id.clone(),
            provider_subscription_id: state.provider_subscription_id.clone(),
            plan: state.plan.clone(),
            status: state.status.clone(),
            current_period_start: state.current_period_start,
            current_period_end: state.current_period_end,
            cancel_at_period_end: state.cancel_at_period_end,
            canceled_at: state.canceled_at,
            price_minor: state.price_minor,
            currency: state.currency.clone(),
            ..monthly_entity(user_id)
        }
    }

    fn processor(
        repo: MockSubscriptionRepository,
        gateway: MockBillingGateway,
    ) -> BillingWebhookUseCase<MockSubscriptionRepository, MockBillingGateway> {
        let repo = Arc::new(repo);
        let gateway = Arc::new(gateway);
        let sync = Arc::new(SubscriptionSync::new(
            Arc::clone(&repo),
            Arc::clone(&gateway),
            PlanCatalog::new(111, 222, 333),
        ));
        BillingWebhookUseCase::new(repo, gateway, sync)
    }

    fn gateway_returning_event(event_json: serde_json::Value) -> MockBillingGateway {
        let mut gateway = MockBillingGateway::new();
        gateway
            .expect_verify_webhook_signature()
            .returning(move |_, _| Ok(serde_json::from_value(event_json.clone()).unwrap()));
        gateway
    }

    #[tokio::test]
    async fn signature_failure_is_the_only_surfaced_error() {
        let mut gateway = MockBillingGateway::new();
        gateway
            .expect_verify_webhook_signature()
            .returning(|_, _| Err(anyhow::anyhow!("invalid webhook signature")));

        let processor = processor(MockSubscriptionRepository::new(), gateway);
        let err = processor.handle_webhook(b"{}", "deadbeef").await.unwrap_err();

        assert!(matches!(err, SubscriptionError::SignatureInvalid));
    }

    #[tokio::test]
    async fn renewal_webhook_updates_status_and_period_end() {
        let user_id = Uuid::new_v4();
        let renews_at: DateTime<Utc> = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();

        let gateway = gateway_returning_event(json!({
            "meta": { "event_name": "subscription_updated" },
            "data": {
                "id": "sub_1",
                "attributes": {
                    "status": "active",
                    "variant_id": 111,
                    "cancelled": false,
                    "renews_at": renews_at.to_rfc3339(),
                },
            },
        }));

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_find_by_provider_subscription_id()
            .with(eq("sub_1"))
            .returning(move |_| Ok(Some(monthly_entity(user_id))));
        repo.expect_get_or_create_for_user()
            .with(eq(user_id))
            .returning(move |id| Ok(monthly_entity(id)));
        repo.expect_apply_reconciled_state()
            .withf(move |_, state| {
                state.status == "active"
                    && state.plan == "monthly"
                    && state.current_period_end == Some(renews_at)
                    && !state.cancel_at_period_end
            })
            .returning(|id, state| Ok(entity_from_state(id, &state)));

        let processor = processor(repo, gateway);
        processor.handle_webhook(b"{}", "deadbeef").await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_webhook_sets_flags_and_timestamp() {
        let user_id = Uuid::new_v4();

        let gateway = gateway_returning_event(json!({
            "meta": { "event_name": "subscription_cancelled" },
            "data": {
                "id": "sub_1",
                "attributes": { "status": "cancelled" },
            },
        }));

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_find_by_provider_subscription_id()
            .with(eq("sub_1"))
            .returning(move |_| Ok(Some(monthly_entity(user_id))));
        repo.expect_update_cancellation_state()
            .withf(|_, state| {
                state.status == "canceled"
                    && state.cancel_at_period_end
                    && state.canceled_at.is_some()
            })
            .returning(move |id, state| {
                let mut entity = monthly_entity(id);
                entity.status = state.status.clone();
                entity.cancel_at_period_end = state.cancel_at_period_end;
                entity.canceled_at = state.canceled_at;
                Ok(entity)
            });

        let processor = processor(repo, gateway);
        processor.handle_webhook(b"{}", "deadbeef").await.unwrap();
    }

    #[tokio::test]
    async fn expiry_webhook_resets_the_plan_to_free() {
        let user_id = Uuid::new_v4();

        let gateway = gateway_returning_event(json!({
            "meta": { "event_name": "subscription_expired" },
            "data": {
                "id": "sub_1",
                "attributes": { "status": "expired" },
            },
        }));

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_find_by_provider_subscription_id()
            .with(eq("sub_1"))
            .returning(move |_| Ok(Some(monthly_entity(user_id))));
        repo.expect_find_by_user_id()
            .with(eq(user_id))
            .returning(move |id| Ok(Some(monthly_entity(id))));
        repo.expect_apply_reconciled_state()
            .withf(|_, state| {
                state.plan == "free"
                    && state.status == "expired"
                    && state.provider_subscription_id.is_none()
                    && !state.cancel_at_period_end
                    && state.canceled_at.is_some()
            })
            .returning(|id, state| Ok(entity_from_state(id, &state)));

        let processor = processor(repo, gateway);
        processor.handle_webhook(b"{}", "deadbeef").await.unwrap();
    }

    #[tokio::test]
    async fn first_time_subscription_event_links_through_custom_data() {
        let user_id = Uuid::new_v4();

        let gateway = gateway_returning_event(json!({
            "meta": {
                "event_name": "subscription_created",
                "custom_data": { "user_id": user_id.to_string() },
            },
            "data": {
                "id": "sub_2",
                "attributes": {
                    "status": "active",
                    "variant_id": 222,
                    "renews_at": "2026-01-01T00:00:00Z",
                },
            },
        }));

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_find_by_provider_subscription_id()
            .with(eq("sub_2"))
            .returning(|_| Ok(None));
        repo.expect_get_or_create_for_user()
            .with(eq(user_id))
            .returning(move |id| {
                Ok(SubscriptionEntity {
                    plan: "free".to_string(),
                    provider_subscription_id: None,
                    provider_customer_id: None,
                    ..monthly_entity(id)
                })
            });
        repo.expect_apply_reconciled_state()
            .withf(|_, state| {
                state.plan == "yearly"
                    && state.provider_subscription_id.as_deref() == Some("sub_2")
            })
            .returning(|id, state| Ok(entity_from_state(id, &state)));

        let processor = processor(repo, gateway);
        processor.handle_webhook(b"{}", "deadbeef").await.unwrap();
    }

    #[tokio::test]
    async fn unrecognized_event_is_acknowledged_without_changes() {
        let gateway = gateway_returning_event(json!({
            "meta": { "event_name": "subscription_payment_success" },
            "data": { "id": "sub_1", "attributes": {} },
        }));

        let processor = processor(MockSubscriptionRepository::new(), gateway);
        processor.handle_webhook(b"{}", "deadbeef").await.unwrap();
    }

    #[tokio::test]
    async fn order_event_without_user_id_is_dropped_but_acknowledged() {
        let gateway = gateway_returning_event(json!({
            "meta": { "event_name": "order_created" },
            "data": {
                "id": "700",
                "attributes": { "status": "paid", "custom_data": { "plan": "monthly" } },
            },
        }));

        let processor = processor(MockSubscriptionRepository::new(), gateway);
        processor.handle_webhook(b"{}", "deadbeef").await.unwrap();
    }

    #[tokio::test]
    async fn paid_order_event_applies_through_the_shared_core() {
        let user_id = Uuid::new_v4();

        let gateway = gateway_returning_event(json!({
            "meta": {
                "event_name": "order_created",
                "custom_data": { "user_id": user_id.to_string(), "plan": "lifetime" },
            },
            "data": {
                "id": "701",
                "attributes": { "status": "paid", "total": 14900, "currency": "USD" },
            },
        }));

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_get_or_create_for_user()
            .with(eq(user_id))
            .returning(move |id| {
                Ok(SubscriptionEntity {
                    plan: "free".to_string(),
                    provider_subscription_id: None,
                    provider_customer_id: None,
                    ..monthly_entity(id)
                })
            });
        repo.expect_apply_reconciled_state()
            .withf(|_, state| {
                state.plan == "lifetime"
                    && state.status == "active"
                    && state.current_period_end.is_none()
                    && !state.cancel_at_period_end
            })
            .returning(|id, state| Ok(entity_from_state(id, &state)));

        let processor = processor(repo, gateway);
        processor.handle_webhook(b"{}", "deadbeef").await.unwrap();
    }
}
