use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::subscriptions::{
    CancellationUpdateEntity, ReconcileSubscriptionEntity, SubscriptionEntity,
};

#[automock]
#[async_trait]
pub trait SubscriptionRepository {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<SubscriptionEntity>>;

    /// Lazily creates the FREE/active row on first access. Must be race-safe:
    /// two concurrent calls for a never-seen user observe the same single row.
    async fn get_or_create_for_user(&self, user_id: Uuid) -> Result<SubscriptionEntity>;

    /// Overwrites the reconciled fields wholesale; see
    /// [`ReconcileSubscriptionEntity`].
    async fn apply_reconciled_state(
        &self,
        user_id: Uuid,
        state: ReconcileSubscriptionEntity,
    ) -> Result<SubscriptionEntity>;

    async fn update_cancellation_state(
        &self,
        user_id: Uuid,
        state: CancellationUpdateEntity,
    ) -> Result<SubscriptionEntity>;
}
