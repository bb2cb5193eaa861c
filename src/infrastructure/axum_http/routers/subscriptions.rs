use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use tracing::{error, info, warn};

use crate::{
    application::usecases::{
        billing_webhook::BillingWebhookUseCase,
        payment_verification::{PaymentVerificationUseCase, PollDelay, TokioDelay},
        subscription_sync::{BillingGateway, SubscriptionSync},
        subscriptions::SubscriptionUseCase,
    },
    auth::AuthUser,
    config::config_model::DotEnvyConfig,
    domain::{
        repositories::subscriptions::SubscriptionRepository,
        value_objects::{
            enums::subscription_plans::SubscriptionPlan,
            plans::PlanCatalog,
            subscriptions::{
                CancelSubscriptionRequest, CreateCheckoutRequest, CreateCheckoutResponse,
                PortalUrlResponse, SubscriptionStatusDto, VerifyPaymentRequest,
            },
        },
    },
    infrastructure::postgres::{
        postgres_connection::PgPoolSquad, repositories::subscriptions::SubscriptionPostgres,
    },
    payments::lemonsqueezy_client::LemonSqueezyClient,
};

pub struct SubscriptionRouterState<S, G, D>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
    D: PollDelay + Send + Sync + 'static,
{
    pub subscriptions: SubscriptionUseCase<S, G>,
    pub verification: PaymentVerificationUseCase<S, G, D>,
    pub webhook: BillingWebhookUseCase<S, G>,
}

pub fn routes(db_pool: Arc<PgPoolSquad>, config: Arc<DotEnvyConfig>) -> Router {
    let subscription_repo = Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool)));
    let billing_gateway = Arc::new(LemonSqueezyClient::new(
        config.lemon_squeezy.api_base_url.clone(),
        config.lemon_squeezy.api_key.clone(),
        config.lemon_squeezy.store_id,
        config.lemon_squeezy.webhook_secret.clone(),
        config.lemon_squeezy.success_url.clone(),
    ));
    let plan_catalog = PlanCatalog::new(
        config.lemon_squeezy.monthly_variant_id,
        config.lemon_squeezy.yearly_variant_id,
        config.lemon_squeezy.lifetime_variant_id,
    );
    let subscription_sync = Arc::new(SubscriptionSync::new(
        Arc::clone(&subscription_repo),
        Arc::clone(&billing_gateway),
        plan_catalog.clone(),
    ));

    let state = Arc::new(SubscriptionRouterState {
        subscriptions: SubscriptionUseCase::new(
            Arc::clone(&subscription_repo),
            Arc::clone(&billing_gateway),
            plan_catalog.clone(),
        ),
        verification: PaymentVerificationUseCase::new(
            Arc::clone(&subscription_repo),
            Arc::clone(&billing_gateway),
            Arc::clone(&subscription_sync),
            plan_catalog,
            Arc::new(TokioDelay),
        ),
        webhook: BillingWebhookUseCase::new(subscription_repo, billing_gateway, subscription_sync),
    });

    Router::new()
        .route("/status", get(subscription_status))
        .route("/checkout", post(create_checkout))
        .route("/verify-payment", post(verify_payment))
        .route("/cancel", post(cancel_subscription))
        .route("/reactivate", post(reactivate_subscription))
        .route("/portal", get(customer_portal))
        .route("/webhook", post(billing_webhook))
        .with_state(state)
}

pub async fn subscription_status<S, G, D>(
    State(state): State<Arc<SubscriptionRouterState<S, G, D>>>,
    AuthUser { user_id, .. }: AuthUser,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
    D: PollDelay + Send + Sync + 'static,
{
    match state.subscriptions.get_status(user_id).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => {
            error!(%user_id, error = ?err, "subscriptions: failed to load status");
            (err.status_code(), err.to_string()).into_response()
        }
    }
}

pub async fn create_checkout<S, G, D>(
    State(state): State<Arc<SubscriptionRouterState<S, G, D>>>,
    AuthUser { user_id, email, .. }: AuthUser,
    Json(payload): Json<CreateCheckoutRequest>,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
    D: PollDelay + Send + Sync + 'static,
{
    let Some(plan) = SubscriptionPlan::from_str(&payload.plan) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("unknown plan: {}", payload.plan),
        )
            .into_response();
    };

    match state
        .subscriptions
        .create_checkout(user_id, email, None, plan)
        .await
    {
        Ok(checkout) => Json(CreateCheckoutResponse {
            checkout_id: checkout.id,
            checkout_url: checkout.url,
        })
        .into_response(),
        Err(err) => {
            warn!(%user_id, error = %err, "subscriptions: checkout request failed");
            (err.status_code(), err.to_string()).into_response()
        }
    }
}

pub async fn verify_payment<S, G, D>(
    State(state): State<Arc<SubscriptionRouterState<S, G, D>>>,
    AuthUser { user_id, email, .. }: AuthUser,
    Json(payload): Json<VerifyPaymentRequest>,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
    D: PollDelay + Send + Sync + 'static,
{
    let Some(email) = email else {
        return (
            StatusCode::BAD_REQUEST,
            "user email is required for payment verification".to_string(),
        )
            .into_response();
    };

    let expected_plan = payload
        .expected_plan
        .as_deref()
        .and_then(SubscriptionPlan::from_str);

    match state
        .verification
        .verify_payment(user_id, &email, payload.token.as_deref(), expected_plan)
        .await
    {
        Ok(subscription) => {
            info!(%user_id, plan = %subscription.plan, "subscriptions: payment verified");
            Json(SubscriptionStatusDto::from_entity(&subscription)).into_response()
        }
        Err(err) => {
            warn!(%user_id, error = %err, "subscriptions: payment verification failed");
            (err.status_code(), err.to_string()).into_response()
        }
    }
}

pub async fn cancel_subscription<S, G, D>(
    State(state): State<Arc<SubscriptionRouterState<S, G, D>>>,
    AuthUser { user_id, .. }: AuthUser,
    Json(payload): Json<CancelSubscriptionRequest>,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
    D: PollDelay + Send + Sync + 'static,
{
    match state
        .subscriptions
        .cancel_subscription(user_id, payload.immediately)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!(%user_id, error = %err, "subscriptions: cancel request failed");
            (err.status_code(), err.to_string()).into_response()
        }
    }
}

pub async fn reactivate_subscription<S, G, D>(
    State(state): State<Arc<SubscriptionRouterState<S, G, D>>>,
    AuthUser { user_id, .. }: AuthUser,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
    D: PollDelay + Send + Sync + 'static,
{
    match state.subscriptions.reactivate_subscription(user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!(%user_id, error = %err, "subscriptions: reactivate request failed");
            (err.status_code(), err.to_string()).into_response()
        }
    }
}

pub async fn customer_portal<S, G, D>(
    State(state): State<Arc<SubscriptionRouterState<S, G, D>>>,
    AuthUser { user_id, .. }: AuthUser,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
    D: PollDelay + Send + Sync + 'static,
{
    match state.subscriptions.customer_portal_url(user_id).await {
        Ok(portal_url) => Json(PortalUrlResponse { portal_url }).into_response(),
        Err(err) => {
            warn!(%user_id, error = %err, "subscriptions: portal lookup failed");
            (err.status_code(), err.to_string()).into_response()
        }
    }
}

/// The body must be the exact raw bytes the provider signed; re-encoding the
/// JSON would break verification.
pub async fn billing_webhook<S, G, D>(
    State(state): State<Arc<SubscriptionRouterState<S, G, D>>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
    D: PollDelay + Send + Sync + 'static,
{
    let Some(signature) = headers
        .get("x-signature")
        .and_then(|value| value.to_str().ok())
    else {
        return (
            StatusCode::BAD_REQUEST,
            "missing x-signature header".to_string(),
        )
            .into_response();
    };

    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing webhook body".to_string()).into_response();
    }

    match state.webhook.handle_webhook(&body, signature).await {
        Ok(()) => Json(serde_json::json!({ "received": true })).into_response(),
        Err(err) => (err.status_code(), err.to_string()).into_response(),
    }
}
