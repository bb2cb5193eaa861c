use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

/// Minimal Lemon Squeezy client built on reqwest.
pub struct LemonSqueezyClient {
    http: reqwest::Client,
    api_base_url: String,
    api_key: String,
    store_id: i64,
    webhook_secret: String,
    success_url: String,
}

#[derive(Debug, Deserialize)]
struct Document<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ListDocument<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ErrorDetails>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    status: Option<String>,
    title: Option<String>,
    detail: Option<String>,
}

/// Narrow view of a provider order. Field names are the provider's contract;
/// everything is optional so schema drift upstream degrades to `None` instead
/// of failing the whole reconciliation.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    #[serde(default)]
    pub attributes: OrderAttributes,
    #[serde(default)]
    pub relationships: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderAttributes {
    pub status: Option<String>,
    pub user_email: Option<String>,
    pub customer_id: Option<i64>,
    pub currency: Option<String>,
    pub total: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub first_order_item: Option<OrderItem>,
    pub subscription_id: Option<Value>,
    #[serde(default)]
    pub custom_data: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderItem {
    pub variant_id: Option<i64>,
    pub product_id: Option<i64>,
}

impl OrderRecord {
    pub fn is_paid(&self) -> bool {
        self.attributes.status.as_deref() == Some("paid")
    }

    pub fn variant_id(&self) -> Option<i64> {
        self.attributes
            .first_order_item
            .as_ref()
            .and_then(|item| item.variant_id)
    }

    pub fn custom_field(&self, key: &str) -> Option<String> {
        self.attributes.custom_data.get(key).and_then(value_as_string)
    }

    /// The recurring subscription this order created, if any. The id shows up
    /// either as an attribute or under a relationship link depending on the
    /// endpoint that produced the record.
    pub fn subscription_id(&self) -> Option<String> {
        self.attributes
            .subscription_id
            .as_ref()
            .and_then(value_as_string)
            .or_else(|| {
                value_as_string(&self.relationships["subscription"]["data"]["id"])
            })
            .or_else(|| {
                value_as_string(&self.relationships["subscriptions"]["data"][0]["id"])
            })
    }
}

/// Narrow view of a hosted checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRecord {
    pub id: String,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default)]
    pub relationships: Value,
}

impl CheckoutRecord {
    pub fn url(&self) -> Option<String> {
        self.attributes["url"].as_str().map(|url| url.to_string())
    }

    /// A completed session carries its resulting order id in one of several
    /// places; probe them all before giving up.
    pub fn order_id(&self) -> Option<String> {
        value_as_string(&self.attributes["order_id"])
            .or_else(|| value_as_string(&self.attributes["order"]["id"]))
            .or_else(|| value_as_string(&self.relationships["order"]["data"]["id"]))
            .or_else(|| value_as_string(&self.relationships["orders"]["data"][0]["id"]))
    }
}

/// Narrow view of a provider recurring subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionRecord {
    pub id: String,
    #[serde(default)]
    pub attributes: SubscriptionAttributes,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionAttributes {
    pub status: Option<String>,
    pub variant_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub order_id: Option<i64>,
    pub user_email: Option<String>,
    pub cancelled: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
    pub renews_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub urls: Option<SubscriptionUrls>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionUrls {
    pub customer_portal: Option<String>,
}

/// A verified webhook payload: `meta.event_name` drives dispatch, the custom
/// data echoes whatever we attached at checkout time (user id, plan).
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub meta: WebhookMeta,
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMeta {
    pub event_name: String,
    #[serde(default)]
    pub custom_data: HashMap<String, Value>,
}

impl WebhookEvent {
    pub fn order(&self) -> Option<OrderRecord> {
        serde_json::from_value(self.data.clone()).ok()
    }

    pub fn subscription(&self) -> Option<SubscriptionRecord> {
        serde_json::from_value(self.data.clone()).ok()
    }

    pub fn custom_field(&self, key: &str) -> Option<String> {
        self.meta.custom_data.get(key).and_then(value_as_string)
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.custom_field("user_id")
            .and_then(|raw| Uuid::parse_str(&raw).ok())
    }
}

#[derive(Debug, Clone)]
pub struct CreatedCheckout {
    pub id: String,
    pub url: String,
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

impl LemonSqueezyClient {
    pub fn new(
        api_base_url: String,
        api_key: String,
        store_id: i64,
        webhook_secret: String,
        success_url: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_url,
            api_key,
            store_id,
            webhook_secret,
            success_url,
        }
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let (error_status, error_title, error_detail) =
            match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => match envelope.errors.into_iter().next() {
                    Some(details) => (details.status, details.title, details.detail),
                    None => (None, None, None),
                },
                Err(_) => (None, None, None),
            };

        error!(
            status = %status,
            provider_error_status = ?error_status,
            provider_error_title = ?error_title,
            provider_error_detail = ?error_detail,
            response_body = %body,
            context = %context,
            "lemon squeezy api request failed"
        );

        anyhow::bail!(
            "Lemon Squeezy API request failed: {} (status {})",
            context,
            status
        );
    }

    /// Creates a hosted checkout for the given variant.
    /// https://docs.lemonsqueezy.com/api/checkouts#create-a-checkout
    pub async fn create_checkout(
        &self,
        variant_id: i64,
        user_id: Uuid,
        plan: &str,
        email: &str,
        name: Option<&str>,
    ) -> Result<CreatedCheckout> {
        let mut checkout_data = json!({
            "email": email,
            "custom": {
                "user_id": user_id.to_string(),
                "plan": plan,
            },
        });
        if let Some(name) = name {
            checkout_data["name"] = json!(name);
        }

        let body = json!({
            "data": {
                "type": "checkouts",
                "attributes": {
                    "checkout_data": checkout_data,
                    "product_options": {
                        "redirect_url": self.success_url,
                    },
                },
                "relationships": {
                    "store": {
                        "data": { "type": "stores", "id": self.store_id.to_string() }
                    },
                    "variant": {
                        "data": { "type": "variants", "id": variant_id.to_string() }
                    },
                },
            },
        });

        let resp = self
            .http
            .post(format!("{}/v1/checkouts", self.api_base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, JSON_API_CONTENT_TYPE)
            .header(ACCEPT, JSON_API_CONTENT_TYPE)
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create checkout").await?;

        let parsed: Document<CheckoutRecord> = resp.json().await?;
        let url = parsed
            .data
            .url()
            .ok_or_else(|| anyhow::anyhow!("checkout URL is missing"))?;

        Ok(CreatedCheckout {
            id: parsed.data.id,
            url,
        })
    }

    pub async fn retrieve_order(&self, order_id: &str) -> Result<OrderRecord> {
        // https://docs.lemonsqueezy.com/api/orders#retrieve-an-order
        let resp = self
            .http
            .get(format!("{}/v1/orders/{}", self.api_base_url, order_id))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(ACCEPT, JSON_API_CONTENT_TYPE)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve order").await?;

        let parsed: Document<OrderRecord> = resp.json().await?;
        Ok(parsed.data)
    }

    pub async fn retrieve_checkout(&self, checkout_id: &str) -> Result<CheckoutRecord> {
        // https://docs.lemonsqueezy.com/api/checkouts#retrieve-a-checkout
        let resp = self
            .http
            .get(format!(
                "{}/v1/checkouts/{}",
                self.api_base_url, checkout_id
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(ACCEPT, JSON_API_CONTENT_TYPE)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve checkout").await?;

        let parsed: Document<CheckoutRecord> = resp.json().await?;
        Ok(parsed.data)
    }

    pub async fn retrieve_subscription(&self, subscription_id: &str) -> Result<SubscriptionRecord> {
        // https://docs.lemonsqueezy.com/api/subscriptions#retrieve-a-subscription
        let resp = self
            .http
            .get(format!(
                "{}/v1/subscriptions/{}",
                self.api_base_url, subscription_id
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(ACCEPT, JSON_API_CONTENT_TYPE)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve subscription").await?;

        let parsed: Document<SubscriptionRecord> = resp.json().await?;
        Ok(parsed.data)
    }

    pub async fn list_orders_by_email(
        &self,
        email: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<OrderRecord>> {
        // https://docs.lemonsqueezy.com/api/orders#list-all-orders
        let query = [
            ("filter[user_email]", email.to_string()),
            ("filter[store_id]", self.store_id.to_string()),
            ("page[number]", page.to_string()),
            ("page[size]", page_size.to_string()),
        ];

        let resp = self
            .http
            .get(format!("{}/v1/orders", self.api_base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(ACCEPT, JSON_API_CONTENT_TYPE)
            .query(&query)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "list orders").await?;

        let parsed: ListDocument<OrderRecord> = resp.json().await?;
        Ok(parsed.data)
    }

    pub async fn list_subscriptions_by_email(
        &self,
        email: &str,
        status: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<SubscriptionRecord>> {
        // https://docs.lemonsqueezy.com/api/subscriptions#list-all-subscriptions
        let mut query = vec![
            ("filter[user_email]", email.to_string()),
            ("filter[store_id]", self.store_id.to_string()),
            ("page[number]", page.to_string()),
            ("page[size]", page_size.to_string()),
        ];
        if let Some(status) = status {
            query.push(("filter[status]", status.to_string()));
        }

        let resp = self
            .http
            .get(format!("{}/v1/subscriptions", self.api_base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(ACCEPT, JSON_API_CONTENT_TYPE)
            .query(&query)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "list subscriptions").await?;

        let parsed: ListDocument<SubscriptionRecord> = resp.json().await?;
        Ok(parsed.data)
    }

    /// Schedules the subscription to cancel at period end.
    pub async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        // https://docs.lemonsqueezy.com/api/subscriptions#cancel-a-subscription
        let resp = self
            .http
            .delete(format!(
                "{}/v1/subscriptions/{}",
                self.api_base_url, subscription_id
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(ACCEPT, JSON_API_CONTENT_TYPE)
            .send()
            .await?;
        Self::ensure_success(resp, "cancel subscription").await?;

        Ok(())
    }

    /// Clears a pending cancellation.
    pub async fn reactivate_subscription(&self, subscription_id: &str) -> Result<()> {
        // https://docs.lemonsqueezy.com/api/subscriptions#update-a-subscription
        let body = json!({
            "data": {
                "type": "subscriptions",
                "id": subscription_id,
                "attributes": { "cancelled": false },
            },
        });

        let resp = self
            .http
            .patch(format!(
                "{}/v1/subscriptions/{}",
                self.api_base_url, subscription_id
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, JSON_API_CONTENT_TYPE)
            .header(ACCEPT, JSON_API_CONTENT_TYPE)
            .json(&body)
            .send()
            .await?;
        Self::ensure_success(resp, "reactivate subscription").await?;

        Ok(())
    }

    pub async fn customer_portal_url(&self, subscription_id: &str) -> Result<Option<String>> {
        let subscription = self.retrieve_subscription(subscription_id).await?;
        Ok(subscription
            .attributes
            .urls
            .and_then(|urls| urls.customer_portal))
    }

    /// Verifies the `x-signature` header. The raw body bytes are signed with
    /// HMAC-SHA256 and hex-encoded; comparison must be constant-time.
    /// https://docs.lemonsqueezy.com/help/webhooks#signing-requests
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent> {
        let provided = hex::decode(signature_header.trim())
            .map_err(|_| anyhow::anyhow!("x-signature is not valid hex"))?;

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())?;
        mac.update(payload);
        mac.verify_slice(&provided)
            .map_err(|_| anyhow::anyhow!("invalid webhook signature"))?;

        let event: WebhookEvent = serde_json::from_slice(payload)?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> LemonSqueezyClient {
        LemonSqueezyClient::new(
            "https://api.lemonsqueezy.test".to_string(),
            "test-api-key".to_string(),
            42,
            "whsec_test123".to_string(),
            "https://app.example.com/billing/success".to_string(),
        )
    }

    fn sign(payload: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_webhook_signature() {
        let client = test_client();
        let payload = br#"{"meta":{"event_name":"subscription_updated","custom_data":{"user_id":"4a3c09af-5bb6-4f30-9bcb-07d574f1fe66"}},"data":{"type":"subscriptions","id":"sub_1","attributes":{"status":"active"}}}"#;
        let signature = sign(payload, "whsec_test123");

        let event = client
            .verify_webhook_signature(payload, &signature)
            .expect("valid signature should verify");

        assert_eq!(event.meta.event_name, "subscription_updated");
        assert_eq!(
            event.user_id(),
            Some(Uuid::parse_str("4a3c09af-5bb6-4f30-9bcb-07d574f1fe66").unwrap())
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let client = test_client();
        let payload = br#"{"meta":{"event_name":"order_created"},"data":{}}"#;
        let signature = sign(payload, "some-other-secret");

        assert!(client.verify_webhook_signature(payload, &signature).is_err());
    }

    #[test]
    fn rejects_modified_payload() {
        let client = test_client();
        let payload = br#"{"meta":{"event_name":"order_created"},"data":{}}"#;
        let tampered = br#"{"meta":{"event_name":"order_created"},"data":{"x":1}}"#;
        let signature = sign(payload, "whsec_test123");

        assert!(
            client
                .verify_webhook_signature(tampered, &signature)
                .is_err()
        );
    }

    #[test]
    fn rejects_non_hex_signature() {
        let client = test_client();
        assert!(client.verify_webhook_signature(b"{}", "not-hex!").is_err());
    }

    #[test]
    fn checkout_order_id_probes_every_known_path() {
        let from_attribute: CheckoutRecord = serde_json::from_value(json!({
            "id": "chk_1",
            "attributes": { "order_id": 981 },
        }))
        .unwrap();
        assert_eq!(from_attribute.order_id(), Some("981".to_string()));

        let from_relationship: CheckoutRecord = serde_json::from_value(json!({
            "id": "chk_2",
            "attributes": {},
            "relationships": { "order": { "data": { "type": "orders", "id": "982" } } },
        }))
        .unwrap();
        assert_eq!(from_relationship.order_id(), Some("982".to_string()));

        let from_list_relationship: CheckoutRecord = serde_json::from_value(json!({
            "id": "chk_3",
            "relationships": { "orders": { "data": [ { "type": "orders", "id": "983" } ] } },
        }))
        .unwrap();
        assert_eq!(from_list_relationship.order_id(), Some("983".to_string()));

        let unresolved: CheckoutRecord = serde_json::from_value(json!({
            "id": "chk_4",
            "attributes": { "url": "https://checkout.example" },
        }))
        .unwrap();
        assert_eq!(unresolved.order_id(), None);
    }

    #[test]
    fn order_view_extracts_plan_and_variant() {
        let order: OrderRecord = serde_json::from_value(json!({
            "id": "900",
            "attributes": {
                "status": "paid",
                "total": 4900,
                "currency": "USD",
                "first_order_item": { "variant_id": 111, "product_id": 7 },
                "custom_data": { "plan": "lifetime" },
            },
        }))
        .unwrap();

        assert!(order.is_paid());
        assert_eq!(order.variant_id(), Some(111));
        assert_eq!(order.custom_field("plan"), Some("lifetime".to_string()));
        assert_eq!(order.subscription_id(), None);
    }
}
