use anyhow::Result;

use super::config_model::{Database, DotEnvyConfig, LemonSqueezy, Server};

const DEFAULT_API_BASE_URL: &str = "https://api.lemonsqueezy.com";

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let server = Server {
        port: std::env::var("SERVER_PORT")
            .expect("SERVER_PORT is invalid")
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .expect("SERVER_BODY_LIMIT is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .expect("SERVER_TIMEOUT is invalid")
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let lemon_squeezy = LemonSqueezy {
        api_base_url: std::env::var("LEMONSQUEEZY_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
        api_key: std::env::var("LEMONSQUEEZY_API_KEY").expect("LEMONSQUEEZY_API_KEY is invalid"),
        store_id: std::env::var("LEMONSQUEEZY_STORE_ID")
            .expect("LEMONSQUEEZY_STORE_ID is invalid")
            .parse()?,
        webhook_secret: std::env::var("LEMONSQUEEZY_WEBHOOK_SECRET")
            .expect("LEMONSQUEEZY_WEBHOOK_SECRET is invalid"),
        success_url: std::env::var("LEMONSQUEEZY_SUCCESS_URL")
            .expect("LEMONSQUEEZY_SUCCESS_URL is invalid"),
        monthly_variant_id: std::env::var("LEMONSQUEEZY_VARIANT_MONTHLY")
            .expect("LEMONSQUEEZY_VARIANT_MONTHLY is invalid")
            .parse()?,
        yearly_variant_id: std::env::var("LEMONSQUEEZY_VARIANT_YEARLY")
            .expect("LEMONSQUEEZY_VARIANT_YEARLY is invalid")
            .parse()?,
        lifetime_variant_id: std::env::var("LEMONSQUEEZY_VARIANT_LIFETIME")
            .expect("LEMONSQUEEZY_VARIANT_LIFETIME is invalid")
            .parse()?,
    };

    Ok(DotEnvyConfig {
        server,
        database,
        lemon_squeezy,
    })
}

pub fn get_auth_secret() -> Result<String> {
    dotenvy::dotenv().ok();

    Ok(std::env::var("JWT_SECRET").expect("JWT_SECRET is invalid"))
}
