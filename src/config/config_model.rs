#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub server: Server,
    pub database: Database,
    pub lemon_squeezy: LemonSqueezy,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct LemonSqueezy {
    pub api_base_url: String,
    pub api_key: String,
    pub store_id: i64,
    pub webhook_secret: String,
    pub success_url: String,
    pub monthly_variant_id: i64,
    pub yearly_variant_id: i64,
    pub lifetime_variant_id: i64,
}
