pub mod lemonsqueezy_client;
