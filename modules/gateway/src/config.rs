use std::env;

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub orders_upstream_url: String,
    pub payments_upstream_url: String,
    pub bus_type: String,
    pub nats_url: String,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let orders_upstream_url = env::var("ORDERS_UPSTREAM_URL")
            .unwrap_or_else(|_| "http://localhost:8082".to_string());

        let payments_upstream_url = env::var("PAYMENTS_UPSTREAM_URL")
            .unwrap_or_else(|_| "http://localhost:8081".to_string());

        let bus_type = env::var("BUS_TYPE").unwrap_or_else(|_| "inmemory".to_string());

        let nats_url =
            env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        Ok(Config {
            orders_upstream_url,
            payments_upstream_url,
            bus_type,
            nats_url,
            host,
            port,
        })
    }
}
