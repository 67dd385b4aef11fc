use serde::Deserialize;

use crate::services::cost::SpendingCaps;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job dispatch
    pub redis_url: String,

    /// Vision model API key
    pub openai_api_key: String,

    /// Vision model API base URL
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    /// Vision-capable model identifier
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// R2 bucket holding uploaded menu photos
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Extractions allowed per user in any trailing hour
    #[serde(default = "default_rate_limit_per_hour")]
    pub rate_limit_per_hour: u32,

    /// Cost estimate used by the budget gate before token counts exist
    #[serde(default = "default_estimated_extraction_cost")]
    pub estimated_extraction_cost: f64,

    /// Per-user daily spend cap (USD)
    #[serde(default = "default_user_daily_cap")]
    pub user_daily_cap: f64,

    /// Per-user monthly spend cap (USD)
    #[serde(default = "default_user_monthly_cap")]
    pub user_monthly_cap: f64,

    /// Global daily spend cap (USD)
    #[serde(default = "default_global_daily_cap")]
    pub global_daily_cap: f64,

    /// Global monthly spend cap (USD)
    #[serde(default = "default_global_monthly_cap")]
    pub global_monthly_cap: f64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o".to_string()
}

fn default_rate_limit_per_hour() -> u32 {
    10
}

fn default_estimated_extraction_cost() -> f64 {
    0.05
}

fn default_user_daily_cap() -> f64 {
    1.00
}

fn default_user_monthly_cap() -> f64 {
    20.00
}

fn default_global_daily_cap() -> f64 {
    50.00
}

fn default_global_monthly_cap() -> f64 {
    1000.00
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn spending_caps(&self) -> SpendingCaps {
        SpendingCaps {
            user_daily: self.user_daily_cap,
            user_monthly: self.user_monthly_cap,
            global_daily: self.global_daily_cap,
            global_monthly: self.global_monthly_cap,
        }
    }
}
