use once_cell::sync::Lazy;
use std::time::Duration;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `8000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Prefix the gateway puts on sandbox credentials. The verification bypass is only
/// ever armed for keys carrying it.
pub const SANDBOX_SECRET_PREFIX: &str = "test_";

/// Payment gateway connection settings, resolved once at startup and passed to the
/// ledger via an `Extension` layer rather than read from module-level constants.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_base: String,
    pub client_key: String,
    pub secret_key: String,
    /// Accept sandbox transaction keys without a confirm round-trip. Forced off
    /// unless the secret key itself is a sandbox credential.
    pub sandbox: bool,
    /// When present, webhook payloads must carry a matching HMAC signature.
    pub webhook_secret: Option<String>,
    pub confirm_timeout: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let secret_key = read_optional_env("TOSS_SECRET_KEY").unwrap_or_default();
        let sandbox_requested = std::env::var("PAYMENT_GATEWAY_SANDBOX")
            .ok()
            .map(|value| {
                let normalized = value.trim().to_ascii_lowercase();
                matches!(normalized.as_str(), "1" | "true" | "yes")
            })
            .unwrap_or(false);
        let confirm_timeout = std::env::var("GATEWAY_CONFIRM_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(10);

        Self {
            api_base: read_optional_env("TOSS_API_BASE")
                .unwrap_or_else(|| "https://api.tosspayments.com".to_string()),
            client_key: read_optional_env("TOSS_CLIENT_KEY").unwrap_or_default(),
            sandbox: sandbox_requested && secret_key.starts_with(SANDBOX_SECRET_PREFIX),
            secret_key,
            webhook_secret: read_optional_env("PAYMENT_WEBHOOK_SECRET"),
            confirm_timeout: Duration::from_secs(confirm_timeout),
        }
    }
}

/// Plan price table. The checkout endpoint validates client-submitted amounts
/// against this before creating an order.
#[derive(Debug, Clone)]
pub struct PlanPricing {
    pub premium_monthly: i32,
}

impl PlanPricing {
    pub fn from_env() -> Self {
        Self {
            premium_monthly: std::env::var("PREMIUM_PLAN_PRICE")
                .ok()
                .and_then(|value| value.parse::<i32>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(9500),
        }
    }

    pub fn price_for(&self, plan: &str) -> Option<i32> {
        match plan {
            "premium" => Some(self.premium_monthly),
            _ => None,
        }
    }
}
