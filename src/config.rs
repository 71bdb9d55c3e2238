use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub carrier: CarrierConfig,
    pub stripe: StripeConfig,
    pub receipts: ReceiptsConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: "~/.nods/state.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub otp_ttl_minutes: i64,
    pub otp_webhook_url: Option<String>,
    pub otp_webhook_token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            otp_ttl_minutes: 10,
            otp_webhook_url: None,
            otp_webhook_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarrierConfig {
    pub base_url: String,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    /// Messages per second allowed by the carrier account.
    pub rate_per_second: f64,
    pub burst: u32,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twilio.com".to_string(),
            account_sid: None,
            auth_token: None,
            from_number: None,
            rate_per_second: 1.0,
            burst: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StripeConfig {
    pub base_url: String,
    pub secret_key: Option<String>,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.stripe.com".to_string(),
            secret_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptsConfig {
    pub apple_url: String,
    pub apple_sandbox_url: String,
    pub apple_shared_secret: Option<String>,
    pub google_base_url: String,
    pub google_access_token: Option<String>,
}

impl Default for ReceiptsConfig {
    fn default() -> Self {
        Self {
            apple_url: "https://buy.itunes.apple.com/verifyReceipt".to_string(),
            apple_sandbox_url: "https://sandbox.itunes.apple.com/verifyReceipt".to_string(),
            apple_shared_secret: None,
            google_base_url: "https://androidpublisher.googleapis.com".to_string(),
            google_access_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_seconds: 30 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            carrier: CarrierConfig::default(),
            stripe: StripeConfig::default(),
            receipts: ReceiptsConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn resolve_config_path() -> PathBuf {
    env::var("NODS_CONFIG")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde("~/.nods/nods.json"))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config() -> Config {
    let config_path = resolve_config_path();

    let mut cfg = Config::default();

    if config_path.exists() {
        match fs::read_to_string(&config_path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(file_cfg) => cfg = file_cfg,
                Err(err) => tracing::warn!("ignoring invalid config {}: {err}", config_path.display()),
            },
            Err(err) => tracing::warn!("cannot read config {}: {err}", config_path.display()),
        }
    }

    apply_env_overrides(&mut cfg);
    cfg
}

pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(port) = non_empty_env("PORT").and_then(|v| v.parse().ok()) {
        cfg.server.port = port;
    }
    if let Some(url) = non_empty_env("NODS_DATABASE_URL") {
        cfg.database.url = Some(url);
    }
    if let Some(path) = non_empty_env("NODS_SQLITE_PATH") {
        cfg.database.sqlite_path = path;
    }
    if let Some(url) = non_empty_env("NODS_OTP_WEBHOOK_URL") {
        cfg.auth.otp_webhook_url = Some(url);
    }
    if let Some(sid) = non_empty_env("TWILIO_ACCOUNT_SID") {
        cfg.carrier.account_sid = Some(sid);
    }
    if let Some(token) = non_empty_env("TWILIO_AUTH_TOKEN") {
        cfg.carrier.auth_token = Some(token);
    }
    if let Some(number) = non_empty_env("TWILIO_PHONE_NUMBER") {
        cfg.carrier.from_number = Some(number);
    }
    if let Some(key) = non_empty_env("STRIPE_SECRET_KEY") {
        cfg.stripe.secret_key = Some(key);
    }
    if let Some(secret) = non_empty_env("APPLE_SHARED_SECRET") {
        cfg.receipts.apple_shared_secret = Some(secret);
    }
    if let Some(token) = non_empty_env("GOOGLE_PLAY_ACCESS_TOKEN") {
        cfg.receipts.google_access_token = Some(token);
    }
}

pub fn resolve_database_url(cfg: &Config) -> String {
    if let Some(url) = cfg.database.url.as_ref() {
        return url.to_string();
    }

    let path = expand_tilde(&cfg.database.sqlite_path);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    format!("sqlite://{}?mode=rwc", path.to_string_lossy())
}

/// Logs which carrier credentials are present without echoing them.
pub fn log_carrier_summary(cfg: &CarrierConfig) {
    let mask = |v: &Option<String>| match v {
        Some(s) if s.chars().count() > 8 => {
            let head: String = s.chars().take(4).collect();
            let tail: String = s.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("{head}...{tail}")
        }
        Some(_) => "set".to_string(),
        None => "NOT SET".to_string(),
    };
    tracing::info!(
        account_sid = %mask(&cfg.account_sid),
        auth_token = %mask(&cfg.auth_token),
        from_number = cfg.from_number.as_deref().unwrap_or("NOT SET"),
        rate_per_second = cfg.rate_per_second,
        "carrier configuration"
    );
    if cfg.account_sid.is_none() || cfg.auth_token.is_none() || cfg.from_number.is_none() {
        tracing::error!(
            "carrier credentials missing: set TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN, TWILIO_PHONE_NUMBER"
        );
    }
}
