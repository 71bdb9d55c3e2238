use crate::config::AuthConfig;
use crate::db::{self, DbKind, UserRecord};
use crate::error::AppError;
use crate::types::{UsageType, UserProfile};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::AnyPool;

/// Id of the caller, resolved from the bearer token by `require_auth`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

#[derive(Debug, Serialize)]
pub struct VerifiedLogin {
    pub token: String,
    pub user: UserRecord,
}

/// Sign-up body. Profile fields sit at the top level next to `usageType`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    pub usage_type: Option<UsageType>,
    #[serde(flatten)]
    pub profile: UserProfile,
}

pub fn generate_otp(ttl_minutes: i64) -> (String, DateTime<Utc>) {
    let otp = rand::thread_rng().gen_range(100_000..1_000_000).to_string();
    (otp, Utc::now() + Duration::minutes(ttl_minutes))
}

pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

pub async fn register(
    pool: &AnyPool,
    kind: DbKind,
    http: &Client,
    cfg: &AuthConfig,
    registration: Registration,
) -> Result<UserRecord, AppError> {
    let email = registration.email.trim();
    let username = registration.username.trim();
    if email.is_empty() || username.is_empty() {
        return Err(AppError::validation("Email and username are required"));
    }
    // Without an explicit usage type the account is personal and keeps no profile.
    let (usage_type, profile) = match registration.usage_type {
        Some(usage) => (usage, registration.profile.for_usage(usage)?),
        None => (UsageType::Personal, UserProfile::default()),
    };
    if db::get_user_by_email(pool, kind, email).await?.is_some() {
        return Err(AppError::validation("Email is already registered"));
    }
    let user = db::insert_user_with_profile(pool, kind, email, username, usage_type, profile).await?;
    issue_otp(pool, kind, http, cfg, &user).await?;
    Ok(user)
}

pub async fn request_otp(
    pool: &AnyPool,
    kind: DbKind,
    http: &Client,
    cfg: &AuthConfig,
    email: &str,
) -> Result<UserRecord, AppError> {
    if email.trim().is_empty() {
        return Err(AppError::validation("Email is required"));
    }
    let user = db::get_user_by_email(pool, kind, email)
        .await?
        .filter(|u| !u.is_deleted)
        .ok_or(AppError::NotFound("User"))?;
    issue_otp(pool, kind, http, cfg, &user).await?;
    Ok(user)
}

async fn issue_otp(
    pool: &AnyPool,
    kind: DbKind,
    http: &Client,
    cfg: &AuthConfig,
    user: &UserRecord,
) -> Result<(), AppError> {
    let (otp, expires_at) = generate_otp(cfg.otp_ttl_minutes);
    db::set_user_otp(pool, kind, &user.id, &otp, expires_at).await?;

    let Some(url) = cfg.otp_webhook_url.as_ref() else {
        tracing::warn!("no OTP delivery webhook configured; OTP for user {} not delivered", user.id);
        return Ok(());
    };
    let mut req = http.post(url).json(&json!({
        "email": user.email,
        "otp": otp,
        "expires_at": expires_at,
    }));
    if let Some(token) = cfg.otp_webhook_token.as_ref() {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(AppError::Upstream(format!("OTP delivery failed: {status} {body}")));
    }
    Ok(())
}

pub async fn verify_otp(pool: &AnyPool, kind: DbKind, email: &str, otp: &str) -> Result<VerifiedLogin, AppError> {
    if email.trim().is_empty() || otp.trim().is_empty() {
        return Err(AppError::validation("email and OTP are required"));
    }
    let user = db::get_user_by_email(pool, kind, email)
        .await?
        .filter(|u| !u.is_deleted)
        .ok_or(AppError::NotFound("User"))?;

    let valid = match db::get_user_otp(pool, kind, &user.id).await? {
        Some((stored, expires_at)) => stored == otp.trim() && Utc::now() <= expires_at,
        None => false,
    };
    if !valid {
        return Err(AppError::validation("Invalid OTP or OTP expired"));
    }

    db::mark_user_verified(pool, kind, &user.id).await?;
    let token = db::insert_auth_token(pool, kind, &user.id).await?;
    let user = db::get_user(pool, kind, &user.id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(VerifiedLogin { token, user })
}
