use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use crate::types::{UsageType, UserProfile};
use std::borrow::Cow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

pub fn db_kind_from_url(url: &str) -> DbKind {
    let lower = url.to_lowercase();
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        DbKind::Postgres
    } else {
        DbKind::Sqlite
    }
}

pub fn rewrite_sql<'a>(sql: &'a str, kind: DbKind) -> Cow<'a, str> {
    match kind {
        DbKind::Sqlite => Cow::Borrowed(sql),
        DbKind::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut idx = 1;
            for ch in sql.chars() {
                if ch == '?' {
                    out.push('$');
                    out.push_str(&idx.to_string());
                    idx += 1;
                } else {
                    out.push(ch);
                }
            }
            Cow::Owned(out)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub username: String,
    pub remaining_msgs: i64,
    pub stripe_customer_id: Option<String>,
    pub usage_type: UsageType,
    pub profile: UserProfile,
    pub is_verified: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub user_id: String,
    pub recipient_name: Option<String>,
    pub recipient_first_name: Option<String>,
    pub recipient_last_name: Option<String>,
    pub recipient_phone: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactUsRecord {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

pub fn i64_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

pub fn datetime_to_i64(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Optional text columns are stored as '' so the `Any` driver never has to
/// decode a NULL.
pub fn optional_text(row: &AnyRow, column: &str) -> std::result::Result<Option<String>, sqlx::Error> {
    let value: String = row.try_get(column)?;
    Ok((!value.is_empty()).then_some(value))
}

fn messages_table(kind: DbKind) -> &'static str {
    match kind {
        DbKind::Sqlite => {
            r#"CREATE TABLE IF NOT EXISTS messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            recipient_name TEXT NOT NULL DEFAULT '',
            recipient_first_name TEXT NOT NULL DEFAULT '',
            recipient_last_name TEXT NOT NULL DEFAULT '',
            recipient_phone TEXT NOT NULL,
            body TEXT NOT NULL,
            sent_at BIGINT NOT NULL
        )"#
        }
        DbKind::Postgres => {
            r#"CREATE TABLE IF NOT EXISTS messages (
            seq BIGSERIAL PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            recipient_name TEXT NOT NULL DEFAULT '',
            recipient_first_name TEXT NOT NULL DEFAULT '',
            recipient_last_name TEXT NOT NULL DEFAULT '',
            recipient_phone TEXT NOT NULL,
            body TEXT NOT NULL,
            sent_at BIGINT NOT NULL
        )"#
        }
    }
}

pub async fn init_db(pool: &AnyPool, kind: DbKind) -> Result<()> {
    let stmts = vec![
        r#"CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL,
            remaining_msgs BIGINT NOT NULL DEFAULT 0,
            stripe_customer_id TEXT NOT NULL DEFAULT '',
            usage_type TEXT NOT NULL DEFAULT 'Personal',
            profile TEXT NOT NULL DEFAULT '{}',
            is_verified BIGINT NOT NULL DEFAULT 0,
            is_deleted BIGINT NOT NULL DEFAULT 0,
            otp TEXT NOT NULL DEFAULT '',
            otp_expires_at BIGINT NOT NULL DEFAULT 0,
            created_at BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS auth_tokens (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at BIGINT NOT NULL
        )"#,
        messages_table(kind),
        r#"CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id, sent_at)"#,
        r#"CREATE TABLE IF NOT EXISTS groups (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            created_at BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS group_contacts (
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            position BIGINT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone TEXT NOT NULL,
            email TEXT NOT NULL,
            company TEXT NOT NULL,
            website TEXT NOT NULL,
            UNIQUE(group_id, phone)
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_group_contacts_group ON group_contacts(group_id, position)"#,
        r#"CREATE TABLE IF NOT EXISTS cards (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            stripe_card_id TEXT NOT NULL UNIQUE,
            last4 TEXT NOT NULL,
            brand TEXT NOT NULL,
            exp_month BIGINT NOT NULL,
            exp_year BIGINT NOT NULL,
            is_default BIGINT NOT NULL,
            created_at BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL UNIQUE,
            price_id TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            price DOUBLE PRECISION NOT NULL,
            currency TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS contact_us (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS redeemed_receipts (
            transaction_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            platform TEXT NOT NULL,
            product_id TEXT NOT NULL,
            created_at BIGINT NOT NULL
        )"#,
    ];

    for stmt in stmts {
        let sql = rewrite_sql(stmt, kind);
        sqlx::query(sql.as_ref()).execute(pool).await?;
    }

    Ok(())
}

const USER_COLUMNS: &str = "id, email, username, remaining_msgs, stripe_customer_id, usage_type, profile, \
     is_verified, is_deleted, created_at";

fn user_from_row(row: &AnyRow) -> Result<UserRecord> {
    let created_at: i64 = row.try_get("created_at")?;
    let usage_type: String = row.try_get("usage_type")?;
    let profile: String = row.try_get("profile")?;
    Ok(UserRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        remaining_msgs: row.try_get("remaining_msgs")?,
        stripe_customer_id: optional_text(row, "stripe_customer_id")?,
        usage_type: usage_type.parse()?,
        profile: serde_json::from_str(&profile)?,
        is_verified: row.try_get::<i64, _>("is_verified")? != 0,
        is_deleted: row.try_get::<i64, _>("is_deleted")? != 0,
        created_at: i64_to_datetime(created_at),
    })
}

pub async fn insert_user(pool: &AnyPool, kind: DbKind, email: &str, username: &str) -> Result<UserRecord> {
    insert_user_with_profile(pool, kind, email, username, UsageType::Personal, UserProfile::default()).await
}

pub async fn insert_user_with_profile(
    pool: &AnyPool,
    kind: DbKind,
    email: &str,
    username: &str,
    usage_type: UsageType,
    profile: UserProfile,
) -> Result<UserRecord> {
    let record = UserRecord {
        id: new_id(),
        email: email.to_string(),
        username: username.to_string(),
        remaining_msgs: 0,
        stripe_customer_id: None,
        usage_type,
        profile,
        is_verified: false,
        is_deleted: false,
        created_at: Utc::now(),
    };
    let sql = rewrite_sql(
        r#"INSERT INTO users (id, email, username, remaining_msgs, usage_type, profile, is_verified, is_deleted, created_at)
           VALUES (?, ?, ?, 0, ?, ?, 0, 0, ?)"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.email)
        .bind(&record.username)
        .bind(record.usage_type.as_str())
        .bind(serde_json::to_string(&record.profile)?)
        .bind(datetime_to_i64(record.created_at))
        .execute(pool)
        .await?;
    Ok(record)
}

pub async fn get_user(pool: &AnyPool, kind: DbKind, id: &str) -> Result<Option<UserRecord>> {
    let base = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    let sql = rewrite_sql(&base, kind);
    let row = sqlx::query(sql.as_ref()).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(user_from_row).transpose()
}

pub async fn get_user_by_email(pool: &AnyPool, kind: DbKind, email: &str) -> Result<Option<UserRecord>> {
    let base = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
    let sql = rewrite_sql(&base, kind);
    let row = sqlx::query(sql.as_ref()).bind(email).fetch_optional(pool).await?;
    row.as_ref().map(user_from_row).transpose()
}

pub async fn set_user_otp(
    pool: &AnyPool,
    kind: DbKind,
    user_id: &str,
    otp: &str,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    let sql = rewrite_sql("UPDATE users SET otp = ?, otp_expires_at = ? WHERE id = ?", kind);
    sqlx::query(sql.as_ref())
        .bind(otp)
        .bind(datetime_to_i64(expires_at))
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Pending OTP and its expiry for a user, if one was issued.
pub async fn get_user_otp(
    pool: &AnyPool,
    kind: DbKind,
    user_id: &str,
) -> Result<Option<(String, DateTime<Utc>)>> {
    let sql = rewrite_sql("SELECT otp, otp_expires_at FROM users WHERE id = ?", kind);
    let row = sqlx::query(sql.as_ref()).bind(user_id).fetch_optional(pool).await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let otp = optional_text(&row, "otp")?;
    let expires: i64 = row.try_get("otp_expires_at")?;
    Ok(otp.map(|otp| (otp, i64_to_datetime(expires))))
}

pub async fn mark_user_verified(pool: &AnyPool, kind: DbKind, user_id: &str) -> Result<()> {
    let sql = rewrite_sql(
        "UPDATE users SET otp = '', otp_expires_at = 0, is_verified = 1 WHERE id = ?",
        kind,
    );
    sqlx::query(sql.as_ref()).bind(user_id).execute(pool).await?;
    Ok(())
}

pub async fn update_username(pool: &AnyPool, kind: DbKind, user_id: &str, username: &str) -> Result<()> {
    let sql = rewrite_sql("UPDATE users SET username = ? WHERE id = ?", kind);
    sqlx::query(sql.as_ref()).bind(username).bind(user_id).execute(pool).await?;
    Ok(())
}

pub async fn soft_delete_user(pool: &AnyPool, kind: DbKind, user_id: &str) -> Result<()> {
    let sql = rewrite_sql("UPDATE users SET is_deleted = 1 WHERE id = ?", kind);
    sqlx::query(sql.as_ref()).bind(user_id).execute(pool).await?;
    let sql = rewrite_sql("DELETE FROM auth_tokens WHERE user_id = ?", kind);
    sqlx::query(sql.as_ref()).bind(user_id).execute(pool).await?;
    Ok(())
}

pub async fn set_stripe_customer(pool: &AnyPool, kind: DbKind, user_id: &str, customer_id: &str) -> Result<()> {
    let sql = rewrite_sql("UPDATE users SET stripe_customer_id = ? WHERE id = ?", kind);
    sqlx::query(sql.as_ref()).bind(customer_id).bind(user_id).execute(pool).await?;
    Ok(())
}

pub async fn insert_auth_token(pool: &AnyPool, kind: DbKind, user_id: &str) -> Result<String> {
    let token = Uuid::new_v4().simple().to_string();
    let sql = rewrite_sql(
        "INSERT INTO auth_tokens (token, user_id, created_at) VALUES (?, ?, ?)",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&token)
        .bind(user_id)
        .bind(datetime_to_i64(Utc::now()))
        .execute(pool)
        .await?;
    Ok(token)
}

pub async fn user_id_for_token(pool: &AnyPool, kind: DbKind, token: &str) -> Result<Option<String>> {
    let sql = rewrite_sql("SELECT user_id FROM auth_tokens WHERE token = ?", kind);
    let row = sqlx::query(sql.as_ref()).bind(token).fetch_optional(pool).await?;
    Ok(match row {
        Some(row) => Some(row.try_get("user_id")?),
        None => None,
    })
}

pub async fn insert_message(pool: &AnyPool, kind: DbKind, record: &MessageRecord) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO messages (
            id, user_id, recipient_name, recipient_first_name, recipient_last_name, recipient_phone, body, sent_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(record.recipient_name.as_deref().unwrap_or_default())
        .bind(record.recipient_first_name.as_deref().unwrap_or_default())
        .bind(record.recipient_last_name.as_deref().unwrap_or_default())
        .bind(&record.recipient_phone)
        .bind(&record.body)
        .bind(datetime_to_i64(record.sent_at))
        .execute(pool)
        .await?;
    Ok(())
}

fn message_from_row(row: &AnyRow) -> Result<MessageRecord> {
    let sent_at: i64 = row.try_get("sent_at")?;
    Ok(MessageRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        recipient_name: optional_text(row, "recipient_name")?,
        recipient_first_name: optional_text(row, "recipient_first_name")?,
        recipient_last_name: optional_text(row, "recipient_last_name")?,
        recipient_phone: row.try_get("recipient_phone")?,
        body: row.try_get("body")?,
        sent_at: i64_to_datetime(sent_at),
    })
}

/// All messages of a user, newest first.
pub async fn list_user_messages(pool: &AnyPool, kind: DbKind, user_id: &str) -> Result<Vec<MessageRecord>> {
    let sql = rewrite_sql(
        r#"SELECT id, user_id, recipient_name, recipient_first_name, recipient_last_name, recipient_phone, body, sent_at
           FROM messages WHERE user_id = ? ORDER BY seq DESC"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref()).bind(user_id).fetch_all(pool).await?;
    rows.iter().map(message_from_row).collect()
}

pub async fn list_messages_for_phone(
    pool: &AnyPool,
    kind: DbKind,
    user_id: &str,
    phone: &str,
) -> Result<Vec<MessageRecord>> {
    let sql = rewrite_sql(
        r#"SELECT id, user_id, recipient_name, recipient_first_name, recipient_last_name, recipient_phone, body, sent_at
           FROM messages WHERE user_id = ? AND recipient_phone = ? ORDER BY seq DESC"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(user_id)
        .bind(phone)
        .fetch_all(pool)
        .await?;
    rows.iter().map(message_from_row).collect()
}

/// Newest message per distinct recipient phone, newest first.
pub fn latest_per_phone(messages: Vec<MessageRecord>) -> Vec<MessageRecord> {
    let mut seen = std::collections::HashSet::new();
    messages
        .into_iter()
        .filter(|m| seen.insert(m.recipient_phone.clone()))
        .collect()
}

pub async fn insert_contact_us(pool: &AnyPool, kind: DbKind, user_id: &str, message: &str) -> Result<ContactUsRecord> {
    let record = ContactUsRecord {
        id: new_id(),
        user_id: user_id.to_string(),
        message: message.to_string(),
        created_at: Utc::now(),
    };
    let sql = rewrite_sql(
        "INSERT INTO contact_us (id, user_id, message, created_at) VALUES (?, ?, ?, ?)",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.message)
        .bind(datetime_to_i64(record.created_at))
        .execute(pool)
        .await?;
    Ok(record)
}
