//! Funding the message balance: saved cards, the product catalog, card
//! purchases, and in-app receipts.

pub mod receipts;
pub mod stripe;

pub use receipts::ReceiptVerifier;
pub use stripe::StripeClient;

use crate::db::{self, datetime_to_i64, i64_to_datetime, new_id, rewrite_sql, DbKind, UserRecord};
use crate::error::AppError;
use crate::ledger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub user_id: String,
    pub stripe_card_id: String,
    pub last4: String,
    pub brand: String,
    pub exp_month: i64,
    pub exp_year: i64,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub product_id: String,
    pub price_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub currency: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResult {
    pub payment_intent: Value,
    pub credited: i64,
    pub user: UserRecord,
}

/// Messages granted by an in-app product id (already lower-cased).
pub fn credits_for_product(product_id: &str) -> i64 {
    match product_id {
        "com.nods.25messages" => 25,
        "com.nods.50messages" => 50,
        "com.nods.100messages" => 100,
        "com.nods.500messages" => 500,
        "com.nods.1000messages" => 1000,
        _ => 0,
    }
}

/// Catalog products are named "<count> ..." e.g. "100 Messages".
pub fn credits_from_product_name(name: &str) -> Option<i64> {
    name.split_whitespace().next()?.parse().ok()
}

fn card_from_row(row: &AnyRow) -> Result<Card, AppError> {
    let created_at: i64 = row.try_get("created_at")?;
    Ok(Card {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        stripe_card_id: row.try_get("stripe_card_id")?,
        last4: row.try_get("last4")?,
        brand: row.try_get("brand")?,
        exp_month: row.try_get("exp_month")?,
        exp_year: row.try_get("exp_year")?,
        is_default: row.try_get::<i64, _>("is_default")? != 0,
        created_at: i64_to_datetime(created_at),
    })
}

fn product_from_row(row: &AnyRow) -> Result<Product, AppError> {
    Ok(Product {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        price_id: db::optional_text(row, "price_id")?,
        name: row.try_get("name")?,
        description: db::optional_text(row, "description")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
    })
}

const CARD_COLUMNS: &str =
    "id, user_id, stripe_card_id, last4, brand, exp_month, exp_year, is_default, created_at";

pub async fn list_cards(pool: &AnyPool, kind: DbKind, user_id: &str) -> Result<Vec<Card>, AppError> {
    let base = format!("SELECT {CARD_COLUMNS} FROM cards WHERE user_id = ? ORDER BY created_at ASC, id ASC");
    let sql = rewrite_sql(&base, kind);
    let rows = sqlx::query(sql.as_ref()).bind(user_id).fetch_all(pool).await?;
    rows.iter().map(card_from_row).collect()
}

async fn clear_default_cards(pool: &AnyPool, kind: DbKind, user_id: &str) -> Result<(), AppError> {
    let sql = rewrite_sql("UPDATE cards SET is_default = 0 WHERE user_id = ?", kind);
    sqlx::query(sql.as_ref()).bind(user_id).execute(pool).await?;
    Ok(())
}

async fn mark_default_card(pool: &AnyPool, kind: DbKind, user_id: &str, stripe_card_id: &str) -> Result<Card, AppError> {
    let sql = rewrite_sql(
        "UPDATE cards SET is_default = 1 WHERE user_id = ? AND stripe_card_id = ?",
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(user_id)
        .bind(stripe_card_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Card"));
    }
    find_card(pool, kind, user_id, stripe_card_id)
        .await?
        .ok_or(AppError::NotFound("Card"))
}

async fn find_card(pool: &AnyPool, kind: DbKind, user_id: &str, stripe_card_id: &str) -> Result<Option<Card>, AppError> {
    let base = format!("SELECT {CARD_COLUMNS} FROM cards WHERE user_id = ? AND stripe_card_id = ?");
    let sql = rewrite_sql(&base, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(user_id)
        .bind(stripe_card_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(card_from_row).transpose()
}

pub async fn default_card(pool: &AnyPool, kind: DbKind, user_id: &str) -> Result<Option<Card>, AppError> {
    let base = format!("SELECT {CARD_COLUMNS} FROM cards WHERE user_id = ? AND is_default = 1 LIMIT 1");
    let sql = rewrite_sql(&base, kind);
    let row = sqlx::query(sql.as_ref()).bind(user_id).fetch_optional(pool).await?;
    row.as_ref().map(card_from_row).transpose()
}

async fn require_user(pool: &AnyPool, kind: DbKind, user_id: &str) -> Result<UserRecord, AppError> {
    db::get_user(pool, kind, user_id)
        .await?
        .ok_or(AppError::NotFound("User"))
}

fn customer_of(user: &UserRecord) -> Result<&str, AppError> {
    user.stripe_customer_id
        .as_deref()
        .ok_or(AppError::NotFound("Payment customer"))
}

/// Attaches a payment method to the user's processor customer (creating the
/// customer on first use) and stores it as the default card.
pub async fn save_card(
    pool: &AnyPool,
    kind: DbKind,
    stripe: &StripeClient,
    user_id: &str,
    payment_method_id: &str,
) -> Result<Card, AppError> {
    if payment_method_id.trim().is_empty() {
        return Err(AppError::validation("paymentMethodId is required"));
    }
    let user = require_user(pool, kind, user_id).await?;

    let customer_id = match user.stripe_customer_id.as_deref() {
        Some(existing) => {
            stripe.attach_payment_method(payment_method_id, existing).await?;
            existing.to_string()
        }
        None => {
            let customer = stripe
                .create_customer(&user.email, &user.username, payment_method_id)
                .await?;
            db::set_stripe_customer(pool, kind, user_id, &customer.id).await?;
            customer.id
        }
    };
    stripe
        .set_default_payment_method(&customer_id, payment_method_id)
        .await?;

    let method = stripe.retrieve_payment_method(payment_method_id).await?;
    let details = method
        .card
        .ok_or_else(|| AppError::validation("payment method is not a card"))?;

    clear_default_cards(pool, kind, user_id).await?;
    let card = Card {
        id: new_id(),
        user_id: user_id.to_string(),
        stripe_card_id: method.id,
        last4: details.last4,
        brand: details.brand,
        exp_month: details.exp_month,
        exp_year: details.exp_year,
        is_default: true,
        created_at: Utc::now(),
    };
    let sql = rewrite_sql(
        r#"INSERT INTO cards (id, user_id, stripe_card_id, last4, brand, exp_month, exp_year, is_default, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&card.id)
        .bind(&card.user_id)
        .bind(&card.stripe_card_id)
        .bind(&card.last4)
        .bind(&card.brand)
        .bind(card.exp_month)
        .bind(card.exp_year)
        .bind(datetime_to_i64(card.created_at))
        .execute(pool)
        .await?;
    Ok(card)
}

pub async fn set_default_card(
    pool: &AnyPool,
    kind: DbKind,
    stripe: &StripeClient,
    user_id: &str,
    stripe_card_id: &str,
) -> Result<Card, AppError> {
    let user = require_user(pool, kind, user_id).await?;
    let customer = customer_of(&user)?;
    if find_card(pool, kind, user_id, stripe_card_id).await?.is_none() {
        return Err(AppError::NotFound("Card"));
    }
    stripe.set_default_payment_method(customer, stripe_card_id).await?;
    clear_default_cards(pool, kind, user_id).await?;
    mark_default_card(pool, kind, user_id, stripe_card_id).await
}

/// Removes a card; if it was the default, the oldest remaining card takes over.
pub async fn delete_card(
    pool: &AnyPool,
    kind: DbKind,
    stripe: &StripeClient,
    user_id: &str,
    stripe_card_id: &str,
) -> Result<(), AppError> {
    let user = require_user(pool, kind, user_id).await?;
    let customer = customer_of(&user)?;
    let card = find_card(pool, kind, user_id, stripe_card_id)
        .await?
        .ok_or(AppError::NotFound("Card"))?;

    stripe.detach_payment_method(stripe_card_id).await?;

    let sql = rewrite_sql("DELETE FROM cards WHERE user_id = ? AND stripe_card_id = ?", kind);
    sqlx::query(sql.as_ref())
        .bind(user_id)
        .bind(stripe_card_id)
        .execute(pool)
        .await?;

    if card.is_default {
        if let Some(next) = list_cards(pool, kind, user_id).await?.into_iter().next() {
            stripe
                .set_default_payment_method(customer, &next.stripe_card_id)
                .await?;
            mark_default_card(pool, kind, user_id, &next.stripe_card_id).await?;
        }
    }
    Ok(())
}

/// Pulls the processor catalog and upserts one row per product using its
/// first listed price. Products without a price are skipped.
pub async fn sync_products(pool: &AnyPool, kind: DbKind, stripe: &StripeClient) -> Result<usize, AppError> {
    let products = stripe.list_products().await?;
    let prices = stripe.list_prices().await?;

    let sql = rewrite_sql(
        r#"INSERT INTO products (id, product_id, price_id, name, description, price, currency)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(product_id) DO UPDATE SET
               price_id=excluded.price_id,
               name=excluded.name,
               description=excluded.description,
               price=excluded.price,
               currency=excluded.currency"#,
        kind,
    );

    let mut synced = 0;
    for product in products {
        let Some(price) = prices.iter().find(|p| p.product == product.id) else {
            tracing::warn!("product {} has no price, skipping", product.id);
            continue;
        };
        sqlx::query(sql.as_ref())
            .bind(new_id())
            .bind(&product.id)
            .bind(&price.id)
            .bind(&product.name)
            .bind(product.description.as_deref().unwrap_or_default())
            .bind(price.unit_amount.unwrap_or_default() as f64 / 100.0)
            .bind(&price.currency)
            .execute(pool)
            .await?;
        synced += 1;
    }
    Ok(synced)
}

pub async fn list_products(pool: &AnyPool, kind: DbKind) -> Result<Vec<Product>, AppError> {
    let sql = rewrite_sql(
        "SELECT id, product_id, price_id, name, description, price, currency FROM products ORDER BY price ASC",
        kind,
    );
    let rows = sqlx::query(sql.as_ref()).fetch_all(pool).await?;
    rows.iter().map(product_from_row).collect()
}

async fn get_product(pool: &AnyPool, kind: DbKind, id: &str) -> Result<Option<Product>, AppError> {
    let sql = rewrite_sql(
        "SELECT id, product_id, price_id, name, description, price, currency FROM products WHERE id = ? OR product_id = ?",
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(id)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(product_from_row).transpose()
}

/// Charges the default card for a catalog product and credits its messages.
pub async fn purchase(
    pool: &AnyPool,
    kind: DbKind,
    stripe: &StripeClient,
    user_id: &str,
    product_id: &str,
) -> Result<PurchaseResult, AppError> {
    let user = require_user(pool, kind, user_id).await?;
    let customer = customer_of(&user)?;
    let product = get_product(pool, kind, product_id)
        .await?
        .filter(|p| p.price_id.is_some())
        .ok_or(AppError::NotFound("Product"))?;
    let card = default_card(pool, kind, user_id)
        .await?
        .ok_or(AppError::NotFound("Default card"))?;
    let credits = credits_from_product_name(&product.name).ok_or_else(|| {
        AppError::validation(format!("cannot derive message count from product '{}'", product.name))
    })?;

    let amount_minor = (product.price * 100.0).round() as i64;
    let payment_intent = stripe
        .create_payment_intent(
            amount_minor,
            &product.currency,
            customer,
            product.description.as_deref().unwrap_or(&product.name),
            &card.stripe_card_id,
        )
        .await?;

    let balance = ledger::credit(pool, kind, user_id, credits).await?;
    tracing::info!("user {user_id} bought {credits} messages, balance now {balance}");
    let user = require_user(pool, kind, user_id).await?;
    Ok(PurchaseResult {
        payment_intent,
        credited: credits,
        user,
    })
}

/// Records a redeemed purchase. False when it was redeemed before.
async fn claim_receipt(
    pool: &AnyPool,
    kind: DbKind,
    key: &str,
    user_id: &str,
    platform: &str,
    product_id: &str,
) -> Result<bool, AppError> {
    let sql = rewrite_sql(
        r#"INSERT INTO redeemed_receipts (transaction_id, user_id, platform, product_id, created_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(transaction_id) DO NOTHING"#,
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(key)
        .bind(user_id)
        .bind(platform)
        .bind(product_id)
        .bind(datetime_to_i64(Utc::now()))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Verifies an in-app purchase and credits the matching message pack once.
pub async fn redeem_receipt(
    pool: &AnyPool,
    kind: DbKind,
    verifier: &ReceiptVerifier,
    user_id: &str,
    platform: &str,
    receipt_data: &Value,
    product_id: &str,
) -> Result<(UserRecord, Value), AppError> {
    let verification = verifier.verify(platform, receipt_data, product_id).await?;
    let key = receipts::purchase_key(platform, receipt_data, &verification, product_id)
        .ok_or_else(|| AppError::Receipt("receipt carries no transaction id".to_string()))?;
    if !claim_receipt(pool, kind, &key, user_id, platform, product_id).await? {
        tracing::warn!("user {user_id} tried to redeem {key} again");
        return Err(AppError::Receipt("receipt has already been redeemed".to_string()));
    }
    let credits = credits_for_product(&product_id.to_lowercase());
    ledger::credit(pool, kind, user_id, credits).await?;
    let user = require_user(pool, kind, user_id).await?;
    Ok((user, verification))
}
