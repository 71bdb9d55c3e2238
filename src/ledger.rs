//! Remaining-message balance for each user.
//!
//! `reserve` is a read-only check. Dispatch uses `hold`, which takes the whole
//! batch out of the balance in one conditional UPDATE, and `settle`, which
//! returns whatever was not sent. Two batches racing for the same balance can
//! therefore never jointly overdraw it. A `HoldGuard` settles the hold on
//! drop if the batch is cut short.

use crate::db::{rewrite_sql, DbKind};
use crate::error::AppError;
use sqlx::{AnyPool, Row};
use tracing::{error, warn};

pub type Balance = i64;

/// Messages taken from a user's balance for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a hold must be settled or the unused messages are lost"]
pub struct Reservation {
    pub user_id: String,
    pub held: i64,
}

pub async fn balance(pool: &AnyPool, kind: DbKind, user_id: &str) -> Result<Balance, AppError> {
    let sql = rewrite_sql(
        "SELECT remaining_msgs FROM users WHERE id = ? AND is_deleted = 0",
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(row.try_get("remaining_msgs")?)
}

pub async fn reserve(pool: &AnyPool, kind: DbKind, user_id: &str, count: i64) -> Result<Balance, AppError> {
    let available = balance(pool, kind, user_id).await?;
    if available < count {
        return Err(AppError::InsufficientQuota {
            available,
            requested: count,
        });
    }
    Ok(available)
}

pub async fn debit(pool: &AnyPool, kind: DbKind, user_id: &str, count: i64) -> Result<Balance, AppError> {
    adjust(pool, kind, user_id, -count).await
}

pub async fn credit(pool: &AnyPool, kind: DbKind, user_id: &str, count: i64) -> Result<Balance, AppError> {
    adjust(pool, kind, user_id, count).await
}

async fn adjust(pool: &AnyPool, kind: DbKind, user_id: &str, delta: i64) -> Result<Balance, AppError> {
    let sql = rewrite_sql(
        "UPDATE users SET remaining_msgs = remaining_msgs + ? WHERE id = ?",
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(delta)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User"));
    }
    balance_any(pool, kind, user_id).await
}

async fn balance_any(pool: &AnyPool, kind: DbKind, user_id: &str) -> Result<Balance, AppError> {
    let sql = rewrite_sql("SELECT remaining_msgs FROM users WHERE id = ?", kind);
    let row = sqlx::query(sql.as_ref())
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(row.try_get("remaining_msgs")?)
}

pub async fn hold(pool: &AnyPool, kind: DbKind, user_id: &str, count: i64) -> Result<Reservation, AppError> {
    let sql = rewrite_sql(
        r#"UPDATE users SET remaining_msgs = remaining_msgs - ?
           WHERE id = ? AND is_deleted = 0 AND remaining_msgs >= ?"#,
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(count)
        .bind(user_id)
        .bind(count)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        // Distinguish a missing user from a short balance.
        let available = balance(pool, kind, user_id).await?;
        return Err(AppError::InsufficientQuota {
            available,
            requested: count,
        });
    }

    Ok(Reservation {
        user_id: user_id.to_string(),
        held: count,
    })
}

/// Returns `held - used` to the balance; the net debit is `used`.
pub async fn settle(pool: &AnyPool, kind: DbKind, reservation: Reservation, used: i64) -> Result<Balance, AppError> {
    let refund = (reservation.held - used.clamp(0, reservation.held)).max(0);
    if refund == 0 {
        return balance_any(pool, kind, &reservation.user_id).await;
    }
    credit(pool, kind, &reservation.user_id, refund).await
}

/// Owns a `Reservation` for the length of a batch and counts what it used.
///
/// Dropping an unsettled guard refunds the unused part on a background task.
pub struct HoldGuard {
    pool: AnyPool,
    kind: DbKind,
    reservation: Option<Reservation>,
    used: i64,
}

impl HoldGuard {
    pub fn new(pool: AnyPool, kind: DbKind, reservation: Reservation) -> Self {
        Self {
            pool,
            kind,
            reservation: Some(reservation),
            used: 0,
        }
    }

    pub fn record_use(&mut self) {
        self.used += 1;
    }

    pub fn used(&self) -> i64 {
        self.used
    }

    pub async fn settle(mut self) -> Result<Balance, AppError> {
        let reservation = self
            .reservation
            .take()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("hold already settled")))?;
        settle(&self.pool, self.kind, reservation, self.used).await
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        let Some(reservation) = self.reservation.take() else {
            return;
        };
        let used = self.used;
        warn!(
            "batch for user {} stopped after {used}/{} messages, refunding the rest",
            reservation.user_id, reservation.held
        );
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("no runtime to refund hold for user {}", reservation.user_id);
            return;
        };
        let pool = self.pool.clone();
        let kind = self.kind;
        runtime.spawn(async move {
            let user_id = reservation.user_id.clone();
            if let Err(err) = settle(&pool, kind, reservation, used).await {
                error!("failed to refund hold for user {user_id}: {err}");
            }
        });
    }
}
