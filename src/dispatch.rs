//! Bulk dispatch: render, normalize, send and record one message per recipient,
//! then settle the quota with the number actually sent.

use crate::carrier::{classify_carrier_error, CarrierClient};
use crate::db::{self, DbKind, MessageRecord};
use crate::error::AppError;
use crate::ledger::{self, HoldGuard};
use crate::pacer::SendPacer;
use crate::phone;
use crate::render::render;
use crate::types::{DispatchOutcome, DispatchReport, FailedMessage, Recipient};
use chrono::Utc;
use sqlx::AnyPool;
use tracing::{error, info};

/// Everything a batch needs besides its inputs.
pub struct Dispatcher<'a> {
    pub pool: &'a AnyPool,
    pub db_kind: DbKind,
    pub carrier: &'a dyn CarrierClient,
    pub from_number: &'a str,
    pub pacer: &'a SendPacer,
}

impl<'a> Dispatcher<'a> {
    /// Sends `template` to every recipient in order.
    ///
    /// The whole batch is refused up front when the template is empty, the
    /// recipient list is empty, or the balance cannot cover every recipient.
    /// Carrier failures are recorded per recipient and never abort the batch;
    /// a failure to persist a sent message does. If the future is dropped
    /// mid-batch the unsent part of the hold is refunded.
    pub async fn dispatch(
        &self,
        user_id: &str,
        template: &str,
        recipients: &[Recipient],
        group_name: Option<String>,
    ) -> Result<DispatchReport, AppError> {
        if template.trim().is_empty() {
            return Err(AppError::validation("Message is required"));
        }
        if recipients.is_empty() {
            return Err(AppError::validation("No recipients to send to"));
        }

        let total = recipients.len();
        let reservation = ledger::hold(self.pool, self.db_kind, user_id, total as i64).await?;
        let mut hold = HoldGuard::new(self.pool.clone(), self.db_kind, reservation);

        let mut outcomes = Vec::with_capacity(total);

        for (idx, recipient) in recipients.iter().enumerate() {
            let body = render(template, recipient);
            let to = phone::normalize(&recipient.phone);
            info!("sending to: {} -> {}", recipient.phone, to);

            self.pacer.acquire().await;
            match self.carrier.send(&body, self.from_number, &to).await {
                Ok(_) => {
                    hold.record_use();
                    let record = MessageRecord {
                        id: db::new_id(),
                        user_id: user_id.to_string(),
                        recipient_name: recipient.name.clone(),
                        recipient_first_name: recipient.first_name.clone(),
                        recipient_last_name: recipient.last_name.clone(),
                        recipient_phone: recipient.phone.clone(),
                        body,
                        sent_at: Utc::now(),
                    };
                    if let Err(err) = db::insert_message(self.pool, self.db_kind, &record).await {
                        error!("failed to save message to {to}, aborting batch: {err:?}");
                        hold.settle().await?;
                        return Err(AppError::Internal(err));
                    }
                    info!("message sent successfully to {to} ({}/{total})", idx + 1);
                    outcomes.push(DispatchOutcome::Sent(record));
                }
                Err(err) => {
                    error!(
                        code = ?err.code,
                        status = ?err.status,
                        more_info = ?err.more_info,
                        "failed to send message to {} (formatted: {to}): {}",
                        recipient.phone,
                        err.message
                    );
                    outcomes.push(DispatchOutcome::Failed(FailedMessage {
                        phone: recipient.phone.clone(),
                        name: recipient.display_name(),
                        error: classify_carrier_error(&err.message),
                    }));
                }
            }
        }

        let sent = hold.used();
        let remaining = hold.settle().await?;
        info!("batch for user {user_id} finished: {sent}/{total} sent, {remaining} messages left");

        Ok(DispatchReport::from_outcomes(outcomes, group_name))
    }
}
