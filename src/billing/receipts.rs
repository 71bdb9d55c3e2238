//! In-app purchase receipt verification against the Apple and Google stores.

use crate::config::ReceiptsConfig;
use crate::error::AppError;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

/// Characters escaped inside a single URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Apple's "sandbox receipt sent to production" status.
const APPLE_STATUS_SANDBOX_RECEIPT: i64 = 21007;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleReceipt {
    pub package_name: String,
    pub purchase_token: String,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReceiptVerifier {
    http: Client,
    cfg: ReceiptsConfig,
}

fn apple_status(value: &Value) -> Option<i64> {
    value
        .get("status")
        .or_else(|| value.get("status_code"))
        .and_then(|v| v.as_i64())
}

impl ReceiptVerifier {
    pub fn new(http: Client, cfg: ReceiptsConfig) -> Self {
        Self { http, cfg }
    }

    /// `receipt_data` is the client payload: `{receipt}` for iOS,
    /// `{packageName, purchaseToken, orderId}` for Android.
    pub async fn verify(&self, platform: &str, receipt_data: &Value, product_id: &str) -> Result<Value, AppError> {
        match platform {
            "ios" => {
                let receipt = receipt_data
                    .get("receipt")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AppError::validation("receiptData.receipt is required"))?;
                self.verify_apple(receipt).await
            }
            "android" => {
                let receipt: GoogleReceipt = serde_json::from_value(receipt_data.clone())
                    .map_err(|err| AppError::validation(format!("invalid receiptData: {err}")))?;
                self.verify_google(&receipt, product_id).await
            }
            other => Err(AppError::validation(format!("unsupported platform: {other}"))),
        }
    }

    pub async fn verify_apple(&self, receipt: &str) -> Result<Value, AppError> {
        let mut value = self.post_apple(&self.cfg.apple_url, receipt).await?;
        if apple_status(&value) == Some(APPLE_STATUS_SANDBOX_RECEIPT) {
            value = self.post_apple(&self.cfg.apple_sandbox_url, receipt).await?;
        }
        if apple_status(&value) == Some(0) {
            Ok(value)
        } else {
            Err(AppError::Receipt("Apple receipt verification failed".to_string()))
        }
    }

    async fn post_apple(&self, url: &str, receipt: &str) -> Result<Value, AppError> {
        let resp = self
            .http
            .post(url)
            .json(&json!({
                "receipt-data": receipt,
                "password": self.cfg.apple_shared_secret,
            }))
            .send()
            .await?;
        Ok(resp.json::<Value>().await?)
    }

    pub async fn verify_google(&self, receipt: &GoogleReceipt, product_id: &str) -> Result<Value, AppError> {
        let token = self.cfg.google_access_token.as_deref().ok_or_else(|| {
            AppError::Receipt("Google Play credentials not configured".to_string())
        })?;
        let enc = |s: &str| utf8_percent_encode(s, PATH_SEGMENT).to_string();
        let url = format!(
            "{}/androidpublisher/v3/applications/{}/purchases/products/{}/tokens/{}",
            self.cfg.google_base_url.trim_end_matches('/'),
            enc(&receipt.package_name),
            enc(product_id),
            enc(&receipt.purchase_token),
        );
        let resp = self.http.get(url).bearer_auth(token).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Receipt(format!("Google Play returned {status}: {body}")));
        }
        let value: Value = resp.json().await?;
        check_google_purchase(&value, receipt.order_id.as_deref())?;
        Ok(value)
    }
}

/// Store-side identity of a verified purchase, `<platform>:<id>`.
///
/// Apple: the `transaction_id` of the in-app entry for `product_id`, falling
/// back to the receipt blob. Google: the order id, else the purchase token.
pub fn purchase_key(platform: &str, receipt_data: &Value, verification: &Value, product_id: &str) -> Option<String> {
    let id = match platform {
        "ios" => apple_transaction_id(verification, product_id)
            .or_else(|| receipt_data.get("receipt").and_then(|v| v.as_str()).map(str::to_string)),
        "android" => verification
            .get("orderId")
            .or_else(|| receipt_data.get("purchaseToken"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }?;
    Some(format!("{platform}:{id}"))
}

fn apple_transaction_id(verification: &Value, product_id: &str) -> Option<String> {
    let entries = verification
        .get("latest_receipt_info")
        .and_then(|v| v.as_array())
        .into_iter()
        .chain(verification.pointer("/receipt/in_app").and_then(|v| v.as_array()))
        .flatten();
    entries
        .filter(|entry| {
            entry
                .get("product_id")
                .and_then(|v| v.as_str())
                .is_some_and(|p| p.eq_ignore_ascii_case(product_id))
        })
        .find_map(|entry| entry.get("transaction_id").and_then(|v| v.as_str()))
        .map(str::to_string)
}

pub fn check_google_purchase(purchase: &Value, order_id: Option<&str>) -> Result<(), AppError> {
    if purchase.get("purchaseState").and_then(|v| v.as_i64()) != Some(0) {
        return Err(AppError::Receipt("Purchase is either Pending or Cancelled!".to_string()));
    }
    if purchase.get("consumptionState").and_then(|v| v.as_i64()) != Some(0) {
        return Err(AppError::Receipt("Purchase is already consumed!".to_string()));
    }
    if purchase.get("orderId").and_then(|v| v.as_str()) != order_id {
        return Err(AppError::Receipt("Invalid orderId".to_string()));
    }
    Ok(())
}
