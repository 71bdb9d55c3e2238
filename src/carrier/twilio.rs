use super::{CarrierClient, CarrierError, CarrierReceipt};
use crate::config::CarrierConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct TwilioClient {
    http: Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: Option<String>,
    more_info: Option<String>,
    status: Option<u16>,
}

impl TwilioClient {
    pub fn new(http: Client, base_url: &str, account_sid: &str, auth_token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
        }
    }

    /// Missing credentials still yield a client; sends then fail with the
    /// carrier's authentication error, which the dispatcher reports per recipient.
    pub fn from_config(http: Client, cfg: &CarrierConfig) -> Self {
        Self::new(
            http,
            &cfg.base_url,
            cfg.account_sid.as_deref().unwrap_or_default(),
            cfg.auth_token.as_deref().unwrap_or_default(),
        )
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }
}

#[async_trait]
impl CarrierClient for TwilioClient {
    async fn send(&self, body: &str, from: &str, to: &str) -> Result<CarrierReceipt, CarrierError> {
        let resp = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Body", body), ("From", from), ("To", to)])
            .send()
            .await
            .map_err(|err| CarrierError::new(err.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if status.is_success() {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
            return Ok(CarrierReceipt {
                sid: value.get("sid").and_then(|v| v.as_str()).map(|s| s.to_string()),
                status: value.get("status").and_then(|v| v.as_str()).map(|s| s.to_string()),
            });
        }

        match serde_json::from_str::<TwilioErrorBody>(&text) {
            Ok(err) => Err(CarrierError {
                message: err
                    .message
                    .unwrap_or_else(|| format!("carrier returned {status}")),
                code: err.code,
                status: err.status.or(Some(status.as_u16())),
                more_info: err.more_info,
            }),
            Err(_) => Err(CarrierError {
                message: format!("carrier returned {status}: {text}"),
                code: None,
                status: Some(status.as_u16()),
                more_info: None,
            }),
        }
    }
}
