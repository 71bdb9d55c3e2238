//! Minimal form-encoded client for the payment processor's REST API.

use crate::config::StripeConfig;
use crate::error::AppError;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct StripeClient {
    http: Client,
    base_url: String,
    secret_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardDetails {
    pub last4: String,
    pub brand: String,
    pub exp_month: i64,
    pub exp_year: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    pub card: Option<CardDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteProduct {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePrice {
    pub id: String,
    pub product: String,
    pub unit_amount: Option<i64>,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

impl StripeClient {
    pub fn new(http: Client, cfg: &StripeConfig) -> Self {
        Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            secret_key: cfg.secret_key.clone(),
        }
    }

    fn key(&self) -> Result<&str, AppError> {
        self.secret_key
            .as_deref()
            .ok_or_else(|| AppError::Upstream("payment processor key not configured".to_string()))
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, form: &[(&str, &str)]) -> Result<T, AppError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.key()?)
            .form(form)
            .send()
            .await?;
        decode(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(self.key()?)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn create_customer(&self, email: &str, name: &str, payment_method: &str) -> Result<Customer, AppError> {
        self.post(
            "/v1/customers",
            &[("email", email), ("name", name), ("payment_method", payment_method)],
        )
        .await
    }

    pub async fn attach_payment_method(&self, payment_method: &str, customer: &str) -> Result<PaymentMethod, AppError> {
        self.post(
            &format!("/v1/payment_methods/{payment_method}/attach"),
            &[("customer", customer)],
        )
        .await
    }

    pub async fn detach_payment_method(&self, payment_method: &str) -> Result<PaymentMethod, AppError> {
        self.post(&format!("/v1/payment_methods/{payment_method}/detach"), &[])
            .await
    }

    pub async fn set_default_payment_method(&self, customer: &str, payment_method: &str) -> Result<Customer, AppError> {
        self.post(
            &format!("/v1/customers/{customer}"),
            &[("invoice_settings[default_payment_method]", payment_method)],
        )
        .await
    }

    pub async fn retrieve_payment_method(&self, payment_method: &str) -> Result<PaymentMethod, AppError> {
        self.get(&format!("/v1/payment_methods/{payment_method}")).await
    }

    pub async fn list_products(&self) -> Result<Vec<RemoteProduct>, AppError> {
        let list: ListResponse<RemoteProduct> = self.get("/v1/products").await?;
        Ok(list.data)
    }

    pub async fn list_prices(&self) -> Result<Vec<RemotePrice>, AppError> {
        let list: ListResponse<RemotePrice> = self.get("/v1/prices").await?;
        Ok(list.data)
    }

    /// Confirms an off-session charge of `amount_minor` on a saved card.
    pub async fn create_payment_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        customer: &str,
        description: &str,
        payment_method: &str,
    ) -> Result<Value, AppError> {
        let amount = amount_minor.to_string();
        self.post(
            "/v1/payment_intents",
            &[
                ("amount", amount.as_str()),
                ("currency", currency),
                ("customer", customer),
                ("description", description),
                ("payment_method", payment_method),
                ("confirm", "true"),
                ("off_session", "true"),
            ],
        )
        .await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, AppError> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(|s| s.to_string()))
            .unwrap_or(text);
        return Err(AppError::Upstream(format!("payment processor returned {status}: {message}")));
    }
    serde_json::from_str(&text)
        .map_err(|err| AppError::Upstream(format!("unexpected payment processor response: {err}")))
}
