pub mod auth;
pub mod billing;
pub mod carrier;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod groups;
pub mod ledger;
pub mod pacer;
pub mod phone;
pub mod render;
pub mod types;

pub use config::Config;
pub use error::AppError;

use self::auth::AuthUser;
use self::billing::{ReceiptVerifier, StripeClient};
use self::carrier::{CarrierClient, TwilioClient};
use self::config::{load_config, log_carrier_summary, resolve_database_url};
use self::db::DbKind;
use self::dispatch::Dispatcher;
use self::pacer::SendPacer;
use self::types::{DispatchReport, Recipient, SendMessageRequest, SendToGroupRequest};

use axum::{
    extract::{Path, State},
    http::header::AUTHORIZATION,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::AnyPool;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: AnyPool,
    pub http: reqwest::Client,
    pub db_kind: DbKind,
    pub carrier: Arc<dyn CarrierClient>,
    pub pacer: Arc<SendPacer>,
    pub stripe: StripeClient,
    pub receipts: ReceiptVerifier,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: AnyPool,
        db_kind: DbKind,
        http: reqwest::Client,
        carrier: Arc<dyn CarrierClient>,
    ) -> Self {
        let pacer = SendPacer::new(config.carrier.rate_per_second, config.carrier.burst);
        let stripe = StripeClient::new(http.clone(), &config.stripe);
        let receipts = ReceiptVerifier::new(http.clone(), config.receipts.clone());
        Self {
            config,
            pool,
            http,
            db_kind,
            carrier,
            pacer: Arc::new(pacer),
            stripe,
            receipts,
        }
    }

    fn dispatcher(&self) -> Result<Dispatcher<'_>, AppError> {
        let from_number = self
            .config
            .carrier
            .from_number
            .as_deref()
            .ok_or_else(|| AppError::Upstream("carrier sender number not configured".to_string()))?;
        Ok(Dispatcher {
            pool: &self.pool,
            db_kind: self.db_kind,
            carrier: self.carrier.as_ref(),
            from_number,
            pacer: &self.pacer,
        })
    }

    /// Runs a batch on its own task so a dropped request cannot cut it short.
    async fn run_batch(
        &self,
        user_id: String,
        template: String,
        recipients: Vec<Recipient>,
        group_name: Option<String>,
    ) -> Result<DispatchReport, AppError> {
        let state = self.clone();
        tokio::spawn(async move {
            state
                .dispatcher()?
                .dispatch(&user_id, &template, &recipients, group_name)
                .await
        })
        .await
        .map_err(|err| AppError::Internal(anyhow::anyhow!("dispatch task failed: {err}")))?
    }
}

#[derive(Debug, Deserialize)]
pub struct RequestOtpRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub otp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReceiptRequest {
    pub platform: String,
    #[serde(default)]
    pub receipt_data: Value,
    pub product_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeUsernameRequest {
    #[serde(default)]
    pub new_username: String,
}

#[derive(Debug, Deserialize)]
pub struct ContactUsRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub contacts: Vec<Recipient>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddContactsRequest {
    #[serde(default)]
    pub contacts: Vec<Recipient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCardRequest {
    #[serde(default)]
    pub payment_method_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetDefaultCardRequest {
    #[serde(default)]
    pub card_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    #[serde(default)]
    pub product_id: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn create_app() -> anyhow::Result<(AppState, Router)> {
    sqlx::any::install_default_drivers();

    let config = load_config();
    let db_url = resolve_database_url(&config);
    let db_kind = db::db_kind_from_url(&db_url);
    let pool = AnyPool::connect(&db_url).await?;
    db::init_db(&pool, db_kind).await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http.timeout_seconds))
        .build()?;

    log_carrier_summary(&config.carrier);
    let carrier: Arc<dyn CarrierClient> = Arc::new(TwilioClient::from_config(http.clone(), &config.carrier));

    let state = AppState::new(config, pool, db_kind, http, carrier);
    let app = build_router(state.clone());
    Ok((state, app))
}

pub fn build_router(state: AppState) -> Router {
    let authed_routes = Router::new()
        .route("/api/user/send-message", post(send_message))
        .route("/api/user/send-message-to-group", post(send_message_to_group))
        .route("/api/user/chats", get(list_chats))
        .route("/api/user/message/:phone", get(messages_for_phone))
        .route("/api/user/verify-receipt", post(verify_receipt))
        .route("/api/user/profile/change-username", put(change_username))
        .route("/api/user/profile/delete", delete(delete_account))
        .route("/api/user/contact-us", post(contact_us))
        .route("/api/groups", post(create_group).get(list_groups))
        .route(
            "/api/groups/:id",
            get(get_group).put(update_group).delete(delete_group),
        )
        .route("/api/groups/:id/contacts", post(add_contacts))
        .route("/api/groups/:id/contacts/:contact_id", delete(remove_contact))
        .route("/api/stripe/save-card", post(save_card))
        .route("/api/stripe/cards", get(list_cards))
        .route("/api/stripe/set-default-payment-method", post(set_default_card))
        .route("/api/stripe/delete-card/:card_id", delete(delete_card))
        .route("/api/stripe/products", get(list_products))
        .route("/api/stripe/subscribe", post(purchase))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let public_routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/request-otp", post(request_otp))
        .route("/api/auth/verify-otp", post(verify_otp))
        .route("/api/stripe/fetch-and-save-products", post(fetch_and_save_products));

    Router::new()
        .merge(authed_routes)
        .merge(public_routes)
        .with_state(state)
}

async fn require_auth(
    State(state): State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> Response {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let Some(token) = auth::bearer_token(header).map(str::to_string) else {
        return AppError::Unauthorized.into_response();
    };
    match db::user_id_for_token(&state.pool, state.db_kind, &token).await {
        Ok(Some(user_id)) => {
            req.extensions_mut().insert(AuthUser(user_id));
            next.run(req).await
        }
        Ok(None) => AppError::Unauthorized.into_response(),
        Err(err) => AppError::Internal(err).into_response(),
    }
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<auth::Registration>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::register(&state.pool, state.db_kind, &state.http, &state.config.auth, req).await?;
    Ok(Json(json!({"message": "OTP sent to email", "user": user})))
}

async fn request_otp(
    State(state): State<AppState>,
    Json(req): Json<RequestOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth::request_otp(
        &state.pool,
        state.db_kind,
        &state.http,
        &state.config.auth,
        req.email.trim(),
    )
    .await?;
    Ok(Json(json!({"message": "OTP sent to email"})))
}

async fn verify_otp(
    State(state): State<AppState>,
    Json(req): Json<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let login = auth::verify_otp(&state.pool, state.db_kind, req.email.trim(), &req.otp).await?;
    Ok(Json(login))
}

async fn send_message(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let template = req.message.unwrap_or_default();
    if template.trim().is_empty() {
        return Err(AppError::validation("Message is required"));
    }
    if req.recipients.is_empty() {
        return Err(AppError::validation("No recipients to send to"));
    }
    let report = state.run_batch(user_id, template, req.recipients, None).await?;
    Ok(Json(report))
}

async fn send_message_to_group(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<SendToGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let template = req.message.unwrap_or_default();
    if template.trim().is_empty() {
        return Err(AppError::validation("Message is required"));
    }
    let group_id = req
        .group_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::validation("groupId is required"))?;

    let (group, recipients) = groups::resolve_group(&state.pool, state.db_kind, &user_id, &group_id).await?;
    if recipients.is_empty() {
        return Err(AppError::validation("Group has no contacts"));
    }
    let report = state.run_batch(user_id, template, recipients, Some(group.name)).await?;
    Ok(Json(report))
}

async fn list_chats(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let messages = db::list_user_messages(&state.pool, state.db_kind, &user_id).await?;
    Ok(Json(db::latest_per_phone(messages)))
}

async fn messages_for_phone(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(phone): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let messages = db::list_messages_for_phone(&state.pool, state.db_kind, &user_id, &phone).await?;
    Ok(Json(messages))
}

async fn verify_receipt(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<VerifyReceiptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (user, verification) = billing::redeem_receipt(
        &state.pool,
        state.db_kind,
        &state.receipts,
        &user_id,
        &req.platform,
        &req.receipt_data,
        &req.product_id,
    )
    .await?;
    Ok(Json(json!({
        "message": "Receipt verified",
        "user": user,
        "verification": verification,
    })))
}

async fn change_username(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ChangeUsernameRequest>,
) -> Result<impl IntoResponse, AppError> {
    let username = req.new_username.trim();
    if username.is_empty() {
        return Err(AppError::validation("New username is required"));
    }
    db::update_username(&state.pool, state.db_kind, &user_id, username).await?;
    let user = db::get_user(&state.pool, state.db_kind, &user_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(Json(json!({"message": "Username updated", "user": user})))
}

async fn delete_account(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    db::soft_delete_user(&state.pool, state.db_kind, &user_id).await?;
    tracing::info!("user {user_id} deleted their account");
    Ok(Json(json!({"message": "Account deleted"})))
}

async fn contact_us(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ContactUsRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.message.trim().is_empty() {
        return Err(AppError::validation("Message is required"));
    }
    let record = db::insert_contact_us(&state.pool, state.db_kind, &user_id, req.message.trim()).await?;
    Ok(Json(record))
}

async fn create_group(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let group = groups::create_group(
        &state.pool,
        state.db_kind,
        &user_id,
        req.name.trim(),
        req.description.as_deref(),
        &req.contacts,
    )
    .await?;
    Ok((axum::http::StatusCode::CREATED, Json(group)))
}

async fn list_groups(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(groups::list_groups(&state.pool, state.db_kind, &user_id).await?))
}

async fn get_group(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(groups::get_group(&state.pool, state.db_kind, &user_id, &group_id).await?))
}

async fn update_group(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(group_id): Path<String>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let group = groups::update_group(
        &state.pool,
        state.db_kind,
        &user_id,
        &group_id,
        req.name.trim(),
        req.description.as_deref(),
    )
    .await?;
    Ok(Json(group))
}

async fn delete_group(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(group_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    groups::delete_group(&state.pool, state.db_kind, &user_id, &group_id).await?;
    Ok(Json(json!({"message": "Group deleted"})))
}

async fn add_contacts(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(group_id): Path<String>,
    Json(req): Json<AddContactsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let added = groups::add_contacts(&state.pool, state.db_kind, &user_id, &group_id, &req.contacts).await?;
    Ok(Json(json!({"added": added.len(), "contacts": added})))
}

async fn remove_contact(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path((group_id, contact_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let removed = groups::remove_contact(&state.pool, state.db_kind, &user_id, &group_id, &contact_id).await?;
    Ok(Json(removed))
}

async fn save_card(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<SaveCardRequest>,
) -> Result<impl IntoResponse, AppError> {
    let card = billing::save_card(
        &state.pool,
        state.db_kind,
        &state.stripe,
        &user_id,
        req.payment_method_id.trim(),
    )
    .await?;
    Ok(Json(card))
}

async fn list_cards(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(billing::list_cards(&state.pool, state.db_kind, &user_id).await?))
}

async fn set_default_card(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<SetDefaultCardRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.card_id.trim().is_empty() {
        return Err(AppError::validation("cardId is required"));
    }
    let card = billing::set_default_card(&state.pool, state.db_kind, &state.stripe, &user_id, req.card_id.trim()).await?;
    Ok(Json(card))
}

async fn delete_card(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(card_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    billing::delete_card(&state.pool, state.db_kind, &state.stripe, &user_id, &card_id).await?;
    Ok(Json(json!({"message": "Card deleted"})))
}

async fn fetch_and_save_products(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let synced = billing::sync_products(&state.pool, state.db_kind, &state.stripe).await?;
    tracing::info!("synced {synced} products");
    Ok(Json(json!({"synced": synced})))
}

async fn list_products(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(billing::list_products(&state.pool, state.db_kind).await?))
}

async fn purchase(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<PurchaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.product_id.trim().is_empty() {
        return Err(AppError::validation("productId is required"));
    }
    let result = billing::purchase(&state.pool, state.db_kind, &state.stripe, &user_id, req.product_id.trim()).await?;
    Ok(Json(result))
}
