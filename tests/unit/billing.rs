use nods::billing::{self, credits_for_product, credits_from_product_name, ReceiptVerifier, StripeClient};
use nods::config::{ReceiptsConfig, StripeConfig};
use nods::db::{self, DbKind};
use nods::{ledger, AppError};
use serde_json::json;
use sqlx::AnyPool;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn create_test_pool(dir: &TempDir) -> (AnyPool, DbKind) {
    sqlx::any::install_default_drivers();
    let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let pool = AnyPool::connect(&db_url).await.unwrap();
    db::init_db(&pool, DbKind::Sqlite).await.unwrap();
    (pool, DbKind::Sqlite)
}

fn stripe_client(server: &MockServer) -> StripeClient {
    StripeClient::new(
        reqwest::Client::new(),
        &StripeConfig {
            base_url: server.uri(),
            secret_key: Some("sk_test".to_string()),
        },
    )
}

fn receipt_verifier(server: &MockServer) -> ReceiptVerifier {
    ReceiptVerifier::new(
        reqwest::Client::new(),
        ReceiptsConfig {
            apple_url: format!("{}/prod/verifyReceipt", server.uri()),
            apple_sandbox_url: format!("{}/sandbox/verifyReceipt", server.uri()),
            apple_shared_secret: Some("shared".to_string()),
            google_base_url: server.uri(),
            google_access_token: Some("gtoken".to_string()),
        },
    )
}

#[test]
fn test_credits_for_product() {
    assert_eq!(credits_for_product("com.nods.25messages"), 25);
    assert_eq!(credits_for_product("com.nods.50messages"), 50);
    assert_eq!(credits_for_product("com.nods.100messages"), 100);
    assert_eq!(credits_for_product("com.nods.500messages"), 500);
    assert_eq!(credits_for_product("com.nods.1000messages"), 1000);
    assert_eq!(credits_for_product("com.nods.unknown"), 0);
}

#[test]
fn test_credits_from_product_name() {
    assert_eq!(credits_from_product_name("500 Messages"), Some(500));
    assert_eq!(credits_from_product_name("Messages"), None);
}

#[tokio::test]
async fn test_apple_sandbox_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prod/verifyReceipt"))
        .and(body_string_contains("\"password\":\"shared\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 21007})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sandbox/verifyReceipt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 0, "environment": "Sandbox"})))
        .expect(1)
        .mount(&server)
        .await;

    let verifier = receipt_verifier(&server);
    let value = verifier.verify_apple("base64receipt").await.unwrap();
    assert_eq!(value["environment"], "Sandbox");
}

#[tokio::test]
async fn test_apple_invalid_status_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prod/verifyReceipt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 21003})))
        .mount(&server)
        .await;

    let err = receipt_verifier(&server).verify_apple("bad").await.unwrap_err();
    assert!(matches!(err, AppError::Receipt(_)));
}

#[tokio::test]
async fn test_google_purchase_verified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/androidpublisher/v3/applications/com.nods.app/purchases/products/com.nods.25messages/tokens/tok-1",
        ))
        .and(header("authorization", "Bearer gtoken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "purchaseState": 0,
            "consumptionState": 0,
            "orderId": "GPA.1"
        })))
        .mount(&server)
        .await;

    let receipt = json!({"packageName": "com.nods.app", "purchaseToken": "tok-1", "orderId": "GPA.1"});
    let value = receipt_verifier(&server)
        .verify("android", &receipt, "com.nods.25messages")
        .await
        .unwrap();
    assert_eq!(value["orderId"], "GPA.1");
}

#[tokio::test]
async fn test_unsupported_platform_rejected() {
    let server = MockServer::start().await;
    let err = receipt_verifier(&server)
        .verify("web", &json!({}), "com.nods.25messages")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_redeem_receipt_credits_quota() {
    let dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&dir).await;
    let user = db::insert_user(&pool, kind, "ann@example.com", "ann").await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prod/verifyReceipt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 0, "receipt": {"in_app": [
            {"product_id": "com.nods.100messages", "transaction_id": "1001"}
        ]}})))
        .mount(&server)
        .await;
    let verifier = receipt_verifier(&server);

    let (updated, _) = billing::redeem_receipt(
        &pool,
        kind,
        &verifier,
        &user.id,
        "ios",
        &json!({"receipt": "abc"}),
        "COM.NODS.100MESSAGES",
    )
    .await
    .unwrap();
    assert_eq!(updated.remaining_msgs, 100);

    let err = billing::redeem_receipt(
        &pool,
        kind,
        &verifier,
        &user.id,
        "ios",
        &json!({"receipt": "abc"}),
        "com.nods.100messages",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Receipt(ref msg) if msg.contains("already been redeemed")));
    assert_eq!(ledger::balance(&pool, kind, &user.id).await.unwrap(), 100);
}

#[tokio::test]
async fn test_google_order_redeemed_once_across_users() {
    let dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&dir).await;
    let ann = db::insert_user(&pool, kind, "ann@example.com", "ann").await.unwrap();
    let bob = db::insert_user(&pool, kind, "bob@example.com", "bob").await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/androidpublisher/v3/applications/com.nods.app/purchases/products/com.nods.25messages/tokens/tok-1",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "purchaseState": 0,
            "consumptionState": 0,
            "orderId": "GPA.7"
        })))
        .mount(&server)
        .await;
    let verifier = receipt_verifier(&server);
    let receipt = json!({"packageName": "com.nods.app", "purchaseToken": "tok-1", "orderId": "GPA.7"});

    billing::redeem_receipt(&pool, kind, &verifier, &ann.id, "android", &receipt, "com.nods.25messages")
        .await
        .unwrap();
    let err = billing::redeem_receipt(&pool, kind, &verifier, &bob.id, "android", &receipt, "com.nods.25messages")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Receipt(_)));
    assert_eq!(ledger::balance(&pool, kind, &ann.id).await.unwrap(), 25);
    assert_eq!(ledger::balance(&pool, kind, &bob.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_receipt_leaves_quota() {
    let dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&dir).await;
    let user = db::insert_user(&pool, kind, "ann@example.com", "ann").await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 21002})))
        .mount(&server)
        .await;

    let result = billing::redeem_receipt(
        &pool,
        kind,
        &receipt_verifier(&server),
        &user.id,
        "ios",
        &json!({"receipt": "abc"}),
        "com.nods.100messages",
    )
    .await;
    assert!(result.is_err());
    assert_eq!(ledger::balance(&pool, kind, &user.id).await.unwrap(), 0);
}

async fn mount_card_flow(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/customers"))
        .and(header("authorization", "Bearer sk_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cus_1"})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/customers/cus_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cus_1"})))
        .mount(server)
        .await;
    for (pm, last4) in [("pm_1", "4242"), ("pm_2", "0005")] {
        Mock::given(method("GET"))
            .and(path(format!("/v1/payment_methods/{pm}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": pm,
                "card": {"last4": last4, "brand": "visa", "exp_month": 12, "exp_year": 2030}
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/payment_methods/{pm}/attach")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": pm})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/payment_methods/{pm}/detach")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": pm})))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_save_and_delete_cards() {
    let dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&dir).await;
    let user = db::insert_user(&pool, kind, "ann@example.com", "ann").await.unwrap();

    let server = MockServer::start().await;
    mount_card_flow(&server).await;
    let stripe = stripe_client(&server);

    let first = billing::save_card(&pool, kind, &stripe, &user.id, "pm_1").await.unwrap();
    assert!(first.is_default);
    assert_eq!(first.last4, "4242");
    let customer = db::get_user(&pool, kind, &user.id).await.unwrap().unwrap();
    assert_eq!(customer.stripe_customer_id.as_deref(), Some("cus_1"));

    let second = billing::save_card(&pool, kind, &stripe, &user.id, "pm_2").await.unwrap();
    assert!(second.is_default);
    let cards = billing::list_cards(&pool, kind, &user.id).await.unwrap();
    assert_eq!(cards.len(), 2);
    assert_eq!(cards.iter().filter(|c| c.is_default).count(), 1);

    billing::set_default_card(&pool, kind, &stripe, &user.id, "pm_1").await.unwrap();
    let default = billing::default_card(&pool, kind, &user.id).await.unwrap().unwrap();
    assert_eq!(default.stripe_card_id, "pm_1");

    billing::delete_card(&pool, kind, &stripe, &user.id, "pm_1").await.unwrap();
    let default = billing::default_card(&pool, kind, &user.id).await.unwrap().unwrap();
    assert_eq!(default.stripe_card_id, "pm_2");

    let err = billing::delete_card(&pool, kind, &stripe, &user.id, "pm_1").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound("Card")));
}

#[tokio::test]
async fn test_sync_products_and_purchase() {
    let dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&dir).await;
    let user = db::insert_user(&pool, kind, "ann@example.com", "ann").await.unwrap();

    let server = MockServer::start().await;
    mount_card_flow(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [
            {"id": "prod_100", "name": "100 Messages", "description": "Pack of 100"},
            {"id": "prod_free", "name": "Free tier", "description": null}
        ]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/prices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [
            {"id": "price_100", "product": "prod_100", "unit_amount": 499, "currency": "usd"}
        ]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(body_string_contains("amount=499"))
        .and(body_string_contains("off_session=true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "pi_1", "status": "succeeded"})))
        .expect(1)
        .mount(&server)
        .await;
    let stripe = stripe_client(&server);

    assert_eq!(billing::sync_products(&pool, kind, &stripe).await.unwrap(), 1);
    assert_eq!(billing::sync_products(&pool, kind, &stripe).await.unwrap(), 1);
    let products = billing::list_products(&pool, kind).await.unwrap();
    assert_eq!(products.len(), 1);
    assert!((products[0].price - 4.99).abs() < 1e-9);

    let err = billing::purchase(&pool, kind, &stripe, &user.id, "prod_100").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    billing::save_card(&pool, kind, &stripe, &user.id, "pm_1").await.unwrap();
    let result = billing::purchase(&pool, kind, &stripe, &user.id, "prod_100").await.unwrap();
    assert_eq!(result.credited, 100);
    assert_eq!(result.user.remaining_msgs, 100);
    assert_eq!(result.payment_intent["status"], "succeeded");
}

#[tokio::test]
async fn test_processor_error_maps_to_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/products"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "Invalid API Key"}})))
        .mount(&server)
        .await;

    let err = stripe_client(&server).list_products().await.unwrap_err();
    match err {
        AppError::Upstream(msg) => assert!(msg.contains("Invalid API Key")),
        other => panic!("unexpected error: {other:?}"),
    }
}
